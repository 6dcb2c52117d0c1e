use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, RuntimeError};
use crate::service::Service;

/// 32-bit opaque service identifier. High 8 bits are the node id (1-255, 0
/// reserved); low 24 bits are the local slot index. Zero is never valid.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u32);

const NODE_SHIFT: u32 = 24;
const SLOT_MASK: u32 = (1 << NODE_SHIFT) - 1;

impl Handle {
    pub const NONE: Handle = Handle(0);

    pub const fn from_raw(raw: u32) -> Self {
        Handle(raw)
    }

    pub const fn pack(node: u8, slot: u32) -> Self {
        Handle(((node as u32) << NODE_SHIFT) | (slot & SLOT_MASK))
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn node(self) -> u8 {
        (self.0 >> NODE_SHIFT) as u8
    }

    pub const fn slot(self) -> u32 {
        self.0 & SLOT_MASK
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle(:{:08x})", self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{:08x}", self.0)
    }
}

struct Slot {
    service: Option<Arc<Service>>,
}

/// Handle table plus name registry for one node. A single `RwLock` guards
/// both: grabs vastly outnumber registrations and name bindings, so the
/// reader-biased default of `parking_lot::RwLock` is the right shape here.
pub struct HandleRegistry {
    node_id: u8,
    inner: RwLock<Inner>,
}

struct Inner {
    slots: Vec<Slot>,
    free: Vec<u32>,
    names: std::collections::HashMap<String, Handle>,
}

impl HandleRegistry {
    pub fn new(node_id: u8) -> Self {
        Self {
            node_id,
            inner: RwLock::new(Inner {
                slots: Vec::new(),
                free: Vec::new(),
                names: std::collections::HashMap::new(),
            }),
        }
    }

    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    /// Allocate a slot and bind a service to it. `build` receives the
    /// handle the slot was just given so the `Service` can be constructed
    /// with its final handle already set, rather than patched in after the
    /// fact.
    pub fn register(&self, build: impl FnOnce(Handle) -> Arc<Service>) -> Result<Handle> {
        let mut inner = self.inner.write();
        let slot_index = if let Some(free) = inner.free.pop() {
            free
        } else {
            let idx = inner.slots.len() as u32;
            if idx > SLOT_MASK {
                return Err(RuntimeError::HandleTableFull);
            }
            inner.slots.push(Slot { service: None });
            idx
        };
        let handle = Handle::pack(self.node_id, slot_index);
        inner.slots[slot_index as usize] = Slot {
            service: Some(build(handle)),
        };
        Ok(handle)
    }

    /// Look up and clone the `Arc<Service>` for `handle`, if still live.
    pub fn grab(&self, handle: Handle) -> Option<Arc<Service>> {
        let inner = self.inner.read();
        inner
            .slots
            .get(handle.slot() as usize)
            .and_then(|slot| slot.service.clone())
    }

    /// Remove the registry entry for `handle`. Returns the removed service,
    /// if any, so the caller can drain/finish teardown.
    pub fn retire(&self, handle: Handle) -> Option<Arc<Service>> {
        let mut inner = self.inner.write();
        let removed = inner
            .slots
            .get_mut(handle.slot() as usize)
            .and_then(|slot| slot.service.take());
        if removed.is_some() {
            inner.free.push(handle.slot());
            inner.names.retain(|_, h| *h != handle);
        }
        removed
    }

    /// Retire every live handle. Used during shutdown.
    pub fn retire_all(&self) -> Vec<Arc<Service>> {
        let mut inner = self.inner.write();
        let mut out = Vec::new();
        for (idx, slot) in inner.slots.iter_mut().enumerate() {
            if let Some(service) = slot.service.take() {
                inner.free.push(idx as u32);
                out.push(service);
            }
        }
        inner.names.clear();
        out
    }

    pub fn find_name(&self, name: &str) -> Option<Handle> {
        if let Some(hex) = name.strip_prefix(':') {
            return u32::from_str_radix(hex, 16).ok().map(Handle::from_raw);
        }
        self.inner.read().names.get(name).copied()
    }

    /// Bind `name` to `handle`. Fails if the name is already taken.
    pub fn name_handle(&self, handle: Handle, name: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.names.contains_key(name) {
            return Err(RuntimeError::NameTaken(name.to_string()));
        }
        inner.names.insert(name.to_string(), handle);
        Ok(())
    }

    pub fn name_of(&self, handle: Handle) -> Option<String> {
        let inner = self.inner.read();
        inner
            .names
            .iter()
            .find(|(_, h)| **h == handle)
            .map(|(name, _)| name.clone())
    }
}

impl fmt::Debug for HandleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("HandleRegistry");
        s.field("node_id", &self.node_id);
        match self.inner.try_read() {
            Some(inner) => s
                .field("slots", &inner.slots.len())
                .field("names", &inner.names.len())
                .finish(),
            None => s.field("slots", &"<locked>").finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_roundtrip() {
        let h = Handle::pack(3, 0x00abcdef);
        assert_eq!(h.node(), 3);
        assert_eq!(h.slot(), 0x00abcdef);
    }

    #[test]
    fn none_is_zero() {
        assert!(Handle::NONE.is_none());
        assert!(!Handle::pack(1, 0).is_none());
    }

    #[test]
    fn colon_name_is_hex_literal() {
        let reg = HandleRegistry::new(1);
        assert_eq!(reg.find_name(":00000005"), Some(Handle::from_raw(5)));
    }
}

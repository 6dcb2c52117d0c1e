use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_utils::CachePadded;
use tracing::warn;

use crate::handle::Handle;
use crate::runtime::Runtime;

/// Per-worker liveness slot. The worker bumps `version` once at dispatch
/// start and once at dispatch end, so a healthy worker shows even parity
/// across any sampling instant. Cache-line padded: every worker writes its
/// own slot on the hot path while the monitor thread reads all of them, so
/// padding keeps those writes from bouncing the monitor's read of a
/// neighboring slot.
pub struct MonitorSlot {
    version: CachePadded<AtomicU64>,
    check_version: AtomicU64,
    last_source: AtomicU32,
    last_dest: AtomicU32,
}

impl MonitorSlot {
    pub fn new() -> Self {
        Self {
            version: CachePadded::new(AtomicU64::new(0)),
            check_version: AtomicU64::new(0),
            last_source: AtomicU32::new(0),
            last_dest: AtomicU32::new(0),
        }
    }

    /// Record the start of a dispatch: latch (source, dest) and bump the
    /// version counter.
    pub fn trigger(&self, source: Handle, dest: Handle) {
        self.last_source.store(source.raw(), Ordering::Relaxed);
        self.last_dest.store(dest.raw(), Ordering::Relaxed);
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Record the end of a dispatch (source=dest=0 signals completion).
    pub fn complete(&self) {
        self.last_source.store(0, Ordering::Relaxed);
        self.last_dest.store(0, Ordering::Relaxed);
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    fn sample(&self) -> (u64, Handle) {
        let version = self.version.load(Ordering::Acquire);
        let dest = Handle::from_raw(self.last_dest.load(Ordering::Relaxed));
        (version, dest)
    }
}

impl Default for MonitorSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MonitorSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (version, dest) = self.sample();
        f.debug_struct("MonitorSlot")
            .field("version", &version)
            .field("last_dest", &dest)
            .finish()
    }
}

/// Tick interval between liveness sweeps (§4.8).
pub const MONITOR_TICK: Duration = Duration::from_secs(5);

/// One sweep of every worker's monitor slot: compare `version` against the
/// value recorded on the previous sweep. No movement across an entire tick
/// means the worker has not progressed - if a destination was latched, mark
/// that service `endless`.
pub fn sweep(runtime: &Runtime) {
    for slot in &runtime.monitor_slots {
        let (version, dest) = slot.sample();
        let check = slot.check_version.swap(version, Ordering::AcqRel);
        if check == version && !dest.is_none() {
            warn!(destination = %dest, "a message to {} may be in an endless loop", dest);
            if let Some(service) = runtime.registry.grab(dest) {
                service.endless.store(true, Ordering::Release);
                service.release();
            }
        }
    }
}

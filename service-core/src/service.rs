use std::any::Any;
use std::fmt;
use std::fs::File;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicI8, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;

use crate::handle::Handle;
use crate::mailbox::Mailbox;
use crate::message::MessageType;
use crate::module::ModuleDescriptor;
use crate::runtime::Runtime;

/// Signature of a service's registered message callback. Returning `true`
/// means the callback has taken ownership of the payload elsewhere (stashed
/// in its own state); returning `false` lets the dispatcher drop it when the
/// call returns. This mirrors the original "non-zero = I freed/kept it"
/// contract, expressed over an owned `Arc<[u8]>` instead of a raw pointer.
pub type Callback =
    dyn Fn(&Service, &mut dyn Any, MessageType, i64, Handle, &[u8]) -> bool + Send + Sync;

/// Cooperative-interrupt trap states (§4.9). The CAS handshake lets a
/// signal installer observe that the guest hook actually took effect before
/// returning, rather than just firing-and-forgetting the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum TrapState {
    Idle = 0,
    Armed = 1,
    Consumed = -1,
}

/// Binds a loaded module instance to its mailbox: refcount, stats, flags,
/// and an optional per-service log sink. Created by [`crate::runtime::Runtime::context_new`];
/// torn down once the refcount reaches zero.
pub struct Service {
    pub handle: Handle,
    pub module: Arc<ModuleDescriptor>,
    pub mailbox: Arc<Mailbox>,
    runtime: Weak<Runtime>,

    instance: Mutex<Option<Box<dyn Any + Send>>>,
    callback: Mutex<Option<Box<Callback>>>,
    interrupt_hook: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,

    refcount: AtomicUsize,
    session_counter: AtomicI64,

    cpu_micros: AtomicU64,
    message_started_at: Mutex<Option<Instant>>,
    message_count: AtomicU64,

    pub init: AtomicBool,
    pub endless: AtomicBool,
    pub profile: AtomicBool,
    trap: AtomicI8,

    log_sink: Mutex<Option<File>>,
    exit_watcher: Mutex<Option<Handle>>,
}

impl Service {
    pub fn new(
        handle: Handle,
        module: Arc<ModuleDescriptor>,
        mailbox: Arc<Mailbox>,
        runtime: Weak<Runtime>,
        profile: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            handle,
            module,
            mailbox,
            runtime,
            instance: Mutex::new(None),
            callback: Mutex::new(None),
            interrupt_hook: Mutex::new(None),
            // Starts at 2: one for the registry entry, one for the creator.
            // `context_new` drops the creator's reference once `init` succeeds.
            refcount: AtomicUsize::new(2),
            session_counter: AtomicI64::new(0),
            cpu_micros: AtomicU64::new(0),
            message_started_at: Mutex::new(None),
            message_count: AtomicU64::new(0),
            init: AtomicBool::new(false),
            endless: AtomicBool::new(false),
            profile: AtomicBool::new(profile),
            trap: AtomicI8::new(TrapState::Idle as i8),
            log_sink: Mutex::new(None),
            exit_watcher: Mutex::new(None),
        })
    }

    pub fn runtime(&self) -> Option<Arc<Runtime>> {
        self.runtime.upgrade()
    }

    pub fn set_instance(&self, instance: Box<dyn Any + Send>) {
        *self.instance.lock() = Some(instance);
    }

    pub fn with_instance<R>(&self, f: impl FnOnce(&mut dyn Any) -> R) -> Option<R> {
        let mut guard = self.instance.lock();
        guard.as_deref_mut().map(|inst| f(inst))
    }

    pub fn take_instance(&self) -> Option<Box<dyn Any + Send>> {
        self.instance.lock().take()
    }

    pub fn set_callback(&self, callback: Box<Callback>) {
        *self.callback.lock() = Some(callback);
    }

    /// Invoke the registered callback, if any, under the instance lock.
    pub fn invoke_callback(
        &self,
        ty: MessageType,
        session: i64,
        source: Handle,
        payload: &[u8],
    ) -> bool {
        let callback = self.callback.lock();
        let Some(cb) = callback.as_ref() else {
            return false;
        };
        let mut instance = self.instance.lock();
        let Some(inst) = instance.as_deref_mut() else {
            return false;
        };
        cb(self, inst, ty, session, source, payload)
    }

    pub fn install_interrupt_hook(&self, hook: Box<dyn Fn() + Send + Sync>) {
        *self.interrupt_hook.lock() = Some(hook);
    }

    /// Signal API half of the `0 -> 1 -> -1` CAS handshake: arm the trap.
    pub fn arm_trap(&self) -> bool {
        self.trap
            .compare_exchange(
                TrapState::Idle as i8,
                TrapState::Armed as i8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Guest-hook half: consume an armed trap, running the installed hook if
    /// present.
    pub fn consume_trap(&self) -> bool {
        let consumed = self
            .trap
            .compare_exchange(
                TrapState::Armed as i8,
                TrapState::Consumed as i8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if consumed {
            if let Some(hook) = self.interrupt_hook.lock().as_ref() {
                hook();
            }
        }
        consumed
    }

    pub fn reset_trap(&self) {
        self.trap.store(TrapState::Idle as i8, Ordering::Release);
    }

    pub fn trap_state(&self) -> TrapState {
        match self.trap.load(Ordering::Acquire) {
            1 => TrapState::Armed,
            -1 => TrapState::Consumed,
            _ => TrapState::Idle,
        }
    }

    /// Allocate the next positive session, wrapping past zero back to 1.
    pub fn alloc_session(&self) -> i64 {
        loop {
            let next = self.session_counter.fetch_add(1, Ordering::Relaxed) + 1;
            if next > 0 {
                return next;
            }
            // Overflowed past i64::MAX: reset and retry.
            self.session_counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn begin_dispatch(&self) {
        if self.profile.load(Ordering::Relaxed) {
            *self.message_started_at.lock() = Some(Instant::now());
        }
    }

    pub fn end_dispatch(&self) {
        self.message_count.fetch_add(1, Ordering::Relaxed);
        if self.profile.load(Ordering::Relaxed) {
            if let Some(start) = self.message_started_at.lock().take() {
                let micros = start.elapsed().as_micros() as u64;
                self.cpu_micros.fetch_add(micros, Ordering::Relaxed);
            }
        }
    }

    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::Relaxed)
    }

    pub fn cpu_micros(&self) -> u64 {
        self.cpu_micros.load(Ordering::Relaxed)
    }

    pub fn set_log_sink(&self, file: Option<File>) {
        *self.log_sink.lock() = file;
    }

    pub fn log_line(&self, line: &str) {
        use std::io::Write;
        if let Some(file) = self.log_sink.lock().as_mut() {
            let _ = writeln!(file, "{line}");
        }
    }

    pub fn set_exit_watcher(&self, watcher: Handle) {
        *self.exit_watcher.lock() = Some(watcher);
    }

    pub fn exit_watcher(&self) -> Option<Handle> {
        *self.exit_watcher.lock()
    }

    /// Increment the refcount. Used for both ordinary `grab`s and
    /// `context_reserve`'s infra-service bookkeeping.
    pub fn retain(&self) {
        self.refcount.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrement the refcount, returning `true` if this was the last
    /// reference (caller must then finish teardown).
    pub fn release(&self) -> bool {
        self.refcount.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("handle", &self.handle)
            .field("module", &self.module.name)
            .field("refcount", &self.refcount())
            .field("init", &self.init.load(Ordering::Relaxed))
            .field("endless", &self.endless.load(Ordering::Relaxed))
            .field("messages", &self.message_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;

    struct NoopModule;
    impl crate::module::ServiceModule for NoopModule {
        fn create(&self) -> Box<dyn Any + Send> {
            Box::new(())
        }
        fn init(&self, _: &mut dyn Any, _: &ServiceHandle, _: &str) -> crate::error::Result<()> {
            Ok(())
        }
        fn release(&self, _: Box<dyn Any + Send>) {}
        fn signal(&self, _: &mut dyn Any, _: i32) {}
    }

    fn service() -> Arc<Service> {
        let mailbox = Mailbox::new_pending(Handle::pack(1, 1), Arc::new(crate::runqueue::RunQueue::new()));
        let modules = crate::module::ModuleRegistry::new(None);
        modules.register_static("noop", Arc::new(NoopModule));
        let descriptor = modules.resolve("noop").unwrap();
        Service::new(Handle::pack(1, 1), descriptor, mailbox, Weak::new(), false)
    }

    #[test]
    fn trap_cas_sequence() {
        let svc = service();
        assert_eq!(svc.trap_state(), TrapState::Idle);
        assert!(svc.arm_trap());
        assert!(!svc.arm_trap(), "re-arming an armed trap must fail");
        assert_eq!(svc.trap_state(), TrapState::Armed);
        assert!(svc.consume_trap());
        assert_eq!(svc.trap_state(), TrapState::Consumed);
        assert!(!svc.consume_trap(), "consuming twice must fail");
        svc.reset_trap();
        assert_eq!(svc.trap_state(), TrapState::Idle);
    }

    #[test]
    fn alloc_session_wraps_past_overflow() {
        let svc = service();
        svc.session_counter.store(i64::MAX, Ordering::Relaxed);
        let wrapped = svc.alloc_session();
        assert_eq!(wrapped, 1);
    }

    #[test]
    fn refcount_release_reports_last_reference() {
        let svc = service();
        assert_eq!(svc.refcount(), 2);
        assert!(!svc.release());
        assert!(svc.release());
    }
}

/// Narrow handle passed into `ServiceModule::init`/`signal`, deliberately
/// exposing less surface than `Arc<Service>` (no refcount manipulation, no
/// instance access) since modules shouldn't need either.
#[derive(Debug)]
pub struct ServiceHandle(Arc<Service>);

impl ServiceHandle {
    pub fn new(service: Arc<Service>) -> Self {
        Self(service)
    }

    pub fn handle(&self) -> Handle {
        self.0.handle
    }

    pub fn set_callback(&self, callback: Box<Callback>) {
        self.0.set_callback(callback);
    }

    pub fn install_interrupt_hook(&self, hook: Box<dyn Fn() + Send + Sync>) {
        self.0.install_interrupt_hook(hook);
    }

    pub fn runtime(&self) -> Option<Arc<Runtime>> {
        self.0.runtime()
    }

    pub fn service(&self) -> &Arc<Service> {
        &self.0
    }
}

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::{error, info};

use crate::config::RuntimeConfig;
use crate::handle::{Handle, HandleRegistry};
use crate::harbor::{HarborSink, NullHarbor};
use crate::mailbox::Mailbox;
use crate::message::{Message, MessageType};
use crate::module::ModuleRegistry;
use crate::monitor::MonitorSlot;
use crate::runqueue::RunQueue;
use crate::service::Service;
use crate::Result;

/// All shared mutable state of one node, held behind a single `Arc` and
/// threaded through worker closures, the command surface, and the messaging
/// API. There is no `static`/`lazy_static` global: every entry point takes
/// `&Arc<Runtime>` (or a clone of it).
pub struct Runtime {
    pub config: RuntimeConfig,
    pub registry: HandleRegistry,
    pub run_queue: Arc<RunQueue>,
    pub modules: ModuleRegistry,
    pub harbor: Box<dyn HarborSink>,
    pub monitor_slots: Vec<MonitorSlot>,

    service_count: AtomicUsize,
    start_time: std::time::Instant,
    shutdown: Mutex<bool>,
    shutdown_cv: Condvar,
    wake_cv: Condvar,
    wake_lock: Mutex<()>,
    self_ref: Mutex<Weak<Runtime>>,
    env: Mutex<HashMap<String, String>>,
    pending_timeouts: Mutex<Vec<(Instant, Handle, i64)>>,
}

thread_local! {
    /// The handle of the service whose callback is currently executing on
    /// this thread. Timer/monitor/socket threads never set this and read
    /// back `Handle::NONE`.
    static CURRENT_HANDLE: std::cell::Cell<Handle> = const { std::cell::Cell::new(Handle::NONE) };
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Arc<Self> {
        let node_id = config.harbor;
        let worker_count = config.threads.max(1);
        let rt = Arc::new(Self {
            registry: HandleRegistry::new(node_id),
            run_queue: Arc::new(RunQueue::new()),
            modules: ModuleRegistry::new(config.cpath.clone()),
            harbor: Box::new(NullHarbor),
            monitor_slots: (0..worker_count).map(|_| MonitorSlot::new()).collect(),
            service_count: AtomicUsize::new(0),
            start_time: std::time::Instant::now(),
            shutdown: Mutex::new(false),
            shutdown_cv: Condvar::new(),
            wake_cv: Condvar::new(),
            wake_lock: Mutex::new(()),
            self_ref: Mutex::new(Weak::new()),
            env: Mutex::new(HashMap::new()),
            pending_timeouts: Mutex::new(Vec::new()),
            config,
        });
        *rt.self_ref.lock() = Arc::downgrade(&rt);
        rt
    }

    fn weak_self(&self) -> Weak<Runtime> {
        self.self_ref.lock().clone()
    }

    pub fn current_handle() -> Handle {
        CURRENT_HANDLE.with(|c| c.get())
    }

    pub fn set_current_handle(handle: Handle) {
        CURRENT_HANDLE.with(|c| c.set(handle));
    }

    pub fn start_time(&self) -> std::time::Instant {
        self.start_time
    }

    pub fn node_id(&self) -> u8 {
        self.registry.node_id()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.lock()
    }

    pub fn live_service_count(&self) -> usize {
        self.service_count.load(Ordering::Acquire)
    }

    pub fn getenv(&self, key: &str) -> Option<String> {
        self.env.lock().get(key).cloned()
    }

    pub fn setenv(&self, key: impl Into<String>, value: impl Into<String>) {
        self.env.lock().insert(key.into(), value.into());
    }

    /// TIMEOUT command support: deliver a `System`-typed message to
    /// `target` after `ticks` timer-thread ticks (§4.10's ~2.5ms tick).
    pub fn schedule_timeout(&self, target: Handle, session: i64, ticks: u32) {
        let delay = crate::orchestrator::TIMER_TICK * ticks.max(1);
        self.pending_timeouts
            .lock()
            .push((Instant::now() + delay, target, session));
    }

    /// Called by the timer thread each tick: deliver every timeout whose
    /// deadline has passed.
    pub fn fire_due_timeouts(self: &Arc<Self>) {
        let now = Instant::now();
        let due: Vec<_> = {
            let mut pending = self.pending_timeouts.lock();
            let (due, remaining): (Vec<_>, Vec<_>) =
                pending.drain(..).partition(|(deadline, _, _)| *deadline <= now);
            *pending = remaining;
            due
        };
        for (_, target, session) in due {
            if let Some(service) = self.registry.grab(target) {
                service.mailbox.push(Message::new(
                    Handle::NONE,
                    session,
                    MessageType::System,
                    Vec::new(),
                ));
                service.release();
                self.wake_one();
            }
        }
    }

    /// Wake one parked worker if any sleepers exist. Called by producers
    /// outside the worker pool (messaging API, command surface) so a
    /// freshly pushed mailbox gets picked up promptly; a worker that just
    /// pushed its own mailbox back skips this (it will see the queue on its
    /// next loop iteration).
    pub fn wake_one(&self) {
        let _guard = self.wake_lock.lock();
        self.wake_cv.notify_one();
    }

    pub fn wake_all(&self) {
        let _guard = self.wake_lock.lock();
        self.wake_cv.notify_all();
    }

    /// Park the calling worker until woken or a timeout elapses. Returns
    /// `true` if shutdown was observed.
    pub fn park_worker(&self, timeout: std::time::Duration) -> bool {
        let mut guard = self.wake_lock.lock();
        self.wake_cv.wait_for(&mut guard, timeout);
        self.is_shutting_down()
    }

    pub fn begin_shutdown(&self) {
        *self.shutdown.lock() = true;
        self.wake_all();
        self.shutdown_cv.notify_all();
    }

    pub fn wait_for_shutdown(&self) {
        let mut guard = self.shutdown.lock();
        if !*guard {
            self.shutdown_cv.wait(&mut guard);
        }
    }

    /// §4.4 `context_new`: resolve the module, create its instance, register
    /// a handle with a pending mailbox, run `init`, and either publish the
    /// mailbox (success) or retire the handle and drain queued messages with
    /// ERROR replies (failure).
    pub fn context_new(
        self: &Arc<Self>,
        module_name: &str,
        arg: &str,
    ) -> Result<Arc<Service>> {
        let descriptor = self.modules.resolve(module_name)?;
        let instance = descriptor.module.create();
        let run_queue = self.run_queue.clone();
        let weak_self = self.weak_self();
        let profile = self.config.profile;

        let mut handle_out = Handle::NONE;
        let service = self.registry.register(|handle| {
            handle_out = handle;
            // `in_global = true` from construction keeps stray pushes during
            // `init` from enqueuing the mailbox before it is published.
            let mailbox = Mailbox::new_pending(handle, run_queue.clone());
            Service::new(handle, descriptor.clone(), mailbox, weak_self.clone(), profile)
        })?;
        let handle = handle_out;
        service.set_instance(instance);
        let service_handle = crate::service::ServiceHandle::new(service.clone());

        let mut instance = service.take_instance().unwrap_or_else(|| Box::new(()));
        let init_result = descriptor.module.init(&mut *instance, &service_handle, arg);
        service.set_instance(instance);

        match init_result {
            Ok(()) => {
                service.init.store(true, Ordering::Release);
                service.release(); // drop the creator's reference (refcount 2 -> 1)
                service.mailbox.publish();
                self.service_count.fetch_add(1, Ordering::AcqRel);
                info!(handle = %handle, module = module_name, "LAUNCH");
                Ok(service)
            }
            Err(err) => {
                self.registry.retire(handle);
                service.mailbox.drain_with(|msg| {
                    self.reply_error(handle, msg.source, msg.session);
                });
                error!(handle = %handle, module = module_name, error = %err, "FAILED launch");
                Err(err)
            }
        }
    }

    /// Deliver an ERROR reply to `dest`, sourced from the drained `target`
    /// handle so the original sender can correlate it back to the service
    /// that went away.
    fn reply_error(self: &Arc<Self>, target: Handle, dest: Handle, session: i64) {
        if let Some(svc) = self.registry.grab(dest) {
            svc.mailbox
                .push(Message::new(target, session, MessageType::Error, Vec::new()));
            svc.release();
        }
    }

    /// §4.4 `context_release`: decrement refcount; on last reference, tear
    /// down the module instance and mark the mailbox released.
    pub fn context_release(&self, service: &Arc<Service>) {
        if service.release() {
            service.set_log_sink(None);
            if let Some(instance) = service.take_instance() {
                service.module.module.release(instance);
            }
            service.mailbox.mark_release();
            self.service_count.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// §4.4 `context_reserve`: retain an extra reference for an
    /// infrastructure service while excluding it from the shutdown-relevant
    /// live count.
    pub fn context_reserve(&self, service: &Arc<Service>) {
        service.retain();
        self.service_count.fetch_sub(1, Ordering::AcqRel);
    }

    /// §4.4 `retire`: remove the registry entry, draining any queued
    /// messages with ERROR replies to their senders.
    pub fn retire(self: &Arc<Self>, handle: Handle) -> bool {
        let Some(service) = self.registry.retire(handle) else {
            return false;
        };
        if let Some(watcher) = service.exit_watcher() {
            self.deliver_exit_notice(handle, watcher);
        }
        service.mailbox.drain_with(|msg| {
            self.reply_error(handle, msg.source, msg.session);
        });
        self.context_release(&service);
        true
    }

    fn deliver_exit_notice(self: &Arc<Self>, target: Handle, watcher: Handle) {
        if let Some(svc) = self.registry.grab(watcher) {
            svc.mailbox.push(Message::new(
                target,
                0,
                MessageType::Client,
                Vec::new(),
            ));
            svc.release();
            self.wake_one();
        }
    }

    pub fn retire_all(self: &Arc<Self>) {
        for service in self.registry.retire_all() {
            let handle = service.handle;
            service.mailbox.drain_with(|msg| {
                self.reply_error(handle, msg.source, msg.session);
            });
            self.context_release(&service);
        }
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("node_id", &self.node_id())
            .field("threads", &self.config.threads)
            .field("live_services", &self.live_service_count())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

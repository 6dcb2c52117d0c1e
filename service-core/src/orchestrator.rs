use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::info;

use crate::config::RuntimeConfig;
use crate::dispatch::dispatch;
use crate::monitor::{self, MONITOR_TICK};
use crate::runtime::Runtime;

/// Timer thread tick (§4.10); also the unit `TIMEOUT` ticks are measured in.
pub const TIMER_TICK: Duration = Duration::from_micros(2500);

/// §4.10: builds the shared [`Runtime`], spawns the worker pool plus the
/// timer, monitor, and socket-stand-in threads, bootstraps the logger then
/// the configured bootstrap module, and blocks until shutdown.
#[derive(Debug)]
pub struct Orchestrator {
    runtime: Arc<Runtime>,
}

impl Orchestrator {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            runtime: Runtime::new(config),
        }
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Register the built-in `logger`/`echo` modules. Split out from `run`
    /// so tests can register additional modules before bootstrapping.
    pub fn register_builtins(&self) {
        crate::builtin::register(&self.runtime.modules);
    }

    /// Run the orchestrator to completion: spawns all threads, launches the
    /// logger and bootstrap services, then blocks until shutdown is
    /// requested (by an `ABORT` command or the live-service count dropping
    /// to zero). Returns an error - and the caller should exit the process
    /// with code 1 - if either bootstrap launch fails (§6 exit contract).
    pub fn run(self) -> anyhow::Result<()> {
        let runtime = self.runtime.clone();

        let worker_handles = self.spawn_workers();
        let timer_handle = self.spawn_timer();
        let monitor_handle = self.spawn_monitor();
        let socket_handle = self.spawn_socket_stub();

        runtime
            .context_new(&runtime.config.logservice.clone(), "")
            .map_err(|e| anyhow::anyhow!("failed to launch logger service: {e}"))?;

        let (bootstrap_module, bootstrap_arg) = runtime.config.bootstrap_parts();
        runtime
            .context_new(bootstrap_module, bootstrap_arg)
            .map_err(|e| anyhow::anyhow!("failed to launch bootstrap service: {e}"))?;

        runtime.wait_for_shutdown();

        for handle in worker_handles {
            let _ = handle.join();
        }
        let _ = timer_handle.join();
        let _ = monitor_handle.join();
        let _ = socket_handle.join();

        info!("orchestrator shut down cleanly");
        Ok(())
    }

    fn spawn_workers(&self) -> Vec<JoinHandle<()>> {
        let weight = self.runtime.config.weight;
        (0..self.runtime.config.threads.max(1))
            .map(|i| {
                let runtime = self.runtime.clone();
                thread::Builder::new()
                    .name(format!("worker-{i}"))
                    .spawn(move || worker_loop(runtime, i, weight))
                    .expect("failed to spawn worker thread")
            })
            .collect()
    }

    fn spawn_timer(&self) -> JoinHandle<()> {
        let runtime = self.runtime.clone();
        thread::Builder::new()
            .name("timer".to_string())
            .spawn(move || timer_loop(runtime))
            .expect("failed to spawn timer thread")
    }

    fn spawn_monitor(&self) -> JoinHandle<()> {
        let runtime = self.runtime.clone();
        thread::Builder::new()
            .name("monitor".to_string())
            .spawn(move || monitor_loop(runtime))
            .expect("failed to spawn monitor thread")
    }

    /// Idle stand-in for the out-of-scope epoll/kqueue socket driver: it
    /// only exists to exercise the wake-one-waiter policy on a timer so
    /// the condvar plumbing behaves the same once real I/O is wired in.
    // TODO: replace with a real epoll/kqueue-driven socket thread.
    fn spawn_socket_stub(&self) -> JoinHandle<()> {
        let runtime = self.runtime.clone();
        thread::Builder::new()
            .name("socket".to_string())
            .spawn(move || {
                while !runtime.is_shutting_down() {
                    if runtime.park_worker(Duration::from_millis(250)) {
                        break;
                    }
                }
            })
            .expect("failed to spawn socket thread")
    }
}

fn worker_loop(runtime: Arc<Runtime>, index: usize, weight: i32) {
    let monitor_slot = &runtime.monitor_slots[index];
    let mut current = None;
    loop {
        if runtime.is_shutting_down() && runtime.run_queue.is_empty() {
            break;
        }
        match dispatch(&runtime, monitor_slot, current.take(), weight) {
            Some(mailbox) => current = Some(mailbox),
            None => {
                if runtime.park_worker(Duration::from_millis(100)) && runtime.run_queue.is_empty()
                {
                    break;
                }
            }
        }
    }
}

fn timer_loop(runtime: Arc<Runtime>) {
    loop {
        if runtime.is_shutting_down() {
            break;
        }
        thread::sleep(TIMER_TICK);
        runtime.fire_due_timeouts();
        runtime.wake_one();

        if runtime.live_service_count() == 0 {
            runtime.begin_shutdown();
            break;
        }
    }
}

fn monitor_loop(runtime: Arc<Runtime>) {
    loop {
        if runtime.is_shutting_down() {
            break;
        }
        if runtime.park_worker(MONITOR_TICK) {
            break;
        }
        monitor::sweep(&runtime);
    }
}

use std::sync::Arc;

use crate::error::{Result, RuntimeError};
use crate::handle::Handle;
use crate::runtime::Runtime;
use crate::service::TrapState;

/// Cooperative interrupt (§4.9): arm the per-service trap via the `0 -> 1`
/// half of the CAS handshake. Returns `true` if this call actually armed
/// it (i.e. the trap was `Idle`).
pub fn interrupt(runtime: &Arc<Runtime>, target: Handle) -> Result<bool> {
    let service = runtime
        .registry
        .grab(target)
        .ok_or(RuntimeError::UnknownHandle(target))?;
    let armed = service.arm_trap();
    service.release();
    Ok(armed)
}

/// Guest-side half: called from within a running message handler to check
/// for and consume an armed trap, running the installed hook if present.
/// Completes the `1 -> -1` transition.
pub fn poll_trap(runtime: &Arc<Runtime>) -> bool {
    let handle = Runtime::current_handle();
    if handle.is_none() {
        return false;
    }
    let Some(service) = runtime.registry.grab(handle) else {
        return false;
    };
    let consumed = service.consume_trap();
    service.release();
    consumed
}

pub fn trap_state(runtime: &Arc<Runtime>, target: Handle) -> Result<TrapState> {
    let service = runtime
        .registry
        .grab(target)
        .ok_or(RuntimeError::UnknownHandle(target))?;
    let state = service.trap_state();
    service.release();
    Ok(state)
}

/// Deliver an out-of-band `SIGNAL` into `target`'s module instance,
/// distinct from the cooperative-interrupt trap above.
pub fn deliver(runtime: &Arc<Runtime>, target: Handle, signal: i32) -> Result<()> {
    let service = runtime
        .registry
        .grab(target)
        .ok_or(RuntimeError::UnknownHandle(target))?;
    let module = service.module.module.clone();
    service.with_instance(|instance| module.signal(instance, signal));
    service.release();
    Ok(())
}

use std::sync::Arc;

use tracing::warn;

use crate::handle::Handle;
use crate::mailbox::Mailbox;
use crate::message::{Message, MessageType};
use crate::monitor::MonitorSlot;
use crate::runtime::Runtime;
use crate::service::Service;

/// Pull a mailbox from the run-queue (or use the one handed in), drain a
/// weight-determined batch of messages through the owning service's
/// callback, and return whichever mailbox the caller should process next.
///
/// Weight semantics (§4.5):
/// - `-1`: process exactly one message then yield (low-latency fairness).
/// - `0`: drain the whole mailbox (throughput).
/// - `k > 0`: process `length >> k`.
pub fn dispatch(
    runtime: &Arc<Runtime>,
    monitor_slot: &MonitorSlot,
    mailbox: Option<Arc<Mailbox>>,
    weight: i32,
) -> Option<Arc<Mailbox>> {
    let mailbox = match mailbox {
        Some(mb) => mb,
        None => runtime.run_queue.pop()?,
    };

    let Some(service) = runtime.registry.grab(mailbox.handle) else {
        // Service was retired between enqueue and dispatch: drain to ERROR
        // replies and let the caller try the next mailbox.
        drain_to_errors(runtime, &mailbox);
        return dispatch(runtime, monitor_slot, None, weight);
    };

    let Some(first) = mailbox.pop() else {
        // Drained to empty on the very first pop: `in_global` is already
        // cleared by `Mailbox::pop`, nothing further to republish.
        service.release();
        return runtime.run_queue.pop();
    };

    let n = batch_size(weight, mailbox.length() + 1);
    report_overload(&mailbox, &mailbox.overload());

    Runtime::set_current_handle(mailbox.handle);
    run_one(monitor_slot, &service, first);
    let mut processed = 1;
    let mut drained = false;

    while processed < n {
        match mailbox.pop() {
            Some(msg) => {
                report_overload(&mailbox, &mailbox.overload());
                run_one(monitor_slot, &service, msg);
                processed += 1;
            }
            None => {
                drained = true;
                break;
            }
        }
    }
    Runtime::set_current_handle(Handle::NONE);
    service.release();

    if drained {
        // `Mailbox::pop` already cleared `in_global` for us.
        return runtime.run_queue.pop();
    }

    // Batch limit reached with work still (potentially) pending: relink the
    // mailbox only if another is ready, so a single busy service does not
    // thrash the run-queue lock when nothing else needs it.
    match runtime.run_queue.pop() {
        Some(next) => {
            runtime.run_queue.push(mailbox);
            Some(next)
        }
        None => Some(mailbox),
    }
}

fn batch_size(weight: i32, length: usize) -> usize {
    match weight {
        w if w < 0 => 1,
        0 => length,
        w => (length >> w).max(1),
    }
}

fn report_overload(mailbox: &Mailbox, overload: &usize) {
    if *overload != 0 {
        warn!(
            handle = %mailbox.handle,
            "may overload, message queue length = {overload}"
        );
    }
}

fn run_one(monitor_slot: &MonitorSlot, service: &Arc<Service>, msg: Message) {
    monitor_slot.trigger(msg.source, service.handle);
    service.begin_dispatch();
    let _took_ownership = service.invoke_callback(msg.ty, msg.session, msg.source, &msg.payload);
    service.end_dispatch();
    monitor_slot.complete();
}

#[cfg(test)]
mod tests {
    use super::batch_size;

    #[test]
    fn negative_weight_is_always_one() {
        assert_eq!(batch_size(-1, 500), 1);
    }

    #[test]
    fn zero_weight_drains_whole_batch() {
        assert_eq!(batch_size(0, 500), 500);
    }

    #[test]
    fn positive_weight_shifts_and_floors_at_one() {
        assert_eq!(batch_size(2, 100), 25);
        assert_eq!(batch_size(4, 3), 1);
    }
}

fn drain_to_errors(runtime: &Arc<Runtime>, mailbox: &Mailbox) {
    mailbox.drain_with(|msg| {
        if let Some(sender) = runtime.registry.grab(msg.source) {
            sender
                .mailbox
                .push(Message::new(mailbox.handle, msg.session, MessageType::Error, Vec::new()));
            sender.release();
        }
    });
}

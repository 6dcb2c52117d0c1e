use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::mailbox::Mailbox;

/// Global FIFO of mailboxes that currently hold work. `Mailbox::in_global`
/// is the admission gate: a mailbox is pushed here at most once per
/// "empty-to-nonempty" transition, so membership here implies (modulo the
/// unlink-then-drain window described on [`Mailbox`]) `in_global == true`.
/// No fairness beyond FIFO is implemented - worker weight provides the
/// tunable fairness/throughput trade-off (§4.5).
pub struct RunQueue {
    queue: Mutex<VecDeque<Arc<Mailbox>>>,
}

impl RunQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, mailbox: Arc<Mailbox>) {
        self.queue.lock().push_back(mailbox);
    }

    pub fn pop(&self) -> Option<Arc<Mailbox>> {
        self.queue.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl Default for RunQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RunQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.queue.try_lock() {
            Some(q) => f.debug_struct("RunQueue").field("len", &q.len()).finish(),
            None => f.debug_struct("RunQueue").field("len", &"<locked>").finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Handle;

    #[test]
    fn fifo_pop_order() {
        let rq = Arc::new(RunQueue::new());
        let a = Mailbox::new_pending(Handle::pack(1, 1), rq.clone());
        let b = Mailbox::new_pending(Handle::pack(1, 2), rq.clone());
        rq.push(a.clone());
        rq.push(b.clone());
        assert_eq!(rq.pop().unwrap().handle, a.handle);
        assert_eq!(rq.pop().unwrap().handle, b.handle);
        assert!(rq.pop().is_none());
    }
}

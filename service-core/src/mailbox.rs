use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::handle::Handle;
use crate::message::Message;
use crate::runqueue::RunQueue;

const INITIAL_OVERLOAD_THRESHOLD: usize = 1024;

struct MailboxState {
    queue: VecDeque<Message>,
    overload_threshold: usize,
    overload: usize,
}

/// Per-service inbox. `in_global` is the single admission gate into the
/// global run-queue: it is not simply "currently linked there". During the
/// window between a worker unlinking this mailbox and finishing its drain,
/// `in_global` stays `true` while the mailbox is unlinked, so a concurrent
/// `push` does not re-enqueue it and race a second worker onto the same
/// service. See the run-queue invariant note in [`crate::runqueue`].
pub struct Mailbox {
    pub handle: Handle,
    run_queue: Arc<RunQueue>,
    state: Mutex<MailboxState>,
    in_global: AtomicBool,
    release: AtomicBool,
}

impl Mailbox {
    /// Construct a mailbox with `in_global` already set so that any `push`
    /// racing with service creation does not enqueue it before `context_new`
    /// is ready to publish it (§4.4 step 4).
    pub fn new_pending(handle: Handle, run_queue: Arc<RunQueue>) -> Arc<Self> {
        Arc::new(Self {
            handle,
            run_queue,
            state: Mutex::new(MailboxState {
                queue: VecDeque::new(),
                overload_threshold: INITIAL_OVERLOAD_THRESHOLD,
                overload: 0,
            }),
            in_global: AtomicBool::new(true),
            release: AtomicBool::new(false),
        })
    }

    /// Publish a pending mailbox onto the global run-queue for the first
    /// time. Called once service `init` has succeeded.
    pub fn publish(self: &Arc<Self>) {
        self.run_queue.push(self.clone());
    }

    pub fn push(self: &Arc<Self>, msg: Message) {
        let mut state = self.state.lock();
        state.queue.push_back(msg);
        drop(state);

        if !self.in_global.swap(true, Ordering::AcqRel) {
            self.run_queue.push(self.clone());
        }
    }

    /// Pop the head message, if any. Returns `None` and clears `in_global`
    /// (resetting the overload threshold) when the mailbox drains to empty
    /// under the same lock acquisition that observed it empty.
    pub fn pop(&self) -> Option<Message> {
        let mut state = self.state.lock();
        match state.queue.pop_front() {
            Some(msg) => {
                let len = state.queue.len();
                while len > state.overload_threshold {
                    state.overload = len;
                    state.overload_threshold *= 2;
                }
                Some(msg)
            }
            None => {
                state.overload_threshold = INITIAL_OVERLOAD_THRESHOLD;
                self.in_global.store(false, Ordering::Release);
                None
            }
        }
    }

    pub fn length(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Read and reset the latched overload counter.
    pub fn overload(&self) -> usize {
        let mut state = self.state.lock();
        std::mem::take(&mut state.overload)
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    pub fn is_released(&self) -> bool {
        self.release.load(Ordering::Acquire)
    }

    /// Mark this mailbox for deferred release. If it is not currently
    /// admitted into the run-queue, push it there so a worker eventually
    /// observes `release` and drains it to nothing.
    pub fn mark_release(self: &Arc<Self>) {
        self.release.store(true, Ordering::Release);
        if !self.in_global.swap(true, Ordering::AcqRel) {
            self.run_queue.push(self.clone());
        }
    }

    /// Drain every queued message, handing each to `on_drop` (used to
    /// report ERROR replies back to senders when a service is retired or
    /// fails to launch).
    pub fn drain_with(&self, mut on_drop: impl FnMut(Message)) {
        let mut state = self.state.lock();
        while let Some(msg) = state.queue.pop_front() {
            drop(state);
            on_drop(msg);
            state = self.state.lock();
        }
        state.overload_threshold = INITIAL_OVERLOAD_THRESHOLD;
        state.overload = 0;
    }
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Mailbox");
        s.field("handle", &self.handle);
        s.field("in_global", &self.in_global.load(Ordering::Relaxed));
        s.field("release", &self.release.load(Ordering::Relaxed));
        match self.state.try_lock() {
            Some(state) => s.field("len", &state.queue.len()).finish(),
            None => s.field("len", &"<locked>").finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;

    fn mailbox() -> Arc<Mailbox> {
        Mailbox::new_pending(Handle::pack(1, 1), Arc::new(RunQueue::new()))
    }

    #[test]
    fn pop_empty_resets_in_global() {
        let mb = mailbox();
        mb.in_global.store(false, Ordering::Relaxed);
        assert!(mb.pop().is_none());
        assert!(!mb.in_global.load(Ordering::Relaxed));
    }

    #[test]
    fn push_enqueues_once() {
        let mb = mailbox();
        mb.in_global.store(false, Ordering::Relaxed);
        mb.push(Message::new(Handle::NONE, 0, MessageType::Text, vec![1]));
        assert_eq!(mb.run_queue.len(), 1);
        mb.push(Message::new(Handle::NONE, 0, MessageType::Text, vec![2]));
        // in_global already true: second push must not enqueue again.
        assert_eq!(mb.run_queue.len(), 1);
    }

    #[test]
    fn overload_latches_and_doubles() {
        let mb = mailbox();
        // Push past the first threshold, drain one: overload latches the
        // queue length at that pop and the threshold jumps to 2048, so a
        // second crossing needs the queue to grow again past 2048.
        for i in 0..1026u32 {
            mb.push(Message::new(Handle::NONE, 0, MessageType::Text, i.to_le_bytes().to_vec()));
        }
        mb.pop();
        assert_eq!(mb.overload(), 1025);

        for i in 0..1200u32 {
            mb.push(Message::new(Handle::NONE, 0, MessageType::Text, i.to_le_bytes().to_vec()));
        }
        mb.pop();
        assert_eq!(mb.overload(), 2224);

        // Draining the rest never crosses 4096: no further events.
        while mb.pop().is_some() {
            assert_eq!(mb.overload(), 0);
        }
    }

    #[test]
    fn fifo_order_preserved() {
        let mb = mailbox();
        for i in 0..5u8 {
            mb.push(Message::new(Handle::NONE, 0, MessageType::Text, vec![i]));
        }
        for i in 0..5u8 {
            assert_eq!(mb.pop().unwrap().payload.as_ref(), &[i]);
        }
        assert!(mb.pop().is_none());
    }
}

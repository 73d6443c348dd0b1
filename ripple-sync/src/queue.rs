//! The oplog queue adapter.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use ripple_core::{Member, OpTime, OplogEntry};

/// Facade over the upstream fetcher's queue.
///
/// The fetcher is the source of truth for order; the adapter adds none.
/// `peek`/`consume` are the non-blocking pair the batch assembler drives;
/// `consume` removes the entry the caller just peeked.
pub trait OplogSource: Send + Sync {
    /// Returns the head of the queue without removing it.
    fn peek(&self) -> Option<OplogEntry>;

    /// Removes the head. The caller must have peeked it.
    fn consume(&self);

    /// Waits up to `wait` for an entry to become available. Returns true
    /// if one is. Returns early on shutdown.
    fn blocking_peek(&self, wait: Duration) -> bool;

    /// Tells the fetcher how far this node has applied, so it can forward
    /// acknowledgements upstream.
    fn notify(&self, applied: OpTime);

    /// The member this node is currently syncing from, if any.
    fn sync_target(&self) -> Option<Member>;
}

struct BufferState {
    queue: VecDeque<OplogEntry>,
    last_notified: OpTime,
    sync_target: Option<Member>,
}

/// In-process oplog queue: the upstream fetcher pushes entries in, the
/// batch assembler peeks and consumes them. Also the feed used by tests.
#[derive(Clone)]
pub struct QueueBuffer {
    state: Arc<Mutex<BufferState>>,
    available: Arc<Condvar>,
    shutdown: Arc<AtomicBool>,
}

impl Default for QueueBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueBuffer {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BufferState {
                queue: VecDeque::new(),
                last_notified: OpTime::NULL,
                sync_target: None,
            })),
            available: Arc::new(Condvar::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Appends one fetched entry.
    ///
    /// # Panics
    /// Panics if the queue lock is poisoned.
    pub fn push(&self, entry: OplogEntry) {
        let mut state = self.state.lock().expect("queue poisoned");
        state.queue.push_back(entry);
        self.available.notify_all();
    }

    /// Appends a run of fetched entries.
    pub fn push_all(&self, entries: impl IntoIterator<Item = OplogEntry>) {
        for entry in entries {
            self.push(entry);
        }
    }

    /// Installs the member this queue is fed from.
    ///
    /// # Panics
    /// Panics if the queue lock is poisoned.
    pub fn set_sync_target(&self, target: Option<Member>) {
        self.state.lock().expect("queue poisoned").sync_target = target;
    }

    /// The applied position most recently reported by the applier.
    ///
    /// # Panics
    /// Panics if the queue lock is poisoned.
    #[must_use]
    pub fn last_notified(&self) -> OpTime {
        self.state.lock().expect("queue poisoned").last_notified
    }

    /// Entries still queued.
    ///
    /// # Panics
    /// Panics if the queue lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().expect("queue poisoned").queue.len()
    }

    /// True if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wakes any blocked peek; subsequent blocking peeks return
    /// immediately.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.available.notify_all();
    }
}

impl OplogSource for QueueBuffer {
    fn peek(&self) -> Option<OplogEntry> {
        self.state.lock().expect("queue poisoned").queue.front().cloned()
    }

    fn consume(&self) {
        let popped = self.state.lock().expect("queue poisoned").queue.pop_front();
        assert!(popped.is_some(), "consume without a successful peek");
    }

    fn blocking_peek(&self, wait: Duration) -> bool {
        let mut state = self.state.lock().expect("queue poisoned");
        if !state.queue.is_empty() {
            return true;
        }
        if self.shutdown.load(Ordering::SeqCst) {
            return false;
        }
        let (state, _timeout) = self
            .available
            .wait_timeout(state, wait)
            .expect("queue poisoned");
        !state.queue.is_empty()
    }

    fn notify(&self, applied: OpTime) {
        let mut state = self.state.lock().expect("queue poisoned");
        if applied > state.last_notified {
            state.last_notified = applied;
        }
    }

    fn sync_target(&self) -> Option<Member> {
        self.state.lock().expect("queue poisoned").sync_target.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(secs: u32) -> OplogEntry {
        OplogEntry::noop(OpTime::new(secs, 0))
    }

    #[test]
    fn test_peek_does_not_remove() {
        let queue = QueueBuffer::new();
        queue.push(noop(1));

        assert_eq!(queue.peek().unwrap().ts, OpTime::new(1, 0));
        assert_eq!(queue.peek().unwrap().ts, OpTime::new(1, 0));
        assert_eq!(queue.len(), 1);

        queue.consume();
        assert!(queue.peek().is_none());
    }

    #[test]
    #[should_panic(expected = "consume without a successful peek")]
    fn test_consume_empty_panics() {
        QueueBuffer::new().consume();
    }

    #[test]
    fn test_blocking_peek_times_out() {
        let queue = QueueBuffer::new();
        assert!(!queue.blocking_peek(Duration::from_millis(5)));
    }

    #[test]
    fn test_blocking_peek_wakes_on_push() {
        let queue = QueueBuffer::new();
        let waiter = queue.clone();
        let handle = std::thread::spawn(move || waiter.blocking_peek(Duration::from_secs(5)));

        std::thread::sleep(Duration::from_millis(10));
        queue.push(noop(1));
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_blocking_peek_returns_on_shutdown() {
        let queue = QueueBuffer::new();
        let waiter = queue.clone();
        let handle = std::thread::spawn(move || waiter.blocking_peek(Duration::from_secs(5)));

        std::thread::sleep(Duration::from_millis(10));
        queue.shutdown();
        assert!(!handle.join().unwrap());
    }

    #[test]
    fn test_notify_is_monotonic() {
        let queue = QueueBuffer::new();
        queue.notify(OpTime::new(5, 0));
        queue.notify(OpTime::new(3, 0));
        assert_eq!(queue.last_notified(), OpTime::new(5, 0));
    }
}

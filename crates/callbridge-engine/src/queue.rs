//! Blocking completion queue.
//!
//! The native side posts `(tag, success)` pairs; worker threads block in
//! [`NativeQueue::next`] until one is available. After
//! [`NativeQueue::shutdown`] the queue still hands out every event posted
//! before the shutdown, then reports [`QueueEvent::Shutdown`] forever.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Opaque identifier correlating one native completion with its waiting batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(u64);

impl Tag {
    /// Creates a tag from a ticket number.
    #[must_use]
    pub const fn new(ticket: u64) -> Self {
        Self(ticket)
    }

    /// Returns the ticket number.
    #[must_use]
    pub const fn ticket(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tag#{}", self.0)
    }
}

/// Result of polling the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEvent {
    /// An operation finished.
    Op {
        /// Tag of the finished operation.
        tag: Tag,
        /// `false` when the operation was cancelled or failed.
        success: bool,
    },
    /// The timeout elapsed with nothing to report.
    Timeout,
    /// The queue was shut down and fully drained.
    Shutdown,
}

#[derive(Debug, Default)]
struct QueueState {
    events: VecDeque<(Tag, bool)>,
    shutdown: bool,
}

/// Blocking completion queue shared by the native engine and worker threads.
#[derive(Debug, Default)]
pub struct NativeQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl NativeQueue {
    /// Creates an empty, open queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Posts a completion. Returns `false` if the queue is already shut down.
    pub fn post(&self, tag: Tag, success: bool) -> bool {
        let mut state = self.state.lock();
        if state.shutdown {
            tracing::warn!(%tag, success, "Completion posted after queue shutdown, dropped");
            return false;
        }
        state.events.push_back((tag, success));
        drop(state);
        self.ready.notify_one();
        true
    }

    /// Blocks until an event is available, the queue is shut down and empty,
    /// or `timeout` elapses. `None` waits indefinitely.
    pub fn next(&self, timeout: Option<Duration>) -> QueueEvent {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut state = self.state.lock();
        loop {
            if let Some((tag, success)) = state.events.pop_front() {
                return QueueEvent::Op { tag, success };
            }
            if state.shutdown {
                return QueueEvent::Shutdown;
            }
            match deadline {
                None => self.ready.wait(&mut state),
                Some(deadline) => {
                    if self.ready.wait_until(&mut state, deadline).timed_out() {
                        return match state.events.pop_front() {
                            Some((tag, success)) => QueueEvent::Op { tag, success },
                            None if state.shutdown => QueueEvent::Shutdown,
                            None => QueueEvent::Timeout,
                        };
                    }
                }
            }
        }
    }

    /// Returns the next event without blocking.
    pub fn try_next(&self) -> QueueEvent {
        self.next(Some(Duration::ZERO))
    }

    /// Shuts the queue down and wakes every blocked worker.
    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.ready.notify_all();
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) was called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Number of events waiting to be polled.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    /// Returns `true` if no events are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_post_then_next() {
        let queue = NativeQueue::new();
        assert!(queue.post(Tag::new(1), true));
        assert!(queue.post(Tag::new(2), false));
        assert_eq!(queue.len(), 2);

        assert_eq!(
            queue.try_next(),
            QueueEvent::Op { tag: Tag::new(1), success: true }
        );
        assert_eq!(
            queue.try_next(),
            QueueEvent::Op { tag: Tag::new(2), success: false }
        );
        assert_eq!(queue.try_next(), QueueEvent::Timeout);
    }

    #[test]
    fn test_next_times_out() {
        let queue = NativeQueue::new();
        let started = Instant::now();
        assert_eq!(queue.next(Some(Duration::from_millis(20))), QueueEvent::Timeout);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_shutdown_drains_then_reports_shutdown() {
        let queue = NativeQueue::new();
        queue.post(Tag::new(7), true);
        queue.shutdown();

        assert!(!queue.post(Tag::new(8), true));
        assert_eq!(
            queue.next(None),
            QueueEvent::Op { tag: Tag::new(7), success: true }
        );
        assert_eq!(queue.next(None), QueueEvent::Shutdown);
        assert_eq!(queue.next(None), QueueEvent::Shutdown);
    }

    #[test]
    fn test_blocked_worker_wakes_on_post() {
        let queue = Arc::new(NativeQueue::new());
        let worker_queue = Arc::clone(&queue);
        let worker = thread::spawn(move || worker_queue.next(Some(Duration::from_secs(5))));

        thread::sleep(Duration::from_millis(10));
        queue.post(Tag::new(3), true);

        assert_eq!(
            worker.join().unwrap(),
            QueueEvent::Op { tag: Tag::new(3), success: true }
        );
    }

    #[test]
    fn test_blocked_workers_wake_on_shutdown() {
        let queue = Arc::new(NativeQueue::new());
        let workers: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.next(None))
            })
            .collect();

        thread::sleep(Duration::from_millis(10));
        queue.shutdown();

        for worker in workers {
            assert_eq!(worker.join().unwrap(), QueueEvent::Shutdown);
        }
    }

    #[test]
    fn test_tag_display() {
        assert_eq!(Tag::new(42).to_string(), "tag#42");
        assert_eq!(Tag::new(42).ticket(), 42);
    }
}

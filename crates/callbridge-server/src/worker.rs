//! Completion queue worker threads.
//!
//! Workers are the only threads allowed to block. Each one waits in
//! [`NativeQueue::next`] and forwards every completion to the host over an
//! unbounded channel; dispatch itself always happens on the host.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use callbridge_engine::{NativeQueue, QueueEvent, Tag};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{ServerError, ServerResult};

/// A completion forwarded from a worker.
pub(crate) type Completion = (Tag, bool);

#[derive(Debug)]
pub(crate) struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `count` workers polling `native`.
    ///
    /// If any spawn fails, `native` is shut down and the workers already
    /// started are joined before the error is returned.
    pub(crate) fn spawn(
        count: usize,
        native: &Arc<NativeQueue>,
        poll_interval: Duration,
        sender: &UnboundedSender<Completion>,
    ) -> ServerResult<Self> {
        let mut pool = Self {
            handles: Vec::with_capacity(count),
        };
        for index in 0..count {
            let queue = Arc::clone(native);
            let sender = sender.clone();
            let spawned = thread::Builder::new()
                .name(format!("callbridge-cq-{index}"))
                .spawn(move || worker_loop(index, &queue, poll_interval, &sender));
            match spawned {
                Ok(handle) => pool.handles.push(handle),
                Err(e) => {
                    native.shutdown();
                    pool.join();
                    return Err(ServerError::WorkerSpawn {
                        message: e.to_string(),
                    });
                }
            }
        }
        tracing::debug!(
            workers = count,
            poll_interval_ms = u64::try_from(poll_interval.as_millis()).unwrap_or(u64::MAX),
            "Completion workers started"
        );
        Ok(pool)
    }

    /// Number of worker threads.
    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    /// Waits for every worker to exit. The native queue must already be shut down.
    pub(crate) fn join(&mut self) {
        for handle in self.handles.drain(..) {
            let name = handle.thread().name().unwrap_or("callbridge-cq").to_string();
            if handle.join().is_err() {
                tracing::error!(worker = %name, "Completion worker panicked");
            }
        }
    }
}

fn worker_loop(
    index: usize,
    native: &NativeQueue,
    poll_interval: Duration,
    sender: &UnboundedSender<Completion>,
) {
    loop {
        match native.next(Some(poll_interval)) {
            QueueEvent::Op { tag, success } => {
                if sender.send((tag, success)).is_err() {
                    tracing::debug!(worker = index, %tag, "Host receiver gone, worker exiting");
                    return;
                }
            }
            QueueEvent::Timeout => {
                if sender.is_closed() {
                    return;
                }
            }
            QueueEvent::Shutdown => {
                tracing::trace!(worker = index, "Native queue drained, worker exiting");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_workers_forward_completions() {
        let native = Arc::new(NativeQueue::new());
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let mut pool = WorkerPool::spawn(2, &native, Duration::from_millis(10), &sender).unwrap();
        assert_eq!(pool.len(), 2);

        native.post(Tag::new(1), true);
        native.post(Tag::new(2), false);
        native.shutdown();
        pool.join();

        let mut received = Vec::new();
        while let Ok(completion) = receiver.try_recv() {
            received.push(completion);
        }
        received.sort();
        assert_eq!(received, vec![(Tag::new(1), true), (Tag::new(2), false)]);
    }

    #[test]
    fn test_workers_exit_when_receiver_dropped() {
        let native = Arc::new(NativeQueue::new());
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut pool = WorkerPool::spawn(1, &native, Duration::from_millis(5), &sender).unwrap();

        drop(sender);
        drop(receiver);
        // Exits on the next poll timeout without the queue being shut down.
        pool.join();
        assert_eq!(pool.len(), 0);
        assert!(!native.is_shutdown());
    }
}

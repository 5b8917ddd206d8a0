//! The bounded task queue described in §4.3.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::prelude::*;

/// A sentinel sent through the queue to tell a worker to exit, instead of
/// processing another object. See §4.4 "Cancellation".
#[derive(Clone, Debug)]
pub enum QueueEntry {
    /// An object name awaiting pipeline processing.
    Task(Task),
    /// Tells the receiving worker to stop after finishing its current work.
    Shutdown,
}

/// A bounded FIFO of [`Task`]s, with a strictly-increasing counter of
/// refused enqueue attempts (§8 invariant 4).
pub struct TaskQueue {
    sender: mpsc::Sender<QueueEntry>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<QueueEntry>>,
    capacity: usize,
    full_events: AtomicU64,
}

impl TaskQueue {
    /// Create a queue with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        TaskQueue {
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            capacity,
            full_events: AtomicU64::new(0),
        }
    }

    /// The configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// How many times an enqueue attempt has been refused because the queue
    /// was full.
    pub fn full_event_count(&self) -> u64 {
        self.full_events.load(Ordering::SeqCst)
    }

    /// Attempt to enqueue `task` without blocking. Returns `Ok(true)` if
    /// enqueued, `Ok(false)` if the queue was full (the caller should leave
    /// the object where it lies and retry on the next scan, per §4.2).
    #[instrument(skip(self), level = "debug")]
    pub fn try_enqueue(&self, task: Task) -> bool {
        match self.sender.try_send(QueueEntry::Task(task)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.full_events.fetch_add(1, Ordering::SeqCst);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Send one shutdown sentinel per worker. Used by the pool's drain path.
    #[instrument(skip(self), level = "debug")]
    pub async fn enqueue_shutdown(&self, count: usize) {
        for _ in 0..count {
            // Shutdown sentinels must never be refused, so this uses the
            // blocking send rather than `try_enqueue`.
            if self.sender.send(QueueEntry::Shutdown).await.is_err() {
                break;
            }
        }
    }

    /// Receive the next entry. Returns `None` if the queue has been closed
    /// and drained.
    #[instrument(skip(self), level = "trace")]
    pub async fn recv(&self) -> Option<QueueEntry> {
        self.receiver.lock().await.recv().await
    }

    /// A fresh sender handle, for producers other than the watcher (e.g. the
    /// recovery pass).
    pub fn sender(&self) -> mpsc::Sender<QueueEntry> {
        self.sender.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_and_receive() {
        let queue = TaskQueue::new(2);
        assert!(queue.try_enqueue(Task::new("a.mp3")));
        match queue.recv().await.unwrap() {
            QueueEntry::Task(t) => assert_eq!(t.name, "a.mp3"),
            QueueEntry::Shutdown => panic!("expected task"),
        }
    }

    #[tokio::test]
    async fn refusal_increments_full_event_counter() {
        let queue = TaskQueue::new(1);
        assert!(queue.try_enqueue(Task::new("a.mp3")));
        assert!(!queue.try_enqueue(Task::new("b.mp3")));
        assert_eq!(queue.full_event_count(), 1);
        assert!(!queue.try_enqueue(Task::new("c.mp3")));
        assert_eq!(queue.full_event_count(), 2);
    }

    #[tokio::test]
    async fn shutdown_sentinels_are_delivered() {
        let queue = TaskQueue::new(4);
        queue.enqueue_shutdown(2).await;
        for _ in 0..2 {
            match queue.recv().await.unwrap() {
                QueueEntry::Shutdown => {}
                QueueEntry::Task(_) => panic!("expected shutdown"),
            }
        }
    }
}

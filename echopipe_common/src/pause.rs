//! The cooperative pause gate shared by the Watcher and the Worker Pool.
//!
//! Pausing never interrupts in-flight I/O (§5 "Cancellation & timeouts"); it
//! only blocks a task before its *next* suspension point.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// A gate that, while paused, blocks any caller of [`PauseGate::wait_if_paused`]
/// until [`PauseGate::resume`] is called.
#[derive(Default)]
pub struct PauseGate {
    paused: AtomicBool,
    notify: Notify,
}

impl PauseGate {
    /// Create a new, initially-running gate.
    pub fn new() -> Self {
        PauseGate {
            paused: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Set the gate to paused. Callers already blocked in `wait_if_paused`
    /// stay blocked; new and repeated calls will block too.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Clear the paused flag and wake every task blocked on the gate.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Whether the gate is currently paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Block until the gate is not paused. A no-op if it's already running.
    pub async fn wait_if_paused(&self) {
        loop {
            let notified = self.notify.notified();
            if !self.is_paused() {
                return;
            }
            tokio::pin!(notified);
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_returns_immediately_when_running() {
        let gate = PauseGate::new();
        tokio::time::timeout(Duration::from_millis(50), gate.wait_if_paused())
            .await
            .expect("should not block");
    }

    #[tokio::test]
    async fn resume_wakes_waiters() {
        let gate = Arc::new(PauseGate::new());
        gate.pause();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.wait_if_paused().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        gate.resume();
        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("waiter should finish after resume")
            .unwrap();
    }
}

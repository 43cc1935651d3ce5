//! The per-child cancellation context: the in-process stand-in for a child's
//! Unix signal handlers and the raise-window guard that gates them. A
//! fork-based, real-signal implementation checks a single-valued flag inside
//! a signal handler before raising; here the same check happens inside an
//! `.await` point instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

/// Which suspension point may currently be interrupted. `None` means neither a
/// warm-shutdown request nor a task interrupt may land right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaiseWindow {
    None,
    Worker,
    Task,
}

pub struct ChildGate {
    window: Mutex<RaiseWindow>,
    warm_requested: AtomicBool,
    task_requested: AtomicBool,
    wake: Notify,
    terminated: AtomicBool,
}

impl Default for ChildGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ChildGate {
    pub fn new() -> Self {
        Self {
            window: Mutex::new(RaiseWindow::None),
            warm_requested: AtomicBool::new(false),
            task_requested: AtomicBool::new(false),
            wake: Notify::new(),
            terminated: AtomicBool::new(false),
        }
    }

    pub fn set_window(&self, window: RaiseWindow) {
        *self.window.lock().unwrap() = window;
        self.wake.notify_waiters();
    }

    fn window(&self) -> RaiseWindow {
        *self.window.lock().unwrap()
    }

    /// Requests a warm shutdown of this child. Level-triggered: takes effect
    /// whenever the window next reads `Worker`, not only at the instant of the
    /// call (the window may be `None` or `Task` right now).
    pub fn request_warm_shutdown(&self) {
        self.warm_requested.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    /// Requests an interrupt of the task currently running in this child.
    /// Takes effect only while the window reads `Task`; a one-shot request
    /// that is dropped if the task has already finished.
    pub fn request_task_interrupt(&self) {
        self.task_requested.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    /// Resolves once a warm-shutdown request is pending while the window is
    /// `Worker`. Never resolves otherwise; callers race this against the
    /// operation it should interrupt.
    pub async fn warm_shutdown_requested(&self) {
        loop {
            let notified = self.wake.notified();
            if self.warm_requested.load(Ordering::SeqCst) && self.window() == RaiseWindow::Worker {
                return;
            }
            notified.await;
        }
    }

    pub async fn task_interrupt_requested(&self) {
        loop {
            let notified = self.wake.notified();
            if self.task_requested.load(Ordering::SeqCst) && self.window() == RaiseWindow::Task {
                self.task_requested.store(false, Ordering::SeqCst);
                return;
            }
            notified.await;
        }
    }

    pub fn set_terminated(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn warm_shutdown_only_lands_in_worker_window() {
        let gate = Arc::new(ChildGate::new());
        gate.set_window(RaiseWindow::Task);
        gate.request_warm_shutdown();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                gate.warm_shutdown_requested().await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.set_window(RaiseWindow::Worker);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("shutdown request should land once window is Worker")
            .unwrap();
    }

    #[tokio::test]
    async fn task_interrupt_is_one_shot() {
        let gate = ChildGate::new();
        gate.set_window(RaiseWindow::Task);
        gate.request_task_interrupt();
        gate.task_interrupt_requested().await;
        assert!(!gate.task_requested.load(Ordering::SeqCst));
    }
}

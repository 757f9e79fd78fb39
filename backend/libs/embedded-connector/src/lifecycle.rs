//! Run state and completion tracking shared between the run loop and the
//! handles that control it.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    /// Never started
    Idle = 0,
    /// Run loop active
    Running = 1,
    /// Stop requested, loop finishing its current batch
    Stopping = 2,
    /// Run loop exited; may be started again
    Stopped = 3,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RunState::Running,
            2 => RunState::Stopping,
            3 => RunState::Stopped,
            _ => RunState::Idle,
        }
    }
}

/// Reusable countdown barrier: zero means nothing is running.
///
/// Unlike a one-shot latch it can count back up, so one connector instance can
/// be run, stopped, and run again.
#[derive(Debug)]
pub struct CompletionLatch {
    count: watch::Sender<usize>,
}

impl CompletionLatch {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self { count }
    }

    pub fn count_up(&self) {
        self.count.send_modify(|c| *c += 1);
    }

    pub fn count_down(&self) {
        self.count.send_modify(|c| *c = c.saturating_sub(1));
    }

    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    /// Wait until the count reaches zero. Returns `false` if `timeout` elapsed first.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let mut rx = self.count.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|c| *c == 0))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }
}

impl Default for CompletionLatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle state of one embedded connector.
///
/// Shared through an `Arc` by the run loop and every control handle. All
/// transitions are compare-and-set, so no external locking is needed.
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
    latch: CompletionLatch,
    interrupt: watch::Sender<bool>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (interrupt, _) = watch::channel(false);
        Self {
            state: AtomicU8::new(RunState::Idle as u8),
            latch: CompletionLatch::new(),
            interrupt,
        }
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }

    /// Claim the single execution slot.
    ///
    /// Succeeds only from `Idle` or `Stopped`; on success the completion latch
    /// is counted up before returning.
    pub fn try_start(&self) -> bool {
        for from in [RunState::Idle, RunState::Stopped] {
            if self
                .state
                .compare_exchange(
                    from as u8,
                    RunState::Running as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.latch.count_up();
                return true;
            }
        }
        false
    }

    /// Ask a running loop to stop after its current batch.
    ///
    /// Returns whether the loop was running. Does not wait for it to exit.
    pub fn stop(&self) -> bool {
        self.state
            .compare_exchange(
                RunState::Running as u8,
                RunState::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Mark the run as finished. Called exactly once per accepted `try_start`.
    pub fn finish(&self) {
        self.clear_interrupt();
        self.state.store(RunState::Stopped as u8, Ordering::Release);
        self.latch.count_down();
    }

    /// Wait for the current run to complete.
    ///
    /// Returns `true` immediately when nothing is running. If the connector is
    /// stopped and restarted while waiting, this returns when the later run ends.
    pub async fn await_completion(&self, timeout: Duration) -> bool {
        self.latch.wait(timeout).await
    }

    /// Force the current poll or flush wait to give up.
    ///
    /// Returns whether a run was active to receive the interrupt.
    pub fn interrupt(&self) -> bool {
        if self.latch.count() == 0 {
            return false;
        }
        self.interrupt.send_replace(true);
        true
    }

    pub fn is_interrupted(&self) -> bool {
        *self.interrupt.borrow()
    }

    /// Reset the interrupt flag, returning whether it was set.
    pub fn clear_interrupt(&self) -> bool {
        self.interrupt.send_replace(false)
    }

    /// Resolves once an interrupt is raised.
    pub async fn interrupted(&self) {
        let mut rx = self.interrupt.subscribe();
        // the sender lives in `self`, so the channel cannot close here
        let _ = rx.wait_for(|flag| *flag).await;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_single_start() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), RunState::Idle);
        assert!(lifecycle.try_start());
        assert!(!lifecycle.try_start());
        assert_eq!(lifecycle.state(), RunState::Running);
    }

    #[test]
    fn test_concurrent_starts_admit_one() {
        let lifecycle = Arc::new(Lifecycle::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lifecycle = lifecycle.clone();
                std::thread::spawn(move || lifecycle.try_start())
            })
            .collect();

        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|started| *started)
            .count();
        assert_eq!(accepted, 1);
    }

    #[test]
    fn test_stop_reports_previous_state() {
        let lifecycle = Lifecycle::new();
        assert!(!lifecycle.stop());

        lifecycle.try_start();
        assert!(lifecycle.stop());
        assert_eq!(lifecycle.state(), RunState::Stopping);
        assert!(!lifecycle.stop());

        // a stopping run cannot be restarted until it finishes
        assert!(!lifecycle.try_start());
        lifecycle.finish();
        assert_eq!(lifecycle.state(), RunState::Stopped);
        assert!(lifecycle.try_start());
    }

    #[tokio::test]
    async fn test_await_when_idle_returns_immediately() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.await_completion(Duration::from_millis(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_times_out_while_running() {
        let lifecycle = Lifecycle::new();
        lifecycle.try_start();
        assert!(!lifecycle.await_completion(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_await_observes_finish() {
        let lifecycle = Arc::new(Lifecycle::new());
        lifecycle.try_start();

        let waiter = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.await_completion(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        lifecycle.finish();

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_interrupt_only_while_running() {
        let lifecycle = Lifecycle::new();
        assert!(!lifecycle.interrupt());
        assert!(!lifecycle.is_interrupted());

        lifecycle.try_start();
        assert!(lifecycle.interrupt());
        lifecycle.interrupted().await;
        assert!(lifecycle.clear_interrupt());
        assert!(!lifecycle.is_interrupted());

        lifecycle.interrupt();
        lifecycle.finish();
        assert!(!lifecycle.is_interrupted());
    }

    #[test]
    fn test_interrupted_wakes_pending_waiter() {
        let lifecycle = Lifecycle::new();
        lifecycle.try_start();

        let mut waiter = tokio_test::task::spawn(lifecycle.interrupted());
        tokio_test::assert_pending!(waiter.poll());

        lifecycle.interrupt();
        assert!(waiter.is_woken());
        tokio_test::assert_ready!(waiter.poll());
    }
}

// ── Operation status ──
//
// Tri-state progress for user-facing mutations: `Loading` while running,
// then `Success` or `Error`, which clears back to `Idle` after a fixed
// display time.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;

use crate::error::CoreError;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OperationStatus {
    #[default]
    Idle,
    Loading,
    Success,
    Error(String),
}

impl OperationStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Success | Self::Error(_))
    }
}

/// Tracks one operation at a time. Clones share state.
#[derive(Debug, Clone)]
pub struct StatusTracker {
    state: Arc<watch::Sender<OperationStatus>>,
    /// Bumped on every start so a stale dismiss timer cannot clear a
    /// newer result.
    generation: Arc<AtomicU64>,
    dismiss_after: Duration,
}

impl StatusTracker {
    pub fn new(dismiss_after: Duration) -> Self {
        let (state, _) = watch::channel(OperationStatus::Idle);
        Self {
            state: Arc::new(state),
            generation: Arc::new(AtomicU64::new(0)),
            dismiss_after,
        }
    }

    pub fn current(&self) -> OperationStatus {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<OperationStatus> {
        self.state.subscribe()
    }

    /// Run `operation`, reporting its progress.
    pub async fn track<T, F>(&self, operation: F) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, CoreError>>,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_replace(OperationStatus::Loading);

        let result = operation.await;
        let finished = match &result {
            Ok(_) => OperationStatus::Success,
            Err(e) => OperationStatus::Error(e.to_string()),
        };
        self.state.send_replace(finished);
        self.schedule_dismiss(generation);
        result
    }

    fn schedule_dismiss(&self, generation: u64) {
        let state = Arc::clone(&self.state);
        let current = Arc::clone(&self.generation);
        let after = self.dismiss_after;
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if current.load(Ordering::SeqCst) == generation {
                state.send_if_modified(|status| {
                    if status.is_finished() {
                        *status = OperationStatus::Idle;
                        true
                    } else {
                        false
                    }
                });
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn success_shows_then_clears() {
        let tracker = StatusTracker::new(Duration::from_secs(2));
        let value = tracker.track(async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(tracker.current(), OperationStatus::Success);

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(tracker.current(), OperationStatus::Success);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(tracker.current(), OperationStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn error_carries_message() {
        let tracker = StatusTracker::new(Duration::from_secs(2));
        let result: Result<(), _> = tracker.track(async { Err(CoreError::InvalidInvite) }).await;
        assert!(result.is_err());
        assert_eq!(
            tracker.current(),
            OperationStatus::Error("Invalid invite code".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timer_does_not_clear_newer_result() {
        let tracker = StatusTracker::new(Duration::from_secs(2));
        tracker.track(async { Ok(()) }).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let _ = tracker
            .track(async { Err::<(), _>(CoreError::Timeout) })
            .await;

        // First timer fires here but belongs to the older run.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(matches!(tracker.current(), OperationStatus::Error(_)));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(tracker.current(), OperationStatus::Idle);
    }
}

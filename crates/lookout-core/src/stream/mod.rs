// ── Reactive subscriptions ──
//
// Every live view the core hands out is a `Subscription<T>`: the latest
// full snapshot plus change notification. Dropping the last clone tears
// down whatever listeners and tasks back it.

mod join;
mod merge;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use lookout_api::Feed;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::{CancellationToken, DropGuard};

pub(crate) use join::switch_map;
pub(crate) use merge::{combine2, in_chunks, merge_feeds};

/// A live view of `T`.
///
/// Provides point-in-time access and change notification via
/// [`changed()`](Self::changed) or by converting into a `Stream`.
/// Clones share the same backing listener.
pub struct Subscription<T: Send + Sync + 'static> {
    current: Arc<T>,
    receiver: watch::Receiver<Arc<T>>,
    guard: Option<Arc<DropGuard>>,
}

impl<T: Send + Sync + 'static> Clone for Subscription<T> {
    fn clone(&self) -> Self {
        Self {
            current: Arc::clone(&self.current),
            receiver: self.receiver.clone(),
            guard: self.guard.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("live", &self.guard.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> Subscription<T> {
    pub(crate) fn new(receiver: watch::Receiver<Arc<T>>, guard: DropGuard) -> Self {
        let current = receiver.borrow().clone();
        Self {
            current,
            receiver,
            guard: Some(Arc::new(guard)),
        }
    }

    /// A view that never changes. Unsubscribing is a no-op.
    pub fn constant(value: T) -> Self {
        let (_tx, receiver) = watch::channel(Arc::new(value));
        let current = receiver.borrow().clone();
        Self {
            current,
            receiver,
            guard: None,
        }
    }

    /// The snapshot as of creation or the last [`changed()`](Self::changed).
    pub fn current(&self) -> &Arc<T> {
        &self.current
    }

    /// The latest snapshot (may be newer than `current`).
    pub fn latest(&self) -> Arc<T> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change, returning the new snapshot.
    /// Returns `None` once the view has shut down.
    pub async fn changed(&mut self) -> Option<Arc<T>> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = Arc::clone(&snap);
        Some(snap)
    }

    /// Wait until a snapshot satisfies `predicate` (checking the latest
    /// one first). Returns `None` if the view shuts down first.
    pub async fn wait_for(&mut self, mut predicate: impl FnMut(&T) -> bool) -> Option<Arc<T>> {
        let snap = self.receiver.wait_for(|v| predicate(v)).await.ok()?.clone();
        self.current = Arc::clone(&snap);
        Some(snap)
    }

    /// Stop listening. Equivalent to dropping this handle; the backing
    /// listener stops once every clone is gone.
    pub fn unsubscribe(self) {}

    /// Convert into a `Stream` yielding the current snapshot first, then
    /// every change. The stream keeps the listener alive.
    pub fn into_stream(self) -> SubscriptionStream<T> {
        SubscriptionStream {
            inner: WatchStream::new(self.receiver),
            _guard: self.guard,
        }
    }

    /// Stream of changes only, without the current snapshot.
    pub(crate) fn into_changes(self) -> SubscriptionStream<T> {
        SubscriptionStream {
            inner: WatchStream::from_changes(self.receiver),
            _guard: self.guard,
        }
    }
}

/// `Stream` adapter over a [`Subscription`].
pub struct SubscriptionStream<T: Send + Sync + 'static> {
    inner: WatchStream<Arc<T>>,
    _guard: Option<Arc<DropGuard>>,
}

impl<T: Send + Sync + 'static> Stream for SubscriptionStream<T> {
    type Item = Arc<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        // WatchStream is Unpin, and so is the guard.
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

// ── Building blocks ──────────────────────────────────────────────────

/// Publish `next` only if it differs from the last snapshot.
pub(crate) fn publish<T: PartialEq>(tx: &watch::Sender<Arc<T>>, next: T) -> bool {
    tx.send_if_modified(|current| {
        if **current == next {
            false
        } else {
            *current = Arc::new(next);
            true
        }
    })
}

/// Like [`publish`], for a snapshot that is already shared.
pub(crate) fn publish_arc<T: PartialEq>(tx: &watch::Sender<Arc<T>>, next: Arc<T>) -> bool {
    tx.send_if_modified(|current| {
        if **current == *next {
            false
        } else {
            *current = next;
            true
        }
    })
}

/// Project a store feed through `map`, publishing only distinct results.
pub(crate) fn map_feed<S, T, F>(mut feed: Feed<S>, map: F) -> Subscription<T>
where
    S: Send + Sync + 'static,
    T: PartialEq + Send + Sync + 'static,
    F: Fn(&S) -> T + Send + 'static,
{
    let (tx, rx) = watch::channel(Arc::new(map(&feed.current())));
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = task_cancel.cancelled() => break,
                next = feed.changed() => {
                    let Some(snapshot) = next else { break };
                    publish(&tx, map(&snapshot));
                }
            }
        }
    });

    Subscription::new(rx, cancel.drop_guard())
}

/// Project a subscription through `map`.
pub(crate) fn map_subscription<S, T, F>(mut source: Subscription<S>, map: F) -> Subscription<T>
where
    S: Send + Sync + 'static,
    T: PartialEq + Send + Sync + 'static,
    F: Fn(&S) -> T + Send + 'static,
{
    let (tx, rx) = watch::channel(Arc::new(map(&source.latest())));
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = task_cancel.cancelled() => break,
                next = source.changed() => {
                    let Some(snapshot) = next else { break };
                    publish(&tx, map(&snapshot));
                }
            }
        }
    });

    Subscription::new(rx, cancel.drop_guard())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use futures_util::StreamExt;

    use super::*;

    #[tokio::test]
    async fn constant_never_changes() {
        let mut sub = Subscription::constant(vec![1, 2, 3]);
        assert_eq!(**sub.current(), vec![1, 2, 3]);
        assert!(sub.changed().await.is_none());
    }

    #[tokio::test]
    async fn stream_yields_current_then_changes() {
        let (tx, rx) = watch::channel(Arc::new(1));
        let sub = Subscription::new(rx, CancellationToken::new().drop_guard());
        let mut stream = sub.into_stream();

        assert_eq!(*stream.next().await.unwrap(), 1);
        publish(&tx, 2);
        assert_eq!(*stream.next().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn publish_skips_equal_snapshots() {
        let (tx, _rx) = watch::channel(Arc::new(vec!["a"]));
        assert!(!publish(&tx, vec!["a"]));
        assert!(publish(&tx, vec!["a", "b"]));
    }

    #[tokio::test]
    async fn dropping_every_clone_cancels() {
        let (_tx, rx) = watch::channel(Arc::new(0));
        let cancel = CancellationToken::new();
        let sub = Subscription::new(rx, cancel.clone().drop_guard());
        let clone = sub.clone();

        drop(sub);
        assert!(!cancel.is_cancelled());
        clone.unsubscribe();
        assert!(cancel.is_cancelled());
    }
}

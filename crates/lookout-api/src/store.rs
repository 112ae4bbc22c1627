// ── Document store contract ──
//
// The capability set the client core relies on: point reads, structured
// queries, atomic batched writes, and live feeds that deliver the full
// result set on every change.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::DropGuard;

use crate::document::{Document, DocumentPath, FieldPath};
use crate::error::Error;
use crate::query::Query;
use crate::write::{FieldValue, Write, WriteBatch};

/// A Firestore-shaped document database.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// One-shot read. `Ok(None)` when the document does not exist.
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, Error>;

    /// One-shot query.
    async fn run_query(&self, query: &Query) -> Result<Vec<Document>, Error>;

    /// Apply every write in the batch atomically, or none of them.
    async fn commit(&self, batch: WriteBatch) -> Result<(), Error>;

    /// Live view of a single document. The feed holds the initial
    /// snapshot when this returns.
    async fn listen_document(&self, path: &DocumentPath) -> Result<Feed<Option<Document>>, Error>;

    /// Live view of a query result. The feed holds the initial
    /// snapshot when this returns.
    async fn listen_query(&self, query: &Query) -> Result<Feed<Vec<Document>>, Error>;

    /// Generate a fresh document ID.
    fn new_id(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    /// Create a document under a generated ID and return its path.
    async fn add(
        &self,
        collection: &str,
        fields: Vec<(FieldPath, FieldValue)>,
    ) -> Result<DocumentPath, Error> {
        let path = DocumentPath::new(collection, self.new_id());
        self.commit(Write::create(path.clone(), fields).into())
            .await?;
        Ok(path)
    }
}

// ── Feed ─────────────────────────────────────────────────────────────

/// A live store subscription.
///
/// Holds the latest snapshot and wakes on every change. Dropping the feed
/// stops the listener that backs it.
pub struct Feed<T> {
    receiver: watch::Receiver<Arc<T>>,
    guard: DropGuard,
}

impl<T: Send + Sync + 'static> Feed<T> {
    pub fn new(receiver: watch::Receiver<Arc<T>>, guard: DropGuard) -> Self {
        Self { receiver, guard }
    }

    /// The latest snapshot.
    pub fn current(&self) -> Arc<T> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change, returning the new snapshot.
    /// Returns `None` once the listener has shut down.
    pub async fn changed(&mut self) -> Option<Arc<T>> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Stream of subsequent snapshots (the current one is not repeated),
    /// plus the guard that keeps the listener alive.
    pub fn into_changes(self) -> (WatchStream<Arc<T>>, DropGuard) {
        (WatchStream::from_changes(self.receiver), self.guard)
    }
}

impl<T> std::fmt::Debug for Feed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feed").finish_non_exhaustive()
    }
}

/// Publish `next` only if it differs from what subscribers last saw.
pub(crate) fn publish_if_changed<T: PartialEq>(tx: &watch::Sender<Arc<T>>, next: T) -> bool {
    tx.send_if_modified(|current| {
        if **current == next {
            false
        } else {
            *current = Arc::new(next);
            true
        }
    })
}

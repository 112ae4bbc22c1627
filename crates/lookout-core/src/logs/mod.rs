// ── Event log aggregator ──
//
// Live, range-filtered views over the `logs` collection for a set of
// devices, joined with current device names through a shared cache.

mod range;
mod view;

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::{join_all, try_join_all};
use lookout_api::{Direction, DocumentPath, DocumentStore, Filter, Query, Value, Write};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::devices::device_path;
use crate::error::CoreError;
use crate::model::{Log, ResolvedLog};
use crate::stream::{Subscription, in_chunks, map_feed, merge_feeds, publish, switch_map};

pub use range::{RangeMode, TimeRange};
pub use view::{LogsSnapshot, LogsView, RangeKey};

pub(crate) const LOGS: &str = "logs";

/// Shown while a device name is being looked up.
pub const NAME_PLACEHOLDER: &str = "…loading…";
/// Cached for a device whose document no longer exists.
pub const UNKNOWN_DEVICE: &str = "Unknown Device";

fn log_path(id: &str) -> DocumentPath {
    DocumentPath::new(LOGS, id)
}

/// Newest first; ties broken by ID so merged chunks order deterministically.
fn sort_newest_first(logs: &mut [Log]) {
    logs.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Outcome of a best-effort bulk delete.
#[derive(Debug, Default)]
pub struct BulkDeleteReport {
    pub deleted: Vec<String>,
    pub failed: Vec<(String, CoreError)>,
}

impl BulkDeleteReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Clone)]
pub struct LogAggregator {
    store: Arc<dyn DocumentStore>,
    /// device ID -> display name. Shared by every view of this aggregator.
    names: Arc<DashMap<String, String>>,
}

impl LogAggregator {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            names: Arc::new(DashMap::new()),
        }
    }

    // ── Raw log views ────────────────────────────────────────────────

    /// Live logs of the given devices inside `range`, newest first.
    ///
    /// Device IDs are split into `IN`-sized chunks with one listener each;
    /// results are merged and re-sorted. No IDs means no query at all.
    pub async fn subscribe_logs_in_range(
        &self,
        device_ids: &[String],
        range: TimeRange,
    ) -> Result<Subscription<Vec<Log>>, CoreError> {
        if device_ids.is_empty() {
            return Ok(Subscription::constant(Vec::new()));
        }

        let chunks = in_chunks(device_ids);
        debug!(devices = device_ids.len(), chunks = chunks.len(), "subscribing to logs");
        let feeds = try_join_all(chunks.into_iter().map(|chunk| {
            let store = Arc::clone(&self.store);
            let query = Query::collection(LOGS)
                .filter(Filter::In(
                    "deviceId".into(),
                    chunk.into_iter().map(Value::from).collect(),
                ))
                .filter(Filter::Gte("createdAt".into(), range.start.into()))
                .filter(Filter::Lte("createdAt".into(), range.end.into()))
                .order_by("createdAt", Direction::Descending);
            async move { store.listen_query(&query).await }
        }))
        .await?;

        Ok(merge_feeds(feeds, |parts| {
            let mut logs: Vec<Log> = parts
                .iter()
                .flat_map(|docs| docs.iter())
                .map(Log::from)
                .collect();
            sort_newest_first(&mut logs);
            logs
        }))
    }

    /// Live logs of one device, newest first, unbounded in time.
    pub async fn subscribe_device_logs(
        &self,
        device_id: &str,
    ) -> Result<Subscription<Vec<Log>>, CoreError> {
        let query = Query::collection(LOGS)
            .where_eq("deviceId", device_id)
            .order_by("createdAt", Direction::Descending);
        let feed = self.store.listen_query(&query).await?;
        Ok(map_feed(feed, |docs| docs.iter().map(Log::from).collect()))
    }

    // ── Name resolution ──────────────────────────────────────────────

    /// Join `logs` with device names.
    ///
    /// Names not yet cached show as [`NAME_PLACEHOLDER`]; they are fetched
    /// in parallel and the whole list is re-emitted once they arrive, so
    /// earlier entries upgrade without waiting for a new log.
    pub fn subscribe_resolved(
        &self,
        mut logs: Subscription<Vec<Log>>,
    ) -> Subscription<Vec<ResolvedLog>> {
        let mut current = logs.latest();
        let (tx, rx) = watch::channel(Arc::new(self.resolve(&current)));

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                let missing = this.missing_names(&current);
                if !missing.is_empty() {
                    tokio::select! {
                        biased;
                        _ = task_cancel.cancelled() => break,
                        () = this.fetch_names(missing) => {}
                    }
                    publish(&tx, this.resolve(&current));
                }

                tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => break,
                    next = logs.changed() => {
                        let Some(next) = next else { break };
                        current = next;
                        publish(&tx, this.resolve(&current));
                    }
                }
            }
        });

        Subscription::new(rx, cancel.drop_guard())
    }

    /// Resolved logs of whatever device set `device_ids` currently holds.
    /// A change in the set re-opens the underlying query.
    pub async fn follow(
        &self,
        device_ids: Subscription<Vec<String>>,
        range: TimeRange,
    ) -> Result<Subscription<Vec<ResolvedLog>>, CoreError> {
        let this = self.clone();
        switch_map(device_ids, move |ids: Arc<Vec<String>>| {
            let this = this.clone();
            async move {
                let logs = this.subscribe_logs_in_range(&ids, range).await?;
                Ok(this.subscribe_resolved(logs))
            }
        })
        .await
    }

    /// Cached display name, if any.
    pub fn cached_name(&self, device_id: &str) -> Option<String> {
        self.names.get(device_id).map(|name| name.value().clone())
    }

    fn resolve(&self, logs: &[Log]) -> Vec<ResolvedLog> {
        logs.iter()
            .map(|log| ResolvedLog {
                id: log.id.clone(),
                device_id: log.device_id.clone(),
                device_name: self
                    .cached_name(&log.device_id)
                    .unwrap_or_else(|| NAME_PLACEHOLDER.to_owned()),
                photo_url: log.photo_url.clone(),
                kind: log.kind,
                label: log.kind.presentation().label,
                created_at: log.created_at,
            })
            .collect()
    }

    fn missing_names(&self, logs: &[Log]) -> Vec<String> {
        let mut seen = HashSet::new();
        logs.iter()
            .map(|log| log.device_id.as_str())
            .filter(|id| !self.names.contains_key(*id) && seen.insert(*id))
            .map(str::to_owned)
            .collect()
    }

    /// Look up names in parallel. A missing device caches as
    /// [`UNKNOWN_DEVICE`]; a failed read is not cached and is retried on
    /// the next emission.
    async fn fetch_names(&self, device_ids: Vec<String>) {
        let lookups = join_all(device_ids.iter().map(|id| {
            let path = device_path(id);
            async move { self.store.get(&path).await }
        }))
        .await;
        for (id, lookup) in device_ids.into_iter().zip(lookups) {
            match lookup {
                Ok(doc) => {
                    let name = doc
                        .as_ref()
                        .and_then(|d| d.get_str("name"))
                        .filter(|name| !name.is_empty())
                        .unwrap_or(UNKNOWN_DEVICE)
                        .to_owned();
                    self.names.insert(id, name);
                }
                Err(e) => warn!(error = %e, device_id = %id, "device name lookup failed"),
            }
        }
    }

    // ── Deletes ──────────────────────────────────────────────────────

    pub async fn delete_log(&self, log_id: &str) -> Result<(), CoreError> {
        self.store.commit(Write::delete(log_path(log_id)).into()).await?;
        Ok(())
    }

    /// Delete every log in parallel. Individual failures are logged and
    /// reported; they neither abort the others nor roll anything back.
    pub async fn delete_logs(&self, log_ids: &[String]) -> BulkDeleteReport {
        let results = join_all(log_ids.iter().map(|id| self.delete_log(id))).await;

        let mut report = BulkDeleteReport::default();
        for (id, result) in log_ids.iter().zip(results) {
            match result {
                Ok(()) => report.deleted.push(id.clone()),
                Err(e) => {
                    warn!(error = %e, log_id = %id, "log delete failed");
                    report.failed.push((id.clone(), e));
                }
            }
        }
        debug!(
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "bulk log delete finished"
        );
        report
    }
}

impl std::fmt::Debug for LogAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogAggregator")
            .field("cached_names", &self.names.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use lookout_api::{
        Document, Feed, FieldPath, FieldValue, ManualClock, MemoryStore, WriteBatch, WriteKind,
    };
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::LogType;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap(),
        ))
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, hour, minute, 0).unwrap()
    }

    fn day() -> TimeRange {
        RangeMode::Today.resolve(&at(12, 0)).unwrap()
    }

    async fn put_log(
        store: &MemoryStore,
        id: &str,
        device: &str,
        created: DateTime<Utc>,
        kind: i64,
    ) {
        store
            .commit(
                Write::set(
                    log_path(id),
                    vec![
                        (FieldPath::field("deviceId"), FieldValue::set(device)),
                        (FieldPath::field("type"), FieldValue::set(kind)),
                        (FieldPath::field("createdAt"), FieldValue::set(created)),
                    ],
                )
                .into(),
            )
            .await
            .unwrap();
    }

    async fn put_device(store: &MemoryStore, id: &str, name: &str) {
        store
            .commit(
                Write::set(
                    device_path(id),
                    vec![(FieldPath::field("name"), FieldValue::set(name))],
                )
                .into(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn empty_device_list_issues_no_query() {
        let store = MemoryStore::new(clock());
        let logs = LogAggregator::new(Arc::new(store));
        let mut sub = logs.subscribe_logs_in_range(&[], day()).await.unwrap();
        assert!(sub.current().is_empty());
        assert!(sub.changed().await.is_none());
    }

    #[tokio::test]
    async fn range_filter_and_order_across_chunks() {
        let store = MemoryStore::new(clock());
        let ids: Vec<String> = (0..12).map(|i| format!("d{i:02}")).collect();
        for (i, id) in ids.iter().enumerate() {
            let minute = u32::try_from(i).unwrap();
            put_log(&store, &format!("l{i:02}"), id, at(10, minute), 0).await;
        }
        put_log(&store, "yesterday", "d00", at(10, 0) - chrono::Duration::days(1), 0).await;
        put_log(&store, "stranger", "x", at(10, 30), 0).await;

        let logs = LogAggregator::new(Arc::new(store.clone()));
        let mut sub = logs.subscribe_logs_in_range(&ids, day()).await.unwrap();
        let got: Vec<String> = sub.current().iter().map(|l| l.id.clone()).collect();
        let want: Vec<String> = (0..12).rev().map(|i| format!("l{i:02}")).collect();
        assert_eq!(got, want);

        put_log(&store, "late", "d11", at(11, 0), 1).await;
        let next = sub.changed().await.unwrap();
        assert_eq!(next[0].id, "late");
        assert_eq!(next[0].kind, LogType::UserRequest);
    }

    #[tokio::test]
    async fn names_upgrade_from_placeholder() {
        let store = MemoryStore::new(clock());
        put_device(&store, "d1", "Front Door").await;
        put_log(&store, "l1", "d1", at(9, 0), 0).await;
        put_log(&store, "l2", "gone", at(9, 5), 2).await;

        let logs = LogAggregator::new(Arc::new(store.clone()));
        let raw = logs
            .subscribe_logs_in_range(&["d1".into(), "gone".into()], day())
            .await
            .unwrap();
        let mut resolved = logs.subscribe_resolved(raw);
        assert!(resolved.current().iter().all(|l| l.device_name == NAME_PLACEHOLDER));

        let named = tokio::time::timeout(
            Duration::from_secs(1),
            resolved.wait_for(|ls| ls.iter().all(|l| l.device_name != NAME_PLACEHOLDER)),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(named[0].device_name, UNKNOWN_DEVICE);
        assert_eq!(named[0].label, "Motion detected");
        assert_eq!(named[1].device_name, "Front Door");

        // A new log for a cached device resolves on first sight.
        put_log(&store, "l3", "d1", at(9, 10), 3).await;
        let next = resolved.changed().await.unwrap();
        assert_eq!(next[0].id, "l3");
        assert_eq!(next[0].device_name, "Front Door");
    }

    // ── Bulk delete with a store that refuses one document ───────────

    struct Refusing {
        inner: MemoryStore,
        refuse: DocumentPath,
    }

    #[async_trait]
    impl DocumentStore for Refusing {
        async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, lookout_api::Error> {
            self.inner.get(path).await
        }

        async fn run_query(&self, query: &Query) -> Result<Vec<Document>, lookout_api::Error> {
            self.inner.run_query(query).await
        }

        async fn commit(&self, batch: WriteBatch) -> Result<(), lookout_api::Error> {
            let refused = batch
                .writes()
                .iter()
                .any(|w| w.path == self.refuse && w.kind == WriteKind::Delete);
            if refused {
                return Err(lookout_api::Error::Firestore {
                    status: 403,
                    code: Some("PERMISSION_DENIED".into()),
                    message: "Missing or insufficient permissions.".into(),
                });
            }
            self.inner.commit(batch).await
        }

        async fn listen_document(
            &self,
            path: &DocumentPath,
        ) -> Result<Feed<Option<Document>>, lookout_api::Error> {
            self.inner.listen_document(path).await
        }

        async fn listen_query(
            &self,
            query: &Query,
        ) -> Result<Feed<Vec<Document>>, lookout_api::Error> {
            self.inner.listen_query(query).await
        }
    }

    #[tokio::test]
    async fn bulk_delete_tolerates_partial_failure() {
        let inner = MemoryStore::new(clock());
        for id in ["l1", "l2", "l3"] {
            put_log(&inner, id, "d1", at(8, 0), 0).await;
        }
        let store = Refusing {
            inner: inner.clone(),
            refuse: log_path("l2"),
        };
        let logs = LogAggregator::new(Arc::new(store));

        let ids: Vec<String> = ["l1", "l2", "l3"].map(String::from).to_vec();
        let report = logs.delete_logs(&ids).await;

        assert!(!report.is_complete());
        assert_eq!(report.deleted, vec!["l1", "l3"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "l2");
        assert_eq!(inner.count(LOGS).await, 1);
    }
}

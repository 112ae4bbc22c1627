// A log view that can switch date ranges.
//
// Each range switch gets a new `RangeKey`. Snapshots carry the key they
// were produced for, so a consumer can drop anything that belongs to a
// range it has already left.

use std::fmt;
use std::sync::Arc;

use chrono::{FixedOffset, Local};
use lookout_api::Clock;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{LogAggregator, RangeMode, TimeRange};
use crate::error::CoreError;
use crate::model::ResolvedLog;
use crate::stream::{Subscription, map_subscription, switch_map};

/// Identifies one range selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RangeKey(u64);

impl fmt::Display for RangeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "range-{}", self.0)
    }
}

/// Logs for one range selection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogsSnapshot {
    pub key: RangeKey,
    pub range: TimeRange,
    pub logs: Vec<ResolvedLog>,
}

#[derive(Debug, Clone, Copy)]
struct RangeRequest {
    key: RangeKey,
    range: TimeRange,
}

pub struct LogsView {
    clock: Arc<dyn Clock>,
    /// `None` resolves days in the system's local time zone.
    offset: Option<FixedOffset>,
    mode: RangeMode,
    key: RangeKey,
    requests: watch::Sender<Arc<RangeRequest>>,
    snapshots: Subscription<LogsSnapshot>,
}

impl LogsView {
    /// Open a view over the logs of whichever devices `device_ids` holds.
    pub async fn open(
        logs: LogAggregator,
        device_ids: Subscription<Vec<String>>,
        clock: Arc<dyn Clock>,
        mode: RangeMode,
        offset: Option<FixedOffset>,
    ) -> Result<Self, CoreError> {
        let key = RangeKey(0);
        let range = resolve(&*clock, offset, mode)?;
        let (requests, rx) = watch::channel(Arc::new(RangeRequest { key, range }));
        let outer = Subscription::new(rx, CancellationToken::new().drop_guard());

        let snapshots = switch_map(outer, move |request: Arc<RangeRequest>| {
            let logs = logs.clone();
            let device_ids = device_ids.clone();
            async move {
                let RangeRequest { key, range } = *request;
                let resolved = logs.follow(device_ids, range).await?;
                Ok(map_subscription(resolved, move |entries| LogsSnapshot {
                    key,
                    range,
                    logs: entries.clone(),
                }))
            }
        })
        .await?;

        Ok(Self {
            clock,
            offset,
            mode,
            key,
            requests,
            snapshots,
        })
    }

    pub fn mode(&self) -> RangeMode {
        self.mode
    }

    /// Key of the most recent selection.
    pub fn key(&self) -> RangeKey {
        self.key
    }

    /// Every snapshot, across range switches.
    pub fn snapshots(&self) -> Subscription<LogsSnapshot> {
        self.snapshots.clone()
    }

    /// Switch ranges. The previous range's listeners are torn down once the
    /// new ones are open; returns the key the new snapshots will carry.
    pub fn set_mode(&mut self, mode: RangeMode) -> Result<RangeKey, CoreError> {
        let range = resolve(&*self.clock, self.offset, mode)?;
        self.key = RangeKey(self.key.0 + 1);
        self.mode = mode;
        debug!(key = %self.key, ?mode, "log range switched");
        self.requests.send_replace(Arc::new(RangeRequest {
            key: self.key,
            range,
        }));
        Ok(self.key)
    }

    /// Re-resolve the current mode, e.g. after midnight.
    pub fn refresh(&mut self) -> Result<RangeKey, CoreError> {
        self.set_mode(self.mode)
    }

    /// Wait for the first snapshot of the current selection.
    pub async fn current(&self) -> Option<Arc<LogsSnapshot>> {
        let key = self.key;
        self.snapshots.clone().wait_for(|s| s.key == key).await
    }
}

impl fmt::Debug for LogsView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogsView")
            .field("mode", &self.mode)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

fn resolve(
    clock: &dyn Clock,
    offset: Option<FixedOffset>,
    mode: RangeMode,
) -> Result<TimeRange, CoreError> {
    let now = clock.now();
    match offset {
        Some(offset) => mode.resolve(&now.with_timezone(&offset)),
        None => mode.resolve(&now.with_timezone(&Local)),
    }
}

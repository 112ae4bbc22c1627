// ── Event log domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What triggered a log entry. Stored as an integer code; codes this
/// client does not know are kept as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum LogType {
    RingDoorbell,
    UserRequest,
    Proximity,
    NewFingerprint,
    Unknown(i64),
}

impl From<i64> for LogType {
    fn from(code: i64) -> Self {
        match code {
            0 => Self::RingDoorbell,
            1 => Self::UserRequest,
            2 => Self::Proximity,
            3 => Self::NewFingerprint,
            other => Self::Unknown(other),
        }
    }
}

impl From<LogType> for i64 {
    fn from(kind: LogType) -> Self {
        match kind {
            LogType::RingDoorbell => 0,
            LogType::UserRequest => 1,
            LogType::Proximity => 2,
            LogType::NewFingerprint => 3,
            LogType::Unknown(code) => code,
        }
    }
}

/// Presentation taxonomy for a log type: a stable key consumers map to an
/// icon, and a short label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LogPresentation {
    pub key: &'static str,
    pub label: &'static str,
}

impl LogType {
    pub fn presentation(self) -> LogPresentation {
        let (key, label) = match self {
            Self::RingDoorbell => ("doorbell", "Doorbell rang"),
            Self::UserRequest => ("snapshot", "Snapshot taken"),
            Self::Proximity => ("motion", "Motion detected"),
            Self::NewFingerprint => ("fingerprint", "Fingerprint scanned"),
            Self::Unknown(_) => ("unknown", "Unknown event"),
        };
        LogPresentation { key, label }
    }
}

/// A device event as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub id: String,
    pub device_id: String,
    /// Name denormalized by the writer; may be stale or empty.
    pub device_name: Option<String>,
    pub photo_url: Option<String>,
    #[serde(rename = "type")]
    pub kind: LogType,
    pub created_at: DateTime<Utc>,
    pub user_id: Option<String>,
}

/// A log joined with the current device name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedLog {
    pub id: String,
    pub device_id: String,
    pub device_name: String,
    pub photo_url: Option<String>,
    #[serde(rename = "type")]
    pub kind: LogType,
    pub label: &'static str,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_and_unknown_is_kept() {
        for code in 0..4 {
            assert_eq!(i64::from(LogType::from(code)), code);
        }
        assert_eq!(LogType::from(42), LogType::Unknown(42));
        assert_eq!(i64::from(LogType::Unknown(42)), 42);
    }

    #[test]
    fn every_type_has_a_presentation() {
        assert_eq!(LogType::RingDoorbell.presentation().label, "Doorbell rang");
        assert_eq!(LogType::UserRequest.presentation().key, "snapshot");
        assert_eq!(LogType::Proximity.presentation().label, "Motion detected");
        assert_eq!(LogType::NewFingerprint.presentation().key, "fingerprint");

        let unknown = LogType::Unknown(-7).presentation();
        assert_eq!(unknown.key, "unknown");
        assert_eq!(unknown.label, "Unknown event");
    }
}

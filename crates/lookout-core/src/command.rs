// ── Device commands ──
//
// Messages published to a device over the broker. Each command maps to
// one device-scoped topic and a JSON payload tagged by `type`. Delivery is
// best effort: nothing acknowledges a command.

use bytes::Bytes;
use lookout_api::Delivery;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A command envelope sent through the session's command channel.
/// Contains the target, the command, and a oneshot response channel.
pub(crate) struct CommandEnvelope {
    pub device_id: String,
    pub command: DeviceCommand,
    pub response_tx: tokio::sync::oneshot::Sender<Result<Delivery, CoreError>>,
}

/// Everything a client can ask a device to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DeviceCommand {
    /// Start fingerprint enrollment for `user_id`.
    #[serde(rename = "FINGERPRINT_REGISTRATION", rename_all = "camelCase")]
    RegisterFingerprint { user_id: String, is_new: bool },
    /// Capture a snapshot on behalf of `user_id`.
    #[serde(rename = "TAKE_PHOTO", rename_all = "camelCase")]
    TakePhoto { user_id: String },
}

impl DeviceCommand {
    /// Topic this command is published to for `device_id`.
    pub fn topic(&self, device_id: &str) -> String {
        match self {
            Self::RegisterFingerprint { .. } => format!("{device_id}/sensor/fingerprint"),
            Self::TakePhoto { .. } => format!("{device_id}/sensor/camera/take_photo"),
        }
    }

    pub fn payload(&self) -> Result<Bytes, CoreError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| CoreError::Internal(format!("command serialization failed: {e}")))
    }

    /// Stable name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RegisterFingerprint { .. } => "register_fingerprint",
            Self::TakePhoto { .. } => "take_photo",
        }
    }
}

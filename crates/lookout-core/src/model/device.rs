// ── Device domain types ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Principal kind that owns a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OwnerType {
    User,
    Family,
}

/// Last status the device reported.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    Warning,
    /// Missing or unrecognized status string.
    #[default]
    Unknown,
}

/// A doorbell/camera unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    /// `None` for a device that has not been claimed yet.
    pub owner_id: Option<String>,
    pub owner_type: Option<OwnerType>,
    pub status: DeviceStatus,
    pub last_activity_type: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    /// Users whose fingerprint the device has enrolled.
    #[serde(default)]
    pub registered_users: Vec<String>,
}

impl Device {
    pub fn is_owned_by_user(&self, user_id: &str) -> bool {
        self.owner_type == Some(OwnerType::User) && self.owner_id.as_deref() == Some(user_id)
    }

    pub fn is_claimed(&self) -> bool {
        self.owner_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    pub fn has_registered(&self, user_id: &str) -> bool {
        self.registered_users.iter().any(|u| u == user_id)
    }
}

/// Input for `DeviceRegistry::create_device`.
#[derive(Debug, Clone)]
pub struct NewDevice {
    pub name: String,
    pub owner_id: String,
    pub owner_type: OwnerType,
    pub status: DeviceStatus,
    pub last_activity_type: String,
}

/// Partial device update. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct DeviceUpdate {
    pub name: Option<String>,
    pub status: Option<DeviceStatus>,
    pub last_activity_type: Option<String>,
}

impl DeviceUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.status.is_none() && self.last_activity_type.is_none()
    }
}

/// Device-pushed health readings. Absent readings are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceHealth {
    /// Seconds.
    pub uptime: f64,
    /// Milliseconds.
    pub latency: f64,
    /// Percent, 0 to 100.
    pub signal_quality: f64,
}

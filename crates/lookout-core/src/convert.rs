// ── Document-to-domain conversions ──
//
// Bridges raw `lookout_api::Document` snapshots into `lookout_core::model`
// types. Each `From` impl reads the wire field names, parses strings into
// strong types, and fills defaults for missing data instead of failing:
// the store is schemaless and devices write some of these fields.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use lookout_api::Document;
use tracing::debug;

use crate::model::{
    Device, DeviceHealth, DeviceStatus, Family, Invite, Log, LogType, OwnerType, Role, UserProfile,
};

// ── Helpers ────────────────────────────────────────────────────────

fn string_field(doc: &Document, field: &str) -> Option<String> {
    doc.get_str(field).map(str::to_owned)
}

/// Numeric reading that may be stored as an integer or a double.
fn number_field(map: Option<&lookout_api::document::Fields>, field: &str) -> f64 {
    map.and_then(|m| m.get(field))
        .and_then(lookout_api::Value::as_f64)
        .unwrap_or(0.0)
}

// ── Device ─────────────────────────────────────────────────────────

impl From<&Document> for Device {
    fn from(doc: &Document) -> Self {
        Device {
            id: doc.id.clone(),
            name: string_field(doc, "name").unwrap_or_default(),
            owner_id: string_field(doc, "ownerId").filter(|s| !s.is_empty()),
            owner_type: doc.get_str("ownerType").and_then(|s| s.parse::<OwnerType>().ok()),
            status: doc
                .get_str("status")
                .and_then(|s| s.parse::<DeviceStatus>().ok())
                .unwrap_or_default(),
            last_activity_type: string_field(doc, "lastActivityType"),
            created_at: doc.get_timestamp("createdAt"),
            last_activity_at: doc.get_timestamp("lastActivityAt"),
            registered_users: doc.get_string_array("registeredUsers"),
        }
    }
}

impl From<&Document> for DeviceHealth {
    fn from(doc: &Document) -> Self {
        let health = doc.get_map("health");
        DeviceHealth {
            uptime: number_field(health, "uptime"),
            latency: number_field(health, "latency"),
            signal_quality: number_field(health, "signal"),
        }
    }
}

// ── Family ─────────────────────────────────────────────────────────

impl From<&Document> for Family {
    fn from(doc: &Document) -> Self {
        let mut roles = BTreeMap::new();
        if let Some(raw) = doc.get_map("roles") {
            for (user_id, value) in raw {
                match value.as_str().map(str::parse::<Role>) {
                    Some(Ok(role)) => {
                        roles.insert(user_id.clone(), role);
                    }
                    _ => debug!(family = %doc.id, user_id, ?value, "skipping unrecognized role"),
                }
            }
        }

        Family {
            id: doc.id.clone(),
            name: string_field(doc, "name").unwrap_or_default(),
            description: string_field(doc, "description").unwrap_or_default(),
            owner_id: string_field(doc, "ownerId").unwrap_or_default(),
            created_at: doc.get_timestamp("createdAt"),
            roles,
            devices: doc.get_string_array("devices"),
        }
    }
}

impl From<&Document> for Invite {
    fn from(doc: &Document) -> Self {
        Invite {
            code: doc.id.clone(),
            family_id: string_field(doc, "familyId").unwrap_or_default(),
            created_at: doc.get_timestamp("createdAt"),
            expires_at: doc.get_timestamp("expiresAt"),
        }
    }
}

// ── Log ────────────────────────────────────────────────────────────

impl From<&Document> for Log {
    fn from(doc: &Document) -> Self {
        Log {
            id: doc.id.clone(),
            device_id: string_field(doc, "deviceId").unwrap_or_default(),
            device_name: string_field(doc, "deviceName").filter(|s| !s.is_empty()),
            photo_url: string_field(doc, "photoURL").filter(|s| !s.is_empty()),
            kind: doc.get_i64("type").map_or(LogType::Unknown(-1), LogType::from),
            created_at: doc
                .get_timestamp("createdAt")
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            user_id: string_field(doc, "userId"),
        }
    }
}

// ── User ───────────────────────────────────────────────────────────

impl From<&Document> for UserProfile {
    fn from(doc: &Document) -> Self {
        UserProfile {
            uid: doc.id.clone(),
            username: string_field(doc, "username").unwrap_or_default(),
            email: string_field(doc, "email").unwrap_or_default(),
            created_at: doc.get_timestamp("createdAt"),
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Public profile stored at `users/{uid}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: String,
    pub username: String,
    pub email: String,
    pub created_at: Option<DateTime<Utc>>,
}

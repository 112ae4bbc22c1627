// ── Family / membership domain types ──

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Membership role. Ordered `Guest < Member < Owner`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Role {
    Guest,
    Member,
    Owner,
}

impl Role {
    pub fn level(self) -> u8 {
        match self {
            Self::Guest => 0,
            Self::Member => 1,
            Self::Owner => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Guest => "guest",
            Self::Member => "member",
            Self::Owner => "owner",
        }
    }

    /// `true` when this role grants at least `required`.
    pub fn satisfies(self, required: Role) -> bool {
        self.level() >= required.level()
    }
}

/// A household sharing devices between its members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Family {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub owner_id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub roles: BTreeMap<String, Role>,
    /// Device IDs shared into the family.
    #[serde(default)]
    pub devices: Vec<String>,
}

impl Family {
    pub fn role_of(&self, user_id: &str) -> Option<Role> {
        self.roles.get(user_id).copied()
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.roles.contains_key(user_id)
    }

    /// Members, highest role first, then by user ID.
    pub fn members(&self) -> Vec<Member> {
        let mut members: Vec<Member> = self
            .roles
            .iter()
            .map(|(user_id, role)| Member {
                user_id: user_id.clone(),
                role: *role,
            })
            .collect();
        members.sort_by(|a, b| b.role.cmp(&a.role).then_with(|| a.user_id.cmp(&b.user_id)));
        members
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub user_id: String,
    pub role: Role,
}

/// A single-use code granting `Guest` in a family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invite {
    pub code: String,
    pub family_id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Invite {
    /// An invite without an expiry is treated as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at < now)
    }
}

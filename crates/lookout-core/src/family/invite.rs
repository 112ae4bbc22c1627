// Single-use family invites.
//
// An invite grants `Guest` to whoever redeems it first. Redemption writes
// the role and deletes the invite in one batch that requires the invite to
// still exist, so concurrent redemptions of one code cannot both succeed.
//
// `expiresAt` is computed by the client that issues the invite and checked
// by the client that redeems it. The store does not enforce it.

use std::time::Duration;

use lookout_api::{DocumentPath, FieldPath, FieldValue, Precondition, Write, WriteBatch};
use tracing::{debug, info, warn};

use super::{FamilyRegistry, family_path, role_path};
use crate::error::CoreError;
use crate::model::{Invite, Role};

pub(crate) const INVITES: &str = "invitesFamily";

/// Length of a generated invite code: 16 symbols of 5 bits each.
const CODE_LEN: usize = 16;
/// Digits and capitals without the look-alikes 0, O, 1 and I.
const CODE_ALPHABET: &[u8; 32] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";
/// Attempts at finding an unused code before giving up.
const CODE_ATTEMPTS: usize = 3;

fn invite_path(code: &str) -> DocumentPath {
    DocumentPath::new(INVITES, code)
}

/// Turn a generated 128-bit hex ID into an invite code. IDs in any other
/// shape are used whole.
fn invite_code(id: &str) -> String {
    let Ok(mut bits) = u128::from_str_radix(id, 16) else {
        return id.to_uppercase();
    };
    let mut code = String::with_capacity(CODE_LEN);
    for _ in 0..CODE_LEN {
        let index = usize::try_from(bits & 0x1f).unwrap_or_default();
        code.push(char::from(CODE_ALPHABET[index]));
        bits >>= 5;
    }
    code
}

/// Result of a successful redemption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    pub family_id: String,
    pub role: Role,
}

impl FamilyRegistry {
    /// Issue an invite to `family_id` that expires `ttl` from now.
    pub async fn create_invite(&self, family_id: &str, ttl: Duration) -> Result<Invite, CoreError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|_| CoreError::validation("invite lifetime is out of range"))?;
        self.require_family(family_id).await?;

        let expires_at = self.clock.now() + ttl;
        for _ in 0..CODE_ATTEMPTS {
            let code = invite_code(&self.store.new_id());

            let write = Write::create(
                invite_path(&code),
                vec![
                    (FieldPath::field("familyId"), FieldValue::set(family_id)),
                    (FieldPath::field("role"), FieldValue::set(Role::Guest.as_str())),
                    (FieldPath::field("createdAt"), FieldValue::ServerTimestamp),
                    (FieldPath::field("expiresAt"), FieldValue::set(expires_at)),
                ],
            );
            match self.store.commit(write.into()).await {
                Ok(()) => {
                    info!(family_id, code = %code, %expires_at, "invite created");
                    return self
                        .fetch_invite(&code)
                        .await?
                        .ok_or_else(|| CoreError::not_found("Invite", code));
                }
                Err(lookout_api::Error::AlreadyExists { .. }) => {
                    debug!(code = %code, "invite code collision, drawing another");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CoreError::OperationFailed {
            message: "could not allocate an unused invite code".into(),
        })
    }

    /// `Ok(None)` when no invite has this code.
    pub async fn fetch_invite(&self, code: &str) -> Result<Option<Invite>, CoreError> {
        let doc = self.store.get(&invite_path(code)).await?;
        Ok(doc.as_ref().map(Invite::from))
    }

    /// Best-effort removal of an invite that can no longer be redeemed.
    async fn discard_invite(&self, code: &str) {
        if let Err(e) = self.store.commit(Write::delete(invite_path(code)).into()).await {
            warn!(error = %e, code, "failed to delete stale invite");
        } else {
            debug!(code, "stale invite removed");
        }
    }

    /// Redeem `code` for `user_id`. Codes are matched case-insensitively.
    ///
    /// Fails with `InvalidInvite` for an unknown or already-used code. An
    /// expired invite is deleted before failing with `InviteExpired`, so a
    /// second attempt reports `InvalidInvite`. An invite whose family is
    /// gone is deleted too, and the redemption fails with the family
    /// `NotFound`.
    pub async fn redeem_invite(&self, code: &str, user_id: &str) -> Result<Redemption, CoreError> {
        let normalized = code.trim().to_uppercase();
        let code = normalized.as_str();
        if code.is_empty() {
            return Err(CoreError::validation("invite code cannot be empty"));
        }

        let path = invite_path(code);
        let invite = match self.store.get(&path).await? {
            Some(doc) => Invite::from(&doc),
            None => return Err(CoreError::InvalidInvite),
        };

        if invite.is_expired(self.clock.now()) {
            self.discard_invite(code).await;
            return Err(CoreError::InviteExpired);
        }

        let Some(family) = self.fetch_family(&invite.family_id).await? else {
            self.discard_invite(code).await;
            return Err(CoreError::not_found("Family", invite.family_id));
        };
        if family.is_member(user_id) {
            return Err(CoreError::AlreadyMember {
                family_id: family.id,
            });
        }

        // Both writes require their document to still exist: the family so
        // the role update cannot resurrect a deleted family, the invite so
        // only one redemption wins.
        let mut batch = WriteBatch::new();
        batch
            .push(
                Write::update(
                    family_path(&family.id),
                    vec![(role_path(user_id), FieldValue::set(Role::Guest.as_str()))],
                )
                .with_precondition(Precondition::Exists(true)),
            )
            .push(Write::delete(path).with_precondition(Precondition::Exists(true)));

        match self.store.commit(batch).await {
            Ok(()) => {
                info!(family_id = %family.id, user_id, "invite redeemed");
                Ok(Redemption {
                    family_id: family.id,
                    role: Role::Guest,
                })
            }
            // Either the family was deleted or someone else consumed the
            // invite between our reads and the commit.
            Err(e) if e.is_conflict() => {
                if self.fetch_family(&family.id).await?.is_none() {
                    self.discard_invite(code).await;
                    return Err(CoreError::not_found("Family", family.id));
                }
                Err(CoreError::InvalidInvite)
            }
            Err(e) => Err(e.into()),
        }
    }
}

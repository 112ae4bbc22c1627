// ── Device claim ──
//
// Binds a device, identified by the code printed on it (its document ID),
// to a user. Policy for re-scans: claiming a device you already own is a
// no-op, and a device owned by anyone else is refused. Ownership only
// moves through an explicit unclaim by its owner.

use std::sync::Arc;

use lookout_api::{DocumentStore, FieldPath, FieldValue, Precondition, Value, Write};
use tracing::info;

use crate::devices::device_path;
use crate::error::CoreError;
use crate::model::{Device, DeviceStatus, OwnerType};
use crate::status::{OperationStatus, StatusTracker};

/// Name given to a device claimed before it ever reported in.
pub const DEFAULT_DEVICE_NAME: &str = "LookOut Doorbell";

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The device now belongs to the caller.
    Claimed(Device),
    /// The caller already owned it; nothing was written.
    AlreadyOwned(Device),
}

impl ClaimOutcome {
    pub fn device(&self) -> &Device {
        match self {
            Self::Claimed(device) | Self::AlreadyOwned(device) => device,
        }
    }
}

#[derive(Clone)]
pub struct ClaimFlow {
    store: Arc<dyn DocumentStore>,
    user_id: String,
    status: StatusTracker,
}

impl ClaimFlow {
    pub fn new(store: Arc<dyn DocumentStore>, user_id: impl Into<String>, status: StatusTracker) -> Self {
        Self {
            store,
            user_id: user_id.into(),
            status,
        }
    }

    /// Progress of the most recent claim, cleared shortly after it ends.
    pub fn status(&self) -> OperationStatus {
        self.status.current()
    }

    pub fn watch_status(&self) -> tokio::sync::watch::Receiver<OperationStatus> {
        self.status.watch()
    }

    pub async fn claim(&self, device_code: &str) -> Result<ClaimOutcome, CoreError> {
        self.status.track(self.claim_inner(device_code)).await
    }

    async fn claim_inner(&self, device_code: &str) -> Result<ClaimOutcome, CoreError> {
        let code = device_code.trim();
        if code.is_empty() {
            return Err(CoreError::validation("device code cannot be empty"));
        }
        let path = device_path(code);
        let ownership = [
            (FieldPath::field("ownerId"), FieldValue::set(self.user_id.as_str())),
            (
                FieldPath::field("ownerType"),
                FieldValue::set(OwnerType::User.to_string()),
            ),
            (FieldPath::field("lastActivityAt"), FieldValue::ServerTimestamp),
        ];

        let write = match self.store.get(&path).await? {
            None => {
                let mut fields = ownership.to_vec();
                fields.extend([
                    (FieldPath::field("name"), FieldValue::set(DEFAULT_DEVICE_NAME)),
                    (
                        FieldPath::field("status"),
                        FieldValue::set(DeviceStatus::Offline.to_string()),
                    ),
                    (FieldPath::field("lastActivityType"), FieldValue::set("claimed")),
                    (
                        FieldPath::field("registeredUsers"),
                        FieldValue::set(Vec::<Value>::new()),
                    ),
                    (FieldPath::field("createdAt"), FieldValue::ServerTimestamp),
                ]);
                Write::create(path.clone(), fields)
            }
            Some(doc) => {
                let device = Device::from(&doc);
                if device.is_owned_by_user(&self.user_id) {
                    return Ok(ClaimOutcome::AlreadyOwned(device));
                }
                if device.is_claimed() {
                    return Err(CoreError::AlreadyClaimed {
                        device_id: device.id,
                    });
                }
                let precondition = doc
                    .update_time
                    .map_or(Precondition::Exists(true), Precondition::UpdateTime);
                Write::update(path.clone(), ownership.to_vec()).with_precondition(precondition)
            }
        };

        match self.store.commit(write.into()).await {
            Ok(()) => {}
            // Lost a race with another claimant.
            Err(e) if e.is_conflict() => {
                return Err(CoreError::AlreadyClaimed {
                    device_id: code.to_owned(),
                });
            }
            Err(e) => return Err(e.into()),
        }
        info!(device_id = code, user_id = %self.user_id, "device claimed");

        let doc = self
            .store
            .get(&path)
            .await?
            .ok_or_else(|| CoreError::not_found("Device", code))?;
        Ok(ClaimOutcome::Claimed(Device::from(&doc)))
    }

    /// Release a device the caller owns so it can be claimed again.
    pub async fn unclaim(&self, device_id: &str) -> Result<(), CoreError> {
        let path = device_path(device_id);
        let doc = self
            .store
            .get(&path)
            .await?
            .ok_or_else(|| CoreError::not_found("Device", device_id))?;
        if !Device::from(&doc).is_owned_by_user(&self.user_id) {
            return Err(CoreError::NotPermitted {
                action: "Releasing a device".into(),
                required: crate::model::Role::Owner,
            });
        }

        let precondition = doc
            .update_time
            .map_or(Precondition::Exists(true), Precondition::UpdateTime);
        let write = Write::update(
            path,
            vec![
                (FieldPath::field("ownerId"), FieldValue::Delete),
                (FieldPath::field("ownerType"), FieldValue::Delete),
                (FieldPath::field("lastActivityAt"), FieldValue::ServerTimestamp),
            ],
        )
        .with_precondition(precondition);
        self.store.commit(write.into()).await?;
        info!(device_id, user_id = %self.user_id, "device released");
        Ok(())
    }
}

impl std::fmt::Debug for ClaimFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimFlow")
            .field("user_id", &self.user_id)
            .field("status", &self.status.current())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use lookout_api::MemoryStore;

    use super::*;

    fn flow(store: &MemoryStore, user: &str) -> ClaimFlow {
        ClaimFlow::new(
            Arc::new(store.clone()),
            user,
            StatusTracker::new(Duration::from_secs(2)),
        )
    }

    #[tokio::test]
    async fn first_scan_creates_and_owns() {
        let store = MemoryStore::default();
        let alice = flow(&store, "alice");

        let outcome = alice.claim(" DOOR-01 ").await.unwrap();
        let ClaimOutcome::Claimed(device) = outcome else {
            panic!("expected a fresh claim, got {outcome:?}");
        };
        assert_eq!(device.id, "DOOR-01");
        assert_eq!(device.name, DEFAULT_DEVICE_NAME);
        assert!(device.is_owned_by_user("alice"));
        assert_eq!(alice.status(), OperationStatus::Success);
    }

    #[tokio::test]
    async fn rescan_by_owner_is_a_no_op() {
        let store = MemoryStore::default();
        let alice = flow(&store, "alice");
        alice.claim("DOOR-01").await.unwrap();

        let again = alice.claim("DOOR-01").await.unwrap();
        assert!(matches!(again, ClaimOutcome::AlreadyOwned(_)));
    }

    #[tokio::test]
    async fn someone_elses_device_is_refused() {
        let store = MemoryStore::default();
        flow(&store, "alice").claim("DOOR-01").await.unwrap();

        let bob = flow(&store, "bob");
        let err = bob.claim("DOOR-01").await.unwrap_err();
        assert!(matches!(err, CoreError::AlreadyClaimed { .. }));
        assert!(matches!(bob.status(), OperationStatus::Error(_)));
    }

    #[tokio::test]
    async fn unowned_device_is_adopted_and_release_reopens_it() {
        let store = MemoryStore::default();
        store
            .commit(
                Write::set(
                    device_path("CAM-9"),
                    vec![(FieldPath::field("name"), FieldValue::set("Garage"))],
                )
                .into(),
            )
            .await
            .unwrap();

        let alice = flow(&store, "alice");
        let claimed = alice.claim("CAM-9").await.unwrap();
        assert_eq!(claimed.device().name, "Garage");
        assert!(claimed.device().is_owned_by_user("alice"));

        let bob = flow(&store, "bob");
        assert!(bob.unclaim("CAM-9").await.is_err());
        alice.unclaim("CAM-9").await.unwrap();
        assert!(matches!(
            bob.claim("CAM-9").await.unwrap(),
            ClaimOutcome::Claimed(_)
        ));
    }

    #[tokio::test]
    async fn blank_code_is_rejected() {
        let store = MemoryStore::default();
        let err = flow(&store, "alice").claim("  ").await.unwrap_err();
        assert!(matches!(err, CoreError::ValidationFailed { .. }));
    }
}

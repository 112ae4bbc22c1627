// ── Family / membership registry ──
//
// Families own a `roles` map (uid -> role) and a `devices` array of device
// IDs shared into the household. Both are multi-writer fields: every
// mutation goes through a field-level primitive (map-key set/delete,
// array union/remove) or a single atomic batch, never read-modify-write.

mod invite;

use std::sync::Arc;

use lookout_api::{
    Clock, DocumentPath, DocumentStore, FieldPath, FieldValue, Filter, Precondition, Query,
    Value, Write,
};
use tracing::{debug, info};

use crate::devices::DeviceRegistry;
use crate::error::CoreError;
use crate::model::{Device, Family, Role};
use crate::permission::member_has_role;
use crate::stream::{Subscription, map_feed, map_subscription, switch_map};

pub use invite::Redemption;

pub(crate) const FAMILIES: &str = "families";

pub(crate) fn family_path(id: &str) -> DocumentPath {
    DocumentPath::new(FAMILIES, id)
}

fn role_path(user_id: &str) -> FieldPath {
    FieldPath::field("roles").child(user_id)
}

/// Families in which `user_id` holds any role.
fn families_of(user_id: &str) -> Query {
    Query::collection(FAMILIES).filter(Filter::NotNull(role_path(user_id)))
}

fn is_owner(family: &Family, user_id: &str) -> bool {
    family.owner_id == user_id || family.role_of(user_id) == Some(Role::Owner)
}

/// What `leave_family` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The user's role was removed.
    Left,
    /// The owner left, so the family was deleted.
    FamilyDeleted,
    /// The user was not a member.
    NotAMember,
}

#[derive(Clone)]
pub struct FamilyRegistry {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    devices: DeviceRegistry,
}

impl FamilyRegistry {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>) -> Self {
        let devices = DeviceRegistry::new(Arc::clone(&store));
        Self {
            store,
            clock,
            devices,
        }
    }

    // ── Families ─────────────────────────────────────────────────────

    /// Create a family owned by `owner_id`, with no shared devices.
    pub async fn create_family(
        &self,
        name: &str,
        owner_id: &str,
        description: Option<&str>,
    ) -> Result<Family, CoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::validation("family name cannot be empty"));
        }
        let description = description.map(str::trim).unwrap_or_default();

        let path = self
            .store
            .add(
                FAMILIES,
                vec![
                    (FieldPath::field("name"), FieldValue::set(name)),
                    (FieldPath::field("description"), FieldValue::set(description)),
                    (FieldPath::field("ownerId"), FieldValue::set(owner_id)),
                    (role_path(owner_id), FieldValue::set(Role::Owner.as_str())),
                    (FieldPath::field("devices"), FieldValue::set(Vec::<Value>::new())),
                    (FieldPath::field("createdAt"), FieldValue::ServerTimestamp),
                ],
            )
            .await?;
        info!(family_id = %path.id, owner_id, "family created");

        self.fetch_family(&path.id)
            .await?
            .ok_or_else(|| CoreError::not_found("Family", path.id))
    }

    /// `Ok(None)` when the family does not exist.
    pub async fn fetch_family(&self, family_id: &str) -> Result<Option<Family>, CoreError> {
        let doc = self.store.get(&family_path(family_id)).await?;
        Ok(doc.as_ref().map(Family::from))
    }

    async fn require_family(&self, family_id: &str) -> Result<Family, CoreError> {
        self.fetch_family(family_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Family", family_id))
    }

    pub async fn list_user_families(&self, user_id: &str) -> Result<Vec<Family>, CoreError> {
        let docs = self.store.run_query(&families_of(user_id)).await?;
        Ok(docs.iter().map(Family::from).collect())
    }

    pub async fn subscribe_user_families(
        &self,
        user_id: &str,
    ) -> Result<Subscription<Vec<Family>>, CoreError> {
        let feed = self.store.listen_query(&families_of(user_id)).await?;
        Ok(map_feed(feed, |docs| docs.iter().map(Family::from).collect()))
    }

    /// Live family document; `None` while it does not exist.
    pub async fn subscribe_family(
        &self,
        family_id: &str,
    ) -> Result<Subscription<Option<Family>>, CoreError> {
        let feed = self.store.listen_document(&family_path(family_id)).await?;
        Ok(map_feed(feed, |doc| doc.as_ref().map(Family::from)))
    }

    /// Hard delete. Owner-only by convention; the store does not enforce it.
    pub async fn delete_family(&self, family_id: &str) -> Result<(), CoreError> {
        self.store
            .commit(Write::delete(family_path(family_id)).into())
            .await?;
        info!(family_id, "family deleted");
        Ok(())
    }

    // ── Membership ───────────────────────────────────────────────────

    /// Read the family with a precondition pinned to the version read, so
    /// a write built from it fails with a conflict if anything changed.
    async fn read_pinned(&self, family_id: &str) -> Result<(Family, Precondition), CoreError> {
        let doc = self
            .store
            .get(&family_path(family_id))
            .await?
            .ok_or_else(|| CoreError::not_found("Family", family_id))?;
        let precondition = doc
            .update_time
            .map_or(Precondition::Exists(true), Precondition::UpdateTime);
        Ok((Family::from(&doc), precondition))
    }

    /// Remove the user's entry from `roles` (a field delete, not a null).
    /// The owner cannot be removed; ownership moves through
    /// [`transfer_ownership`](Self::transfer_ownership) and an owner leaving
    /// deletes the family.
    pub async fn remove_user_from_family(
        &self,
        family_id: &str,
        user_id: &str,
    ) -> Result<(), CoreError> {
        let (family, precondition) = self.read_pinned(family_id).await?;
        if is_owner(&family, user_id) {
            return Err(CoreError::validation(
                "the owner cannot be removed; transfer ownership or leave the family instead",
            ));
        }

        let write = Write::update(
            family_path(family_id),
            vec![(role_path(user_id), FieldValue::Delete)],
        )
        .with_precondition(precondition);
        self.store.commit(write.into()).await?;
        debug!(family_id, user_id, "member removed");
        Ok(())
    }

    /// Set one member's role. Ownership moves only through
    /// [`transfer_ownership`](Self::transfer_ownership), so the owner can
    /// be neither demoted nor joined by a second owner here.
    pub async fn update_member_role(
        &self,
        family_id: &str,
        user_id: &str,
        role: Role,
    ) -> Result<(), CoreError> {
        if role == Role::Owner {
            return Err(CoreError::validation(
                "use transfer_ownership to make someone the owner",
            ));
        }

        let (family, precondition) = self.read_pinned(family_id).await?;
        if is_owner(&family, user_id) {
            return Err(CoreError::validation(
                "the owner's role cannot be changed; transfer ownership first",
            ));
        }

        let write = Write::update(
            family_path(family_id),
            vec![(role_path(user_id), FieldValue::set(role.as_str()))],
        )
        .with_precondition(precondition);
        self.store.commit(write.into()).await?;
        Ok(())
    }

    /// Hand the family to `new_owner_id` and demote `previous_owner_id` to
    /// member, in one write. The write is conditioned on the document not
    /// having changed since it was read, so a concurrent transfer or
    /// membership change fails with a conflict instead of interleaving.
    pub async fn transfer_ownership(
        &self,
        family_id: &str,
        new_owner_id: &str,
        previous_owner_id: &str,
    ) -> Result<(), CoreError> {
        if new_owner_id == previous_owner_id {
            return Err(CoreError::validation("new owner is already the owner"));
        }

        let (family, precondition) = self.read_pinned(family_id).await?;

        if family.owner_id != previous_owner_id {
            return Err(CoreError::NotPermitted {
                action: "Transferring ownership".into(),
                required: Role::Owner,
            });
        }
        if !family.is_member(new_owner_id) {
            return Err(CoreError::validation(
                "ownership can only go to an existing member",
            ));
        }

        let write = Write::update(
            family_path(family_id),
            vec![
                (FieldPath::field("ownerId"), FieldValue::set(new_owner_id)),
                (role_path(new_owner_id), FieldValue::set(Role::Owner.as_str())),
                (
                    role_path(previous_owner_id),
                    FieldValue::set(Role::Member.as_str()),
                ),
            ],
        )
        .with_precondition(precondition);

        self.store.commit(write.into()).await?;
        info!(family_id, new_owner_id, previous_owner_id, "ownership transferred");
        Ok(())
    }

    /// Leave a family. The owner leaving deletes the family for everyone.
    pub async fn leave_family(
        &self,
        family_id: &str,
        user_id: &str,
    ) -> Result<LeaveOutcome, CoreError> {
        let family = self.require_family(family_id).await?;
        match family.role_of(user_id) {
            None => Ok(LeaveOutcome::NotAMember),
            Some(Role::Owner) => {
                self.delete_family(family_id).await?;
                Ok(LeaveOutcome::FamilyDeleted)
            }
            Some(_) => {
                self.remove_user_from_family(family_id, user_id).await?;
                Ok(LeaveOutcome::Left)
            }
        }
    }

    // ── Shared devices ───────────────────────────────────────────────

    pub async fn add_device_to_family(
        &self,
        family_id: &str,
        device_id: &str,
    ) -> Result<(), CoreError> {
        self.update_devices(family_id, FieldValue::ArrayUnion(vec![device_id.into()]))
            .await
    }

    pub async fn remove_device_from_family(
        &self,
        family_id: &str,
        device_id: &str,
    ) -> Result<(), CoreError> {
        self.update_devices(family_id, FieldValue::ArrayRemove(vec![device_id.into()]))
            .await
    }

    async fn update_devices(&self, family_id: &str, change: FieldValue) -> Result<(), CoreError> {
        self.store
            .commit(
                Write::update(
                    family_path(family_id),
                    vec![(FieldPath::field("devices"), change)],
                )
                .into(),
            )
            .await?;
        Ok(())
    }

    /// Live records of every device shared into the family, in the order
    /// of the family's `devices` array.
    ///
    /// Follows the family document; each change to its device list
    /// re-opens the device query. A deleted family or an empty list emits
    /// an empty list.
    pub async fn subscribe_family_devices(
        &self,
        family_id: &str,
    ) -> Result<Subscription<Vec<Device>>, CoreError> {
        let feed = self.store.listen_document(&family_path(family_id)).await?;
        let ids = map_feed(feed, |doc| {
            doc.as_ref()
                .map(|d| d.get_string_array("devices"))
                .unwrap_or_default()
        });

        let devices = self.devices.clone();
        switch_map(ids, move |ids: Arc<Vec<String>>| {
            let devices = devices.clone();
            async move { devices.subscribe_devices_by_ids(&ids).await }
        })
        .await
    }

    // ── Permissions ──────────────────────────────────────────────────

    /// Fail with `NotPermitted` unless `user_id` currently holds at least
    /// `required` in the family. Reads the family fresh every call.
    pub async fn require_role(
        &self,
        family_id: &str,
        user_id: &str,
        required: Role,
        action: &str,
    ) -> Result<Role, CoreError> {
        let family = self.require_family(family_id).await?;
        match family.role_of(user_id) {
            Some(role) if role.satisfies(required) => Ok(role),
            _ => Err(CoreError::NotPermitted {
                action: action.into(),
                required,
            }),
        }
    }

    /// Live answer to "does `user_id` hold at least `required`?". Flips as
    /// soon as the family document changes (demotion, removal, deletion).
    pub async fn watch_permission(
        &self,
        family_id: &str,
        user_id: &str,
        required: Role,
    ) -> Result<Subscription<bool>, CoreError> {
        let family = self.subscribe_family(family_id).await?;
        let user_id = user_id.to_owned();
        Ok(map_subscription(family, move |family| {
            family
                .as_ref()
                .is_some_and(|f| member_has_role(f.role_of(&user_id), required))
        }))
    }
}

impl std::fmt::Debug for FamilyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FamilyRegistry")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

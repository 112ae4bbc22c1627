// ── Device registry ──
//
// CRUD and live views over the `devices` collection. One-shot reads and
// writes surface store errors to the caller; live views log them and keep
// their last good snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::try_join_all;
use lookout_api::{
    Document, DocumentPath, DocumentStore, FieldPath, FieldValue, Filter, Query, Value, Write,
};
use tracing::debug;

use crate::error::CoreError;
use crate::model::{Device, DeviceHealth, DeviceUpdate, NewDevice, OwnerType};
use crate::stream::{Subscription, in_chunks, map_feed, merge_feeds};

pub(crate) const DEVICES: &str = "devices";

pub(crate) fn device_path(id: &str) -> DocumentPath {
    DocumentPath::new(DEVICES, id)
}

/// Trimmed, non-empty device name.
fn clean_name(name: &str) -> Result<String, CoreError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CoreError::validation("device name cannot be empty"));
    }
    Ok(trimmed.to_owned())
}

/// Devices owned by one principal.
fn owned_by(owner_type: OwnerType, owner_id: &str) -> Query {
    Query::collection(DEVICES)
        .where_eq("ownerType", owner_type.to_string())
        .where_eq("ownerId", owner_id)
}

#[derive(Clone)]
pub struct DeviceRegistry {
    store: Arc<dyn DocumentStore>,
}

impl DeviceRegistry {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Insert a device with server-assigned timestamps and return it as
    /// stored, generated ID included.
    pub async fn create_device(&self, device: NewDevice) -> Result<Device, CoreError> {
        let name = clean_name(&device.name)?;
        let path = self
            .store
            .add(
                DEVICES,
                vec![
                    (FieldPath::field("name"), FieldValue::set(name)),
                    (FieldPath::field("ownerId"), FieldValue::set(device.owner_id)),
                    (
                        FieldPath::field("ownerType"),
                        FieldValue::set(device.owner_type.to_string()),
                    ),
                    (
                        FieldPath::field("status"),
                        FieldValue::set(device.status.to_string()),
                    ),
                    (
                        FieldPath::field("lastActivityType"),
                        FieldValue::set(device.last_activity_type),
                    ),
                    (
                        FieldPath::field("registeredUsers"),
                        FieldValue::set(Vec::<Value>::new()),
                    ),
                    (FieldPath::field("createdAt"), FieldValue::ServerTimestamp),
                    (FieldPath::field("lastActivityAt"), FieldValue::ServerTimestamp),
                ],
            )
            .await?;
        debug!(device_id = %path.id, "device created");

        self.fetch_device(&path.id)
            .await?
            .ok_or_else(|| CoreError::not_found("Device", path.id))
    }

    /// Patch the given fields. `lastActivityAt` is always stamped.
    pub async fn update_device(&self, id: &str, update: DeviceUpdate) -> Result<(), CoreError> {
        let mut fields = Vec::with_capacity(4);
        if let Some(name) = update.name {
            fields.push((FieldPath::field("name"), FieldValue::set(clean_name(&name)?)));
        }
        if let Some(status) = update.status {
            fields.push((FieldPath::field("status"), FieldValue::set(status.to_string())));
        }
        if let Some(kind) = update.last_activity_type {
            fields.push((FieldPath::field("lastActivityType"), FieldValue::set(kind)));
        }
        fields.push((FieldPath::field("lastActivityAt"), FieldValue::ServerTimestamp));

        self.store
            .commit(Write::update(device_path(id), fields).into())
            .await?;
        Ok(())
    }

    pub async fn rename_device(&self, id: &str, name: &str) -> Result<(), CoreError> {
        self.update_device(
            id,
            DeviceUpdate {
                name: Some(name.to_owned()),
                ..DeviceUpdate::default()
            },
        )
        .await
    }

    pub async fn delete_device(&self, id: &str) -> Result<(), CoreError> {
        self.store.commit(Write::delete(device_path(id)).into()).await?;
        Ok(())
    }

    /// `Ok(None)` when the device does not exist.
    pub async fn fetch_device(&self, id: &str) -> Result<Option<Device>, CoreError> {
        let doc = self.store.get(&device_path(id)).await?;
        Ok(doc.as_ref().map(Device::from))
    }

    /// Live list of devices a user owns directly.
    pub async fn subscribe_user_devices(
        &self,
        user_id: &str,
    ) -> Result<Subscription<Vec<Device>>, CoreError> {
        self.subscribe_owned(OwnerType::User, user_id).await
    }

    /// Live list of devices whose owner is the family itself.
    ///
    /// Devices shared into a family by a member stay owned by that member;
    /// see `FamilyRegistry::subscribe_family_devices` for those.
    pub async fn subscribe_family_devices(
        &self,
        family_id: &str,
    ) -> Result<Subscription<Vec<Device>>, CoreError> {
        self.subscribe_owned(OwnerType::Family, family_id).await
    }

    async fn subscribe_owned(
        &self,
        owner_type: OwnerType,
        owner_id: &str,
    ) -> Result<Subscription<Vec<Device>>, CoreError> {
        let feed = self.store.listen_query(&owned_by(owner_type, owner_id)).await?;
        Ok(map_feed(feed, |docs| docs.iter().map(Device::from).collect()))
    }

    /// Live records for an explicit list of device IDs, in list order.
    ///
    /// IDs are queried in `IN`-sized chunks and merged. An ID without a
    /// document is left out rather than reported as an error: membership
    /// lists and device documents are not updated together.
    pub async fn subscribe_devices_by_ids(
        &self,
        ids: &[String],
    ) -> Result<Subscription<Vec<Device>>, CoreError> {
        let chunks = in_chunks(ids);
        let feeds = try_join_all(chunks.iter().map(|chunk| {
            let store = Arc::clone(&self.store);
            let query = Query::collection(DEVICES).filter(Filter::DocumentIdIn(chunk.clone()));
            async move { store.listen_query(&query).await }
        }))
        .await?;

        let order: Vec<String> = chunks.into_iter().flatten().collect();
        Ok(merge_feeds(feeds, move |parts| {
            let mut by_id: HashMap<&str, &Document> = parts
                .iter()
                .flat_map(|docs| docs.iter())
                .map(|doc| (doc.id.as_str(), doc))
                .collect();
            order
                .iter()
                .filter_map(|id| by_id.remove(id.as_str()))
                .map(Device::from)
                .collect()
        }))
    }

    /// Live health readings. An absent device reads as all zeros.
    pub async fn subscribe_device_health(
        &self,
        id: &str,
    ) -> Result<Subscription<DeviceHealth>, CoreError> {
        let feed = self.store.listen_document(&device_path(id)).await?;
        Ok(map_feed(feed, |doc| {
            doc.as_ref().map(DeviceHealth::from).unwrap_or_default()
        }))
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};
    use lookout_api::{ManualClock, MemoryStore};

    use super::*;
    use crate::model::DeviceStatus;

    fn registry() -> (DeviceRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap(),
        ));
        let store = MemoryStore::new(clock.clone());
        (DeviceRegistry::new(Arc::new(store)), clock)
    }

    fn porch(owner: &str) -> NewDevice {
        NewDevice {
            name: "  Porch  ".into(),
            owner_id: owner.into(),
            owner_type: OwnerType::User,
            status: DeviceStatus::Online,
            last_activity_type: "created".into(),
        }
    }

    #[tokio::test]
    async fn create_returns_hydrated_record() {
        let (devices, _) = registry();
        let device = devices.create_device(porch("u1")).await.unwrap();

        assert!(!device.id.is_empty());
        assert_eq!(device.name, "Porch");
        assert!(device.is_owned_by_user("u1"));
        assert_eq!(
            device.created_at,
            Some(Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap())
        );
        assert_eq!(device.created_at, device.last_activity_at);
    }

    #[tokio::test]
    async fn blank_names_never_reach_the_store() {
        let (devices, _) = registry();
        let mut blank = porch("u1");
        blank.name = "   ".into();
        assert!(matches!(
            devices.create_device(blank).await,
            Err(CoreError::ValidationFailed { .. })
        ));

        let device = devices.create_device(porch("u1")).await.unwrap();
        assert!(devices.rename_device(&device.id, " \t").await.is_err());
        assert_eq!(devices.fetch_device(&device.id).await.unwrap().unwrap().name, "Porch");
    }

    #[tokio::test]
    async fn rename_trims_and_stamps_activity() {
        let (devices, clock) = registry();
        let device = devices.create_device(porch("u1")).await.unwrap();

        clock.advance(chrono::Duration::minutes(5));
        devices.rename_device(&device.id, "  Gate ").await.unwrap();

        let renamed = devices.fetch_device(&device.id).await.unwrap().unwrap();
        assert_eq!(renamed.name, "Gate");
        assert_eq!(
            renamed.last_activity_at,
            Some(Utc.with_ymd_and_hms(2025, 6, 1, 8, 5, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn fetch_missing_is_none_and_delete_removes() {
        let (devices, _) = registry();
        assert!(devices.fetch_device("nope").await.unwrap().is_none());

        let device = devices.create_device(porch("u1")).await.unwrap();
        devices.delete_device(&device.id).await.unwrap();
        assert!(devices.fetch_device(&device.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn user_devices_emit_full_list() {
        let (devices, _) = registry();
        let mut sub = devices.subscribe_user_devices("u1").await.unwrap();
        assert!(sub.current().is_empty());

        devices.create_device(porch("u1")).await.unwrap();
        let list = sub.changed().await.unwrap();
        assert_eq!(list.len(), 1);

        devices.create_device(porch("u2")).await.unwrap();
        devices.create_device(porch("u1")).await.unwrap();
        let list = sub.wait_for(|l| l.len() == 2).await.unwrap();
        assert!(list.iter().all(|d| d.is_owned_by_user("u1")));
    }

    #[tokio::test]
    async fn by_ids_keeps_list_order_across_chunks() {
        let (devices, _) = registry();
        let mut ids = Vec::new();
        for _ in 0..12 {
            ids.push(devices.create_device(porch("u1")).await.unwrap().id);
        }
        ids.reverse();
        ids.insert(3, "missing".into());

        let sub = devices.subscribe_devices_by_ids(&ids).await.unwrap();
        let got: Vec<&str> = sub.current().iter().map(|d| d.id.as_str()).collect();
        let want: Vec<&str> = ids.iter().map(String::as_str).filter(|id| *id != "missing").collect();
        assert_eq!(got, want);

        let empty = devices.subscribe_devices_by_ids(&[]).await.unwrap();
        assert!(empty.current().is_empty());
    }

    #[tokio::test]
    async fn health_defaults_when_absent() {
        let (devices, _) = registry();
        let health = devices.subscribe_device_health("ghost").await.unwrap();
        assert_eq!(**health.current(), DeviceHealth::default());
    }
}

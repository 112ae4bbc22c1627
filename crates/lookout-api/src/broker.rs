// ── Message broker contract ──
//
// Publish-only, topic-per-device-capability. Delivery is best effort:
// a publish while disconnected is dropped with a warning, never queued.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Error;

/// What happened to a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the broker connection.
    Sent,
    /// Discarded because the broker was unavailable.
    Dropped,
}

#[async_trait]
pub trait MessageBroker: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Fire-and-forget publish. No broker acknowledgement is awaited.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<Delivery, Error>;
}

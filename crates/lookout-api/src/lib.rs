// lookout-api: transport layer for the LookOut cloud.
//
// Three external services sit behind capability traits:
// a Firestore-shaped document store (`DocumentStore`), a publish-only
// MQTT broker (`MessageBroker`) and an email/password identity provider
// (`IdentityProvider`). Concrete adapters talk to the real services; the
// in-memory implementations honour the same contracts.

pub mod auth;
pub mod broker;
pub mod clock;
pub mod document;
pub mod error;
pub mod firestore;
pub mod memory;
pub mod mqtt;
pub mod query;
pub mod store;
pub mod transport;
pub mod write;

pub use auth::{
    AccountInfo, AuthClient, AuthConfig, AuthTokens, IdentityProvider, StaticToken, TokenManager,
    TokenSource,
};
pub use broker::{Delivery, MessageBroker};
pub use clock::{Clock, ManualClock, SystemClock};
pub use document::{Document, DocumentPath, FieldPath, Value};
pub use error::Error;
pub use firestore::{FirestoreClient, FirestoreConfig};
pub use memory::{MemoryBroker, MemoryIdentity, MemoryStore, PublishedMessage};
pub use mqtt::{BrokerState, MqttClient, MqttConfig, ReconnectConfig};
pub use query::{Direction, Filter, IN_FILTER_LIMIT, Query};
pub use store::{DocumentStore, Feed};
pub use transport::{TlsMode, TransportConfig};
pub use write::{FieldValue, Precondition, Write, WriteBatch, WriteKind};

// lookout-core: device, family and event-log services between lookout-api and clients.

pub mod auth;
pub mod claim;
pub mod command;
pub mod config;
pub mod convert;
pub mod devices;
pub mod error;
pub mod family;
pub mod logs;
pub mod model;
pub mod permission;
pub mod registration;
pub mod session;
pub mod status;
pub mod stream;
pub mod users;

// ── Primary re-exports ──────────────────────────────────────────────
pub use auth::Authenticator;
pub use claim::{ClaimFlow, ClaimOutcome};
pub use command::DeviceCommand;
pub use config::{
    AuthSettings, BrokerSettings, SessionConfig, SessionOptions, SignInConfig, StoreSettings,
    TlsVerification,
};
pub use devices::DeviceRegistry;
pub use error::CoreError;
pub use family::{FamilyRegistry, LeaveOutcome, Redemption};
pub use logs::{
    BulkDeleteReport, LogAggregator, LogsSnapshot, LogsView, RangeKey, RangeMode, TimeRange,
};
pub use permission::{has_required_role, member_has_role};
pub use registration::{RegistrationFlow, RegistrationState};
pub use session::{Backends, Session};
pub use status::{OperationStatus, StatusTracker};
pub use stream::{Subscription, SubscriptionStream};
pub use users::UserDirectory;

// Re-export model types at the crate root for ergonomics.
pub use model::{
    Device, DeviceHealth, DeviceStatus, DeviceUpdate, Family, Invite, Log, LogPresentation,
    LogType, Member, NewDevice, OwnerType, ResolvedLog, Role, UserProfile,
};

// Delivery outcome of device commands.
pub use lookout_api::{AccountInfo, AuthTokens, Delivery};

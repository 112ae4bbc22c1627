// ── Domain model ──
//
// Canonical representations of LookOut entities. Documents from the store
// are converted into these in `convert.rs`; nothing here touches I/O.

pub mod device;
pub mod family;
pub mod log;
pub mod user;

pub use device::{Device, DeviceHealth, DeviceStatus, DeviceUpdate, NewDevice, OwnerType};
pub use family::{Family, Invite, Member, Role};
pub use log::{Log, LogPresentation, LogType, ResolvedLog};
pub use user::UserProfile;

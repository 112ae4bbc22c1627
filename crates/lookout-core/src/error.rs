// ── Core error types ──
//
// Domain errors from lookout-core. Consumers never see HTTP status codes
// or Firestore wire errors directly: the `From<lookout_api::Error>` impl
// translates transport failures into domain-appropriate variants.

use thiserror::Error;

use crate::model::Role;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach {service}: {reason}")]
    ConnectionFailed { service: String, reason: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Session closed")]
    SessionClosed,

    // ── Identity errors ──────────────────────────────────────────────
    /// The identity provider refused the credentials or the stored
    /// sign-in. The message is fit to show as is.
    #[error("{message}")]
    AuthenticationFailed { message: String },

    #[error("The email address {email} has not been verified yet")]
    EmailNotVerified { email: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    #[error("Invalid invite code")]
    InvalidInvite,

    #[error("This invite has expired")]
    InviteExpired,

    #[error("No account found for that username.")]
    UnknownUsername { username: String },

    #[error("Already a member of family {family_id}")]
    AlreadyMember { family_id: String },

    #[error("Device {device_id} is already claimed by another account")]
    AlreadyClaimed { device_id: String },

    #[error("Concurrent modification: {message}")]
    Conflict { message: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("{action} requires the {required} role")]
    NotPermitted { action: String, required: Role },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Operation failed: {message}")]
    OperationFailed { message: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// Firestore status string (e.g. `"PERMISSION_DENIED"`).
        code: Option<String>,
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            message: message.into(),
        }
    }

    pub(crate) fn not_found(entity_type: &str, identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            identifier: identifier.into(),
        }
    }

    /// Expected absence (bad invite code, unknown document, unknown user).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::InvalidInvite | Self::UnknownUsername { .. }
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<lookout_api::Error> for CoreError {
    fn from(err: lookout_api::Error) -> Self {
        use lookout_api::Error as Api;

        match err {
            Api::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        service: e
                            .url()
                            .map_or_else(|| "document store".into(), |u| u.origin().ascii_serialization()),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        code: None,
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Tls(reason) => CoreError::ConnectionFailed {
                service: "document store".into(),
                reason: format!("TLS error: {reason}"),
            },
            Api::NotFound { path } => CoreError::not_found("Document", path),
            Api::AlreadyExists { path } => CoreError::Conflict {
                message: format!("{path} already exists"),
            },
            Api::PreconditionFailed { path } => CoreError::Conflict {
                message: format!("{path} changed while the write was in flight"),
            },
            Api::InvalidRequest(message) => CoreError::ValidationFailed { message },
            Api::Firestore {
                status,
                code,
                message,
            } => CoreError::Api {
                message,
                code,
                status: Some(status),
            },
            Api::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                service: "message broker".into(),
                reason,
            },
            Api::MqttRefused(code) => CoreError::ConnectionFailed {
                service: "message broker".into(),
                reason: format!("CONNECT refused with return code {code}"),
            },
            Api::MqttProtocol(reason) => CoreError::ConnectionFailed {
                service: "message broker".into(),
                reason,
            },
            Api::Authentication { code: _, message } => CoreError::AuthenticationFailed { message },
            Api::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}

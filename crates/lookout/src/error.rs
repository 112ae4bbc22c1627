//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use lookout_config::ConfigError;
use lookout_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const PERMISSION: i32 = 5;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
    pub const PARTIAL: i32 = 9;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach {service}")]
    #[diagnostic(
        code(lookout::connection_failed),
        help(
            "Check your network connection and the profile's endpoint.\n\
             Reason: {reason}"
        )
    )]
    ConnectionFailed { service: String, reason: String },

    #[error("Request timed out")]
    #[diagnostic(
        code(lookout::timeout),
        help("Increase timeout with --timeout or the profile's `timeout` setting.")
    )]
    Timeout,

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(lookout::auth_failed),
        help(
            "Your sign-in may have expired.\n\
             Run: lookout account login <EMAIL>"
        )
    )]
    AuthFailed { message: String },

    #[error("The email address {email} has not been verified yet")]
    #[diagnostic(
        code(lookout::email_not_verified),
        help(
            "Follow the link in the verification email, then sign in again.\n\
             No email? Run: lookout account verify --resend"
        )
    )]
    EmailNotVerified { email: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(lookout::not_found),
        help("Run: lookout {list_command} to see what is available")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    #[error("{message}")]
    #[diagnostic(code(lookout::invite))]
    Invite { message: String },

    #[error("{message}")]
    #[diagnostic(code(lookout::conflict))]
    Conflict { message: String },

    #[error("{action} requires the {required} role")]
    #[diagnostic(
        code(lookout::not_permitted),
        help("Ask the family owner to change your role.")
    )]
    NotPermitted { action: String, required: String },

    // ── Partial results ──────────────────────────────────────────────
    #[error("{failed} of {total} deletions failed")]
    #[diagnostic(
        code(lookout::partial_failure),
        help("The other entries were deleted. Re-run with -v for details.")
    )]
    PartialFailure { failed: usize, total: usize },

    // ── API ──────────────────────────────────────────────────────────
    #[error("API error ({code}): {message}")]
    #[diagnostic(code(lookout::api_error))]
    ApiError { code: String, message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(lookout::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(lookout::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: lookout config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("Configuration file not found")]
    #[diagnostic(
        code(lookout::no_config),
        help(
            "Create one with: lookout config init\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Configuration error: {0}")]
    #[diagnostic(code(lookout::config))]
    Config(#[from] ConfigError),

    // ── Interactive ──────────────────────────────────────────────────
    #[error("Destructive operation '{action}' requires confirmation")]
    #[diagnostic(
        code(lookout::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Output serialization failed: {0}")]
    #[diagnostic(code(lookout::json))]
    Json(#[from] serde_json::Error),

    #[error("Output serialization failed: {0}")]
    #[diagnostic(code(lookout::yaml))]
    Yaml(#[from] serde_yaml::Error),

    #[error("Internal error: {0}")]
    #[diagnostic(code(lookout::internal))]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::EmailNotVerified { .. } => exit_code::AUTH,
            Self::NotFound { .. } | Self::Invite { .. } => exit_code::NOT_FOUND,
            Self::Conflict { .. } => exit_code::CONFLICT,
            Self::NotPermitted { .. } => exit_code::PERMISSION,
            Self::Timeout => exit_code::TIMEOUT,
            Self::PartialFailure { .. } => exit_code::PARTIAL,
            Self::Validation { .. }
            | Self::NonInteractiveRequiresYes { .. }
            | Self::ProfileNotFound { .. }
            | Self::NoConfig { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { service, reason } => {
                CliError::ConnectionFailed { service, reason }
            }

            CoreError::Timeout => CliError::Timeout,

            CoreError::AuthenticationFailed { message } => CliError::AuthFailed { message },

            CoreError::EmailNotVerified { email } => CliError::EmailNotVerified { email },

            CoreError::SessionClosed => CliError::ConnectionFailed {
                service: "session".into(),
                reason: "the session was closed".into(),
            },

            CoreError::NotFound {
                entity_type,
                identifier,
            } => {
                let list_command = match entity_type.as_str() {
                    "Family" => "families list",
                    "Log" => "logs list",
                    _ => "devices list",
                };
                CliError::NotFound {
                    resource_type: entity_type,
                    identifier,
                    list_command: list_command.into(),
                }
            }

            CoreError::UnknownUsername { username } => CliError::NotFound {
                resource_type: "Username".into(),
                identifier: username,
                list_command: "account show".into(),
            },

            err @ (CoreError::InvalidInvite | CoreError::InviteExpired) => CliError::Invite {
                message: err.to_string(),
            },

            err @ (CoreError::AlreadyMember { .. }
            | CoreError::AlreadyClaimed { .. }
            | CoreError::Conflict { .. }) => CliError::Conflict {
                message: err.to_string(),
            },

            CoreError::NotPermitted { action, required } => CliError::NotPermitted {
                action,
                required: required.to_string(),
            },

            CoreError::ValidationFailed { message } => CliError::Validation {
                field: "input".into(),
                reason: message,
            },

            CoreError::OperationFailed { message } => CliError::ApiError {
                code: "operation_failed".into(),
                message,
            },

            CoreError::Api {
                message,
                code,
                status,
            } => {
                if matches!(status, Some(401 | 403)) {
                    CliError::AuthFailed { message }
                } else {
                    CliError::ApiError {
                        code: code.unwrap_or_default(),
                        message,
                    }
                }
            }

            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },

            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

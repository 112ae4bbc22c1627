use thiserror::Error;

/// Top-level error type for the `lookout-api` crate.
///
/// Covers every failure mode of the backing services: HTTP transport,
/// Firestore status errors, write preconditions, identity provider
/// rejections, and the MQTT-over-WebSocket link. `lookout-core` maps these into domain errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Document store ──────────────────────────────────────────────
    /// The addressed document does not exist (update or exists-precondition).
    #[error("Document not found: {path}")]
    NotFound { path: String },

    /// A create collided with an existing document.
    #[error("Document already exists: {path}")]
    AlreadyExists { path: String },

    /// A write precondition (update time) did not hold.
    #[error("Precondition failed: {path}")]
    PreconditionFailed { path: String },

    /// The query or write is malformed (e.g. an `IN` filter over the limit).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Structured error returned by the Firestore REST API.
    #[error("Firestore error (HTTP {status}): {message}")]
    Firestore {
        status: u16,
        code: Option<String>,
        message: String,
    },

    // ── Identity ────────────────────────────────────────────────────
    /// The identity provider rejected a sign-in, sign-up or token
    /// refresh. `code` is the provider's code, e.g. `EMAIL_EXISTS`.
    #[error("Authentication failed: {message}")]
    Authentication { code: String, message: String },

    // ── Broker ──────────────────────────────────────────────────────
    /// WebSocket connection to the broker failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// The broker rejected the CONNECT packet.
    #[error("MQTT connection refused (return code {0})")]
    MqttRefused(u8),

    /// Malformed or unexpected MQTT packet.
    #[error("MQTT protocol error: {0}")]
    MqttProtocol(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::WebSocketConnect(_) => true,
            Self::Firestore { status, .. } => matches!(status, 429 | 503),
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Firestore { status: 404, .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if a write lost a race against another writer:
    /// the document vanished, already existed, or changed underneath us.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::AlreadyExists { .. } | Self::PreconditionFailed { .. }
        )
    }
}

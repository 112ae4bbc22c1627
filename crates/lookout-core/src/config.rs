// ── Runtime session configuration ──
//
// Describes *how* to reach the LookOut backends and who the session acts
// for. Carries credentials and tuning but never touches disk: the CLI
// builds a `SessionConfig` (via lookout-config) and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

/// TLS verification strategy for both backends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// Bundled webpki roots.
    #[default]
    SystemDefaults,
    /// Additionally trust a CA certificate file.
    CustomCa(PathBuf),
}

/// Identity provider settings.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Web API key of the Firebase project.
    pub api_key: SecretString,
    pub identity_endpoint: Url,
    pub token_endpoint: Url,
    /// Stored sign-in. When present the session keeps its ID token fresh
    /// from it and ignores `StoreSettings::id_token`.
    pub refresh_token: Option<SecretString>,
}

/// Document store settings.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub project_id: String,
    pub database: String,
    /// Firestore API root; an emulator URL for local runs.
    pub endpoint: Url,
    /// Fixed Firebase ID token, used when no refresh token is stored.
    pub id_token: Option<SecretString>,
    /// How often live views re-read the store.
    pub poll_interval: Duration,
}

/// Message broker settings.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// `wss://host:port/mqtt`
    pub url: Url,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub client_id: Option<String>,
    pub keep_alive: Duration,
}

/// Behavioural knobs shared by every backend.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Lifetime of a freshly issued family invite.
    pub invite_ttl: Duration,
    /// How long a fingerprint registration waits for the device.
    pub registration_timeout: Duration,
    /// How long a finished claim status stays visible.
    pub status_dismiss: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            invite_ttl: Duration::from_secs(60 * 60),
            registration_timeout: Duration::from_secs(120),
            status_dismiss: Duration::from_secs(2),
        }
    }
}

/// Everything `Session::connect` needs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// The authenticated principal every operation acts for.
    pub user_id: String,
    pub store: StoreSettings,
    /// `None` authenticates with the fixed `store.id_token`, if any.
    pub auth: Option<AuthSettings>,
    /// `None` runs without a broker: device commands are dropped.
    pub broker: Option<BrokerSettings>,
    pub tls: TlsVerification,
    /// HTTP request timeout.
    pub timeout: Duration,
    pub options: SessionOptions,
}

/// What `Authenticator::connect` needs: no principal yet, and the store is
/// reached without credentials for username lookups.
#[derive(Debug, Clone)]
pub struct SignInConfig {
    pub auth: AuthSettings,
    pub store: StoreSettings,
    pub tls: TlsVerification,
    /// HTTP request timeout.
    pub timeout: Duration,
    /// How long a finished sign-in status stays visible.
    pub status_dismiss: Duration,
}

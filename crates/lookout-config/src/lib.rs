//! Shared configuration for LookOut tools.
//!
//! TOML profiles, secret resolution (env + keyring + plaintext), and
//! translation to `lookout_core::SessionConfig` and
//! `lookout_core::SignInConfig`. The CLI layers its flag overrides on top.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use lookout_core::{
    AuthSettings, BrokerSettings, SessionConfig, SessionOptions, SignInConfig, StoreSettings,
    TlsVerification,
};

/// Keyring service name under which secrets are stored.
pub const KEYRING_SERVICE: &str = "lookout";

const DEFAULT_ENDPOINT: &str = "https://firestore.googleapis.com";
const DEFAULT_IDENTITY_ENDPOINT: &str = "https://identitytoolkit.googleapis.com";
const DEFAULT_TOKEN_ENDPOINT: &str = "https://securetoken.googleapis.com";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{profile}' not found")]
    UnknownProfile { profile: String },

    #[error("no profile selected and no default_profile configured")]
    NoProfile,

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named on the command line.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Look up `name`, or the default profile when `name` is `None`.
    pub fn profile<'a>(&'a self, name: Option<&'a str>) -> Result<(&'a str, &'a Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .ok_or(ConfigError::NoProfile)?;
        self.profiles
            .get(name)
            .map(|profile| (name, profile))
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.into(),
            })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// HTTP request timeout, e.g. `"30s"`.
    #[serde(default = "default_timeout")]
    pub timeout: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> String {
    "30s".into()
}

/// A named account + backend profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Auth UID every operation acts for. Set by `account login`.
    #[serde(default)]
    pub user_id: String,

    /// Email of the signed-in account, for display.
    pub email: Option<String>,

    /// Firebase project ID.
    pub project_id: String,

    /// Firestore database ID. Default: `(default)`.
    pub database: Option<String>,

    /// Firestore API root; set to an emulator URL for local runs.
    pub endpoint: Option<String>,

    /// Web API key of the Firebase project. Enables sign-in.
    pub api_key: Option<String>,

    /// Identity Toolkit root; an Auth emulator URL for local runs.
    pub identity_endpoint: Option<String>,

    /// Secure Token root; an Auth emulator URL for local runs.
    pub token_endpoint: Option<String>,

    /// Refresh token of a stored sign-in (plaintext, prefer keyring).
    pub refresh_token: Option<String>,

    /// Environment variable holding the refresh token.
    pub refresh_token_env: Option<String>,

    /// Fixed ID token (plaintext, prefer keyring or env var). Ignored
    /// while a refresh token is stored.
    pub id_token: Option<String>,

    /// Environment variable holding the ID token.
    pub id_token_env: Option<String>,

    /// Broker WebSocket URL, e.g. `"wss://broker.example.com:8884/mqtt"`.
    pub broker_url: Option<String>,

    pub broker_username: Option<String>,

    /// Broker password (plaintext, prefer keyring or env var).
    pub broker_password: Option<String>,

    /// Environment variable holding the broker password.
    pub broker_password_env: Option<String>,

    pub broker_client_id: Option<String>,

    /// MQTT keep-alive, e.g. `"30s"`.
    pub keep_alive: Option<String>,

    /// How often live views re-read the store, e.g. `"5s"`.
    pub poll_interval: Option<String>,

    /// Extra CA certificate (PEM).
    pub ca_cert: Option<PathBuf>,

    /// Overrides `defaults.timeout`.
    pub timeout: Option<String>,

    pub invite_ttl: Option<String>,
    pub registration_timeout: Option<String>,
    pub status_dismiss: Option<String>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "lookout", "lookout").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("lookout");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file is not an error.
///
/// Environment keys use `__` to nest, e.g.
/// `LOOKOUT_PROFILES__HOME__USER_ID`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("LOOKOUT_").split("__"));

    let config: Config = figment.extract()?;
    debug!(path = %path.display(), profiles = config.profiles.len(), "config loaded");
    Ok(config)
}

/// Load config, returning a default if it cannot be read.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Secret resolution ───────────────────────────────────────────────

/// Which secret a keyring entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    IdToken,
    RefreshToken,
    BrokerPassword,
}

impl SecretKind {
    fn keyring_user(self, profile_name: &str) -> String {
        match self {
            Self::IdToken => format!("{profile_name}/id-token"),
            Self::RefreshToken => format!("{profile_name}/refresh-token"),
            Self::BrokerPassword => format!("{profile_name}/broker-password"),
        }
    }

    fn default_env(self) -> &'static str {
        match self {
            Self::IdToken => "LOOKOUT_ID_TOKEN",
            Self::RefreshToken => "LOOKOUT_REFRESH_TOKEN",
            Self::BrokerPassword => "LOOKOUT_BROKER_PASSWORD",
        }
    }
}

/// Store a secret in the system keyring for `profile_name`.
pub fn store_secret(profile_name: &str, kind: SecretKind, value: &str) -> Result<(), ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &kind.keyring_user(profile_name))?;
    entry.set_password(value)?;
    Ok(())
}

/// Remove a secret from the system keyring. Absent entries are fine.
pub fn delete_secret(profile_name: &str, kind: SecretKind) -> Result<(), ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &kind.keyring_user(profile_name))?;
    match entry.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn keyring_lookup(user: &str) -> Option<String> {
    keyring::Entry::new(KEYRING_SERVICE, user)
        .ok()
        .and_then(|entry| entry.get_password().ok())
}

/// Resolve a secret: env var, then keyring, then plaintext in the profile.
/// `None` when none of them has it.
pub fn resolve_secret(profile: &Profile, profile_name: &str, kind: SecretKind) -> Option<SecretString> {
    resolve_secret_with(
        profile,
        profile_name,
        kind,
        |name| std::env::var(name).ok(),
        keyring_lookup,
    )
}

fn resolve_secret_with(
    profile: &Profile,
    profile_name: &str,
    kind: SecretKind,
    env: impl Fn(&str) -> Option<String>,
    keyring: impl Fn(&str) -> Option<String>,
) -> Option<SecretString> {
    let (env_name, plaintext) = match kind {
        SecretKind::IdToken => (profile.id_token_env.as_deref(), profile.id_token.as_ref()),
        SecretKind::RefreshToken => (
            profile.refresh_token_env.as_deref(),
            profile.refresh_token.as_ref(),
        ),
        SecretKind::BrokerPassword => (
            profile.broker_password_env.as_deref(),
            profile.broker_password.as_ref(),
        ),
    };

    // 1. Named env var, falling back to the well-known one
    if let Some(value) = env(env_name.unwrap_or(kind.default_env())) {
        return Some(SecretString::from(value));
    }

    // 2. System keyring
    if let Some(value) = keyring(&kind.keyring_user(profile_name)) {
        return Some(SecretString::from(value));
    }

    // 3. Plaintext in config
    plaintext.map(|value| SecretString::from(value.clone()))
}

// ── Translation ─────────────────────────────────────────────────────

/// Parse a human-readable duration (`"90s"`, `"2m"`, `"1h 30m"`).
pub fn parse_duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("'{value}' is not a duration: {e}"),
    })
}

fn duration_or(field: &str, value: Option<&str>, default: Duration) -> Result<Duration, ConfigError> {
    value.map_or(Ok(default), |v| parse_duration(field, v))
}

fn parse_url(field: &str, value: &str) -> Result<Url, ConfigError> {
    value.parse().map_err(|_| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL: {value}"),
    })
}

/// Secrets resolved for one profile.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub id_token: Option<SecretString>,
    pub refresh_token: Option<SecretString>,
    pub broker_password: Option<SecretString>,
}

impl Credentials {
    /// Resolve every secret the profile may use.
    pub fn resolve(profile: &Profile, profile_name: &str) -> Self {
        Self {
            id_token: resolve_secret(profile, profile_name, SecretKind::IdToken),
            refresh_token: resolve_secret(profile, profile_name, SecretKind::RefreshToken),
            broker_password: resolve_secret(profile, profile_name, SecretKind::BrokerPassword),
        }
    }
}

/// Build a `SessionConfig` from a profile, with no command-line overrides.
pub fn profile_to_session_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<SessionConfig, ConfigError> {
    build_session_config(profile, defaults, Credentials::resolve(profile, profile_name))
}

/// Build the config `account login` and `account signup` run on. Needs an
/// API key and a project, not a signed-in user.
pub fn profile_to_sign_in_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<SignInConfig, ConfigError> {
    let auth = build_auth_settings(profile, None)?.ok_or_else(|| ConfigError::Validation {
        field: "api_key".into(),
        reason: "required to sign in".into(),
    })?;
    let store = build_store_settings(profile, None)?;
    Ok(SignInConfig {
        auth,
        store,
        tls: build_tls(profile),
        timeout: build_timeout(profile, defaults)?,
        status_dismiss: duration_or(
            "status_dismiss",
            profile.status_dismiss.as_deref(),
            SessionOptions::default().status_dismiss,
        )?,
    })
}

fn require(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: field.into(),
            reason: "must not be empty".into(),
        });
    }
    Ok(())
}

fn build_store_settings(
    profile: &Profile,
    id_token: Option<SecretString>,
) -> Result<StoreSettings, ConfigError> {
    require("project_id", &profile.project_id)?;
    Ok(StoreSettings {
        project_id: profile.project_id.clone(),
        database: profile
            .database
            .clone()
            .unwrap_or_else(|| "(default)".into()),
        endpoint: parse_url(
            "endpoint",
            profile.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT),
        )?,
        id_token,
        poll_interval: duration_or(
            "poll_interval",
            profile.poll_interval.as_deref(),
            Duration::from_secs(5),
        )?,
    })
}

/// `None` when the profile has no API key. A stored sign-in without one
/// could never be refreshed, so that is rejected.
fn build_auth_settings(
    profile: &Profile,
    refresh_token: Option<SecretString>,
) -> Result<Option<AuthSettings>, ConfigError> {
    let Some(api_key) = profile.api_key.as_deref().filter(|key| !key.trim().is_empty()) else {
        if refresh_token.is_some() {
            return Err(ConfigError::Validation {
                field: "api_key".into(),
                reason: "required to use the stored sign-in".into(),
            });
        }
        return Ok(None);
    };
    Ok(Some(AuthSettings {
        api_key: SecretString::from(api_key.to_owned()),
        identity_endpoint: parse_url(
            "identity_endpoint",
            profile
                .identity_endpoint
                .as_deref()
                .unwrap_or(DEFAULT_IDENTITY_ENDPOINT),
        )?,
        token_endpoint: parse_url(
            "token_endpoint",
            profile
                .token_endpoint
                .as_deref()
                .unwrap_or(DEFAULT_TOKEN_ENDPOINT),
        )?,
        refresh_token,
    }))
}

fn build_tls(profile: &Profile) -> TlsVerification {
    profile
        .ca_cert
        .clone()
        .map_or(TlsVerification::SystemDefaults, TlsVerification::CustomCa)
}

fn build_timeout(profile: &Profile, defaults: &Defaults) -> Result<Duration, ConfigError> {
    parse_duration(
        "timeout",
        profile.timeout.as_deref().unwrap_or(&defaults.timeout),
    )
}

fn build_session_config(
    profile: &Profile,
    defaults: &Defaults,
    credentials: Credentials,
) -> Result<SessionConfig, ConfigError> {
    let Credentials {
        id_token,
        refresh_token,
        broker_password,
    } = credentials;

    require("user_id", &profile.user_id)?;
    let store = build_store_settings(profile, id_token)?;
    let auth = build_auth_settings(profile, refresh_token)?;

    let broker = match profile.broker_url.as_deref() {
        Some(url) => Some(BrokerSettings {
            url: parse_url("broker_url", url)?,
            username: profile.broker_username.clone(),
            password: broker_password,
            client_id: profile.broker_client_id.clone(),
            keep_alive: duration_or(
                "keep_alive",
                profile.keep_alive.as_deref(),
                Duration::from_secs(30),
            )?,
        }),
        None => None,
    };

    let tls = build_tls(profile);
    let timeout = build_timeout(profile, defaults)?;

    let base = SessionOptions::default();
    let options = SessionOptions {
        invite_ttl: duration_or("invite_ttl", profile.invite_ttl.as_deref(), base.invite_ttl)?,
        registration_timeout: duration_or(
            "registration_timeout",
            profile.registration_timeout.as_deref(),
            base.registration_timeout,
        )?,
        status_dismiss: duration_or(
            "status_dismiss",
            profile.status_dismiss.as_deref(),
            base.status_dismiss,
        )?,
    };

    Ok(SessionConfig {
        user_id: profile.user_id.clone(),
        store,
        auth,
        broker,
        tls,
        timeout,
        options,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    const SAMPLE: &str = r#"
default_profile = "home"

[defaults]
timeout = "45s"

[profiles.home]
user_id = "uid-1"
project_id = "lookout-prod"
broker_url = "wss://broker.example.com:8884/mqtt"
broker_username = "app"
broker_password = "plain"
registration_timeout = "90s"

[profiles.emulator]
user_id = "uid-2"
project_id = "demo"
endpoint = "http://127.0.0.1:8080"

[profiles.signed-in]
user_id = "uid-3"
project_id = "lookout-prod"
api_key = "web-key"
token_endpoint = "http://127.0.0.1:9099/securetoken.googleapis.com"
"#;

    fn sample() -> Config {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        load_config_from(&path).unwrap()
    }

    #[test]
    fn loads_profiles_and_defaults() {
        let config = sample();
        assert_eq!(config.profiles.len(), 3);
        assert_eq!(config.defaults.timeout, "45s");
        assert_eq!(config.defaults.output, "table");

        let (name, profile) = config.profile(None).unwrap();
        assert_eq!(name, "home");
        assert_eq!(profile.project_id, "lookout-prod");
        assert!(matches!(
            config.profile(Some("nope")),
            Err(ConfigError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.default_profile.as_deref(), Some("default"));
        assert!(config.profiles.is_empty());
    }

    #[test]
    fn save_then_load_keeps_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        save_config_to(&sample(), &path).unwrap();
        let reloaded = load_config_from(&path).unwrap();
        assert_eq!(
            reloaded.profiles["emulator"].endpoint.as_deref(),
            Some("http://127.0.0.1:8080")
        );
    }

    #[test]
    fn session_config_from_profile() {
        let config = sample();
        let (_, profile) = config.profile(Some("home")).unwrap();
        let credentials = Credentials {
            broker_password: Some(SecretString::from("pw".to_owned())),
            ..Credentials::default()
        };
        let session = build_session_config(profile, &config.defaults, credentials).unwrap();

        assert_eq!(session.user_id, "uid-1");
        assert_eq!(session.store.database, "(default)");
        assert_eq!(session.store.endpoint.as_str(), "https://firestore.googleapis.com/");
        assert_eq!(session.timeout, Duration::from_secs(45));
        assert_eq!(session.options.registration_timeout, Duration::from_secs(90));
        assert_eq!(session.options.invite_ttl, Duration::from_secs(3600));

        let broker = session.broker.unwrap();
        assert_eq!(broker.username.as_deref(), Some("app"));
        assert_eq!(broker.keep_alive, Duration::from_secs(30));
        assert_eq!(broker.password.unwrap().expose_secret(), "pw");

        let (_, emulator) = config.profile(Some("emulator")).unwrap();
        let session =
            build_session_config(emulator, &config.defaults, Credentials::default()).unwrap();
        assert!(session.broker.is_none());
        assert!(session.auth.is_none());
    }

    #[test]
    fn bad_values_name_their_field() {
        let profile = Profile {
            user_id: "u".into(),
            project_id: "p".into(),
            invite_ttl: Some("soon".into()),
            ..Profile::default()
        };
        let err = build_session_config(&profile, &Defaults::default(), Credentials::default())
            .unwrap_err();
        assert!(err.to_string().contains("invite_ttl"), "{err}");

        let profile = Profile {
            project_id: "p".into(),
            ..Profile::default()
        };
        assert!(
            build_session_config(&profile, &Defaults::default(), Credentials::default()).is_err()
        );
    }

    #[test]
    fn secret_precedence_env_then_keyring_then_plaintext() {
        let profile = Profile {
            id_token: Some("from-file".into()),
            id_token_env: Some("MY_TOKEN".into()),
            ..Profile::default()
        };
        let none = |_: &str| None;

        let from_env = resolve_secret_with(
            &profile,
            "home",
            SecretKind::IdToken,
            |name| (name == "MY_TOKEN").then(|| "from-env".to_owned()),
            |_| Some("from-keyring".to_owned()),
        );
        assert_eq!(from_env.unwrap().expose_secret(), "from-env");

        let from_keyring = resolve_secret_with(&profile, "home", SecretKind::IdToken, none, |user| {
            (user == "home/id-token").then(|| "from-keyring".to_owned())
        });
        assert_eq!(from_keyring.unwrap().expose_secret(), "from-keyring");

        let from_file = resolve_secret_with(&profile, "home", SecretKind::IdToken, none, none);
        assert_eq!(from_file.unwrap().expose_secret(), "from-file");

        let absent =
            resolve_secret_with(&profile, "home", SecretKind::BrokerPassword, none, none);
        assert!(absent.is_none());
    }

    #[test]
    fn stored_sign_in_becomes_auth_settings() {
        let config = sample();
        let (_, profile) = config.profile(Some("signed-in")).unwrap();
        let credentials = Credentials {
            refresh_token: Some(SecretString::from("refresh-1".to_owned())),
            ..Credentials::default()
        };
        let session = build_session_config(profile, &config.defaults, credentials).unwrap();

        let auth = session.auth.unwrap();
        assert_eq!(auth.api_key.expose_secret(), "web-key");
        assert_eq!(
            auth.identity_endpoint.as_str(),
            "https://identitytoolkit.googleapis.com/"
        );
        assert_eq!(
            auth.token_endpoint.as_str(),
            "http://127.0.0.1:9099/securetoken.googleapis.com"
        );
        assert_eq!(auth.refresh_token.unwrap().expose_secret(), "refresh-1");
    }

    #[test]
    fn refresh_token_without_api_key_is_rejected() {
        let config = sample();
        let (_, profile) = config.profile(Some("emulator")).unwrap();
        let credentials = Credentials {
            refresh_token: Some(SecretString::from("refresh-1".to_owned())),
            ..Credentials::default()
        };
        let err = build_session_config(profile, &config.defaults, credentials).unwrap_err();
        assert!(err.to_string().contains("api_key"), "{err}");
    }

    #[test]
    fn sign_in_config_needs_api_key_but_no_user() {
        let profile = Profile {
            project_id: "lookout-prod".into(),
            api_key: Some("web-key".into()),
            ..Profile::default()
        };
        let sign_in = profile_to_sign_in_config(&profile, &Defaults::default()).unwrap();
        assert_eq!(sign_in.store.project_id, "lookout-prod");
        assert!(sign_in.store.id_token.is_none());
        assert!(sign_in.auth.refresh_token.is_none());
        assert_eq!(sign_in.timeout, Duration::from_secs(30));

        let profile = Profile {
            project_id: "lookout-prod".into(),
            ..Profile::default()
        };
        let err = profile_to_sign_in_config(&profile, &Defaults::default()).unwrap_err();
        assert!(err.to_string().contains("api_key"), "{err}");
    }

    #[test]
    fn refresh_token_resolves_from_its_own_keyring_entry() {
        let profile = Profile {
            refresh_token_env: Some("MY_REFRESH".into()),
            ..Profile::default()
        };
        let none = |_: &str| None;

        let from_env = resolve_secret_with(
            &profile,
            "home",
            SecretKind::RefreshToken,
            |name| (name == "MY_REFRESH").then(|| "env-refresh".to_owned()),
            none,
        );
        assert_eq!(from_env.unwrap().expose_secret(), "env-refresh");

        let from_keyring =
            resolve_secret_with(&profile, "home", SecretKind::RefreshToken, none, |user| {
                (user == "home/refresh-token").then(|| "kept".to_owned())
            });
        assert_eq!(from_keyring.unwrap().expose_secret(), "kept");
    }
}

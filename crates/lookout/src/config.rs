//! CLI configuration: thin wrapper around `lookout_config` shared types.
//!
//! Re-exports the shared types and layers `GlobalOpts` flag overrides
//! (--endpoint, --user, --timeout) on top of the selected profile.

use lookout_config::ConfigError;
use lookout_core::{SessionConfig, SignInConfig};

use crate::cli::GlobalOpts;
use crate::error::CliError;

// ── Re-exports from shared crate ────────────────────────────────────

pub use lookout_config::{
    Config, Defaults, Profile, SecretKind, config_path, delete_secret, load_config,
    load_config_or_default, profile_to_session_config, profile_to_sign_in_config, resolve_secret,
    save_config, store_secret,
};

// ── CLI-specific helpers ────────────────────────────────────────────

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Comma-separated profile names, for error help text.
pub fn available_profiles(config: &Config) -> String {
    if config.profiles.is_empty() {
        "(none)".into()
    } else {
        config.profiles.keys().cloned().collect::<Vec<_>>().join(", ")
    }
}

/// Copy `profile` with command-line overrides applied.
fn apply_overrides(profile: &Profile, global: &GlobalOpts) -> Profile {
    let mut profile = profile.clone();
    if let Some(ref endpoint) = global.endpoint {
        profile.endpoint = Some(endpoint.clone());
    }
    if let Some(ref user) = global.user {
        profile.user_id.clone_from(user);
    }
    if let Some(secs) = global.timeout {
        profile.timeout = Some(format!("{secs}s"));
    }
    profile
}

fn config_error(err: ConfigError) -> CliError {
    match err {
        ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
        other => CliError::Config(other),
    }
}

/// The loaded config plus the active profile's name and contents.
pub fn load_active(global: &GlobalOpts) -> Result<(Config, String, Profile), CliError> {
    let cfg = load_config()?;
    let name = active_profile_name(global, &cfg);
    if let Some(profile) = cfg.profiles.get(&name).cloned() {
        return Ok((cfg, name, profile));
    }
    Err(if cfg.profiles.is_empty() {
        CliError::NoConfig {
            path: config_path().display().to_string(),
        }
    } else {
        CliError::ProfileNotFound {
            available: available_profiles(&cfg),
            name,
        }
    })
}

/// Build a `SessionConfig` from the config file, profile, and CLI overrides.
pub fn build_session_config(global: &GlobalOpts) -> Result<SessionConfig, CliError> {
    let (cfg, name, profile) = load_active(global)?;
    let profile = apply_overrides(&profile, global);
    profile_to_session_config(&profile, &name, &cfg.defaults).map_err(config_error)
}

/// Build the sign-in config for `profile` with CLI overrides.
pub fn build_sign_in_config(
    profile: &Profile,
    defaults: &Defaults,
    global: &GlobalOpts,
) -> Result<SignInConfig, CliError> {
    let profile = apply_overrides(profile, global);
    profile_to_sign_in_config(&profile, defaults).map_err(config_error)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::Cli;

    fn global(args: &[&str]) -> GlobalOpts {
        let mut argv = vec!["lookout"];
        argv.extend_from_slice(args);
        argv.extend_from_slice(&["devices", "list"]);
        Cli::try_parse_from(argv).unwrap().global
    }

    #[test]
    fn flags_override_profile_fields() {
        let profile = Profile {
            user_id: "uid-1".into(),
            project_id: "lookout-prod".into(),
            timeout: Some("45s".into()),
            ..Profile::default()
        };
        let opts = global(&[
            "--user",
            "uid-9",
            "--endpoint",
            "http://localhost:8080",
            "--timeout",
            "5",
        ]);

        let merged = apply_overrides(&profile, &opts);
        assert_eq!(merged.user_id, "uid-9");
        assert_eq!(merged.endpoint.as_deref(), Some("http://localhost:8080"));
        assert_eq!(merged.timeout.as_deref(), Some("5s"));
        assert_eq!(merged.project_id, "lookout-prod");
    }

    #[test]
    fn profile_flag_wins_over_default_profile() {
        let cfg = Config::default();
        assert_eq!(active_profile_name(&global(&[]), &cfg), "default");
        assert_eq!(active_profile_name(&global(&["-p", "cabin"]), &cfg), "cabin");
    }
}

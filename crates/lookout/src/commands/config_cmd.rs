//! Config subcommand handlers.

use std::collections::BTreeMap;

use dialoguer::{Input, Select};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, SecretArg};
use crate::config::{self, Config, Defaults, Profile, SecretKind};
use crate::error::CliError;
use crate::output;

const MASK: &str = "****";

const SETTABLE_KEYS: &str = "user_id, email, project_id, database, endpoint, api_key, \
    identity_endpoint, token_endpoint, refresh_token_env, id_token_env, broker_url, \
    broker_username, broker_password_env, broker_client_id, keep_alive, poll_interval, ca_cert, \
    timeout, invite_ttl, registration_timeout, status_dismiss";

// ── Helpers ─────────────────────────────────────────────────────────

/// Copy of `cfg` with plaintext secrets masked.
fn redacted(cfg: &Config) -> Config {
    let mut cfg = cfg.clone();
    for profile in cfg.profiles.values_mut() {
        if profile.id_token.is_some() {
            profile.id_token = Some(MASK.into());
        }
        if profile.refresh_token.is_some() {
            profile.refresh_token = Some(MASK.into());
        }
        if profile.broker_password.is_some() {
            profile.broker_password = Some(MASK.into());
        }
    }
    cfg
}

fn format_config(cfg: &Config) -> String {
    use std::fmt::Write;
    let mut out = String::new();

    if let Some(ref default) = cfg.default_profile {
        let _ = writeln!(out, "default_profile = \"{default}\"");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "[defaults]");
    let _ = writeln!(out, "output = \"{}\"", cfg.defaults.output);
    let _ = writeln!(out, "color = \"{}\"", cfg.defaults.color);
    let _ = writeln!(out, "timeout = \"{}\"", cfg.defaults.timeout);

    for (name, p) in &cfg.profiles {
        let _ = writeln!(out);
        let _ = writeln!(out, "[profiles.{name}]");
        let _ = writeln!(out, "user_id = \"{}\"", p.user_id);
        let _ = writeln!(out, "project_id = \"{}\"", p.project_id);
        let fields = [
            ("email", p.email.as_deref()),
            ("database", p.database.as_deref()),
            ("endpoint", p.endpoint.as_deref()),
            ("api_key", p.api_key.as_deref()),
            ("identity_endpoint", p.identity_endpoint.as_deref()),
            ("token_endpoint", p.token_endpoint.as_deref()),
            ("refresh_token", p.refresh_token.as_deref()),
            ("refresh_token_env", p.refresh_token_env.as_deref()),
            ("id_token", p.id_token.as_deref()),
            ("id_token_env", p.id_token_env.as_deref()),
            ("broker_url", p.broker_url.as_deref()),
            ("broker_username", p.broker_username.as_deref()),
            ("broker_password", p.broker_password.as_deref()),
            ("broker_password_env", p.broker_password_env.as_deref()),
            ("broker_client_id", p.broker_client_id.as_deref()),
            ("keep_alive", p.keep_alive.as_deref()),
            ("poll_interval", p.poll_interval.as_deref()),
            ("timeout", p.timeout.as_deref()),
            ("invite_ttl", p.invite_ttl.as_deref()),
            ("registration_timeout", p.registration_timeout.as_deref()),
            ("status_dismiss", p.status_dismiss.as_deref()),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                let _ = writeln!(out, "{key} = \"{value}\"");
            }
        }
        if let Some(ref ca) = p.ca_cert {
            let _ = writeln!(out, "ca_cert = \"{}\"", ca.display());
        }
    }

    out
}

/// Map a dialoguer / interactive I/O failure into CliError.
pub(crate) fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

fn secret_kind(arg: SecretArg) -> (SecretKind, &'static str) {
    match arg {
        SecretArg::IdToken => (SecretKind::IdToken, "ID token"),
        SecretArg::RefreshToken => (SecretKind::RefreshToken, "Refresh token"),
        SecretArg::BrokerPassword => (SecretKind::BrokerPassword, "Broker password"),
    }
}

/// Offer to store a secret in the system keyring or return it for plaintext config.
///
/// Returns `Some(secret)` if the user chose plaintext, `None` if stored in keyring.
fn prompt_keyring_storage(
    secret: &str,
    profile_name: &str,
    kind: SecretKind,
    label: &str,
) -> Result<Option<String>, CliError> {
    let choices = &[
        "Store in system keyring (recommended)",
        "Save to config file (plaintext)",
    ];
    let selection = Select::new()
        .with_prompt(format!("Where to store the {}?", label.to_lowercase()))
        .items(choices)
        .default(0)
        .interact()
        .map_err(prompt_err)?;

    if selection == 0 {
        config::store_secret(profile_name, kind, secret)?;
        eprintln!("   ✓ {label} stored in system keyring");
        Ok(None)
    } else {
        Ok(Some(secret.to_owned()))
    }
}

fn optional(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_owned())
}

/// Apply `key = value` to `profile`.
fn set_key(profile: &mut Profile, key: &str, value: String) -> Result<(), CliError> {
    let duration = |field: &str, value: String| -> Result<Option<String>, CliError> {
        lookout_config::parse_duration(field, &value)?;
        Ok(Some(value))
    };
    match key.replace('-', "_").as_str() {
        "user_id" => profile.user_id = value,
        "project_id" => profile.project_id = value,
        "database" => profile.database = optional(&value),
        "endpoint" => profile.endpoint = optional(&value),
        "email" => profile.email = optional(&value),
        "api_key" => profile.api_key = optional(&value),
        "identity_endpoint" => profile.identity_endpoint = optional(&value),
        "token_endpoint" => profile.token_endpoint = optional(&value),
        "refresh_token_env" => profile.refresh_token_env = optional(&value),
        "id_token_env" => profile.id_token_env = optional(&value),
        "broker_url" => profile.broker_url = optional(&value),
        "broker_username" => profile.broker_username = optional(&value),
        "broker_password_env" => profile.broker_password_env = optional(&value),
        "broker_client_id" => profile.broker_client_id = optional(&value),
        "ca_cert" => profile.ca_cert = optional(&value).map(Into::into),
        "keep_alive" => profile.keep_alive = duration("keep_alive", value)?,
        "poll_interval" => profile.poll_interval = duration("poll_interval", value)?,
        "timeout" => profile.timeout = duration("timeout", value)?,
        "invite_ttl" => profile.invite_ttl = duration("invite_ttl", value)?,
        "registration_timeout" => {
            profile.registration_timeout = duration("registration_timeout", value)?;
        }
        "status_dismiss" => profile.status_dismiss = duration("status_dismiss", value)?,
        "id_token" | "refresh_token" | "broker_password" => {
            return Err(CliError::Validation {
                field: key.into(),
                reason: "secrets are stored with `lookout config set-secret`".into(),
            });
        }
        _ => {
            return Err(CliError::Validation {
                field: key.into(),
                reason: format!("unknown config key '{key}'. Valid keys: {SETTABLE_KEYS}"),
            });
        }
    }
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

#[allow(clippy::too_many_lines)]
pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        // ── Init: interactive wizard ────────────────────────────────
        ConfigCommand::Init => {
            let config_path = config::config_path();
            eprintln!("LookOut CLI configuration");
            eprintln!("   Config path: {}\n", config_path.display());

            let profile_name: String = Input::new()
                .with_prompt("Profile name")
                .default("default".into())
                .interact_text()
                .map_err(prompt_err)?;

            let project_id: String = Input::new()
                .with_prompt("Firebase project ID")
                .interact_text()
                .map_err(prompt_err)?;

            let user_id: String = Input::new()
                .with_prompt("Your user ID")
                .interact_text()
                .map_err(prompt_err)?;

            let endpoint: String = Input::new()
                .with_prompt("Firestore endpoint (blank for the public API)")
                .allow_empty(true)
                .interact_text()
                .map_err(prompt_err)?;

            let token = rpassword::prompt_password("ID token (blank to skip): ").map_err(prompt_err)?;
            let id_token = if token.is_empty() {
                None
            } else {
                prompt_keyring_storage(&token, &profile_name, SecretKind::IdToken, "ID token")?
            };

            let broker_url: String = Input::new()
                .with_prompt("Broker WebSocket URL (blank to run without one)")
                .allow_empty(true)
                .interact_text()
                .map_err(prompt_err)?;

            let mut profile = Profile {
                user_id,
                project_id,
                endpoint: optional(&endpoint),
                id_token,
                broker_url: optional(&broker_url),
                ..Profile::default()
            };

            if profile.broker_url.is_some() {
                let username: String = Input::new()
                    .with_prompt("Broker username (blank for none)")
                    .allow_empty(true)
                    .interact_text()
                    .map_err(prompt_err)?;
                profile.broker_username = optional(&username);

                if profile.broker_username.is_some() {
                    let pass = rpassword::prompt_password("Broker password: ").map_err(prompt_err)?;
                    if !pass.is_empty() {
                        profile.broker_password = prompt_keyring_storage(
                            &pass,
                            &profile_name,
                            SecretKind::BrokerPassword,
                            "Broker password",
                        )?;
                    }
                }
            }

            let mut profiles = BTreeMap::new();
            profiles.insert(profile_name.clone(), profile);

            let cfg = Config {
                default_profile: Some(profile_name.clone()),
                defaults: Defaults::default(),
                profiles,
            };
            config::save_config(&cfg)?;

            eprintln!("\n✓ Configuration written to {}", config_path.display());
            eprintln!("  Active profile: {profile_name}");
            eprintln!("\n  Test it: lookout devices list");
            eprintln!("  With an API key set, sign in with: lookout account login <EMAIL>");
            Ok(())
        }

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let cfg = redacted(&config::load_config_or_default());
            let out = output::render_single(&global.output, &cfg, format_config, |_| {
                "config".into()
            })?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        // ── Set <key> <value> ───────────────────────────────────────
        ConfigCommand::Set { key, value } => {
            let mut cfg = config::load_config_or_default();
            let profile_name = config::active_profile_name(global, &cfg);

            let profile = cfg.profiles.entry(profile_name.clone()).or_default();
            set_key(profile, &key, value)?;

            config::save_config(&cfg)?;
            eprintln!("✓ Set {key} on profile '{profile_name}'");
            Ok(())
        }

        // ── Profiles ────────────────────────────────────────────────
        ConfigCommand::Profiles => {
            let cfg = config::load_config_or_default();
            let default = cfg.default_profile.as_deref().unwrap_or("default");
            if cfg.profiles.is_empty() {
                eprintln!("No profiles configured. Run: lookout config init");
            } else {
                for name in cfg.profiles.keys() {
                    let marker = if name == default { " *" } else { "" };
                    println!("{name}{marker}");
                }
            }
            Ok(())
        }

        // ── Use <name> ─────────────────────────────────────────────
        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config_or_default();

            if !cfg.profiles.contains_key(&name) {
                return Err(CliError::ProfileNotFound {
                    available: config::available_profiles(&cfg),
                    name,
                });
            }

            cfg.default_profile = Some(name.clone());
            config::save_config(&cfg)?;
            eprintln!("✓ Default profile set to '{name}'");
            Ok(())
        }

        // ── SetSecret ───────────────────────────────────────────────
        ConfigCommand::SetSecret { kind } => {
            let cfg = config::load_config_or_default();
            let profile_name = config::active_profile_name(global, &cfg);
            if !cfg.profiles.contains_key(&profile_name) {
                return Err(CliError::ProfileNotFound {
                    available: config::available_profiles(&cfg),
                    name: profile_name,
                });
            }

            let (kind, label) = secret_kind(kind);
            let secret = rpassword::prompt_password(format!("{label}: ")).map_err(prompt_err)?;
            if secret.is_empty() {
                return Err(CliError::Validation {
                    field: "secret".into(),
                    reason: format!("{label} cannot be empty"),
                });
            }
            config::store_secret(&profile_name, kind, &secret)?;
            eprintln!("✓ {label} stored in system keyring for profile '{profile_name}'");
            Ok(())
        }
    }
}

//! Account command handlers.

use lookout_core::{AuthTokens, Authenticator, Session, UserProfile};
use secrecy::{ExposeSecret, SecretString};

use crate::cli::{AccountArgs, AccountCommand, GlobalOpts};
use crate::config::{self, Profile, SecretKind};
use crate::error::CliError;
use crate::output;

use super::config_cmd::prompt_err;
use super::util;

fn detail(profile: &UserProfile) -> String {
    [
        format!("User ID:   {}", profile.uid),
        format!("Username:  {}", profile.username),
        format!("Email:     {}", profile.email),
        format!("Created:   {}", util::fmt_time(profile.created_at)),
    ]
    .join("\n")
}

pub async fn handle(session: &Session, args: AccountArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        AccountCommand::Show => {
            let profile = session
                .users()
                .fetch_user_profile(session.user_id())
                .await?
                .ok_or_else(|| CliError::NotFound {
                    resource_type: "Profile".into(),
                    identifier: session.user_id().into(),
                    list_command: "account register --username <NAME> --email <EMAIL>".into(),
                })?;
            let out = output::render_single(&global.output, &profile, detail, |p| p.username.clone())?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        AccountCommand::Register { username, email } => {
            session
                .users()
                .create_user_profile(session.user_id(), &username, &email)
                .await?;
            output::notice(&format!("Profile saved as '{}'", username.trim()), global.quiet);
            Ok(())
        }

        AccountCommand::LoginEmail { identifier } => {
            let email = session.users().resolve_login_email(&identifier).await?;
            output::print_output(&email, global.quiet);
            Ok(())
        }

        AccountCommand::Login { .. }
        | AccountCommand::Signup { .. }
        | AccountCommand::Verify { .. }
        | AccountCommand::Logout => Err(CliError::Internal(
            "sign-in commands run without a session".into(),
        )),
    }
}

// ── Sign-in ──────────────────────────────────────────────────────────

fn prompt_secret(prompt: &str) -> Result<SecretString, CliError> {
    rpassword::prompt_password(prompt)
        .map(SecretString::from)
        .map_err(prompt_err)
}

/// Both entries of a new password must agree.
fn confirmed_password(first: SecretString, second: &SecretString) -> Result<SecretString, CliError> {
    if first.expose_secret() == second.expose_secret() {
        Ok(first)
    } else {
        Err(CliError::Validation {
            field: "password".into(),
            reason: "the passwords do not match".into(),
        })
    }
}

/// Point `profile` at the signed-in account.
fn adopt_account(profile: &mut Profile, tokens: &AuthTokens) {
    profile.user_id.clone_from(&tokens.user_id);
    if tokens.email.is_some() {
        profile.email.clone_from(&tokens.email);
    }
}

/// Keep the refresh token in the keyring and record the account on the profile.
fn remember_sign_in(
    cfg: &mut config::Config,
    name: &str,
    tokens: &AuthTokens,
) -> Result<(), CliError> {
    config::store_secret(name, SecretKind::RefreshToken, tokens.refresh_token.expose_secret())?;
    adopt_account(cfg.profiles.entry(name.to_owned()).or_default(), tokens);
    config::save_config(cfg)?;
    Ok(())
}

fn stored_sign_in(profile: &Profile, name: &str) -> Result<SecretString, CliError> {
    config::resolve_secret(profile, name, SecretKind::RefreshToken).ok_or_else(|| {
        CliError::AuthFailed {
            message: format!("profile '{name}' has no stored sign-in"),
        }
    })
}

/// Handle the account commands that need no signed-in session.
pub async fn handle_sign_in(args: AccountArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (mut cfg, name, profile) = config::load_active(global)?;

    if matches!(args.command, AccountCommand::Logout) {
        config::delete_secret(&name, SecretKind::RefreshToken)?;
        config::delete_secret(&name, SecretKind::IdToken)?;
        if let Some(stored) = cfg.profiles.get_mut(&name) {
            stored.user_id.clear();
            stored.email = None;
        }
        config::save_config(&cfg)?;
        output::notice(&format!("Signed out of profile '{name}'"), global.quiet);
        return Ok(());
    }

    let auth = Authenticator::connect(config::build_sign_in_config(&profile, &cfg.defaults, global)?)?;

    match args.command {
        AccountCommand::Login { identifier } => {
            let password = prompt_secret("Password: ")?;
            let tokens = auth.login(&identifier, &password).await?;
            remember_sign_in(&mut cfg, &name, &tokens)?;
            let who = tokens.email.as_deref().unwrap_or(&tokens.user_id);
            output::notice(&format!("Signed in as {who}"), global.quiet);
            Ok(())
        }

        AccountCommand::Signup { email } => {
            let first = prompt_secret("Password: ")?;
            let password = confirmed_password(first, &prompt_secret("Repeat password: ")?)?;
            let tokens = auth.sign_up(&email, &password).await?;
            remember_sign_in(&mut cfg, &name, &tokens)?;
            output::notice(
                &format!(
                    "Verification email sent to {}.\n\
                     Follow the link, then run: lookout account verify --username <NAME>",
                    email.trim()
                ),
                global.quiet,
            );
            Ok(())
        }

        AccountCommand::Verify { username, resend } => {
            let refresh_token = stored_sign_in(&profile, &name)?;
            if resend {
                auth.resend_verification(&refresh_token).await?;
                output::notice("Verification email sent again", global.quiet);
                return Ok(());
            }
            let username = username.ok_or_else(|| CliError::Validation {
                field: "username".into(),
                reason: "required to finish sign-up".into(),
            })?;
            let account = auth.confirm_email(&refresh_token).await?;
            let email = account.email.or(profile.email).unwrap_or_default();

            let session = Session::connect(config::build_session_config(global)?).await?;
            let written = session
                .users()
                .create_user_profile(&account.user_id, &username, &email)
                .await;
            session.disconnect().await;
            written?;
            output::notice(
                &format!("Email verified. Profile saved as '{}'", username.trim()),
                global.quiet,
            );
            Ok(())
        }

        AccountCommand::Show
        | AccountCommand::Register { .. }
        | AccountCommand::LoginEmail { .. }
        | AccountCommand::Logout => Err(CliError::Internal("command needs a session".into())),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_owned())
    }

    fn tokens(email: Option<&str>) -> AuthTokens {
        AuthTokens {
            user_id: "uid-7".into(),
            email: email.map(Into::into),
            id_token: secret("id"),
            refresh_token: secret("refresh"),
            expires_at: Utc::now(),
        }
    }

    #[test]
    fn sign_in_points_the_profile_at_the_account() {
        let mut profile = Profile {
            user_id: "uid-old".into(),
            email: Some("old@example.com".into()),
            ..Profile::default()
        };
        adopt_account(&mut profile, &tokens(Some("ana@example.com")));
        assert_eq!(profile.user_id, "uid-7");
        assert_eq!(profile.email.as_deref(), Some("ana@example.com"));

        // A refresh does not echo the email; keep the one on file.
        adopt_account(&mut profile, &tokens(None));
        assert_eq!(profile.email.as_deref(), Some("ana@example.com"));
    }

    #[test]
    fn mismatched_passwords_are_rejected() {
        let ok = confirmed_password(secret("hunter22"), &secret("hunter22")).unwrap();
        assert_eq!(ok.expose_secret(), "hunter22");
        assert!(matches!(
            confirmed_password(secret("hunter22"), &secret("hunter23")),
            Err(CliError::Validation { .. })
        ));
    }
}

// ── Sign-in ──
//
// Email/password accounts on the identity provider. Sign-in takes a
// username in place of the email. A new account must follow its
// verification link before it can sign in.

use std::sync::Arc;

use lookout_api::{
    AccountInfo, AuthClient, AuthConfig, AuthTokens, DocumentStore, FirestoreClient,
    FirestoreConfig, IdentityProvider, SystemClock, TransportConfig,
};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::watch;
use tracing::info;

use crate::config::SignInConfig;
use crate::error::CoreError;
use crate::session::tls_to_transport;
use crate::status::{OperationStatus, StatusTracker};
use crate::users::UserDirectory;

/// Signs users in and up. Runs before there is a session, so the store
/// it reads usernames from carries no credentials.
#[derive(Debug, Clone)]
pub struct Authenticator {
    identity: Arc<dyn IdentityProvider>,
    users: UserDirectory,
    status: StatusTracker,
}

impl Authenticator {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn DocumentStore>,
        status: StatusTracker,
    ) -> Self {
        Self {
            identity,
            users: UserDirectory::new(store),
            status,
        }
    }

    /// Build the identity and store clients described by `config`.
    pub fn connect(config: SignInConfig) -> Result<Self, CoreError> {
        let SignInConfig {
            auth,
            store,
            tls,
            timeout,
            status_dismiss,
        } = config;

        let transport = TransportConfig {
            tls: tls_to_transport(&tls),
            timeout,
        };
        let identity = AuthClient::new(
            &AuthConfig {
                api_key: auth.api_key,
                identity_endpoint: auth.identity_endpoint,
                token_endpoint: auth.token_endpoint,
                transport: transport.clone(),
            },
            Arc::new(SystemClock),
        )?;
        let firestore = FirestoreClient::new(&FirestoreConfig {
            project_id: store.project_id,
            database: store.database,
            endpoint: store.endpoint,
            credentials: None,
            transport,
            poll_interval: store.poll_interval,
        })?;
        Ok(Self::new(
            Arc::new(identity),
            Arc::new(firestore),
            StatusTracker::new(status_dismiss),
        ))
    }

    pub fn status(&self) -> OperationStatus {
        self.status.current()
    }

    pub fn watch_status(&self) -> watch::Receiver<OperationStatus> {
        self.status.watch()
    }

    /// Sign in with an email or a username.
    ///
    /// Fails with [`CoreError::EmailNotVerified`] until the account's
    /// verification link has been followed.
    pub async fn login(
        &self,
        identifier: &str,
        password: &SecretString,
    ) -> Result<AuthTokens, CoreError> {
        self.status
            .track(async {
                if password.expose_secret().is_empty() {
                    return Err(CoreError::validation("enter a password"));
                }
                let email = self.users.resolve_login_email(identifier).await?;
                let tokens = self.identity.sign_in_with_password(&email, password).await?;
                self.verified(&tokens.id_token).await?;
                info!(user_id = %tokens.user_id, "signed in");
                Ok(tokens)
            })
            .await
    }

    /// Create an account and mail it a verification link. Until the link
    /// is followed the returned tokens only serve
    /// [`resend_verification`](Self::resend_verification) and
    /// [`confirm_email`](Self::confirm_email).
    pub async fn sign_up(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<AuthTokens, CoreError> {
        self.status
            .track(async {
                let email = email.trim();
                if !email.contains('@') {
                    return Err(CoreError::validation("enter a valid email address"));
                }
                if password.expose_secret().is_empty() {
                    return Err(CoreError::validation("enter a password"));
                }
                let tokens = self.identity.sign_up(email, password).await?;
                self.identity.send_email_verification(&tokens.id_token).await?;
                info!(user_id = %tokens.user_id, "account created, verification sent");
                Ok(tokens)
            })
            .await
    }

    pub async fn resend_verification(&self, refresh_token: &SecretString) -> Result<(), CoreError> {
        self.status
            .track(async {
                let tokens = self.identity.refresh(refresh_token).await?;
                self.identity.send_email_verification(&tokens.id_token).await?;
                Ok(())
            })
            .await
    }

    /// Resume a stored sign-in and check its email is now verified.
    pub async fn confirm_email(
        &self,
        refresh_token: &SecretString,
    ) -> Result<AccountInfo, CoreError> {
        self.status
            .track(async {
                let tokens = self.identity.refresh(refresh_token).await?;
                self.verified(&tokens.id_token).await
            })
            .await
    }

    async fn verified(&self, id_token: &SecretString) -> Result<AccountInfo, CoreError> {
        let account = self.identity.lookup(id_token).await?;
        if account.email_verified {
            Ok(account)
        } else {
            Err(CoreError::EmailNotVerified {
                email: account.email.unwrap_or_default(),
            })
        }
    }
}

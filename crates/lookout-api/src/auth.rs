// Firebase Authentication over REST
//
// Password sign-in, sign-up, email verification and account lookup go
// through the Identity Toolkit API (`accounts:*`). ID tokens live about an
// hour and are renewed through the Secure Token API with the long-lived
// refresh token. `TokenManager` hands the store a current ID token for
// every request and renews it shortly before it expires.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use crate::clock::Clock;
use crate::error::Error;
use crate::transport::TransportConfig;

const IDENTITY_ENDPOINT: &str = "https://identitytoolkit.googleapis.com";
const TOKEN_ENDPOINT: &str = "https://securetoken.googleapis.com";

/// ID tokens are renewed once they are this close to expiry.
const REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// Identity provider settings.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Web API key of the Firebase project.
    pub api_key: SecretString,
    /// Identity Toolkit root. For the Auth emulator use
    /// `http://<host>:9099/identitytoolkit.googleapis.com`.
    pub identity_endpoint: Url,
    /// Secure Token root. For the Auth emulator use
    /// `http://<host>:9099/securetoken.googleapis.com`.
    pub token_endpoint: Url,
    pub transport: TransportConfig,
}

impl AuthConfig {
    pub fn new(api_key: SecretString) -> Result<Self, Error> {
        Ok(Self {
            api_key,
            identity_endpoint: Url::parse(IDENTITY_ENDPOINT)?,
            token_endpoint: Url::parse(TOKEN_ENDPOINT)?,
            transport: TransportConfig::default(),
        })
    }
}

/// Credentials of a signed-in account.
#[derive(Debug, Clone)]
pub struct AuthTokens {
    /// Auth UID.
    pub user_id: String,
    pub email: Option<String>,
    /// Short-lived bearer token for store requests.
    pub id_token: SecretString,
    /// Long-lived token that mints new ID tokens.
    pub refresh_token: SecretString,
    pub expires_at: DateTime<Utc>,
}

impl AuthTokens {
    /// Whether the ID token expires within `margin` of `now`.
    pub fn expires_within(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now + margin >= self.expires_at
    }
}

/// Account state as the identity provider reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub user_id: String,
    pub email: Option<String>,
    pub email_verified: bool,
}

// ── Capability traits ────────────────────────────────────────────────

/// Email/password identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync + fmt::Debug {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<AuthTokens, Error>;

    /// Create an account. The new account starts signed in.
    async fn sign_up(&self, email: &str, password: &SecretString) -> Result<AuthTokens, Error>;

    /// Exchange a refresh token for a fresh ID token.
    async fn refresh(&self, refresh_token: &SecretString) -> Result<AuthTokens, Error>;

    /// Mail a verification link to the account behind `id_token`.
    async fn send_email_verification(&self, id_token: &SecretString) -> Result<(), Error>;

    /// Current account state, including whether the email is verified.
    async fn lookup(&self, id_token: &SecretString) -> Result<AccountInfo, Error>;
}

/// Supplies the bearer token attached to each store request.
#[async_trait]
pub trait TokenSource: Send + Sync + fmt::Debug {
    async fn id_token(&self) -> Result<SecretString, Error>;
}

/// A token used as given. The server rejects it once it expires.
#[derive(Debug, Clone)]
pub struct StaticToken(SecretString);

impl StaticToken {
    pub fn new(token: SecretString) -> Self {
        Self(token)
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn id_token(&self) -> Result<SecretString, Error> {
        Ok(self.0.clone())
    }
}

// ── Wire types ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

/// The Secure Token API answers in snake_case.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    user_id: String,
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

// ── REST client ──────────────────────────────────────────────────────

/// Identity Toolkit + Secure Token REST client.
///
/// Cheaply cloneable; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct AuthClient {
    http: reqwest::Client,
    identity_base: String,
    token_base: String,
    api_key: SecretString,
    clock: Arc<dyn Clock>,
}

impl AuthClient {
    pub fn new(config: &AuthConfig, clock: Arc<dyn Clock>) -> Result<Self, Error> {
        let http = config.transport.build_client()?;
        Ok(Self::with_client(
            http,
            &config.identity_endpoint,
            &config.token_endpoint,
            config.api_key.clone(),
            clock,
        ))
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        identity_endpoint: &Url,
        token_endpoint: &Url,
        api_key: SecretString,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http,
            identity_base: identity_endpoint.as_str().trim_end_matches('/').to_owned(),
            token_base: token_endpoint.as_str().trim_end_matches('/').to_owned(),
            api_key,
            clock,
        }
    }

    fn accounts_url(&self, method: &str) -> String {
        format!("{}/v1/accounts:{method}", self.identity_base)
    }

    /// POST a JSON body to an Identity Toolkit method. The API key travels
    /// as a query parameter and is kept out of the logged URL.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<T, Error> {
        let url = self.accounts_url(method);
        debug!("POST {}", url);
        let resp = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.expose_secret())])
            .json(body)
            .send()
            .await?;
        parse_json(resp).await
    }

    fn tokens(
        &self,
        user_id: String,
        email: Option<String>,
        id_token: String,
        refresh_token: String,
        expires_in: &str,
    ) -> Result<AuthTokens, Error> {
        let seconds: i64 = expires_in.trim().parse().map_err(|_| Error::Deserialization {
            message: format!("token lifetime '{expires_in}' is not a number of seconds"),
            body: String::new(),
        })?;
        Ok(AuthTokens {
            user_id,
            email,
            id_token: SecretString::from(id_token),
            refresh_token: SecretString::from(refresh_token),
            expires_at: self.clock.now() + Duration::seconds(seconds),
        })
    }

    fn signed_in(&self, resp: SignInResponse) -> Result<AuthTokens, Error> {
        self.tokens(
            resp.local_id,
            resp.email,
            resp.id_token,
            resp.refresh_token,
            &resp.expires_in,
        )
    }
}

#[async_trait]
impl IdentityProvider for AuthClient {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<AuthTokens, Error> {
        let body = json!({
            "email": email,
            "password": password.expose_secret(),
            "returnSecureToken": true,
        });
        let resp: SignInResponse = self.call("signInWithPassword", &body).await?;
        let tokens = self.signed_in(resp)?;
        info!(user_id = %tokens.user_id, "signed in");
        Ok(tokens)
    }

    async fn sign_up(&self, email: &str, password: &SecretString) -> Result<AuthTokens, Error> {
        let body = json!({
            "email": email,
            "password": password.expose_secret(),
            "returnSecureToken": true,
        });
        let resp: SignInResponse = self.call("signUp", &body).await?;
        let tokens = self.signed_in(resp)?;
        info!(user_id = %tokens.user_id, "account created");
        Ok(tokens)
    }

    async fn refresh(&self, refresh_token: &SecretString) -> Result<AuthTokens, Error> {
        let url = format!("{}/v1/token", self.token_base);
        debug!("POST {}", url);
        let resp = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.expose_secret())])
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.expose_secret()),
            ])
            .send()
            .await?;
        let resp: RefreshResponse = parse_json(resp).await?;
        self.tokens(
            resp.user_id,
            None,
            resp.id_token,
            resp.refresh_token,
            &resp.expires_in,
        )
    }

    async fn send_email_verification(&self, id_token: &SecretString) -> Result<(), Error> {
        let body = json!({
            "requestType": "VERIFY_EMAIL",
            "idToken": id_token.expose_secret(),
        });
        let _: serde_json::Value = self.call("sendOobCode", &body).await?;
        Ok(())
    }

    async fn lookup(&self, id_token: &SecretString) -> Result<AccountInfo, Error> {
        let body = json!({ "idToken": id_token.expose_secret() });
        let resp: LookupResponse = self.call("lookup", &body).await?;
        let user = resp
            .users
            .into_iter()
            .next()
            .ok_or_else(|| auth_error("USER_NOT_FOUND"))?;
        Ok(AccountInfo {
            user_id: user.local_id,
            email: user.email,
            email_verified: user.email_verified,
        })
    }
}

// ── Token manager ────────────────────────────────────────────────────

/// Keeps a signed-in account's ID token current.
///
/// Concurrent callers share one refresh.
#[derive(Debug)]
pub struct TokenManager {
    identity: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    tokens: Mutex<AuthTokens>,
}

impl TokenManager {
    pub fn new(identity: Arc<dyn IdentityProvider>, clock: Arc<dyn Clock>, tokens: AuthTokens) -> Self {
        Self {
            identity,
            clock,
            tokens: Mutex::new(tokens),
        }
    }

    /// Resume a stored sign-in: exchange `refresh_token` for a first ID token.
    pub async fn from_refresh_token(
        identity: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
        refresh_token: &SecretString,
    ) -> Result<Self, Error> {
        let tokens = identity.refresh(refresh_token).await?;
        debug!(user_id = %tokens.user_id, "sign-in resumed");
        Ok(Self::new(identity, clock, tokens))
    }

    /// Snapshot of the current credentials.
    pub async fn tokens(&self) -> AuthTokens {
        self.tokens.lock().await.clone()
    }
}

#[async_trait]
impl TokenSource for TokenManager {
    async fn id_token(&self) -> Result<SecretString, Error> {
        let mut tokens = self.tokens.lock().await;
        let margin = Duration::seconds(REFRESH_MARGIN_SECS);
        if tokens.expires_within(self.clock.now(), margin) {
            let mut fresh = self.identity.refresh(&tokens.refresh_token).await?;
            if fresh.email.is_none() {
                fresh.email.clone_from(&tokens.email);
            }
            info!(user_id = %fresh.user_id, expires_at = %fresh.expires_at, "ID token refreshed");
            *tokens = fresh;
        }
        Ok(tokens.id_token.clone())
    }
}

// ── Response handling ────────────────────────────────────────────────

async fn parse_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .map_or_else(|_| body.clone(), |envelope| envelope.error.message);
        return Err(auth_error(&message));
    }

    serde_json::from_str(&body).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body,
    })
}

/// Map an Identity Toolkit error message onto `Error::Authentication`.
///
/// Messages are a code, optionally followed by ` : ` and detail, e.g.
/// `WEAK_PASSWORD : Password should be at least 6 characters`.
pub(crate) fn auth_error(raw: &str) -> Error {
    let (code, detail) = match raw.split_once(" : ") {
        Some((code, detail)) => (code.trim(), Some(detail.trim())),
        None => (raw.trim(), None),
    };
    let message = match code {
        "EMAIL_NOT_FOUND" | "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" => {
            "Incorrect email or password.".to_owned()
        }
        "INVALID_EMAIL" => "That email address is not valid.".to_owned(),
        "EMAIL_EXISTS" => "An account with this email already exists.".to_owned(),
        "WEAK_PASSWORD" => detail
            .unwrap_or("Password should be at least 6 characters.")
            .to_owned(),
        "USER_DISABLED" => "This account has been disabled.".to_owned(),
        "TOO_MANY_ATTEMPTS_TRY_LATER" => "Too many attempts. Try again later.".to_owned(),
        "TOKEN_EXPIRED" | "INVALID_REFRESH_TOKEN" | "INVALID_ID_TOKEN" | "USER_NOT_FOUND" => {
            "Your sign-in has expired. Sign in again.".to_owned()
        }
        _ if code.starts_with("API key not valid") => "The project's API key is not valid.".to_owned(),
        _ => raw.trim().to_owned(),
    };
    Error::Authentication {
        code: code.to_owned(),
        message,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_become_readable_messages() {
        match auth_error("INVALID_LOGIN_CREDENTIALS") {
            Error::Authentication { code, message } => {
                assert_eq!(code, "INVALID_LOGIN_CREDENTIALS");
                assert_eq!(message, "Incorrect email or password.");
            }
            other => panic!("unexpected {other:?}"),
        }

        match auth_error("WEAK_PASSWORD : Password should be at least 6 characters") {
            Error::Authentication { code, message } => {
                assert_eq!(code, "WEAK_PASSWORD");
                assert_eq!(message, "Password should be at least 6 characters");
            }
            other => panic!("unexpected {other:?}"),
        }

        match auth_error("SOMETHING_NEW") {
            Error::Authentication { message, .. } => assert_eq!(message, "SOMETHING_NEW"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn expiry_margin() {
        let now = Utc::now();
        let tokens = AuthTokens {
            user_id: "u1".into(),
            email: None,
            id_token: SecretString::from("id".to_owned()),
            refresh_token: SecretString::from("refresh".to_owned()),
            expires_at: now + Duration::minutes(10),
        };
        assert!(!tokens.expires_within(now, Duration::minutes(5)));
        assert!(tokens.expires_within(now + Duration::minutes(6), Duration::minutes(5)));
    }
}

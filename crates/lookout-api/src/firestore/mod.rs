// Firestore REST client
//
// Implements `DocumentStore` over the Firestore v1 REST surface:
// `GET` for point reads, `:runQuery` for structured queries and `:commit`
// for atomic write batches. The REST API has no push channel, so live
// feeds poll at `poll_interval` and publish only when the result changes.

mod codec;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::auth::TokenSource;
use crate::document::{Document, DocumentPath};
use crate::error::Error;
use crate::query::Query;
use crate::store::{DocumentStore, Feed, publish_if_changed};
use crate::transport::TransportConfig;
use crate::write::WriteBatch;

use self::codec::{RunQueryItem, WireDocument, encode_query, encode_write};

const DEFAULT_ENDPOINT: &str = "https://firestore.googleapis.com";

/// Connection settings for a Firestore database.
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    pub project_id: String,
    /// Database ID; `(default)` for the project's default database.
    pub database: String,
    /// API root. Point this at an emulator for local runs.
    pub endpoint: Url,
    /// Source of the bearer token sent with every request. `None` sends
    /// requests unauthenticated.
    pub credentials: Option<Arc<dyn TokenSource>>,
    pub transport: TransportConfig,
    /// How often live feeds re-read their target.
    pub poll_interval: Duration,
}

impl FirestoreConfig {
    pub fn new(project_id: impl Into<String>) -> Result<Self, Error> {
        Ok(Self {
            project_id: project_id.into(),
            database: "(default)".into(),
            endpoint: Url::parse(DEFAULT_ENDPOINT)?,
            credentials: None,
            transport: TransportConfig::default(),
            poll_interval: Duration::from_secs(5),
        })
    }
}

/// Firestore REST client.
///
/// Cheaply cloneable; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct FirestoreClient {
    http: reqwest::Client,
    api_base: String,
    documents_root: String,
    poll_interval: Duration,
    credentials: Option<Arc<dyn TokenSource>>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

impl FirestoreClient {
    /// Build a client from config.
    pub fn new(config: &FirestoreConfig) -> Result<Self, Error> {
        let http = config.transport.build_client()?;

        let mut client = Self::with_client(http, &config.endpoint, &config.project_id, &config.database);
        client.poll_interval = config.poll_interval;
        client.credentials.clone_from(&config.credentials);
        Ok(client)
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, endpoint: &Url, project_id: &str, database: &str) -> Self {
        Self {
            http,
            api_base: format!("{}/v1", endpoint.as_str().trim_end_matches('/')),
            documents_root: format!("projects/{project_id}/databases/{database}/documents"),
            poll_interval: Duration::from_secs(5),
            credentials: None,
        }
    }

    /// Authenticate every request with a token from `source`.
    #[must_use]
    pub fn with_credentials(mut self, source: Arc<dyn TokenSource>) -> Self {
        self.credentials = Some(source);
        self
    }

    /// Override the live-feed poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// `projects/<p>/databases/<db>/documents`
    pub fn documents_root(&self) -> &str {
        &self.documents_root
    }

    // ── URL builders ─────────────────────────────────────────────────

    fn document_url(&self, path: &DocumentPath) -> String {
        format!(
            "{}/{}/{}/{}",
            self.api_base, self.documents_root, path.collection, path.id
        )
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}:{method}", self.api_base, self.documents_root)
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Attach the current bearer token. The source refreshes it first if
    /// it is about to expire.
    async fn authorize(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, Error> {
        match &self.credentials {
            Some(source) => {
                let token = source.id_token().await?;
                Ok(request.bearer_auth(token.expose_secret()))
            }
            None => Ok(request),
        }
    }

    async fn fetch_document(&self, path: &DocumentPath) -> Result<Option<Document>, Error> {
        let url = self.document_url(path);
        debug!("GET {}", url);

        let resp = self.authorize(self.http.get(&url)).await?.send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let wire: WireDocument = parse_json(resp, &path.to_string()).await?;
        wire.into_document().map(Some)
    }

    async fn fetch_query(&self, query: &Query) -> Result<Vec<Document>, Error> {
        query.validate()?;
        let url = self.method_url("runQuery");
        debug!("POST {} (collection {})", url, query.collection);

        let body = encode_query(query, &self.documents_root);
        let resp = self
            .authorize(self.http.post(&url).json(&body))
            .await?
            .send()
            .await?;
        let items: Vec<RunQueryItem> = parse_json(resp, &query.collection).await?;

        items
            .into_iter()
            .filter_map(|item| item.document)
            .map(WireDocument::into_document)
            .collect()
    }

    /// Spawn a polling listener. The initial fetch happens before this
    /// returns so the feed starts populated; later failures are logged and
    /// the last good snapshot stays in place.
    async fn spawn_poll<T, F, Fut>(&self, fetch: F) -> Result<Feed<T>, Error>
    where
        T: PartialEq + Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, Error>> + Send,
    {
        let initial = fetch().await?;
        let (tx, rx) = watch::channel(Arc::new(initial));
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let period = self.poll_interval.max(Duration::from_millis(100));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately; the initial fetch covered it.
            interval.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => break,
                    _ = interval.tick() => match fetch().await {
                        Ok(next) => {
                            publish_if_changed(&tx, next);
                        }
                        Err(e) => warn!(error = %e, "listener poll failed, keeping last snapshot"),
                    },
                }
            }
        });

        Ok(Feed::new(rx, cancel.drop_guard()))
    }
}

#[async_trait]
impl DocumentStore for FirestoreClient {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, Error> {
        self.fetch_document(path).await
    }

    async fn run_query(&self, query: &Query) -> Result<Vec<Document>, Error> {
        self.fetch_query(query).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), Error> {
        if batch.is_empty() {
            return Ok(());
        }
        let writes = batch
            .writes()
            .iter()
            .map(|w| encode_write(w, &self.documents_root))
            .collect::<Result<Vec<_>, _>>()?;

        let url = self.method_url("commit");
        debug!("POST {} ({} writes)", url, writes.len());

        // Error paths name the first document; the REST error does not say
        // which write failed.
        let subject = batch
            .writes()
            .first()
            .map(|w| w.path.to_string())
            .unwrap_or_default();

        let resp = self
            .authorize(self.http.post(&url).json(&json!({ "writes": writes })))
            .await?
            .send()
            .await?;
        let _: serde_json::Value = parse_json(resp, &subject).await?;
        Ok(())
    }

    async fn listen_document(&self, path: &DocumentPath) -> Result<Feed<Option<Document>>, Error> {
        let client = self.clone();
        let path = path.clone();
        self.spawn_poll(move || {
            let client = client.clone();
            let path = path.clone();
            async move { client.fetch_document(&path).await }
        })
        .await
    }

    async fn listen_query(&self, query: &Query) -> Result<Feed<Vec<Document>>, Error> {
        query.validate()?;
        let client = self.clone();
        let query = query.clone();
        self.spawn_poll(move || {
            let client = client.clone();
            let query = query.clone();
            async move { client.fetch_query(&query).await }
        })
        .await
    }
}

// ── Response handling ────────────────────────────────────────────────

/// Deserialize a success body, or map a Firestore error envelope onto
/// the crate's error variants. `subject` names the target for messages.
async fn parse_json<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
    subject: &str,
) -> Result<T, Error> {
    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        return Err(map_status(status.as_u16(), &body, subject));
    }

    serde_json::from_str(&body).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body,
    })
}

fn map_status(status: u16, body: &str, subject: &str) -> Error {
    let (code, message) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => (envelope.error.status, envelope.error.message),
        Err(_) => (None, body.to_owned()),
    };
    let path = subject.to_owned();

    match (status, code.as_deref()) {
        (401, _) | (_, Some("UNAUTHENTICATED")) => Error::Authentication {
            code: code.unwrap_or_else(|| "UNAUTHENTICATED".into()),
            message,
        },
        (404, _) | (_, Some("NOT_FOUND")) => Error::NotFound { path },
        (_, Some("ALREADY_EXISTS")) => Error::AlreadyExists { path },
        (_, Some("FAILED_PRECONDITION")) => Error::PreconditionFailed { path },
        _ => Error::Firestore {
            status,
            code,
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let body = r#"{"error":{"code":409,"message":"exists","status":"ALREADY_EXISTS"}}"#;
        assert!(matches!(
            map_status(409, body, "devices/d1"),
            Error::AlreadyExists { path } if path == "devices/d1"
        ));

        let body = r#"{"error":{"code":400,"message":"stale","status":"FAILED_PRECONDITION"}}"#;
        assert!(matches!(
            map_status(400, body, "x/y"),
            Error::PreconditionFailed { .. }
        ));

        assert!(matches!(map_status(404, "", "x/y"), Error::NotFound { .. }));

        let body = r#"{"error":{"code":401,"message":"expired","status":"UNAUTHENTICATED"}}"#;
        assert!(matches!(
            map_status(401, body, "x/y"),
            Error::Authentication { code, .. } if code == "UNAUTHENTICATED"
        ));

        match map_status(503, "unavailable", "x/y") {
            Error::Firestore { status, code, message } => {
                assert_eq!(status, 503);
                assert!(code.is_none());
                assert_eq!(message, "unavailable");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

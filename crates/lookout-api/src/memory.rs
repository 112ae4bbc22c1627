// ── In-memory backends ──
//
// `MemoryStore` implements the full document-store contract (atomic
// batches, preconditions, field transforms, live feeds) over a single
// lock. `MemoryBroker` records publishes. `MemoryIdentity` keeps
// email/password accounts and hands out opaque tokens. All three back the
// test suites and offline runs of the CLI.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, RwLock, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::auth::{AccountInfo, AuthTokens, IdentityProvider, auth_error};
use crate::broker::{Delivery, MessageBroker};
use crate::clock::{Clock, SystemClock};
use crate::document::{
    Document, DocumentPath, FieldPath, Fields, Value, lookup, remove_path, set_path,
};
use crate::error::Error;
use crate::query::Query;
use crate::store::{DocumentStore, Feed, publish_if_changed};
use crate::write::{FieldValue, Precondition, Write, WriteBatch, WriteKind};

// ── MemoryStore ──────────────────────────────────────────────────────

/// A process-local document store.
///
/// Cheaply cloneable; clones share the same data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    clock: Arc<dyn Clock>,
    state: RwLock<State>,
    /// Bumped after every successful commit; listeners re-evaluate on change.
    revision: watch::Sender<u64>,
}

#[derive(Default)]
struct State {
    collections: HashMap<String, BTreeMap<String, Document>>,
    last_commit: Option<DateTime<Utc>>,
}

impl State {
    fn get(&self, path: &DocumentPath) -> Option<&Document> {
        self.collections.get(&path.collection)?.get(&path.id)
    }

    fn query(&self, query: &Query) -> Vec<Document> {
        let docs = self
            .collections
            .get(&query.collection)
            .map(|c| c.values().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        query.apply(docs)
    }

    /// Strictly increasing commit times, so update-time preconditions
    /// can tell consecutive writes apart even when the clock stands still.
    fn next_commit_time(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let at = match self.last_commit {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_commit = Some(at);
        at
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (revision, _) = watch::channel(0u64);
        Self {
            inner: Arc::new(MemoryInner {
                clock,
                state: RwLock::new(State::default()),
                revision,
            }),
        }
    }

    /// Number of documents in a collection.
    pub async fn count(&self, collection: &str) -> usize {
        self.inner
            .state
            .read()
            .await
            .collections
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    async fn spawn_listener<T, F>(&self, evaluate: F) -> Feed<T>
    where
        T: PartialEq + Send + Sync + 'static,
        F: Fn(&State) -> T + Send + Sync + 'static,
    {
        // Subscribe before the initial read so no commit slips between them.
        let inner = Arc::clone(&self.inner);
        let mut revision = inner.revision.subscribe();
        let initial = evaluate(&*inner.state.read().await);

        let (tx, rx) = watch::channel(Arc::new(initial));
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => break,
                    changed = revision.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let next = evaluate(&*inner.state.read().await);
                        publish_if_changed(&tx, next);
                    }
                }
            }
        });

        Feed::new(rx, cancel.drop_guard())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, Error> {
        Ok(self.inner.state.read().await.get(path).cloned())
    }

    async fn run_query(&self, query: &Query) -> Result<Vec<Document>, Error> {
        query.validate()?;
        Ok(self.inner.state.read().await.query(query))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), Error> {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.write().await;

        // Stage every write against the pending view first; nothing lands
        // unless all preconditions and transforms succeed.
        let mut staged: BTreeMap<DocumentPath, Option<Document>> = BTreeMap::new();
        for write in batch.writes() {
            let current = match staged.get(&write.path) {
                Some(pending) => pending.clone(),
                None => state.get(&write.path).cloned(),
            };
            let next = apply_write(current, write, now)?;
            staged.insert(write.path.clone(), next);
        }

        let commit_time = state.next_commit_time(now);
        for (path, doc) in staged {
            let collection = state.collections.entry(path.collection).or_default();
            match doc {
                Some(mut doc) => {
                    doc.update_time = Some(commit_time);
                    doc.create_time.get_or_insert(commit_time);
                    collection.insert(path.id, doc);
                }
                None => {
                    collection.remove(&path.id);
                }
            }
        }
        drop(state);

        debug!(writes = batch.len(), "memory store commit");
        self.inner.revision.send_modify(|r| *r += 1);
        Ok(())
    }

    async fn listen_document(&self, path: &DocumentPath) -> Result<Feed<Option<Document>>, Error> {
        let path = path.clone();
        Ok(self
            .spawn_listener(move |state| state.get(&path).cloned())
            .await)
    }

    async fn listen_query(&self, query: &Query) -> Result<Feed<Vec<Document>>, Error> {
        query.validate()?;
        let query = query.clone();
        Ok(self.spawn_listener(move |state| state.query(&query)).await)
    }
}

/// Apply one write to the current version of its document.
///
/// Returns the new document, or `None` when the write deletes it.
fn apply_write(
    current: Option<Document>,
    write: &Write,
    now: DateTime<Utc>,
) -> Result<Option<Document>, Error> {
    let path = || write.path.to_string();

    match (write.precondition, current.as_ref()) {
        (Some(Precondition::Exists(true)), None) => {
            return Err(Error::NotFound { path: path() });
        }
        (Some(Precondition::Exists(false)), Some(_)) => {
            return Err(Error::AlreadyExists { path: path() });
        }
        (Some(Precondition::UpdateTime(expected)), existing) => {
            if existing.and_then(|d| d.update_time) != Some(expected) {
                return Err(Error::PreconditionFailed { path: path() });
            }
        }
        _ => {}
    }

    let (mut doc, fields) = match &write.kind {
        WriteKind::Delete => return Ok(None),
        WriteKind::Set(fields) => {
            let mut doc = Document::new(write.path.id.clone(), Fields::new());
            doc.create_time = current.and_then(|d| d.create_time);
            (doc, fields)
        }
        WriteKind::Update(fields) => (
            current.unwrap_or_else(|| Document::new(write.path.id.clone(), Fields::new())),
            fields,
        ),
    };

    for (field, value) in fields {
        match value {
            FieldValue::Set(v) => set_path(&mut doc.fields, field, v.clone()),
            FieldValue::Delete => {
                remove_path(&mut doc.fields, field);
            }
            FieldValue::ServerTimestamp => set_path(&mut doc.fields, field, Value::Timestamp(now)),
            FieldValue::ArrayUnion(elements) => {
                let mut items = existing_array(&doc.fields, field);
                for element in elements {
                    if !items.iter().any(|i| i.loosely_equals(element)) {
                        items.push(element.clone());
                    }
                }
                set_path(&mut doc.fields, field, Value::Array(items));
            }
            FieldValue::ArrayRemove(elements) => {
                let mut items = existing_array(&doc.fields, field);
                items.retain(|i| !elements.iter().any(|e| i.loosely_equals(e)));
                set_path(&mut doc.fields, field, Value::Array(items));
            }
        }
    }

    Ok(Some(doc))
}

fn existing_array(fields: &Fields, path: &FieldPath) -> Vec<Value> {
    lookup(fields, path)
        .and_then(Value::as_array)
        .map(<[Value]>::to_vec)
        .unwrap_or_default()
}

// ── MemoryBroker ─────────────────────────────────────────────────────

/// A message captured by [`MemoryBroker`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl PublishedMessage {
    /// Payload parsed as JSON.
    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

/// A broker that records what it is asked to publish.
#[derive(Debug)]
pub struct MemoryBroker {
    connected: AtomicBool,
    published: Mutex<Vec<PublishedMessage>>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self {
            connected: AtomicBool::new(true),
            published: Mutex::new(Vec::new()),
        }
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Every message delivered so far, oldest first.
    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<Delivery, Error> {
        if !self.is_connected() {
            warn!(topic, "broker not connected, dropping publish");
            return Ok(Delivery::Dropped);
        }
        self.published.lock().await.push(PublishedMessage {
            topic: topic.to_owned(),
            payload,
        });
        Ok(Delivery::Sent)
    }
}

// ── MemoryIdentity ───────────────────────────────────────────────────

/// Lifetime of an ID token issued by [`MemoryIdentity`].
const MEMORY_TOKEN_TTL_SECS: i64 = 60 * 60;

struct Account {
    user_id: String,
    email: String,
    password: String,
    email_verified: bool,
}

#[derive(Default)]
struct IdentityState {
    /// Keyed by lower-cased email.
    accounts: HashMap<String, Account>,
    /// ID token -> (account key, expiry).
    id_tokens: HashMap<String, (String, DateTime<Utc>)>,
    /// Refresh token -> account key.
    refresh_tokens: HashMap<String, String>,
    verification_mails: Vec<String>,
    refreshes: usize,
}

/// An email/password identity provider held in memory.
///
/// ID tokens expire an hour after issue on the injected clock; refresh
/// tokens never expire.
pub struct MemoryIdentity {
    clock: Arc<dyn Clock>,
    state: Mutex<IdentityState>,
}

impl std::fmt::Debug for MemoryIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryIdentity").finish_non_exhaustive()
    }
}

impl Default for MemoryIdentity {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryIdentity {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(IdentityState::default()),
        }
    }

    /// Mark the account's email verified, as following the mailed link
    /// would. `false` when no such account exists.
    pub async fn verify_email(&self, email: &str) -> bool {
        let mut state = self.state.lock().await;
        match state.accounts.get_mut(&email.to_lowercase()) {
            Some(account) => {
                account.email_verified = true;
                true
            }
            None => false,
        }
    }

    /// Addresses verification links were sent to, oldest first.
    pub async fn verification_mails(&self) -> Vec<String> {
        self.state.lock().await.verification_mails.clone()
    }

    /// Token refreshes served so far.
    pub async fn refreshes(&self) -> usize {
        self.state.lock().await.refreshes
    }

    /// Issue a fresh ID token for `key`, reusing `refresh_token` if given.
    fn issue(
        &self,
        state: &mut IdentityState,
        key: &str,
        refresh_token: Option<String>,
    ) -> Result<AuthTokens, Error> {
        let (user_id, email) = match state.accounts.get(key) {
            Some(account) => (account.user_id.clone(), account.email.clone()),
            None => return Err(auth_error("USER_NOT_FOUND")),
        };
        let expires_at = self.clock.now() + Duration::seconds(MEMORY_TOKEN_TTL_SECS);
        let id_token = format!("id-{}", uuid::Uuid::new_v4().simple());
        state
            .id_tokens
            .insert(id_token.clone(), (key.to_owned(), expires_at));
        let refresh_token = refresh_token.unwrap_or_else(|| {
            let token = format!("refresh-{}", uuid::Uuid::new_v4().simple());
            state.refresh_tokens.insert(token.clone(), key.to_owned());
            token
        });
        Ok(AuthTokens {
            user_id,
            email: Some(email),
            id_token: SecretString::from(id_token),
            refresh_token: SecretString::from(refresh_token),
            expires_at,
        })
    }

    /// Account key behind a live ID token.
    fn holder(&self, state: &IdentityState, id_token: &SecretString) -> Result<String, Error> {
        match state.id_tokens.get(id_token.expose_secret()) {
            Some((key, expires_at)) if *expires_at > self.clock.now() => Ok(key.clone()),
            Some(_) => Err(auth_error("TOKEN_EXPIRED")),
            None => Err(auth_error("INVALID_ID_TOKEN")),
        }
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentity {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<AuthTokens, Error> {
        let key = email.trim().to_lowercase();
        let mut state = self.state.lock().await;
        let matches = state
            .accounts
            .get(&key)
            .is_some_and(|account| account.password == password.expose_secret());
        if !matches {
            return Err(auth_error("INVALID_LOGIN_CREDENTIALS"));
        }
        self.issue(&mut state, &key, None)
    }

    async fn sign_up(&self, email: &str, password: &SecretString) -> Result<AuthTokens, Error> {
        let email = email.trim();
        if !email.contains('@') {
            return Err(auth_error("INVALID_EMAIL"));
        }
        if password.expose_secret().chars().count() < 6 {
            return Err(auth_error(
                "WEAK_PASSWORD : Password should be at least 6 characters",
            ));
        }
        let key = email.to_lowercase();
        let mut state = self.state.lock().await;
        if state.accounts.contains_key(&key) {
            return Err(auth_error("EMAIL_EXISTS"));
        }
        state.accounts.insert(
            key.clone(),
            Account {
                user_id: uuid::Uuid::new_v4().simple().to_string(),
                email: email.to_owned(),
                password: password.expose_secret().to_owned(),
                email_verified: false,
            },
        );
        debug!(email, "account created");
        self.issue(&mut state, &key, None)
    }

    async fn refresh(&self, refresh_token: &SecretString) -> Result<AuthTokens, Error> {
        let mut state = self.state.lock().await;
        let Some(key) = state.refresh_tokens.get(refresh_token.expose_secret()).cloned() else {
            return Err(auth_error("INVALID_REFRESH_TOKEN"));
        };
        state.refreshes += 1;
        let mut tokens = self.issue(
            &mut state,
            &key,
            Some(refresh_token.expose_secret().to_owned()),
        )?;
        // The Secure Token API does not echo the email.
        tokens.email = None;
        Ok(tokens)
    }

    async fn send_email_verification(&self, id_token: &SecretString) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        let key = self.holder(&state, id_token)?;
        let email = state
            .accounts
            .get(&key)
            .map(|account| account.email.clone())
            .ok_or_else(|| auth_error("USER_NOT_FOUND"))?;
        state.verification_mails.push(email);
        Ok(())
    }

    async fn lookup(&self, id_token: &SecretString) -> Result<AccountInfo, Error> {
        let state = self.state.lock().await;
        let key = self.holder(&state, id_token)?;
        state
            .accounts
            .get(&key)
            .map(|account| AccountInfo {
                user_id: account.user_id.clone(),
                email: Some(account.email.clone()),
                email_verified: account.email_verified,
            })
            .ok_or_else(|| auth_error("USER_NOT_FOUND"))
    }
}

// ── Session ──
//
// One signed-in user against one pair of backends. Owns the store, the
// broker, the clock and the principal, and hands out the registries and
// flows built on them. Device commands go through a single background
// processor so publishes leave in the order they were issued.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use lookout_api::{
    AuthClient, AuthConfig, Clock, Delivery, DocumentStore, FirestoreClient, FirestoreConfig,
    MessageBroker, MqttClient, MqttConfig, StaticToken, SystemClock, TlsMode, TokenManager,
    TokenSource, TransportConfig,
};
use secrecy::SecretString;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::claim::ClaimFlow;
use crate::command::{CommandEnvelope, DeviceCommand};
use crate::config::{AuthSettings, SessionConfig, SessionOptions, TlsVerification};
use crate::devices::DeviceRegistry;
use crate::error::CoreError;
use crate::family::FamilyRegistry;
use crate::logs::{LogAggregator, LogsView, RangeMode};
use crate::model::{Device, Family, Invite};
use crate::registration::RegistrationFlow;
use crate::status::StatusTracker;
use crate::stream::{Subscription, combine2, map_subscription};
use crate::users::UserDirectory;

const COMMAND_CHANNEL_SIZE: usize = 64;

/// The injected service handles a session runs on.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn DocumentStore>,
    pub broker: Arc<dyn MessageBroker>,
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("broker_connected", &self.broker.is_connected())
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

// ── Session ──────────────────────────────────────────────────────────

/// Cheaply cloneable via `Arc<SessionInner>`.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    user_id: String,
    backends: Backends,
    options: SessionOptions,
    devices: DeviceRegistry,
    families: FamilyRegistry,
    logs: LogAggregator,
    users: UserDirectory,
    claims: ClaimFlow,
    command_tx: mpsc::Sender<CommandEnvelope>,
    command_rx: Mutex<Option<mpsc::Receiver<CommandEnvelope>>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    /// Set when the session built its own broker connection.
    mqtt: Option<Arc<MqttClient>>,
}

impl Session {
    /// Build the Firestore and MQTT adapters described by `config` and
    /// start a session on them. The broker connects in the background;
    /// commands issued before it is up are dropped with a warning.
    pub async fn connect(config: SessionConfig) -> Result<Self, CoreError> {
        let SessionConfig {
            user_id,
            store,
            auth,
            broker,
            tls,
            timeout,
            options,
        } = config;

        let transport = TransportConfig {
            tls: tls_to_transport(&tls),
            timeout,
        };
        let credentials = token_source(&user_id, auth, store.id_token, &transport).await?;
        let firestore = FirestoreClient::new(&FirestoreConfig {
            project_id: store.project_id,
            database: store.database,
            endpoint: store.endpoint,
            credentials,
            transport,
            poll_interval: store.poll_interval,
        })?;
        debug!(root = firestore.documents_root(), "document store ready");

        let cancel = CancellationToken::new();
        let (broker, mqtt): (Arc<dyn MessageBroker>, _) = match broker {
            Some(settings) => {
                let mut mqtt_config = MqttConfig::new(settings.url);
                if let Some(client_id) = settings.client_id {
                    mqtt_config.client_id = client_id;
                }
                mqtt_config.username = settings.username;
                mqtt_config.password = settings.password;
                mqtt_config.keep_alive = settings.keep_alive;
                let client = Arc::new(MqttClient::connect(mqtt_config, cancel.child_token()));
                (Arc::clone(&client) as Arc<dyn MessageBroker>, Some(client))
            }
            None => {
                info!("no broker configured, device commands will be dropped");
                (Arc::new(OfflineBroker) as Arc<dyn MessageBroker>, None)
            }
        };

        let backends = Backends {
            store: Arc::new(firestore),
            broker,
            clock: Arc::new(SystemClock),
        };
        Ok(Self::build(backends, user_id, options, cancel, mqtt).await)
    }

    /// Start a session on caller-supplied backends.
    pub async fn with_backends(
        backends: Backends,
        user_id: impl Into<String>,
        options: SessionOptions,
    ) -> Self {
        Self::build(backends, user_id.into(), options, CancellationToken::new(), None).await
    }

    async fn build(
        backends: Backends,
        user_id: String,
        options: SessionOptions,
        cancel: CancellationToken,
        mqtt: Option<Arc<MqttClient>>,
    ) -> Self {
        let store = Arc::clone(&backends.store);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);

        let session = Self {
            inner: Arc::new(SessionInner {
                devices: DeviceRegistry::new(Arc::clone(&store)),
                families: FamilyRegistry::new(Arc::clone(&store), Arc::clone(&backends.clock)),
                logs: LogAggregator::new(Arc::clone(&store)),
                users: UserDirectory::new(Arc::clone(&store)),
                claims: ClaimFlow::new(
                    store,
                    user_id.clone(),
                    StatusTracker::new(options.status_dismiss),
                ),
                user_id,
                backends,
                options,
                command_tx,
                command_rx: Mutex::new(Some(command_rx)),
                cancel,
                task_handles: Mutex::new(Vec::new()),
                mqtt,
            }),
        };

        if let Some(rx) = session.inner.command_rx.lock().await.take() {
            let handle = tokio::spawn(command_processor_task(session.clone(), rx));
            session.inner.task_handles.lock().await.push(handle);
        }
        info!(user_id = %session.inner.user_id, "session started");
        session
    }

    /// Stop background tasks and close the broker connection.
    pub async fn disconnect(&self) {
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        if let Some(mqtt) = &self.inner.mqtt {
            mqtt.shutdown();
        }
        debug!("session closed");
    }

    // ── Accessors ────────────────────────────────────────────────────

    /// The signed-in principal every operation acts for.
    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    pub fn options(&self) -> &SessionOptions {
        &self.inner.options
    }

    pub fn backends(&self) -> &Backends {
        &self.inner.backends
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.inner.devices
    }

    pub fn families(&self) -> &FamilyRegistry {
        &self.inner.families
    }

    pub fn logs(&self) -> &LogAggregator {
        &self.inner.logs
    }

    pub fn users(&self) -> &UserDirectory {
        &self.inner.users
    }

    /// Claim flow for this user. Clones share one status indicator.
    pub fn claims(&self) -> ClaimFlow {
        self.inner.claims.clone()
    }

    /// A fresh fingerprint registration attempt on `device_id`.
    pub fn registration(&self, device_id: &str) -> RegistrationFlow {
        RegistrationFlow::new(
            device_id,
            self.inner.user_id.clone(),
            Arc::clone(&self.inner.backends.store),
            Arc::clone(&self.inner.backends.broker),
            self.inner.options.registration_timeout,
        )
    }

    // ── Operations ───────────────────────────────────────────────────

    /// Publish a command to a device. `Ok(Delivery::Dropped)` means the
    /// broker was offline and the command is gone.
    pub async fn execute(
        &self,
        device_id: &str,
        command: DeviceCommand,
    ) -> Result<Delivery, CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::SessionClosed);
        }
        let (tx, rx) = tokio::sync::oneshot::channel();

        self.inner
            .command_tx
            .send(CommandEnvelope {
                device_id: device_id.to_owned(),
                command,
                response_tx: tx,
            })
            .await
            .map_err(|_| CoreError::SessionClosed)?;

        rx.await.map_err(|_| CoreError::SessionClosed)?
    }

    /// Ask a device to take a snapshot for the signed-in user.
    pub async fn take_photo(&self, device_id: &str) -> Result<Delivery, CoreError> {
        let command = DeviceCommand::TakePhoto {
            user_id: self.inner.user_id.clone(),
        };
        self.execute(device_id, command).await
    }

    /// Issue an invite to `family_id` with the session's default lifetime.
    pub async fn create_invite(&self, family_id: &str) -> Result<Invite, CoreError> {
        self.inner
            .families
            .create_invite(family_id, self.inner.options.invite_ttl)
            .await
    }

    /// Live, deduplicated IDs of every device the user can see: the ones
    /// they own, then the ones shared into any of their families.
    pub async fn visible_device_ids(&self) -> Result<Subscription<Vec<String>>, CoreError> {
        let user_id = self.user_id();
        let own = self.inner.devices.subscribe_user_devices(user_id).await?;
        let families = self.inner.families.subscribe_user_families(user_id).await?;
        let shared = map_subscription(families, |families: &Vec<Family>| {
            families
                .iter()
                .flat_map(|family| family.devices.iter().cloned())
                .collect::<Vec<String>>()
        });
        Ok(combine2(own, shared, |own: &Vec<Device>, shared: &Vec<String>| {
            let mut seen = HashSet::new();
            own.iter()
                .map(|device| device.id.clone())
                .chain(shared.iter().cloned())
                .filter(|id| seen.insert(id.clone()))
                .collect()
        }))
    }

    /// Log view over every visible device, days resolved in local time.
    pub async fn logs_view(&self, mode: RangeMode) -> Result<LogsView, CoreError> {
        let ids = self.visible_device_ids().await?;
        LogsView::open(
            self.inner.logs.clone(),
            ids,
            Arc::clone(&self.inner.backends.clock),
            mode,
            None,
        )
        .await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.inner.user_id)
            .field("backends", &self.inner.backends)
            .finish_non_exhaustive()
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Publish commands from the channel, one at a time.
async fn command_processor_task(session: Session, mut rx: mpsc::Receiver<CommandEnvelope>) {
    let cancel = session.inner.cancel.clone();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                let result = route_command(&session, &envelope.device_id, &envelope.command).await;
                let _ = envelope.response_tx.send(result);
            }
        }
    }
}

async fn route_command(
    session: &Session,
    device_id: &str,
    command: &DeviceCommand,
) -> Result<Delivery, CoreError> {
    let topic = command.topic(device_id);
    let delivery = session
        .inner
        .backends
        .broker
        .publish(&topic, command.payload()?)
        .await?;
    match delivery {
        Delivery::Sent => debug!(command = command.name(), topic, "command published"),
        Delivery::Dropped => warn!(command = command.name(), topic, "command dropped"),
    }
    Ok(delivery)
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Pick what signs store requests: a stored sign-in kept fresh by
/// refreshing, else a fixed ID token, else nothing.
async fn token_source(
    user_id: &str,
    auth: Option<AuthSettings>,
    id_token: Option<SecretString>,
    transport: &TransportConfig,
) -> Result<Option<Arc<dyn TokenSource>>, CoreError> {
    let refreshable = auth.and_then(|settings| {
        let refresh_token = settings.refresh_token?;
        let config = AuthConfig {
            api_key: settings.api_key,
            identity_endpoint: settings.identity_endpoint,
            token_endpoint: settings.token_endpoint,
            transport: transport.clone(),
        };
        Some((config, refresh_token))
    });

    if let Some((config, refresh_token)) = refreshable {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let identity = Arc::new(AuthClient::new(&config, Arc::clone(&clock))?);
        let manager = TokenManager::from_refresh_token(identity, clock, &refresh_token).await?;
        let signed_in = manager.tokens().await.user_id;
        if signed_in != user_id {
            return Err(CoreError::Config {
                message: format!(
                    "stored credentials belong to user {signed_in}, but the session acts for {user_id}"
                ),
            });
        }
        return Ok(Some(Arc::new(manager)));
    }
    Ok(id_token.map(|token| Arc::new(StaticToken::new(token)) as Arc<dyn TokenSource>))
}

pub(crate) fn tls_to_transport(tls: &TlsVerification) -> TlsMode {
    match tls {
        TlsVerification::SystemDefaults => TlsMode::System,
        TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
    }
}

/// Broker stand-in for sessions configured without one.
struct OfflineBroker;

#[async_trait]
impl MessageBroker for OfflineBroker {
    fn is_connected(&self) -> bool {
        false
    }

    async fn publish(&self, topic: &str, _payload: Bytes) -> Result<Delivery, lookout_api::Error> {
        warn!(topic, "no broker configured, dropping publish");
        Ok(Delivery::Dropped)
    }
}

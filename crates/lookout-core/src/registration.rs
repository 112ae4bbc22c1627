// ── Fingerprint registration ──
//
// Two-phase pairing: publish a registration command to the device, then
// watch the device document until the user shows up in
// `registeredUsers`. The watch ends on success, on cancel, or when the
// timeout elapses, whichever comes first.

use std::sync::Arc;
use std::time::Duration;

use lookout_api::{Delivery, DocumentStore, MessageBroker};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::DeviceCommand;
use crate::devices::device_path;
use crate::error::CoreError;
use crate::model::Device;

/// Where a registration attempt stands.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RegistrationState {
    #[default]
    Idle,
    Publishing,
    Polling,
    AlreadyRegistered,
    Registered,
    Cancelled,
    TimedOut,
    Failed(String),
}

impl RegistrationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::AlreadyRegistered
                | Self::Registered
                | Self::Cancelled
                | Self::TimedOut
                | Self::Failed(_)
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::AlreadyRegistered | Self::Registered)
    }
}

/// One registration attempt for one user on one device. Single use.
pub struct RegistrationFlow {
    device_id: String,
    user_id: String,
    store: Arc<dyn DocumentStore>,
    broker: Arc<dyn MessageBroker>,
    timeout: Duration,
    state: watch::Sender<RegistrationState>,
    cancel: CancellationToken,
}

impl RegistrationFlow {
    pub fn new(
        device_id: impl Into<String>,
        user_id: impl Into<String>,
        store: Arc<dyn DocumentStore>,
        broker: Arc<dyn MessageBroker>,
        timeout: Duration,
    ) -> Self {
        let (state, _) = watch::channel(RegistrationState::Idle);
        Self {
            device_id: device_id.into(),
            user_id: user_id.into(),
            store,
            broker,
            timeout,
            state,
            cancel: CancellationToken::new(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn state(&self) -> RegistrationState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<RegistrationState> {
        self.state.subscribe()
    }

    /// Token that aborts a running attempt. Cancelling before `run` makes
    /// `run` return `Cancelled` without publishing.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drive the attempt to a terminal state. `is_new` tells the device
    /// whether to enroll a new print or replace an existing one.
    pub async fn run(&self, is_new: bool) -> Result<RegistrationState, CoreError> {
        if *self.state.borrow() != RegistrationState::Idle {
            return Err(CoreError::validation("registration flow already started"));
        }
        if self.cancel.is_cancelled() {
            return Ok(self.finish(RegistrationState::Cancelled));
        }

        match self.drive(is_new).await {
            Ok(state) => Ok(self.finish(state)),
            Err(e) => {
                self.finish(RegistrationState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn drive(&self, is_new: bool) -> Result<RegistrationState, CoreError> {
        self.state.send_replace(RegistrationState::Publishing);
        let command = DeviceCommand::RegisterFingerprint {
            user_id: self.user_id.clone(),
            is_new,
        };
        let topic = command.topic(&self.device_id);
        match self.broker.publish(&topic, command.payload()?).await {
            Ok(Delivery::Sent) => debug!(topic, "registration command published"),
            Ok(Delivery::Dropped) => warn!(topic, "registration command dropped, broker offline"),
            // Best effort: the device may still pick the user up.
            Err(e) => warn!(error = %e, topic, "registration command publish failed"),
        }

        let path = device_path(&self.device_id);
        let Some(doc) = self.store.get(&path).await? else {
            return Err(CoreError::not_found("Device", self.device_id.as_str()));
        };
        if Device::from(&doc).has_registered(&self.user_id) {
            return Ok(RegistrationState::AlreadyRegistered);
        }

        let mut feed = self.store.listen_document(&path).await?;
        if self.registered_in(feed.current().as_ref().as_ref()) {
            return Ok(RegistrationState::Registered);
        }

        self.state.send_replace(RegistrationState::Polling);
        debug!(device_id = %self.device_id, timeout = ?self.timeout, "waiting for enrollment");
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(RegistrationState::Cancelled),
                () = &mut deadline => return Ok(RegistrationState::TimedOut),
                snapshot = feed.changed() => match snapshot {
                    Some(snapshot) => {
                        if self.registered_in(snapshot.as_ref().as_ref()) {
                            return Ok(RegistrationState::Registered);
                        }
                    }
                    None => {
                        return Err(CoreError::OperationFailed {
                            message: "device listener closed".into(),
                        });
                    }
                },
            }
        }
    }

    fn registered_in(&self, doc: Option<&lookout_api::Document>) -> bool {
        doc.is_some_and(|doc| Device::from(doc).has_registered(&self.user_id))
    }

    fn finish(&self, state: RegistrationState) -> RegistrationState {
        info!(
            device_id = %self.device_id,
            user_id = %self.user_id,
            outcome = ?state,
            "fingerprint registration finished"
        );
        self.state.send_replace(state.clone());
        state
    }
}

impl std::fmt::Debug for RegistrationFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationFlow")
            .field("device_id", &self.device_id)
            .field("user_id", &self.user_id)
            .field("timeout", &self.timeout)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use lookout_api::{FieldPath, FieldValue, MemoryBroker, MemoryStore, Value, Write};

    use super::*;

    async fn put_device(store: &MemoryStore, registered: &[&str]) {
        let users: Vec<Value> = registered.iter().map(|u| Value::from(*u)).collect();
        store
            .commit(
                Write::set(
                    device_path("d1"),
                    vec![
                        (FieldPath::field("name"), FieldValue::set("Front door")),
                        (FieldPath::field("registeredUsers"), FieldValue::set(users)),
                    ],
                )
                .into(),
            )
            .await
            .unwrap();
    }

    fn flow(store: &MemoryStore, broker: &Arc<MemoryBroker>) -> RegistrationFlow {
        RegistrationFlow::new(
            "d1",
            "u1",
            Arc::new(store.clone()),
            broker.clone(),
            Duration::from_secs(120),
        )
    }

    #[tokio::test]
    async fn already_registered_short_circuits() {
        let store = MemoryStore::default();
        let broker = Arc::new(MemoryBroker::new());
        put_device(&store, &["u1"]).await;

        let flow = flow(&store, &broker);
        let outcome = flow.run(false).await.unwrap();
        assert_eq!(outcome, RegistrationState::AlreadyRegistered);

        let sent = broker.published().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic, "d1/sensor/fingerprint");
        assert_eq!(sent[0].json().unwrap()["isNew"], false);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_ends_when_device_reports_the_user() {
        let store = MemoryStore::default();
        let broker = Arc::new(MemoryBroker::new());
        put_device(&store, &[]).await;

        let flow = Arc::new(flow(&store, &broker));
        let mut states = flow.watch();
        let runner = tokio::spawn({
            let flow = Arc::clone(&flow);
            async move { flow.run(true).await }
        });

        states
            .wait_for(|s| *s == RegistrationState::Polling)
            .await
            .unwrap();
        store
            .commit(
                Write::update(
                    device_path("d1"),
                    vec![(
                        FieldPath::field("registeredUsers"),
                        FieldValue::ArrayUnion(vec![Value::from("u1")]),
                    )],
                )
                .into(),
            )
            .await
            .unwrap();

        let outcome = runner.await.unwrap().unwrap();
        assert_eq!(outcome, RegistrationState::Registered);
        assert_eq!(flow.state(), RegistrationState::Registered);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_poll_times_out() {
        let store = MemoryStore::default();
        let broker = Arc::new(MemoryBroker::new());
        put_device(&store, &[]).await;

        let outcome = flow(&store, &broker).run(true).await.unwrap();
        assert_eq!(outcome, RegistrationState::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_tears_down_the_poll() {
        let store = MemoryStore::default();
        let broker = Arc::new(MemoryBroker::new());
        put_device(&store, &[]).await;

        let flow = Arc::new(flow(&store, &broker));
        let mut states = flow.watch();
        let runner = tokio::spawn({
            let flow = Arc::clone(&flow);
            async move { flow.run(true).await }
        });
        states
            .wait_for(|s| *s == RegistrationState::Polling)
            .await
            .unwrap();
        flow.cancel();

        assert_eq!(
            runner.await.unwrap().unwrap(),
            RegistrationState::Cancelled
        );
    }

    #[tokio::test]
    async fn offline_broker_still_checks_the_device() {
        let store = MemoryStore::default();
        let broker = Arc::new(MemoryBroker::new());
        broker.set_connected(false);
        put_device(&store, &["u1"]).await;

        let outcome = flow(&store, &broker).run(false).await.unwrap();
        assert_eq!(outcome, RegistrationState::AlreadyRegistered);
        assert!(broker.published().await.is_empty());
    }

    #[tokio::test]
    async fn missing_device_fails() {
        let store = MemoryStore::default();
        let broker = Arc::new(MemoryBroker::new());
        let flow = flow(&store, &broker);

        let err = flow.run(true).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(flow.state(), RegistrationState::Failed(_)));
        assert!(flow.run(true).await.is_err(), "flow is single use");
    }
}

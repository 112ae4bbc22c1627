//! Publish-only MQTT client over WebSocket, with auto-reconnect.
//!
//! Devices listen on per-capability topics (`<device>/sensor/...`); the
//! client only ever publishes QoS 0 commands to them. A background task owns
//! the socket, keeps the session alive with PINGREQ, and reconnects with
//! exponential backoff when the link drops. Publishes made while the link
//! is down are dropped, not queued.
//!
//! ```rust,ignore
//! let cancel = CancellationToken::new();
//! let config = MqttConfig::new(Url::parse("wss://broker.example.com:8884/mqtt")?);
//! let client = MqttClient::connect(config, cancel.clone());
//! client.publish("d1/sensor/camera/take_photo", payload).await?;
//! ```

mod codec;

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::broker::{Delivery, MessageBroker};
use crate::error::Error;

use self::codec::{Connect, DISCONNECT, Incoming, PINGREQ, decode, encode_connect, encode_publish};

const OUTGOING_CAPACITY: usize = 256;

// ── Configuration ────────────────────────────────────────────────────

/// Exponential backoff configuration for broker reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Give up after this many consecutive failures. `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// `ws://` or `wss://` endpoint of the broker's WebSocket listener.
    pub url: Url,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    /// PINGREQ period. Clamped to at least one second.
    pub keep_alive: Duration,
    /// Bound on the WebSocket handshake and on waiting for CONNACK.
    pub connect_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl MqttConfig {
    pub fn new(url: Url) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            url,
            client_id: format!("lookout-{}", &suffix[..12]),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Link state of the background connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Disconnected,
}

// ── MqttClient ───────────────────────────────────────────────────────

/// Handle to a running broker connection.
///
/// Call [`shutdown`](Self::shutdown) (or cancel the token passed to
/// [`connect`](Self::connect)) to send DISCONNECT and stop the task.
#[derive(Debug)]
pub struct MqttClient {
    state: watch::Receiver<BrokerState>,
    outgoing: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
}

impl MqttClient {
    /// Spawn the connection loop. Returns immediately; the first connect
    /// attempt happens in the background. Must be called inside a Tokio
    /// runtime.
    pub fn connect(config: MqttConfig, cancel: CancellationToken) -> Self {
        let (state_tx, state_rx) = watch::channel(BrokerState::Connecting);
        let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTGOING_CAPACITY);

        let task_cancel = cancel.child_token();
        tokio::spawn(async move {
            mqtt_loop(config, state_tx, outgoing_rx, task_cancel).await;
        });

        Self {
            state: state_rx,
            outgoing: outgoing_tx,
            cancel,
        }
    }

    pub fn state(&self) -> BrokerState {
        *self.state.borrow()
    }

    /// Receiver that wakes on every link state change.
    pub fn watch_state(&self) -> watch::Receiver<BrokerState> {
        self.state.clone()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl MessageBroker for MqttClient {
    fn is_connected(&self) -> bool {
        self.state() == BrokerState::Connected
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<Delivery, Error> {
        let packet = encode_publish(topic, &payload)?;

        if !self.is_connected() {
            tracing::warn!(topic, state = ?self.state(), "broker not connected, dropping publish");
            return Ok(Delivery::Dropped);
        }

        match self.outgoing.try_send(packet) {
            Ok(()) => {
                tracing::debug!(topic, bytes = payload.len(), "publish queued");
                Ok(Delivery::Sent)
            }
            Err(e) => {
                tracing::warn!(topic, error = %e, "broker link busy or closed, dropping publish");
                Ok(Delivery::Dropped)
            }
        }
    }
}

// ── Background reconnection loop ─────────────────────────────────────

async fn mqtt_loop(
    config: MqttConfig,
    state_tx: watch::Sender<BrokerState>,
    mut outgoing: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        // The session watches the token itself so it can say DISCONNECT.
        let result = connect_and_run(&config, &state_tx, &mut outgoing, &cancel, &mut attempt).await;
        if cancel.is_cancelled() {
            break;
        }

        match result {
            Ok(()) => {
                tracing::info!("broker link closed cleanly, reconnecting");
                state_tx.send_replace(BrokerState::Reconnecting { attempt: 0 });
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt, "broker connection error");

                if config.reconnect.max_retries.is_some_and(|max| attempt >= max) {
                    tracing::error!(
                        max_retries = ?config.reconnect.max_retries,
                        "broker reconnection limit reached, giving up"
                    );
                    break;
                }

                attempt += 1;
                state_tx.send_replace(BrokerState::Reconnecting { attempt });

                let delay = calculate_backoff(attempt - 1, &config.reconnect);
                tracing::info!(delay_ms = delay.as_millis() as u64, attempt, "waiting before reconnect");

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    state_tx.send_replace(BrokerState::Disconnected);
    tracing::debug!("broker loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

async fn connect_and_run(
    config: &MqttConfig,
    state_tx: &watch::Sender<BrokerState>,
    outgoing: &mut mpsc::Receiver<Bytes>,
    cancel: &CancellationToken,
    attempt: &mut u32,
) -> Result<(), Error> {
    tracing::info!(url = %config.url, "connecting to broker");

    let uri: tungstenite::http::Uri = config
        .url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;
    let request = ClientRequestBuilder::new(uri).with_sub_protocol("mqtt");

    let keep_alive = config.keep_alive.max(Duration::from_secs(1));

    let handshake = async {
        let (ws_stream, _response) =
            tokio::time::timeout(config.connect_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| Error::WebSocketConnect("handshake timed out".into()))?
                .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        let password = config.password.as_ref().map(|p| p.expose_secret().to_owned());
        let connect = encode_connect(&Connect {
            client_id: &config.client_id,
            username: config.username.as_deref(),
            password: password.as_deref().map(str::as_bytes),
            keep_alive_secs: u16::try_from(keep_alive.as_secs()).unwrap_or(u16::MAX),
        })?;
        write
            .send(Message::Binary(connect))
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        let mut buf = BytesMut::new();
        let ack = tokio::time::timeout(config.connect_timeout, async {
            loop {
                match read.next().await {
                    Some(Ok(Message::Binary(data))) => {
                        buf.extend_from_slice(&data);
                        if let Some(packet) = decode(&mut buf)? {
                            return Ok::<_, Error>(packet);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(Error::MqttProtocol("connection closed before CONNACK".into()));
                    }
                    Some(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
                    Some(Ok(_)) => {}
                }
            }
        })
        .await
        .map_err(|_| Error::MqttProtocol("timed out waiting for CONNACK".into()))??;

        match ack {
            Incoming::ConnAck { return_code: 0, .. } => {}
            Incoming::ConnAck { return_code, .. } => return Err(Error::MqttRefused(return_code)),
            other => {
                return Err(Error::MqttProtocol(format!("expected CONNACK, got {other:?}")));
            }
        }

        Ok::<_, Error>((write, read, buf))
    };

    let (mut write, mut read, mut buf) = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(()),
        session = handshake => session?,
    };

    // Anything queued while the link was down is stale.
    let mut stale = 0usize;
    while outgoing.try_recv().is_ok() {
        stale += 1;
    }
    if stale > 0 {
        tracing::debug!(stale, "discarded publishes queued before connect");
    }

    *attempt = 0;
    state_tx.send_replace(BrokerState::Connected);
    tracing::info!(client_id = %config.client_id, "broker connected");

    let mut ping = tokio::time::interval(keep_alive);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ping.tick().await;
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Binary(Bytes::from_static(&DISCONNECT))).await;
                let _ = write.close().await;
                return Ok(());
            }
            packet = outgoing.recv() => {
                let Some(packet) = packet else {
                    // Every client handle is gone.
                    let _ = write.send(Message::Binary(Bytes::from_static(&DISCONNECT))).await;
                    let _ = write.close().await;
                    cancel.cancel();
                    return Ok(());
                };
                write
                    .send(Message::Binary(packet))
                    .await
                    .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
            }
            _ = ping.tick() => {
                if awaiting_pong {
                    return Err(Error::MqttProtocol("keep-alive timed out".into()));
                }
                write
                    .send(Message::Binary(Bytes::from_static(&PINGREQ)))
                    .await
                    .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
                awaiting_pong = true;
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Binary(data))) => {
                        buf.extend_from_slice(&data);
                        while let Some(packet) = decode(&mut buf)? {
                            match packet {
                                Incoming::PingResp => awaiting_pong = false,
                                other => tracing::trace!(?other, "ignoring broker packet"),
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        if let Some(cf) = frame {
                            tracing::info!(code = %cf.code, reason = %cf.reason, "broker close frame received");
                        }
                        return Ok(());
                    }
                    Some(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
                    None => {
                        tracing::info!("broker stream ended");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// `min(initial * 2^attempt, max)` scaled by a deterministic ±25% jitter.
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    let jitter = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    Duration::from_secs_f64((capped * jitter).max(0.0))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_then_caps() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_retries: None,
        };

        let d0 = calculate_backoff(0, &config);
        let d1 = calculate_backoff(1, &config);
        let d2 = calculate_backoff(2, &config);
        assert!(d1 > d0, "{d1:?} should exceed {d0:?}");
        assert!(d2 > d1, "{d2:?} should exceed {d1:?}");

        for attempt in [10, 40, 200] {
            assert!(calculate_backoff(attempt, &config) <= Duration::from_millis(12_500));
        }
    }

    #[test]
    fn config_defaults() {
        let config = MqttConfig::new(Url::parse("ws://localhost:9001/mqtt").unwrap());
        assert!(config.client_id.starts_with("lookout-"));
        assert_eq!(config.keep_alive, Duration::from_secs(30));
        assert!(config.reconnect.max_retries.is_none());
    }

    #[tokio::test]
    async fn publish_while_disconnected_is_dropped() {
        let mut config = MqttConfig::new(Url::parse("ws://127.0.0.1:9/mqtt").unwrap());
        config.reconnect.max_retries = Some(0);
        let cancel = CancellationToken::new();
        let client = MqttClient::connect(config, cancel.clone());

        let delivery = client
            .publish("d1/sensor/camera/take_photo", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert_eq!(delivery, Delivery::Dropped);
        assert!(!client.is_connected());
        client.shutdown();
    }

    #[tokio::test]
    async fn loop_gives_up_after_retry_limit() {
        let mut config = MqttConfig::new(Url::parse("ws://127.0.0.1:9/mqtt").unwrap());
        config.reconnect.max_retries = Some(0);
        config.connect_timeout = Duration::from_millis(500);
        let client = MqttClient::connect(config, CancellationToken::new());

        let mut state = client.watch_state();
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == BrokerState::Disconnected),
        )
        .await
        .unwrap()
        .unwrap();
    }

    #[tokio::test]
    async fn invalid_topic_is_an_error() {
        let client = MqttClient::connect(
            MqttConfig::new(Url::parse("ws://127.0.0.1:9/mqtt").unwrap()),
            CancellationToken::new(),
        );
        assert!(client.publish("a/#", Bytes::new()).await.is_err());
        client.shutdown();
    }
}

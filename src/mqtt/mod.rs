//! MQTT endpoint manager (§4.4).
//!
//! Grounded in `mqttbuf.c`: a subscribe-side triple (topic, payload,
//! timestamp) fed by the broker's incoming publishes, and a publish-side
//! triple drained by a writer loop that publishes at QoS 1 and blocks for
//! the broker's ack before considering the message sent — the original
//! never re-enqueues on a failed/timed-out publish, it simply drops and
//! logs, which this module preserves.

pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use crate::buffer::synced::BufferTriple;
use crate::constants::{DEFAULT_BUFFER_CAPACITY, DEFAULT_PUBLISH_POLL_INTERVAL, DEFAULT_PUBLISH_RETRIES};
use crate::endpoint::{ConnState, EndpointState, ShutdownSignal};
use crate::error::BridgeResult;

use transport::{MqttMessage, MqttTransport};

/// Owns both triples and the connectivity state for the MQTT endpoint.
pub struct MqttEndpoint {
    state: EndpointState,
    transport: tokio::sync::Mutex<Option<Arc<dyn MqttTransport>>>,
    /// Inbound: messages arriving from subscribed topics, awaiting the
    /// translator.
    subscribe_triple: BufferTriple,
    /// Outbound: messages the translator wants published.
    publish_triple: BufferTriple,
    last_error: std::sync::Mutex<Option<String>>,
}

impl MqttEndpoint {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: EndpointState::new(),
            transport: tokio::sync::Mutex::new(None),
            subscribe_triple: BufferTriple::new(DEFAULT_BUFFER_CAPACITY),
            publish_triple: BufferTriple::new(DEFAULT_BUFFER_CAPACITY),
            last_error: std::sync::Mutex::new(None),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnState {
        self.state.get()
    }

    #[must_use]
    pub fn subscribe_triple(&self) -> &BufferTriple {
        &self.subscribe_triple
    }

    #[must_use]
    pub fn publish_triple(&self) -> &BufferTriple {
        &self.publish_triple
    }

    /// Gate and enqueue one outbound publish (§4.4 publish-path step 1).
    ///
    /// Mirrors `mqttbuf_setPubMsgToBuffer`: returns `Ok(None)` without
    /// enqueuing if the endpoint is DISCONNECTED, or if `topic` or `payload`
    /// is empty. Returns `Ok(Some(()))` once the message has been enqueued
    /// onto `publish_triple` for the publish-side loop to pick up.
    pub fn set_pub(&self, topic: &str, payload: &[u8], timestamp_ms: u64) -> BridgeResult<Option<()>> {
        if self.state() != ConnState::Connected || topic.is_empty() || payload.is_empty() {
            return Ok(None);
        }
        self.publish_triple.enqueue([
            topic.as_bytes().to_vec(),
            payload.to_vec(),
            timestamp_ms.to_le_bytes().to_vec(),
        ]);
        Ok(Some(()))
    }

    /// Pop and clear the last subscribe-side error (get-and-reset, per §4.4
    /// — a stale error must not be reported twice).
    #[must_use]
    pub fn take_last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn set_last_error(&self, message: String) {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(message);
    }

    /// Connect (or accept an already-opened transport), subscribing to
    /// `topics`. Flushes both triples only on a DISCONNECTED → CONNECTED
    /// transition (mirrors the combined read+write flush in the TCP/CAN
    /// endpoints, generalized to subscribe+publish here).
    pub async fn connect(&self, transport: Arc<dyn MqttTransport>, topics: &[String]) -> BridgeResult<()> {
        transport.subscribe(topics).await?;
        *self.transport.lock().await = Some(transport);
        let previous = self.state.swap(ConnState::Connected);
        if previous == ConnState::Disconnected {
            self.subscribe_triple.clean();
            self.publish_triple.clean();
            log::info!("mqtt: connected, triples flushed");
        } else {
            log::info!("mqtt: connected");
        }
        Ok(())
    }

    pub async fn close(&self, clean_buffers: bool) {
        self.state.set(ConnState::Disconnected);
        *self.transport.lock().await = None;
        if clean_buffers {
            self.subscribe_triple.clean();
            self.publish_triple.clean();
        }
        log::info!("mqtt: disconnected (clean_buffers={clean_buffers})");
    }

    async fn transport_handle(&self) -> Option<Arc<dyn MqttTransport>> {
        self.transport.lock().await.clone()
    }

    /// One subscribe-side tick: pull the next inbound publish (if any) and
    /// enqueue it into `subscribe_triple`. Zero-length topic or payload is
    /// rejected and recorded via [`MqttEndpoint::take_last_error`] rather
    /// than enqueued, per §4.4's boundary rule. The timestamp is captured
    /// here, immediately after `next_message` returns a message — not by the
    /// caller before the (up to `poll_timeout`-long) wait — per §4.2's
    /// capture rule.
    pub async fn subscribe_tick(&self, poll_timeout: Duration) -> BridgeResult<bool> {
        let Some(transport) = self.transport_handle().await else {
            return Ok(false);
        };
        let Some(message) = transport.next_message(poll_timeout).await? else {
            return Ok(false);
        };
        let now_ms = crate::time::now_ms();
        if message.topic.is_empty() || message.payload.is_empty() {
            self.set_last_error("rejected zero-length topic or payload".to_string());
            return Ok(false);
        }
        self.subscribe_triple.enqueue([
            message.topic.into_bytes(),
            message.payload,
            now_ms.to_le_bytes().to_vec(),
        ]);
        Ok(true)
    }

    /// One publish-side tick: dequeue the next outbound message (if any),
    /// publish it once at QoS 1, and poll for the ack for up to
    /// [`DEFAULT_PUBLISH_RETRIES`] extra windows before giving up and
    /// dropping it — no re-enqueue, no re-send, matching the original's
    /// "ack-or-drop" publish discipline (S5).
    pub async fn publish_tick(&self) -> BridgeResult<bool> {
        let Some(transport) = self.transport_handle().await else {
            return Ok(false);
        };
        let Some([topic, payload, _timestamp]) = self.publish_triple.dequeue()? else {
            return Ok(false);
        };
        let topic = String::from_utf8_lossy(&topic).into_owned();

        match transport
            .publish_and_confirm(&topic, &payload, DEFAULT_PUBLISH_POLL_INTERVAL, DEFAULT_PUBLISH_RETRIES)
            .await
        {
            Ok(()) => Ok(true),
            Err(err) => {
                log::warn!("mqtt: publish to {topic} abandoned after {DEFAULT_PUBLISH_RETRIES} retries: {err}");
                Ok(false)
            }
        }
    }
}

impl Default for MqttEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive the subscribe-side loop until shutdown.
pub async fn run_subscribe_loop(endpoint: Arc<MqttEndpoint>, shutdown: ShutdownSignal, poll_timeout: Duration) {
    while !shutdown.is_triggered() {
        match endpoint.subscribe_tick(poll_timeout).await {
            Ok(_) => {}
            Err(err) => {
                log::error!("mqtt: subscribe loop error: {err}");
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
    }
}

/// Drive the publish-side loop until shutdown.
pub async fn run_publish_loop(endpoint: Arc<MqttEndpoint>, shutdown: ShutdownSignal) {
    while !shutdown.is_triggered() {
        match endpoint.publish_tick().await {
            Ok(true) => {}
            Ok(false) => tokio::time::sleep(crate::constants::WRITER_IDLE_SLEEP).await,
            Err(err) => {
                log::error!("mqtt: publish loop error: {err}");
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
    }
}

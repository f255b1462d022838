//! MQTT transport driver adapter, backed by `rumqttc`.
//!
//! Mirrors `can/transport.rs`'s shape: a small trait isolates the rest of
//! the MQTT endpoint manager from `rumqttc`'s connection/event-loop types so
//! the subscribe/publish state machine (§4.4) can be tested against an
//! in-memory double instead of a live broker.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;

use crate::error::{BridgeError, BridgeResult};

/// One received publish: topic, payload, and (if present) the packet id the
/// broker assigned — opaque to everything above this adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Minimal surface the MQTT endpoint manager needs from a broker connection.
#[async_trait::async_trait]
pub trait MqttTransport: Send + Sync {
    /// Subscribe to `topics` at QoS 1.
    async fn subscribe(&self, topics: &[String]) -> BridgeResult<()>;

    /// Publish one message at QoS 1 exactly once, then poll for the
    /// broker's PUBACK for up to `retries + 1` windows of `poll_interval`
    /// each. A timed-out poll re-checks for the same ack; it never
    /// re-sends the publish.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::PubTimeoutError`] if no ack arrives within
    /// the full poll budget, or [`BridgeError::SocketError`] on a
    /// transport failure.
    async fn publish_and_confirm(
        &self,
        topic: &str,
        payload: &[u8],
        poll_interval: Duration,
        retries: u32,
    ) -> BridgeResult<()>;

    /// Receive the next inbound publish, if one arrives before `timeout`.
    async fn next_message(&self, timeout: Duration) -> BridgeResult<Option<MqttMessage>>;
}

/// `MqttTransport` backed by a real `rumqttc` client + event loop.
///
/// `rumqttc::EventLoop::poll()` must be driven continuously by a background
/// task for the client to make progress; [`RumqttcTransport::spawn`] starts
/// that task and fans incoming events out over channels this adapter reads
/// from.
pub struct RumqttcTransport {
    client: AsyncClient,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<MqttMessage>>,
    acks: tokio::sync::Mutex<mpsc::UnboundedReceiver<u16>>,
}

impl RumqttcTransport {
    /// Connect to `broker` (host:port form is accepted via `MqttOptions`
    /// parsing conventions) under `client_id`, spawning the background
    /// poll loop.
    #[must_use]
    pub fn spawn(broker: &str, client_id: &str) -> Self {
        let mut options = MqttOptions::new(client_id, host_of(broker), port_of(broker));
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut event_loop) = AsyncClient::new(options, 64);
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let _ = message_tx.send(MqttMessage {
                            topic: publish.topic,
                            payload: publish.payload.to_vec(),
                        });
                    }
                    Ok(Event::Incoming(Packet::PubAck(ack))) => {
                        let _ = ack_tx.send(ack.pkid);
                    }
                    Ok(_) => {}
                    Err(err) => {
                        log::warn!("mqtt: event loop error: {err}");
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                }
            }
        });

        Self {
            client,
            incoming: tokio::sync::Mutex::new(message_rx),
            acks: tokio::sync::Mutex::new(ack_rx),
        }
    }
}

#[async_trait::async_trait]
impl MqttTransport for RumqttcTransport {
    async fn subscribe(&self, topics: &[String]) -> BridgeResult<()> {
        for topic in topics {
            self.client
                .subscribe(topic, QoS::AtLeastOnce)
                .await
                .map_err(|err| BridgeError::SocketError(format!("subscribe {topic}: {err}")))?;
        }
        Ok(())
    }

    async fn publish_and_confirm(
        &self,
        topic: &str,
        payload: &[u8],
        poll_interval: Duration,
        retries: u32,
    ) -> BridgeResult<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .await
            .map_err(|err| BridgeError::SocketError(format!("publish {topic}: {err}")))?;

        let mut acks = self.acks.lock().await;
        for attempt in 0..=retries {
            match tokio::time::timeout(poll_interval, acks.recv()).await {
                Ok(Some(_pkid)) => return Ok(()),
                Ok(None) => return Err(BridgeError::SocketError("ack channel closed".to_string())),
                Err(_elapsed) if attempt < retries => continue,
                Err(_elapsed) => return Err(BridgeError::PubTimeoutError),
            }
        }
        Err(BridgeError::PubTimeoutError)
    }

    async fn next_message(&self, timeout: Duration) -> BridgeResult<Option<MqttMessage>> {
        let mut incoming = self.incoming.lock().await;
        match tokio::time::timeout(timeout, incoming.recv()).await {
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => Err(BridgeError::Closed),
            Err(_elapsed) => Ok(None),
        }
    }
}

fn host_of(broker: &str) -> String {
    broker.split(':').next().unwrap_or(broker).to_string()
}

fn port_of(broker: &str) -> u16 {
    broker
        .rsplit(':')
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883)
}

#[cfg(test)]
pub mod test_support {
    //! An in-memory `MqttTransport` double for exercising the subscribe/
    //! publish state machine without a live broker.

    use super::{BridgeError, BridgeResult, MqttMessage, MqttTransport};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Default)]
    pub struct FakeMqttTransport {
        pub subscribed: Mutex<Vec<String>>,
        pub published: Mutex<Vec<(String, Vec<u8>)>>,
        pub inbound: Mutex<Vec<MqttMessage>>,
        pub fail_next_publish: Mutex<bool>,
        pub timeout_next_publish: Mutex<bool>,
        /// Unlike `timeout_next_publish`, this is not consumed on read — every
        /// publish attempt times out for as long as this stays `true`. Used to
        /// simulate a broker that never acks, exhausting the retry budget.
        pub always_timeout_publish: Mutex<bool>,
        /// Number of `publish_and_confirm` calls observed — a retried ack
        /// poll must not show up here as a second call.
        pub publish_calls: Mutex<u32>,
    }

    #[async_trait::async_trait]
    impl MqttTransport for FakeMqttTransport {
        async fn subscribe(&self, topics: &[String]) -> BridgeResult<()> {
            self.subscribed.lock().unwrap().extend_from_slice(topics);
            Ok(())
        }

        async fn publish_and_confirm(
            &self,
            topic: &str,
            payload: &[u8],
            _poll_interval: Duration,
            _retries: u32,
        ) -> BridgeResult<()> {
            *self.publish_calls.lock().unwrap() += 1;
            if *self.always_timeout_publish.lock().unwrap() {
                return Err(BridgeError::PubTimeoutError);
            }
            if std::mem::take(&mut *self.timeout_next_publish.lock().unwrap()) {
                return Err(BridgeError::PubTimeoutError);
            }
            if std::mem::take(&mut *self.fail_next_publish.lock().unwrap()) {
                return Err(BridgeError::SocketError("simulated failure".to_string()));
            }
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.to_vec()));
            Ok(())
        }

        async fn next_message(&self, _timeout: Duration) -> BridgeResult<Option<MqttMessage>> {
            Ok(self.inbound.lock().unwrap().pop())
        }
    }
}

//! Pass-through translator task.
//!
//! The "translator" named in §2's component table owns the HAPCAN-specific
//! application logic (node/channel mapping, MQTT topic scheme, and so on) —
//! deliberately out of scope for this crate (§1 Non-goals). What lives here
//! is the minimum needed to exercise the bridge end-to-end: every inbound
//! frame or message on one endpoint's read side is relayed unmodified onto
//! every other endpoint's write side, so the core's buffering and
//! concurrency contract can be driven by a real multi-endpoint scenario
//! (S1) without depending on a translator that understands HAPCAN payloads.

use std::sync::Arc;
use std::time::Duration;

use crate::buffer::synced::{pair_message, unpack_pair_message};
use crate::can::CanManager;
use crate::endpoint::ShutdownSignal;
use crate::mqtt::MqttEndpoint;
use crate::tcp_server::TcpServerEndpoint;

/// Relay CAN reads onto the MQTT publish triple and the TCP write pair, and
/// MQTT/TCP reads back onto every CAN channel's outbound pair.
///
/// Topic naming for relayed CAN frames is `hapcan/rx`; this is a stand-in
/// scheme, not a protocol contract — the real translator defines its own.
pub async fn run_echo_loop(
    can: Arc<CanManager>,
    mqtt: Arc<MqttEndpoint>,
    tcp: Arc<TcpServerEndpoint>,
    shutdown: ShutdownSignal,
) {
    const ECHO_TOPIC: &str = "hapcan/rx";

    while !shutdown.is_triggered() {
        let mut relayed = false;

        for channel in can.channels() {
            if let Ok(Some(message)) = channel.inbound().dequeue() {
                let (frame, timestamp_ms) = unpack_pair_message(message);
                // set_pub silently drops the relay when MQTT is DISCONNECTED
                // (§4.4 publish-path step 1) rather than queueing stale work.
                let _ = mqtt.set_pub(ECHO_TOPIC, &frame, timestamp_ms);
                tcp.write_pair().enqueue(pair_message(&frame, timestamp_ms));
                relayed = true;
            }
        }

        if let Ok(Some([_topic, payload, timestamp])) = mqtt.subscribe_triple().dequeue() {
            let timestamp_ms = u64::from_le_bytes(timestamp.try_into().unwrap_or([0; 8]));
            for channel in can.channels() {
                channel.outbound().enqueue(pair_message(&payload, timestamp_ms));
            }
            relayed = true;
        }

        if let Ok(Some(message)) = tcp.read_pair().dequeue() {
            let (payload, timestamp_ms) = unpack_pair_message(message);
            for channel in can.channels() {
                channel.outbound().enqueue(pair_message(&payload, timestamp_ms));
            }
            relayed = true;
        }

        if !relayed {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can::transport::test_support::FakeCanTransport;
    use crate::mqtt::transport::test_support::FakeMqttTransport;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_can_frame_relays_to_mqtt_and_tcp() {
        let can = Arc::new(CanManager::new(&[0], ShutdownSignal::new()));
        can.channel(0).unwrap().connect(Arc::new(FakeCanTransport::default()));
        can.channel(0).unwrap().inbound().enqueue(pair_message(b"frame", 10));

        let mqtt = Arc::new(MqttEndpoint::new());
        mqtt.connect(Arc::new(FakeMqttTransport::default()), &[]).await.unwrap();
        let tcp = Arc::new(TcpServerEndpoint::new());

        let shutdown = ShutdownSignal::new();
        let shutdown_clone = shutdown.clone();
        let task = tokio::spawn(run_echo_loop(
            Arc::clone(&can),
            Arc::clone(&mqtt),
            Arc::clone(&tcp),
            shutdown_clone,
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.trigger();
        let _ = task.await;

        assert_eq!(mqtt.publish_triple().count(), 1);
        assert_eq!(tcp.write_pair().count(), 1);
    }
}

//! Bridge supervisor: owns every endpoint manager and the configuration
//! watcher, and wires their tasks together.
//!
//! # Module structure
//!
//! - `can`: CAN endpoint manager (one task pair per channel)
//! - `mqtt`: MQTT endpoint manager (subscribe/publish tasks)
//! - `tcp_server`: TCP endpoint manager (accept/read/write tasks)
//! - `translator`: pass-through relay wiring the three together
//! - `config`: hot-reload watcher, polled on its own task
//!
//! Grounded in the supervisor-loop idiom of `hub/run.rs` — a long-lived
//! struct owning shared state, spawning one task per concern, and reacting
//! to a shutdown signal — simplified here since the bridge has no TUI/Relay
//! adapters to fan state out to.

use std::sync::Arc;

use crate::can::CanManager;
use crate::config::{BridgeConfig, ConfigWatcher};
use crate::constants::{CONFIG_POLL_INTERVAL, POLL_TIMEOUT};
use crate::endpoint::ShutdownSignal;
use crate::mqtt::transport::RumqttcTransport;
use crate::mqtt::MqttEndpoint;
use crate::tcp_server::TcpServerEndpoint;

/// Everything the bridge needs to run: the three endpoint managers, the
/// config watcher, and the shared shutdown signal.
pub struct Supervisor {
    pub can: Arc<CanManager>,
    pub mqtt: Arc<MqttEndpoint>,
    pub tcp: Arc<TcpServerEndpoint>,
    pub shutdown: ShutdownSignal,
    config_path: std::path::PathBuf,
}

impl Supervisor {
    #[must_use]
    pub fn new(config_path: std::path::PathBuf) -> Self {
        let shutdown = ShutdownSignal::new();
        let watcher = ConfigWatcher::new(config_path.clone());
        let channel_indices: Vec<u8> = watcher
            .current()
            .can_channels
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.channel)
            .collect();

        Self {
            can: Arc::new(CanManager::new(&channel_indices, shutdown.clone())),
            mqtt: Arc::new(MqttEndpoint::new()),
            tcp: Arc::new(TcpServerEndpoint::new()),
            shutdown,
            config_path,
        }
    }

    /// Bring up every endpoint per the initial configuration, then spawn all
    /// reader/writer/accept tasks plus the config-reload poller and the
    /// pass-through translator. Returns once `shutdown` is triggered and
    /// every task has wound down.
    pub async fn run(&self) {
        let mut watcher = ConfigWatcher::new(self.config_path.clone());
        self.apply_initial_config(watcher.current()).await;

        let mut tasks = Vec::new();

        for channel in self.can.channels() {
            let reader_channel = Arc::clone(channel);
            let shutdown = self.shutdown.clone();
            tasks.push(tokio::spawn(crate::can::run_reader_loop(reader_channel, shutdown)));

            let writer_channel = Arc::clone(channel);
            let shutdown = self.shutdown.clone();
            tasks.push(tokio::spawn(crate::can::run_writer_loop(writer_channel, shutdown)));
        }

        {
            let mqtt = Arc::clone(&self.mqtt);
            let shutdown = self.shutdown.clone();
            tasks.push(tokio::spawn(crate::mqtt::run_subscribe_loop(mqtt, shutdown, POLL_TIMEOUT)));
        }
        {
            let mqtt = Arc::clone(&self.mqtt);
            let shutdown = self.shutdown.clone();
            tasks.push(tokio::spawn(crate::mqtt::run_publish_loop(mqtt, shutdown)));
        }

        {
            let tcp = Arc::clone(&self.tcp);
            let shutdown = self.shutdown.clone();
            tasks.push(tokio::spawn(crate::tcp_server::run_accept_loop(tcp, shutdown)));
        }
        {
            let tcp = Arc::clone(&self.tcp);
            let shutdown = self.shutdown.clone();
            tasks.push(tokio::spawn(crate::tcp_server::run_read_loop(tcp, shutdown)));
        }
        {
            let tcp = Arc::clone(&self.tcp);
            let shutdown = self.shutdown.clone();
            tasks.push(tokio::spawn(crate::tcp_server::run_write_loop(tcp, shutdown)));
        }

        {
            let can = Arc::clone(&self.can);
            let mqtt = Arc::clone(&self.mqtt);
            let tcp = Arc::clone(&self.tcp);
            let shutdown = self.shutdown.clone();
            tasks.push(tokio::spawn(crate::translator::run_echo_loop(can, mqtt, tcp, shutdown)));
        }

        {
            let shutdown = self.shutdown.clone();
            let mqtt = Arc::clone(&self.mqtt);
            let tcp = Arc::clone(&self.tcp);
            tasks.push(tokio::spawn(async move {
                while !shutdown.is_triggered() {
                    tokio::time::sleep(CONFIG_POLL_INTERVAL).await;
                    if let Some(flags) = watcher.reload() {
                        log::info!(
                            "supervisor: config reload (mqtt={}, socket_server={})",
                            flags.reload_mqtt,
                            flags.reload_socket_server
                        );
                        let config = watcher.current().clone();
                        if flags.reload_mqtt {
                            Self::bounce_mqtt(&mqtt, &config).await;
                        }
                        if flags.reload_socket_server {
                            Self::bounce_socket_server(&tcp, &config).await;
                        }
                    }
                }
            }));
        }

        for task in tasks {
            let _ = task.await;
        }
    }

    async fn apply_initial_config(&self, config: &BridgeConfig) {
        Self::bounce_mqtt(&self.mqtt, config).await;
        Self::bounce_socket_server(&self.tcp, config).await;
    }

    /// Re-apply the MQTT endpoint's configuration: disconnect the current
    /// broker connection (if any) and, if still enabled, reconnect under the
    /// new broker/client-id/topics. Bouncing always closes first so a
    /// disabled endpoint is left disconnected rather than stuck on stale
    /// settings (§4.6: "the supervisor uses these to bounce only the
    /// affected endpoint").
    async fn bounce_mqtt(mqtt: &Arc<MqttEndpoint>, config: &BridgeConfig) {
        mqtt.close(true).await;
        if config.enable_mqtt && !config.mqtt_broker.is_empty() {
            let transport = Arc::new(RumqttcTransport::spawn(&config.mqtt_broker, &config.mqtt_client_id));
            if let Err(err) = mqtt.connect(transport, &config.subscribe_topics).await {
                log::error!("supervisor: mqtt connect failed: {err}");
            }
        }
    }

    /// Re-apply the TCP server endpoint's configuration: tear down the
    /// listener entirely (a changed port cannot be served by the old
    /// binding) and, if still enabled, rebind and start accepting again.
    async fn bounce_socket_server(tcp: &Arc<TcpServerEndpoint>, config: &BridgeConfig) {
        tcp.close_listener().await;
        if config.enable_socket_server {
            let bind_addr = format!("0.0.0.0:{}", config.socket_server_port);
            if let Err(err) = tcp.open(&bind_addr).await {
                log::error!("supervisor: tcp_server open failed: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_supervisor_starts_with_no_enabled_channels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{}").unwrap();

        let supervisor = Supervisor::new(path);
        assert!(supervisor.can.channels().is_empty());
    }
}

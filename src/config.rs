//! Configuration provider and hot-reload watcher.
//!
//! `BridgeConfig` is the typed, read-only snapshot described in §3/§4.7.
//! [`ConfigWatcher`] detects on-disk changes by `mtime` comparison (not
//! filesystem events — see §4.6) and computes the targeted `reload_mqtt` /
//! `reload_socket_server` flags so the supervisor only bounces the endpoint
//! whose configuration actually changed.
//!
//! The original C implementation (`config.c`) returned `CONFIG_FILE_UNCHANGED`
//! when a change *was* detected — an inverted name left over from an early
//! revision. [`ConfigWatcher::poll_changed`] surfaces a plain `bool` named
//! for what it means, not a misleading constant (§9).

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// One CAN channel's configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanChannelConfig {
    pub channel: u8,
    #[serde(default)]
    pub enabled: bool,
}

/// Typed, read-only configuration snapshot (§3/§4.7).
///
/// Unrecognized keys are preserved in `extra` rather than rejected, matching
/// "arbitrary additional keys consumed by the translator" (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub enable_mqtt: bool,
    pub mqtt_broker: String,
    pub mqtt_client_id: String,
    pub subscribe_topics: Vec<String>,
    pub enable_socket_server: bool,
    pub socket_server_port: String,
    pub can_channels: Vec<CanChannelConfig>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enable_mqtt: false,
            mqtt_broker: String::new(),
            mqtt_client_id: String::new(),
            subscribe_topics: Vec::new(),
            enable_socket_server: false,
            socket_server_port: String::new(),
            can_channels: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }
}

impl BridgeConfig {
    /// Parse a configuration snapshot from JSON text.
    ///
    /// Falls back to `BridgeConfig::default()` on parse failure per §4.6's
    /// failure semantics — a malformed file must not crash the process; the
    /// caller is expected to log the fallback.
    #[must_use]
    pub fn from_json_str(text: &str) -> Self {
        serde_json::from_str(text).unwrap_or_else(|err| {
            log::warn!("config: failed to parse configuration, using defaults: {err}");
            Self::default()
        })
    }

    /// Load a configuration snapshot from `path`, falling back to defaults
    /// if the file is missing or malformed.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_json_str(&text),
            Err(err) => {
                log::warn!(
                    "config: could not read {}: {err}, using defaults",
                    path.display()
                );
                Self::default()
            }
        }
    }

    /// The subset of fields that drive `reload_mqtt` (§4.6 step 1/3).
    fn mqtt_fields(&self) -> (bool, &str, &str, &[String]) {
        (
            self.enable_mqtt,
            &self.mqtt_broker,
            &self.mqtt_client_id,
            &self.subscribe_topics,
        )
    }

    /// The subset of fields that drive `reload_socket_server`.
    fn socket_server_fields(&self) -> (bool, &str) {
        (self.enable_socket_server, &self.socket_server_port)
    }
}

/// Default path resolution: env override, else a platform config directory,
/// else a project-relative path in test mode.
#[must_use]
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("HAPCAN_BRIDGE_CONFIG") {
        return PathBuf::from(path);
    }
    if crate::env::is_test_mode() {
        return PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/hapcan-bridge.json");
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hapcan-bridge")
        .join("config.json")
}

/// Targeted reload flags computed by comparing two configuration snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReloadFlags {
    pub reload_mqtt: bool,
    pub reload_socket_server: bool,
}

/// Watches a configuration file's `mtime` and computes targeted reload
/// flags when a change is observed (§4.6).
#[derive(Debug)]
pub struct ConfigWatcher {
    path: PathBuf,
    last_mtime: Option<SystemTime>,
    current: BridgeConfig,
}

impl ConfigWatcher {
    /// Create a watcher that has already loaded the initial configuration.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        let current = BridgeConfig::load(&path);
        let last_mtime = file_mtime(&path);
        Self {
            path,
            last_mtime,
            current,
        }
    }

    #[must_use]
    pub fn current(&self) -> &BridgeConfig {
        &self.current
    }

    /// Cheap check: has the file's `mtime` moved since the last observation?
    ///
    /// Does not reparse the file; callers that need the targeted reload
    /// flags should call [`ConfigWatcher::reload`] directly, which performs
    /// this check internally before doing any work.
    #[must_use]
    pub fn poll_changed(&self) -> bool {
        file_mtime(&self.path) != self.last_mtime
    }

    /// If the file changed, reparse it and compute targeted reload flags.
    ///
    /// Returns `None` if no change was observed (mirrors the original's
    /// `isFileChanged` gate before `config_reload` does any work).
    pub fn reload(&mut self) -> Option<ReloadFlags> {
        if !self.poll_changed() {
            return None;
        }

        let previous = self.current.clone();
        self.current = BridgeConfig::load(&self.path);
        self.last_mtime = file_mtime(&self.path);

        let (old_enable_mqtt, old_broker, old_id, old_topics) = previous.mqtt_fields();
        let (new_enable_mqtt, new_broker, new_id, new_topics) = self.current.mqtt_fields();
        // Topic-list comparison is element-wise (Vec equality), intentionally
        // order-sensitive per §9 — do not "fix" this to set equality.
        let reload_mqtt = old_enable_mqtt != new_enable_mqtt
            || old_broker != new_broker
            || old_id != new_id
            || old_topics != new_topics;

        let (old_enable_server, old_port) = previous.socket_server_fields();
        let (new_enable_server, new_port) = self.current.socket_server_fields();
        let reload_socket_server = old_enable_server != new_enable_server || old_port != new_port;

        log::info!(
            "config: reload detected (reload_mqtt={reload_mqtt}, reload_socket_server={reload_socket_server})"
        );

        Some(ReloadFlags {
            reload_mqtt,
            reload_socket_server,
        })
    }
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

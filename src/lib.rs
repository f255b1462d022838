// Library modules
pub mod buffer;
pub mod can;
pub mod config;
pub mod constants;
pub mod endpoint;
pub mod env;
pub mod error;
pub mod mqtt;
pub mod supervisor;
pub mod tcp_server;
pub mod time;
pub mod translator;

// Re-export commonly used types
pub use buffer::{BufferHandle, BufferRegistry, BoundedBuffer};
pub use buffer::synced::{BufferPair, BufferTriple, SyncedBuffers};
pub use can::{CanChannel, CanManager};
pub use config::{BridgeConfig, ConfigWatcher};
pub use endpoint::{ConnState, EndpointState, ShutdownSignal};
pub use error::{BridgeError, BridgeResult, ReadOutcome};
pub use mqtt::MqttEndpoint;
pub use supervisor::Supervisor;
pub use tcp_server::TcpServerEndpoint;

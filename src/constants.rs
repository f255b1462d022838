//! Application-wide constants for the HAPCAN bridge.
//!
//! This module centralizes all magic numbers so the buffer, transport, and
//! reload code don't sprinkle bare literals through the implementation.
//!
//! # Categories
//!
//! - **Buffers**: registry ceilings and per-buffer capacity
//! - **Frames**: per-transport payload size limits
//! - **Timeouts**: poll and publish-acknowledgement timing

use std::time::Duration;

// ============================================================================
// Buffer registry
// ============================================================================

/// Maximum number of `BoundedBuffer`s the process-wide registry will hand out.
///
/// Each endpoint's inbound/outbound pair (or MQTT's two triples) claims a
/// handful of these; the ceiling exists purely to catch a runaway caller
/// registering buffers in a loop.
pub const MAX_REGISTERED_BUFFERS: usize = 30;

/// Maximum element capacity for any single `BoundedBuffer`.
pub const MAX_BUFFER_CAPACITY: usize = 2000;

/// Default capacity used for CAN, MQTT, and TCP endpoint buffers.
pub const DEFAULT_BUFFER_CAPACITY: usize = 2000;

// ============================================================================
// Frames
// ============================================================================

/// Maximum payload length accepted on a single TCP-server `recv`.
///
/// HAPCAN-over-TCP frames are at most 15 bytes; anything larger observed on
/// the wire is treated as `Overflow` rather than silently truncated.
pub const HAPCAN_SOCKET_DATA_LEN: usize = 15;

/// Number of CAN data bytes in a classic CAN frame.
pub const CAN_DATA_LEN: usize = 8;

// ============================================================================
// Timeouts & polling
// ============================================================================

/// Poll timeout used by CAN and TCP reader loops.
///
/// Bounds how long a reader blocks before re-checking the endpoint's state
/// and shutdown flag, which in turn bounds shutdown latency.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Sleep interval for a writer loop that finds its outbound queue empty.
pub const WRITER_IDLE_SLEEP: Duration = Duration::from_millis(20);

/// Interval at which the configuration file's mtime is polled for changes.
pub const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default number of publish-acknowledgement polls before giving up.
pub const DEFAULT_PUBLISH_RETRIES: u32 = 5;

/// Default spacing between publish-acknowledgement polls.
pub const DEFAULT_PUBLISH_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_ceilings_are_positive() {
        assert!(MAX_REGISTERED_BUFFERS > 0);
        assert!(MAX_BUFFER_CAPACITY >= DEFAULT_BUFFER_CAPACITY);
    }

    #[test]
    fn test_poll_timeout_bounds_shutdown_latency() {
        // Reader loops must re-check shutdown at least 5x/sec.
        assert!(POLL_TIMEOUT <= Duration::from_millis(200));
    }
}

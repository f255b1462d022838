//! Classified result kind shared by every endpoint manager.
//!
//! The original C core returned ad-hoc integer sentinels (`-1`, `-2`, `-4`,
//! ...) per call site; this module replaces them with one exhaustive enum
//! per §7 of the design notes. Recoverable conditions (`NoData`, `Timeout`,
//! `ErrorFrame`) are ordinary `Ok` variants of the caller's return type, not
//! `BridgeError` — this enum only carries conditions a caller must act on.

use std::fmt;

/// Classified failure kind for buffer, transport, and protocol operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Caller misuse: invalid channel, empty required argument.
    ParameterError(String),
    /// Buffer full beyond recovery, pair/triple out of sync, or a pop/size
    /// mismatch. Pair desync is fatal to the owning endpoint.
    BufferError(String),
    /// Transport-level failure: poll failed, short read/write, connect failed.
    SocketError(String),
    /// Transport failure that isn't cleanly classified as the above.
    SocketOtherError(String),
    /// Publish was not acknowledged by the broker within the retry budget.
    PubTimeoutError,
    /// Peer closed the connection (TCP).
    Closed,
    /// Oversized read (TCP `recv` larger than the frame's max length).
    Overflow,
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ParameterError(msg) => write!(f, "parameter error: {msg}"),
            Self::BufferError(msg) => write!(f, "buffer error: {msg}"),
            Self::SocketError(msg) => write!(f, "socket error: {msg}"),
            Self::SocketOtherError(msg) => write!(f, "socket error (other): {msg}"),
            Self::PubTimeoutError => write!(f, "publish acknowledgement timed out"),
            Self::Closed => write!(f, "peer closed the connection"),
            Self::Overflow => write!(f, "oversized read"),
        }
    }
}

impl std::error::Error for BridgeError {}

/// Result alias used throughout the bridge core.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Outcome of a single reader-loop poll iteration.
///
/// `ErrorFrame` and `Timeout` are deliberately not part of `BridgeError`:
/// both are absorbed inside the reader loop and never bubble to the
/// supervisor (§7 propagation policy).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome<T> {
    /// A frame was read and is ready to enqueue.
    Frame(T),
    /// Nothing was ready within the poll timeout.
    Timeout,
    /// A CAN bus-level error frame was observed; logged and discarded.
    ErrorFrame,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_human_readable() {
        let err = BridgeError::BufferError("pair out of sync".to_string());
        assert_eq!(err.to_string(), "buffer error: pair out of sync");
    }

    #[test]
    fn test_read_outcome_variants_distinct() {
        assert_ne!(ReadOutcome::<u8>::Timeout, ReadOutcome::<u8>::ErrorFrame);
    }
}

//! CAN transport driver adapter.
//!
//! Wraps the `socketcan` crate's blocking `CanSocket` behind a small trait so
//! the rest of the CAN endpoint manager (and its tests) never touch the
//! crate directly — mirrors the original's `socketcan_open/read/write/close`
//! surface (`socketcan.c`) one-for-one, but expressed as Rust types instead
//! of integer sentinels.

use std::time::Duration;

use socketcan::{CanDataFrame, CanFrame, CanSocket, ExtendedId, Frame, Id, Socket};

use crate::error::{BridgeError, BridgeResult, ReadOutcome};

/// A CAN frame as seen by the bridge core: a 29-bit identifier (EFF flag
/// already stripped) and up to 8 data bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCanFrame {
    pub id: u32,
    pub data: Vec<u8>,
}

/// Minimal surface the CAN endpoint manager needs from a transport.
///
/// Exists so tests can swap in a channel-backed fake instead of opening a
/// real `can0`/`can1` interface.
pub trait CanTransport: Send + Sync {
    /// Read one frame, blocking up to `timeout`.
    ///
    /// Classifies the result per §4.3: a genuine socket failure is
    /// `SocketError`; an id with the error-flag bit set (or, on this crate's
    /// adapter, the `CanFrame::Error` variant) is `ErrorFrame`; nothing
    /// ready within `timeout` is `Timeout`.
    fn read_with_timeout(&self, timeout: Duration) -> BridgeResult<ReadOutcome<RawCanFrame>>;

    /// Write one frame, setting the extended-id flag.
    fn write(&self, frame: &RawCanFrame) -> BridgeResult<()>;
}

/// `CanTransport` backed by a real Linux SocketCAN interface (`can0`/`can1`).
#[derive(Debug)]
pub struct SocketcanTransport {
    socket: CanSocket,
}

impl SocketcanTransport {
    /// Open the named interface (`can0`, `can1`, ...) non-blocking with the
    /// given poll timeout applied as the socket's read timeout.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::SocketError`] if the interface cannot be
    /// opened or bound.
    pub fn open(interface: &str, poll_timeout: Duration) -> BridgeResult<Self> {
        let socket = CanSocket::open(interface)
            .map_err(|err| BridgeError::SocketError(format!("open {interface}: {err}")))?;
        socket
            .set_read_timeout(poll_timeout)
            .map_err(|err| BridgeError::SocketError(format!("set_read_timeout: {err}")))?;
        Ok(Self { socket })
    }
}

impl CanTransport for SocketcanTransport {
    fn read_with_timeout(&self, _timeout: Duration) -> BridgeResult<ReadOutcome<RawCanFrame>> {
        match self.socket.read_frame() {
            Ok(CanFrame::Error(_)) => Ok(ReadOutcome::ErrorFrame),
            Ok(frame) => {
                let id = match frame.id() {
                    Id::Standard(id) => u32::from(id.as_raw()),
                    Id::Extended(id) => id.as_raw(),
                };
                Ok(ReadOutcome::Frame(RawCanFrame {
                    id,
                    data: frame.data().to_vec(),
                }))
            }
            Err(err) if matches!(err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                Ok(ReadOutcome::Timeout)
            }
            Err(err) => Err(BridgeError::SocketError(format!("read_frame: {err}"))),
        }
    }

    fn write(&self, frame: &RawCanFrame) -> BridgeResult<()> {
        let id = ExtendedId::new(frame.id)
            .ok_or_else(|| BridgeError::ParameterError(format!("invalid 29-bit id {:#x}", frame.id)))?;
        let can_frame = CanDataFrame::new(id, &frame.data)
            .ok_or_else(|| BridgeError::ParameterError("data payload exceeds 8 bytes".to_string()))?;
        self.socket
            .write_frame(&can_frame)
            .map_err(|err| BridgeError::SocketError(format!("write_frame: {err}")))
    }
}

#[cfg(test)]
pub mod test_support {
    //! An in-memory `CanTransport` double for exercising reader/writer loops
    //! without a real CAN interface.

    use super::{BridgeError, BridgeResult, CanTransport, ReadOutcome, RawCanFrame};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Default)]
    pub struct FakeCanTransport {
        pub inbound: Mutex<Vec<RawCanFrame>>,
        pub outbound: Mutex<Vec<RawCanFrame>>,
        pub fail_next_read: Mutex<bool>,
    }

    impl CanTransport for FakeCanTransport {
        fn read_with_timeout(&self, _timeout: Duration) -> BridgeResult<ReadOutcome<RawCanFrame>> {
            if std::mem::take(&mut *self.fail_next_read.lock().unwrap()) {
                return Err(BridgeError::SocketError("simulated failure".to_string()));
            }
            let mut inbound = self.inbound.lock().unwrap();
            Ok(match inbound.pop() {
                Some(frame) => ReadOutcome::Frame(frame),
                None => ReadOutcome::Timeout,
            })
        }

        fn write(&self, frame: &RawCanFrame) -> BridgeResult<()> {
            self.outbound.lock().unwrap().push(frame.clone());
            Ok(())
        }
    }
}

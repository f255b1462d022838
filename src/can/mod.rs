//! CAN endpoint manager (§4.3).
//!
//! Owns one or more CAN channels, each with its own state, transport handle,
//! and inbound/outbound `BufferPair`. Grounded in `canbuf.c`'s per-channel
//! state machine and `socketcan.c`'s open/read/write driver, generalized
//! from the original's fixed two-channel global arrays to an owned
//! `Vec<CanChannel>` built one constructor call per channel — the original
//! declares per-channel arrays with a single initializer row despite
//! intending two-channel support (§9); this crate has no shared template to
//! leave half-initialized.

pub mod transport;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::buffer::synced::{pair_message, unpack_pair_message, BufferPair};
use crate::constants::{DEFAULT_BUFFER_CAPACITY, POLL_TIMEOUT, WRITER_IDLE_SLEEP};
use crate::endpoint::{ConnState, EndpointState, ShutdownSignal};
use crate::error::{BridgeError, BridgeResult, ReadOutcome};

use transport::{CanTransport, RawCanFrame};

/// One CAN channel (`can0` or `can1`), independently constructed.
#[derive(Debug)]
pub struct CanChannel {
    channel: u8,
    interface: String,
    state: EndpointState,
    transport: Mutex<Option<Arc<dyn CanTransport>>>,
    inbound: BufferPair,
    outbound: BufferPair,
}

impl CanChannel {
    #[must_use]
    pub fn new(channel: u8) -> Self {
        Self {
            channel,
            interface: format!("can{channel}"),
            state: EndpointState::new(),
            transport: Mutex::new(None),
            inbound: BufferPair::new(DEFAULT_BUFFER_CAPACITY),
            outbound: BufferPair::new(DEFAULT_BUFFER_CAPACITY),
        }
    }

    #[must_use]
    pub fn channel(&self) -> u8 {
        self.channel
    }

    #[must_use]
    pub fn interface(&self) -> &str {
        &self.interface
    }

    #[must_use]
    pub fn state(&self) -> ConnState {
        self.state.get()
    }

    #[must_use]
    pub fn inbound(&self) -> &BufferPair {
        &self.inbound
    }

    #[must_use]
    pub fn outbound(&self) -> &BufferPair {
        &self.outbound
    }

    /// Acquire `transport` as this channel's handle.
    ///
    /// If the previous state was `DISCONNECTED`, flushes both buffer pairs
    /// (§4.3: "a fresh bus implies stale queued data is no longer
    /// meaningful").
    pub fn connect(&self, transport: Arc<dyn CanTransport>) {
        *self.transport.lock().unwrap_or_else(|e| e.into_inner()) = Some(transport);
        let previous = self.state.swap(ConnState::Connected);
        if previous == ConnState::Disconnected {
            self.inbound.clean();
            self.outbound.clean();
            log::info!("can{}: connected, buffers flushed", self.channel);
        } else {
            log::info!("can{}: connected", self.channel);
        }
    }

    /// Release the handle; optionally flush both pairs.
    pub fn close(&self, clean_buffers: bool) {
        self.state.set(ConnState::Disconnected);
        *self.transport.lock().unwrap_or_else(|e| e.into_inner()) = None;
        if clean_buffers {
            self.inbound.clean();
            self.outbound.clean();
        }
        log::info!("can{}: disconnected (clean_buffers={clean_buffers})", self.channel);
    }

    fn transport_handle(&self) -> Option<Arc<dyn CanTransport>> {
        self.transport.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// One reader-loop iteration (§4.3 reader loop).
    ///
    /// Returns `Ok(true)` if a frame was enqueued, `Ok(false)` on a timeout
    /// or an absorbed error frame, and `Err` on a transport failure the
    /// supervisor must react to. The timestamp is captured here, immediately
    /// after `read_with_timeout` returns a frame — not by the caller before
    /// the (up to [`POLL_TIMEOUT`]-long) blocking read — so it reflects the
    /// moment the frame was actually observed, per §4.2's capture rule.
    pub fn reader_tick(&self) -> BridgeResult<bool> {
        let Some(transport) = self.transport_handle() else {
            return Ok(false);
        };
        match transport.read_with_timeout(POLL_TIMEOUT)? {
            ReadOutcome::Timeout => Ok(false),
            ReadOutcome::ErrorFrame => {
                log::warn!("can{}: error frame observed, discarding", self.channel);
                Ok(false)
            }
            ReadOutcome::Frame(frame) => {
                let now_ms = crate::time::now_ms();
                self.inbound.enqueue(pair_message(&encode_frame(&frame), now_ms));
                Ok(true)
            }
        }
    }

    /// One writer-loop iteration (§4.3 writer loop).
    ///
    /// Returns `Ok(true)` if a frame was written, `Ok(false)` if the
    /// outbound queue was empty (caller should sleep [`WRITER_IDLE_SLEEP`]
    /// before retrying).
    pub fn writer_tick(&self) -> BridgeResult<bool> {
        let Some(transport) = self.transport_handle() else {
            return Ok(false);
        };
        let Some(message) = self.outbound.dequeue()? else {
            return Ok(false);
        };
        let (encoded, _ts) = unpack_pair_message(message);
        let frame = decode_frame(&encoded)?;
        transport.write(&frame)?;
        Ok(true)
    }
}

/// Encode `(id, data)` as the flat byte representation stored in the
/// buffer: a 4-byte little-endian id followed by the data bytes.
fn encode_frame(frame: &RawCanFrame) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + frame.data.len());
    out.extend_from_slice(&frame.id.to_le_bytes());
    out.extend_from_slice(&frame.data);
    out
}

fn decode_frame(bytes: &[u8]) -> BridgeResult<RawCanFrame> {
    if bytes.len() < 4 {
        return Err(BridgeError::ParameterError(
            "encoded CAN frame shorter than id prefix".to_string(),
        ));
    }
    let (id_bytes, data) = bytes.split_at(4);
    let id = u32::from_le_bytes(id_bytes.try_into().expect("split_at(4) guarantees length"));
    Ok(RawCanFrame {
        id,
        data: data.to_vec(),
    })
}

/// Owns every configured CAN channel.
///
/// Channels are held as `Arc<CanChannel>` (not by value) so reader/writer
/// loop tasks can hold their own handle to the same channel the manager
/// owns, rather than a detached copy.
#[derive(Debug)]
pub struct CanManager {
    channels: Vec<Arc<CanChannel>>,
    shutdown: ShutdownSignal,
}

impl CanManager {
    /// Build one independently-constructed [`CanChannel`] per requested
    /// channel index — see module docs on the initialization-quirk fix.
    #[must_use]
    pub fn new(channel_indices: &[u8], shutdown: ShutdownSignal) -> Self {
        let channels = channel_indices
            .iter()
            .copied()
            .map(|index| Arc::new(CanChannel::new(index)))
            .collect();
        Self { channels, shutdown }
    }

    #[must_use]
    pub fn channels(&self) -> &[Arc<CanChannel>] {
        &self.channels
    }

    #[must_use]
    pub fn channel(&self, index: u8) -> Option<&Arc<CanChannel>> {
        self.channels.iter().find(|c| c.channel() == index)
    }

    #[must_use]
    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }
}

/// Drive one channel's reader loop until shutdown, sleeping briefly between
/// timeouts rather than busy-polling.
pub async fn run_reader_loop(channel: Arc<CanChannel>, shutdown: ShutdownSignal) {
    while !shutdown.is_triggered() {
        let task_channel = Arc::clone(&channel);
        let result = tokio::task::spawn_blocking(move || task_channel.reader_tick()).await;
        match result {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                log::error!("can{}: reader loop error: {err}", channel.channel());
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Err(join_err) => {
                log::error!("can: reader task panicked: {join_err}");
                break;
            }
        }
    }
}

/// Drive one channel's writer loop until shutdown.
pub async fn run_writer_loop(channel: Arc<CanChannel>, shutdown: ShutdownSignal) {
    while !shutdown.is_triggered() {
        let wrote = {
            let channel = Arc::clone(&channel);
            tokio::task::spawn_blocking(move || channel.writer_tick()).await
        };
        match wrote {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => tokio::time::sleep(WRITER_IDLE_SLEEP).await,
            Ok(Err(err)) => {
                log::error!("can: writer loop error: {err}");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Err(join_err) => {
                log::error!("can: writer task panicked: {join_err}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::transport::test_support::FakeCanTransport;
    use super::*;

    #[test]
    fn test_connect_from_disconnected_flushes_both_pairs() {
        let channel = CanChannel::new(0);
        channel.outbound.enqueue(pair_message(b"stale", 1));
        assert_eq!(channel.outbound().count(), 1);

        let fake: Arc<dyn CanTransport> = Arc::new(FakeCanTransport::default());
        channel.connect(fake);

        assert_eq!(channel.state(), ConnState::Connected);
        assert_eq!(channel.outbound().count(), 0);
    }

    #[test]
    fn test_reconnect_while_already_connected_does_not_flush() {
        let channel = CanChannel::new(0);
        let fake: Arc<dyn CanTransport> = Arc::new(FakeCanTransport::default());
        channel.connect(Arc::clone(&fake));
        channel.inbound().enqueue(pair_message(b"keep-me", 1));

        channel.connect(fake);
        assert_eq!(channel.inbound().count(), 1);
    }

    #[test]
    fn test_reader_tick_enqueues_frame_with_timestamp() {
        let channel = CanChannel::new(0);
        let fake = Arc::new(FakeCanTransport::default());
        fake.inbound.lock().unwrap().push(RawCanFrame {
            id: 0x1F12_3456,
            data: vec![0x30, 1, 2, 3, 4, 5, 6, 7],
        });
        channel.connect(fake);

        let before = crate::time::now_ms();
        let enqueued = channel.reader_tick().unwrap();
        let after = crate::time::now_ms();
        assert!(enqueued);

        let (encoded, ts) = unpack_pair_message(channel.inbound().dequeue().unwrap().unwrap());
        assert!(ts >= before && ts <= after, "timestamp should be captured after the read returns");
        let decoded = decode_frame(&encoded).unwrap();
        assert_eq!(decoded.id, 0x1F12_3456);
        assert_eq!(decoded.data, vec![0x30, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_error_frame_is_absorbed_not_enqueued() {
        struct AlwaysErrorFrame;
        impl CanTransport for AlwaysErrorFrame {
            fn read_with_timeout(
                &self,
                _timeout: Duration,
            ) -> BridgeResult<ReadOutcome<RawCanFrame>> {
                Ok(ReadOutcome::ErrorFrame)
            }
            fn write(&self, _frame: &RawCanFrame) -> BridgeResult<()> {
                Ok(())
            }
        }

        let channel = CanChannel::new(0);
        channel.connect(Arc::new(AlwaysErrorFrame));
        let enqueued = channel.reader_tick().unwrap();
        assert!(!enqueued);
        assert_eq!(channel.inbound().count(), 0);
    }

    #[test]
    fn test_writer_tick_sends_and_drains_outbound() {
        let channel = CanChannel::new(0);
        let fake = Arc::new(FakeCanTransport::default());
        channel.connect(Arc::clone(&fake) as Arc<dyn CanTransport>);
        channel
            .outbound()
            .enqueue(pair_message(&encode_frame(&RawCanFrame { id: 7, data: vec![1, 2] }), 5));

        let wrote = channel.writer_tick().unwrap();
        assert!(wrote);
        assert_eq!(channel.outbound().count(), 0);
        assert_eq!(fake.outbound.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_channels_are_fully_independent() {
        let manager = CanManager::new(&[0, 1], ShutdownSignal::new());
        let ch0 = manager.channel(0).unwrap();
        let ch1 = manager.channel(1).unwrap();
        ch0.connect(Arc::new(FakeCanTransport::default()));
        assert_eq!(ch0.state(), ConnState::Connected);
        assert_eq!(ch1.state(), ConnState::Disconnected);
        ch0.inbound().enqueue(pair_message(b"x", 1));
        assert_eq!(ch1.inbound().count(), 0);
    }
}

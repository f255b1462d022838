//! TCP server endpoint manager (§4.5).
//!
//! Grounded in `socketserverbuf.c`: a single-client TCP listener whose
//! accept/read/write loops are generalized from the Unix-domain accept-loop
//! idiom used elsewhere in this codebase (`socket/server.rs`) down to
//! exactly one live connection at a time, matching the original's
//! one-client-only design. `open()` is idempotent — calling it while
//! already listening is a no-op, mirroring the original's state check
//! before binding.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::buffer::synced::{pair_message, unpack_pair_message, BufferPair};
use crate::constants::{DEFAULT_BUFFER_CAPACITY, HAPCAN_SOCKET_DATA_LEN};
use crate::endpoint::{ConnState, EndpointState, ShutdownSignal};
use crate::error::{BridgeError, BridgeResult};

/// Owns the listener, the single active connection (if any), and both
/// buffer pairs for the TCP endpoint.
pub struct TcpServerEndpoint {
    state: EndpointState,
    listener: Mutex<Option<TcpListener>>,
    stream: Mutex<Option<TcpStream>>,
    read_pair: BufferPair,
    write_pair: BufferPair,
}

impl TcpServerEndpoint {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: EndpointState::new(),
            listener: Mutex::new(None),
            stream: Mutex::new(None),
            read_pair: BufferPair::new(DEFAULT_BUFFER_CAPACITY),
            write_pair: BufferPair::new(DEFAULT_BUFFER_CAPACITY),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnState {
        self.state.get()
    }

    #[must_use]
    pub fn read_pair(&self) -> &BufferPair {
        &self.read_pair
    }

    #[must_use]
    pub fn write_pair(&self) -> &BufferPair {
        &self.write_pair
    }

    /// Bind the listener if it is not already bound (§4.5 step 1:
    /// idempotent open).
    pub async fn open(&self, bind_addr: &str) -> BridgeResult<()> {
        let mut guard = self.listener.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|err| BridgeError::SocketError(format!("bind {bind_addr}: {err}")))?;
        *guard = Some(listener);
        log::info!("tcp_server: listening on {bind_addr}");
        Ok(())
    }

    /// Accept the next client, replacing any previous connection. Flushes
    /// both pairs only on a DISCONNECTED → CONNECTED transition.
    pub async fn accept_next(&self) -> BridgeResult<()> {
        let accepted = {
            let guard = self.listener.lock().await;
            let Some(listener) = guard.as_ref() else {
                return Err(BridgeError::SocketError("open() was never called".to_string()));
            };
            listener
                .accept()
                .await
                .map_err(|err| BridgeError::SocketError(format!("accept: {err}")))?
        };
        let (socket, addr) = accepted;
        *self.stream.lock().await = Some(socket);
        let previous = self.state.swap(ConnState::Connected);
        if previous == ConnState::Disconnected {
            self.read_pair.clean();
            self.write_pair.clean();
            log::info!("tcp_server: client {addr} connected, buffers flushed");
        } else {
            log::info!("tcp_server: client {addr} connected");
        }
        Ok(())
    }

    /// Close the active connection; optionally flush both pairs.
    pub async fn close(&self, clean_buffers: bool) {
        self.state.set(ConnState::Disconnected);
        *self.stream.lock().await = None;
        if clean_buffers {
            self.read_pair.clean();
            self.write_pair.clean();
        }
        log::info!("tcp_server: closed (clean_buffers={clean_buffers})");
    }

    /// Tear down both the accepted connection and the listener itself, so a
    /// subsequent `open()` can bind a different port (hot-reload of
    /// `socketServerPort`, §4.6).
    pub async fn close_listener(&self) {
        self.close(true).await;
        *self.listener.lock().await = None;
        log::info!("tcp_server: listener closed");
    }

    /// One read-loop iteration (§4.5 receive classification): `Closed` on a
    /// zero-length recv (peer closed), `Overflow` on a recv that exceeds
    /// [`HAPCAN_SOCKET_DATA_LEN`], otherwise enqueue the payload with its
    /// timestamp. The timestamp is captured here, immediately after `recv`
    /// returns a payload — not by the caller before the (up to 100 ms-long)
    /// blocking read — per §4.2's capture rule.
    pub async fn read_tick(&self) -> BridgeResult<bool> {
        let mut guard = self.stream.lock().await;
        let Some(stream) = guard.as_mut() else {
            return Ok(false);
        };

        let mut buf = [0u8; HAPCAN_SOCKET_DATA_LEN + 1];
        let read = tokio::time::timeout(Duration::from_millis(100), stream.read(&mut buf)).await;
        let n = match read {
            Ok(Ok(n)) => n,
            Ok(Err(err)) => return Err(BridgeError::SocketError(format!("recv: {err}"))),
            Err(_elapsed) => return Ok(false),
        };

        if n == 0 {
            drop(guard);
            self.close(false).await;
            return Err(BridgeError::Closed);
        }
        if n > HAPCAN_SOCKET_DATA_LEN {
            return Err(BridgeError::Overflow);
        }

        let now_ms = crate::time::now_ms();
        self.read_pair.enqueue(pair_message(&buf[..n], now_ms));
        Ok(true)
    }

    /// One write-loop iteration: dequeue and send one message, outside any
    /// buffer lock, mirroring the original's "pop under lock, write
    /// outside it" split. Leaves the message queued when no client is
    /// connected, rather than popping and discarding it.
    pub async fn write_tick(&self) -> BridgeResult<bool> {
        let mut guard = self.stream.lock().await;
        let Some(stream) = guard.as_mut() else {
            return Ok(false);
        };

        let Some(message) = self.write_pair.dequeue()? else {
            return Ok(false);
        };
        let (payload, _ts) = unpack_pair_message(message);

        stream
            .write_all(&payload)
            .await
            .map_err(|err| BridgeError::SocketError(format!("send: {err}")))?;
        Ok(true)
    }
}

impl Default for TcpServerEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive the accept loop: repeatedly accept a client, replacing whatever
/// connection preceded it (§4.5: "exactly one client at a time").
pub async fn run_accept_loop(endpoint: Arc<TcpServerEndpoint>, shutdown: ShutdownSignal) {
    while !shutdown.is_triggered() {
        match endpoint.accept_next().await {
            Ok(()) => {}
            Err(err) => {
                log::error!("tcp_server: accept loop error: {err}");
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }
    }
}

/// Drive the read loop until shutdown.
pub async fn run_read_loop(endpoint: Arc<TcpServerEndpoint>, shutdown: ShutdownSignal) {
    while !shutdown.is_triggered() {
        match endpoint.read_tick().await {
            Ok(_) => {}
            Err(BridgeError::Closed) => {
                log::info!("tcp_server: peer closed, awaiting next client");
            }
            Err(err) => {
                log::warn!("tcp_server: read loop error: {err}");
            }
        }
    }
}

/// Drive the write loop until shutdown.
pub async fn run_write_loop(endpoint: Arc<TcpServerEndpoint>, shutdown: ShutdownSignal) {
    while !shutdown.is_triggered() {
        match endpoint.write_tick().await {
            Ok(true) => {}
            Ok(false) => tokio::time::sleep(crate::constants::WRITER_IDLE_SLEEP).await,
            Err(err) => {
                log::warn!("tcp_server: write loop error: {err}");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

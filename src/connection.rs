use crate::config::ConnectionConfig;
use crate::error::{IntercomError, Result};
use crate::protocol::{self, Frame, MessageType, FLAG_NONE, HEADER_SIZE};
use crate::subscription::ConnectionObserver;
use crate::types::ConnectionState;
use bytes::Bytes;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

/// Who asked for a teardown. A background task never waits on itself.
#[derive(Clone)]
enum Origin {
    Caller,
    ReceiveLoop(CancellationToken),
    Keepalive(CancellationToken),
}

impl Origin {
    fn epoch(&self) -> Option<&CancellationToken> {
        match self {
            Origin::Caller => None,
            Origin::ReceiveLoop(token) | Origin::Keepalive(token) => Some(token),
        }
    }
}

/// Background activities of one connected epoch
struct Tasks {
    cancel: CancellationToken,
    receive: JoinHandle<()>,
    keepalive: JoinHandle<()>,
}

struct Writer {
    half: OwnedWriteHalf,
    cancel: CancellationToken,
}

struct Shared {
    host: String,
    config: ConnectionConfig,
    observer: Arc<dyn ConnectionObserver>,
    state: AtomicU8,
    /// Held across connect and teardown; `Some` while connected
    lifecycle: Mutex<Option<Tasks>>,
    /// The write lock. Every frame goes through here.
    writer: Mutex<Option<Writer>>,
    missed_pongs: AtomicU32,
}

/// TCP connection to a single intercom device
///
/// Owns the socket, runs a receive loop and a keepalive loop while connected,
/// and serializes all writes so frames never interleave on the wire.
/// Cloning yields another handle to the same connection.
///
/// Dropping the last handle does not close the socket; call
/// [`disconnect`](Self::disconnect) when done.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Create a disconnected connection to `host` on `config.port`
    pub fn new(
        host: impl Into<String>,
        config: ConnectionConfig,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                host: host.into(),
                config,
                observer,
                state: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
                lifecycle: Mutex::new(None),
                writer: Mutex::new(None),
                missed_pongs: AtomicU32::new(0),
            }),
        }
    }

    /// Get the device host
    pub fn host(&self) -> &str {
        &self.shared.host
    }

    /// Get the device port
    pub fn port(&self) -> u16 {
        self.shared.config.port
    }

    /// Get the current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Whether the socket is open (connected or streaming)
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Connected | ConnectionState::Streaming
        )
    }

    /// Whether START has been sent and not yet stopped
    pub fn is_streaming(&self) -> bool {
        self.state() == ConnectionState::Streaming
    }

    /// Open the socket and start the receive and keepalive loops
    ///
    /// Does nothing if already connected. On timeout or OS-level failure the
    /// connection stays `Disconnected` and the error is returned. An unusable
    /// config is rejected with `InvalidConfig` before any socket is opened.
    pub async fn connect(&self) -> Result<()> {
        let shared = &self.shared;
        shared.config.validate()?;

        let mut lifecycle = shared.lifecycle.lock().await;
        if lifecycle.is_some() {
            return Ok(());
        }

        let addr = shared.addr();
        tracing::debug!("Connecting to {}", addr);
        shared.set_state(ConnectionState::Connecting);

        let connect = TcpStream::connect((shared.host.as_str(), shared.config.port));
        let stream = match timeout(shared.config.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                tracing::error!("Connection error to {}: {}", addr, source);
                shared.set_state(ConnectionState::Disconnected);
                return Err(IntercomError::Connect { addr, source });
            }
            Err(_) => {
                tracing::error!("Connection timeout to {}", addr);
                shared.set_state(ConnectionState::Disconnected);
                return Err(IntercomError::ConnectTimeout { addr });
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!("Failed to set TCP_NODELAY on {}: {}", addr, e);
        }

        let (read_half, write_half) = stream.into_split();
        let cancel = CancellationToken::new();

        *shared.writer.lock().await = Some(Writer {
            half: write_half,
            cancel: cancel.clone(),
        });
        shared.missed_pongs.store(0, Ordering::SeqCst);
        shared.set_state(ConnectionState::Connected);
        tracing::info!("Connected to {}", addr);

        // Before the loops exist, so no audio can precede it
        shared.observer.on_connected();

        let receive = tokio::spawn(receive_loop(shared.clone(), read_half, cancel.clone()));
        let keepalive = tokio::spawn(keepalive_loop(shared.clone(), cancel.clone()));
        *lifecycle = Some(Tasks {
            cancel,
            receive,
            keepalive,
        });

        Ok(())
    }

    /// Tear the connection down
    ///
    /// Idempotent. Cancels both background loops and waits for them before
    /// closing the socket, so no callback fires after this returns except the
    /// single `on_disconnected` it triggers.
    pub async fn disconnect(&self) {
        self.shared.shutdown(Origin::Caller).await;
    }

    /// Connect if needed, then send START
    ///
    /// The device does not acknowledge START; the connection is marked
    /// streaming as soon as the frame has been written.
    pub async fn start_stream(&self) -> Result<()> {
        if !self.is_connected() {
            self.connect().await?;
        }

        self.shared
            .send_message(MessageType::Start, &[], Origin::Caller)
            .await?;

        if self
            .shared
            .transition(ConnectionState::Connected, ConnectionState::Streaming)
            || self.is_streaming()
        {
            tracing::info!("Streaming started with {}", self.shared.addr());
            Ok(())
        } else {
            Err(IntercomError::ConnectionClosed)
        }
    }

    /// Send STOP if streaming; otherwise do nothing
    pub async fn stop_stream(&self) -> Result<()> {
        if !self.is_streaming() {
            return Ok(());
        }

        let result = self
            .shared
            .send_message(MessageType::Stop, &[], Origin::Caller)
            .await;
        self.shared
            .transition(ConnectionState::Streaming, ConnectionState::Connected);
        tracing::info!("Streaming stopped with {}", self.shared.addr());
        result
    }

    /// Send one AUDIO frame
    ///
    /// Fails with `NotStreaming` (and leaves the connection alone) unless
    /// streaming, and with `PayloadTooLarge` for payloads over 65535 bytes.
    pub async fn send_audio(&self, data: &[u8]) -> Result<()> {
        if !self.is_streaming() {
            return Err(IntercomError::NotStreaming);
        }
        self.shared
            .send_message(MessageType::Audio, data, Origin::Caller)
            .await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.shared.host)
            .field("port", &self.shared.config.port)
            .field("state", &self.state())
            .finish()
    }
}

impl Shared {
    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.config.port)
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Write one frame under the write lock, tearing down on failure
    async fn send_message(
        self: &Arc<Self>,
        msg_type: MessageType,
        payload: &[u8],
        origin: Origin,
    ) -> Result<()> {
        let result = self.write_message(msg_type, payload).await;
        if matches!(result, Err(IntercomError::Send(_))) {
            self.shutdown(origin).await;
        }
        result
    }

    /// Write one frame under the write lock; the caller handles teardown
    async fn write_message(&self, msg_type: MessageType, payload: &[u8]) -> Result<()> {
        let frame = protocol::encode(msg_type, FLAG_NONE, payload)?;

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(IntercomError::ConnectionClosed)?;
        let cancel = writer.cancel.clone();
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(IntercomError::ConnectionClosed),
            result = write_frame(&mut writer.half, &frame) => result,
        };

        result.map_err(|e| {
            tracing::error!("Send error to {}: {}", self.addr(), e);
            IntercomError::Send(e)
        })
    }

    async fn shutdown(self: &Arc<Self>, origin: Origin) {
        let mut lifecycle = match origin.epoch() {
            None => self.lifecycle.lock().await,
            Some(epoch) => {
                // Someone else is already tearing this epoch down
                tokio::select! {
                    biased;
                    _ = epoch.cancelled() => return,
                    guard = self.lifecycle.lock() => {
                        if epoch.is_cancelled() {
                            return;
                        }
                        guard
                    }
                }
            }
        };

        let Some(tasks) = lifecycle.take() else {
            return;
        };

        let addr = self.addr();
        tracing::debug!("Disconnecting from {}", addr);

        tasks.cancel.cancel();
        if !matches!(origin, Origin::ReceiveLoop(_)) {
            let _ = tasks.receive.await;
        }
        if !matches!(origin, Origin::Keepalive(_)) {
            let _ = tasks.keepalive.await;
        }

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.half.shutdown().await;
        }

        self.set_state(ConnectionState::Disconnected);
        // Under the lifecycle lock, so it precedes any later on_connected
        self.observer.on_disconnected();
        drop(lifecycle);

        tracing::info!("Disconnected from {}", addr);
    }

    /// Handle one incoming frame. Fails only when a reply could not be written.
    async fn dispatch(&self, frame: Frame, cancel: &CancellationToken) -> Result<()> {
        match frame.msg_type {
            MessageType::Audio => {
                if !cancel.is_cancelled() {
                    self.observer.on_audio(frame.payload);
                }
            }
            MessageType::Pong => {
                tracing::debug!("Received PONG");
                self.missed_pongs.store(0, Ordering::SeqCst);
            }
            MessageType::Stop => {
                tracing::info!("Received STOP from {}", self.addr());
                self.transition(ConnectionState::Streaming, ConnectionState::Connected);
            }
            MessageType::Error => {
                let code = frame.payload.first().copied();
                match code {
                    Some(code) => tracing::warn!("Received ERROR from {}: {}", self.addr(), code),
                    None => tracing::warn!("Received ERROR from {}", self.addr()),
                }
                self.observer.on_device_error(code);
            }
            MessageType::Ping => {
                tracing::debug!("Received PING, replying");
                if let Err(e @ IntercomError::Send(_)) =
                    self.write_message(MessageType::Pong, &[]).await
                {
                    return Err(e);
                }
            }
            other => {
                tracing::warn!("Unknown message type: 0x{:02X}", other.as_u8());
            }
        }
        Ok(())
    }
}

async fn write_frame(half: &mut OwnedWriteHalf, frame: &[u8]) -> io::Result<()> {
    half.write_all(frame).await?;
    half.flush().await
}

/// Read one complete frame
///
/// A stream that ends inside a frame yields `UnexpectedEof`.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).await?;
    let header = protocol::decode_header(&header);

    let mut payload = vec![0u8; header.length as usize];
    if !payload.is_empty() {
        reader.read_exact(&mut payload).await?;
    }

    Ok(Frame {
        msg_type: header.msg_type,
        flags: header.flags,
        payload: Bytes::from(payload),
    })
}

async fn receive_loop(shared: Arc<Shared>, mut reader: OwnedReadHalf, cancel: CancellationToken) {
    loop {
        // Only the read races cancellation; a teardown is never dropped halfway
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            frame = read_frame(&mut reader) => frame,
        };

        match frame {
            Ok(frame) => {
                if shared.dispatch(frame, &cancel).await.is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                tracing::debug!("Connection closed by peer {}", shared.addr());
                break;
            }
            Err(e) => {
                tracing::error!("Receive error from {}: {}", shared.addr(), e);
                break;
            }
        }
    }

    shared.shutdown(Origin::ReceiveLoop(cancel)).await;
}

async fn keepalive_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(shared.config.ping_interval) => {}
        }

        if let Some(max_missed) = shared.config.max_missed_pongs {
            let missed = shared.missed_pongs.load(Ordering::SeqCst);
            if missed >= max_missed {
                tracing::warn!(
                    "No PONG from {} after {} pings, disconnecting",
                    shared.addr(),
                    missed
                );
                shared.shutdown(Origin::Keepalive(cancel)).await;
                return;
            }
        }

        // Counted before the write so a fast PONG cannot be overtaken
        shared.missed_pongs.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Sending PING to {}", shared.addr());
        if shared
            .send_message(MessageType::Ping, &[], Origin::Keepalive(cancel.clone()))
            .await
            .is_err()
        {
            return;
        }
    }
}

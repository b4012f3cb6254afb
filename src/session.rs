use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::error::{IntercomError, Result};
use crate::subscription::ConnectionObserver;
use crate::types::{BinaryHandlerId, DeviceId};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Outward side of a session, e.g. a browser-facing channel
///
/// Implementations must not block; they are called from the connection's
/// receive loop.
pub trait AudioSink: Send + Sync {
    /// Deliver audio received from the device
    fn send_audio(&self, handler_id: BinaryHandlerId, data: Bytes);
}

/// Bridges one device connection to one outward audio channel
pub struct Session {
    device_id: DeviceId,
    host: String,
    session_id: Uuid,
    handler_id: BinaryHandlerId,
    config: ConnectionConfig,
    sink: Arc<dyn AudioSink>,
    active: Arc<AtomicBool>,
    connection: Mutex<Option<Connection>>,
}

/// Connection observer installed by a session
struct SessionObserver {
    host: String,
    handler_id: BinaryHandlerId,
    sink: Arc<dyn AudioSink>,
    active: Arc<AtomicBool>,
}

impl ConnectionObserver for SessionObserver {
    fn on_connected(&self) {
        tracing::info!("Intercom connected to {}", self.host);
    }

    fn on_disconnected(&self) {
        tracing::info!("Intercom disconnected from {}", self.host);
        self.active.store(false, Ordering::SeqCst);
    }

    fn on_audio(&self, data: Bytes) {
        if self.active.load(Ordering::SeqCst) {
            self.sink.send_audio(self.handler_id, data);
        }
    }
}

impl Session {
    pub fn new(
        device_id: impl Into<DeviceId>,
        host: impl Into<String>,
        config: ConnectionConfig,
        sink: Arc<dyn AudioSink>,
        handler_id: BinaryHandlerId,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            host: host.into(),
            session_id: Uuid::new_v4(),
            handler_id,
            config,
            sink,
            active: Arc::new(AtomicBool::new(false)),
            connection: Mutex::new(None),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn handler_id(&self) -> BinaryHandlerId {
        self.handler_id
    }

    /// Whether audio is currently being bridged
    ///
    /// Turns false on `stop()` and when the device connection drops on its own.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Connect to the device and start streaming
    ///
    /// Does nothing if already active. A partially built connection is torn
    /// down again when either step fails.
    pub async fn start(&self) -> Result<()> {
        if self.is_active() {
            return Ok(());
        }

        let mut slot = self.connection.lock().await;
        if let Some(stale) = slot.take() {
            stale.disconnect().await;
        }

        let observer = SessionObserver {
            host: self.host.clone(),
            handler_id: self.handler_id,
            sink: self.sink.clone(),
            active: self.active.clone(),
        };
        let connection = Connection::new(self.host.clone(), self.config.clone(), Arc::new(observer));

        let started = match connection.connect().await {
            Ok(()) => connection.start_stream().await,
            Err(e) => Err(e),
        };

        if let Err(e) = started {
            connection.disconnect().await;
            return Err(IntercomError::ConnectionFailed {
                device_id: self.device_id.clone(),
                host: self.host.clone(),
                reason: e.to_string(),
            });
        }

        self.active.store(true, Ordering::SeqCst);
        *slot = Some(connection);
        tracing::info!(
            "Session {} started for {} at {}",
            self.session_id,
            self.device_id,
            self.host
        );
        Ok(())
    }

    /// Stop streaming and release the connection
    pub async fn stop(&self) {
        // Cleared first so no more audio is forwarded outward
        let was_active = self.active.swap(false, Ordering::SeqCst);

        let connection = self.connection.lock().await.take();
        let Some(connection) = connection else {
            return;
        };

        if was_active {
            if let Err(e) = connection.stop_stream().await {
                tracing::warn!("Failed to send STOP to {}: {}", self.host, e);
            }
        }
        connection.disconnect().await;
        tracing::info!("Session {} stopped for {}", self.session_id, self.device_id);
    }

    /// Forward audio from the outward channel to the device
    ///
    /// Silently drops the data when the session is inactive. Buffers larger
    /// than the configured chunk size go out as several frames.
    pub async fn handle_audio(&self, data: &[u8]) {
        if !self.is_active() {
            return;
        }

        let connection = self.connection.lock().await.clone();
        let Some(connection) = connection else {
            return;
        };

        for chunk in data.chunks(self.config.audio_chunk_size) {
            if let Err(e) = connection.send_audio(chunk).await {
                tracing::debug!("Dropping audio for {}: {}", self.device_id, e);
                return;
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("device_id", &self.device_id)
            .field("host", &self.host)
            .field("session_id", &self.session_id)
            .field("handler_id", &self.handler_id)
            .field("active", &self.is_active())
            .finish()
    }
}

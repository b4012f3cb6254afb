//! Browser-facing WebSocket channel
//!
//! Text frames carry JSON control requests and responses (see [`crate::api`]).
//! Binary frames carry audio, prefixed with the one-byte handler id returned
//! when the session was started. A client can only feed and tear down the
//! sessions it started itself.

use crate::api::{self, Outcome, Response};
use crate::discovery::DeviceDirectory;
use crate::error::Result;
use crate::registry::SessionRegistry;
use crate::session::AudioSink;
use crate::types::{BinaryHandlerId, SessionHandle};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Audio sink that queues binary frames for a WebSocket writer task
#[derive(Debug, Clone)]
pub struct WebSocketSink {
    tx: mpsc::UnboundedSender<Message>,
}

impl WebSocketSink {
    pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { tx }
    }
}

impl AudioSink for WebSocketSink {
    fn send_audio(&self, handler_id: BinaryHandlerId, data: Bytes) {
        let mut frame = Vec::with_capacity(1 + data.len());
        frame.push(handler_id);
        frame.extend_from_slice(&data);
        if self.tx.send(Message::Binary(frame)).is_err() {
            tracing::debug!("WebSocket closed, dropping audio for handler {}", handler_id);
        }
    }
}

/// Serve one browser client until it disconnects
///
/// Every session the client started is stopped when it goes away.
pub async fn serve_socket<S>(
    ws_stream: WebSocketStream<S>,
    registry: Arc<SessionRegistry>,
    directory: Arc<dyn DeviceDirectory>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut write, mut read) = ws_stream.split();
    let (ws_tx, mut ws_rx) = mpsc::unbounded_channel::<Message>();

    let write_handle = tokio::spawn(async move {
        while let Some(msg) = ws_rx.recv().await {
            if let Err(e) = write.send(msg).await {
                tracing::error!("Failed to send message: {}", e);
                break;
            }
        }
        let _ = write.close().await;
    });

    let sink: Arc<dyn AudioSink> = Arc::new(WebSocketSink::new(ws_tx.clone()));
    // Sessions started by this client, keyed by their binary handler id
    let mut owned: HashMap<BinaryHandlerId, SessionHandle> = HashMap::new();

    let result = loop {
        let msg = match read.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => break Err(e.into()),
            None => break Ok(()),
        };

        match msg {
            Message::Text(text) => {
                let response =
                    handle_text(&registry, directory.as_ref(), &sink, &text, &mut owned).await;
                match serde_json::to_string(&response) {
                    Ok(json) => {
                        if ws_tx.send(Message::Text(json)).is_err() {
                            break Ok(());
                        }
                    }
                    Err(e) => tracing::error!("Failed to encode response: {}", e),
                }
            }
            Message::Binary(data) => {
                if let Some((handler_id, audio)) = data.split_first() {
                    match owned.get(handler_id) {
                        Some(handle) => registry.handle_session_audio(handle, audio).await,
                        None => tracing::debug!(
                            "Dropping audio for handler {} not owned by this client",
                            handler_id
                        ),
                    }
                }
            }
            Message::Close(_) => {
                tracing::info!("WebSocket client closed the connection");
                break Ok(());
            }
            _ => {}
        }
    };

    for handle in owned.into_values() {
        if let Err(e) = registry
            .stop_session_if(&handle.device_id, handle.session_id)
            .await
        {
            tracing::debug!("Session {} already gone: {}", handle.session_id, e);
        }
    }

    drop(sink);
    drop(ws_tx);
    let _ = timeout(WRITER_DRAIN_TIMEOUT, write_handle).await;

    result
}

async fn handle_text(
    registry: &SessionRegistry,
    directory: &dyn DeviceDirectory,
    sink: &Arc<dyn AudioSink>,
    text: &str,
    owned: &mut HashMap<BinaryHandlerId, SessionHandle>,
) -> Response {
    tracing::debug!("Received: {}", text);

    let request = match api::parse_request(text) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!("Rejecting malformed request: {}", e);
            return Response::error(api::request_id(text), &e);
        }
    };

    match api::execute(registry, directory, sink.clone(), request.command).await {
        Ok(outcome) => {
            match &outcome {
                Outcome::Started(handle) => {
                    owned.insert(handle.binary_handler_id, handle.clone());
                }
                Outcome::Stopped(device_id) => {
                    owned.retain(|_, handle| handle.device_id != *device_id);
                }
                Outcome::Devices(_) => {}
            }
            Response::result(request.id, outcome.to_value())
        }
        Err(e) => Response::error(request.id, &e),
    }
}

/// Accept browser clients forever, one task per client
pub async fn serve(
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
    directory: Arc<dyn DeviceDirectory>,
) -> Result<()> {
    tracing::info!("Listening for WebSocket clients on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        let registry = registry.clone();
        let directory = directory.clone();

        tokio::spawn(async move {
            match tokio_tungstenite::accept_async(stream).await {
                Ok(ws_stream) => {
                    tracing::info!("WebSocket client connected from {}", peer);
                    if let Err(e) = serve_socket(ws_stream, registry, directory).await {
                        tracing::warn!("WebSocket client {} failed: {}", peer, e);
                    }
                    tracing::info!("WebSocket client {} disconnected", peer);
                }
                Err(e) => tracing::warn!("WebSocket handshake with {} failed: {}", peer, e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_prefixes_handler_id() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = WebSocketSink::new(tx);
        sink.send_audio(7, Bytes::from_static(&[1, 2, 3]));

        match rx.try_recv().unwrap() {
            Message::Binary(frame) => assert_eq!(frame, vec![7, 1, 2, 3]),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn sink_tolerates_closed_channel() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        WebSocketSink::new(tx).send_audio(1, Bytes::from_static(b"x"));
    }
}

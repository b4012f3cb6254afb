//! Rust library bridging real-time audio between browser clients and intercom devices
//!
//! Devices run an intercom service speaking a small length-framed TCP
//! protocol. This library connects to them, keeps the link alive, and bridges
//! audio between each device and an outward channel such as a browser
//! WebSocket. It supports:
//!
//! - Frame encoding and decoding for the device protocol
//! - Device connections with keepalive and serialized writes
//! - Sessions binding one device to one outward audio channel
//! - A registry enforcing one active session per device
//! - A JSON control channel and a WebSocket transport for browsers
//!
//! # Quick Start
//!
//! ```no_run
//! use bytes::Bytes;
//! use intercom_native::{AudioSink, BinaryHandlerId, SessionRegistry};
//! use std::sync::Arc;
//!
//! struct Speaker;
//!
//! impl AudioSink for Speaker {
//!     fn send_audio(&self, _handler_id: BinaryHandlerId, data: Bytes) {
//!         println!("{} bytes from the device", data.len());
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = SessionRegistry::default();
//!     let handle = registry
//!         .start_session("hallway", "192.168.1.50", Arc::new(Speaker))
//!         .await?;
//!     println!("Streaming with handler {}", handle.binary_handler_id);
//!
//!     // Microphone audio from the outward side
//!     registry.handle_audio("hallway", &[0u8; 512]).await;
//!
//!     registry.stop_session("hallway").await?;
//!     registry.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Serving Browsers
//!
//! ```no_run
//! use intercom_native::{serve, SessionRegistry, StaticDirectory};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let listener = TcpListener::bind("0.0.0.0:8765").await?;
//!     let registry = Arc::new(SessionRegistry::default());
//!     serve(listener, registry, Arc::new(StaticDirectory::new())).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Protocol**: frame header and payload wire format
//! - **Connection**: one TCP socket per device, receive loop and keepalive
//! - **Session**: one device connection bound to one outward audio sink
//! - **Registry**: device id to session table, one session per device
//! - **Api / Ws**: JSON control commands and the browser WebSocket channel

mod api;
mod config;
mod connection;
mod discovery;
mod error;
mod protocol;
mod registry;
mod session;
mod subscription;
mod types;
mod ws;

// Public exports
pub use api::{dispatch, execute, parse_request, ApiError, Command, Outcome, Request, Response};
pub use config::{
    ConnectionConfig, DEFAULT_AUDIO_CHUNK_SIZE, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PING_INTERVAL,
    DEFAULT_PORT,
};
pub use connection::{read_frame, Connection};
pub use discovery::{intercom_devices, DeviceDirectory, StaticDirectory};
pub use error::{IntercomError, Result};
pub use protocol::{
    decode_header, encode, Frame, FrameHeader, MessageType, FLAG_NONE, HEADER_SIZE,
    MAX_PAYLOAD_SIZE,
};
pub use registry::SessionRegistry;
pub use session::{AudioSink, Session};
pub use subscription::{
    event_channel, ChannelObserver, ConnectionEvent, ConnectionObserver, EventReceiver,
    NoopObserver,
};
pub use types::{
    BinaryHandlerId, ConnectionState, DeviceId, DeviceInfo, DirectoryEntry, SessionHandle,
};
pub use ws::{serve, serve_socket, WebSocketSink};

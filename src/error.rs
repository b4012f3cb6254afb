use crate::types::DeviceId;
use thiserror::Error;

/// Result type for intercom operations
pub type Result<T> = std::result::Result<T, IntercomError>;

/// Errors that can occur while bridging audio to intercom devices
#[derive(Error, Debug)]
pub enum IntercomError {
    /// OS-level failure while opening the TCP connection
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The TCP connection was not established within the connect timeout
    #[error("Connection timeout to {addr}")]
    ConnectTimeout { addr: String },

    /// Writing a frame to the socket failed; the connection has been torn down
    #[error("Send error: {0}")]
    Send(#[source] std::io::Error),

    /// The connection is not open
    #[error("Connection closed")]
    ConnectionClosed,

    /// Audio was offered while the connection is not streaming
    #[error("Not streaming")]
    NotStreaming,

    /// Malformed traffic from the device
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Frame payload does not fit the 16-bit length field
    #[error("Payload too large: {size} bytes (maximum 65535)")]
    PayloadTooLarge { size: usize },

    /// A session is already running for this device
    #[error("Session already active for {0}")]
    AlreadyActive(DeviceId),

    /// No session is running for this device
    #[error("No active session for {0}")]
    NotFound(DeviceId),

    /// The session could not reach the streaming state
    #[error("Failed to connect to {host} for {device_id}: {reason}")]
    ConnectionFailed {
        device_id: DeviceId,
        host: String,
        reason: String,
    },

    /// Configuration values out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Control-channel request could not be understood
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket error on the browser-facing channel
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Channel receive error
    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl IntercomError {
    /// Stable error code reported on the control channel
    pub fn code(&self) -> &'static str {
        match self {
            IntercomError::AlreadyActive(_) => "already_active",
            IntercomError::NotFound(_) => "not_found",
            IntercomError::ConnectionFailed { .. }
            | IntercomError::Connect { .. }
            | IntercomError::ConnectTimeout { .. } => "connection_failed",
            IntercomError::InvalidRequest(_) | IntercomError::Json(_) => "invalid_format",
            IntercomError::InvalidConfig(_) => "invalid_config",
            IntercomError::PayloadTooLarge { .. } => "payload_too_large",
            IntercomError::NotStreaming => "not_streaming",
            _ => "unknown_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_errors_map_to_control_codes() {
        assert_eq!(IntercomError::AlreadyActive("dev1".into()).code(), "already_active");
        assert_eq!(IntercomError::NotFound("dev1".into()).code(), "not_found");
        let failed = IntercomError::ConnectionFailed {
            device_id: "dev1".into(),
            host: "10.0.0.2".into(),
            reason: "refused".into(),
        };
        assert_eq!(failed.code(), "connection_failed");
        assert_eq!(failed.to_string(), "Failed to connect to 10.0.0.2 for dev1: refused");
    }
}

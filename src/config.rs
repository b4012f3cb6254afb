use crate::error::{IntercomError, Result};
use crate::protocol::MAX_PAYLOAD_SIZE;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Intercom service port on the device
pub const DEFAULT_PORT: u16 = 6054;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(5);

/// Largest audio payload put in a single frame by sessions
pub const DEFAULT_AUDIO_CHUNK_SIZE: usize = 512;

/// Settings shared by every connection a registry opens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub port: u16,
    pub connect_timeout: Duration,
    pub ping_interval: Duration,

    /// Consecutive unanswered PINGs tolerated before disconnecting.
    /// `None` disables the check; dead peers are then only noticed by read failure.
    pub max_missed_pongs: Option<u32>,

    pub audio_chunk_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            ping_interval: DEFAULT_PING_INTERVAL,
            max_missed_pongs: None,
            audio_chunk_size: DEFAULT_AUDIO_CHUNK_SIZE,
        }
    }
}

impl ConnectionConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_max_missed_pongs(mut self, max_missed: u32) -> Self {
        self.max_missed_pongs = Some(max_missed);
        self
    }

    pub fn with_audio_chunk_size(mut self, size: usize) -> Self {
        self.audio_chunk_size = size;
        self
    }

    /// Check that every value is usable
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(IntercomError::InvalidConfig("port must be non-zero".to_string()));
        }
        if self.connect_timeout.is_zero() {
            return Err(IntercomError::InvalidConfig(
                "connect_timeout must be non-zero".to_string(),
            ));
        }
        if self.ping_interval.is_zero() {
            return Err(IntercomError::InvalidConfig(
                "ping_interval must be non-zero".to_string(),
            ));
        }
        if self.max_missed_pongs == Some(0) {
            return Err(IntercomError::InvalidConfig(
                "max_missed_pongs must be at least 1".to_string(),
            ));
        }
        if self.audio_chunk_size == 0 || self.audio_chunk_size > MAX_PAYLOAD_SIZE {
            return Err(IntercomError::InvalidConfig(format!(
                "audio_chunk_size must be within 1..={}",
                MAX_PAYLOAD_SIZE
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ConnectionConfig::default();
        assert_eq!(config.port, 6054);
        assert!(config.max_missed_pongs.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(ConnectionConfig::default().with_port(0).validate().is_err());
        assert!(ConnectionConfig::default()
            .with_ping_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(ConnectionConfig::default()
            .with_audio_chunk_size(MAX_PAYLOAD_SIZE + 1)
            .validate()
            .is_err());
        assert!(ConnectionConfig::default()
            .with_max_missed_pongs(0)
            .validate()
            .is_err());
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: ConnectionConfig =
            serde_json::from_str(r#"{"port": 7000, "max_missed_pongs": 3}"#).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.max_missed_pongs, Some(3));
        assert_eq!(config.ping_interval, DEFAULT_PING_INTERVAL);
    }
}

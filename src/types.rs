use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Device identifier assigned by the surrounding discovery mechanism
pub type DeviceId = String;

/// Identifier prefixed to binary frames on the browser-facing channel
pub type BinaryHandlerId = u8;

/// Lifecycle state of a device connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Streaming,
}

impl ConnectionState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Streaming => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Streaming,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Metadata returned to the caller of a successful session start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    pub device_id: DeviceId,
    pub session_id: Uuid,
    pub binary_handler_id: BinaryHandlerId,
}

/// Entry published by the discovery collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub device_id: DeviceId,
    pub name: String,

    /// Entity exposed by the device, e.g. `switch.kitchen_intercom_api`
    pub entity_id: String,

    /// Entity domain, e.g. `switch`
    pub domain: String,
}

impl DirectoryEntry {
    /// Whether this entity advertises the intercom capability
    pub fn has_intercom_capability(&self) -> bool {
        self.domain == "switch" && self.entity_id.contains("intercom_api")
    }
}

/// Intercom-capable device reported by `list_devices`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: DeviceId,
    pub name: String,
    pub entity_id: String,
}

impl From<&DirectoryEntry> for DeviceInfo {
    fn from(entry: &DirectoryEntry) -> Self {
        Self {
            device_id: entry.device_id.clone(),
            name: entry.name.clone(),
            entity_id: entry.entity_id.clone(),
        }
    }
}

use crate::discovery::DeviceDirectory;
use crate::error::{IntercomError, Result};
use crate::registry::SessionRegistry;
use crate::session::AudioSink;
use crate::types::{DeviceId, DeviceInfo, SessionHandle};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Control-channel request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    #[serde(flatten)]
    pub command: Command,
}

/// Control commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
    #[serde(rename = "intercom_native/start")]
    Start { device_id: DeviceId, host: String },

    #[serde(rename = "intercom_native/stop")]
    Stop { device_id: DeviceId },

    #[serde(rename = "intercom_native/list")]
    List,
}

/// Control-channel response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(rename = "type")]
    pub response_type: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

/// Error body of a rejected request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl Request {
    pub fn new(id: u64, command: Command) -> Self {
        Self { id, command }
    }
}

impl Response {
    /// Successful response carrying `result`
    pub fn result(id: u64, result: Value) -> Self {
        Self {
            id,
            response_type: "result".to_string(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    /// Rejection built from an error
    pub fn error(id: u64, err: &IntercomError) -> Self {
        Self {
            id,
            response_type: "result".to_string(),
            success: false,
            result: None,
            error: Some(ApiError {
                code: err.code().to_string(),
                message: err.to_string(),
            }),
        }
    }

    /// Get the error code, if this is a rejection
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

/// Parse a text frame into a request
pub fn parse_request(text: &str) -> Result<Request> {
    serde_json::from_str(text).map_err(|e| IntercomError::InvalidRequest(e.to_string()))
}

/// Best-effort request id of a message that may not parse as a request
pub fn request_id(text: &str) -> u64 {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|value| value.get("id").and_then(Value::as_u64))
        .unwrap_or(0)
}

/// What a successful command did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Started(SessionHandle),
    Stopped(DeviceId),
    Devices(Vec<DeviceInfo>),
}

impl Outcome {
    /// Result body sent back to the client
    pub fn to_value(&self) -> Value {
        match self {
            Outcome::Started(handle) => json!({
                "success": true,
                "binary_handler_id": handle.binary_handler_id,
                "session_id": handle.session_id,
            }),
            Outcome::Stopped(_) => json!({ "success": true }),
            Outcome::Devices(devices) => json!({ "devices": devices }),
        }
    }
}

/// Run a command against the registry
///
/// Audio for sessions started here is delivered to `sink`.
pub async fn execute(
    registry: &SessionRegistry,
    directory: &dyn DeviceDirectory,
    sink: Arc<dyn AudioSink>,
    command: Command,
) -> Result<Outcome> {
    match command {
        Command::Start { device_id, host } => registry
            .start_session(device_id, host, sink)
            .await
            .map(Outcome::Started),
        Command::Stop { device_id } => {
            registry.stop_session(&device_id).await?;
            Ok(Outcome::Stopped(device_id))
        }
        Command::List => Ok(Outcome::Devices(registry.list_devices(directory))),
    }
}

/// Execute a request against the registry and build its response
pub async fn dispatch(
    registry: &SessionRegistry,
    directory: &dyn DeviceDirectory,
    sink: Arc<dyn AudioSink>,
    request: Request,
) -> Response {
    match execute(registry, directory, sink, request.command).await {
        Ok(outcome) => Response::result(request.id, outcome.to_value()),
        Err(e) => Response::error(request.id, &e),
    }
}

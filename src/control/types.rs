//! Control channel message types.

use serde::{Deserialize, Serialize};

use crate::config::ServiceConfig;
use crate::job::Severity;

/// Request from an operator client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Join the broadcast list under a display name.
    Register {
        /// Name shown in audit lines.
        client_name: String,
    },
    /// Replace the service configuration.
    SetConfig {
        /// The complete new configuration.
        config: ServiceConfig,
    },
}

/// Reply to a single request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ControlResponse {
    /// Registration accepted.
    Registered {
        /// Configuration at the time of registration.
        config: ServiceConfig,
    },
    /// The new configuration was saved and applied.
    ConfigApplied,
    /// The request was rejected.
    Error {
        /// Why the request was rejected.
        message: String,
    },
}

/// Anything the service writes to a connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Reply to the last request.
    Response(ControlResponse),
    /// A relayed job log line or an audit line.
    LogLine { line: String, severity: Severity },
    /// The configuration changed.
    Config { config: ServiceConfig },
}

/// Errors that can occur on the control channel.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Failed to bind, connect, read or write.
    #[error("Control channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The service socket does not exist.
    #[error("Service not running (socket not found)")]
    ServiceNotRunning,

    /// The operation timed out.
    #[error("Control channel timeout after {0}ms")]
    Timeout(u64),

    /// Failed to serialize or deserialize a message.
    #[error("Failed to serialize message: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The service replied with something other than the expected response.
    #[error("Invalid response from service")]
    InvalidResponse,

    /// The service closed the connection.
    #[error("Connection closed by service")]
    Disconnected,

    /// The service rejected the request.
    #[error("Request rejected: {0}")]
    Rejected(String),
}

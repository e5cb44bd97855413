//! Control channel between the service and operator clients.
//!
//! Operator clients register for live job log lines and configuration
//! pushes, and may push a new configuration to the service.
//!
//! # Architecture
//!
//! ```text
//! Operator client                  Service
//!     |                              |
//!     |-- register ----------------->|
//!     |<-- response: registered -----| (current config)
//!     |                              |
//!     |<-- log_line -----------------| (every job log append)
//!     |                              |
//!     |-- set_config --------------->| (persist, apply)
//!     |<-- response: config_applied -|
//!     |<-- config -------------------| (to every client)
//!     |<-- log_line (audit) ---------|
//! ```
//!
//! # Protocol
//!
//! One session per Unix domain socket connection, one JSON object per line in
//! both directions. Pushes may arrive between a request and its response.

pub mod client;
pub mod registry;
pub mod server;
pub mod types;

pub use client::ControlClient;
pub use registry::{ClientHandle, ClientRegistry, ConnectionId, CLIENT_QUEUE_CAPACITY};
pub use server::{ControlServer, ControlService, ServerHandle};
pub use types::{ControlError, ControlRequest, ControlResponse, ServerMessage};

pub use crate::config::DEFAULT_CONTROL_SOCKET;

//! Control channel server.
//!
//! The server listens on a Unix domain socket. Each connection is a session
//! with a reader loop that answers requests and a writer task that drains the
//! connection's outgoing queue, which broadcasts feed as well.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::registry::{ClientHandle, ClientRegistry, ConnectionId, CLIENT_QUEUE_CAPACITY};
use super::types::{ControlError, ControlRequest, ControlResponse, ServerMessage};
use crate::config::{replace, snapshot, ConfigStore, ServiceConfig, SharedConfig};
use crate::job::Severity;

/// Handles control requests against the live configuration.
pub struct ControlService {
    config: SharedConfig,
    store: Arc<dyn ConfigStore>,
    registry: Arc<ClientRegistry>,
}

impl ControlService {
    #[must_use]
    pub fn new(
        config: SharedConfig,
        store: Arc<dyn ConfigStore>,
        registry: Arc<ClientRegistry>,
    ) -> Self {
        Self {
            config,
            store,
            registry,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Answers one request from connection `id`.
    pub fn handle(
        &self,
        id: ConnectionId,
        handle: &ClientHandle,
        request: ControlRequest,
    ) -> ControlResponse {
        match request {
            ControlRequest::Register { client_name } => {
                self.registry.register(id, client_name, handle.clone());
                ControlResponse::Registered {
                    config: snapshot(&self.config),
                }
            }
            ControlRequest::SetConfig { config } => self.set_config(id, config),
        }
    }

    fn set_config(&self, id: ConnectionId, config: ServiceConfig) -> ControlResponse {
        let Some(client_name) = self.registry.name_of(id) else {
            return ControlResponse::Error {
                message: "Register before changing the configuration".to_string(),
            };
        };

        // persist first so a failed save leaves the live config untouched
        if let Err(e) = self.store.save(&config) {
            tracing::error!(error = %e, client = %client_name, "Failed to save configuration");
            return ControlResponse::Error {
                message: e.to_string(),
            };
        }
        let previous = replace(&self.config, config.clone());
        let changed = previous.changed_fields(&config);
        tracing::info!(client = %client_name, ?changed, "SetConfig called");

        // fan out off the connection so the caller gets its response first
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            registry.broadcast_config(&config);
            registry.broadcast_log_line(
                &audit_line(&client_name, &config, &changed),
                Severity::Warning,
            );
        });

        ControlResponse::ConfigApplied
    }
}

/// Human-readable summary of a configuration change.
fn audit_line(client_name: &str, config: &ServiceConfig, changed: &[&str]) -> String {
    let on_off = |flag: bool| if flag { "enabled" } else { "disabled" };
    let changed = if changed.is_empty() {
        "none".to_string()
    } else {
        changed.join(", ")
    };
    format!(
        "Configuration updated by {client_name}.\n \
         - Input directory: {}\n \
         - Output directory: {}\n \
         - Job logging: {}\n \
         - Keep source files: {}\n \
         - Changed: {changed}",
        config.input_dir.display(),
        config.output_dir.display(),
        on_off(config.write_job_log_files),
        on_off(config.keep_source_files),
    )
}

/// Control channel server bound to a socket path.
#[derive(Debug)]
pub struct ControlServer {
    socket_path: PathBuf,
}

impl ControlServer {
    #[must_use]
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Binds the socket and starts accepting connections.
    ///
    /// A stale socket file from an earlier run is replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to the socket.
    pub fn start(&self, service: Arc<ControlService>) -> Result<ServerHandle, ControlError> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        tracing::info!(path = %self.socket_path.display(), "Control server started");

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let connections = CancellationToken::new();
        let next_id = AtomicU64::new(1);

        let sessions = connections.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("Control server shutting down");
                            break;
                        }
                    }

                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, _addr)) => {
                                let id = next_id.fetch_add(1, Ordering::Relaxed);
                                let service = Arc::clone(&service);
                                let cancel = sessions.child_token();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, id, service, cancel).await {
                                        tracing::warn!(error = %e, connection = id, "Connection handler error");
                                    }
                                });
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Failed to accept connection");
                            }
                        }
                    }
                }
            }
            sessions.cancel();
        });

        Ok(ServerHandle {
            socket_path: self.socket_path.clone(),
            shutdown_tx,
        })
    }
}

/// Handle for a running control server.
///
/// When dropped, the server stops and the socket file is cleaned up.
#[derive(Debug)]
pub struct ServerHandle {
    socket_path: PathBuf,
    shutdown_tx: watch::Sender<bool>,
}

impl ServerHandle {
    /// Stops accepting connections and closes open sessions.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                tracing::warn!(
                    path = %self.socket_path.display(),
                    error = %e,
                    "Failed to remove socket file"
                );
            }
        }
    }
}

/// Runs one client session until either side closes it.
async fn handle_connection(
    stream: UnixStream,
    id: ConnectionId,
    service: Arc<ControlService>,
    cancel: CancellationToken,
) -> Result<(), ControlError> {
    let (reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
    let handle = ClientHandle::new(tx.clone(), cancel.clone());
    let writer_task = tokio::spawn(write_messages(writer, rx, cancel.clone()));

    let mut lines = BufReader::new(reader).lines();
    let result = loop {
        let line = tokio::select! {
            () = cancel.cancelled() => break Ok(()),
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(e) => break Err(ControlError::Io(e)),
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<ControlRequest>(line.trim()) {
            Ok(request) => {
                tracing::debug!(connection = id, ?request, "Received control request");
                service.handle(id, &handle, request)
            }
            Err(e) => ControlResponse::Error {
                message: format!("Invalid request: {e}"),
            },
        };
        if tx.send(ServerMessage::Response(response)).await.is_err() {
            break Ok(());
        }
    };

    // a closed read side still gets every reply already queued; the writer
    // stops once the last sender is gone
    service.registry().unregister(id);
    drop(handle);
    drop(tx);
    if result.is_err() {
        cancel.cancel();
    }
    let _ = writer_task.await;
    result
}

/// Drains the outgoing queue into the socket until it closes or the session
/// is cancelled.
async fn write_messages(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<ServerMessage>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        if let Err(e) = write_message(&mut writer, &message).await {
            tracing::debug!(error = %e, "Client write failed");
            break;
        }
    }
    cancel.cancel();
    let _ = writer.shutdown().await;
}

async fn write_message(
    writer: &mut OwnedWriteHalf,
    message: &ServerMessage,
) -> Result<(), ControlError> {
    let mut json = serde_json::to_string(message)?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

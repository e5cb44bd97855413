//! Control channel client for operator tools.
//!
//! A client holds one session open. Pushes that arrive while it waits for a
//! response are queued and handed out by [`ControlClient::next_message`].

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use super::types::{ControlError, ControlRequest, ControlResponse, ServerMessage};
use crate::config::ServiceConfig;

/// Default timeout for a request/response round trip.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(4);

/// An open session with the service.
#[derive(Debug)]
pub struct ControlClient {
    reader: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    pending: VecDeque<ServerMessage>,
    timeout: Duration,
}

impl ControlClient {
    /// Connects to the service socket.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::ServiceNotRunning`] if the socket file does not
    /// exist, or an I/O error if the connection is refused.
    pub async fn connect<P: AsRef<Path>>(socket_path: P) -> Result<Self, ControlError> {
        let socket_path = socket_path.as_ref();
        if !socket_path.exists() {
            return Err(ControlError::ServiceNotRunning);
        }

        let stream = match tokio::time::timeout(DEFAULT_TIMEOUT, UnixStream::connect(socket_path)).await {
            Ok(stream) => stream?,
            Err(_) => return Err(ControlError::Timeout(timeout_ms(DEFAULT_TIMEOUT))),
        };
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader).lines(),
            writer,
            pending: VecDeque::new(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Sets the timeout for request/response round trips.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Registers under `client_name` and returns the current configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the round trip fails or the service rejects it.
    pub async fn register(&mut self, client_name: &str) -> Result<ServiceConfig, ControlError> {
        let request = ControlRequest::Register {
            client_name: client_name.to_string(),
        };
        match self.request(&request).await? {
            ControlResponse::Registered { config } => Ok(config),
            ControlResponse::Error { message } => Err(ControlError::Rejected(message)),
            ControlResponse::ConfigApplied => Err(ControlError::InvalidResponse),
        }
    }

    /// Pushes a new configuration. The session must be registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the round trip fails or the service rejects it.
    pub async fn set_config(&mut self, config: &ServiceConfig) -> Result<(), ControlError> {
        let request = ControlRequest::SetConfig {
            config: config.clone(),
        };
        match self.request(&request).await? {
            ControlResponse::ConfigApplied => Ok(()),
            ControlResponse::Error { message } => Err(ControlError::Rejected(message)),
            ControlResponse::Registered { .. } => Err(ControlError::InvalidResponse),
        }
    }

    /// Waits for the next pushed message.
    ///
    /// Returns `None` once the service closes the session. There is no
    /// timeout; pushes arrive whenever jobs log.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or decoding fails.
    pub async fn next_message(&mut self) -> Result<Option<ServerMessage>, ControlError> {
        if let Some(message) = self.pending.pop_front() {
            return Ok(Some(message));
        }
        self.read_message().await
    }

    async fn request(&mut self, request: &ControlRequest) -> Result<ControlResponse, ControlError> {
        let timeout = self.timeout;
        let result = tokio::time::timeout(timeout, async {
            let mut json = serde_json::to_string(request)?;
            json.push('\n');
            self.writer.write_all(json.as_bytes()).await?;
            self.writer.flush().await?;

            loop {
                match self.read_message().await? {
                    Some(ServerMessage::Response(response)) => return Ok(response),
                    Some(push) => self.pending.push_back(push),
                    None => return Err(ControlError::Disconnected),
                }
            }
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(ControlError::Timeout(timeout_ms(timeout))),
        }
    }

    async fn read_message(&mut self) -> Result<Option<ServerMessage>, ControlError> {
        loop {
            let Some(line) = self.reader.next_line().await? else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }
            return Ok(Some(serde_json::from_str(line.trim())?));
        }
    }
}

fn timeout_ms(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{shared, ConfigError, ConfigStore};
    use crate::control::{ClientRegistry, ControlServer, ControlService};
    use crate::job::Severity;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct NullStore;

    impl ConfigStore for NullStore {
        fn save(&self, _config: &ServiceConfig) -> Result<(), ConfigError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn connect_fails_without_socket() {
        let result = ControlClient::connect("/nonexistent/control.sock").await;
        assert!(matches!(result, Err(ControlError::ServiceNotRunning)));
    }

    #[test]
    fn timeout_ms_saturates() {
        assert_eq!(timeout_ms(Duration::from_secs(4)), 4000);
        assert_eq!(timeout_ms(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn push_during_request_is_queued() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("control.sock");
        let registry = Arc::new(ClientRegistry::new());
        let service = ControlService::new(
            shared(ServiceConfig::default()),
            Arc::new(NullStore),
            Arc::clone(&registry),
        );
        let _handle = ControlServer::new(&socket_path)
            .start(Arc::new(service))
            .unwrap();

        let mut client = ControlClient::connect(&socket_path)
            .await
            .unwrap()
            .with_timeout(Duration::from_secs(2));
        let config = client.register("desk").await.unwrap();
        assert_eq!(config, ServiceConfig::default());

        registry.broadcast_log_line("a.ps\tJob started.", Severity::Info);
        let next = ServiceConfig {
            keep_source_files: true,
            ..Default::default()
        };
        client.set_config(&next).await.unwrap();

        let first = client.next_message().await.unwrap().unwrap();
        assert_eq!(
            first,
            ServerMessage::LogLine {
                line: "a.ps\tJob started.".to_string(),
                severity: Severity::Info,
            }
        );
        let second = client.next_message().await.unwrap().unwrap();
        assert_eq!(second, ServerMessage::Config { config: next });
    }
}

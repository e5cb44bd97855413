//! Registered operator clients and broadcast fan-out.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use super::types::ServerMessage;
use crate::config::ServiceConfig;
use crate::job::Severity;

/// Identifies one accepted connection.
pub type ConnectionId = u64;

/// Messages a connection may have queued before it counts as stalled.
pub const CLIENT_QUEUE_CAPACITY: usize = 256;

/// The sending side of a connection.
///
/// The connection's writer task owns the receiver. A client counts as dead
/// once the writer has exited or its queue is full.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    tx: mpsc::Sender<ServerMessage>,
    cancel: CancellationToken,
}

impl ClientHandle {
    #[must_use]
    pub fn new(tx: mpsc::Sender<ServerMessage>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }
}

#[derive(Debug)]
struct ClientRegistration {
    display_name: String,
    handle: ClientHandle,
}

/// Connected clients that receive broadcasts.
///
/// Every fan-out works on a snapshot taken under the lock and sends outside
/// it, so a removal during iteration never skips or repeats a client.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<ConnectionId, ClientRegistration>>,
}

impl ClientRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, ClientRegistration>> {
        // the map is never left half-updated, so a poisoned lock is still usable
        self.clients
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Adds a client. Re-registering a known connection changes nothing.
    ///
    /// Returns `true` if the connection was added.
    pub fn register(
        &self,
        id: ConnectionId,
        display_name: impl Into<String>,
        handle: ClientHandle,
    ) -> bool {
        let mut clients = self.lock();
        if clients.contains_key(&id) {
            return false;
        }
        let display_name = display_name.into();
        tracing::debug!(client = %display_name, connection = id, "Client connected");
        clients.insert(
            id,
            ClientRegistration {
                display_name,
                handle,
            },
        );
        true
    }

    /// Display name of a registered connection.
    #[must_use]
    pub fn name_of(&self, id: ConnectionId) -> Option<String> {
        self.lock().get(&id).map(|r| r.display_name.clone())
    }

    /// Display names of all registered clients.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .values()
            .map(|r| r.display_name.clone())
            .collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Sends a log line to every client. Returns the number of deliveries.
    pub fn broadcast_log_line(&self, line: &str, severity: Severity) -> usize {
        self.broadcast(&ServerMessage::LogLine {
            line: line.to_string(),
            severity,
        })
    }

    /// Sends the configuration to every client. Returns the number of deliveries.
    pub fn broadcast_config(&self, config: &ServiceConfig) -> usize {
        let recipients = self.broadcast(&ServerMessage::Config {
            config: config.clone(),
        });
        tracing::debug!(recipients, "Broadcast configuration");
        recipients
    }

    fn broadcast(&self, message: &ServerMessage) -> usize {
        let snapshot: Vec<(ConnectionId, ClientHandle)> = self
            .lock()
            .iter()
            .map(|(id, r)| (*id, r.handle.clone()))
            .collect();

        let mut delivered = 0;
        for (id, handle) in snapshot {
            match handle.tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(connection = id, "Client stopped reading");
                    handle.cancel.cancel();
                    self.remove_dead(id);
                }
                Err(TrySendError::Closed(_)) => self.remove_dead(id),
            }
        }
        delivered
    }

    /// Drops a client whose connection is gone. Another broadcast may have
    /// removed it already.
    fn remove_dead(&self, id: ConnectionId) {
        if let Some(registration) = self.lock().remove(&id) {
            tracing::info!(
                client = %registration.display_name,
                "Client disconnected. Removed from client list."
            );
        }
    }

    /// Removes a connection that closed on its own.
    ///
    /// Returns `true` if it was registered.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.lock().remove(&id);
        if let Some(registration) = &removed {
            tracing::debug!(client = %registration.display_name, connection = id, "Client closed");
        }
        removed.is_some()
    }

    /// Closes every registered connection, then forgets them all.
    pub fn disconnect_all(&self) {
        let mut clients = self.lock();
        for registration in clients.values() {
            registration.handle.cancel.cancel();
        }
        tracing::debug!(count = clients.len(), "Disconnected all clients");
        clients.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> (ClientHandle, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        (ClientHandle::new(tx, CancellationToken::new()), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(m) = rx.try_recv() {
            messages.push(m);
        }
        messages
    }

    #[test]
    fn register_is_idempotent_per_connection() {
        let registry = ClientRegistry::new();
        let (handle, _rx) = client();
        assert!(registry.register(1, "desk", handle.clone()));
        assert!(!registry.register(1, "renamed", handle));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.name_of(1).as_deref(), Some("desk"));
        assert_eq!(registry.name_of(2), None);
    }

    #[test]
    fn broadcast_prunes_dead_client_and_delivers_once_to_others() {
        let registry = ClientRegistry::new();
        let (a, mut rx_a) = client();
        let (b, rx_b) = client();
        let (c, mut rx_c) = client();
        registry.register(1, "a", a);
        registry.register(2, "b", b);
        registry.register(3, "c", c);
        drop(rx_b);

        let delivered = registry.broadcast_log_line("job.ps\tJob started.", Severity::Info);

        assert_eq!(delivered, 2);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["a".to_string(), "c".to_string()]);
        let expected = ServerMessage::LogLine {
            line: "job.ps\tJob started.".to_string(),
            severity: Severity::Info,
        };
        assert_eq!(drain(&mut rx_a), vec![expected.clone()]);
        assert_eq!(drain(&mut rx_c), vec![expected]);
    }

    #[test]
    fn broadcast_config_reaches_every_client() {
        let registry = ClientRegistry::new();
        let (a, mut rx_a) = client();
        registry.register(1, "a", a);
        let config = ServiceConfig {
            keep_source_files: true,
            ..Default::default()
        };

        assert_eq!(registry.broadcast_config(&config), 1);
        assert_eq!(drain(&mut rx_a), vec![ServerMessage::Config { config }]);
    }

    #[test]
    fn removing_an_already_removed_client_is_harmless() {
        let registry = ClientRegistry::new();
        let (a, rx_a) = client();
        registry.register(1, "a", a);
        drop(rx_a);

        registry.broadcast_log_line("x", Severity::Info);
        registry.remove_dead(1);
        assert!(registry.is_empty());
    }

    #[test]
    fn stalled_client_is_cancelled_and_pruned() {
        let registry = ClientRegistry::new();
        let (stalled, _stalled_rx) = client();
        let token = stalled.cancel.clone();
        let (reader, mut reader_rx) = client();
        registry.register(1, "stalled", stalled);
        registry.register(2, "reader", reader);

        for n in 0..CLIENT_QUEUE_CAPACITY {
            assert_eq!(registry.broadcast_log_line(&format!("line {n}"), Severity::Info), 2);
            // the second client keeps up
            drain(&mut reader_rx);
        }
        let delivered = registry.broadcast_log_line("overflow", Severity::Info);

        assert_eq!(delivered, 1);
        assert!(token.is_cancelled());
        assert_eq!(registry.names(), vec!["reader".to_string()]);
        assert_eq!(drain(&mut reader_rx).len(), 1);
    }

    #[test]
    fn unregister_removes_once() {
        let registry = ClientRegistry::new();
        let (a, _rx_a) = client();
        registry.register(1, "a", a);

        assert!(registry.unregister(1));
        assert!(!registry.unregister(1));
        assert!(registry.is_empty());
    }

    #[test]
    fn disconnect_all_cancels_and_clears() {
        let registry = ClientRegistry::new();
        let (a, _rx_a) = client();
        let token = a.cancel.clone();
        registry.register(1, "a", a);

        registry.disconnect_all();

        assert!(token.is_cancelled());
        assert!(registry.is_empty());
        assert_eq!(registry.broadcast_log_line("x", Severity::Info), 0);
    }

    #[test]
    fn concurrent_broadcasts_do_not_double_deliver() {
        let registry = std::sync::Arc::new(ClientRegistry::new());
        let mut receivers = Vec::new();
        for id in 0..8 {
            let (handle, rx) = client();
            registry.register(id, format!("c{id}"), handle);
            receivers.push(rx);
        }
        // half of the clients are dead
        let mut live: Vec<_> = receivers
            .into_iter()
            .enumerate()
            .filter_map(|(i, rx)| (i % 2 == 0).then_some(rx))
            .collect();

        let threads: Vec<_> = (0..4)
            .map(|n| {
                let registry = std::sync::Arc::clone(&registry);
                std::thread::spawn(move || registry.broadcast_log_line(&format!("line {n}"), Severity::Info))
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(registry.len(), 4);
        for rx in &mut live {
            let mut lines: Vec<String> = drain(rx)
                .into_iter()
                .map(|m| match m {
                    ServerMessage::LogLine { line, .. } => line,
                    other => panic!("unexpected {other:?}"),
                })
                .collect();
            lines.sort();
            assert_eq!(lines, vec!["line 0", "line 1", "line 2", "line 3"]);
        }
    }
}

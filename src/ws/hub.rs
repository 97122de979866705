//! WebSocket connection hub.
//!
//! A single task owns the registry. Handles talk to it over a command channel,
//! so every register, unregister, send and broadcast is totally ordered and no
//! lock is ever held across a socket write. Writes go through each
//! connection's bounded outbound queue with `try_send`; the hub task never
//! waits on a slow peer, it drops it.
//!
//! # Connection states
//! ```text
//! Unregistered ──register──▶ Registered ──unregister / write failure──▶ Closed
//! ```
//! Removing a connection drops its queue sender. The writer task then sees the
//! end of the queue, sends a close frame and exits.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::ws::Message;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

use crate::lifecycle::ShutdownSignal;
use crate::net::ConnectionId;
use crate::observability::metrics;
use crate::ws::envelope::Envelope;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HubError {
    #[error("connection hub has stopped")]
    Stopped,
}

/// Result of one broadcast pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct BroadcastReport {
    /// Members at the start of the pass.
    pub recipients: usize,
    pub delivered: usize,
    /// Members whose write failed and were unregistered.
    pub removed: usize,
}

/// A peer as seen by the hub: an id plus the sending half of its writer queue.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    remote: Option<SocketAddr>,
    outbound: mpsc::Sender<Message>,
}

impl Connection {
    /// Create a connection and the queue its writer task drains.
    pub fn channel(id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                id,
                remote: None,
                outbound,
            },
            rx,
        )
    }

    pub fn with_remote(mut self, remote: SocketAddr) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    fn try_deliver(&self, message: Message) -> Result<(), &'static str> {
        self.outbound.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => "outbound queue full",
            mpsc::error::TrySendError::Closed(_) => "connection closed",
        })
    }
}

enum HubCommand {
    Register {
        connection: Connection,
        reply: oneshot::Sender<bool>,
    },
    Unregister {
        id: ConnectionId,
        reply: oneshot::Sender<bool>,
    },
    SendTo {
        id: ConnectionId,
        message: Message,
        reply: oneshot::Sender<bool>,
    },
    Broadcast {
        message: Message,
        reply: oneshot::Sender<BroadcastReport>,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
}

/// Cloneable handle to the hub task.
#[derive(Debug, Clone)]
pub struct ConnectionHub {
    commands: mpsc::UnboundedSender<HubCommand>,
}

impl std::fmt::Debug for HubCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HubCommand::Register { connection, .. } => write!(f, "Register({})", connection.id),
            HubCommand::Unregister { id, .. } => write!(f, "Unregister({id})"),
            HubCommand::SendTo { id, .. } => write!(f, "SendTo({id})"),
            HubCommand::Broadcast { .. } => f.write_str("Broadcast"),
            HubCommand::Count { .. } => f.write_str("Count"),
        }
    }
}

impl ConnectionHub {
    /// Create a handle and the task that serves it. The task does nothing
    /// until [`HubTask::run`] is polled.
    pub fn new() -> (Self, HubTask) {
        let (commands, rx) = mpsc::unbounded_channel();
        (
            Self { commands },
            HubTask {
                commands: rx,
                registry: HashMap::new(),
            },
        )
    }

    /// Create a hub and spawn its task onto the current runtime.
    pub fn spawn(shutdown: ShutdownSignal) -> Self {
        let (hub, task) = Self::new();
        tokio::spawn(task.run(shutdown));
        hub
    }

    /// Add a connection and send it a welcome envelope.
    ///
    /// Returns `false` if the id is already registered.
    pub async fn register(&self, connection: Connection) -> Result<bool, HubError> {
        self.request(|reply| HubCommand::Register { connection, reply })
            .await
    }

    /// Remove and close a connection. Returns `false` if it was not a member.
    pub async fn unregister(&self, id: ConnectionId) -> Result<bool, HubError> {
        self.request(|reply| HubCommand::Unregister { id, reply }).await
    }

    /// Queue an envelope for one member. A failed write unregisters it and
    /// reports `false`.
    pub async fn send_to(&self, id: ConnectionId, envelope: &Envelope) -> Result<bool, HubError> {
        let message = envelope.to_message();
        self.request(|reply| HubCommand::SendTo { id, message, reply })
            .await
    }

    /// Queue an envelope for every member, dropping members that cannot take it.
    pub async fn broadcast(&self, envelope: &Envelope) -> Result<BroadcastReport, HubError> {
        let message = envelope.to_message();
        self.request(|reply| HubCommand::Broadcast { message, reply })
            .await
    }

    /// Current membership size.
    pub async fn client_count(&self) -> Result<usize, HubError> {
        self.request(|reply| HubCommand::Count { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> HubCommand,
    ) -> Result<T, HubError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| HubError::Stopped)?;
        response.await.map_err(|_| HubError::Stopped)
    }
}

/// The task owning the registry.
#[derive(Debug)]
pub struct HubTask {
    commands: mpsc::UnboundedReceiver<HubCommand>,
    registry: HashMap<ConnectionId, Connection>,
}

impl HubTask {
    /// Serve commands until shutdown fires or every handle is gone.
    pub async fn run(mut self, mut shutdown: ShutdownSignal) {
        tracing::debug!("Connection hub started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
            }
        }

        let remaining = self.registry.len();
        self.registry.clear();
        metrics::record_ws_connections(0);
        tracing::info!(closed = remaining, "Connection hub stopped");
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register { connection, reply } => {
                let _ = reply.send(self.register(connection));
            }
            HubCommand::Unregister { id, reply } => {
                let _ = reply.send(self.remove(id, "unregistered"));
            }
            HubCommand::SendTo { id, message, reply } => {
                let _ = reply.send(self.send_to(id, message));
            }
            HubCommand::Broadcast { message, reply } => {
                let _ = reply.send(self.broadcast(message));
            }
            HubCommand::Count { reply } => {
                let _ = reply.send(self.registry.len());
            }
        }
    }

    fn register(&mut self, connection: Connection) -> bool {
        let id = connection.id;
        if self.registry.contains_key(&id) {
            return false;
        }

        let welcome = Envelope::new(
            "welcome",
            json!({
                "client_id": id.to_string(),
                "message": "connected",
                "remote": connection.remote().map(|addr| addr.to_string()),
            }),
        );
        let delivered = connection.try_deliver(welcome.to_message());
        self.registry.insert(id, connection);
        tracing::debug!(connection_id = %id, members = self.registry.len(), "Connection registered");

        if let Err(reason) = delivered {
            tracing::debug!(connection_id = %id, reason, "Welcome not delivered");
            self.remove(id, reason);
        }
        metrics::record_ws_connections(self.registry.len());
        true
    }

    fn send_to(&mut self, id: ConnectionId, message: Message) -> bool {
        let Some(connection) = self.registry.get(&id) else {
            return false;
        };
        match connection.try_deliver(message) {
            Ok(()) => true,
            Err(reason) => {
                self.remove(id, reason);
                false
            }
        }
    }

    fn broadcast(&mut self, message: Message) -> BroadcastReport {
        let recipients = self.registry.len();
        let failed: Vec<(ConnectionId, &'static str)> = self
            .registry
            .iter()
            .filter_map(|(id, connection)| {
                connection
                    .try_deliver(message.clone())
                    .err()
                    .map(|reason| (*id, reason))
            })
            .collect();

        for (id, reason) in &failed {
            self.remove(*id, reason);
        }
        metrics::record_broadcast_removed(failed.len());

        let report = BroadcastReport {
            recipients,
            delivered: recipients - failed.len(),
            removed: failed.len(),
        };
        tracing::debug!(?report, "Broadcast pass complete");
        report
    }

    fn remove(&mut self, id: ConnectionId, reason: &str) -> bool {
        let removed = self.registry.remove(&id).is_some();
        if removed {
            metrics::record_ws_connections(self.registry.len());
            tracing::debug!(connection_id = %id, reason, members = self.registry.len(), "Connection removed");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;

    fn envelope_of(message: Message) -> Envelope {
        match message {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn register_sends_welcome_once() {
        let hub = ConnectionHub::spawn(ShutdownSignal::never());
        let (connection, mut rx) = Connection::channel(ConnectionId::new(), 8);

        assert_eq!(hub.register(connection.clone()).await, Ok(true));
        assert_eq!(hub.register(connection).await, Ok(false));
        assert_eq!(hub.client_count().await, Ok(1));

        assert_eq!(envelope_of(rx.recv().await.unwrap()).kind, "welcome");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn welcome_names_the_peer_address() {
        let hub = ConnectionHub::spawn(ShutdownSignal::never());
        let remote: SocketAddr = "10.0.0.7:51000".parse().unwrap();
        let (connection, mut rx) = Connection::channel(ConnectionId::new(), 8);
        let connection = connection.with_remote(remote);
        assert_eq!(connection.remote(), Some(remote));

        hub.register(connection).await.unwrap();
        let welcome = envelope_of(rx.recv().await.unwrap());
        assert_eq!(welcome.data["remote"], "10.0.0.7:51000");
    }

    #[tokio::test]
    async fn unregister_twice_is_the_same_as_once() {
        let hub = ConnectionHub::spawn(ShutdownSignal::never());
        let (connection, mut rx) = Connection::channel(ConnectionId::new(), 8);
        let id = connection.id();
        hub.register(connection).await.unwrap();

        assert_eq!(hub.unregister(id).await, Ok(true));
        assert_eq!(hub.unregister(id).await, Ok(false));
        assert_eq!(hub.client_count().await, Ok(0));

        // Welcome, then the queue ends: the writer would close the socket.
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn broadcast_drops_failing_members() {
        let hub = ConnectionHub::spawn(ShutdownSignal::never());
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (connection, rx) = Connection::channel(ConnectionId::new(), 8);
            hub.register(connection).await.unwrap();
            receivers.push(rx);
        }
        // Peer goes away without unregistering.
        drop(receivers.pop());

        let report = hub
            .broadcast(&Envelope::new("broadcast", json!("hello")))
            .await
            .unwrap();
        assert_eq!(
            report,
            BroadcastReport {
                recipients: 3,
                delivered: 2,
                removed: 1
            }
        );
        assert_eq!(report.delivered + report.removed, report.recipients);
        assert_eq!(hub.client_count().await, Ok(2));

        for rx in &mut receivers {
            assert_eq!(envelope_of(rx.recv().await.unwrap()).kind, "welcome");
            assert_eq!(envelope_of(rx.recv().await.unwrap()).kind, "broadcast");
        }
    }

    #[tokio::test]
    async fn slow_member_is_dropped_instead_of_awaited() {
        let hub = ConnectionHub::spawn(ShutdownSignal::never());
        // Room for the welcome only.
        let (connection, _rx) = Connection::channel(ConnectionId::new(), 1);
        let id = connection.id();
        hub.register(connection).await.unwrap();

        let sent = hub
            .send_to(id, &Envelope::new("response", json!({})))
            .await
            .unwrap();
        assert!(!sent);
        assert_eq!(hub.client_count().await, Ok(0));
    }

    #[tokio::test]
    async fn send_to_unknown_member_is_false() {
        let hub = ConnectionHub::spawn(ShutdownSignal::never());
        let sent = hub
            .send_to(ConnectionId::new(), &Envelope::new("response", json!({})))
            .await;
        assert_eq!(sent, Ok(false));
    }

    #[tokio::test]
    async fn stopped_hub_rejects_commands() {
        let shutdown = Shutdown::new();
        let (hub, task) = ConnectionHub::new();
        let handle = tokio::spawn(task.run(shutdown.subscribe()));

        let (connection, mut rx) = Connection::channel(ConnectionId::new(), 8);
        hub.register(connection).await.unwrap();
        shutdown.trigger();
        handle.await.unwrap();

        assert_eq!(hub.client_count().await, Err(HubError::Stopped));
        // Remaining members were closed.
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }
}

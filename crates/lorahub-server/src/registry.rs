//! Connection registry: the single shared view of who is connected.
//!
//! Records live in a `DashMap`; every operation holds a shard lock only for
//! the in-memory mutation. Fan-out works on a cloned snapshot so a slow or
//! dead peer never holds up registration or removal of others.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;

use lorahub_core::{ConnectionId, Role};

/// Serialized frame shared across every recipient of a fan-out.
pub type Payload = Arc<String>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("connection not registered")]
    NotConnected,
    #[error("transport closed")]
    Closed,
    #[error("send queue full")]
    QueueFull,
}

/// Result of a role transition request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoleUpdate {
    Applied,
    Unchanged,
    /// The record already holds a different non-`Unknown` role.
    Rejected { current: Role },
    NotFound,
}

impl RoleUpdate {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Applied | Self::Unchanged)
    }
}

/// Per-peer state. Cloning yields a point-in-time copy that still shares the
/// outbound queue.
#[derive(Clone, Debug)]
pub struct ConnectionRecord {
    pub id: ConnectionId,
    pub role: Role,
    pub gateway_id: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub remote_addr: Option<String>,
    tx: mpsc::Sender<Payload>,
}

impl ConnectionRecord {
    fn new(id: ConnectionId, remote_addr: Option<String>, tx: mpsc::Sender<Payload>) -> Self {
        let now = Utc::now();
        Self {
            id,
            role: Role::Unknown,
            gateway_id: None,
            connected_at: now,
            last_heartbeat: now,
            remote_addr,
            tx,
        }
    }

    /// Whether the outbound queue still has a live writer on the other end.
    pub fn transport_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Non-blocking send onto this connection's outbound queue.
    pub fn try_send(&self, payload: Payload) -> Result<(), SendError> {
        self.tx.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Monotonic role rule: `Unknown` may become `Gateway` or `Observer`;
    /// nothing ever returns to `Unknown` or switches between the two.
    fn apply_role(&mut self, role: Role, gateway_id: Option<String>) -> RoleUpdate {
        match (self.role, role) {
            (_, Role::Unknown) => RoleUpdate::Unchanged,
            (Role::Unknown, Role::Gateway) => {
                self.role = Role::Gateway;
                self.gateway_id = gateway_id;
                RoleUpdate::Applied
            }
            (Role::Unknown, Role::Observer) => {
                self.role = Role::Observer;
                RoleUpdate::Applied
            }
            (Role::Gateway, Role::Gateway) => {
                if gateway_id.is_some() && gateway_id != self.gateway_id {
                    self.gateway_id = gateway_id;
                    RoleUpdate::Applied
                } else {
                    RoleUpdate::Unchanged
                }
            }
            (Role::Observer, Role::Observer) => RoleUpdate::Unchanged,
            (current, _) => RoleUpdate::Rejected { current },
        }
    }

    pub(crate) fn is_stale(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        !self.transport_open() || now.signed_duration_since(self.last_heartbeat) > timeout
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.clone(),
            role: self.role,
            gateway_id: self.gateway_id.clone(),
            connected_at: self.connected_at,
            last_ping: self.last_heartbeat,
            remote_addr: self.remote_addr.clone(),
        }
    }
}

/// Introspection view of a record.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    #[serde(rename = "type")]
    pub role: Role,
    pub gateway_id: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_ping: DateTime<Utc>,
    pub remote_addr: Option<String>,
}

/// Outcome of a fan-out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub attempted: usize,
    pub delivered: usize,
}

/// Registry of all connected peers.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionRecord>,
    max_send_queue: usize,
}

impl ConnectionRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            max_send_queue: max_send_queue.max(1),
        }
    }

    /// Register a new connection with role `Unknown`.
    /// Returns its id and the receiving half of its outbound queue.
    pub fn register(&self, remote_addr: Option<String>) -> (ConnectionId, mpsc::Receiver<Payload>) {
        let id = ConnectionId::generate();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.connections
            .insert(id.clone(), ConnectionRecord::new(id.clone(), remote_addr, tx));
        (id, rx)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<ConnectionRecord> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    pub fn update_role(
        &self,
        id: &ConnectionId,
        role: Role,
        gateway_id: Option<String>,
    ) -> RoleUpdate {
        match self.connections.get_mut(id) {
            Some(mut entry) => entry.apply_role(role, gateway_id),
            None => RoleUpdate::NotFound,
        }
    }

    /// Returns `false` if the connection is gone.
    pub fn touch_heartbeat(&self, id: &ConnectionId) -> bool {
        match self.connections.get_mut(id) {
            Some(mut entry) => {
                entry.last_heartbeat = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Idempotent. Returns whether a record was actually removed.
    pub fn remove(&self, id: &ConnectionId) -> bool {
        self.connections.remove(id).is_some()
    }

    /// Remove only if the predicate still holds under the shard lock.
    pub(crate) fn remove_if(
        &self,
        id: &ConnectionId,
        predicate: impl FnOnce(&ConnectionRecord) -> bool,
    ) -> bool {
        self.connections
            .remove_if(id, |_, record| predicate(record))
            .is_some()
    }

    pub fn snapshot(&self) -> Vec<ConnectionRecord> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn snapshot_by_role(&self, role: Role) -> Vec<ConnectionRecord> {
        self.connections
            .iter()
            .filter(|entry| entry.role == role)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Whether any live gateway connection announced this gateway id.
    pub fn has_gateway(&self, gateway_id: &str) -> bool {
        self.connections.iter().any(|entry| {
            entry.role == Role::Gateway
                && entry.gateway_id.as_deref() == Some(gateway_id)
                && entry.transport_open()
        })
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Unicast. A closed transport removes the record immediately.
    pub fn send_to(&self, id: &ConnectionId, payload: Payload) -> Result<(), SendError> {
        let record = self.get(id).ok_or(SendError::NotConnected)?;
        self.deliver(&record, payload)
    }

    /// Send to every connection holding `role` at snapshot time.
    pub fn broadcast_to_role(&self, role: Role, payload: &Payload) -> FanoutReport {
        let targets = self.snapshot_by_role(role);
        let mut report = FanoutReport {
            attempted: targets.len(),
            delivered: 0,
        };
        for record in &targets {
            if self.deliver(record, Arc::clone(payload)).is_ok() {
                report.delivered += 1;
            }
        }
        report
    }

    fn deliver(&self, record: &ConnectionRecord, payload: Payload) -> Result<(), SendError> {
        let result = record.try_send(payload);
        match result {
            Ok(()) => {}
            Err(SendError::Closed) => {
                if self.remove(&record.id) {
                    tracing::info!(connection_id = %record.id, role = %record.role, "removed connection with closed transport");
                }
            }
            Err(SendError::QueueFull) => {
                tracing::warn!(connection_id = %record.id, role = %record.role, "send queue full, dropping message");
            }
            Err(SendError::NotConnected) => {}
        }
        result
    }
}

//! Applies classified inbound frames to the registry, storage and peers.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use lorahub_core::{
    classify, ClassifyError, ConnectionId, HubError, HubStorage, InboundEvent, OutboundMessage,
    Role, SensorReading,
};

use crate::registry::{ConnectionRegistry, FanoutReport, Payload, RoleUpdate};

/// What happened to one inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum RouteOutcome {
    /// Malformed or failed validation; nothing beyond liveness changed.
    Dropped(ClassifyError),
    /// Unrecognized `type`, or a role announcement that was refused.
    Ignored { kind: String },
    GatewayRegistered {
        gateway_id: String,
        stored: bool,
        acked: bool,
    },
    ObserverRegistered,
    SensorData(SensorIngest),
    Heartbeat { gateway_id: String, stored: bool },
}

/// Persistence and fan-out results for one sensor reading. Each side is
/// attempted regardless of how the other went.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SensorIngest {
    pub stored: bool,
    pub delivered: usize,
}

pub struct Router {
    registry: Arc<ConnectionRegistry>,
    storage: Arc<dyn HubStorage>,
}

impl Router {
    pub fn new(registry: Arc<ConnectionRegistry>, storage: Arc<dyn HubStorage>) -> Self {
        Self { registry, storage }
    }

    /// Handle one text frame from `connection_id`. Callers invoke this in
    /// receipt order per connection.
    pub fn handle(&self, connection_id: &ConnectionId, raw: &str) -> RouteOutcome {
        let event = match classify(raw) {
            Ok(event) => event,
            Err(err @ ClassifyError::Parse(_)) => {
                warn!(connection_id = %connection_id, error = %err, "dropping malformed frame");
                return RouteOutcome::Dropped(err);
            }
            Err(err) => {
                // Parsed frames count as liveness even when incomplete.
                self.registry.touch_heartbeat(connection_id);
                warn!(connection_id = %connection_id, error = %err, "dropping invalid frame");
                return RouteOutcome::Dropped(err);
            }
        };

        self.registry.touch_heartbeat(connection_id);
        debug!(connection_id = %connection_id, kind = event.kind(), "routing frame");

        match event {
            InboundEvent::GatewayConnected { gateway_id } => {
                self.on_gateway_connected(connection_id, gateway_id)
            }
            InboundEvent::ObserverConnected => self.on_observer_connected(connection_id),
            InboundEvent::SensorData { reading, raw } => {
                RouteOutcome::SensorData(self.ingest(&reading, raw))
            }
            InboundEvent::Heartbeat { gateway_id } => {
                let stored = match self.storage.touch_gateway_last_seen(&gateway_id) {
                    Ok(known) => {
                        if !known {
                            debug!(gateway_id = %gateway_id, "heartbeat from gateway with no stored record");
                        }
                        true
                    }
                    Err(e) => {
                        warn!(gateway_id = %gateway_id, error = %e, "failed to update gateway last_seen");
                        false
                    }
                };
                RouteOutcome::Heartbeat { gateway_id, stored }
            }
            InboundEvent::Unrecognized { kind } => {
                let kind = kind.unwrap_or_else(|| "<none>".into());
                info!(connection_id = %connection_id, kind = %kind, "ignoring unrecognized message type");
                RouteOutcome::Ignored { kind }
            }
        }
    }

    /// Sensor data submitted outside a transport connection (HTTP).
    pub fn ingest_sensor_data(&self, raw: Value) -> SensorIngest {
        let reading = SensorReading::from_value(&raw);
        self.ingest(&reading, raw)
    }

    /// Serialize once and send to every Observer. Per-peer failures are
    /// counted, never propagated.
    pub fn broadcast(&self, message: &OutboundMessage) -> Result<FanoutReport, HubError> {
        let payload: Payload = Arc::new(serde_json::to_string(message)?);
        let report = self.registry.broadcast_to_role(Role::Observer, &payload);
        debug!(
            event_type = message.event_type(),
            attempted = report.attempted,
            delivered = report.delivered,
            "broadcast to observers"
        );
        Ok(report)
    }

    fn on_gateway_connected(&self, connection_id: &ConnectionId, gateway_id: String) -> RouteOutcome {
        let update =
            self.registry
                .update_role(connection_id, Role::Gateway, Some(gateway_id.clone()));
        if !update.is_accepted() {
            warn!(connection_id = %connection_id, gateway_id = %gateway_id, ?update, "gateway announcement refused");
            return RouteOutcome::Ignored {
                kind: lorahub_core::protocol::kinds::GATEWAY_CONNECTED.into(),
            };
        }
        info!(connection_id = %connection_id, gateway_id = %gateway_id, "gateway connected");

        let stored = match self.storage.upsert_gateway_online(&gateway_id) {
            Ok(()) => true,
            Err(e) => {
                warn!(gateway_id = %gateway_id, error = %e, "failed to record gateway online");
                false
            }
        };

        let acked = match serde_json::to_string(&OutboundMessage::gateway_ack()) {
            Ok(json) => match self.registry.send_to(connection_id, Arc::new(json)) {
                Ok(()) => true,
                Err(e) => {
                    warn!(connection_id = %connection_id, error = %e, "failed to send gateway ack");
                    false
                }
            },
            Err(e) => {
                warn!(error = %e, "failed to serialize gateway ack");
                false
            }
        };

        RouteOutcome::GatewayRegistered {
            gateway_id,
            stored,
            acked,
        }
    }

    fn on_observer_connected(&self, connection_id: &ConnectionId) -> RouteOutcome {
        let update = self.registry.update_role(connection_id, Role::Observer, None);
        if update.is_accepted() {
            info!(connection_id = %connection_id, "observer connected");
            RouteOutcome::ObserverRegistered
        } else {
            warn!(connection_id = %connection_id, ?update, "observer announcement refused");
            RouteOutcome::Ignored {
                kind: lorahub_core::protocol::kinds::OBSERVER_CONNECTED.into(),
            }
        }
    }

    fn ingest(&self, reading: &SensorReading, raw: Value) -> SensorIngest {
        let stored = match self.storage.save_sensor_reading(reading) {
            Ok(row_id) => {
                debug!(row_id, node_id = ?reading.node_id, "sensor reading saved");
                true
            }
            Err(e) => {
                warn!(node_id = ?reading.node_id, error = %e, "failed to save sensor reading");
                false
            }
        };

        let delivered = match self.broadcast(&OutboundMessage::NewSensorData { data: raw }) {
            Ok(report) => report.delivered,
            Err(e) => {
                warn!(error = %e, "failed to broadcast sensor data");
                0
            }
        };

        SensorIngest { stored, delivered }
    }
}

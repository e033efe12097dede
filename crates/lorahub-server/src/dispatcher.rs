use std::sync::Arc;

use tracing::{info, warn};

use lorahub_core::{Command, HubError, OutboundMessage, Role};

use crate::registry::{ConnectionRegistry, Payload};

/// Result of routing a command to the gateways.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered { gateways: usize },
    /// No gateway accepted the command; `attempted` counts those tried.
    Unavailable { attempted: usize },
}

impl DispatchOutcome {
    pub fn delivered_count(&self) -> usize {
        match self {
            Self::Delivered { gateways } => *gateways,
            Self::Unavailable { .. } => 0,
        }
    }
}

/// Sends operator commands to every connected gateway. Gateways decide
/// locally whether they own the addressed node.
pub struct CommandDispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl CommandDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn dispatch(&self, command: &Command) -> Result<DispatchOutcome, HubError> {
        let message = OutboundMessage::send_to_node(command);
        let payload: Payload = Arc::new(serde_json::to_string(&message)?);

        let report = self.registry.broadcast_to_role(Role::Gateway, &payload);
        if report.delivered == 0 {
            warn!(
                node_id = command.node_id,
                attempted = report.attempted,
                "no gateway available for command"
            );
            return Ok(DispatchOutcome::Unavailable {
                attempted: report.attempted,
            });
        }

        info!(
            node_id = command.node_id,
            gateways = report.delivered,
            "command sent to gateways"
        );
        Ok(DispatchOutcome::Delivered {
            gateways: report.delivered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reset_node_7() -> Command {
        Command {
            node_id: 7,
            message: "reset".into(),
        }
    }

    #[test]
    fn no_gateways_is_unavailable() {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let (_obs, _rx) = registry.register(None);
        let dispatcher = CommandDispatcher::new(registry);

        let outcome = dispatcher.dispatch(&reset_node_7()).unwrap();
        assert_eq!(outcome, DispatchOutcome::Unavailable { attempted: 0 });
        assert_eq!(outcome.delivered_count(), 0);
    }

    #[test]
    fn command_reaches_gateway_not_observer() {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let (a, mut a_rx) = registry.register(None);
        let (b, mut b_rx) = registry.register(None);
        registry.update_role(&a, Role::Gateway, Some("gw-1".into()));
        registry.update_role(&b, Role::Observer, None);

        let dispatcher = CommandDispatcher::new(Arc::clone(&registry));
        let outcome = dispatcher.dispatch(&reset_node_7()).unwrap();
        assert_eq!(outcome, DispatchOutcome::Delivered { gateways: 1 });

        let msg: serde_json::Value = serde_json::from_str(&a_rx.try_recv().unwrap()).unwrap();
        assert_eq!(msg["type"], "send_to_node");
        assert_eq!(msg["nodeId"], 7);
        assert_eq!(msg["message"], "reset");
        assert!(msg["timestamp"].is_i64());
        assert!(b_rx.try_recv().is_err());
    }

    #[test]
    fn command_fans_out_to_every_gateway() {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let mut receivers = Vec::new();
        for i in 0..3 {
            let (id, rx) = registry.register(None);
            registry.update_role(&id, Role::Gateway, Some(format!("gw-{i}")));
            receivers.push(rx);
        }
        let dispatcher = CommandDispatcher::new(registry);
        let outcome = dispatcher.dispatch(&reset_node_7()).unwrap();
        assert_eq!(outcome.delivered_count(), 3);
        for rx in &mut receivers {
            assert!(rx.try_recv().is_ok());
        }
    }

    #[test]
    fn dead_gateways_only_is_unavailable() {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let (gw, rx) = registry.register(None);
        registry.update_role(&gw, Role::Gateway, Some("gw-1".into()));
        drop(rx);

        let dispatcher = CommandDispatcher::new(Arc::clone(&registry));
        let outcome = dispatcher.dispatch(&reset_node_7()).unwrap();
        assert_eq!(outcome, DispatchOutcome::Unavailable { attempted: 1 });
        assert!(registry.get(&gw).is_none());
    }
}

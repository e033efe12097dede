use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use lorahub_core::ConnectionId;

use crate::registry::ConnectionRegistry;

/// Sweep cadence and idle threshold. The threshold is kept well above the
/// gateways' heartbeat period so jitter does not cause evictions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LivenessConfig {
    pub sweep_interval: Duration,
    pub heartbeat_timeout: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            heartbeat_timeout: Duration::from_secs(120),
        }
    }
}

/// Periodically reclaims connections whose transport closed or that have
/// gone quiet for longer than the heartbeat timeout.
pub struct LivenessMonitor {
    registry: Arc<ConnectionRegistry>,
    config: LivenessConfig,
}

impl LivenessMonitor {
    pub fn new(registry: Arc<ConnectionRegistry>, config: LivenessConfig) -> Self {
        Self { registry, config }
    }

    pub fn sweep(&self) -> Vec<ConnectionId> {
        self.sweep_at(Utc::now())
    }

    /// Evict every stale record as of `now`. Staleness is re-checked under
    /// the registry lock, so a record touched after the snapshot survives.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> Vec<ConnectionId> {
        let timeout = chrono::Duration::from_std(self.config.heartbeat_timeout)
            .unwrap_or(chrono::Duration::MAX);

        let mut evicted = Vec::new();
        for record in self.registry.snapshot() {
            if !record.is_stale(now, timeout) {
                continue;
            }
            if self
                .registry
                .remove_if(&record.id, |current| current.is_stale(now, timeout))
            {
                tracing::info!(
                    connection_id = %record.id,
                    role = %record.role,
                    transport_open = record.transport_open(),
                    "evicted stale connection"
                );
                evicted.push(record.id);
            }
        }
        evicted
    }

    /// Run sweeps on a fixed interval until the task is aborted.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.sweep_interval);
            ticker.tick().await; // consume first immediate tick
            loop {
                ticker.tick().await;
                let evicted = self.sweep();
                if !evicted.is_empty() {
                    tracing::info!(removed = evicted.len(), "cleaned up stale connections");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorahub_core::Role;

    fn monitor(registry: &Arc<ConnectionRegistry>) -> LivenessMonitor {
        LivenessMonitor::new(Arc::clone(registry), LivenessConfig::default())
    }

    #[test]
    fn quiet_connection_is_evicted_after_threshold() {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let (id, _rx) = registry.register(None);
        let monitor = monitor(&registry);

        let evicted = monitor.sweep_at(Utc::now() + chrono::Duration::seconds(121));
        assert_eq!(evicted, vec![id.clone()]);
        assert!(registry.get(&id).is_none());
    }

    #[test]
    fn connection_within_threshold_survives() {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let (id, _rx) = registry.register(None);
        let monitor = monitor(&registry);

        assert!(monitor.sweep_at(Utc::now() + chrono::Duration::seconds(60)).is_empty());
        assert!(registry.get(&id).is_some());
    }

    #[test]
    fn heartbeating_connection_survives_repeated_sweeps() {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let (id, _rx) = registry.register(None);
        let monitor = monitor(&registry);

        for _ in 0..5 {
            registry.touch_heartbeat(&id);
            let last = registry.get(&id).unwrap().last_heartbeat;
            assert!(monitor.sweep_at(last + chrono::Duration::seconds(119)).is_empty());
        }
        assert!(registry.get(&id).is_some());
    }

    #[test]
    fn closed_transport_is_evicted_immediately() {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let (closed, rx) = registry.register(None);
        let (open, _rx_open) = registry.register(None);
        registry.update_role(&closed, Role::Gateway, Some("gw-1".into()));
        drop(rx);

        let evicted = monitor(&registry).sweep();
        assert_eq!(evicted, vec![closed]);
        assert!(registry.get(&open).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn sweep_of_empty_registry_is_noop() {
        let registry = Arc::new(ConnectionRegistry::new(8));
        assert!(monitor(&registry).sweep().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_monitor_sweeps_on_interval() {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let (id, rx) = registry.register(None);
        drop(rx);

        let handle = LivenessMonitor::new(
            Arc::clone(&registry),
            LivenessConfig {
                sweep_interval: Duration::from_secs(1),
                heartbeat_timeout: Duration::from_secs(120),
            },
        )
        .spawn();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(registry.get(&id).is_none());
        handle.abort();
    }
}

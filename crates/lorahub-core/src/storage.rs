//! Storage collaborator boundary.
//!
//! The hub only needs a handful of writes and reads; the concrete backend
//! lives in `lorahub-store`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::StorageError;
use crate::protocol::SensorReading;

/// Default number of rows returned by reading queries.
pub const DEFAULT_READING_LIMIT: u32 = 50;
/// Upper bound accepted from callers.
pub const MAX_READING_LIMIT: u32 = 1000;

/// A persisted sensor reading.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredReading {
    pub id: i64,
    pub node_id: Option<i64>,
    pub voltage: Option<f64>,
    pub message_type: Option<String>,
    pub timestamp: Option<i64>,
    pub rssi: Option<i64>,
    pub snr: Option<f64>,
    pub gateway_id: Option<String>,
    #[serde(rename = "received_at")]
    pub received_at: String,
}

/// A gateway status row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRecord {
    pub id: i64,
    pub gateway_id: String,
    pub last_seen: String,
    pub status: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadingOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Query over stored readings. Unset fields do not filter.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadingFilter {
    pub node_id: Option<i64>,
    pub message_type: Option<String>,
    pub received_since: Option<DateTime<Utc>>,
    pub limit: u32,
    pub order: ReadingOrder,
}

impl Default for ReadingFilter {
    fn default() -> Self {
        Self {
            node_id: None,
            message_type: None,
            received_since: None,
            limit: DEFAULT_READING_LIMIT,
            order: ReadingOrder::NewestFirst,
        }
    }
}

impl ReadingFilter {
    pub fn latest(limit: u32) -> Self {
        Self {
            limit: clamp_limit(limit),
            ..Default::default()
        }
    }

    pub fn for_node(node_id: i64, limit: u32) -> Self {
        Self {
            node_id: Some(node_id),
            limit: clamp_limit(limit),
            ..Default::default()
        }
    }

    /// Voltage readings for one node received after `since`, oldest first.
    pub fn voltage_history(node_id: i64, since: DateTime<Utc>) -> Self {
        Self {
            node_id: Some(node_id),
            message_type: Some("voltage_reading".into()),
            received_since: Some(since),
            limit: MAX_READING_LIMIT,
            order: ReadingOrder::OldestFirst,
        }
    }
}

fn clamp_limit(limit: u32) -> u32 {
    limit.clamp(1, MAX_READING_LIMIT)
}

/// Persistence operations the hub relies on.
///
/// Calls are synchronous and expected to be short; the router treats every
/// write as best-effort and keeps going when one fails.
pub trait HubStorage: Send + Sync {
    /// Persist a reading, returning its row id.
    fn save_sensor_reading(&self, reading: &SensorReading) -> Result<i64, StorageError>;

    /// Insert the gateway or mark it online with the current time.
    fn upsert_gateway_online(&self, gateway_id: &str) -> Result<(), StorageError>;

    /// Refresh `last_seen`. Returns `false` if the gateway was never recorded.
    fn touch_gateway_last_seen(&self, gateway_id: &str) -> Result<bool, StorageError>;

    fn list_gateways(&self) -> Result<Vec<GatewayRecord>, StorageError>;

    fn query_readings(&self, filter: &ReadingFilter) -> Result<Vec<StoredReading>, StorageError>;

    /// Distinct node ids with a reading timestamp after `since_ms`.
    fn count_active_nodes(&self, since_ms: i64) -> Result<usize, StorageError>;
}

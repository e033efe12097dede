//! Wire envelopes exchanged with gateways and observers.
//!
//! Every frame is a JSON object carrying a `type` discriminator. Inbound
//! frames are turned into [`InboundEvent`] by the classifier; outbound frames
//! are built from [`OutboundMessage`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::ConnectionId;

/// Peer role as seen by the hub.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Unknown,
    Gateway,
    Observer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Gateway => "gateway",
            Self::Observer => "observer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sensor reading relayed by a gateway or posted over HTTP.
///
/// Every field is optional: storage keeps them as nullable columns and the
/// hub never rejects a reading for a missing measurement.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub node_id: Option<i64>,
    pub voltage: Option<f64>,
    pub message_type: Option<String>,
    pub timestamp: Option<i64>,
    pub rssi: Option<i64>,
    pub snr: Option<f64>,
    pub gateway_id: Option<String>,
}

impl SensorReading {
    /// Lenient extraction from a raw JSON object. Fields with the wrong type
    /// are treated as absent; a digit-only string `nodeId` is accepted.
    pub fn from_value(value: &Value) -> Self {
        Self {
            node_id: value.get("nodeId").and_then(lenient_i64),
            voltage: value.get("voltage").and_then(Value::as_f64),
            message_type: value
                .get("messageType")
                .and_then(Value::as_str)
                .map(str::to_owned),
            timestamp: value.get("timestamp").and_then(lenient_i64),
            rssi: value.get("rssi").and_then(lenient_i64),
            snr: value.get("snr").and_then(Value::as_f64),
            gateway_id: value
                .get("gatewayId")
                .and_then(Value::as_str)
                .map(str::to_owned),
        }
    }
}

/// 2^63, the first float magnitude past `i64::MAX`.
const I64_FLOAT_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// Integral floats within `i64` range; anything else is absent rather than
/// saturated.
fn integral_f64_to_i64(f: f64) -> Option<i64> {
    (f.fract() == 0.0 && f >= -I64_FLOAT_BOUND && f < I64_FLOAT_BOUND).then_some(f as i64)
}

/// Accepts integers, integral floats and numeric strings.
pub fn lenient_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(integral_f64_to_i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// An operator command addressed to a field node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub node_id: i64,
    pub message: String,
}

/// Classified inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundEvent {
    GatewayConnected {
        gateway_id: String,
    },
    ObserverConnected,
    SensorData {
        reading: SensorReading,
        /// The frame exactly as received; observers get this verbatim.
        raw: Value,
    },
    Heartbeat {
        gateway_id: String,
    },
    Unrecognized {
        kind: Option<String>,
    },
}

impl InboundEvent {
    pub fn kind(&self) -> &str {
        match self {
            Self::GatewayConnected { .. } => kinds::GATEWAY_CONNECTED,
            Self::ObserverConnected => kinds::OBSERVER_CONNECTED,
            Self::SensorData { .. } => kinds::SENSOR_DATA,
            Self::Heartbeat { .. } => kinds::HEARTBEAT,
            Self::Unrecognized { kind } => kind.as_deref().unwrap_or("<none>"),
        }
    }
}

/// Inbound `type` values.
pub mod kinds {
    pub const GATEWAY_CONNECTED: &str = "gateway_connected";
    pub const OBSERVER_CONNECTED: &str = "observer_connected";
    pub const SENSOR_DATA: &str = "sensor_data";
    pub const HEARTBEAT: &str = "heartbeat";
}

/// Frames sent by the hub.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    #[serde(rename = "connection_established", rename_all = "camelCase")]
    ConnectionEstablished {
        client_id: ConnectionId,
        timestamp: i64,
    },

    #[serde(rename = "gateway_ack")]
    GatewayAck { message: String, timestamp: i64 },

    #[serde(rename = "new_sensor_data")]
    NewSensorData { data: Value },

    #[serde(rename = "send_to_node", rename_all = "camelCase")]
    SendToNode {
        node_id: i64,
        message: String,
        timestamp: i64,
    },
}

impl OutboundMessage {
    pub fn connection_established(client_id: ConnectionId) -> Self {
        Self::ConnectionEstablished {
            client_id,
            timestamp: now_millis(),
        }
    }

    pub fn gateway_ack() -> Self {
        Self::GatewayAck {
            message: "Gateway connection registered".into(),
            timestamp: now_millis(),
        }
    }

    pub fn send_to_node(command: &Command) -> Self {
        Self::SendToNode {
            node_id: command.node_id,
            message: command.message.clone(),
            timestamp: now_millis(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished { .. } => "connection_established",
            Self::GatewayAck { .. } => "gateway_ack",
            Self::NewSensorData { .. } => "new_sensor_data",
            Self::SendToNode { .. } => "send_to_node",
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reading_tolerates_missing_and_mistyped_fields() {
        let reading = SensorReading::from_value(&json!({
            "nodeId": "7",
            "voltage": "high",
            "rssi": -87,
            "snr": 9.5
        }));
        assert_eq!(reading.node_id, Some(7));
        assert_eq!(reading.voltage, None);
        assert_eq!(reading.rssi, Some(-87));
        assert_eq!(reading.snr, Some(9.5));
        assert!(reading.message_type.is_none());
        assert!(reading.gateway_id.is_none());
    }

    #[test]
    fn out_of_range_node_id_is_absent() {
        let reading = SensorReading::from_value(&json!({ "nodeId": 1e30, "timestamp": 1.0e3 }));
        assert_eq!(reading.node_id, None);
        assert_eq!(reading.timestamp, Some(1000));
    }

    #[test]
    fn lenient_i64_accepts_integral_forms() {
        assert_eq!(lenient_i64(&json!(12)), Some(12));
        assert_eq!(lenient_i64(&json!(12.0)), Some(12));
        assert_eq!(lenient_i64(&json!(" 12 ")), Some(12));
        assert_eq!(lenient_i64(&json!(12.5)), None);
        assert_eq!(lenient_i64(&json!(1e30)), None);
        assert_eq!(lenient_i64(&json!(-1e30)), None);
        assert_eq!(lenient_i64(&json!(-9.223372036854775808e18)), Some(i64::MIN));
        assert_eq!(lenient_i64(&json!("x")), None);
        assert_eq!(lenient_i64(&json!(null)), None);
    }

    #[test]
    fn connection_established_wire_shape() {
        let msg = OutboundMessage::ConnectionEstablished {
            client_id: serde_json::from_value(json!("conn_1")).unwrap(),
            timestamp: 42,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            json!({"type": "connection_established", "clientId": "conn_1", "timestamp": 42})
        );
    }

    #[test]
    fn send_to_node_wire_shape() {
        let msg = OutboundMessage::SendToNode {
            node_id: 7,
            message: "reset".into(),
            timestamp: 1,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            json!({"type": "send_to_node", "nodeId": 7, "message": "reset", "timestamp": 1})
        );
    }

    #[test]
    fn new_sensor_data_carries_payload_verbatim() {
        let data = json!({"type": "sensor_data", "nodeId": 7, "extra": [1, 2]});
        let msg = OutboundMessage::NewSensorData { data: data.clone() };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "new_sensor_data");
        assert_eq!(json["data"], data);
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Gateway).unwrap(), "\"gateway\"");
        assert_eq!(Role::default(), Role::Unknown);
    }
}

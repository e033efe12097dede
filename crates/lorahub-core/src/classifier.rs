use serde_json::Value;

use crate::protocol::{kinds, InboundEvent, SensorReading};

/// Why an inbound frame was dropped before routing.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    #[error("malformed payload: {0}")]
    Parse(String),

    #[error("{kind} is missing required field `{field}`")]
    Validation {
        kind: &'static str,
        field: &'static str,
    },
}

impl ClassifyError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Parse(_) => "parse",
            Self::Validation { .. } => "validation",
        }
    }
}

/// Parse a raw text frame into an [`InboundEvent`].
///
/// Unknown `type` values are not an error: they come back as
/// [`InboundEvent::Unrecognized`] so newer peers can talk to an older hub.
pub fn classify(raw: &str) -> Result<InboundEvent, ClassifyError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| ClassifyError::Parse(e.to_string()))?;
    classify_value(value)
}

/// Classify an already-parsed payload.
pub fn classify_value(value: Value) -> Result<InboundEvent, ClassifyError> {
    let kind = value.get("type").and_then(Value::as_str).map(str::to_owned);

    match kind.as_deref() {
        Some(kinds::GATEWAY_CONNECTED) => Ok(InboundEvent::GatewayConnected {
            gateway_id: require_gateway_id(&value, kinds::GATEWAY_CONNECTED)?,
        }),
        Some(kinds::OBSERVER_CONNECTED) => Ok(InboundEvent::ObserverConnected),
        Some(kinds::SENSOR_DATA) => Ok(InboundEvent::SensorData {
            reading: SensorReading::from_value(&value),
            raw: value,
        }),
        Some(kinds::HEARTBEAT) => Ok(InboundEvent::Heartbeat {
            gateway_id: require_gateway_id(&value, kinds::HEARTBEAT)?,
        }),
        _ => Ok(InboundEvent::Unrecognized { kind }),
    }
}

fn require_gateway_id(value: &Value, kind: &'static str) -> Result<String, ClassifyError> {
    value
        .get("gateway_id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .ok_or(ClassifyError::Validation {
            kind,
            field: "gateway_id",
        })
}

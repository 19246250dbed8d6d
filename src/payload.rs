use crate::annotation::CallType;
use crate::utils::errors::{AnnotationError, Result};
use serde_json::Value;

/// Value reported when the payload lacks the requested field.
pub const MISSING_VALUE: f64 = -1.0;

/// Scalar extracted from a node payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeReading {
    /// Timestamp reported by the measurement source, 0 when absent.
    pub timestamp: u64,
    /// Watts or joules, [`MISSING_VALUE`] when absent.
    pub value: f64,
}

impl NodeReading {
    pub fn is_missing(&self) -> bool {
        self.value == MISSING_VALUE
    }
}

/// Unwrap the node object of a payload shaped like
/// `{"<host>": {"timestamp": 1700000000, "power_node_watts": 212.5, ...}}`.
///
/// The last top-level entry in document order is taken as the node object.
pub fn parse_node_reading(kind: CallType, json: &str) -> Result<NodeReading> {
    let field = kind.payload_field().ok_or_else(|| {
        AnnotationError::Payload(format!("{} payloads carry no scalar reading", kind))
    })?;

    let root: Value = serde_json::from_str(json)?;
    let hosts = root
        .as_object()
        .ok_or_else(|| AnnotationError::Payload("top level is not an object".to_string()))?;
    let (_, node) = hosts
        .iter()
        .last()
        .ok_or_else(|| AnnotationError::Payload("JSON object not found".to_string()))?;
    let node = node
        .as_object()
        .ok_or_else(|| AnnotationError::Payload("node entry is not an object".to_string()))?;

    let timestamp = node.get("timestamp").and_then(Value::as_u64).unwrap_or(0);
    let value = node
        .get(field)
        .and_then(Value::as_f64)
        .unwrap_or(MISSING_VALUE);

    Ok(NodeReading { timestamp, value })
}

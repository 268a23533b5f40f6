//! Frame encoding and parsing for the firmware protocol.
//!
//! Frames are single-line JSON objects. Outbound: `{id, method, params}`.
//! Inbound: `{id, result}` or `{id, error}` for responses, `{method, params}`
//! for unsolicited notifications. There is no sub-framing beyond the newline.

use forge_core::errors::RpcError;
use serde_json::{Value, json};

/// One parsed inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum LinkFrame {
    /// A response to an outbound call, correlated by id.
    Response {
        /// The id of the originating call.
        id: u64,
        /// Success payload or firmware-reported error.
        result: Result<Value, RpcError>,
    },
    /// An unsolicited notification.
    Notification {
        /// Firmware-side method name.
        method: String,
        /// Notification payload.
        params: Value,
    },
}

/// Encode an outbound request as one line (without the trailing newline;
/// the codec adds it).
#[must_use]
pub fn encode_request(id: u64, method: &str, params: &Value) -> String {
    json!({
        "id": id,
        "method": method,
        "params": params,
    })
    .to_string()
}

/// Parse one inbound line.
///
/// A line that is not a JSON object, or an object carrying neither a
/// correlation id nor a method name, is a protocol error; the caller drops
/// the line and counts it against the malformed-line threshold.
pub fn parse_frame(line: &str) -> Result<LinkFrame, RpcError> {
    let value: Value = serde_json::from_str(line).map_err(|e| RpcError::Protocol {
        message: format!("invalid json: {e}"),
    })?;

    let Some(obj) = value.as_object() else {
        return Err(RpcError::Protocol {
            message: "frame is not an object".into(),
        });
    };

    if let Some(id) = obj.get("id").and_then(Value::as_u64) {
        let result = if let Some(err) = obj.get("error") {
            Err(RpcError::from_firmware_wire(err))
        } else {
            Ok(obj.get("result").cloned().unwrap_or(Value::Null))
        };
        return Ok(LinkFrame::Response { id, result });
    }

    if let Some(method) = obj.get("method").and_then(Value::as_str) {
        return Ok(LinkFrame::Notification {
            method: method.to_string(),
            params: obj.get("params").cloned().unwrap_or(Value::Null),
        });
    }

    Err(RpcError::Protocol {
        message: "frame has neither id nor method".into(),
    })
}

//! Error taxonomy for the RPC surface and the firmware link.
//!
//! [`RpcError`] is the single error type that crosses a transport boundary.
//! Every variant maps to a JSON-RPC error code: the standard codes for
//! method/parameter problems, and application codes in the `-320xx` range for
//! link and session conditions. Connection-level failures (`ConnectionLost`)
//! are retried transparently by the link; request-level failures are always
//! surfaced to the caller.

use serde_json::{Value, json};
use thiserror::Error;

/// JSON-RPC 2.0 standard code: request body was not valid JSON.
pub const PARSE_ERROR: i32 = -32700;
/// JSON-RPC 2.0 standard code: method not registered.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// JSON-RPC 2.0 standard code: parameters failed validation.
pub const INVALID_PARAMS: i32 = -32602;
/// JSON-RPC 2.0 standard code: internal server error.
pub const INTERNAL_ERROR: i32 = -32603;
/// Firmware link has not completed its handshake.
pub const NOT_READY: i32 = -32002;
/// Caller lacks the required permission.
pub const FORBIDDEN: i32 = -32003;
/// Call deadline exceeded; the underlying connection is unaffected.
pub const TIMEOUT: i32 = -32004;
/// Firmware socket dropped while the call was outstanding.
pub const CONNECTION_LOST: i32 = -32005;
/// Call cancelled because its owning session closed.
pub const CANCELLED: i32 = -32006;
/// Malformed frame on a transport.
pub const PROTOCOL_ERROR: i32 = -32007;
/// Frame exceeded the configured maximum line length.
pub const MESSAGE_TOO_LARGE: i32 = -32008;
/// Session closed because its outbound queue stayed full.
pub const SLOW_CONSUMER: i32 = -32009;

/// Error returned by RPC execution, the firmware link, or session delivery.
///
/// Cloneable so a single failure (e.g. `ConnectionLost`) can be fanned out to
/// every outstanding pending call.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RpcError {
    /// Request body was not parseable JSON-RPC.
    #[error("parse error: {message}")]
    Parse {
        /// What failed to parse.
        message: String,
    },

    /// No handler registered under this name.
    #[error("method not found: {method}")]
    MethodNotFound {
        /// The requested method name.
        method: String,
    },

    /// Parameters failed the handler's declared requirements.
    #[error("invalid params: {message}")]
    InvalidParams {
        /// Which requirement failed.
        message: String,
    },

    /// Caller's permission context does not meet the method's minimum.
    #[error("forbidden: {message}")]
    Forbidden {
        /// Why access was denied.
        message: String,
    },

    /// Firmware link is not in the Ready state.
    #[error("firmware not ready")]
    NotReady,

    /// Deadline exceeded. The connection itself is unaffected.
    #[error("request timed out")]
    Timeout,

    /// The firmware socket dropped while this call was pending.
    #[error("firmware connection lost")]
    ConnectionLost,

    /// The owning session closed before the call completed.
    #[error("request cancelled")]
    Cancelled,

    /// Malformed frame. The frame is dropped; the connection is kept unless
    /// the malformed-line rate exceeds the configured threshold.
    #[error("protocol error: {message}")]
    Protocol {
        /// What was malformed.
        message: String,
    },

    /// Frame exceeded the configured maximum line length.
    #[error("message exceeds maximum length of {limit} bytes")]
    MessageTooLarge {
        /// The configured limit.
        limit: usize,
    },

    /// Session forcibly closed on outbound queue overflow.
    #[error("session closed as slow consumer")]
    SlowConsumer,

    /// Error reported by the firmware host itself, passed through verbatim.
    #[error("firmware error: {message}")]
    Firmware {
        /// Firmware-reported code.
        code: i32,
        /// Firmware-reported message.
        message: String,
    },

    /// Unexpected internal failure.
    #[error("internal error: {message}")]
    Internal {
        /// Details for the log; also surfaced to the caller.
        message: String,
    },
}

impl RpcError {
    /// The JSON-RPC error code for this variant.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Parse { .. } => PARSE_ERROR,
            Self::MethodNotFound { .. } => METHOD_NOT_FOUND,
            Self::InvalidParams { .. } => INVALID_PARAMS,
            Self::Forbidden { .. } => FORBIDDEN,
            Self::NotReady => NOT_READY,
            Self::Timeout => TIMEOUT,
            Self::ConnectionLost => CONNECTION_LOST,
            Self::Cancelled => CANCELLED,
            Self::Protocol { .. } => PROTOCOL_ERROR,
            Self::MessageTooLarge { .. } => MESSAGE_TOO_LARGE,
            Self::SlowConsumer => SLOW_CONSUMER,
            Self::Firmware { code, .. } => *code,
            Self::Internal { .. } => INTERNAL_ERROR,
        }
    }

    /// Wire representation: `{"code": ..., "message": ...}`.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        json!({
            "code": self.code(),
            "message": self.to_string(),
        })
    }

    /// Build from a firmware-side error object (`{code, message}` shape,
    /// with fallbacks for sloppy firmware).
    #[must_use]
    pub fn from_firmware_wire(value: &Value) -> Self {
        let code = value
            .get("code")
            .and_then(Value::as_i64)
            .map_or(INTERNAL_ERROR, |c| c as i32);
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| value.to_string(), String::from);
        Self::Firmware { code, message }
    }

    /// Whether this error means the call may be retried once the link is
    /// back up. Used by callers that want to distinguish transient link
    /// conditions from real request failures.
    #[must_use]
    pub fn is_link_failure(&self) -> bool {
        matches!(self, Self::ConnectionLost | Self::NotReady)
    }
}

/// Fatal startup errors from component loading.
///
/// Any of these aborts startup; the server never runs with a partially
/// initialized component set.
#[derive(Debug, Error)]
pub enum ComponentError {
    /// Two components contributed the same method name.
    #[error("duplicate method registration: {method}")]
    DuplicateMethod {
        /// The conflicting method name.
        method: String,
    },

    /// A component declared a dependency on an unknown component.
    #[error("component {component} depends on unknown component {dependency}")]
    UnknownDependency {
        /// The declaring component.
        component: String,
        /// The missing dependency.
        dependency: String,
    },

    /// The declared dependencies form a cycle.
    #[error("component dependency cycle involving: {names:?}")]
    DependencyCycle {
        /// Components left unsorted after topological ordering.
        names: Vec<String>,
    },

    /// A component's `init()` failed.
    #[error("component {component} failed to initialize: {message}")]
    InitFailed {
        /// The failing component.
        component: String,
        /// Failure detail.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_codes() {
        assert_eq!(
            RpcError::MethodNotFound {
                method: "foo.bar".into()
            }
            .code(),
            -32601
        );
        assert_eq!(
            RpcError::InvalidParams {
                message: "m".into()
            }
            .code(),
            -32602
        );
        assert_eq!(
            RpcError::Parse {
                message: "m".into()
            }
            .code(),
            -32700
        );
    }

    #[test]
    fn application_codes_are_distinct() {
        let codes = [
            RpcError::NotReady.code(),
            RpcError::Forbidden {
                message: "m".into(),
            }
            .code(),
            RpcError::Timeout.code(),
            RpcError::ConnectionLost.code(),
            RpcError::Cancelled.code(),
            RpcError::Protocol {
                message: "m".into(),
            }
            .code(),
            RpcError::MessageTooLarge { limit: 1 }.code(),
            RpcError::SlowConsumer.code(),
        ];
        let mut sorted = codes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len());
    }

    #[test]
    fn wire_shape() {
        let e = RpcError::MethodNotFound {
            method: "foo.bar".into(),
        };
        let wire = e.to_wire();
        assert_eq!(wire["code"], -32601);
        assert_eq!(wire["message"], "method not found: foo.bar");
    }

    #[test]
    fn firmware_error_passes_code_through() {
        let e = RpcError::from_firmware_wire(&json!({"code": 400, "message": "bad gcode"}));
        assert_eq!(e.code(), 400);
        assert_eq!(e.to_string(), "firmware error: bad gcode");
    }

    #[test]
    fn firmware_error_without_shape_falls_back() {
        let e = RpcError::from_firmware_wire(&json!("something broke"));
        assert_eq!(e.code(), INTERNAL_ERROR);
        let RpcError::Firmware { message, .. } = e else {
            panic!("expected firmware variant");
        };
        assert!(message.contains("something broke"));
    }

    #[test]
    fn link_failure_classification() {
        assert!(RpcError::ConnectionLost.is_link_failure());
        assert!(RpcError::NotReady.is_link_failure());
        assert!(!RpcError::Timeout.is_link_failure());
        assert!(
            !RpcError::MethodNotFound {
                method: "m".into()
            }
            .is_link_failure()
        );
    }
}

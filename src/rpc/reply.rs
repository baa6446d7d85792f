//! Uniform wire reply.
//!
//! Every call, unary or streaming, answers with a [`Reply`]: either a
//! payload or an [`ErrorEnvelope`], never both, never an exception shape.

use serde::{Deserialize, Serialize};

use crate::error::ErrorEnvelope;

/// The wire reply for one response item.
///
/// ```json
/// {"data": {"pong": true}}
/// {"error": {"code": 40004, "description": "Not Found"}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply<T> {
    /// Payload of a successful call or stream item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error envelope when the call failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorEnvelope>,
}

impl<T> Reply<T> {
    /// A successful reply carrying `data`.
    #[must_use]
    pub const fn ok(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }

    /// A failed reply carrying the error envelope.
    #[must_use]
    pub const fn error(envelope: ErrorEnvelope) -> Self {
        Self {
            data: None,
            error: Some(envelope),
        }
    }

    /// Returns `true` when this reply carries an error envelope.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn ok_reply_serializes_without_error_field() {
        let reply = Reply::ok(serde_json::json!({"pong": true}));
        let json = serde_json::to_string(&reply).unwrap_or_default();
        assert!(json.contains("\"data\""));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn error_reply_serializes_without_data_field() {
        let reply: Reply<serde_json::Value> = Reply::error(ErrorEnvelope {
            code: 50000,
            description: "Server Error".to_string(),
        });
        let json = serde_json::to_string(&reply).unwrap_or_default();
        assert!(!json.contains("\"data\""));
        assert!(json.contains("50000"));
        assert!(reply.is_error());
    }
}

//! Control channel message types (JSON over WebSocket)

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Client → server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Bind this connection to a session identity
    Register { id: String },
}

/// Server → client
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    RegisterSuccess,
    #[serde(alias = "office_operation")]
    PushOperation(PushOperation),
    #[serde(other)]
    Unknown,
}

/// A document operation pushed for one identity
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PushOperation {
    #[serde(rename = "operationKind", alias = "operation")]
    pub operation_kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(rename = "targetId", alias = "agent_id", default)]
    pub target_id: Option<String>,
}

impl OutboundMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl InboundMessage {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::Protocol(format!("Malformed control message: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_wire_shape() {
        let json = OutboundMessage::Register { id: "abc123".into() }
            .to_json()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value, json!({"type": "register", "id": "abc123"}));
    }

    #[test]
    fn test_parse_push_operation() {
        let message = InboundMessage::parse(
            r#"{"type":"push_operation","operationKind":"insert_text","data":{"text":"Hi"},"targetId":"abc123"}"#,
        )
        .unwrap();
        assert_eq!(
            message,
            InboundMessage::PushOperation(PushOperation {
                operation_kind: "insert_text".into(),
                data: json!({"text": "Hi"}),
                target_id: Some("abc123".into()),
            })
        );
    }

    #[test]
    fn test_parse_legacy_office_operation() {
        let message = InboundMessage::parse(
            r#"{"type":"office_operation","operation":"goto_bookmark","agent_id":"a1","data":{"bookmark_name":"x"},"timestamp":1}"#,
        )
        .unwrap();
        match message {
            InboundMessage::PushOperation(op) => {
                assert_eq!(op.operation_kind, "goto_bookmark");
                assert_eq!(op.target_id.as_deref(), Some("a1"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_register_success_and_unknown() {
        assert_eq!(
            InboundMessage::parse(r#"{"type":"register_success","message":"ok"}"#).unwrap(),
            InboundMessage::RegisterSuccess
        );
        assert_eq!(
            InboundMessage::parse(r#"{"type":"heartbeat"}"#).unwrap(),
            InboundMessage::Unknown
        );
    }

    #[test]
    fn test_malformed_is_protocol_error() {
        assert!(matches!(InboundMessage::parse("{"), Err(Error::Protocol(_))));
        assert!(matches!(
            InboundMessage::parse(r#"{"operationKind":"insert_text"}"#),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            InboundMessage::parse(r#"{"type":"push_operation","data":{}}"#),
            Err(Error::Protocol(_))
        ));
    }
}

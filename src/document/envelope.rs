//! Host-facing envelope of the embedded document engine
//!
//! ```json
//! {"MessageId": "Send_UNO_Command", "SendTime": 1718000000000,
//!  "Values": {"Command": ".uno:Bold", "Args": {"Bold": {"type": "boolean", "value": true}}}}
//! ```

use super::value::TaggedValue;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Outbound message kinds
pub mod kinds {
    pub const ACTION_PASTE: &str = "Action_Paste";
    pub const SEND_UNO_COMMAND: &str = "Send_UNO_Command";
    pub const CALL_PYTHON_SCRIPT: &str = "CallPythonScript";
    pub const ACTION_GOTO_BOOKMARK: &str = "Action_GotoBookmark";
}

/// Inbound message kinds the bridge reacts to
pub mod inbound {
    pub const APP_LOADING_STATUS: &str = "App_LoadingStatus";
    pub const DOC_MODIFIED_STATUS: &str = "Doc_ModifiedStatus";
    pub const VIEW_ADDED: &str = "View_Added";
    pub const SCRIPT_RESULT: &str = "CallPythonScript-Result";
    pub const ERROR: &str = "Error";

    pub const DOCUMENT_LOADED: &str = "Document_Loaded";
}

/// One engine envelope, inbound or outbound
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Envelope {
    pub message_id: String,
    #[serde(default)]
    pub send_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(default)]
    pub values: Value,
}

impl Envelope {
    /// Build an envelope stamped with the current time
    pub fn new(message_id: impl Into<String>, values: Value) -> Self {
        Self {
            message_id: message_id.into(),
            send_time: chrono::Utc::now().timestamp_millis(),
            script_file: None,
            function: None,
            values,
        }
    }

    /// Paste plain text at the cursor
    pub fn paste_text(text: &str) -> Self {
        Self::new(
            kinds::ACTION_PASTE,
            serde_json::json!({
                "Mimetype": "text/plain;charset=utf-8",
                "Data": text,
            }),
        )
    }

    /// Execute a UNO command with tagged arguments
    pub fn uno_command(command: &str, args: Vec<(&str, TaggedValue)>) -> Result<Self> {
        let mut tagged = Map::new();
        for (name, value) in args {
            tagged.insert(name.to_string(), serde_json::to_value(value)?);
        }
        Ok(Self::new(
            kinds::SEND_UNO_COMMAND,
            serde_json::json!({
                "Command": command,
                "Args": tagged,
            }),
        ))
    }

    /// Invoke a function of a script shipped with the engine
    pub fn call_script(script_file: &str, function: &str, tagged_args: Map<String, Value>) -> Self {
        let mut envelope = Self::new(kinds::CALL_PYTHON_SCRIPT, Value::Object(tagged_args));
        envelope.script_file = Some(script_file.to_string());
        envelope.function = Some(function.to_string());
        envelope
    }

    /// Move the cursor to a named bookmark
    pub fn goto_bookmark(name: &str) -> Self {
        Self::new(
            kinds::ACTION_GOTO_BOOKMARK,
            serde_json::json!({ "Bookmark": name }),
        )
    }

    /// Parse an inbound envelope
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::Protocol(format!("Malformed engine envelope: {}", e)))
    }

    /// String field of `Values`, if present
    pub fn value_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// UNO command name, for `Send_UNO_Command` envelopes
    pub fn uno_command_name(&self) -> Option<&str> {
        self.value_str("Command")
    }
}

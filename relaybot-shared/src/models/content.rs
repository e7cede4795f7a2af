use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::event::{CHAT_MSGTYPE, RelatesTo};

/// Body text shown to users when a turn fails.
pub const ERROR_BODY: &str = "There was an error processing your request, please try again later.";

/// A streamed tool call as reported by the model.
///
/// `arguments` is raw JSON text that may be incomplete while the call is
/// still streaming.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

impl ToolCall {
    pub fn new<I: Into<String>, N: Into<String>, A: Into<String>>(
        id: I,
        name: N,
        arguments: A,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// A call with neither id nor name carries nothing worth publishing.
    pub fn is_empty(&self) -> bool {
        self.id.is_empty() && self.name.is_empty()
    }
}

/// A command the bot asks the client to run, with parsed arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl CommandRequest {
    /// Argument text that does not parse yet (mid-stream) becomes `{}`.
    pub fn from_tool_call(call: &ToolCall) -> Self {
        let arguments = serde_json::from_str::<Value>(&call.arguments)
            .unwrap_or_else(|_| Value::Object(Map::new()));
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments,
        }
    }

    /// Wire form with the arguments re-encoded as a JSON string.
    pub fn encode(&self) -> EncodedCommandRequest {
        EncodedCommandRequest {
            id: self.id.clone(),
            name: self.name.clone(),
            arguments: self.arguments.to_string(),
        }
    }
}

/// Wire form of a [`CommandRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedCommandRequest {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Content of an event the bot publishes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    pub body: String,
    pub msgtype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    pub is_streaming_finished: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_canceled: Option<bool>,
    #[serde(
        rename = "app.relaybot.reasoning",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub reasoning: Option<String>,
    #[serde(
        rename = "app.relaybot.command_requests",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub command_requests: Vec<EncodedCommandRequest>,
    #[serde(
        rename = "app.relaybot.continuation_of",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub continuation_of: Option<String>,
    #[serde(
        rename = "app.relaybot.has_continuation",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub has_continuation: Option<bool>,
    /// JSON-encoded string, like every `data` field on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(
        rename = "m.relates_to",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub relates_to: Option<RelatesTo>,
}

impl MessageContent {
    /// A bot reply message with the given body.
    pub fn reply<T: Into<String>>(body: T) -> Self {
        Self {
            body: body.into(),
            msgtype: CHAT_MSGTYPE.to_string(),
            format: Some("org.matrix.custom.html".to_string()),
            ..Self::default()
        }
    }

    /// Attaches the agent context as encoded `data`.
    #[must_use]
    pub fn with_agent(mut self, agent_id: &str) -> Self {
        let data = serde_json::json!({ "context": { "agentId": agent_id } });
        self.data = Some(data.to_string());
        self
    }

    /// Id of the event this content replaces, if it is an edit.
    pub fn edits_event_id(&self) -> Option<&str> {
        self.relates_to
            .as_ref()
            .map(|relation| relation.event_id.as_str())
    }
}

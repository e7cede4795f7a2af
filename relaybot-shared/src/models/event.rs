use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event type carrying chat messages, including bot replies and card fragments.
pub const MESSAGE_EVENT_TYPE: &str = "m.room.message";
/// Event type carrying the result of a command the bot requested.
pub const COMMAND_RESULT_EVENT_TYPE: &str = "app.relaybot.command_result";
/// Relation type marking an event as a replacement of an earlier one.
pub const REPLACE_REL_TYPE: &str = "m.replace";

/// Message kind used for regular chat and bot reply messages.
pub const CHAT_MSGTYPE: &str = "app.relaybot.message";
/// Message kind used for one piece of a fragmented card document.
pub const CARD_FRAGMENT_MSGTYPE: &str = "app.relaybot.card_fragment";
/// Message kind used for command results that ship an attached card file.
pub const COMMAND_RESULT_WITH_OUTPUT_MSGTYPE: &str = "app.relaybot.command_result.with_output";

/// Coarse classification of protocol events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    Message,
    CommandResult,
    Other(String),
}

impl From<String> for EventType {
    fn from(value: String) -> Self {
        match value.as_str() {
            MESSAGE_EVENT_TYPE => Self::Message,
            COMMAND_RESULT_EVENT_TYPE => Self::CommandResult,
            _ => Self::Other(value),
        }
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        match value {
            EventType::Message => MESSAGE_EVENT_TYPE.to_string(),
            EventType::CommandResult => COMMAND_RESULT_EVENT_TYPE.to_string(),
            EventType::Other(other) => other,
        }
    }
}

/// Relation block attached to an event's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatesTo {
    pub rel_type: String,
    pub event_id: String,
}

impl RelatesTo {
    /// Relation declaring the carrying event a replacement of `event_id`.
    pub fn replace<T: Into<String>>(event_id: T) -> Self {
        Self {
            rel_type: REPLACE_REL_TYPE.to_string(),
            event_id: event_id.into(),
        }
    }
}

/// Payload of a chat event.
///
/// `data` arrives as a JSON-encoded string and must be decoded with
/// [`EventContent::decode_data`] before use. Keys this model does not know
/// about are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventContent {
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msgtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(
        rename = "m.relates_to",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub relates_to: Option<RelatesTo>,
    #[serde(
        rename = "app.relaybot.reasoning",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub reasoning: Option<String>,
    #[serde(
        rename = "app.relaybot.command_requests",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub command_requests: Option<Vec<Value>>,
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
    #[serde(
        rename = "isStreamingFinished",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub is_streaming_finished: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EventContent {
    /// Decodes a string-encoded `data` field in place.
    ///
    /// Already decoded values are left untouched, so calling this twice is harmless.
    ///
    /// # Errors
    /// Returns the parse error when the encoded string is not valid JSON.
    pub fn decode_data(&mut self) -> Result<(), serde_json::Error> {
        if let Some(Value::String(encoded)) = &self.data {
            let decoded = serde_json::from_str(encoded)?;
            self.data = Some(decoded);
        }
        Ok(())
    }
}

/// Server-side aggregated relations delivered with an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Unsigned {
    #[serde(
        rename = "m.relations",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub relations: Option<AggregatedRelations>,
}

/// Aggregations the server computed for an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRelations {
    /// Newest replacement the server knows about.
    #[serde(rename = "m.replace", default, skip_serializing_if = "Option::is_none")]
    pub replace: Option<Box<ChatEvent>>,
}

/// A single record of the room's append-only event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    pub event_id: String,
    pub room_id: String,
    pub sender: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Milliseconds since the epoch, monotonic per room but not unique.
    pub origin_server_ts: u64,
    #[serde(default)]
    pub content: EventContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsigned: Option<Unsigned>,
}

impl ChatEvent {
    /// Id of the event this one replaces, if it is an edit.
    pub fn replaces(&self) -> Option<&str> {
        self.content
            .relates_to
            .as_ref()
            .filter(|relation| relation.rel_type == REPLACE_REL_TYPE)
            .map(|relation| relation.event_id.as_str())
    }

    /// Newest replacement aggregated by the server, if any.
    pub fn aggregated_replacement(&self) -> Option<&ChatEvent> {
        self.unsigned
            .as_ref()
            .and_then(|unsigned| unsigned.relations.as_ref())
            .and_then(|relations| relations.replace.as_deref())
    }

    pub fn msgtype(&self) -> Option<&str> {
        self.content.msgtype.as_deref()
    }

    /// Whether the event is one piece of a fragmented card document.
    pub fn is_card_fragment(&self) -> bool {
        self.event_type == EventType::Message && self.msgtype() == Some(CARD_FRAGMENT_MSGTYPE)
    }

    /// Whether the event takes part in conversation history at all.
    pub fn is_timeline_candidate(&self) -> bool {
        matches!(
            self.event_type,
            EventType::Message | EventType::CommandResult
        )
    }
}

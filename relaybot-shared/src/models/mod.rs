//! # Event Model
//!
//! Logical view of the chat protocol's event log and of the content the bot
//! publishes back into it.

pub mod attachments;
pub mod content;
pub mod event;

pub use attachments::{CardFragment, SerializedFile};
pub use content::{
    CommandRequest, ERROR_BODY, EncodedCommandRequest, MessageContent, ToolCall,
};
pub use event::{
    AggregatedRelations, CARD_FRAGMENT_MSGTYPE, CHAT_MSGTYPE, COMMAND_RESULT_EVENT_TYPE,
    COMMAND_RESULT_WITH_OUTPUT_MSGTYPE, ChatEvent, EventContent, EventType, MESSAGE_EVENT_TYPE,
    REPLACE_REL_TYPE, RelatesTo, Unsigned,
};

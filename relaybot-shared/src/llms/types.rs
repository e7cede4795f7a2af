//! # LLM Types
//!
//! Shapes of the incremental output a model produces for one turn.

use std::pin::Pin;

use futures_util::Stream;
use serde::{Deserialize, Serialize};

use crate::llms::errors::LLMResult;
use crate::models::ToolCall;

/// Type alias for the streamed model output of one turn
pub type ResponseDeltaStream = Pin<Box<dyn Stream<Item = LLMResult<ResponseDelta>> + Send + 'static>>;

/// One increment of model output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseDelta {
    /// Reasoning text added since the previous delta
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,

    /// Complete answer text so far
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Complete list of tool calls so far
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// Whether the model finished the turn
    #[serde(default)]
    pub finished: bool,
}

impl ResponseDelta {
    /// Delta carrying only reasoning text
    pub fn reasoning<T: Into<String>>(text: T) -> Self {
        Self {
            reasoning: Some(text.into()),
            ..Self::default()
        }
    }

    /// Delta carrying an answer snapshot
    pub fn content<T: Into<String>>(snapshot: T) -> Self {
        Self {
            content: Some(snapshot.into()),
            ..Self::default()
        }
    }

    /// Delta carrying a tool call snapshot
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(calls),
            ..Self::default()
        }
    }

    /// Marks the delta as the last one of the turn
    #[must_use]
    pub fn finish(mut self) -> Self {
        self.finished = true;
        self
    }
}

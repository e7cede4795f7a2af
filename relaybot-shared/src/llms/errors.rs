//! # LLM Error Types
//!
//! Errors a delta source can yield while a turn is streaming.

use thiserror::Error;

/// Result type alias for LLM operations
pub type LLMResult<T> = Result<T, LLMError>;

/// Error type for the streamed model output
#[derive(Error, Debug)]
pub enum LLMError {
    /// Text generation failed
    #[error("Text generation failed: {reason}")]
    GenerationFailed { reason: String },

    /// Operation timeout
    #[error("Operation timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// The caller stopped the generation
    #[error("Generation was cancelled")]
    Cancelled,

    /// Input validation error
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Internal library error
    #[error("Internal error: {source}")]
    InternalError {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl LLMError {
    /// Create a new generation failed error
    pub fn generation_failed<T: Into<String>>(reason: T) -> Self {
        Self::GenerationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new invalid input error
    pub fn invalid_input<T: Into<String>>(message: T) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Wrap an external error as an internal error
    pub fn internal<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::InternalError {
            source: Box::new(error),
        }
    }
}

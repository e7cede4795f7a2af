use shared::llms::LLMError;
use thiserror::Error;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Failure reported by the chat transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport request failed: {message}")]
    Request { message: String },

    #[error("transport rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("transport unavailable")]
    Unavailable,
}

impl TransportError {
    pub fn request<T: Into<String>>(message: T) -> Self {
        Self::Request {
            message: message.into(),
        }
    }

    pub fn rejected<T: Into<String>>(status: u16, message: T) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// An event's encoded `data` could not be decoded.
    #[error("malformed payload in event {event_id}: {source}")]
    MalformedPayload {
        event_id: String,
        #[source]
        source: serde_json::Error,
    },

    /// A fragment chain is missing links or has the wrong number of parts.
    #[error("fragment chain starting at {root_event_id} is broken: {reason}")]
    FragmentIntegrity {
        root_event_id: String,
        reason: String,
    },

    #[error("failed to fetch attachment {url}: {source}")]
    AttachmentFetch {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("unsupported file type {content_type} for {url}, only text files are supported")]
    UnsupportedAttachmentType { url: String, content_type: String },

    #[error("failed to publish event: {0}")]
    PublishTransport(#[source] TransportError),

    #[error("model output failed: {0}")]
    Generation(#[from] LLMError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl EngineError {
    pub fn malformed_payload<T: Into<String>>(event_id: T, source: serde_json::Error) -> Self {
        Self::MalformedPayload {
            event_id: event_id.into(),
            source,
        }
    }

    pub fn fragment_integrity<T: Into<String>, U: Into<String>>(root_event_id: T, reason: U) -> Self {
        Self::FragmentIntegrity {
            root_event_id: root_event_id.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error corrupts the logical record and must end the turn.
    ///
    /// Attachment and publish failures only degrade one item and are
    /// reported inline instead.
    pub fn is_fatal_to_turn(&self) -> bool {
        matches!(
            self,
            Self::MalformedPayload { .. }
                | Self::FragmentIntegrity { .. }
                | Self::Generation(_)
                | Self::Transport(_)
        )
    }
}

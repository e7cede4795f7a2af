use async_trait::async_trait;
use shared::models::{
    ChatEvent, EventContent, EventType, MessageContent, RelatesTo, SerializedFile,
};
use std::{collections::HashMap, time::Duration};
use tokio::sync::Mutex;
use tracing::trace;
use uuid::Uuid;

use crate::errors::TransportError;

/// Capabilities the engine needs from the chat backend.
///
/// Timeouts and retries of individual requests belong to the implementation.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Sends a new event and returns its id.
    async fn send_new_event(
        &self,
        room_id: &str,
        content: MessageContent,
    ) -> Result<String, TransportError>;

    /// Sends an event replacing `target_event_id` and returns the new event's id.
    async fn send_replacement(
        &self,
        room_id: &str,
        content: MessageContent,
        target_event_id: &str,
    ) -> Result<String, TransportError>;

    /// Returns the room's events after `cursor_event_id`, or all of them.
    async fn fetch_events_since(
        &self,
        room_id: &str,
        cursor_event_id: Option<&str>,
    ) -> Result<Vec<ChatEvent>, TransportError>;

    /// Downloads the text content of an attached file.
    async fn download_attachment(&self, file: &SerializedFile) -> Result<String, TransportError>;
}

/// An event the bot sent through a [`MemoryTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentEvent {
    pub event_id: String,
    pub room_id: String,
    pub content: MessageContent,
    pub replaces: Option<String>,
}

#[derive(Debug, Default)]
struct MemoryState {
    log: Vec<ChatEvent>,
    sent: Vec<SentEvent>,
    files: HashMap<String, String>,
    downloads: HashMap<String, usize>,
    failing_sends: usize,
    clock: u64,
}

/// In-process transport holding every room's log in memory.
///
/// Sent events are appended to the log, so history built after a turn sees
/// the bot's own replies.
#[derive(Debug)]
pub struct MemoryTransport {
    sender: String,
    send_delay: Option<Duration>,
    state: Mutex<MemoryState>,
}

impl MemoryTransport {
    pub fn new<T: Into<String>>(sender: T) -> Self {
        Self {
            sender: sender.into(),
            send_delay: None,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Delays every send, simulating network latency.
    #[must_use]
    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = Some(delay);
        self
    }

    /// Appends an event written by someone else.
    pub async fn push_event(&self, event: ChatEvent) {
        let mut state = self.state.lock().await;
        state.clock = state.clock.max(event.origin_server_ts);
        state.log.push(event);
    }

    pub async fn add_file<U: Into<String>, C: Into<String>>(&self, url: U, content: C) {
        self.state
            .lock()
            .await
            .files
            .insert(url.into(), content.into());
    }

    /// Makes the next `count` sends fail with [`TransportError::Unavailable`].
    pub async fn fail_next_sends(&self, count: usize) {
        self.state.lock().await.failing_sends = count;
    }

    pub async fn sent_events(&self) -> Vec<SentEvent> {
        self.state.lock().await.sent.clone()
    }

    pub async fn download_count(&self, url: &str) -> usize {
        self.state
            .lock()
            .await
            .downloads
            .get(url)
            .copied()
            .unwrap_or_default()
    }

    async fn record(
        &self,
        room_id: &str,
        mut content: MessageContent,
        replaces: Option<&str>,
    ) -> Result<String, TransportError> {
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(TransportError::Unavailable);
        }

        if let Some(target) = replaces {
            content
                .relates_to
                .get_or_insert_with(|| RelatesTo::replace(target));
        }

        let logged: EventContent = serde_json::to_value(&content)
            .and_then(serde_json::from_value)
            .map_err(|err| TransportError::request(err.to_string()))?;

        state.clock += 1;
        let event_id = format!("${}", Uuid::new_v4());
        let event = ChatEvent {
            event_id: event_id.clone(),
            room_id: room_id.to_string(),
            sender: self.sender.clone(),
            event_type: EventType::Message,
            origin_server_ts: state.clock,
            content: logged,
            unsigned: None,
        };
        state.log.push(event);
        state.sent.push(SentEvent {
            event_id: event_id.clone(),
            room_id: room_id.to_string(),
            content,
            replaces: replaces.map(str::to_string),
        });

        trace!(room_id, event_id = %event_id, "recorded event");
        Ok(event_id)
    }
}

#[async_trait]
impl ChatTransport for MemoryTransport {
    async fn send_new_event(
        &self,
        room_id: &str,
        content: MessageContent,
    ) -> Result<String, TransportError> {
        self.record(room_id, content, None).await
    }

    async fn send_replacement(
        &self,
        room_id: &str,
        content: MessageContent,
        target_event_id: &str,
    ) -> Result<String, TransportError> {
        self.record(room_id, content, Some(target_event_id)).await
    }

    async fn fetch_events_since(
        &self,
        room_id: &str,
        cursor_event_id: Option<&str>,
    ) -> Result<Vec<ChatEvent>, TransportError> {
        let state = self.state.lock().await;
        let room: Vec<&ChatEvent> = state
            .log
            .iter()
            .filter(|event| event.room_id == room_id)
            .collect();

        let start = cursor_event_id
            .and_then(|cursor| room.iter().position(|event| event.event_id == cursor))
            .map_or(0, |position| position + 1);

        Ok(room[start..].iter().map(|event| (*event).clone()).collect())
    }

    async fn download_attachment(&self, file: &SerializedFile) -> Result<String, TransportError> {
        let mut state = self.state.lock().await;
        *state.downloads.entry(file.url.clone()).or_default() += 1;
        state
            .files
            .get(&file.url)
            .cloned()
            .ok_or_else(|| TransportError::rejected(404, format!("no file at {}", file.url)))
    }
}

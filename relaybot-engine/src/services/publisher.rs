use std::{fmt::Display, sync::Arc};

use metrics::counter;
use shared::{
    config::PublisherConfig,
    models::{CommandRequest, ERROR_BODY, MessageContent, RelatesTo},
};
use tokio::sync::Mutex;
use tracing::{debug, error, instrument};

use crate::{
    errors::{EngineError, EngineResult},
    services::{accumulator::ResponseState, publish_cursor::PublishCursor},
    transport::ChatTransport,
};

/// Publishes a turn's [`ResponseState`] as a chain of size-bounded events.
///
/// The cursor list sits behind a FIFO mutex held across each send, so calls
/// run one at a time in the order they were made.
pub struct ChunkedEventPublisher {
    transport: Arc<dyn ChatTransport>,
    room_id: String,
    agent_id: String,
    event_size_max: usize,
    thinking_message: String,
    cursors: Mutex<Vec<PublishCursor>>,
}

impl ChunkedEventPublisher {
    pub fn new<R: Into<String>, A: Into<String>>(
        transport: Arc<dyn ChatTransport>,
        room_id: R,
        agent_id: A,
        config: &PublisherConfig,
    ) -> Self {
        Self {
            transport,
            room_id: room_id.into(),
            agent_id: agent_id.into(),
            event_size_max: config.event_size_max.max(1),
            thinking_message: config.thinking_message.clone(),
            cursors: Mutex::new(Vec::new()),
        }
    }

    /// Sends the provisional "thinking" event once and returns its id.
    ///
    /// # Errors
    /// Returns [`EngineError::PublishTransport`] if the send fails.
    pub async fn ensure_opening_event_sent(&self) -> EngineResult<String> {
        let mut cursors = self.cursors.lock().await;
        if let Some(event_id) = cursors.first().and_then(|cursor| cursor.event_id.clone()) {
            return Ok(event_id);
        }

        let mut content = self.message("", "", false);
        content.reasoning = Some(self.thinking_message.clone());
        let event_id = self.send(None, content).await?;

        match cursors.first_mut() {
            Some(first) => first.event_id = Some(event_id.clone()),
            None => cursors.push(PublishCursor::with_event_id(event_id.clone())),
        }
        Ok(event_id)
    }

    /// Sends or edits events until `state` is fully represented.
    ///
    /// # Errors
    /// Returns [`EngineError::PublishTransport`] on the first failed send.
    /// Cursors only advance past sends that succeeded.
    #[instrument(name = "relaybot.publish", skip_all, fields(room_id = %self.room_id), err)]
    pub async fn publish(&self, state: &ResponseState) -> EngineResult<()> {
        let mut cursors = self.cursors.lock().await;
        if cursors.is_empty() {
            cursors.push(PublishCursor::default());
        }

        loop {
            let index = cursors.len() - 1;
            if !cursors[index].would_exceed(state, self.event_size_max) {
                break;
            }

            let (reasoning, content) = cursors[index].carve(state, self.event_size_max);
            let mut message = self.message(reasoning, content, true);
            message.has_continuation = Some(true);
            message.continuation_of = previous_event_id(&cursors, index);

            let event_id = self
                .send(cursors[index].event_id.as_deref(), message)
                .await?;
            counter!("relaybot_publisher_continuations_total").increment(1);
            debug!(
                event_id = %event_id,
                reasoning_bytes = reasoning.len(),
                content_bytes = content.len(),
                "sent continued chunk"
            );

            let cursor = &mut cursors[index];
            cursor.mark_sent(reasoning.len(), content.len());
            cursor.needs_continuation = true;
            cursor.event_id.get_or_insert(event_id);
            let next = cursor.next_cursor();
            cursors.push(next);
        }

        let index = cursors.len() - 1;
        let (reasoning, content) = cursors[index].remainder(state);
        let mut message = self.message(reasoning, content, state.is_finished);
        message.is_canceled = state.is_canceled.then_some(true);
        message.command_requests = state
            .tool_calls
            .iter()
            .map(|call| CommandRequest::from_tool_call(call).encode())
            .collect();
        message.continuation_of = if cursors[index].needs_continuation {
            cursors[index].event_id.clone()
        } else {
            previous_event_id(&cursors, index)
        };

        let event_id = self
            .send(cursors[index].event_id.as_deref(), message)
            .await?;
        let cursor = &mut cursors[index];
        cursor.mark_sent(reasoning.len(), content.len());
        cursor.event_id.get_or_insert(event_id);

        Ok(())
    }

    /// Replaces the reply's first event with a user-facing error message.
    ///
    /// Failures to deliver the error are logged and otherwise ignored.
    pub async fn send_error(&self, failure: &(dyn Display + Sync)) {
        let cursors = self.cursors.lock().await;
        let target = cursors.first().and_then(|cursor| cursor.event_id.clone());

        let mut content = self.message("", ERROR_BODY, true);
        content.reasoning = None;
        content.error_message = Some(failure.to_string());

        if let Err(err) = self.send(target.as_deref(), content).await {
            error!(
                room_id = %self.room_id,
                error = %err,
                "failed to send error message"
            );
        }
    }

    /// Id of the reply's first event, the target of error messages.
    pub async fn original_event_id(&self) -> Option<String> {
        self.cursors
            .lock()
            .await
            .first()
            .and_then(|cursor| cursor.event_id.clone())
    }

    pub async fn cursors(&self) -> Vec<PublishCursor> {
        self.cursors.lock().await.clone()
    }

    fn message(&self, reasoning: &str, body: &str, finished: bool) -> MessageContent {
        let mut content = MessageContent::reply(body).with_agent(&self.agent_id);
        content.reasoning = Some(reasoning.to_string());
        content.is_streaming_finished = finished;
        content
    }

    async fn send(&self, target: Option<&str>, mut content: MessageContent) -> EngineResult<String> {
        let result = match target {
            Some(target) => {
                content.relates_to = Some(RelatesTo::replace(target));
                counter!("relaybot_publisher_events_total", "kind" => "replacement").increment(1);
                self.transport
                    .send_replacement(&self.room_id, content, target)
                    .await
                    .map(|_| target.to_string())
            }
            None => {
                counter!("relaybot_publisher_events_total", "kind" => "new").increment(1);
                self.transport.send_new_event(&self.room_id, content).await
            }
        };

        result.map_err(|err| {
            counter!("relaybot_publisher_failures_total").increment(1);
            EngineError::PublishTransport(err)
        })
    }
}

fn previous_event_id(cursors: &[PublishCursor], index: usize) -> Option<String> {
    index
        .checked_sub(1)
        .and_then(|previous| cursors[previous].event_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use shared::{llms::LLMError, models::ToolCall};
    use std::time::Duration;

    fn publisher(transport: &Arc<MemoryTransport>, event_size_max: usize) -> ChunkedEventPublisher {
        let config = PublisherConfig {
            event_size_max,
            ..PublisherConfig::default()
        };
        ChunkedEventPublisher::new(transport.clone(), "!room", "agent-1", &config)
    }

    fn finished(mut state: ResponseState) -> ResponseState {
        state.is_finished = true;
        state
    }

    #[tokio::test]
    async fn opening_event_is_sent_once() {
        let transport = Arc::new(MemoryTransport::new("@aibot:localhost"));
        let publisher = publisher(&transport, 1024);

        let first = publisher.ensure_opening_event_sent().await.unwrap();
        let second = publisher.ensure_opening_event_sent().await.unwrap();

        assert_eq!(first, second);
        let sent = transport.sent_events().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content.body, "");
        assert_eq!(sent[0].content.reasoning.as_deref(), Some("Thinking..."));
        assert!(!sent[0].content.is_streaming_finished);
        assert_eq!(publisher.original_event_id().await, Some(first));
    }

    #[tokio::test]
    async fn small_reply_edits_opening_event() {
        let transport = Arc::new(MemoryTransport::new("@aibot:localhost"));
        let publisher = publisher(&transport, 1024);
        let opening = publisher.ensure_opening_event_sent().await.unwrap();

        publisher
            .publish(&ResponseState::new("", "Hello"))
            .await
            .unwrap();

        let sent = transport.sent_events().await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].replaces.as_deref(), Some(opening.as_str()));
        assert_eq!(sent[1].content.body, "Hello");
        assert_eq!(sent[1].content.reasoning.as_deref(), Some(""));
        assert_eq!(sent[1].content.continuation_of, None);
        assert_eq!(sent[1].content.has_continuation, None);
        assert!(!sent[1].content.is_streaming_finished);
    }

    #[tokio::test]
    async fn oversized_reply_is_split_into_a_linked_chain() {
        let transport = Arc::new(MemoryTransport::new("@aibot:localhost"));
        let publisher = publisher(&transport, 1024);
        let opening = publisher.ensure_opening_event_sent().await.unwrap();

        publisher
            .publish(&ResponseState::new("", "a".repeat(512)))
            .await
            .unwrap();
        let full = format!("{}{}{}", "a".repeat(512), "b".repeat(1024), "c".repeat(1024));
        publisher
            .publish(&finished(ResponseState::new("", full)))
            .await
            .unwrap();

        let sent = transport.sent_events().await;
        assert_eq!(sent.len(), 5);

        let first_chunk = &sent[2].content;
        assert_eq!(sent[2].replaces.as_deref(), Some(opening.as_str()));
        assert_eq!(first_chunk.body, format!("{}{}", "a".repeat(512), "b".repeat(512)));
        assert_eq!(first_chunk.has_continuation, Some(true));
        assert!(first_chunk.is_streaming_finished);
        assert_eq!(first_chunk.continuation_of, None);

        let second_chunk = &sent[3].content;
        assert_eq!(sent[3].replaces, None);
        assert_eq!(second_chunk.body, format!("{}{}", "b".repeat(512), "c".repeat(512)));
        assert_eq!(second_chunk.has_continuation, Some(true));
        assert_eq!(second_chunk.continuation_of.as_deref(), Some(opening.as_str()));

        let last_chunk = &sent[4].content;
        assert_eq!(sent[4].replaces, None);
        assert_eq!(last_chunk.body, "c".repeat(512));
        assert_eq!(last_chunk.has_continuation, None);
        assert!(last_chunk.is_streaming_finished);
        assert_eq!(last_chunk.continuation_of.as_deref(), Some(sent[3].event_id.as_str()));
    }

    #[tokio::test]
    async fn later_publish_edits_tail_of_chain() {
        let transport = Arc::new(MemoryTransport::new("@aibot:localhost"));
        let publisher = publisher(&transport, 2560);
        let opening = publisher.ensure_opening_event_sent().await.unwrap();

        let first = format!("{}{}", "a".repeat(1024), "b".repeat(2048));
        publisher
            .publish(&ResponseState::new("", first.clone()))
            .await
            .unwrap();
        publisher
            .publish(&finished(ResponseState::new("", format!("{first}ccccc"))))
            .await
            .unwrap();

        let sent = transport.sent_events().await;
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[2].content.body, "b".repeat(512));
        assert_eq!(sent[2].content.continuation_of.as_deref(), Some(opening.as_str()));
        assert_eq!(sent[3].replaces.as_deref(), Some(sent[2].event_id.as_str()));
        assert_eq!(sent[3].content.body, format!("{}ccccc", "b".repeat(512)));
        assert_eq!(sent[3].content.continuation_of.as_deref(), Some(opening.as_str()));
        assert!(sent[3].content.is_streaming_finished);
    }

    #[tokio::test]
    async fn reasoning_is_sent_before_content() {
        let transport = Arc::new(MemoryTransport::new("@aibot:localhost"));
        let publisher = publisher(&transport, 1536);
        publisher.ensure_opening_event_sent().await.unwrap();

        publisher
            .publish(&ResponseState::new("a".repeat(1024), "b".repeat(2048)))
            .await
            .unwrap();

        let sent = transport.sent_events().await;
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[1].content.reasoning, Some("a".repeat(1024)));
        assert_eq!(sent[1].content.body, "b".repeat(512));
        assert_eq!(sent[2].content.reasoning.as_deref(), Some(""));
        assert_eq!(sent[2].content.body, "b".repeat(1536));
    }

    #[tokio::test]
    async fn chunks_respect_ceiling_and_reassemble_exactly() {
        let transport = Arc::new(MemoryTransport::new("@aibot:localhost"));
        let publisher = publisher(&transport, 100);
        publisher.ensure_opening_event_sent().await.unwrap();
        let reasoning: String = (0..130).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let answer: String = (0..170).map(|i| char::from(b'A' + (i % 26) as u8)).collect();

        publisher
            .publish(&finished(ResponseState::new(reasoning.clone(), answer.clone())))
            .await
            .unwrap();

        let chunks: Vec<_> = transport.sent_events().await.into_iter().skip(1).collect();
        assert_eq!(chunks.len(), 3);
        for (position, chunk) in chunks.iter().enumerate() {
            let content = &chunk.content;
            let size = content.body.len() + content.reasoning.as_deref().unwrap_or_default().len();
            assert!(size <= 100);
            let expect_continuation = position + 1 < chunks.len();
            assert_eq!(content.has_continuation == Some(true), expect_continuation);
        }
        let joined_reasoning: String = chunks
            .iter()
            .map(|c| c.content.reasoning.clone().unwrap_or_default())
            .collect();
        let joined_body: String = chunks.iter().map(|c| c.content.body.clone()).collect();
        assert_eq!(joined_reasoning, reasoning);
        assert_eq!(joined_body, answer);
    }

    #[tokio::test]
    async fn tool_calls_ride_on_final_event_only() {
        let transport = Arc::new(MemoryTransport::new("@aibot:localhost"));
        let publisher = publisher(&transport, 10);
        publisher.ensure_opening_event_sent().await.unwrap();
        let mut state = ResponseState::new("", "x".repeat(15));
        state.tool_calls = vec![ToolCall::new("call_1", "search", r#"{"q":"rust"}"#)];

        publisher.publish(&state).await.unwrap();

        let sent = transport.sent_events().await;
        assert!(sent[1].content.command_requests.is_empty());
        assert_eq!(sent[2].content.command_requests.len(), 1);
        assert_eq!(sent[2].content.command_requests[0].arguments, r#"{"q":"rust"}"#);
    }

    #[tokio::test]
    async fn canceled_state_is_flagged() {
        let transport = Arc::new(MemoryTransport::new("@aibot:localhost"));
        let publisher = publisher(&transport, 1024);
        let mut state = finished(ResponseState::new("", "partial"));
        state.is_canceled = true;

        publisher.publish(&state).await.unwrap();

        let sent = transport.sent_events().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content.is_canceled, Some(true));
        assert!(sent[0].content.is_streaming_finished);
    }

    #[tokio::test]
    async fn concurrent_publishes_are_sent_in_call_order() {
        let transport = Arc::new(
            MemoryTransport::new("@aibot:localhost").with_send_delay(Duration::from_millis(5)),
        );
        let publisher = publisher(&transport, 1024);
        publisher.ensure_opening_event_sent().await.unwrap();
        let first = ResponseState::new("", "one");
        let second = ResponseState::new("", "one two");

        let (a, b) = tokio::join!(publisher.publish(&first), publisher.publish(&second));
        a.unwrap();
        b.unwrap();

        let bodies: Vec<_> = transport
            .sent_events()
            .await
            .into_iter()
            .map(|event| event.content.body)
            .collect();
        assert_eq!(bodies, vec!["", "one", "one two"]);
    }

    #[tokio::test]
    async fn failed_publish_leaves_cursors_untouched() {
        let transport = Arc::new(MemoryTransport::new("@aibot:localhost"));
        let publisher = publisher(&transport, 1024);
        publisher.ensure_opening_event_sent().await.unwrap();
        let before = publisher.cursors().await;
        transport.fail_next_sends(1).await;

        let err = publisher
            .publish(&ResponseState::new("", "hello"))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::PublishTransport(_)));
        assert_eq!(publisher.cursors().await, before);
        publisher
            .publish(&ResponseState::new("", "hello"))
            .await
            .unwrap();
        assert_eq!(transport.sent_events().await.len(), 2);
    }

    #[tokio::test]
    async fn error_message_targets_original_event() {
        let transport = Arc::new(MemoryTransport::new("@aibot:localhost"));
        let publisher = publisher(&transport, 10);
        let opening = publisher.ensure_opening_event_sent().await.unwrap();
        publisher
            .publish(&ResponseState::new("", "y".repeat(25)))
            .await
            .unwrap();

        publisher.send_error(&"model exploded").await;

        let sent = transport.sent_events().await;
        let error = sent.last().unwrap();
        assert_eq!(error.replaces.as_deref(), Some(opening.as_str()));
        assert_eq!(error.content.body, ERROR_BODY);
        assert_eq!(error.content.error_message.as_deref(), Some("model exploded"));
        assert!(error.content.is_streaming_finished);
    }

    #[test]
    fn error_report_can_run_on_spawned_tasks() {
        fn assert_send<F: std::future::Future + Send>(_: &F) {}

        let transport = Arc::new(MemoryTransport::new("@aibot:localhost"));
        let publisher = publisher(&transport, 1024);
        let err = EngineError::from(LLMError::generation_failed("boom"));

        assert_send(&publisher.send_error(&err));
    }

    #[tokio::test]
    async fn undeliverable_error_message_is_swallowed() {
        let transport = Arc::new(MemoryTransport::new("@aibot:localhost"));
        let publisher = publisher(&transport, 1024);
        transport.fail_next_sends(1).await;

        publisher.send_error(&"boom").await;

        assert!(transport.sent_events().await.is_empty());
    }
}

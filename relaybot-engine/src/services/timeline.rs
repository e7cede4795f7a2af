use std::{collections::HashMap, sync::Arc};

use serde_json::Value;
use shared::models::{COMMAND_RESULT_WITH_OUTPUT_MSGTYPE, ChatEvent, EventType, SerializedFile};
use tracing::{debug, instrument, warn};

use crate::{
    errors::{EngineError, EngineResult},
    services::{attachment_cache::AttachmentCache, fragments::FragmentIndex},
    transport::ChatTransport,
};

/// Canonical conversation history: one entry per logical message, ordered by
/// timestamp, attachments resolved.
pub type Timeline = Vec<ChatEvent>;

/// Builds a [`Timeline`] out of a raw room log.
pub struct TimelineReconstructor {
    transport: Arc<dyn ChatTransport>,
    cache: Arc<AttachmentCache>,
}

impl TimelineReconstructor {
    pub fn new(transport: Arc<dyn ChatTransport>, cache: Arc<AttachmentCache>) -> Self {
        Self { transport, cache }
    }

    /// Fetches the room log up to and including `last_event_id` and rebuilds
    /// its timeline. Events that arrived after `last_event_id` are ignored.
    ///
    /// # Errors
    /// Propagates transport failures and every fatal reconstruction error.
    #[instrument(name = "relaybot.load_history", skip(self), err)]
    pub async fn load_history(
        &self,
        room_id: &str,
        last_event_id: Option<&str>,
    ) -> EngineResult<Timeline> {
        let mut events = self.transport.fetch_events_since(room_id, None).await?;

        if let Some(last) = last_event_id {
            if let Some(position) = events.iter().position(|event| event.event_id == last) {
                events.truncate(position + 1);
            }
        }

        self.reconstruct(&events).await
    }

    /// Resolves edits, drops superseded and irrelevant events, inlines
    /// attachments and joins continued bot replies.
    ///
    /// # Errors
    /// Fails with [`EngineError::MalformedPayload`] when an event's `data`
    /// cannot be decoded and [`EngineError::FragmentIntegrity`] when an attached
    /// card cannot be reassembled. Individual file downloads never fail the call.
    pub async fn reconstruct(&self, raw_events: &[ChatEvent]) -> EngineResult<Timeline> {
        let decoded = decode_candidates(raw_events)?;
        let fragments = FragmentIndex::from_events(&decoded)?;

        let mut latest: Vec<ChatEvent> = Vec::new();
        let mut slots: HashMap<String, usize> = HashMap::new();

        for mut event in decoded.into_iter().filter(|event| !event.is_card_fragment()) {
            if let Some(original) = event.replaces().map(str::to_string) {
                event.event_id = original;
            }

            match slots.get(&event.event_id) {
                Some(&slot) => {
                    if event.origin_server_ts > latest[slot].origin_server_ts {
                        latest[slot] = event;
                    }
                }
                None => {
                    slots.insert(event.event_id.clone(), latest.len());
                    latest.push(event);
                }
            }
        }

        for event in &mut latest {
            event.content.relates_to = None;
        }
        latest.sort_by_key(|event| event.origin_server_ts);

        for event in &mut latest {
            self.resolve_attachments(event, &fragments).await?;
        }

        let mut timeline = stitch_continuations(latest);
        timeline.sort_by_key(|event| event.origin_server_ts);

        debug!(
            raw = raw_events.len(),
            entries = timeline.len(),
            "reconstructed timeline"
        );
        Ok(timeline)
    }

    async fn resolve_attachments(
        &self,
        event: &mut ChatEvent,
        fragments: &FragmentIndex,
    ) -> EngineResult<()> {
        let event_id = event.event_id.clone();
        let is_command_output = event.event_type == EventType::CommandResult
            && event.msgtype() == Some(COMMAND_RESULT_WITH_OUTPUT_MSGTYPE);
        let Some(Value::Object(data)) = event.content.data.as_mut() else {
            return Ok(());
        };

        if let Some(raw_files) = data.get("attachedFiles").cloned() {
            let mut files: Vec<SerializedFile> = serde_json::from_value(raw_files)
                .map_err(|err| EngineError::malformed_payload(&event_id, err))?;
            for file in &mut files {
                self.download_into(file).await;
            }
            data.insert("attachedFiles".to_string(), to_value(&event_id, &files)?);
        }

        if let Some(raw_ids) = data.get("attachedCardsEventIds").cloned() {
            let root_ids: Vec<String> = serde_json::from_value(raw_ids)
                .map_err(|err| EngineError::malformed_payload(&event_id, err))?;
            let cards = root_ids
                .iter()
                .map(|root| fragments.reassemble(root))
                .collect::<EngineResult<Vec<Value>>>()?;
            data.insert("attachedCards".to_string(), Value::Array(cards));
        }

        if is_command_output {
            if let Some(raw_card) = data.get("card").cloned() {
                let mut card: SerializedFile = serde_json::from_value(raw_card)
                    .map_err(|err| EngineError::malformed_payload(&event_id, err))?;
                self.download_into(&mut card).await;
                data.insert("card".to_string(), to_value(&event_id, &card)?);
            }
        }

        Ok(())
    }

    async fn download_into(&self, file: &mut SerializedFile) {
        if file.content.is_some() {
            return;
        }
        match self.cache.get_or_fetch(self.transport.as_ref(), file).await {
            Ok(content) => {
                file.content = Some(content.to_string());
                file.error = None;
            }
            Err(err) => {
                warn!(url = %file.url, error = %err, "failed to load attached file");
                file.error = Some(format!("Error loading attached file: {err}"));
            }
        }
    }
}

fn to_value<T: serde::Serialize>(event_id: &str, value: &T) -> EngineResult<Value> {
    serde_json::to_value(value).map_err(|err| EngineError::malformed_payload(event_id, err))
}

/// Keeps message and command result events, including server-aggregated
/// replacements, with their `data` decoded.
fn decode_candidates(raw_events: &[ChatEvent]) -> EngineResult<Vec<ChatEvent>> {
    let mut decoded = Vec::with_capacity(raw_events.len());

    for raw in raw_events {
        let aggregated = raw.aggregated_replacement().cloned();

        for mut candidate in std::iter::once(raw.clone()).chain(aggregated) {
            if !candidate.is_timeline_candidate() {
                continue;
            }
            candidate.unsigned = None;
            candidate
                .content
                .decode_data()
                .map_err(|err| EngineError::malformed_payload(&candidate.event_id, err))?;
            decoded.push(candidate);
        }
    }

    Ok(decoded)
}

/// Folds every chain of continued bot replies into its first event.
///
/// The folded entry carries the joined body and reasoning, all command
/// requests, and the timestamp of the last continuation.
fn stitch_continuations(events: Vec<ChatEvent>) -> Vec<ChatEvent> {
    let mut continuations: HashMap<String, ChatEvent> = HashMap::new();
    let mut heads = Vec::with_capacity(events.len());

    for event in events {
        match event.content.continuation_of.clone() {
            Some(previous) => {
                continuations.insert(previous, event);
            }
            None => heads.push(event),
        }
    }

    for head in &mut heads {
        let mut tail_id = head.event_id.clone();
        while head.content.has_continuation == Some(true) {
            let Some(next) = continuations.remove(&tail_id) else {
                break;
            };
            absorb(head, &next);
            tail_id = next.event_id;
        }
    }

    heads.extend(continuations.into_values());
    heads
}

fn absorb(head: &mut ChatEvent, next: &ChatEvent) {
    head.content.body.push_str(&next.content.body);

    if let Some(reasoning) = &next.content.reasoning {
        head.content
            .reasoning
            .get_or_insert_with(String::new)
            .push_str(reasoning);
    }
    if let Some(requests) = &next.content.command_requests {
        head.content
            .command_requests
            .get_or_insert_with(Vec::new)
            .extend(requests.iter().cloned());
    }

    head.content.has_continuation = next.content.has_continuation;
    head.content.is_streaming_finished = next.content.is_streaming_finished;
    head.origin_server_ts = next.origin_server_ts;
}

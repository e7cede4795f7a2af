use std::collections::HashMap;

use serde_json::Value;
use shared::models::{CardFragment, ChatEvent};

use crate::errors::{EngineError, EngineResult};

/// Card fragments of one event log, addressable by event id.
#[derive(Debug, Default)]
pub struct FragmentIndex {
    fragments: HashMap<String, CardFragment>,
}

impl FragmentIndex {
    /// Collects every fragment event among `events`.
    ///
    /// Events must already have their `data` decoded.
    ///
    /// # Errors
    /// Returns [`EngineError::MalformedPayload`] if a fragment event does not
    /// carry fragment data.
    pub fn from_events<'a, I>(events: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = &'a ChatEvent>,
    {
        let mut index = Self::default();
        for event in events.into_iter().filter(|event| event.is_card_fragment()) {
            let data = event.content.data.clone().unwrap_or(Value::Null);
            let fragment = serde_json::from_value(data)
                .map_err(|err| EngineError::malformed_payload(&event.event_id, err))?;
            index.insert(event.event_id.clone(), fragment);
        }
        Ok(index)
    }

    pub fn insert(&mut self, event_id: String, fragment: CardFragment) {
        self.fragments.insert(event_id, fragment);
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Walks the chain from `root_event_id` and parses the joined payload.
    ///
    /// Link order decides the join order. The walk stops after `totalParts`
    /// steps of the root fragment.
    ///
    /// # Errors
    /// Returns [`EngineError::FragmentIntegrity`] for a missing link or a part
    /// count that differs from `totalParts`, and
    /// [`EngineError::MalformedPayload`] if the joined payload is not JSON.
    pub fn reassemble(&self, root_event_id: &str) -> EngineResult<Value> {
        let root = self.fragments.get(root_event_id).ok_or_else(|| {
            EngineError::fragment_integrity(root_event_id, format!("missing fragment {root_event_id}"))
        })?;
        let total_parts = root.total_parts as usize;

        let mut payload = String::new();
        let mut parts = 0_usize;
        let mut next = Some(root_event_id);

        while let Some(event_id) = next {
            if parts == total_parts {
                return Err(EngineError::fragment_integrity(
                    root_event_id,
                    format!("chain is longer than {total_parts} parts"),
                ));
            }
            let fragment = self.fragments.get(event_id).ok_or_else(|| {
                EngineError::fragment_integrity(root_event_id, format!("missing fragment {event_id}"))
            })?;
            payload.push_str(&fragment.payload);
            parts += 1;
            next = fragment.next_fragment.as_deref();
        }

        if parts != total_parts {
            return Err(EngineError::fragment_integrity(
                root_event_id,
                format!("expected {total_parts} parts, found {parts}"),
            ));
        }

        serde_json::from_str(&payload).map_err(|err| EngineError::malformed_payload(root_event_id, err))
    }
}

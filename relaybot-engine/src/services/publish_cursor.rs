use std::ops::Range;

use super::accumulator::ResponseState;

/// Bookkeeping for one physical event of a reply's continuation chain.
///
/// Ranges are byte offsets into the turn's reasoning and answer text: `start`
/// is where this event's share begins, `end` how far it has been sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishCursor {
    pub event_id: Option<String>,
    pub reasoning_range: Range<usize>,
    pub content_range: Range<usize>,
    pub needs_continuation: bool,
}

impl PublishCursor {
    pub fn with_event_id<T: Into<String>>(event_id: T) -> Self {
        Self {
            event_id: Some(event_id.into()),
            ..Self::default()
        }
    }

    /// Reasoning and content not yet claimed by an earlier event.
    pub fn remainder<'a>(&self, state: &'a ResponseState) -> (&'a str, &'a str) {
        (
            tail(&state.reasoning, self.reasoning_range.start),
            tail(&state.answer, self.content_range.start),
        )
    }

    pub fn would_exceed(&self, state: &ResponseState, max_size: usize) -> bool {
        let (reasoning, content) = self.remainder(state);
        reasoning.len() + content.len() > max_size
    }

    /// Largest leading part of the remainder that fits in `max_size` bytes.
    ///
    /// Reasoning is taken first; content only fills what budget is left.
    /// Cuts fall on character boundaries, and at least one character is
    /// always taken so a tiny ceiling cannot stall the split.
    pub fn carve<'a>(&self, state: &'a ResponseState, max_size: usize) -> (&'a str, &'a str) {
        let (reasoning, content) = self.remainder(state);

        let reasoning_end = floor_boundary(reasoning, max_size);
        let content_end = floor_boundary(content, max_size - reasoning_end);

        if reasoning_end == 0 && content_end == 0 {
            return match reasoning.chars().next() {
                Some(first) => (&reasoning[..first.len_utf8()], ""),
                None => {
                    let step = content.chars().next().map_or(0, char::len_utf8);
                    ("", &content[..step])
                }
            };
        }

        (&reasoning[..reasoning_end], &content[..content_end])
    }

    pub fn mark_sent(&mut self, reasoning_len: usize, content_len: usize) {
        self.reasoning_range.end = self.reasoning_range.start + reasoning_len;
        self.content_range.end = self.content_range.start + content_len;
    }

    /// Cursor for the event that continues this one.
    pub fn next_cursor(&self) -> Self {
        Self {
            event_id: None,
            reasoning_range: self.reasoning_range.end..self.reasoning_range.end,
            content_range: self.content_range.end..self.content_range.end,
            needs_continuation: false,
        }
    }
}

fn tail(text: &str, start: usize) -> &str {
    &text[floor_boundary(text, start)..]
}

fn floor_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut boundary = index;
    while !text.is_char_boundary(boundary) {
        boundary -= 1;
    }
    boundary
}

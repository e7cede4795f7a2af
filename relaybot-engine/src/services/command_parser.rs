use futures_util::{Stream, StreamExt};
use shared::config::ParserConfig;
use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Text,
    Command,
}

/// One emission of [`TextCommandParser::parse`].
///
/// Text segments carry all text since the last command block, not a delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub content: String,
}

impl Segment {
    pub fn text<T: Into<String>>(content: T) -> Self {
        Self {
            kind: SegmentKind::Text,
            content: content.into(),
        }
    }

    pub fn command<T: Into<String>>(content: T) -> Self {
        Self {
            kind: SegmentKind::Command,
            content: content.into(),
        }
    }
}

/// Splits a token stream into running text and delimited command blocks.
#[derive(Debug, Clone)]
pub struct TextCommandParser {
    open: String,
    close: String,
}

impl Default for TextCommandParser {
    fn default() -> Self {
        Self::from_config(&ParserConfig::default())
    }
}

impl TextCommandParser {
    pub fn new<O: Into<String>, C: Into<String>>(open: O, close: C) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }

    pub fn from_config(config: &ParserConfig) -> Self {
        Self::new(&config.open_delimiter, &config.close_delimiter)
    }

    /// Lazily transforms `tokens` into segments.
    ///
    /// Delimiters may be split across tokens. Text segments are skipped when
    /// only whitespace changed since the previous one. An unterminated block
    /// at the end of the stream is discarded.
    pub fn parse<S>(&self, tokens: S) -> impl Stream<Item = Segment> + Send + 'static
    where
        S: Stream<Item = String> + Send + 'static,
    {
        let mut state = ParseState::new(self.open.clone(), self.close.clone());

        async_stream::stream! {
            let mut tokens = Box::pin(tokens);
            while let Some(token) = tokens.next().await {
                for segment in state.feed(&token) {
                    yield segment;
                }
            }
            if let Some(segment) = state.finish() {
                yield segment;
            }
        }
    }
}

struct ParseState {
    open: String,
    close: String,
    pending: String,
    in_block: bool,
    text: String,
    block: String,
    /// Non-whitespace text arrived since the last text emission.
    text_grew: bool,
}

impl ParseState {
    fn new(open: String, close: String) -> Self {
        Self {
            open,
            close,
            pending: String::new(),
            in_block: false,
            text: String::new(),
            block: String::new(),
            text_grew: false,
        }
    }

    fn feed(&mut self, token: &str) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut input = std::mem::take(&mut self.pending);
        input.push_str(token);

        loop {
            let delimiter = if self.in_block { &self.close } else { &self.open };

            let found = input
                .find(delimiter.as_str())
                .filter(|_| !delimiter.is_empty());
            if let Some(position) = found {
                let rest = input[position + delimiter.len()..].to_string();
                input.truncate(position);
                self.push_content(&input);

                if self.in_block {
                    trace!(bytes = self.block.len(), "command block closed");
                    segments.push(Segment::command(std::mem::take(&mut self.block)));
                    self.in_block = false;
                } else {
                    segments.extend(self.text_if_changed());
                    self.text.clear();
                    self.text_grew = false;
                    self.in_block = true;
                }
                input = rest;
                continue;
            }

            let keep = partial_delimiter_len(&input, delimiter);
            self.pending = input.split_off(input.len() - keep);
            self.push_content(&input);
            break;
        }

        if !self.in_block {
            segments.extend(self.text_if_changed());
        }
        segments
    }

    fn finish(&mut self) -> Option<Segment> {
        let pending = std::mem::take(&mut self.pending);
        if self.in_block {
            warn!(
                bytes = self.block.len() + pending.len(),
                "discarding unterminated command block"
            );
            return None;
        }
        self.push_content(&pending);
        self.text_if_changed()
    }

    fn push_content(&mut self, content: &str) {
        if self.in_block {
            self.block.push_str(content);
        } else {
            self.text_grew |= content.chars().any(|c| !c.is_whitespace());
            self.text.push_str(content);
        }
    }

    fn text_if_changed(&mut self) -> Option<Segment> {
        if !std::mem::take(&mut self.text_grew) {
            return None;
        }
        Some(Segment::text(self.text.clone()))
    }
}

/// Length of the longest suffix of `input` that starts `delimiter`.
fn partial_delimiter_len(input: &str, delimiter: &str) -> usize {
    let longest = delimiter.len().saturating_sub(1).min(input.len());
    (1..=longest)
        .rev()
        .find(|&len| {
            let start = input.len() - len;
            input.is_char_boundary(start) && delimiter.starts_with(&input[start..])
        })
        .unwrap_or(0)
}

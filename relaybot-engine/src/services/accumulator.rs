use std::collections::HashSet;

use shared::{llms::ResponseDelta, models::ToolCall};

/// Tool name reserved for the correctness check the bot issues on its own.
pub const CHECK_CORRECTNESS_TOOL: &str = "checkCorrectness";

/// Latest known model output for one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseState {
    pub reasoning: String,
    pub answer: String,
    /// Deduplicated, in first-seen order.
    pub tool_calls: Vec<ToolCall>,
    pub is_finished: bool,
    pub is_canceled: bool,
}

impl ResponseState {
    pub fn new<R: Into<String>, A: Into<String>>(reasoning: R, answer: A) -> Self {
        Self {
            reasoning: reasoning.into(),
            answer: answer.into(),
            ..Self::default()
        }
    }
}

/// Folds model deltas into a [`ResponseState`] and reports whether anything
/// worth publishing changed.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    state: ResponseState,
    placeholder: Option<String>,
    allowed_tools: Option<HashSet<String>>,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts with `placeholder` as reasoning until real output arrives.
    pub fn with_placeholder<T: Into<String>>(placeholder: T) -> Self {
        let placeholder = placeholder.into();
        Self {
            state: ResponseState {
                reasoning: placeholder.clone(),
                ..ResponseState::default()
            },
            placeholder: Some(placeholder),
            allowed_tools: None,
        }
    }

    /// Drops tool calls whose name is not listed.
    #[must_use]
    pub fn with_allowed_tools<I, T>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.allowed_tools = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn state(&self) -> &ResponseState {
        &self.state
    }

    /// Applies one delta. Reasoning is appended; answer and tool calls replace
    /// the stored snapshots.
    ///
    /// Returns `true` when the state changed in a way a reader would notice.
    pub fn update(
        &mut self,
        reasoning_delta: Option<&str>,
        answer_snapshot: Option<&str>,
        tool_calls_snapshot: Option<&[ToolCall]>,
        finished: bool,
    ) -> bool {
        let mut changed = false;

        if let Some(delta) = reasoning_delta.filter(|delta| !delta.is_empty()) {
            self.clear_placeholder();
            self.state.reasoning.push_str(delta);
            changed = true;
        }

        if let Some(snapshot) = answer_snapshot {
            let answer = clean_content(snapshot);
            if !answer.is_empty() {
                changed |= self.clear_placeholder();
            }
            if answer != self.state.answer {
                self.state.answer = answer;
                changed = true;
            }
        }

        if let Some(calls) = tool_calls_snapshot {
            let filtered = self.filter_tool_calls(calls);
            if filtered != self.state.tool_calls {
                self.state.tool_calls = filtered;
                changed = true;
            }
        }

        if finished && !self.state.is_finished {
            self.state.is_finished = true;
            changed = true;
        }

        changed
    }

    pub fn apply(&mut self, delta: &ResponseDelta) -> bool {
        self.update(
            delta.reasoning.as_deref(),
            delta.content.as_deref(),
            delta.tool_calls.as_deref(),
            delta.finished,
        )
    }

    /// Marks the turn canceled, which also ends it.
    pub fn cancel(&mut self) -> bool {
        if self.state.is_canceled {
            return false;
        }
        self.state.is_canceled = true;
        self.state.is_finished = true;
        true
    }

    fn clear_placeholder(&mut self) -> bool {
        let Some(placeholder) = self.placeholder.take() else {
            return false;
        };
        if self.state.reasoning == placeholder {
            self.state.reasoning.clear();
            return true;
        }
        false
    }

    fn filter_tool_calls(&self, calls: &[ToolCall]) -> Vec<ToolCall> {
        let mut seen = HashSet::new();
        calls
            .iter()
            .filter(|call| !call.is_empty() && call.name != CHECK_CORRECTNESS_TOOL)
            .filter(|call| {
                self.allowed_tools
                    .as_ref()
                    .is_none_or(|allowed| allowed.contains(&call.name))
            })
            .filter(|call| seen.insert(*call))
            .cloned()
            .collect()
    }
}

/// Normalizes streamed answer text.
///
/// Trims, unwraps a ```` ```json ```` fence, drops text made only of
/// backticks, and strips a trailing `json` suffix.
pub fn clean_content(text: &str) -> String {
    let mut cleaned = text.trim();

    if let Some(inner) = cleaned.strip_prefix("```json") {
        cleaned = inner.trim();
        cleaned = cleaned.strip_suffix("```").unwrap_or(cleaned).trim();
    }
    if cleaned.chars().all(|c| c == '`') {
        return String::new();
    }
    if let Some(stripped) = cleaned.strip_suffix("json") {
        cleaned = stripped.trim();
    }

    cleaned.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall::new(id, name, arguments)
    }

    #[test]
    fn identical_update_is_a_no_op() {
        let mut accumulator = ResponseAccumulator::new();
        let calls = vec![call("1", "search", "{}")];

        assert!(accumulator.update(Some("step"), Some("answer"), Some(calls.as_slice()), false));
        assert!(!accumulator.update(Some(""), Some("answer"), Some(calls.as_slice()), false));
        assert!(!accumulator.update(None, None, None, false));
    }

    #[test]
    fn reasoning_is_appended_and_answer_replaced() {
        let mut accumulator = ResponseAccumulator::new();

        accumulator.update(Some("reasoning step 1"), None, None, false);
        accumulator.update(Some(" and 2"), Some("Hello"), None, false);
        accumulator.update(None, Some("Hello world"), None, false);

        let state = accumulator.state();
        assert_eq!(state.reasoning, "reasoning step 1 and 2");
        assert_eq!(state.answer, "Hello world");
    }

    #[test]
    fn whitespace_only_answer_change_is_ignored() {
        let mut accumulator = ResponseAccumulator::new();

        assert!(accumulator.update(None, Some("Hello"), None, false));
        assert!(!accumulator.update(None, Some("Hello \n"), None, false));
    }

    #[test]
    fn placeholder_is_cleared_by_first_answer() {
        let mut accumulator = ResponseAccumulator::with_placeholder("Thinking...");
        assert_eq!(accumulator.state().reasoning, "Thinking...");

        assert!(!accumulator.update(None, Some("  "), None, false));
        assert_eq!(accumulator.state().reasoning, "Thinking...");

        assert!(accumulator.update(None, Some("Here you go"), None, false));
        assert_eq!(accumulator.state().reasoning, "");
    }

    #[test]
    fn placeholder_is_not_prepended_to_reasoning() {
        let mut accumulator = ResponseAccumulator::with_placeholder("Thinking...");

        accumulator.update(Some("step 1"), None, None, false);

        assert_eq!(accumulator.state().reasoning, "step 1");
    }

    #[test]
    fn reserved_and_disallowed_tools_are_dropped() {
        let mut accumulator = ResponseAccumulator::new().with_allowed_tools(["search", "patchCard"]);
        let calls = vec![
            call("1", CHECK_CORRECTNESS_TOOL, "{}"),
            call("2", "search", "{}"),
            call("3", "deleteEverything", "{}"),
            call("", "", ""),
        ];

        assert!(accumulator.update(None, None, Some(calls.as_slice()), false));

        let names: Vec<_> = accumulator
            .state()
            .tool_calls
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["search"]);
    }

    #[test]
    fn reserved_tool_is_dropped_without_allow_list() {
        let mut accumulator = ResponseAccumulator::new();

        let calls = vec![call("1", CHECK_CORRECTNESS_TOOL, "{}")];
        let changed = accumulator.update(None, None, Some(calls.as_slice()), false);

        assert!(!changed);
        assert!(accumulator.state().tool_calls.is_empty());
    }

    #[test]
    fn duplicate_tool_calls_keep_first_position() {
        let mut accumulator = ResponseAccumulator::new();
        let calls = vec![
            call("1", "search", "{\"q\":1}"),
            call("2", "patchCard", "{}"),
            call("1", "search", "{\"q\":1}"),
        ];

        accumulator.update(None, None, Some(calls.as_slice()), false);

        let ids: Vec<_> = accumulator
            .state()
            .tool_calls
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn growing_tool_arguments_count_as_change() {
        let mut accumulator = ResponseAccumulator::new();

        let partial = vec![call("1", "search", "{\"q\":")];
        let complete = vec![call("1", "search", "{\"q\":1}")];

        accumulator.update(None, None, Some(partial.as_slice()), false);
        assert!(accumulator.update(None, None, Some(complete.as_slice()), false));
    }

    #[test]
    fn finished_flag_only_flips_once() {
        let mut accumulator = ResponseAccumulator::new();

        assert!(accumulator.update(None, None, None, true));
        assert!(!accumulator.update(None, None, None, true));
        assert!(!accumulator.update(None, None, None, false));
        assert!(accumulator.state().is_finished);
    }

    #[test]
    fn cancel_ends_the_turn() {
        let mut accumulator = ResponseAccumulator::new();

        assert!(accumulator.cancel());
        assert!(!accumulator.cancel());
        assert!(accumulator.state().is_canceled);
        assert!(accumulator.state().is_finished);
    }

    #[test]
    fn apply_reads_every_delta_field() {
        let mut accumulator = ResponseAccumulator::new();
        let delta = ResponseDelta {
            reasoning: Some("r".into()),
            content: Some("c".into()),
            tool_calls: Some(vec![call("1", "search", "{}")]),
            finished: true,
        };

        assert!(accumulator.apply(&delta));
        let state = accumulator.state();
        assert_eq!((state.reasoning.as_str(), state.answer.as_str()), ("r", "c"));
        assert_eq!(state.tool_calls.len(), 1);
        assert!(state.is_finished);
    }

    #[test]
    fn clean_content_strips_cosmetic_wrapping() {
        assert_eq!(clean_content("  hello \n"), "hello");
        assert_eq!(clean_content("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(clean_content("```"), "");
        assert_eq!(clean_content("`"), "");
        assert_eq!(clean_content("{\"a\":1}\njson"), "{\"a\":1}");
        assert_eq!(clean_content("```rust\nfn main() {}\n```"), "```rust\nfn main() {}\n```");
    }
}

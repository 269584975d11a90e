//! Folds deltas into the final assistant message.

use super::event::{ChatStreamEvent, Delta};
use crate::model::{ChatMessage, ChatResponse, Part, Role, StopReason, TokenUsage, ToolCall};
use crate::{PiError, Result};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
    complete: bool,
    conflicting_name: Option<String>,
}

impl PartialCall {
    // Some servers repeat the name on every fragment.
    fn set_name(&mut self, name: &str) {
        if self.name.is_empty() {
            self.name = name.to_string();
        } else if self.name != name && self.conflicting_name.is_none() {
            self.conflicting_name = Some(name.to_string());
        }
    }
}

/// Accumulates text, tool-call fragments, usage and stop reason.
///
/// Tool calls keep the order in which their ids first appeared. Whatever
/// has accumulated when [`finish`](Self::finish) runs is authoritative,
/// whether or not the provider marked a call complete.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    text: String,
    calls: Vec<PartialCall>,
    by_id: HashMap<String, usize>,
    usage: Option<TokenUsage>,
    stop: Option<StopReason>,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a delta, returning the canonical event to emit for it, if any.
    ///
    /// `Delta::Done` is not handled here; call [`finish`](Self::finish).
    pub fn apply(&mut self, delta: Delta) -> Option<ChatStreamEvent> {
        match delta {
            Delta::Text(text) if text.is_empty() => None,
            Delta::Text(text) => {
                self.text.push_str(&text);
                Some(ChatStreamEvent::TextDelta { text })
            }
            Delta::ToolCall {
                id,
                name,
                arguments,
            } => {
                let call = self.call_mut(&id);
                if let Some(name) = name.as_deref().filter(|n| !n.is_empty()) {
                    call.set_name(name);
                }
                if let Some(fragment) = &arguments {
                    call.arguments.push_str(fragment);
                }
                Some(ChatStreamEvent::ToolCallDelta {
                    id,
                    name,
                    arguments_fragment: arguments,
                })
            }
            Delta::ToolCallComplete { id } => {
                self.call_mut(&id).complete = true;
                None
            }
            Delta::Usage(usage) => {
                self.usage = Some(usage);
                Some(ChatStreamEvent::Usage { usage })
            }
            Delta::Stop(reason) => {
                self.stop = Some(reason);
                None
            }
            Delta::Done => None,
        }
    }

    fn call_mut(&mut self, id: &str) -> &mut PartialCall {
        let idx = match self.by_id.get(id) {
            Some(idx) => *idx,
            None => {
                self.calls.push(PartialCall {
                    id: id.to_string(),
                    ..PartialCall::default()
                });
                self.by_id.insert(id.to_string(), self.calls.len() - 1);
                self.calls.len() - 1
            }
        };
        &mut self.calls[idx]
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Ids of calls the provider explicitly marked complete.
    pub fn completed_calls(&self) -> impl Iterator<Item = &str> {
        self.calls
            .iter()
            .filter(|c| c.complete)
            .map(|c| c.id.as_str())
    }

    /// Build the final response.
    ///
    /// Fails with `Decode` if a tool call has no name, was given two
    /// different names, or its arguments are not valid JSON.
    pub fn finish(self) -> Result<ChatResponse> {
        let mut parts = Vec::with_capacity(self.calls.len() + 1);
        if !self.text.is_empty() {
            parts.push(Part::text(self.text));
        }

        let has_calls = !self.calls.is_empty();
        for call in self.calls {
            parts.push(Part::ToolCall(finish_call(call)?));
        }

        let stop_reason = self.stop.unwrap_or(if has_calls {
            StopReason::ToolCalls
        } else {
            StopReason::Stop
        });

        Ok(ChatResponse {
            message: ChatMessage::from_parts(Role::Assistant, parts),
            usage: self.usage.unwrap_or_default(),
            cost: None,
            stop_reason,
        })
    }
}

fn finish_call(call: PartialCall) -> Result<ToolCall> {
    if call.name.is_empty() {
        return Err(PiError::Decode(format!("tool call {} has no name", call.id)));
    }
    if let Some(other) = &call.conflicting_name {
        return Err(PiError::Decode(format!(
            "tool call {} named both {} and {other}",
            call.id, call.name
        )));
    }
    let arguments = if call.arguments.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(&call.arguments).map_err(|e| {
            PiError::Decode(format!("tool call {} arguments: {e}", call.id))
        })?
    };
    Ok(ToolCall {
        id: call.id,
        name: call.name,
        arguments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fragment(id: &str, name: Option<&str>, args: Option<&str>) -> Delta {
        Delta::ToolCall {
            id: id.into(),
            name: name.map(Into::into),
            arguments: args.map(Into::into),
        }
    }

    #[test]
    fn interleaved_fragments_keep_first_appearance_order() {
        let mut asm = StreamAssembler::new();
        asm.apply(fragment("b", Some("second"), Some("{\"x\":")));
        asm.apply(fragment("a", Some("first"), None));
        asm.apply(fragment("b", None, Some("1}")));
        asm.apply(fragment("a", None, Some("{}")));

        let response = asm.finish().unwrap();
        let calls = response.tool_calls();
        assert_eq!(calls[0].id, "b");
        assert_eq!(calls[0].arguments, json!({"x": 1}));
        assert_eq!(calls[1].name, "first");
        assert_eq!(response.stop_reason, StopReason::ToolCalls);
    }

    // Completion is authoritative at the end even when the provider never
    // marks a call complete.
    #[test]
    fn unmarked_calls_complete_at_finish() {
        let mut asm = StreamAssembler::new();
        asm.apply(fragment("1", Some("echo"), Some("{\"text\":\"hi\"}")));
        assert_eq!(asm.completed_calls().count(), 0);
        let response = asm.finish().unwrap();
        assert_eq!(response.tool_calls()[0].arguments, json!({"text": "hi"}));
    }

    #[test]
    fn empty_arguments_become_object() {
        let mut asm = StreamAssembler::new();
        asm.apply(fragment("1", Some("now"), None));
        asm.apply(Delta::ToolCallComplete { id: "1".into() });
        assert_eq!(asm.completed_calls().collect::<Vec<_>>(), vec!["1"]);
        let response = asm.finish().unwrap();
        assert_eq!(response.tool_calls()[0].arguments, json!({}));
    }

    #[test]
    fn malformed_arguments_fail_decode() {
        let mut asm = StreamAssembler::new();
        asm.apply(fragment("1", Some("echo"), Some("{\"text\":")));
        assert!(matches!(asm.finish(), Err(PiError::Decode(_))));
    }

    #[test]
    fn repeated_name_is_not_concatenated() {
        let mut asm = StreamAssembler::new();
        asm.apply(fragment("1", Some("echo"), Some("{")));
        asm.apply(fragment("1", Some("echo"), Some("}")));
        let response = asm.finish().unwrap();
        assert_eq!(response.tool_calls()[0].name, "echo");
        assert_eq!(response.tool_calls()[0].arguments, json!({}));
    }

    #[test]
    fn conflicting_names_fail_decode() {
        let mut asm = StreamAssembler::new();
        asm.apply(fragment("1", Some("echo"), Some("{}")));
        asm.apply(fragment("1", Some("shout"), None));
        assert!(matches!(asm.finish(), Err(PiError::Decode(_))));
    }

    #[test]
    fn last_usage_and_reported_stop_win() {
        let mut asm = StreamAssembler::new();
        asm.apply(Delta::Text("a".into()));
        asm.apply(Delta::Usage(TokenUsage::new(5, 0)));
        asm.apply(Delta::Usage(TokenUsage::new(5, 7)));
        asm.apply(Delta::Stop(StopReason::Length));
        let response = asm.finish().unwrap();
        assert_eq!(response.usage, TokenUsage::new(5, 7));
        assert_eq!(response.stop_reason, StopReason::Length);
        assert_eq!(response.text(), "a");
    }
}

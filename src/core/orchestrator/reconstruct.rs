//! Canonical response reconstruction from streamed deltas
//!
//! While chunks are forwarded to the caller, a copy accumulates here so a
//! complete `ChatCompletion` can be persisted. Ordered concatenation of the
//! content deltas equals the reconstructed message content.

use std::collections::BTreeMap;

use chrono::Utc;

use crate::core::types::{
    AssistantMessage, ChatCompletion, ChatCompletionChunk, Choice, FunctionCall, MessageRole,
    ToolCall, Usage,
};

/// Folds streamed chunks back into one completion
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    id: String,
    model: String,
    created: i64,
    system_fingerprint: Option<String>,
    content: String,
    tool_calls: BTreeMap<u32, PartialToolCall>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
    chunks_seen: u64,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl ResponseAccumulator {
    /// Empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of chunks folded in
    pub fn chunks_seen(&self) -> u64 {
        self.chunks_seen
    }

    /// Usage from the final chunk, when the upstream reported it
    pub fn usage(&self) -> Option<&Usage> {
        self.usage.as_ref()
    }

    /// Fold one chunk
    pub fn push(&mut self, chunk: &ChatCompletionChunk) {
        self.chunks_seen += 1;

        if self.id.is_empty() && !chunk.id.is_empty() {
            self.id = chunk.id.clone();
        }
        if self.model.is_empty() {
            self.model = chunk.model.clone();
        }
        if self.created == 0 {
            self.created = chunk.created;
        }
        if self.system_fingerprint.is_none() {
            self.system_fingerprint = chunk.system_fingerprint.clone();
        }
        if let Some(usage) = &chunk.usage {
            self.usage = Some(usage.clone());
        }

        let Some(choice) = chunk.choices.first() else {
            return;
        };

        if let Some(content) = &choice.delta.content {
            self.content.push_str(content);
        }
        if let Some(deltas) = &choice.delta.tool_calls {
            for delta in deltas {
                let partial = self.tool_calls.entry(delta.index).or_default();
                if let Some(id) = &delta.id {
                    partial.id = id.clone();
                }
                if let Some(function) = &delta.function {
                    if let Some(name) = &function.name {
                        partial.name = name.clone();
                    }
                    if let Some(arguments) = &function.arguments {
                        partial.arguments.push_str(arguments);
                    }
                }
            }
        }
        if let Some(reason) = &choice.finish_reason {
            self.finish_reason = Some(reason.clone());
        }
    }

    /// Build the canonical completion for persistence
    pub fn build(&self, provider: &str) -> ChatCompletion {
        let tool_calls: Vec<ToolCall> = self
            .tool_calls
            .values()
            .map(|p| ToolCall {
                id: p.id.clone(),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: p.name.clone(),
                    arguments: p.arguments.clone(),
                },
            })
            .collect();

        ChatCompletion {
            id: if self.id.is_empty() {
                format!("chatcmpl-{}", uuid::Uuid::new_v4())
            } else {
                self.id.clone()
            },
            object: "chat.completion".to_string(),
            created: if self.created == 0 {
                Utc::now().timestamp()
            } else {
                self.created
            },
            model: self.model.clone(),
            system_fingerprint: self.system_fingerprint.clone(),
            choices: vec![Choice {
                index: 0,
                message: AssistantMessage {
                    role: MessageRole::Assistant,
                    content: if self.content.is_empty() && !tool_calls.is_empty() {
                        None
                    } else {
                        Some(self.content.clone())
                    },
                    tool_calls: if tool_calls.is_empty() {
                        None
                    } else {
                        Some(tool_calls)
                    },
                },
                finish_reason: self.finish_reason.clone(),
                logprobs: None,
            }],
            usage: self.usage.clone(),
            provider: Some(provider.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{
        ChatCompletionChunkChoice, ChatCompletionDelta, FunctionCallDelta, ToolCallDelta,
    };

    fn chunk(content: Option<&str>, finish: Option<&str>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: "chatcmpl-9".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 1700000000,
            model: "gpt-4o".to_string(),
            system_fingerprint: None,
            choices: vec![ChatCompletionChunkChoice {
                index: 0,
                delta: ChatCompletionDelta {
                    role: None,
                    content: content.map(str::to_string),
                    tool_calls: None,
                },
                finish_reason: finish.map(str::to_string),
                logprobs: None,
            }],
            usage: None,
        }
    }

    #[test]
    fn content_deltas_concatenate_in_order() {
        let mut acc = ResponseAccumulator::new();
        for part in ["Hel", "lo ", "wor", "ld"] {
            acc.push(&chunk(Some(part), None));
        }
        acc.push(&chunk(None, Some("stop")));

        let completion = acc.build("openai");
        assert_eq!(
            completion.choices[0].message.content.as_deref(),
            Some("Hello world")
        );
        assert_eq!(completion.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(completion.id, "chatcmpl-9");
        assert_eq!(acc.chunks_seen(), 5);
    }

    #[test]
    fn tool_call_deltas_merge_by_index() {
        let mut acc = ResponseAccumulator::new();

        let mut first = chunk(None, None);
        first.choices[0].delta.tool_calls = Some(vec![ToolCallDelta {
            index: 0,
            id: Some("call_1".to_string()),
            tool_type: Some("function".to_string()),
            function: Some(FunctionCallDelta {
                name: Some("get_weather".to_string()),
                arguments: Some("{\"ci".to_string()),
            }),
        }]);
        acc.push(&first);

        let mut second = chunk(None, None);
        second.choices[0].delta.tool_calls = Some(vec![ToolCallDelta {
            index: 0,
            id: None,
            tool_type: None,
            function: Some(FunctionCallDelta {
                name: None,
                arguments: Some("ty\":\"Paris\"}".to_string()),
            }),
        }]);
        acc.push(&second);

        let completion = acc.build("openai");
        let calls = completion.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].function.arguments, "{\"city\":\"Paris\"}");
    }

    #[test]
    fn usage_is_taken_from_the_final_chunk() {
        let mut acc = ResponseAccumulator::new();
        acc.push(&chunk(Some("hi"), None));

        let mut last = chunk(None, Some("stop"));
        last.usage = Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 2,
            total_tokens: 12,
            prompt_tokens_details: None,
            cost: None,
        });
        acc.push(&last);

        assert_eq!(acc.usage().unwrap().total_tokens, 12);
    }
}

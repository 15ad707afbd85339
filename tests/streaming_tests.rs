//! Stream reconstruction properties
//!
//! The ordered concatenation of content deltas across yielded chunks must
//! equal the message content of the reconstructed completion.

use modelmux::core::orchestrator::ResponseAccumulator;
use modelmux::core::types::{
    ChatCompletionChunk, ChatCompletionChunkChoice, ChatCompletionDelta, MessageRole,
    PromptTokensDetails, Usage,
};

fn chunk(id: &str, content: Option<&str>, finish: Option<&str>) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: id.to_string(),
        object: "chat.completion.chunk".to_string(),
        created: 1_700_000_000,
        model: "gpt-4o".to_string(),
        system_fingerprint: None,
        choices: vec![ChatCompletionChunkChoice {
            index: 0,
            delta: ChatCompletionDelta {
                role: if content.is_none() && finish.is_none() {
                    Some(MessageRole::Assistant)
                } else {
                    None
                },
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
fn reconstruction_equals_delta_concatenation() {
    let deltas = ["The ", "quick ", "brown ", "fox ", "jumps"];
    let mut acc = ResponseAccumulator::new();

    acc.push(&chunk("chatcmpl-a", None, None));
    for d in &deltas {
        acc.push(&chunk("chatcmpl-a", Some(d), None));
    }
    acc.push(&chunk("chatcmpl-a", None, Some("stop")));

    let completion = acc.build("openai");
    assert_eq!(
        completion.choices[0].message.content.as_deref(),
        Some(deltas.concat().as_str())
    );
    assert_eq!(completion.id, "chatcmpl-a");
    assert_eq!(completion.provider.as_deref(), Some("openai"));
    assert_eq!(completion.object, "chat.completion");
}

#[test]
fn partial_streams_still_reconstruct() {
    // A stream interrupted after two chunks keeps what arrived
    let mut acc = ResponseAccumulator::new();
    acc.push(&chunk("chatcmpl-b", Some("Hello, "), None));
    acc.push(&chunk("chatcmpl-b", Some("wor"), None));

    let completion = acc.build("openai");
    assert_eq!(completion.choices[0].message.content.as_deref(), Some("Hello, wor"));
    // no finish reason ever arrived
    assert!(completion.choices[0].finish_reason.is_none());
}

#[test]
fn final_chunk_usage_carries_cache_detail() {
    let mut acc = ResponseAccumulator::new();
    acc.push(&chunk("chatcmpl-c", Some("hi"), None));

    let mut last = chunk("chatcmpl-c", None, Some("stop"));
    last.usage = Some(Usage {
        prompt_tokens: 1000,
        completion_tokens: 20,
        total_tokens: 1020,
        prompt_tokens_details: Some(PromptTokensDetails {
            cached_tokens: Some(600),
        }),
        cost: None,
    });
    acc.push(&last);

    let usage = acc.usage().unwrap();
    assert_eq!(usage.cached_tokens(), Some(600));
    assert_eq!(usage.prompt_tokens, 1000);
}

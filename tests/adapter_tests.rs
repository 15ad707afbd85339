//! Adapter contract against a mock upstream
//!
//! Exercises `make_request` end to end over HTTP: response normalization,
//! error classification, and streaming chunk parsing.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use modelmux::core::adapters::{Adapter, ErrorKind, OpenAiAdapter, UpstreamResponse};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::variant;

fn adapter() -> Arc<OpenAiAdapter> {
    Arc::new(OpenAiAdapter::new(
        reqwest::Client::new(),
        Duration::from_secs(5),
        Duration::from_secs(5),
    ))
}

fn test_variant(base_url: &str, key_env: &str) -> modelmux::core::catalog::ModelVariant {
    let mut v = variant("gpt-4o", "openai", 0.005, 0.015);
    v.base_url = base_url.to_string();
    v.api_key_ref = key_env.to_string();
    v
}

#[tokio::test]
async fn plain_request_normalizes_the_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key-plain"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "gpt-4o-2024-08-06",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hello!"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12}
        })))
        .mount(&server)
        .await;

    unsafe { std::env::set_var("TEST_KEY_PLAIN", "test-key-plain") };
    let v = test_variant(&server.uri(), "TEST_KEY_PLAIN");

    let response = adapter()
        .make_request(&common::chat_request("gpt-4o", "hi"), &v, false)
        .await
        .unwrap();

    let UpstreamResponse::Full(completion) = response else {
        panic!("expected a full response");
    };
    // the caller-facing model id replaces the upstream one
    assert_eq!(completion.model, "gpt-4o");
    assert_eq!(completion.provider.as_deref(), Some("openai"));
    assert_eq!(
        completion.choices[0].message.content.as_deref(),
        Some("Hello!")
    );
    assert_eq!(completion.usage.as_ref().unwrap().total_tokens, 12);
}

#[tokio::test]
async fn upstream_400_is_a_business_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"message": "you forgot the messages", "type": "invalid_request_error"}
        })))
        .mount(&server)
        .await;

    unsafe { std::env::set_var("TEST_KEY_400", "k") };
    let v = test_variant(&server.uri(), "TEST_KEY_400");

    let err = adapter()
        .make_request(&common::chat_request("gpt-4o", "hi"), &v, false)
        .await
        .unwrap_err();
    assert!(err.is_business());
    assert_eq!(err.status, Some(400));
    assert_eq!(err.message, "you forgot the messages");
}

#[tokio::test]
async fn upstream_503_stays_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    unsafe { std::env::set_var("TEST_KEY_503", "k") };
    let v = test_variant(&server.uri(), "TEST_KEY_503");

    let err = adapter()
        .make_request(&common::chat_request("gpt-4o", "hi"), &v, false)
        .await
        .unwrap_err();
    assert!(!err.is_business());
    assert_eq!(err.kind, ErrorKind::Upstream);
}

#[tokio::test]
async fn streaming_yields_normalized_chunks_until_done() {
    let sse_body = concat!(
        "data: {\"id\":\"chatcmpl-s\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"gpt-4o-2024-08-06\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n",
        "data: {\"id\":\"chatcmpl-s\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"gpt-4o-2024-08-06\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_raw(sse_body.as_bytes().to_vec(), "text/event-stream"),
        )
        .mount(&server)
        .await;

    unsafe { std::env::set_var("TEST_KEY_STREAM", "k") };
    let v = test_variant(&server.uri(), "TEST_KEY_STREAM");

    let response = adapter()
        .make_request(&common::chat_request("gpt-4o", "hi"), &v, true)
        .await
        .unwrap();
    let UpstreamResponse::Stream(mut stream) = response else {
        panic!("expected a stream");
    };

    let mut contents = String::new();
    let mut finish = None;
    while let Some(item) = stream.next().await {
        let chunk = item.unwrap();
        assert_eq!(chunk.model, "gpt-4o");
        if let Some(c) = chunk.first_content() {
            contents.push_str(c);
        }
        if let Some(f) = chunk.choices.first().and_then(|c| c.finish_reason.clone()) {
            finish = Some(f);
        }
    }

    assert_eq!(contents, "Hello");
    assert_eq!(finish.as_deref(), Some("stop"));
}

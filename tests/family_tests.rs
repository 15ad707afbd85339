//! Family routing scenarios
//!
//! An evaluator score of 42 lands in the middle band; identical requests
//! within the memo TTL must not invoke the evaluator again.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use modelmux::core::catalog::{FamilyConfig, ModelCatalog, ModelVariant, ScoreRange};
use modelmux::core::family::{EvaluationClient, FamilyRouter};
use modelmux::core::types::{
    AssistantMessage, ChatCompletion, ChatCompletionRequest, Choice, MessageRole, Usage,
};

use common::{chat_request, variant};

struct CountingEvaluator {
    answer: String,
    calls: AtomicU32,
}

#[async_trait]
impl EvaluationClient for CountingEvaluator {
    async fn complete(
        &self,
        _request: &ChatCompletionRequest,
        v: &ModelVariant,
        _timeout: Duration,
    ) -> modelmux::Result<ChatCompletion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ChatCompletion {
            id: "chatcmpl-judge".to_string(),
            object: "chat.completion".to_string(),
            created: 0,
            model: v.model_id.clone(),
            system_fingerprint: None,
            choices: vec![Choice {
                index: 0,
                message: AssistantMessage {
                    role: MessageRole::Assistant,
                    content: Some(self.answer.clone()),
                    tool_calls: None,
                },
                finish_reason: Some("stop".to_string()),
                logprobs: None,
            }],
            usage: Some(Usage {
                prompt_tokens: 120,
                completion_tokens: 1,
                total_tokens: 121,
                prompt_tokens_details: None,
                cost: None,
            }),
            provider: Some(v.provider.clone()),
        })
    }
}

fn family_f1() -> FamilyConfig {
    let range = |min: u8, max: u8, target: &str| ScoreRange {
        min_score: min,
        max_score: max,
        target_model: target.to_string(),
        reason: String::new(),
    };
    FamilyConfig {
        family_id: "f1".to_string(),
        evaluation_model_id: "judge".to_string(),
        evaluation_provider: "openai".to_string(),
        score_ranges: vec![
            range(1, 30, "model-a"),
            range(31, 70, "model-b"),
            range(71, 100, "model-c"),
        ],
        fallback_model: "model-b".to_string(),
        fallback_provider: "openai".to_string(),
        cache_duration_minutes: 5,
        evaluation_timeout_ms: 2000,
        enabled: true,
    }
}

fn router(answer: &str) -> (FamilyRouter, Arc<CountingEvaluator>) {
    let catalog = Arc::new(ModelCatalog::with_static(
        vec![variant("judge", "openai", 0.0001, 0.0004)],
        vec![family_f1()],
    ));
    let evaluator = Arc::new(CountingEvaluator {
        answer: answer.to_string(),
        calls: AtomicU32::new(0),
    });
    (FamilyRouter::new(catalog, evaluator.clone()), evaluator)
}

/// Score 42 routes into the 31..=70 band; the memo answers the repeat call
#[tokio::test]
async fn evaluator_score_routes_and_memoizes() {
    let (router, evaluator) = router("42");
    let request = chat_request("f1", "summarize this document for me");

    let first = router.evaluate_and_route("f1", &request).await.unwrap();
    assert_eq!(first.selected_model, "model-b");
    assert_eq!(first.complexity_score, 42);
    assert!(!first.from_cache);
    assert!(first.evaluation_cost > 0.0);
    assert!(first.evaluation_tokens > 0);

    let second = router.evaluate_and_route("f1", &request).await.unwrap();
    assert_eq!(second.selected_model, first.selected_model);
    assert_eq!(second.complexity_score, first.complexity_score);
    assert!(second.from_cache);

    assert_eq!(evaluator.calls.load(Ordering::SeqCst), 1);
}

/// Band edges are inclusive on both sides
#[tokio::test]
async fn band_edges_route_inclusively() {
    for (answer, expected) in [("30", "model-a"), ("31", "model-b"), ("70", "model-b"), ("71", "model-c")] {
        let (router, _) = router(answer);
        let result = router
            .evaluate_and_route("f1", &chat_request("f1", answer))
            .await
            .unwrap();
        assert_eq!(result.selected_model, expected, "score {}", answer);
    }
}

/// Out-of-range and unparseable answers clamp or default, never fail
#[tokio::test]
async fn evaluator_noise_is_tolerated() {
    let (router1, _) = router("940");
    let clamped = router1
        .evaluate_and_route("f1", &chat_request("f1", "x"))
        .await
        .unwrap();
    assert_eq!(clamped.complexity_score, 100);
    assert_eq!(clamped.selected_model, "model-c");

    let (router2, _) = router("hmm, tough one");
    let defaulted = router2
        .evaluate_and_route("f1", &chat_request("f1", "y"))
        .await
        .unwrap();
    assert_eq!(defaulted.complexity_score, 50);
    assert_eq!(defaulted.selected_model, "model-b");
}

/// Unknown families are the caller's error
#[tokio::test]
async fn unknown_family_rejects() {
    let (router, _) = router("42");
    assert!(
        router
            .evaluate_and_route("not-a-family", &chat_request("not-a-family", "x"))
            .await
            .is_err()
    );
}

//! Streaming fallback scenarios, end to end through the orchestrator
//!
//! Scripted adapters stand in for the upstreams: a candidate that fails
//! before its first chunk must fall back transparently, while a candidate
//! that fails mid-stream is committed and terminates the caller's stream
//! with its partial output persisted.

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::HeaderMap;
use uuid::Uuid;

use modelmux::core::adapters::{
    Adapter, AdapterError, AdapterSource, ErrorKind, StreamState, UpstreamResponse,
};
use modelmux::core::catalog::{AdapterKind, ModelCatalog, ModelVariant};
use modelmux::core::family::{EvaluationClient, FamilyRouter};
use modelmux::core::notify::{Notification, Notifier};
use modelmux::core::orchestrator::{
    ChatOutcome, Orchestrator, RequestIdentity, RequestSink, ServedRequest,
};
use modelmux::core::selector::{ProviderSelector, SelectionOptions};
use modelmux::core::types::{
    AssistantMessage, ChatCompletion, ChatCompletionChunk, ChatCompletionChunkChoice,
    ChatCompletionDelta, ChatCompletionRequest, Choice, MessageRole,
};

use common::{StaticMetrics, chat_request, variant};

/// What a scripted provider does when the orchestrator calls it
enum ScriptedCall {
    /// Fail before any chunk (connection or status error)
    Fail(AdapterError),
    /// Serve a chunk stream, possibly ending in an error
    Stream(Vec<Result<ChatCompletionChunk, AdapterError>>),
    /// Serve a plain response
    Full(ChatCompletion),
}

/// Adapter whose upstream behavior is scripted per provider
struct ScriptedAdapter {
    client: reqwest::Client,
    script: Mutex<HashMap<String, ScriptedCall>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedAdapter {
    fn new(script: HashMap<String, ScriptedCall>) -> Arc<Self> {
        Arc::new(Self {
            client: reqwest::Client::new(),
            script: Mutex::new(script),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Adapter for ScriptedAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::OpenAi
    }

    fn is_configured(&self, _variant: &ModelVariant) -> bool {
        true
    }

    fn validate_request(&self, _request: &ChatCompletionRequest, _variant: &ModelVariant) -> bool {
        true
    }

    fn transform_request(
        &self,
        _request: &ChatCompletionRequest,
        _variant: &ModelVariant,
        _streaming: bool,
    ) -> Result<serde_json::Value, AdapterError> {
        Ok(serde_json::json!({}))
    }

    fn transform_response(
        &self,
        _body: serde_json::Value,
        variant: &ModelVariant,
    ) -> Result<ChatCompletion, AdapterError> {
        Err(AdapterError::parse(&variant.provider, "not scripted"))
    }

    fn transform_stream_chunk(
        &self,
        _line: &str,
        _state: &mut StreamState,
        _variant: &ModelVariant,
    ) -> Result<Option<ChatCompletionChunk>, AdapterError> {
        Ok(None)
    }

    fn build_headers(&self, _variant: &ModelVariant) -> Result<HeaderMap, AdapterError> {
        Ok(HeaderMap::new())
    }

    fn endpoint(&self, _variant: &ModelVariant) -> String {
        String::new()
    }

    fn http_client(&self) -> &reqwest::Client {
        &self.client
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    async fn make_request(
        self: Arc<Self>,
        _request: &ChatCompletionRequest,
        variant: &ModelVariant,
        _streaming: bool,
    ) -> Result<UpstreamResponse, AdapterError> {
        self.calls.lock().unwrap().push(variant.provider.clone());
        match self.script.lock().unwrap().remove(&variant.provider) {
            Some(ScriptedCall::Fail(e)) => Err(e),
            Some(ScriptedCall::Stream(items)) => Ok(UpstreamResponse::Stream(Box::pin(
                futures::stream::iter(items),
            ))),
            Some(ScriptedCall::Full(completion)) => Ok(UpstreamResponse::Full(completion)),
            None => Err(AdapterError::network(
                &variant.provider,
                "no scripted call for this provider",
            )),
        }
    }
}

/// Hands the same scripted adapter out for every dialect
struct SingleAdapterSource(Arc<ScriptedAdapter>);

impl AdapterSource for SingleAdapterSource {
    fn create(&self, _kind: AdapterKind) -> Arc<dyn Adapter> {
        self.0.clone()
    }
}

/// Sink that records instead of writing to the database
#[derive(Default)]
struct RecordingSink {
    records: Mutex<Vec<ServedRequest>>,
}

#[async_trait]
impl RequestSink for RecordingSink {
    async fn persist(&self, served: ServedRequest) -> modelmux::Result<()> {
        self.records.lock().unwrap().push(served);
        Ok(())
    }
}

/// Notifier that records instead of delivering
#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<Notification>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: Notification) {
        self.events.lock().unwrap().push(event);
    }
}

/// Evaluation client for a pipeline without families; must never run
struct NeverEvaluator;

#[async_trait]
impl EvaluationClient for NeverEvaluator {
    async fn complete(
        &self,
        _request: &ChatCompletionRequest,
        _variant: &ModelVariant,
        _timeout: Duration,
    ) -> modelmux::Result<ChatCompletion> {
        Err(modelmux::GatewayError::Internal(
            "evaluator must not run in these scenarios".to_string(),
        ))
    }
}

struct Harness {
    orchestrator: Orchestrator,
    adapter: Arc<ScriptedAdapter>,
    sink: Arc<RecordingSink>,
    notifier: Arc<RecordingNotifier>,
}

/// Two candidates for `gpt-4o`: p1 is cheaper and always ranks first
fn harness(script: HashMap<String, ScriptedCall>) -> Harness {
    let catalog = Arc::new(ModelCatalog::with_static(
        vec![
            variant("gpt-4o", "p1", 0.003, 0.009),
            variant("gpt-4o", "p2", 0.005, 0.015),
        ],
        vec![],
    ));
    let selector = Arc::new(ProviderSelector::new(
        catalog.clone(),
        Arc::new(StaticMetrics::empty()),
    ));
    let family = Arc::new(FamilyRouter::new(catalog.clone(), Arc::new(NeverEvaluator)));

    let adapter = ScriptedAdapter::new(script);
    let sink = Arc::new(RecordingSink::default());
    let notifier = Arc::new(RecordingNotifier::default());

    let orchestrator = Orchestrator::new(
        catalog,
        selector,
        family,
        Arc::new(SingleAdapterSource(adapter.clone())),
        sink.clone(),
        notifier.clone(),
    );

    Harness {
        orchestrator,
        adapter,
        sink,
        notifier,
    }
}

fn identity() -> RequestIdentity {
    RequestIdentity {
        user_id: Uuid::nil(),
        api_key_id: Uuid::nil(),
        api_key_name: "test-key".to_string(),
    }
}

/// Economy ratio makes the p1-before-p2 ordering strict
fn options() -> SelectionOptions {
    SelectionOptions {
        ratio_sp: 0,
        ..Default::default()
    }
}

fn chunk(content: &str, finish: Option<&str>) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: "chatcmpl-scripted".to_string(),
        object: "chat.completion.chunk".to_string(),
        created: 1_700_000_000,
        model: "gpt-4o".to_string(),
        system_fingerprint: None,
        choices: vec![ChatCompletionChunkChoice {
            index: 0,
            delta: ChatCompletionDelta {
                role: None,
                content: Some(content.to_string()),
                tool_calls: None,
            },
            finish_reason: finish.map(str::to_string),
            logprobs: None,
        }],
        usage: None,
    }
}

fn transient_503(provider: &str) -> AdapterError {
    AdapterError::from_status(provider, 503, "overloaded")
}

/// Persistence runs detached from the caller's stream; wait for it
async fn persisted_record(sink: &RecordingSink) -> ServedRequest {
    for _ in 0..200 {
        if let Some(record) = sink.records.lock().unwrap().first().cloned() {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no record persisted within 2s");
}

/// A 503 before any chunk on p1 is invisible to the caller: p2's stream
/// arrives in full, p1 is reported to the notifier, and the persisted
/// record names p2
#[tokio::test]
async fn stream_fallback_before_first_chunk() {
    let h = harness(HashMap::from([
        ("p1".to_string(), ScriptedCall::Fail(transient_503("p1"))),
        (
            "p2".to_string(),
            ScriptedCall::Stream(vec![
                Ok(chunk("Hello ", None)),
                Ok(chunk("from p2", None)),
                Ok(chunk("", Some("stop"))),
            ]),
        ),
    ]));

    let mut request = chat_request("gpt-4o", "hi");
    request.stream = Some(true);

    let outcome = h
        .orchestrator
        .handle_chat_completion(request, identity(), options())
        .await
        .unwrap();
    let ChatOutcome::Stream(mut stream) = outcome else {
        panic!("expected a stream");
    };

    let mut content = String::new();
    let mut finish = None;
    while let Some(c) = stream.next().await {
        if let Some(text) = c.first_content() {
            content.push_str(text);
        }
        if let Some(f) = c.choices.first().and_then(|c| c.finish_reason.clone()) {
            finish = Some(f);
        }
    }
    assert_eq!(content, "Hello from p2");
    assert_eq!(finish.as_deref(), Some("stop"));

    assert_eq!(h.adapter.calls(), vec!["p1", "p2"]);

    let events = h.notifier.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].provider, "p1");
    drop(events);

    let record = persisted_record(&h.sink).await;
    assert_eq!(record.provider, "p2");
    assert_eq!(record.status, "ready_to_compute");
    assert!(record.streaming);
    assert!(record.error_message.is_none());
}

/// Two chunks then an error on p1: the committed candidate terminates the
/// caller's stream, p2 is never attempted, and the partial output is
/// persisted as ready-to-compute under p1
#[tokio::test]
async fn stream_error_mid_stream_terminates_without_fallback() {
    let h = harness(HashMap::from([
        (
            "p1".to_string(),
            ScriptedCall::Stream(vec![
                Ok(chunk("Hello, ", None)),
                Ok(chunk("wor", None)),
                Err(AdapterError {
                    provider: "p1".to_string(),
                    kind: ErrorKind::Upstream,
                    status: None,
                    message: "connection reset".to_string(),
                }),
            ]),
        ),
        (
            "p2".to_string(),
            ScriptedCall::Stream(vec![Ok(chunk("never served", Some("stop")))]),
        ),
    ]));

    let mut request = chat_request("gpt-4o", "hi");
    request.stream = Some(true);

    let outcome = h
        .orchestrator
        .handle_chat_completion(request, identity(), options())
        .await
        .unwrap();
    let ChatOutcome::Stream(mut stream) = outcome else {
        panic!("expected a stream");
    };

    let mut received = Vec::new();
    while let Some(c) = stream.next().await {
        received.push(c);
    }
    // both delivered chunks arrive, then the stream ends
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].first_content(), Some("Hello, "));
    assert_eq!(received[1].first_content(), Some("wor"));

    // the committed candidate is never replaced
    assert_eq!(h.adapter.calls(), vec!["p1"]);
    // mid-stream failure is not a fallback event
    assert!(h.notifier.events.lock().unwrap().is_empty());

    let record = persisted_record(&h.sink).await;
    assert_eq!(record.provider, "p1");
    assert_eq!(record.status, "ready_to_compute");
    assert!(record.streaming);
    assert!(record.error_message.is_none());

    let body = record.response_body.expect("partial response is persisted");
    assert_eq!(body["choices"][0]["message"]["content"], "Hello, wor");
}

/// The non-streaming loop falls back the same way: p1's 503 is suppressed
/// and p2's answer is served and persisted
#[tokio::test]
async fn plain_fallback_on_transient_error() {
    let answer = ChatCompletion {
        id: "chatcmpl-p2".to_string(),
        object: "chat.completion".to_string(),
        created: 1_700_000_000,
        model: "gpt-4o".to_string(),
        system_fingerprint: None,
        choices: vec![Choice {
            index: 0,
            message: AssistantMessage {
                role: MessageRole::Assistant,
                content: Some("pong".to_string()),
                tool_calls: None,
            },
            finish_reason: Some("stop".to_string()),
            logprobs: None,
        }],
        usage: None,
        provider: Some("p2".to_string()),
    };

    let h = harness(HashMap::from([
        ("p1".to_string(), ScriptedCall::Fail(transient_503("p1"))),
        ("p2".to_string(), ScriptedCall::Full(answer)),
    ]));

    let outcome = h
        .orchestrator
        .handle_chat_completion(chat_request("gpt-4o", "ping"), identity(), options())
        .await
        .unwrap();
    let ChatOutcome::Full(completion) = outcome else {
        panic!("expected a plain response");
    };
    assert_eq!(completion.choices[0].message.content.as_deref(), Some("pong"));

    assert_eq!(h.adapter.calls(), vec!["p1", "p2"]);
    assert_eq!(h.notifier.events.lock().unwrap().len(), 1);

    let record = persisted_record(&h.sink).await;
    assert_eq!(record.provider, "p2");
    assert_eq!(record.status, "ready_to_compute");
    assert!(!record.streaming);
}

/// A business error from the first candidate propagates with no fallback
#[tokio::test]
async fn business_error_stops_the_fallback_loop() {
    let h = harness(HashMap::from([
        (
            "p1".to_string(),
            ScriptedCall::Fail(AdapterError::from_status(
                "p1",
                422,
                r#"{"error":{"message":"bad schema"}}"#,
            )),
        ),
        (
            "p2".to_string(),
            ScriptedCall::Stream(vec![Ok(chunk("never served", Some("stop")))]),
        ),
    ]));

    let mut request = chat_request("gpt-4o", "hi");
    request.stream = Some(true);

    let err = h
        .orchestrator
        .handle_chat_completion(request, identity(), options())
        .await
        .unwrap_err();
    match err {
        modelmux::GatewayError::Upstream {
            provider, business, ..
        } => {
            assert_eq!(provider, "p1");
            assert!(business);
        }
        other => panic!("expected a business upstream error, got {:?}", other),
    }

    assert_eq!(h.adapter.calls(), vec!["p1"]);
    assert!(h.notifier.events.lock().unwrap().is_empty());

    let record = persisted_record(&h.sink).await;
    assert_eq!(record.provider, "p1");
    assert_eq!(record.status, "error");
    assert!(record.error_message.is_some());
}

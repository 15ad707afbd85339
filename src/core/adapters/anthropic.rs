//! Anthropic messages dialect
//!
//! Translates between the gateway's OpenAI-shaped types and the Anthropic
//! `/v1/messages` wire format. The streaming side folds Anthropic's typed
//! event sequence into normalized chunks and synthesizes the final usage
//! chunk, since the upstream reports usage across `message_start` and
//! `message_delta` rather than on one terminal chunk.

use std::time::Duration;

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::{Value, json};

use super::{Adapter, AdapterError, ErrorKind, StreamState};
use crate::core::catalog::{AdapterKind, ModelVariant};
use crate::core::types::{
    AssistantMessage, ChatCompletion, ChatCompletionChunk, ChatCompletionChunkChoice,
    ChatCompletionDelta, ChatCompletionRequest, ChatMessage, Choice, ContentPart, FunctionCall,
    FunctionCallDelta, MessageContent, MessageRole, PromptTokensDetails, StopSequence, Tool,
    ToolCall, ToolCallDelta, ToolChoice, ToolChoiceMode, Usage,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic adapter
pub struct AnthropicAdapter {
    client: reqwest::Client,
    request_timeout: Duration,
    stream_idle_timeout: Duration,
}

impl AnthropicAdapter {
    /// Create with an injected HTTP client
    pub fn new(
        client: reqwest::Client,
        request_timeout: Duration,
        stream_idle_timeout: Duration,
    ) -> Self {
        Self {
            client,
            request_timeout,
            stream_idle_timeout,
        }
    }

    fn map_stop_reason(reason: &str) -> String {
        match reason {
            "end_turn" | "stop_sequence" => "stop".to_string(),
            "max_tokens" => "length".to_string(),
            "tool_use" => "tool_calls".to_string(),
            other => other.to_string(),
        }
    }

    fn content_blocks(message: &ChatMessage) -> Vec<Value> {
        let mut blocks = Vec::new();

        match &message.content {
            None => {}
            Some(MessageContent::Text(t)) => {
                if !t.is_empty() {
                    blocks.push(json!({"type": "text", "text": t}));
                }
            }
            Some(MessageContent::Parts(parts)) => {
                for part in parts {
                    match part {
                        ContentPart::Text { text } => {
                            blocks.push(json!({"type": "text", "text": text}));
                        }
                        ContentPart::ImageUrl { image_url } => {
                            blocks.push(Self::image_block(&image_url.url));
                        }
                        ContentPart::ToolCall { id, name, arguments } => {
                            blocks.push(json!({
                                "type": "tool_use",
                                "id": id,
                                "name": name,
                                "input": arguments,
                            }));
                        }
                        ContentPart::ToolResult {
                            tool_call_id,
                            content,
                        } => {
                            blocks.push(json!({
                                "type": "tool_result",
                                "tool_use_id": tool_call_id,
                                "content": content,
                            }));
                        }
                    }
                }
            }
        }

        // Assistant tool calls become tool_use blocks on this dialect
        if let Some(tool_calls) = &message.tool_calls {
            for call in tool_calls {
                let input: Value = serde_json::from_str(&call.function.arguments)
                    .unwrap_or_else(|_| json!({}));
                blocks.push(json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.function.name,
                    "input": input,
                }));
            }
        }

        blocks
    }

    fn image_block(url: &str) -> Value {
        // data URIs carry the bytes inline; anything else is passed by URL
        if let Some(rest) = url.strip_prefix("data:") {
            if let Some((media_type, data)) = rest.split_once(";base64,") {
                return json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": media_type,
                        "data": data,
                    }
                });
            }
        }
        json!({
            "type": "image",
            "source": {"type": "url", "url": url}
        })
    }

    fn chunk_with(
        state: &StreamState,
        variant: &ModelVariant,
        delta: ChatCompletionDelta,
        finish_reason: Option<String>,
        usage: Option<Usage>,
    ) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: state.message_id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: Utc::now().timestamp(),
            model: variant.model_id.clone(),
            system_fingerprint: None,
            choices: vec![ChatCompletionChunkChoice {
                index: 0,
                delta,
                finish_reason,
                logprobs: None,
            }],
            usage,
        }
    }
}

#[async_trait::async_trait]
impl Adapter for AnthropicAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Anthropic
    }

    fn validate_request(&self, request: &ChatCompletionRequest, variant: &ModelVariant) -> bool {
        if request.tools.as_ref().is_some_and(|t| !t.is_empty())
            && !variant.supports_tool_calling
        {
            return false;
        }
        if request.has_image_content() && !variant.supports_vision {
            return false;
        }
        true
    }

    fn transform_request(
        &self,
        request: &ChatCompletionRequest,
        variant: &ModelVariant,
        streaming: bool,
    ) -> Result<Value, AdapterError> {
        let mut system_parts: Vec<String> = Vec::new();
        let mut messages: Vec<Value> = Vec::new();

        for message in &request.messages {
            match message.role {
                MessageRole::System => system_parts.push(message.text_content()),
                MessageRole::Tool => {
                    // Tool results travel as user-side tool_result blocks
                    let tool_use_id = message.tool_call_id.clone().unwrap_or_default();
                    messages.push(json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": tool_use_id,
                            "content": message.text_content(),
                        }]
                    }));
                }
                MessageRole::User | MessageRole::Assistant => {
                    let blocks = Self::content_blocks(message);
                    if blocks.is_empty() {
                        continue;
                    }
                    messages.push(json!({
                        "role": message.role.to_string(),
                        "content": blocks,
                    }));
                }
            }
        }

        let mut body = json!({
            "model": variant.provider_model_id,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });

        if !system_parts.is_empty() {
            body["system"] = json!(system_parts.join("\n\n"));
        }
        if let Some(t) = request.temperature {
            // Anthropic caps temperature at 1.0
            body["temperature"] = json!(t.min(1.0));
        }
        if let Some(p) = request.top_p {
            body["top_p"] = json!(p);
        }
        if let Some(stop) = &request.stop {
            body["stop_sequences"] = match stop {
                StopSequence::One(s) => json!([s]),
                StopSequence::Many(v) => json!(v),
            };
        }
        if let Some(tools) = &request.tools {
            let mapped: Vec<Value> = tools.iter().map(tool_json).collect();
            body["tools"] = json!(mapped);
        }
        if let Some(choice) = &request.tool_choice {
            match choice {
                ToolChoice::Mode(ToolChoiceMode::Auto) => {
                    body["tool_choice"] = json!({"type": "auto"});
                }
                ToolChoice::Mode(ToolChoiceMode::Required) => {
                    body["tool_choice"] = json!({"type": "any"});
                }
                // "none" has no Anthropic equivalent; dropping the tools
                // matches the caller's intent
                ToolChoice::Mode(ToolChoiceMode::None) => {
                    if let Some(obj) = body.as_object_mut() {
                        obj.remove("tools");
                    }
                }
                ToolChoice::Named(named) => {
                    body["tool_choice"] = json!({
                        "type": "tool",
                        "name": named.function.name,
                    });
                }
            }
        }
        if let Some(user) = &request.user {
            body["metadata"] = json!({"user_id": user});
        }
        if streaming {
            body["stream"] = json!(true);
        }

        if let Some(Value::Object(extra)) = &variant.extra_params {
            for (k, v) in extra {
                body[k] = v.clone();
            }
        }

        Ok(body)
    }

    fn transform_response(
        &self,
        body: Value,
        variant: &ModelVariant,
    ) -> Result<ChatCompletion, AdapterError> {
        let provider = &variant.provider;

        let id = body
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("msg_unknown")
            .to_string();

        let blocks = body
            .get("content")
            .and_then(|v| v.as_array())
            .ok_or_else(|| AdapterError::parse(provider, "response missing content blocks"))?;

        let mut text = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        for block in blocks {
            match block.get("type").and_then(|t| t.as_str()) {
                Some("text") => {
                    if let Some(t) = block.get("text").and_then(|t| t.as_str()) {
                        text.push_str(t);
                    }
                }
                Some("tool_use") => {
                    tool_calls.push(ToolCall {
                        id: block
                            .get("id")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        call_type: "function".to_string(),
                        function: FunctionCall {
                            name: block
                                .get("name")
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_string(),
                            arguments: block
                                .get("input")
                                .map(|v| v.to_string())
                                .unwrap_or_else(|| "{}".to_string()),
                        },
                    });
                }
                _ => {}
            }
        }

        let finish_reason = body
            .get("stop_reason")
            .and_then(|v| v.as_str())
            .map(Self::map_stop_reason);

        let usage = body.get("usage").map(|u| {
            let input = u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
            let output = u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
            let cached = u
                .get("cache_read_input_tokens")
                .and_then(|v| v.as_u64())
                .map(|v| v as u32);
            let prompt_tokens = input + cached.unwrap_or(0);
            Usage {
                prompt_tokens,
                completion_tokens: output,
                total_tokens: prompt_tokens + output,
                prompt_tokens_details: cached.map(|c| PromptTokensDetails {
                    cached_tokens: Some(c),
                }),
                cost: None,
            }
        });

        Ok(ChatCompletion {
            id,
            object: "chat.completion".to_string(),
            created: Utc::now().timestamp(),
            model: variant.model_id.clone(),
            system_fingerprint: None,
            choices: vec![Choice {
                index: 0,
                message: AssistantMessage {
                    role: MessageRole::Assistant,
                    content: if text.is_empty() && !tool_calls.is_empty() {
                        None
                    } else {
                        Some(text)
                    },
                    tool_calls: if tool_calls.is_empty() {
                        None
                    } else {
                        Some(tool_calls)
                    },
                },
                finish_reason,
                logprobs: None,
            }],
            usage,
            provider: Some(variant.provider.clone()),
        })
    }

    fn transform_stream_chunk(
        &self,
        line: &str,
        state: &mut StreamState,
        variant: &ModelVariant,
    ) -> Result<Option<ChatCompletionChunk>, AdapterError> {
        if line == "[DONE]" {
            return Ok(None);
        }

        let event: Value = serde_json::from_str(line)
            .map_err(|e| AdapterError::parse(&variant.provider, format!("bad event: {}", e)))?;

        match event.get("type").and_then(|t| t.as_str()) {
            Some("message_start") => {
                if let Some(message) = event.get("message") {
                    if let Some(id) = message.get("id").and_then(|v| v.as_str()) {
                        state.message_id = id.to_string();
                    }
                    if let Some(usage) = message.get("usage") {
                        state.input_tokens = usage
                            .get("input_tokens")
                            .and_then(|v| v.as_u64())
                            .unwrap_or(0) as u32;
                        state.cached_tokens = usage
                            .get("cache_read_input_tokens")
                            .and_then(|v| v.as_u64())
                            .map(|v| v as u32);
                    }
                }
                Ok(Some(Self::chunk_with(
                    state,
                    variant,
                    ChatCompletionDelta {
                        role: Some(MessageRole::Assistant),
                        content: None,
                        tool_calls: None,
                    },
                    None,
                    None,
                )))
            }
            Some("content_block_start") => {
                let index = event.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                let block = event.get("content_block");
                match block.and_then(|b| b.get("type")).and_then(|t| t.as_str()) {
                    Some("tool_use") => Ok(Some(Self::chunk_with(
                        state,
                        variant,
                        ChatCompletionDelta {
                            role: None,
                            content: None,
                            tool_calls: Some(vec![ToolCallDelta {
                                index,
                                id: block
                                    .and_then(|b| b.get("id"))
                                    .and_then(|v| v.as_str())
                                    .map(str::to_string),
                                tool_type: Some("function".to_string()),
                                function: Some(FunctionCallDelta {
                                    name: block
                                        .and_then(|b| b.get("name"))
                                        .and_then(|v| v.as_str())
                                        .map(str::to_string),
                                    arguments: Some(String::new()),
                                }),
                            }]),
                        },
                        None,
                        None,
                    ))),
                    _ => Ok(None),
                }
            }
            Some("content_block_delta") => {
                let index = event.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
                let delta = event.get("delta");
                match delta.and_then(|d| d.get("type")).and_then(|t| t.as_str()) {
                    Some("text_delta") => {
                        let text = delta
                            .and_then(|d| d.get("text"))
                            .and_then(|v| v.as_str())
                            .unwrap_or_default();
                        Ok(Some(Self::chunk_with(
                            state,
                            variant,
                            ChatCompletionDelta {
                                role: None,
                                content: Some(text.to_string()),
                                tool_calls: None,
                            },
                            None,
                            None,
                        )))
                    }
                    Some("input_json_delta") => {
                        let partial = delta
                            .and_then(|d| d.get("partial_json"))
                            .and_then(|v| v.as_str())
                            .unwrap_or_default();
                        Ok(Some(Self::chunk_with(
                            state,
                            variant,
                            ChatCompletionDelta {
                                role: None,
                                content: None,
                                tool_calls: Some(vec![ToolCallDelta {
                                    index,
                                    id: None,
                                    tool_type: None,
                                    function: Some(FunctionCallDelta {
                                        name: None,
                                        arguments: Some(partial.to_string()),
                                    }),
                                }]),
                            },
                            None,
                            None,
                        )))
                    }
                    _ => Ok(None),
                }
            }
            Some("message_delta") => {
                if let Some(usage) = event.get("usage") {
                    if let Some(out) = usage.get("output_tokens").and_then(|v| v.as_u64()) {
                        state.output_tokens = out as u32;
                    }
                }
                if let Some(reason) = event
                    .pointer("/delta/stop_reason")
                    .and_then(|v| v.as_str())
                {
                    state.finish_reason = Some(Self::map_stop_reason(reason));
                }
                Ok(None)
            }
            Some("message_stop") => {
                // Synthesized terminal chunk carrying finish reason and usage
                let prompt_tokens = state.input_tokens + state.cached_tokens.unwrap_or(0);
                let usage = Usage {
                    prompt_tokens,
                    completion_tokens: state.output_tokens,
                    total_tokens: prompt_tokens + state.output_tokens,
                    prompt_tokens_details: state.cached_tokens.map(|c| PromptTokensDetails {
                        cached_tokens: Some(c),
                    }),
                    cost: None,
                };
                Ok(Some(Self::chunk_with(
                    state,
                    variant,
                    ChatCompletionDelta::default(),
                    state.finish_reason.clone().or_else(|| Some("stop".to_string())),
                    Some(usage),
                )))
            }
            Some("error") => {
                let message = event
                    .pointer("/error/message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("upstream stream error");
                Err(AdapterError {
                    provider: variant.provider.clone(),
                    kind: ErrorKind::Upstream,
                    status: None,
                    message: message.to_string(),
                })
            }
            // ping and future event types
            _ => Ok(None),
        }
    }

    fn build_headers(&self, variant: &ModelVariant) -> Result<HeaderMap, AdapterError> {
        let key = std::env::var(&variant.api_key_ref).map_err(|_| AdapterError {
            provider: variant.provider.clone(),
            kind: ErrorKind::Auth,
            status: None,
            message: format!("credential '{}' not set", variant.api_key_ref),
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&key).map_err(|_| AdapterError {
                provider: variant.provider.clone(),
                kind: ErrorKind::Auth,
                status: None,
                message: format!("credential '{}' is not a valid header value", variant.api_key_ref),
            })?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        Ok(headers)
    }

    fn endpoint(&self, variant: &ModelVariant) -> String {
        format!("{}/messages", variant.base_url.trim_end_matches('/'))
    }

    fn http_client(&self) -> &reqwest::Client {
        &self.client
    }

    fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    fn stream_idle_timeout(&self) -> Duration {
        self.stream_idle_timeout
    }
}

fn tool_json(tool: &Tool) -> Value {
    json!({
        "name": tool.function.name,
        "description": tool.function.description,
        "input_schema": tool
            .function
            .parameters
            .clone()
            .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::PricingMethod;

    fn variant() -> ModelVariant {
        ModelVariant {
            model_id: "claude-sonnet".to_string(),
            provider: "anthropic".to_string(),
            provider_model_id: "claude-sonnet-4-20250514".to_string(),
            adapter: AdapterKind::Anthropic,
            base_url: "https://api.anthropic.com/v1".to_string(),
            api_key_ref: "ANTHROPIC_API_KEY".to_string(),
            extra_params: None,
            context_window: Some(200_000),
            supports_tool_calling: true,
            supports_vision: true,
            supports_input_cache: true,
            price_per_input_token: 0.003,
            price_per_output_token: 0.015,
            pricing_method: PricingMethod::AnthropicCache,
            tokenizer_name: Some("cl100k_base".to_string()),
        }
    }

    fn adapter() -> AnthropicAdapter {
        AnthropicAdapter::new(
            reqwest::Client::new(),
            Duration::from_secs(60),
            Duration::from_secs(90),
        )
    }

    fn request_with(messages: Vec<ChatMessage>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "claude-sonnet".to_string(),
            messages,
            temperature: Some(1.5),
            top_p: None,
            max_tokens: None,
            stream: None,
            stream_options: None,
            stop: None,
            presence_penalty: None,
            frequency_penalty: None,
            tools: None,
            tool_choice: None,
            provider: None,
            compression: None,
            user: None,
        }
    }

    #[test]
    fn system_messages_are_lifted_and_temperature_capped() {
        let req = request_with(vec![
            ChatMessage {
                role: MessageRole::System,
                content: Some(MessageContent::Text("be terse".to_string())),
                name: None,
                tool_calls: None,
                tool_call_id: None,
            },
            ChatMessage {
                role: MessageRole::User,
                content: Some(MessageContent::Text("hi".to_string())),
                name: None,
                tool_calls: None,
                tool_call_id: None,
            },
        ]);
        let body = adapter().transform_request(&req, &variant(), false).unwrap();

        assert_eq!(body["system"], "be terse");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(body["temperature"], 1.0);
    }

    #[test]
    fn tool_messages_become_tool_result_blocks() {
        let req = request_with(vec![ChatMessage {
            role: MessageRole::Tool,
            content: Some(MessageContent::Text("42".to_string())),
            name: None,
            tool_calls: None,
            tool_call_id: Some("toolu_1".to_string()),
        }]);
        let body = adapter().transform_request(&req, &variant(), false).unwrap();

        let content = &body["messages"][0]["content"][0];
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(content["type"], "tool_result");
        assert_eq!(content["tool_use_id"], "toolu_1");
    }

    #[test]
    fn response_maps_blocks_and_usage() {
        let body = json!({
            "id": "msg_01",
            "content": [
                {"type": "text", "text": "Hello"},
                {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "Paris"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 5, "cache_read_input_tokens": 90}
        });
        let completion = adapter().transform_response(body, &variant()).unwrap();

        assert_eq!(completion.model, "claude-sonnet");
        let choice = &completion.choices[0];
        assert_eq!(choice.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(choice.message.content.as_deref(), Some("Hello"));
        assert_eq!(choice.message.tool_calls.as_ref().unwrap()[0].function.name, "get_weather");

        let usage = completion.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 100);
        assert_eq!(usage.cached_tokens(), Some(90));
    }

    #[test]
    fn stream_events_fold_into_chunks_with_final_usage() {
        let a = adapter();
        let v = variant();
        let mut state = StreamState::default();

        let start = a
            .transform_stream_chunk(
                r#"{"type":"message_start","message":{"id":"msg_01","usage":{"input_tokens":12}}}"#,
                &mut state,
                &v,
            )
            .unwrap()
            .unwrap();
        assert_eq!(start.id, "msg_01");
        assert_eq!(start.choices[0].delta.role, Some(MessageRole::Assistant));

        let text = a
            .transform_stream_chunk(
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
                &mut state,
                &v,
            )
            .unwrap()
            .unwrap();
        assert_eq!(text.first_content(), Some("Hi"));

        assert!(a
            .transform_stream_chunk(
                r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":7}}"#,
                &mut state,
                &v,
            )
            .unwrap()
            .is_none());

        let fin = a
            .transform_stream_chunk(r#"{"type":"message_stop"}"#, &mut state, &v)
            .unwrap()
            .unwrap();
        assert_eq!(fin.choices[0].finish_reason.as_deref(), Some("stop"));
        let usage = fin.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 12);
        assert_eq!(usage.completion_tokens, 7);
    }

    #[test]
    fn error_events_fail_the_stream() {
        let mut state = StreamState::default();
        let err = adapter()
            .transform_stream_chunk(
                r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
                &mut state,
                &variant(),
            )
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Upstream);
        assert!(!err.is_business());
    }
}

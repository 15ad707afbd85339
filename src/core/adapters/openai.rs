//! OpenAI chat-completions dialect
//!
//! Speaks the `/chat/completions` wire format used by OpenAI, Azure OpenAI,
//! DeepInfra, DeepSeek and most compatible hosts. Transforms are nearly
//! pass-through; the adapter still rewrites model ids in both directions and
//! forces usage reporting on streams.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::{Value, json};

use super::{Adapter, AdapterError, StreamState};
use crate::core::catalog::{AdapterKind, ModelVariant};
use crate::core::types::{
    ChatCompletion, ChatCompletionChunk, ChatCompletionRequest, ChatMessage, ContentPart,
    MessageContent, StopSequence,
};

/// OpenAI-compatible adapter
pub struct OpenAiAdapter {
    client: reqwest::Client,
    request_timeout: Duration,
    stream_idle_timeout: Duration,
}

impl OpenAiAdapter {
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

    fn message_json(message: &ChatMessage) -> Value {
        let mut m = json!({ "role": message.role.to_string() });

        match &message.content {
            None => {}
            Some(MessageContent::Text(t)) => m["content"] = json!(t),
            Some(MessageContent::Parts(parts)) => {
                let wire_parts: Vec<Value> = parts
                    .iter()
                    .map(|p| match p {
                        ContentPart::Text { text } => json!({"type": "text", "text": text}),
                        ContentPart::ImageUrl { image_url } => {
                            json!({"type": "image_url", "image_url": image_url})
                        }
                        // Internal-only parts are flattened to text on this dialect
                        ContentPart::ToolCall { name, arguments, .. } => json!({
                            "type": "text",
                            "text": format!("[tool call {}: {}]", name, arguments),
                        }),
                        ContentPart::ToolResult { content, .. } => {
                            json!({"type": "text", "text": content})
                        }
                    })
                    .collect();
                m["content"] = json!(wire_parts);
            }
        }

        if let Some(name) = &message.name {
            m["name"] = json!(name);
        }
        if let Some(tool_calls) = &message.tool_calls {
            m["tool_calls"] = json!(tool_calls);
        }
        if let Some(id) = &message.tool_call_id {
            m["tool_call_id"] = json!(id);
        }

        m
    }
}

#[async_trait::async_trait]
impl Adapter for OpenAiAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::OpenAi
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
        let messages: Vec<Value> = request.messages.iter().map(Self::message_json).collect();

        let mut body = json!({
            "model": variant.provider_model_id,
            "messages": messages,
        });

        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(p) = request.top_p {
            body["top_p"] = json!(p);
        }
        if let Some(m) = request.max_tokens {
            body["max_tokens"] = json!(m);
        }
        if let Some(stop) = &request.stop {
            body["stop"] = match stop {
                StopSequence::One(s) => json!(s),
                StopSequence::Many(v) => json!(v),
            };
        }
        if let Some(p) = request.presence_penalty {
            body["presence_penalty"] = json!(p);
        }
        if let Some(f) = request.frequency_penalty {
            body["frequency_penalty"] = json!(f);
        }
        if let Some(tools) = &request.tools {
            body["tools"] = json!(tools);
        }
        if let Some(choice) = &request.tool_choice {
            body["tool_choice"] = json!(choice);
        }
        if let Some(user) = &request.user {
            body["user"] = json!(user);
        }

        if streaming {
            body["stream"] = json!(true);
            // Usage must be observable on the final chunk for accounting
            body["stream_options"] = json!({"include_usage": true});
        }

        // Opaque registry extras are merged at the root, never inspected
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
        let mut completion: ChatCompletion = serde_json::from_value(body)
            .map_err(|e| AdapterError::parse(&variant.provider, format!("bad response: {}", e)))?;

        completion.model = variant.model_id.clone();
        completion.provider = Some(variant.provider.clone());
        Ok(completion)
    }

    fn transform_stream_chunk(
        &self,
        line: &str,
        _state: &mut StreamState,
        variant: &ModelVariant,
    ) -> Result<Option<ChatCompletionChunk>, AdapterError> {
        if line == "[DONE]" {
            return Ok(None);
        }

        let mut chunk: ChatCompletionChunk = serde_json::from_str(line)
            .map_err(|e| AdapterError::parse(&variant.provider, format!("bad chunk: {}", e)))?;

        chunk.model = variant.model_id.clone();
        Ok(Some(chunk))
    }

    fn build_headers(&self, variant: &ModelVariant) -> Result<HeaderMap, AdapterError> {
        let key = std::env::var(&variant.api_key_ref).map_err(|_| AdapterError {
            provider: variant.provider.clone(),
            kind: super::ErrorKind::Auth,
            status: None,
            message: format!("credential '{}' not set", variant.api_key_ref),
        })?;

        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(&format!("Bearer {}", key)).map_err(|_| {
            AdapterError {
                provider: variant.provider.clone(),
                kind: super::ErrorKind::Auth,
                status: None,
                message: format!("credential '{}' is not a valid header value", variant.api_key_ref),
            }
        })?;
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }

    fn endpoint(&self, variant: &ModelVariant) -> String {
        format!("{}/chat/completions", variant.base_url.trim_end_matches('/'))
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

//! AI endpoints (OpenAI compatible)
//!
//! Chat completions with streaming, the legacy text completion facade, and
//! the no-execution cost estimate.

use actix_web::{HttpRequest, HttpResponse, web};
use futures::StreamExt;
use futures::stream;
use serde_json::json;
use tracing::info;

use super::selection_options;
use crate::core::orchestrator::{ChatOutcome, validate_request};
use crate::core::selector::estimate_tokens;
use crate::core::types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatMessage, CompletionChoice, CompletionRequest,
    CompletionResponse, CostAlternative, CostEstimateResponse, MessageContent, MessageRole, Usage,
};
use crate::server::sse::Event;
use crate::server::{AppState, auth};
use crate::utils::error::{GatewayError, Result};

/// Chat completions endpoint
///
/// OpenAI-compatible chat completions supporting streaming and
/// non-streaming responses.
pub async fn chat_completions(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<ChatCompletionRequest>,
) -> Result<HttpResponse> {
    let request = body.into_inner();
    info!("Chat completion request for model: {}", request.model);

    let identity = auth::authenticate(&state, &req).await?;
    let options = selection_options(&state, &req, request.provider.as_ref())?;

    match state
        .orchestrator
        .handle_chat_completion(request, identity, options)
        .await?
    {
        ChatOutcome::Full(completion) => Ok(HttpResponse::Ok().json(completion)),
        ChatOutcome::Stream(chunks) => Ok(sse_response(
            chunks.map(|chunk| serde_json::to_string(&chunk).unwrap_or_default()),
        )),
    }
}

/// Text completions endpoint (legacy)
///
/// Decomposed into one chat call per prompt; answers keep prompt order.
pub async fn completions(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CompletionRequest>,
) -> Result<HttpResponse> {
    let request = body.into_inner();
    info!("Text completion request for model: {}", request.model);

    let identity = auth::authenticate(&state, &req).await?;
    let options = selection_options(&state, &req, request.provider.as_ref())?;

    let prompts = request.prompt.as_list();
    if prompts.is_empty() {
        return Err(GatewayError::Validation("prompt must not be empty".to_string()));
    }

    let streaming = request.stream.unwrap_or(false);
    if streaming {
        let mut prompts = prompts;
        let (Some(prompt), None) = (prompts.pop(), prompts.pop()) else {
            return Err(GatewayError::Validation(
                "streaming supports a single prompt".to_string(),
            ));
        };
        let chat = chat_request_for_prompt(&request, prompt, true);
        return match state
            .orchestrator
            .handle_chat_completion(chat, identity, options)
            .await?
        {
            ChatOutcome::Stream(chunks) => {
                Ok(sse_response(chunks.map(|c| text_chunk_json(&c))))
            }
            ChatOutcome::Full(_) => Err(GatewayError::Internal(
                "expected a stream for a streaming completion".to_string(),
            )),
        };
    }

    let mut choices = Vec::with_capacity(prompts.len());
    let mut usage = Usage::default();
    let mut id = None;
    let mut model = request.model.clone();
    let mut created = 0;

    for (index, prompt) in prompts.into_iter().enumerate() {
        let chat = chat_request_for_prompt(&request, prompt, false);
        let outcome = state
            .orchestrator
            .handle_chat_completion(chat, identity.clone(), options.clone())
            .await?;
        let ChatOutcome::Full(completion) = outcome else {
            return Err(GatewayError::Internal(
                "expected a plain response for a non-streaming completion".to_string(),
            ));
        };

        id.get_or_insert(completion.id.clone());
        model = completion.model.clone();
        created = completion.created;
        if let Some(u) = &completion.usage {
            usage.prompt_tokens += u.prompt_tokens;
            usage.completion_tokens += u.completion_tokens;
            usage.total_tokens += u.total_tokens;
        }

        let choice = completion.choices.into_iter().next();
        choices.push(CompletionChoice {
            text: choice
                .as_ref()
                .and_then(|c| c.message.content.clone())
                .unwrap_or_default(),
            index: index as u32,
            finish_reason: choice.and_then(|c| c.finish_reason),
            logprobs: None,
        });
    }

    Ok(HttpResponse::Ok().json(CompletionResponse {
        id: id.unwrap_or_else(|| format!("cmpl-{}", uuid::Uuid::new_v4())),
        object: "text_completion".to_string(),
        created,
        model,
        choices,
        usage: Some(usage),
    }))
}

/// Cost estimate endpoint; ranks candidates without executing anything
pub async fn estimate(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<ChatCompletionRequest>,
) -> Result<HttpResponse> {
    let request = body.into_inner();
    let identity = auth::authenticate(&state, &req).await?;
    let options = selection_options(&state, &req, request.provider.as_ref())?;

    validate_request(&request)?;

    let candidates = state
        .selector
        .filter_providers(&request, identity.user_id, &options)
        .await?;

    let tokens = estimate_tokens(&request);
    let cost = |input_price: f64, output_price: f64| {
        (f64::from(tokens.input_tokens) * input_price
            + f64::from(tokens.max_tokens) * output_price)
            / 1000.0
    };

    let mut ranked = candidates.iter().map(|c| {
        (
            c.variant.provider.clone(),
            c.variant.model_id.clone(),
            cost(c.variant.price_per_input_token, c.variant.price_per_output_token),
        )
    });

    // filter_providers errors instead of returning an empty set
    let Some((provider, model, estimated_cost)) = ranked.next() else {
        return Err(GatewayError::Internal(
            "selector returned an empty candidate set".to_string(),
        ));
    };
    let alternatives = ranked
        .map(|(provider, model, estimated_cost)| CostAlternative {
            provider,
            model,
            estimated_cost,
        })
        .collect();

    Ok(HttpResponse::Ok().json(CostEstimateResponse {
        estimated_cost,
        currency: "USD".to_string(),
        provider,
        model,
        alternatives,
    }))
}

/// SSE response with the standard no-buffering headers and terminal `[DONE]`
fn sse_response<S>(payloads: S) -> HttpResponse
where
    S: futures::Stream<Item = String> + 'static,
{
    let body = payloads
        .map(|payload| Ok::<_, GatewayError>(Event::data(payload).to_bytes()))
        .chain(stream::once(async {
            Ok::<_, GatewayError>(Event::done().to_bytes())
        }));

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .insert_header(("Connection", "keep-alive"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(body)
}

fn chat_request_for_prompt(
    request: &CompletionRequest,
    prompt: String,
    streaming: bool,
) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: request.model.clone(),
        messages: vec![ChatMessage {
            role: MessageRole::User,
            content: Some(MessageContent::Text(prompt)),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }],
        temperature: request.temperature,
        top_p: request.top_p,
        max_tokens: request.max_tokens,
        stream: Some(streaming),
        stream_options: None,
        stop: request.stop.clone(),
        presence_penalty: None,
        frequency_penalty: None,
        tools: None,
        tool_choice: None,
        provider: request.provider.clone(),
        compression: None,
        user: request.user.clone(),
    }
}

/// Re-frame a chat chunk as a legacy text completion chunk
fn text_chunk_json(chunk: &ChatCompletionChunk) -> String {
    let choice = chunk.choices.first();
    json!({
        "id": chunk.id,
        "object": "text_completion",
        "created": chunk.created,
        "model": chunk.model,
        "choices": [{
            "text": choice.and_then(|c| c.delta.content.as_deref()).unwrap_or_default(),
            "index": 0,
            "finish_reason": choice.and_then(|c| c.finish_reason.clone()),
            "logprobs": null,
        }],
    })
    .to_string()
}

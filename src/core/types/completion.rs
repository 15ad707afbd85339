//! Legacy text completion types
//!
//! `/v1/completion` is served by decomposing the prompt(s) into one chat call
//! each; these types only exist at the HTTP boundary.

use serde::{Deserialize, Serialize};

use super::chat::{ProviderPreference, StopSequence};
use super::response::Usage;

/// Legacy text completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model to use
    pub model: String,
    /// Prompt or list of prompts
    pub prompt: PromptInput,
    /// Maximum tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Top-p sampling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Whether to stream the response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    /// Stop sequences
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequence>,
    /// Caller-supplied provider whitelist
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderPreference>,
    /// End-user identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// Prompt input: a single string or a list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PromptInput {
    /// One prompt
    One(String),
    /// Several prompts, answered independently
    Many(Vec<String>),
}

impl PromptInput {
    /// Normalize to a list of prompts
    pub fn as_list(&self) -> Vec<String> {
        match self {
            PromptInput::One(p) => vec![p.clone()],
            PromptInput::Many(ps) => ps.clone(),
        }
    }
}

/// Legacy text completion response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Unique identifier
    pub id: String,
    /// Object type (always "text_completion")
    pub object: String,
    /// Unix timestamp of creation
    pub created: i64,
    /// Model that produced the completion
    pub model: String,
    /// Completion choices, one per prompt
    pub choices: Vec<CompletionChoice>,
    /// Aggregated token usage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// One text completion choice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionChoice {
    /// Generated text
    pub text: String,
    /// Index of the prompt this answers
    pub index: u32,
    /// Reason the generation stopped
    pub finish_reason: Option<String>,
    /// Log probabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<serde_json::Value>,
}

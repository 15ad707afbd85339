//! OpenAI-compatible API types
//!
//! Wire types shared by the HTTP surface, the adapters, and the
//! orchestrator. Content parts and tool-choice are modeled as sum types;
//! provider-specific extras stay opaque until the adapter boundary.

pub mod chat;
pub mod completion;
pub mod estimate;
pub mod response;
pub mod streaming;

pub use chat::{
    ChatCompletionRequest, ChatMessage, ContentPart, FunctionDef, ImageUrl, MessageContent,
    MessageRole, NamedToolChoice, ProviderPreference, StopSequence, StreamOptions, Tool,
    ToolChoice, ToolChoiceMode,
};
pub use completion::{CompletionChoice, CompletionRequest, CompletionResponse, PromptInput};
pub use estimate::{CostAlternative, CostEstimateResponse};
pub use response::{
    AssistantMessage, ChatCompletion, Choice, FunctionCall, PromptTokensDetails, ToolCall, Usage,
};
pub use streaming::{
    ChatCompletionChunk, ChatCompletionChunkChoice, ChatCompletionDelta, FunctionCallDelta,
    ToolCallDelta,
};

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One concrete (provider, model) deployment
///
/// `(model_id, provider)` is unique; rows are populated by an external
/// registry and never mutated by the gateway.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "models")]
pub struct Model {
    /// Surrogate key
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Caller-facing model identifier (may contain `/`)
    pub model_id: String,

    /// Provider name (e.g. `openai`, `bedrock`)
    pub provider: String,

    /// Identifier the upstream expects
    pub provider_model_id: String,

    /// Wire dialect this deployment speaks
    pub adapter: String,

    /// Upstream base URL
    pub base_url: String,

    /// Name of the environment variable holding the API key
    pub api_key_ref: String,

    /// Opaque extra parameters handed to the adapter
    pub extra_params: Option<Json>,

    /// Maximum input tokens, when known
    pub context_window: Option<i64>,

    /// Tool calling supported
    pub supports_tool_calling: bool,

    /// Vision input supported
    pub supports_vision: bool,

    /// Prompt caching supported
    pub supports_input_cache: bool,

    /// USD per 1000 input tokens
    pub price_per_input_token: f64,

    /// USD per 1000 output tokens
    pub price_per_output_token: f64,

    /// Pricing rule name (see accounting)
    pub pricing_method: String,

    /// Tokenizer used when the upstream reports no usage
    pub tokenizer_name: Option<String>,

    /// Creation timestamp
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

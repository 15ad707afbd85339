use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Status strings for a request record. Bit-exact wire values.
pub mod status {
    /// Served; waiting for the accounting worker
    pub const READY_TO_COMPUTE: &str = "ready_to_compute";
    /// Accounted and debited
    pub const COMPLETED: &str = "completed";
    /// Terminal failure; excluded from accounting
    pub const ERROR: &str = "error";
}

/// Durable record of one gateway request
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "requests")]
pub struct Model {
    /// Request id
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning user
    pub user_id: Uuid,

    /// Name of the API key that authenticated the call
    pub api_key_name: String,

    /// Provider that (last) served the request
    pub provider: String,

    /// Caller-facing model id
    pub model_id: String,

    /// Whether the response was streamed
    pub streaming: bool,

    /// `ready_to_compute`, `completed` or `error`
    pub status: String,

    /// Input tokens; null until tokenized
    pub input_tokens: Option<i64>,

    /// Output tokens; null until tokenized
    pub output_tokens: Option<i64>,

    /// Cached input tokens; null means unknown (treated as no cache)
    pub cached_tokens: Option<i64>,

    /// Cost of the family evaluator call attributed to this request
    pub evaluation_cost: Option<f64>,

    /// Wallet debit for this request, once accounted
    pub transaction_id: Option<Uuid>,

    /// Terminal error message, if any
    pub error_message: Option<String>,

    /// Creation timestamp
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Large request/response payloads
    #[sea_orm(has_one = "super::request_content::Entity")]
    Content,

    /// Streaming latency metrics
    #[sea_orm(has_one = "super::metric::Entity")]
    Metric,

    /// Wallet debit
    #[sea_orm(
        belongs_to = "super::transaction::Entity",
        from = "Column::TransactionId",
        to = "super::transaction::Column::Id"
    )]
    Transaction,
}

impl Related<super::request_content::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Content.def()
    }
}

impl Related<super::metric::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Metric.def()
    }
}

impl Related<super::transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transaction.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

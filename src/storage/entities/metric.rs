use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Streaming latency metrics for one request
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "metrics")]
pub struct Model {
    /// Surrogate key
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Request these metrics belong to
    pub request_id: Uuid,

    /// Wall time from dispatch to stream end
    pub total_duration_ms: Option<i64>,

    /// Time to first forwarded chunk
    pub time_to_first_chunk_ms: Option<i64>,

    /// Time between first and last chunk
    pub dt_first_last_chunk_ms: Option<i64>,

    /// Output tokens per second; only when all durations and counts exist
    pub throughput_tokens_per_s: Option<f64>,

    /// True when throughput could be derived
    pub is_metrics_calculated: bool,

    /// Creation timestamp
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Owning request
    #[sea_orm(
        belongs_to = "super::request::Entity",
        from = "Column::RequestId",
        to = "super::request::Column::Id"
    )]
    Request,
}

impl Related<super::request::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Request.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

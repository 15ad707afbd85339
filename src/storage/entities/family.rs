use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A synthetic "family" model id resolved at request time by an evaluator
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "family")]
pub struct Model {
    /// Surrogate key
    #[sea_orm(primary_key)]
    pub id: i64,

    /// The family's caller-facing model id
    #[sea_orm(unique)]
    pub family_id: String,

    /// Cheap judge model
    pub evaluation_model_id: String,

    /// Provider of the judge model
    pub evaluation_provider: String,

    /// Ordered `{min_score, max_score, target_model, reason}` list as JSON
    pub score_ranges: Json,

    /// Model used when no range matches or evaluation fails
    pub fallback_model: String,

    /// Provider of the fallback model
    pub fallback_provider: String,

    /// Routing memo TTL
    pub cache_duration_minutes: i64,

    /// Judge call timeout
    pub evaluation_timeout_ms: i64,

    /// Disabled families reject requests
    pub enabled: bool,

    /// Creation timestamp
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

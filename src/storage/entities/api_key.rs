use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// API key record; only a SHA-256 digest of the key material is stored
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "api_keys")]
pub struct Model {
    /// Key id
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning user
    pub user_id: Uuid,

    /// Human-readable key name, recorded on each request
    pub name: String,

    /// SHA-256 hex digest of the key
    #[sea_orm(unique)]
    pub key_hash: String,

    /// Disabled keys fail authentication
    pub disabled: bool,

    /// Last request authenticated with this key
    pub last_used_at: Option<DateTimeUtc>,

    /// Creation timestamp
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Raw request payload and reconstructed response, split from `requests` so
/// large JSON never loads during selection or scoring.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "requests_content")]
pub struct Model {
    /// Request id
    #[sea_orm(primary_key, auto_increment = false)]
    pub request_id: Uuid,

    /// Caller's request body
    pub request_body: Json,

    /// Canonical (reconstructed for streams) response body
    pub response_body: Option<Json>,
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

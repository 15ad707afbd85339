use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Transaction type strings
pub mod kind {
    /// Wallet debit
    pub const DEBIT: &str = "debit";
    /// Wallet credit
    pub const CREDIT: &str = "credit";
}

/// Wallet movement
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    /// Transaction id
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning user
    pub user_id: Uuid,

    /// Amount in USD; always >= 0, direction is `transaction_type`
    pub amount: f64,

    /// `debit` or `credit`
    pub transaction_type: String,

    /// Request this movement pays for, when a debit
    pub request_id: Option<Uuid>,

    /// Creation timestamp
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

//! Typed query layer
//!
//! Thin, composable query functions over the entities. All functions are
//! generic over `ConnectionTrait` so they run equally inside transactions.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, JoinType, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set,
};
use uuid::Uuid;

use super::entities::{api_key, family, metric, model, request, request_content, transaction};
use crate::utils::error::Result;

/// One metric sample joined from a successful request
#[derive(Debug, Clone, Copy, sea_orm::FromQueryResult)]
pub struct MetricSample {
    /// Output tokens per second
    pub throughput_tokens_per_s: Option<f64>,
    /// Time to first chunk in milliseconds
    pub time_to_first_chunk_ms: Option<i64>,
}

/// Most recent `window` metric samples for one (model, provider), newest first.
///
/// Only rows joined to non-error requests count; rows whose throughput could
/// not be derived still appear (with nulls) so sample counts stay honest.
pub async fn recent_metric_samples<C: ConnectionTrait>(
    db: &C,
    model_id: &str,
    provider: &str,
    window: u64,
) -> Result<Vec<MetricSample>> {
    let samples = metric::Entity::find()
        .select_only()
        .column(metric::Column::ThroughputTokensPerS)
        .column(metric::Column::TimeToFirstChunkMs)
        .join(JoinType::InnerJoin, metric::Relation::Request.def())
        .filter(request::Column::ModelId.eq(model_id))
        .filter(request::Column::Provider.eq(provider))
        .filter(request::Column::Status.ne(request::status::ERROR))
        .order_by_desc(metric::Column::CreatedAt)
        .limit(window)
        .into_model::<MetricSample>()
        .all(db)
        .await?;

    Ok(samples)
}

/// Providers on which `user_id` has at least one request with cached tokens
/// for `model_id` since `since`.
pub async fn providers_with_cache_history<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    model_id: &str,
    providers: &[String],
    since: DateTime<Utc>,
) -> Result<HashSet<String>> {
    let rows: Vec<String> = request::Entity::find()
        .select_only()
        .column(request::Column::Provider)
        .distinct()
        .filter(request::Column::UserId.eq(user_id))
        .filter(request::Column::ModelId.eq(model_id))
        .filter(request::Column::Provider.is_in(providers.iter().cloned()))
        .filter(request::Column::CachedTokens.gt(0))
        .filter(request::Column::CreatedAt.gte(since))
        .into_tuple()
        .all(db)
        .await?;

    Ok(rows.into_iter().collect())
}

/// All model variants
pub async fn load_model_variants<C: ConnectionTrait>(db: &C) -> Result<Vec<model::Model>> {
    Ok(model::Entity::find().all(db).await?)
}

/// All family configurations
pub async fn load_families<C: ConnectionTrait>(db: &C) -> Result<Vec<family::Model>> {
    Ok(family::Entity::find().all(db).await?)
}

/// Look up an enabled API key by the SHA-256 hex digest of its key material
pub async fn find_api_key_by_hash<C: ConnectionTrait>(
    db: &C,
    key_hash: &str,
) -> Result<Option<api_key::Model>> {
    Ok(api_key::Entity::find()
        .filter(api_key::Column::KeyHash.eq(key_hash))
        .filter(api_key::Column::Disabled.eq(false))
        .one(db)
        .await?)
}

/// Record key usage; fire-and-forget from the caller's perspective
pub async fn touch_api_key<C: ConnectionTrait>(db: &C, key_id: Uuid) -> Result<()> {
    api_key::Entity::update_many()
        .col_expr(api_key::Column::LastUsedAt, Expr::value(Some(Utc::now())))
        .filter(api_key::Column::Id.eq(key_id))
        .exec(db)
        .await?;
    Ok(())
}

/// Wallet balance for a user, if a wallet row exists
pub async fn wallet_balance<C: ConnectionTrait>(db: &C, user_id: Uuid) -> Result<Option<f64>> {
    Ok(super::entities::wallet::Entity::find_by_id(user_id)
        .one(db)
        .await?
        .map(|w| w.balance))
}

/// Insert a request record
pub async fn insert_request<C: ConnectionTrait>(db: &C, row: request::Model) -> Result<()> {
    request::ActiveModel {
        id: Set(row.id),
        user_id: Set(row.user_id),
        api_key_name: Set(row.api_key_name),
        provider: Set(row.provider),
        model_id: Set(row.model_id),
        streaming: Set(row.streaming),
        status: Set(row.status),
        input_tokens: Set(row.input_tokens),
        output_tokens: Set(row.output_tokens),
        cached_tokens: Set(row.cached_tokens),
        evaluation_cost: Set(row.evaluation_cost),
        transaction_id: Set(row.transaction_id),
        error_message: Set(row.error_message),
        created_at: Set(row.created_at),
    }
    .insert(db)
    .await?;
    Ok(())
}

/// Insert the content row for a request
pub async fn insert_request_content<C: ConnectionTrait>(
    db: &C,
    row: request_content::Model,
) -> Result<()> {
    request_content::ActiveModel {
        request_id: Set(row.request_id),
        request_body: Set(row.request_body),
        response_body: Set(row.response_body),
    }
    .insert(db)
    .await?;
    Ok(())
}

/// Insert a metrics row (streaming requests only)
pub async fn insert_metric<C: ConnectionTrait>(db: &C, row: metric::Model) -> Result<()> {
    metric::ActiveModel {
        id: sea_orm::NotSet,
        request_id: Set(row.request_id),
        total_duration_ms: Set(row.total_duration_ms),
        time_to_first_chunk_ms: Set(row.time_to_first_chunk_ms),
        dt_first_last_chunk_ms: Set(row.dt_first_last_chunk_ms),
        throughput_tokens_per_s: Set(row.throughput_tokens_per_s),
        is_metrics_calculated: Set(row.is_metrics_calculated),
        created_at: Set(row.created_at),
    }
    .insert(db)
    .await?;
    Ok(())
}

/// Batch of records waiting for the accounting worker, oldest first, with
/// their content rows.
pub async fn ready_batch<C: ConnectionTrait>(
    db: &C,
    limit: u64,
) -> Result<Vec<(request::Model, Option<request_content::Model>)>> {
    Ok(request::Entity::find()
        .filter(request::Column::Status.eq(request::status::READY_TO_COMPUTE))
        .filter(request::Column::ErrorMessage.is_null())
        .order_by_asc(request::Column::CreatedAt)
        .limit(limit)
        .find_also_related(request_content::Entity)
        .all(db)
        .await?)
}

/// Count of records currently waiting for accounting
pub async fn ready_count<C: ConnectionTrait>(db: &C) -> Result<u64> {
    Ok(request::Entity::find()
        .filter(request::Column::Status.eq(request::status::READY_TO_COMPUTE))
        .filter(request::Column::ErrorMessage.is_null())
        .count(db)
        .await?)
}

/// Write tokenized counts back onto a request record
pub async fn write_token_counts<C: ConnectionTrait>(
    db: &C,
    request_id: Uuid,
    input_tokens: i64,
    output_tokens: i64,
) -> Result<()> {
    request::Entity::update_many()
        .col_expr(request::Column::InputTokens, Expr::value(Some(input_tokens)))
        .col_expr(
            request::Column::OutputTokens,
            Expr::value(Some(output_tokens)),
        )
        .filter(request::Column::Id.eq(request_id))
        .exec(db)
        .await?;
    Ok(())
}

/// Insert a wallet transaction and decrement the wallet balance
pub async fn insert_transaction<C: ConnectionTrait>(
    db: &C,
    row: transaction::Model,
) -> Result<()> {
    let user_id = row.user_id;
    let amount = row.amount;
    let kind = row.transaction_type.clone();

    transaction::ActiveModel {
        id: Set(row.id),
        user_id: Set(row.user_id),
        amount: Set(row.amount),
        transaction_type: Set(row.transaction_type),
        request_id: Set(row.request_id),
        created_at: Set(row.created_at),
    }
    .insert(db)
    .await?;

    let delta = if kind == transaction::kind::DEBIT {
        -amount
    } else {
        amount
    };
    super::entities::wallet::Entity::update_many()
        .col_expr(
            super::entities::wallet::Column::Balance,
            Expr::col(super::entities::wallet::Column::Balance).add(delta),
        )
        .col_expr(
            super::entities::wallet::Column::UpdatedAt,
            Expr::value(Utc::now()),
        )
        .filter(super::entities::wallet::Column::UserId.eq(user_id))
        .exec(db)
        .await?;

    Ok(())
}

/// Transition `ready_to_compute -> completed`, attaching the transaction.
///
/// Conditioned on the current status so retries after a partial failure are
/// idempotent; returns false when the record had already left
/// `ready_to_compute`.
pub async fn complete_request<C: ConnectionTrait>(
    db: &C,
    request_id: Uuid,
    transaction_id: Uuid,
) -> Result<bool> {
    let res = request::Entity::update_many()
        .col_expr(
            request::Column::Status,
            Expr::value(request::status::COMPLETED),
        )
        .col_expr(
            request::Column::TransactionId,
            Expr::value(Some(transaction_id)),
        )
        .filter(request::Column::Id.eq(request_id))
        .filter(request::Column::Status.eq(request::status::READY_TO_COMPUTE))
        .exec(db)
        .await?;

    Ok(res.rows_affected > 0)
}

/// Transition a record to terminal `error` with a reason
pub async fn mark_request_error<C: ConnectionTrait>(
    db: &C,
    request_id: Uuid,
    message: &str,
) -> Result<()> {
    request::Entity::update_many()
        .col_expr(request::Column::Status, Expr::value(request::status::ERROR))
        .col_expr(
            request::Column::ErrorMessage,
            Expr::value(Some(message.to_string())),
        )
        .filter(request::Column::Id.eq(request_id))
        .filter(request::Column::Status.ne(request::status::COMPLETED))
        .exec(db)
        .await?;
    Ok(())
}

use crate::middleware::UserId;
use crate::models::{BillingStatement, StatementMonth};
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct RecomputeRequest {
    #[validate(length(min = 1, max = 480, message = "Between 1 and 480 months can be recomputed"))]
    pub months: Vec<StatementMonth>,
}

/// List statement aggregates of an account.
///
/// GET /v1/accounts/:account_id/statements
pub async fn list_statements(
    State(state): State<AppState>,
    user_id: UserId,
    Path(account_id): Path<Uuid>,
) -> Result<Json<Vec<BillingStatement>>, AppError> {
    state
        .db
        .get_account(user_id.0, account_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Account not found")))?;

    let statements = state.db.list_statements(user_id.0, account_id).await?;
    Ok(Json(statements))
}

/// Recompute boundaries and totals of the given statement months.
///
/// POST /v1/accounts/:account_id/statements/recompute
pub async fn recompute_statements(
    State(state): State<AppState>,
    user_id: UserId,
    Path(account_id): Path<Uuid>,
    Json(req): Json<RecomputeRequest>,
) -> Result<Json<Vec<BillingStatement>>, AppError> {
    req.validate()?;

    let statements = state
        .importer
        .recompute_statements(user_id.0, account_id, req.months.into_iter().collect())
        .await?;

    Ok(Json(statements))
}

use crate::middleware::UserId;
use crate::models::PurchaseWithEntries;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

/// GET /v1/purchases/:transaction_id
pub async fn get_purchase(
    State(state): State<AppState>,
    user_id: UserId,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<PurchaseWithEntries>, AppError> {
    let purchase = state
        .db
        .get_purchase_with_entries(user_id.0, transaction_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Purchase not found")))?;

    Ok(Json(purchase))
}

/// GET /v1/accounts/:account_id/purchases
pub async fn list_purchases(
    State(state): State<AppState>,
    user_id: UserId,
    Path(account_id): Path<Uuid>,
) -> Result<Json<Vec<PurchaseWithEntries>>, AppError> {
    state
        .db
        .get_account(user_id.0, account_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Account not found")))?;

    let purchases = state.db.list_purchases(user_id.0, account_id).await?;
    Ok(Json(purchases))
}

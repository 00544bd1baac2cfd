use crate::middleware::UserId;
use crate::models::{ImportCommand, ImportSummary, StatementOverride, ValidatedImportRow};
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use service_core::error::AppError;
use std::collections::HashMap;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct ImportRequest {
    #[validate(length(min = 1, max = 5000, message = "Import must contain between 1 and 5000 rows"))]
    pub rows: Vec<ValidatedImportRow>,

    /// Category per row index.
    #[serde(default)]
    pub category_overrides: HashMap<usize, Uuid>,

    #[serde(default)]
    pub statement_override: Option<StatementOverride>,
}

impl From<ImportRequest> for ImportCommand {
    fn from(req: ImportRequest) -> Self {
        Self {
            rows: req.rows,
            category_overrides: req.category_overrides,
            statement_override: req.statement_override,
        }
    }
}

/// Import a parsed statement into an account.
///
/// POST /v1/accounts/:account_id/imports
pub async fn import_statement(
    State(state): State<AppState>,
    user_id: UserId,
    Path(account_id): Path<Uuid>,
    Json(req): Json<ImportRequest>,
) -> Result<Json<ImportSummary>, AppError> {
    req.validate()?;

    let summary = state
        .importer
        .import(user_id.0, account_id, req.into())
        .await?;

    Ok(Json(summary))
}

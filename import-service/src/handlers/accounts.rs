use crate::middleware::UserId;
use crate::models::{Account, AccountType, Category, CategoryKind, CreateAccount};
use crate::startup::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use service_core::error::AppError;
use validator::{Validate, ValidationError};

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_billing_cycle"))]
pub struct CreateAccountRequest {
    #[validate(length(min = 1, max = 255, message = "Account name is required"))]
    pub name: String,

    pub account_type: AccountType,

    #[validate(range(min = 1, max = 31, message = "Closing day must be between 1 and 31"))]
    pub closing_day: Option<u32>,

    #[validate(range(min = 1, max = 31, message = "Payment due day must be between 1 and 31"))]
    pub payment_due_day: Option<u32>,
}

fn validate_billing_cycle(req: &CreateAccountRequest) -> Result<(), ValidationError> {
    if req.account_type != AccountType::CreditCard && req.closing_day.is_some() {
        let mut err = ValidationError::new("closing_day_not_allowed");
        err.message = Some("Only credit card accounts have a closing day".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCategoryRequest {
    #[validate(length(min = 1, max = 255, message = "Category name is required"))]
    pub name: String,

    pub kind: CategoryKind,

    #[serde(default)]
    pub is_default: bool,
}

/// Register an account.
///
/// POST /v1/accounts
pub async fn create_account(
    State(state): State<AppState>,
    user_id: UserId,
    Json(req): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<Account>), AppError> {
    req.validate()?;

    let account = state
        .db
        .create_account(&CreateAccount {
            user_id: user_id.0,
            name: req.name,
            account_type: req.account_type,
            closing_day: req.closing_day,
            payment_due_day: req.payment_due_day,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(account)))
}

/// Register a category.
///
/// POST /v1/categories
pub async fn create_category(
    State(state): State<AppState>,
    user_id: UserId,
    Json(req): Json<CreateCategoryRequest>,
) -> Result<(StatusCode, Json<Category>), AppError> {
    req.validate()?;

    let category = state
        .db
        .create_category(user_id.0, req.name.trim(), req.kind, req.is_default)
        .await?;

    Ok((StatusCode::CREATED, Json(category)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(account_type: AccountType, closing_day: Option<u32>) -> CreateAccountRequest {
        CreateAccountRequest {
            name: "Card".to_string(),
            account_type,
            closing_day,
            payment_due_day: Some(10),
        }
    }

    #[test]
    fn closing_day_only_on_credit_cards() {
        assert!(request(AccountType::CreditCard, Some(5)).validate().is_ok());
        assert!(request(AccountType::Checking, Some(5)).validate().is_err());
        assert!(request(AccountType::Checking, None).validate().is_ok());
    }

    #[test]
    fn closing_day_must_be_a_day_of_month() {
        assert!(request(AccountType::CreditCard, Some(32)).validate().is_err());
        assert!(request(AccountType::CreditCard, Some(0)).validate().is_err());
    }
}

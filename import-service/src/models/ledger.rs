//! Ledger rows written by the reconciliation writer.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A logical, possibly multi-installment purchase (`transactions` table).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Purchase {
    pub transaction_id: Uuid,
    pub user_id: Uuid,
    pub account_id: Uuid,
    pub description: String,
    pub total_amount: i64,
    pub installment_count: i32,
    pub category_id: Uuid,
    pub external_id: Option<String>,
    pub provider_ref: Option<String>,
    pub refunded_amount: i64,
    pub purchase_date: NaiveDate,
    pub created_utc: DateTime<Utc>,
}

/// One installment of a purchase on one billing statement.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Entry {
    pub entry_id: Uuid,
    pub transaction_id: Uuid,
    pub account_id: Uuid,
    pub amount: i64,
    pub purchase_date: NaiveDate,
    pub statement_month: String,
    pub due_date: NaiveDate,
    pub installment_number: i32,
    pub external_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Monthly aggregate of a credit account ("fatura").
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BillingStatement {
    pub statement_id: Uuid,
    pub account_id: Uuid,
    pub statement_month: String,
    pub start_date: NaiveDate,
    pub closing_date: NaiveDate,
    pub due_date: NaiveDate,
    pub total_amount: i64,
    pub updated_utc: DateTime<Utc>,
}

/// Purchase with its entries ordered by installment number.
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseWithEntries {
    #[serde(flatten)]
    pub purchase: Purchase,
    pub entries: Vec<Entry>,
}


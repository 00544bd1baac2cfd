//! Import input rows and the import summary.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowKind {
    Expense,
    Income,
}

/// "Part 2 of 6" metadata attached by the statement parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_installment_bounds"))]
pub struct InstallmentInfo {
    #[validate(length(min = 1, message = "Installment base description is required"))]
    pub base_description: String,
    #[validate(range(min = 1, message = "Installment index starts at 1"))]
    pub current: u32,
    #[validate(range(min = 1, max = 480, message = "Installment total must be between 1 and 480"))]
    pub total: u32,
}

fn validate_installment_bounds(info: &InstallmentInfo) -> Result<(), ValidationError> {
    if info.current > info.total {
        let mut err = ValidationError::new("installment_out_of_range");
        err.message = Some("Installment index exceeds installment total".into());
        return Err(err);
    }
    Ok(())
}

/// A parsed, validated statement row. Immutable input to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ValidatedImportRow {
    #[validate(length(min = 1, message = "Description is required"))]
    pub description: String,
    /// Minor currency units, always positive; `kind` carries the direction.
    #[validate(range(min = 1, message = "Amount must be positive"))]
    pub amount: i64,
    pub date: NaiveDate,
    pub kind: RowKind,
    #[validate(nested)]
    pub installment: Option<InstallmentInfo>,
    pub external_id: Option<String>,
    /// Raw provider identifier, used to tell same-description purchases apart.
    pub provider_id: Option<String>,
}

/// Boundaries an imported statement file declares for itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementOverride {
    pub start_date: Option<NaiveDate>,
    pub closing_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
}

impl StatementOverride {
    pub fn is_empty(&self) -> bool {
        self.start_date.is_none() && self.closing_date.is_none() && self.due_date.is_none()
    }
}

/// Non-installment expense.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegularRow {
    pub index: usize,
    pub description: String,
    pub amount: i64,
    pub date: NaiveDate,
    pub external_id: Option<String>,
}

/// One installment of an installment purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallmentRow {
    pub index: usize,
    pub description: String,
    pub base_description: String,
    pub amount: i64,
    pub date: NaiveDate,
    pub current: u32,
    pub total: u32,
    pub external_id: Option<String>,
    pub provider_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomeRow {
    pub index: usize,
    pub description: String,
    pub amount: i64,
    pub date: NaiveDate,
    pub external_id: Option<String>,
}

/// A batch row after dispatch on its shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportRow {
    Regular(RegularRow),
    Installment(InstallmentRow),
    Income(IncomeRow),
}

impl ImportRow {
    /// Dispatch a row by kind and installment metadata. `index` is the row's
    /// position in the submitted batch. A 1-of-1 installment is a regular row.
    pub fn classify(index: usize, row: ValidatedImportRow) -> Self {
        match (row.kind, row.installment) {
            (RowKind::Income, _) => Self::Income(IncomeRow {
                index,
                description: row.description,
                amount: row.amount,
                date: row.date,
                external_id: row.external_id,
            }),
            (RowKind::Expense, Some(info)) if info.total > 1 => Self::Installment(InstallmentRow {
                index,
                description: row.description,
                base_description: info.base_description,
                amount: row.amount,
                date: row.date,
                current: info.current,
                total: info.total,
                external_id: row.external_id,
                provider_id: row.provider_id,
            }),
            (RowKind::Expense, _) => Self::Regular(RegularRow {
                index,
                description: row.description,
                amount: row.amount,
                date: row.date,
                external_id: row.external_id,
            }),
        }
    }
}

/// Rows split by shape, each list in batch order.
#[derive(Debug, Default)]
pub struct ClassifiedRows {
    pub regular: Vec<RegularRow>,
    pub installments: Vec<InstallmentRow>,
    pub income: Vec<IncomeRow>,
}

impl ClassifiedRows {
    pub fn from_rows(rows: Vec<(usize, ValidatedImportRow)>) -> Self {
        let mut classified = Self::default();
        for (index, row) in rows {
            match ImportRow::classify(index, row) {
                ImportRow::Regular(r) => classified.regular.push(r),
                ImportRow::Installment(r) => classified.installments.push(r),
                ImportRow::Income(r) => classified.income.push(r),
            }
        }
        classified
    }
}

/// Everything the engine needs for one import, besides the user and account.
#[derive(Debug, Clone, Default)]
pub struct ImportCommand {
    pub rows: Vec<ValidatedImportRow>,
    /// Category per batch row index.
    pub category_overrides: HashMap<usize, Uuid>,
    pub statement_override: Option<StatementOverride>,
}

/// Screens whose cached data an import invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleView {
    ExpenseList,
    Dashboard,
    Statements,
    AccountSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub imported_expenses: usize,
    pub imported_income: usize,
    pub skipped_duplicates: usize,
    /// Rows replaced in the same batch by a later row for the same installment.
    pub superseded_rows: usize,
    pub created_purchases: usize,
    pub updated_entries: usize,
    pub stale_views: Vec<StaleView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(kind: RowKind, installment: Option<(u32, u32)>) -> ValidatedImportRow {
        ValidatedImportRow {
            description: "Amazon 1/3".to_string(),
            amount: 1000,
            date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            kind,
            installment: installment.map(|(current, total)| InstallmentInfo {
                base_description: "Amazon".to_string(),
                current,
                total,
            }),
            external_id: None,
            provider_id: None,
        }
    }

    #[test]
    fn classify_dispatches_on_shape() {
        assert!(matches!(
            ImportRow::classify(0, row(RowKind::Expense, Some((1, 3)))),
            ImportRow::Installment(InstallmentRow { current: 1, total: 3, .. })
        ));
        assert!(matches!(
            ImportRow::classify(1, row(RowKind::Expense, Some((1, 1)))),
            ImportRow::Regular(_)
        ));
        assert!(matches!(
            ImportRow::classify(2, row(RowKind::Income, Some((1, 3)))),
            ImportRow::Income(IncomeRow { index: 2, .. })
        ));
    }

    #[test]
    fn rejects_installment_past_total() {
        assert!(row(RowKind::Expense, Some((4, 3))).validate().is_err());
        assert!(row(RowKind::Expense, Some((3, 3))).validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_amount() {
        let mut r = row(RowKind::Expense, None);
        r.amount = 0;
        assert!(r.validate().is_err());
    }
}

//! Domain models for import-service.

mod account;
mod import;
mod ledger;
mod month;

pub use account::{Account, AccountType, Category, CategoryKind, CreateAccount};
pub use import::{
    ClassifiedRows, ImportCommand, ImportRow, ImportSummary, IncomeRow, InstallmentInfo,
    InstallmentRow, RegularRow, RowKind, StaleView, StatementOverride, ValidatedImportRow,
};
pub use ledger::{BillingStatement, Entry, Purchase, PurchaseWithEntries};
pub use month::StatementMonth;

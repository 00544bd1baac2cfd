//! Services module for import-service.

pub mod database;
pub mod import;
pub mod metrics;
pub mod refund;

pub use database::{Database, WriteResult};
pub use import::ImportService;
pub use metrics::{get_metrics, init_metrics, record_error, record_import_request};
pub use refund::{LedgerRefundMatcher, MatchConfidence, RefundMatch, RefundMatcher};

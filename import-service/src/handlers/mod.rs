pub mod accounts;
pub mod imports;
pub mod purchases;
pub mod statements;

pub use accounts::{create_account, create_category};
pub use imports::import_statement;
pub use purchases::{get_purchase, list_purchases};
pub use statements::{list_statements, recompute_statements};

//! Account and category lookups consumed by the import engine.

use crate::engine::billing_cycle::CycleConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Account types. Only credit cards run on a closing-day billing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Checking,
    Savings,
    CreditCard,
    Cash,
}

impl AccountType {
    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Checking => "checking",
            Self::Savings => "savings",
            Self::CreditCard => "credit_card",
            Self::Cash => "cash",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "checking" => Some(Self::Checking),
            "savings" => Some(Self::Savings),
            "credit_card" => Some(Self::CreditCard),
            "cash" => Some(Self::Cash),
            _ => None,
        }
    }
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub account_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub account_type: String,
    pub closing_day: Option<i32>,
    pub payment_due_day: Option<i32>,
    pub created_utc: DateTime<Utc>,
}

impl Account {
    pub fn parsed_type(&self) -> Option<AccountType> {
        AccountType::parse(&self.account_type)
    }

    /// Billing-cycle settings. Non-credit accounts never carry a closing day.
    pub fn cycle_config(&self) -> CycleConfig {
        let closing_day = match self.parsed_type() {
            Some(AccountType::CreditCard) => self.closing_day.map(|d| d as u32),
            _ => None,
        };
        CycleConfig {
            closing_day,
            payment_due_day: self.payment_due_day.map(|d| d as u32),
        }
    }
}

/// Input for registering an account.
#[derive(Debug, Clone)]
pub struct CreateAccount {
    pub user_id: Uuid,
    pub name: String,
    pub account_type: AccountType,
    pub closing_day: Option<u32>,
    pub payment_due_day: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryKind {
    Expense,
    Income,
}

impl CategoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expense => "expense",
            Self::Income => "income",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Category {
    pub category_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub kind: String,
    pub is_default: bool,
    pub created_utc: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(account_type: &str, closing_day: Option<i32>) -> Account {
        Account {
            account_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Card".to_string(),
            account_type: account_type.to_string(),
            closing_day,
            payment_due_day: Some(10),
            created_utc: Utc::now(),
        }
    }

    #[test]
    fn only_credit_cards_have_cycles() {
        assert_eq!(account("credit_card", Some(3)).cycle_config().closing_day, Some(3));
        assert_eq!(account("checking", Some(3)).cycle_config().closing_day, None);
        assert!(!account("credit_card", None).cycle_config().is_revolving());
    }
}

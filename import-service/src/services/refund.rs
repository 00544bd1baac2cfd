//! Refund matching: links income rows to the purchases they refund.
//!
//! Only `High` matches are linked automatically by the import. Scoring mixes
//! description similarity, amount fit and date proximity.

use crate::models::IncomeRow;
use crate::services::database::Database;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use service_core::error::AppError;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

const DESCRIPTION_WEIGHT: f64 = 0.6;
const AMOUNT_WEIGHT: f64 = 0.3;
const DATE_WEIGHT: f64 = 0.1;
const MEDIUM_CONFIDENCE: f64 = 0.6;

/// Default number of days a refund may trail its purchase.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 180;

static REFUND_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(estorno|estornado|refund(ed)?|reembolso|devolu[cç][aã]o|chargeback)\b")
        .expect("Failed to compile refund marker pattern")
});

static NON_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{N}]+").expect("Failed to compile word pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchConfidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RefundMatch {
    pub matched_transaction_id: Uuid,
    pub confidence: MatchConfidence,
    pub score: f64,
}

/// A stored purchase that an income row might refund.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct RefundCandidate {
    pub transaction_id: Uuid,
    pub description: String,
    pub total_amount: i64,
    pub refunded_amount: i64,
    pub purchase_date: NaiveDate,
}

impl RefundCandidate {
    pub fn refundable(&self) -> i64 {
        (self.total_amount - self.refunded_amount).max(0)
    }
}

#[async_trait]
pub trait RefundMatcher: Send + Sync {
    /// Best refund match per income row, keyed by the row's batch index.
    async fn match_refunds(
        &self,
        user_id: Uuid,
        account_id: Uuid,
        income: &[IncomeRow],
    ) -> Result<HashMap<usize, RefundMatch>, AppError>;
}

/// Matches refunds against expense purchases stored on the same account.
pub struct LedgerRefundMatcher {
    db: Arc<Database>,
    high_confidence: f64,
    lookback_days: i64,
}

impl LedgerRefundMatcher {
    pub fn new(db: Arc<Database>, high_confidence: f64) -> Self {
        Self {
            db,
            high_confidence,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
        }
    }

    pub fn with_lookback_days(mut self, days: i64) -> Self {
        self.lookback_days = days.max(1);
        self
    }
}

#[async_trait]
impl RefundMatcher for LedgerRefundMatcher {
    #[instrument(skip(self, income), fields(user_id = %user_id, account_id = %account_id, rows = income.len()))]
    async fn match_refunds(
        &self,
        user_id: Uuid,
        account_id: Uuid,
        income: &[IncomeRow],
    ) -> Result<HashMap<usize, RefundMatch>, AppError> {
        let Some(earliest) = income.iter().map(|r| r.date).min() else {
            return Ok(HashMap::new());
        };
        let since = earliest - Duration::days(self.lookback_days);
        let candidates = self
            .db
            .find_refund_candidates(user_id, account_id, since)
            .await?;

        Ok(assign_refunds(
            income,
            &candidates,
            self.high_confidence,
            self.lookback_days,
        ))
    }
}

/// Best candidate per income row. A purchase's refundable amount is consumed
/// by each high-confidence match, so one purchase is not refunded twice over.
pub fn assign_refunds(
    income: &[IncomeRow],
    candidates: &[RefundCandidate],
    high_confidence: f64,
    lookback_days: i64,
) -> HashMap<usize, RefundMatch> {
    let mut remaining: HashMap<Uuid, i64> = candidates
        .iter()
        .map(|c| (c.transaction_id, c.refundable()))
        .collect();
    let mut matches = HashMap::new();

    for row in income {
        let best = candidates
            .iter()
            .filter_map(|c| {
                let refundable = remaining.get(&c.transaction_id).copied().unwrap_or(0);
                let score = score_refund(row, c, refundable, lookback_days);
                (score > 0.0).then_some((c, score))
            })
            .max_by(|a, b| a.1.total_cmp(&b.1));

        let Some((candidate, score)) = best else {
            continue;
        };
        let confidence = confidence_for(score, high_confidence);
        if confidence == MatchConfidence::Low {
            continue;
        }
        if confidence == MatchConfidence::High {
            if let Some(left) = remaining.get_mut(&candidate.transaction_id) {
                *left -= row.amount.min(*left);
            }
        }
        debug!(
            row = row.index,
            transaction_id = %candidate.transaction_id,
            score = score,
            confidence = ?confidence,
            "Refund candidate scored"
        );
        matches.insert(
            row.index,
            RefundMatch {
                matched_transaction_id: candidate.transaction_id,
                confidence,
                score,
            },
        );
    }

    matches
}

pub fn confidence_for(score: f64, high_confidence: f64) -> MatchConfidence {
    if score >= high_confidence {
        MatchConfidence::High
    } else if score >= MEDIUM_CONFIDENCE {
        MatchConfidence::Medium
    } else {
        MatchConfidence::Low
    }
}

/// Weighted score in `[0, 1]` of `row` refunding `candidate`, given the amount
/// still refundable on it. Zero when the refund cannot fit.
pub fn score_refund(
    row: &IncomeRow,
    candidate: &RefundCandidate,
    refundable: i64,
    lookback_days: i64,
) -> f64 {
    if refundable <= 0 || row.amount > refundable || row.date < candidate.purchase_date {
        return 0.0;
    }

    let amount_score = if row.amount == refundable || row.amount == candidate.total_amount {
        1.0
    } else {
        0.5
    };

    let days = (row.date - candidate.purchase_date).num_days() as f64;
    let date_score = (1.0 - days / lookback_days.max(1) as f64).max(0.0);

    let description_score = description_similarity(&row.description, &candidate.description);

    description_score * DESCRIPTION_WEIGHT + amount_score * AMOUNT_WEIGHT + date_score * DATE_WEIGHT
}

fn tokens(description: &str) -> HashSet<String> {
    let stripped = REFUND_MARKERS.replace_all(description, " ");
    NON_WORD
        .split(&stripped.to_lowercase())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Share of the refund's words found in the purchase description.
pub fn description_similarity(refund: &str, purchase: &str) -> f64 {
    let refund_tokens = tokens(refund);
    if refund_tokens.is_empty() {
        return 0.0;
    }
    let purchase_tokens = tokens(purchase);
    let shared = refund_tokens.intersection(&purchase_tokens).count();
    shared as f64 / refund_tokens.len() as f64
}

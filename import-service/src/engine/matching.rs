//! Ledger matcher: choose which stored purchase an installment group extends.
//!
//! `Database::find_purchase_candidates` narrows the ledger down to purchases
//! with a similar description and the same installment count; the choice
//! between them is made here.

use super::grouping::{ConflictPolicy, InstallmentGroup};
use crate::models::StatementMonth;
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// A stored installment of a candidate purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownInstallment {
    pub entry_id: Uuid,
    pub amount: i64,
    pub statement_month: StatementMonth,
}

/// A stored purchase that may be the one an installment group continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseCandidate {
    pub transaction_id: Uuid,
    pub description: String,
    pub provider_ref: Option<String>,
    pub known_installments: BTreeMap<u32, KnownInstallment>,
}

impl PurchaseCandidate {
    /// Every incoming installment is either new to the purchase or within the
    /// conflict threshold of the stored amount.
    pub fn is_compatible(&self, group: &InstallmentGroup, policy: &ConflictPolicy) -> bool {
        group.rows.iter().all(|(index, row)| {
            self.known_installments
                .get(index)
                .map_or(true, |known| !policy.amounts_conflict(known.amount, row.amount))
        })
    }
}

/// The purchase an installment group was matched to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingPurchase {
    pub transaction_id: Uuid,
    pub known_installments: BTreeMap<u32, KnownInstallment>,
}

impl From<PurchaseCandidate> for ExistingPurchase {
    fn from(candidate: PurchaseCandidate) -> Self {
        Self {
            transaction_id: candidate.transaction_id,
            known_installments: candidate.known_installments,
        }
    }
}

/// Purchases created or extended by the batch being imported. No two groups
/// of one batch may resolve to the same purchase.
#[derive(Debug, Clone, Default)]
pub struct BatchScope {
    claimed: HashSet<Uuid>,
}

impl BatchScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a purchase as taken. Returns false if it already was.
    pub fn claim(&mut self, transaction_id: Uuid) -> bool {
        self.claimed.insert(transaction_id)
    }

    pub fn contains(&self, transaction_id: &Uuid) -> bool {
        self.claimed.contains(transaction_id)
    }

    pub fn exclude_ids(&self) -> Vec<Uuid> {
        self.claimed.iter().copied().collect()
    }
}

/// Pick the purchase a group extends from `candidates`, ordered newest first.
///
/// Provider groups only accept a purchase recorded with the same provider
/// prefix. Otherwise the first compatible candidate wins, falling back to the
/// newest one: merging a corrected amount is preferred over creating a
/// duplicate purchase.
pub fn select_candidate(
    candidates: Vec<PurchaseCandidate>,
    group: &InstallmentGroup,
    scope: &BatchScope,
    policy: &ConflictPolicy,
) -> Option<ExistingPurchase> {
    let eligible: Vec<PurchaseCandidate> = candidates
        .into_iter()
        .filter(|c| !scope.contains(&c.transaction_id))
        .filter(|c| match &group.provider_prefix {
            Some(prefix) => c.provider_ref.as_deref() == Some(prefix.as_str()),
            None => true,
        })
        .collect();

    let position = eligible
        .iter()
        .position(|c| c.is_compatible(group, policy))
        .unwrap_or(0);

    eligible.into_iter().nth(position).map(ExistingPurchase::from)
}

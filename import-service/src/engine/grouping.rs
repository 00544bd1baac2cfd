//! Installment grouper.
//!
//! Clusters installment rows into purchases. Rows with a provider identifier
//! group by the provider's purchase prefix. Everything else groups by
//! normalized description and installment total, with conflict-breaking:
//! when an installment slot is already taken by a row that cannot be the same
//! purchase, the row moves to the next `(description, total, suffix)` group.

use crate::models::InstallmentRow;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

/// Thresholds deciding whether two amounts for the same installment slot
/// belong to different purchases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictPolicy {
    /// Relative tolerance in basis points (100 = 1%).
    pub relative_bps: i64,
    /// Absolute tolerance in minor units (100 = one unit of display currency).
    pub absolute_minor_units: i64,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        Self {
            relative_bps: 100,
            absolute_minor_units: 100,
        }
    }
}

impl ConflictPolicy {
    /// Amounts conflict only when they differ by more than the relative
    /// tolerance AND by more than the absolute tolerance.
    pub fn amounts_conflict(&self, a: i64, b: i64) -> bool {
        let diff = (a as i128 - b as i128).abs();
        let base = (a as i128).abs().max((b as i128).abs());
        diff > self.absolute_minor_units as i128 && diff * 10_000 > base * self.relative_bps as i128
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupKey {
    Provider(String),
    Description {
        description: String,
        total: u32,
        suffix: u32,
    },
}

/// Rows believed to belong to one purchase, at most one per installment index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallmentGroup {
    pub key: GroupKey,
    /// Description as first seen, used for matching and for new purchases.
    pub base_description: String,
    pub installment_total: u32,
    pub provider_prefix: Option<String>,
    pub rows: BTreeMap<u32, InstallmentRow>,
}

impl InstallmentGroup {
    fn new(key: GroupKey, row: &InstallmentRow, provider_prefix: Option<String>) -> Self {
        Self {
            key,
            base_description: row.base_description.trim().to_string(),
            installment_total: row.total,
            provider_prefix,
            rows: BTreeMap::new(),
        }
    }

    /// Row with the lowest installment index.
    pub fn anchor(&self) -> Option<&InstallmentRow> {
        self.rows.values().next()
    }

    pub fn total_amount(&self) -> i64 {
        self.rows.values().map(|r| r.amount).sum()
    }

    fn assess(&self, row: &InstallmentRow, policy: &ConflictPolicy) -> Fit {
        let Some(existing) = self.rows.get(&row.current) else {
            let compatible = self.rows.is_empty()
                || self
                    .rows
                    .values()
                    .any(|r| !policy.amounts_conflict(r.amount, row.amount));
            return if compatible { Fit::Free } else { Fit::Divergent };
        };

        // An id on either side makes the ids authoritative.
        if existing.external_id != row.external_id {
            return Fit::Conflict;
        }
        if existing.amount == row.amount {
            return Fit::Duplicate;
        }
        if policy.amounts_conflict(existing.amount, row.amount) {
            return Fit::Conflict;
        }
        Fit::Correction
    }
}

/// How a row fits an existing group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fit {
    /// Slot empty and the amount matches the group's other installments.
    Free,
    /// Slot empty but every other installment's amount conflicts.
    Divergent,
    /// Same slot, same amount, same (or no) external id.
    Duplicate,
    /// Same slot, no external ids, close amount: the same purchase with a
    /// corrected amount.
    Correction,
    /// Same slot, a different purchase.
    Conflict,
}

#[derive(Debug, Default)]
pub struct GroupingOutcome {
    pub groups: BTreeMap<GroupKey, InstallmentGroup>,
    /// Rows discarded as identical to a row already grouped.
    pub in_batch_duplicates: usize,
    /// Rows replaced by a later row for the same slot of the same purchase.
    pub superseded: usize,
}

static WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("Failed to compile whitespace pattern"));

/// Lowercase, trim and collapse internal whitespace.
pub fn normalize_description(description: &str) -> String {
    WHITESPACE
        .replace_all(description.trim(), " ")
        .to_lowercase()
}

/// Purchase-level part of a provider id: a trailing `-N`, `_N`, `/N`, `:N`,
/// `#N` or `-N/T` marker naming this row's installment is removed.
pub fn provider_prefix(provider_id: &str, current: u32) -> String {
    let id = provider_id.trim();
    let current = current.to_string();
    for sep in ['-', '_', '/', ':', '#'] {
        let Some((head, tail)) = id.rsplit_once(sep) else {
            continue;
        };
        let index = tail.split_once('/').map_or(tail, |(index, _)| index);
        if !head.is_empty() && index.trim_start_matches('0') == current {
            return head.to_string();
        }
    }
    id.to_string()
}

/// Partition installment rows into purchase groups.
pub fn group_installments(rows: Vec<InstallmentRow>, policy: &ConflictPolicy) -> GroupingOutcome {
    let mut outcome = GroupingOutcome::default();

    for row in rows {
        let provider = row
            .provider_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .map(|id| provider_prefix(id, row.current));

        let key = match provider {
            Some(prefix) => {
                let key = GroupKey::Provider(prefix.clone());
                if !outcome.groups.contains_key(&key) {
                    let group = InstallmentGroup::new(key.clone(), &row, Some(prefix));
                    outcome.groups.insert(key.clone(), group);
                }
                key
            }
            None => place_by_description(&outcome.groups, &row, policy),
        };

        let group = outcome.groups.entry(key.clone()).or_insert_with(|| {
            InstallmentGroup::new(key, &row, None)
        });

        match group.assess(&row, policy) {
            Fit::Duplicate => outcome.in_batch_duplicates += 1,
            // Provider groups are unambiguous: a second row for a slot replaces the first.
            Fit::Free | Fit::Divergent | Fit::Correction | Fit::Conflict => {
                if group.rows.insert(row.current, row).is_some() {
                    outcome.superseded += 1;
                }
            }
        }
    }

    outcome
}

/// Key of the description group a row lands in. Walks suffixes in order and
/// takes the first group that accepts the row; a group where the slot is free
/// but amounts diverge is only used if no group accepts it outright.
fn place_by_description(
    groups: &BTreeMap<GroupKey, InstallmentGroup>,
    row: &InstallmentRow,
    policy: &ConflictPolicy,
) -> GroupKey {
    let description = normalize_description(&row.base_description);
    let key_for = |suffix: u32| GroupKey::Description {
        description: description.clone(),
        total: row.total,
        suffix,
    };

    let mut divergent: Option<u32> = None;
    let mut suffix = 0;
    loop {
        let key = key_for(suffix);
        let Some(group) = groups.get(&key) else {
            return divergent.map_or(key, key_for);
        };
        match group.assess(row, policy) {
            Fit::Free | Fit::Duplicate | Fit::Correction => return key,
            Fit::Divergent => {
                divergent.get_or_insert(suffix);
            }
            Fit::Conflict => {}
        }
        suffix += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(description: &str, current: u32, total: u32, amount: i64) -> InstallmentRow {
        InstallmentRow {
            index: 0,
            description: format!("{} {}/{}", description, current, total),
            base_description: description.to_string(),
            amount,
            date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            current,
            total,
            external_id: None,
            provider_id: None,
        }
    }

    fn with_id(mut r: InstallmentRow, id: &str) -> InstallmentRow {
        r.external_id = Some(id.to_string());
        r
    }

    fn with_provider(mut r: InstallmentRow, id: &str) -> InstallmentRow {
        r.provider_id = Some(id.to_string());
        r
    }

    #[test]
    fn conflict_needs_both_thresholds() {
        let policy = ConflictPolicy::default();
        // 2% apart but only 20 minor units: same purchase.
        assert!(!policy.amounts_conflict(1000, 1020));
        // 150 units apart but under 1% of 100_000: same purchase.
        assert!(!policy.amounts_conflict(100_000, 100_150));
        // 10% and 1000 units apart: different purchases.
        assert!(policy.amounts_conflict(10_000, 11_000));
        assert!(!policy.amounts_conflict(5000, 5000));
    }

    #[test]
    fn groups_installments_of_one_purchase() {
        let outcome = group_installments(
            vec![row("Amazon", 1, 3, 1000), row("AMAZON ", 2, 3, 1000)],
            &ConflictPolicy::default(),
        );
        assert_eq!(outcome.groups.len(), 1);
        let group = outcome.groups.values().next().unwrap();
        assert_eq!(group.rows.len(), 2);
        assert_eq!(group.total_amount(), 2000);
        assert_eq!(group.anchor().unwrap().current, 1);
    }

    #[test]
    fn splits_conflicting_amounts_into_new_group() {
        let outcome = group_installments(
            vec![row("Shop", 1, 3, 10_000), row("Shop", 1, 3, 25_000)],
            &ConflictPolicy::default(),
        );
        assert_eq!(outcome.groups.len(), 2);
        let suffixes: Vec<u32> = outcome
            .groups
            .keys()
            .map(|k| match k {
                GroupKey::Description { suffix, .. } => *suffix,
                GroupKey::Provider(_) => unreachable!(),
            })
            .collect();
        assert_eq!(suffixes, vec![0, 1]);
    }

    #[test]
    fn interleaved_purchases_stay_apart() {
        // B's second installment arrives before A's and must not land with A.
        let outcome = group_installments(
            vec![
                row("Shop", 1, 3, 10_000),
                row("Shop", 1, 3, 25_000),
                row("Shop", 2, 3, 25_000),
                row("Shop", 2, 3, 10_000),
            ],
            &ConflictPolicy::default(),
        );
        assert_eq!(outcome.groups.len(), 2);
        for group in outcome.groups.values() {
            let amounts: Vec<i64> = group.rows.values().map(|r| r.amount).collect();
            assert_eq!(amounts[0], amounts[1]);
        }
    }

    #[test]
    fn identical_row_is_discarded() {
        let outcome = group_installments(
            vec![
                with_id(row("Shop", 2, 5, 3000), "e1"),
                with_id(row("Shop", 2, 5, 3000), "e1"),
            ],
            &ConflictPolicy::default(),
        );
        assert_eq!(outcome.in_batch_duplicates, 1);
        assert_eq!(outcome.groups.len(), 1);
    }

    #[test]
    fn distinct_external_ids_mean_distinct_purchases() {
        let outcome = group_installments(
            vec![
                with_id(row("Shop", 1, 2, 3000), "e1"),
                with_id(row("Shop", 1, 2, 3000), "e2"),
            ],
            &ConflictPolicy::default(),
        );
        assert_eq!(outcome.groups.len(), 2);
        assert_eq!(outcome.in_batch_duplicates, 0);
    }

    #[test]
    fn id_on_one_side_only_means_distinct_purchases() {
        for rows in [
            vec![with_id(row("Shop", 1, 3, 3000), "e1"), row("Shop", 1, 3, 3000)],
            vec![row("Shop", 1, 3, 3000), with_id(row("Shop", 1, 3, 3000), "e1")],
            vec![with_id(row("Shop", 1, 3, 3000), "e1"), row("Shop", 1, 3, 3040)],
        ] {
            let outcome = group_installments(rows, &ConflictPolicy::default());
            assert_eq!(outcome.groups.len(), 2);
            assert_eq!(outcome.in_batch_duplicates, 0);
            assert_eq!(outcome.superseded, 0);
        }
    }

    #[test]
    fn small_difference_is_a_correction() {
        let outcome = group_installments(
            vec![row("Shop", 1, 2, 3000), row("Shop", 1, 2, 3050)],
            &ConflictPolicy::default(),
        );
        assert_eq!(outcome.groups.len(), 1);
        assert_eq!(outcome.superseded, 1);
        let group = outcome.groups.values().next().unwrap();
        assert_eq!(group.rows[&1].amount, 3050);
    }

    #[test]
    fn every_row_is_accounted_for() {
        let rows = vec![
            row("Shop", 1, 3, 3000),
            row("Shop", 1, 3, 3050),
            row("Shop", 1, 3, 3050),
            row("Shop", 1, 3, 25_000),
            with_id(row("Shop", 2, 3, 3000), "e2"),
            with_provider(row("Gym", 1, 2, 900), "g7-1"),
            with_provider(row("Gym", 1, 2, 950), "g7-1"),
        ];
        let input = rows.len();
        let outcome = group_installments(rows, &ConflictPolicy::default());
        let kept: usize = outcome.groups.values().map(|g| g.rows.len()).sum();
        assert_eq!(kept + outcome.in_batch_duplicates + outcome.superseded, input);
        assert_eq!(outcome.in_batch_duplicates, 1);
        assert_eq!(outcome.superseded, 2);
    }

    #[test]
    fn different_totals_never_share_a_group() {
        let outcome = group_installments(
            vec![row("Shop", 1, 3, 3000), row("Shop", 1, 6, 3000)],
            &ConflictPolicy::default(),
        );
        assert_eq!(outcome.groups.len(), 2);
    }

    #[test]
    fn provider_rows_group_by_prefix() {
        let outcome = group_installments(
            vec![
                with_provider(row("Shop", 1, 3, 3000), "abc123-1"),
                with_provider(row("Shop", 2, 3, 3000), "abc123-2"),
                with_provider(row("Shop", 1, 3, 3000), "zzz999-1"),
            ],
            &ConflictPolicy::default(),
        );
        assert_eq!(outcome.groups.len(), 2);
        let group = &outcome.groups[&GroupKey::Provider("abc123".to_string())];
        assert_eq!(group.rows.len(), 2);
        assert_eq!(group.provider_prefix.as_deref(), Some("abc123"));
    }

    #[test]
    fn provider_prefix_only_strips_current_index() {
        assert_eq!(provider_prefix("abc123-2", 2), "abc123");
        assert_eq!(provider_prefix("abc123_02/06", 2), "abc123");
        assert_eq!(provider_prefix("TXN-500", 2), "TXN-500");
        assert_eq!(provider_prefix("plain", 1), "plain");
    }

    #[test]
    fn normalizes_descriptions() {
        assert_eq!(normalize_description("  Loja   ABC  "), "loja abc");
    }
}

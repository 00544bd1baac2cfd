//! Batch side of the duplicate filter.
//!
//! The ledger query lives in `Database::find_duplicates`; this module drops
//! the rows it reports, plus repeated external ids inside the batch itself.

use crate::models::ValidatedImportRow;
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct DedupOutcome {
    /// Surviving rows with their original batch index.
    pub kept: Vec<(usize, ValidatedImportRow)>,
    pub skipped: usize,
}

/// Distinct, non-empty external ids of a batch, in first-seen order.
pub fn external_ids(rows: &[ValidatedImportRow]) -> Vec<String> {
    let mut seen = HashSet::new();
    rows.iter()
        .filter_map(|r| r.external_id.as_deref())
        .filter(|id| !id.is_empty())
        .filter(|id| seen.insert(*id))
        .map(str::to_string)
        .collect()
}

/// Drop rows whose external id is already in the ledger or appeared earlier
/// in the batch. Rows without an external id always survive.
pub fn drop_duplicates(rows: Vec<ValidatedImportRow>, known: &HashSet<String>) -> DedupOutcome {
    let mut outcome = DedupOutcome::default();
    let mut seen_in_batch: HashSet<String> = HashSet::new();

    for (index, row) in rows.into_iter().enumerate() {
        let duplicate = match row.external_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => known.contains(id) || !seen_in_batch.insert(id.to_string()),
            None => false,
        };

        if duplicate {
            outcome.skipped += 1;
        } else {
            outcome.kept.push((index, row));
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RowKind;
    use chrono::NaiveDate;

    fn row(external_id: Option<&str>) -> ValidatedImportRow {
        ValidatedImportRow {
            description: "Netflix".to_string(),
            amount: 1000,
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            kind: RowKind::Expense,
            installment: None,
            external_id: external_id.map(str::to_string),
            provider_id: None,
        }
    }

    #[test]
    fn drops_rows_already_in_ledger() {
        let known: HashSet<String> = ["a".to_string()].into_iter().collect();
        let outcome = drop_duplicates(vec![row(Some("a")), row(Some("b"))], &known);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.kept.len(), 1);
        assert_eq!(outcome.kept[0].0, 1);
    }

    #[test]
    fn rows_without_ids_are_never_duplicates() {
        let outcome = drop_duplicates(vec![row(None), row(None), row(Some(""))], &HashSet::new());
        assert_eq!(outcome.skipped, 0);
        assert_eq!(outcome.kept.len(), 3);
    }

    #[test]
    fn repeated_id_in_batch_keeps_first() {
        let outcome = drop_duplicates(vec![row(Some("x")), row(Some("x"))], &HashSet::new());
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.kept[0].0, 0);
    }

    #[test]
    fn collects_distinct_ids() {
        let ids = external_ids(&[row(Some("x")), row(None), row(Some("x")), row(Some("y"))]);
        assert_eq!(ids, vec!["x".to_string(), "y".to_string()]);
    }
}

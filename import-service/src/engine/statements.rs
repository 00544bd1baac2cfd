//! Boundary planning for the statement totals recalculator.
//!
//! Decides the start, closing and due date of every statement an import
//! touched. Totals are summed in SQL by `Database::reconcile_statements`.

use super::billing_cycle::{default_closing_date, due_date_for, override_window, CycleConfig};
use crate::models::{StatementMonth, StatementOverride};
use chrono::{Duration, NaiveDate};
use std::collections::{BTreeMap, BTreeSet};

/// Boundaries of a statement row already in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredBoundary {
    pub start_date: NaiveDate,
    pub closing_date: NaiveDate,
    pub due_date: NaiveDate,
}

/// Boundaries to upsert for one statement month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatementWindow {
    pub statement_month: StatementMonth,
    pub start_date: NaiveDate,
    pub closing_date: NaiveDate,
    pub due_date: NaiveDate,
}

/// New start date for the stored statement right after the processed range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Realignment {
    pub statement_month: StatementMonth,
    pub start_date: NaiveDate,
}

/// Plan boundaries for `months` in chronological order.
///
/// `stored` should hold the stored statements of the processed months and of
/// their neighbours. The declared statement keeps its own closing and due
/// dates, and its start date only when the file states one. Non-revolving
/// accounts get no statements.
pub fn plan_statement_windows(
    config: &CycleConfig,
    months: &BTreeSet<StatementMonth>,
    statement_override: Option<&StatementOverride>,
    stored: &BTreeMap<StatementMonth, StoredBoundary>,
) -> Vec<StatementWindow> {
    let Some(closing_day) = config.closing_day else {
        return Vec::new();
    };
    let window = statement_override.and_then(|o| override_window(config, o));
    let declared_start = statement_override.and_then(|o| o.start_date);

    let mut planned: Vec<StatementWindow> = Vec::with_capacity(months.len());
    for &month in months {
        let declared = window.filter(|w| w.statement_month == month);

        let closing_date = declared
            .map(|w| w.closing_date)
            .or_else(|| stored.get(&month).map(|s| s.closing_date))
            .unwrap_or_else(|| default_closing_date(closing_day, month));

        let due_date = declared
            .map(|w| w.due_date)
            .or_else(|| stored.get(&month).map(|s| s.due_date))
            .unwrap_or_else(|| due_date_for(config, closing_date));

        let previous_close = planned
            .last()
            .filter(|p| p.statement_month == month.pred())
            .map(|p| p.closing_date)
            .or_else(|| stored.get(&month.pred()).map(|s| s.closing_date))
            .unwrap_or_else(|| default_closing_date(closing_day, month.pred()));

        let start_date = declared
            .and(declared_start)
            .unwrap_or(previous_close + Duration::days(1))
            .min(closing_date);

        planned.push(StatementWindow {
            statement_month: month,
            start_date,
            closing_date,
            due_date,
        });
    }
    planned
}

/// Start date the statement after the last planned month needs so the two
/// stay contiguous. `None` when that statement is not stored or already
/// starts on the right day.
pub fn plan_following_realignment(
    planned: &[StatementWindow],
    stored: &BTreeMap<StatementMonth, StoredBoundary>,
) -> Option<Realignment> {
    let last = planned.last()?;
    let following = last.statement_month.succ();
    let start_date = last.closing_date + Duration::days(1);
    let current = stored.get(&following)?;
    (current.start_date != start_date).then_some(Realignment {
        statement_month: following,
        start_date,
    })
}

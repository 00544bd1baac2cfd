//! Billing-cycle calculator: purchase date → (statement month, due date).
//!
//! Pure and deterministic. Credit accounts close on a configured day of the
//! month; a purchase belongs to the statement of the next closing date on or
//! after it. An imported statement may declare its own closing boundary,
//! which wins for the month it documents and only for that month.

use crate::models::{StatementMonth, StatementOverride};
use chrono::{Duration, NaiveDate};

/// Due date offset used when an account has a closing day but no due day.
pub const DEFAULT_DUE_OFFSET_DAYS: i64 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleConfig {
    pub closing_day: Option<u32>,
    pub payment_due_day: Option<u32>,
}

impl CycleConfig {
    pub fn revolving(closing_day: u32, payment_due_day: u32) -> Self {
        Self {
            closing_day: Some(closing_day),
            payment_due_day: Some(payment_due_day),
        }
    }

    /// Whether the account bills on a closing-day cycle.
    pub fn is_revolving(&self) -> bool {
        self.closing_day.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cycle {
    pub statement_month: StatementMonth,
    pub due_date: NaiveDate,
}

/// Exact boundaries of the statement an import documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverrideWindow {
    pub statement_month: StatementMonth,
    pub start_date: NaiveDate,
    pub closing_date: NaiveDate,
    pub due_date: NaiveDate,
}

impl OverrideWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.closing_date
    }

    pub fn cycle(&self) -> Cycle {
        Cycle {
            statement_month: self.statement_month,
            due_date: self.due_date,
        }
    }
}

/// Closing date the account's own settings give for `month`.
pub fn default_closing_date(closing_day: u32, month: StatementMonth) -> NaiveDate {
    month.day_clamped(closing_day)
}

/// Due date for a statement closing on `closing_date`.
///
/// A due day after the closing day falls in the closing month, otherwise in
/// the month after.
pub fn due_date_for(config: &CycleConfig, closing_date: NaiveDate) -> NaiveDate {
    match (config.closing_day, config.payment_due_day) {
        (Some(closing_day), Some(due_day)) => {
            let closing_month = StatementMonth::of(closing_date);
            let due_month = if due_day > closing_day {
                closing_month
            } else {
                closing_month.succ()
            };
            due_month.day_clamped(due_day)
        }
        _ => closing_date + Duration::days(DEFAULT_DUE_OFFSET_DAYS),
    }
}

/// Resolve the window an override describes. `None` for non-revolving
/// accounts or when the override carries no closing date.
pub fn override_window(
    config: &CycleConfig,
    statement_override: &StatementOverride,
) -> Option<OverrideWindow> {
    let closing_day = config.closing_day?;
    let closing_date = statement_override.closing_date?;
    let statement_month = StatementMonth::of(closing_date);
    let start_date = statement_override.start_date.unwrap_or_else(|| {
        default_closing_date(closing_day, statement_month.pred()) + Duration::days(1)
    });
    let due_date = statement_override
        .due_date
        .unwrap_or_else(|| due_date_for(config, closing_date));

    Some(OverrideWindow {
        statement_month,
        start_date: start_date.min(closing_date),
        closing_date,
        due_date,
    })
}

/// Cycle of `month` under the account defaults, or the override when it
/// documents that month.
pub fn cycle_for_month(
    config: &CycleConfig,
    month: StatementMonth,
    window: Option<&OverrideWindow>,
) -> Cycle {
    if let Some(w) = window.filter(|w| w.statement_month == month) {
        return w.cycle();
    }
    match config.closing_day {
        Some(closing_day) => Cycle {
            statement_month: month,
            due_date: due_date_for(config, default_closing_date(closing_day, month)),
        },
        None => Cycle {
            statement_month: month,
            due_date: month.first_day(),
        },
    }
}

fn default_cycle(config: &CycleConfig, closing_day: u32, purchase_date: NaiveDate) -> Cycle {
    let purchase_month = StatementMonth::of(purchase_date);
    let statement_month = if purchase_date <= default_closing_date(closing_day, purchase_month) {
        purchase_month
    } else {
        purchase_month.succ()
    };
    Cycle {
        statement_month,
        due_date: due_date_for(config, default_closing_date(closing_day, statement_month)),
    }
}

/// Statement month and due date for a purchase.
pub fn compute_cycle(
    purchase_date: NaiveDate,
    config: &CycleConfig,
    statement_override: Option<&StatementOverride>,
) -> Cycle {
    let Some(closing_day) = config.closing_day else {
        return Cycle {
            statement_month: StatementMonth::of(purchase_date),
            due_date: purchase_date,
        };
    };

    let Some(window) = statement_override.and_then(|o| override_window(config, o)) else {
        return default_cycle(config, closing_day, purchase_date);
    };

    if window.contains(purchase_date) {
        return window.cycle();
    }

    let cycle = default_cycle(config, closing_day, purchase_date);
    if cycle.statement_month != window.statement_month {
        return cycle;
    }

    // Outside the documented window but the defaults say it is the documented
    // month: it belongs to a neighbour.
    let month = if purchase_date > window.closing_date {
        window.statement_month.succ()
    } else {
        window.statement_month.pred()
    };
    cycle_for_month(config, month, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn month(s: &str) -> StatementMonth {
        s.parse().unwrap()
    }

    #[test]
    fn non_revolving_account_uses_calendar_month() {
        let cycle = compute_cycle(date(2024, 3, 28), &CycleConfig::default(), None);
        assert_eq!(cycle.statement_month, month("2024-03"));
        assert_eq!(cycle.due_date, date(2024, 3, 28));
    }

    #[test]
    fn purchase_on_or_before_closing_day_stays_in_month() {
        let config = CycleConfig::revolving(10, 20);
        let on_closing = compute_cycle(date(2024, 3, 10), &config, None);
        assert_eq!(on_closing.statement_month, month("2024-03"));
        assert_eq!(on_closing.due_date, date(2024, 3, 20));

        let after = compute_cycle(date(2024, 3, 11), &config, None);
        assert_eq!(after.statement_month, month("2024-04"));
        assert_eq!(after.due_date, date(2024, 4, 20));
    }

    #[test]
    fn due_day_before_closing_day_rolls_into_next_month() {
        let config = CycleConfig::revolving(25, 5);
        let cycle = compute_cycle(date(2024, 12, 26), &config, None);
        assert_eq!(cycle.statement_month, month("2025-01"));
        assert_eq!(cycle.due_date, date(2025, 2, 5));
    }

    #[test]
    fn closing_day_clamps_in_short_months() {
        let config = CycleConfig::revolving(31, 10);
        let cycle = compute_cycle(date(2024, 2, 29), &config, None);
        assert_eq!(cycle.statement_month, month("2024-02"));
        assert_eq!(cycle.due_date, date(2024, 3, 10));
    }

    #[test]
    fn missing_due_day_uses_default_offset() {
        let config = CycleConfig {
            closing_day: Some(3),
            payment_due_day: None,
        };
        let cycle = compute_cycle(date(2024, 5, 2), &config, None);
        assert_eq!(cycle.due_date, date(2024, 5, 13));
    }

    #[test]
    fn override_wins_inside_its_window() {
        let config = CycleConfig::revolving(10, 20);
        let o = StatementOverride {
            start_date: Some(date(2024, 3, 8)),
            closing_date: Some(date(2024, 4, 7)),
            due_date: Some(date(2024, 4, 17)),
        };
        // Defaults would put April 9th in April; the file says it is after the close.
        let after = compute_cycle(date(2024, 4, 9), &config, Some(&o));
        assert_eq!(after.statement_month, month("2024-05"));
        assert_eq!(after.due_date, date(2024, 5, 20));

        // Defaults would put March 9th in March; the file says April.
        let inside = compute_cycle(date(2024, 3, 9), &config, Some(&o));
        assert_eq!(inside.statement_month, month("2024-04"));
        assert_eq!(inside.due_date, date(2024, 4, 17));
    }

    #[test]
    fn override_leaves_other_months_alone() {
        let config = CycleConfig::revolving(10, 20);
        let o = StatementOverride {
            start_date: None,
            closing_date: Some(date(2024, 4, 7)),
            due_date: None,
        };
        let earlier = compute_cycle(date(2024, 1, 15), &config, Some(&o));
        assert_eq!(earlier, compute_cycle(date(2024, 1, 15), &config, None));
        assert_eq!(earlier.statement_month, month("2024-02"));
    }

    #[test]
    fn override_window_defaults_start_to_previous_close() {
        let config = CycleConfig::revolving(10, 20);
        let o = StatementOverride {
            start_date: None,
            closing_date: Some(date(2024, 4, 7)),
            due_date: None,
        };
        let window = override_window(&config, &o).unwrap();
        assert_eq!(window.start_date, date(2024, 3, 11));
        assert_eq!(window.due_date, date(2024, 4, 20));
        assert!(override_window(&CycleConfig::default(), &o).is_none());
    }

    #[test]
    fn deterministic() {
        let config = CycleConfig::revolving(7, 15);
        let a = compute_cycle(date(2024, 8, 30), &config, None);
        let b = compute_cycle(date(2024, 8, 30), &config, None);
        assert_eq!(a, b);
    }
}

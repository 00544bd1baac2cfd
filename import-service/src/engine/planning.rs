//! Write plans for the reconciliation writer.
//!
//! Everything the database transaction will do is decided here, without I/O:
//! which purchases to create, which to extend, which entry amounts change and
//! which statement month each entry and income lands in.

use super::billing_cycle::{
    compute_cycle, cycle_for_month, override_window, Cycle, CycleConfig, OverrideWindow,
};
use super::grouping::InstallmentGroup;
use super::matching::ExistingPurchase;
use crate::models::{IncomeRow, InstallmentRow, RegularRow, StatementMonth, StatementOverride};
use chrono::{Datelike, NaiveDate};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedEntry {
    pub entry_id: Uuid,
    pub installment_number: u32,
    pub amount: i64,
    pub purchase_date: NaiveDate,
    pub statement_month: StatementMonth,
    pub due_date: NaiveDate,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmountUpdate {
    pub entry_id: Uuid,
    pub installment_number: u32,
    pub old_amount: i64,
    pub new_amount: i64,
    pub statement_month: StatementMonth,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPurchase {
    pub transaction_id: Uuid,
    pub description: String,
    pub total_amount: i64,
    pub installment_count: u32,
    pub category_id: Uuid,
    pub external_id: Option<String>,
    pub provider_ref: Option<String>,
    pub purchase_date: NaiveDate,
    pub entries: Vec<PlannedEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseExtension {
    pub transaction_id: Uuid,
    pub new_entries: Vec<PlannedEntry>,
    pub amount_updates: Vec<AmountUpdate>,
    /// Incoming installments already stored with the same amount.
    pub unchanged: usize,
}

impl PurchaseExtension {
    pub fn is_noop(&self) -> bool {
        self.new_entries.is_empty() && self.amount_updates.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchasePlan {
    Create(NewPurchase),
    Extend(PurchaseExtension),
}

impl PurchasePlan {
    pub fn transaction_id(&self) -> Uuid {
        match self {
            Self::Create(p) => p.transaction_id,
            Self::Extend(p) => p.transaction_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomePlan {
    pub income_id: Uuid,
    pub description: String,
    pub amount: i64,
    pub received_date: NaiveDate,
    pub statement_month: StatementMonth,
    pub category_id: Uuid,
    pub external_id: Option<String>,
    /// Purchase this income refunds, when matched with high confidence.
    pub refund_of: Option<Uuid>,
}

/// Everything one import writes, committed in a single transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportPlan {
    pub user_id: Uuid,
    pub account_id: Uuid,
    pub purchases: Vec<PurchasePlan>,
    pub income: Vec<IncomePlan>,
}

impl ImportPlan {
    pub fn new(user_id: Uuid, account_id: Uuid) -> Self {
        Self {
            user_id,
            account_id,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.income.is_empty()
            && self.purchases.iter().all(|p| match p {
                PurchasePlan::Create(_) => false,
                PurchasePlan::Extend(e) => e.is_noop(),
            })
    }

    pub fn created_purchases(&self) -> usize {
        self.purchases
            .iter()
            .filter(|p| matches!(p, PurchasePlan::Create(_)))
            .count()
    }

    pub fn created_entries(&self) -> usize {
        self.purchases
            .iter()
            .map(|p| match p {
                PurchasePlan::Create(c) => c.entries.len(),
                PurchasePlan::Extend(e) => e.new_entries.len(),
            })
            .sum()
    }

    pub fn updated_entries(&self) -> usize {
        self.purchases
            .iter()
            .map(|p| match p {
                PurchasePlan::Create(_) => 0,
                PurchasePlan::Extend(e) => e.amount_updates.len(),
            })
            .sum()
    }

    pub fn unchanged_entries(&self) -> usize {
        self.purchases
            .iter()
            .map(|p| match p {
                PurchasePlan::Create(_) => 0,
                PurchasePlan::Extend(e) => e.unchanged,
            })
            .sum()
    }

    /// Statement months the plan writes into.
    pub fn touched_months(&self) -> BTreeSet<StatementMonth> {
        let mut months = BTreeSet::new();
        for purchase in &self.purchases {
            match purchase {
                PurchasePlan::Create(c) => {
                    months.extend(c.entries.iter().map(|e| e.statement_month));
                }
                PurchasePlan::Extend(e) => {
                    months.extend(e.new_entries.iter().map(|n| n.statement_month));
                    months.extend(e.amount_updates.iter().map(|u| u.statement_month));
                }
            }
        }
        months.extend(self.income.iter().map(|i| i.statement_month));
        months
    }
}

/// Cycle rules of one import: the account's configuration plus the boundaries
/// the imported statement declares.
#[derive(Debug, Clone)]
pub struct Planner {
    config: CycleConfig,
    statement_override: Option<StatementOverride>,
    window: Option<OverrideWindow>,
}

impl Planner {
    pub fn new(config: CycleConfig, statement_override: Option<StatementOverride>) -> Self {
        let statement_override = statement_override.filter(|o| !o.is_empty());
        let window = statement_override
            .as_ref()
            .and_then(|o| override_window(&config, o));
        Self {
            config,
            statement_override,
            window,
        }
    }

    pub fn config(&self) -> &CycleConfig {
        &self.config
    }

    pub fn window(&self) -> Option<&OverrideWindow> {
        self.window.as_ref()
    }

    pub fn cycle(&self, date: NaiveDate) -> Cycle {
        compute_cycle(date, &self.config, self.statement_override.as_ref())
    }

    /// Cycle of a month that is reached by counting installments rather than
    /// from a date. Non-revolving accounts fall due on `day` of that month.
    fn month_cycle(&self, month: StatementMonth, day: u32) -> Cycle {
        if self.config.is_revolving() {
            cycle_for_month(&self.config, month, self.window.as_ref())
        } else {
            Cycle {
                statement_month: month,
                due_date: month.day_clamped(day),
            }
        }
    }

    /// Cycle of every installment in `group`, counted from its lowest index.
    ///
    /// A group that starts past installment 1 inside a statement that declares
    /// its own closing date is anchored on that statement.
    pub fn installment_schedule(&self, group: &InstallmentGroup) -> BTreeMap<u32, Cycle> {
        let Some(anchor) = group.anchor() else {
            return BTreeMap::new();
        };
        let anchor_month = match &self.window {
            Some(window) if anchor.current > 1 => window.statement_month,
            _ => self.cycle(anchor.date).statement_month,
        };

        group
            .rows
            .keys()
            .map(|&k| {
                let month = anchor_month.add_months(k as i32 - anchor.current as i32);
                (k, self.month_cycle(month, anchor.date.day()))
            })
            .collect()
    }

    /// A new purchase made of the observed installments of `group`.
    pub fn new_purchase(&self, group: &InstallmentGroup, category_id: Uuid) -> NewPurchase {
        let schedule = self.installment_schedule(group);
        let entries: Vec<PlannedEntry> = group
            .rows
            .values()
            .filter_map(|row| {
                let cycle = schedule.get(&row.current)?;
                Some(planned_entry(row, *cycle))
            })
            .collect();
        let purchase_date = group.anchor().map(|r| r.date).unwrap_or_default();

        NewPurchase {
            transaction_id: Uuid::new_v4(),
            description: group.base_description.clone(),
            total_amount: entries.iter().map(|e| e.amount).sum(),
            installment_count: group.installment_total,
            category_id,
            external_id: None,
            provider_ref: group.provider_prefix.clone(),
            purchase_date,
            entries,
        }
    }

    /// Changes `group` brings to a stored purchase. New installments are
    /// placed relative to the purchase's lowest stored installment.
    pub fn extension(
        &self,
        existing: &ExistingPurchase,
        group: &InstallmentGroup,
    ) -> PurchaseExtension {
        let reference = existing
            .known_installments
            .iter()
            .next()
            .map(|(&index, known)| (index, known.statement_month));
        let fallback = if reference.is_none() {
            self.installment_schedule(group)
        } else {
            BTreeMap::new()
        };

        let mut extension = PurchaseExtension {
            transaction_id: existing.transaction_id,
            new_entries: Vec::new(),
            amount_updates: Vec::new(),
            unchanged: 0,
        };

        for row in group.rows.values() {
            if let Some(known) = existing.known_installments.get(&row.current) {
                if known.amount == row.amount {
                    extension.unchanged += 1;
                } else {
                    extension.amount_updates.push(AmountUpdate {
                        entry_id: known.entry_id,
                        installment_number: row.current,
                        old_amount: known.amount,
                        new_amount: row.amount,
                        statement_month: known.statement_month,
                    });
                }
                continue;
            }

            let cycle = match reference {
                Some((index, month)) => {
                    let month = month.add_months(row.current as i32 - index as i32);
                    self.month_cycle(month, row.date.day())
                }
                None => match fallback.get(&row.current) {
                    Some(cycle) => *cycle,
                    None => self.cycle(row.date),
                },
            };
            extension.new_entries.push(planned_entry(row, cycle));
        }

        extension
    }

    /// A single-installment purchase.
    pub fn regular(&self, row: &RegularRow, category_id: Uuid) -> NewPurchase {
        let cycle = self.cycle(row.date);
        NewPurchase {
            transaction_id: Uuid::new_v4(),
            description: row.description.clone(),
            total_amount: row.amount,
            installment_count: 1,
            category_id,
            external_id: row.external_id.clone(),
            provider_ref: None,
            purchase_date: row.date,
            entries: vec![PlannedEntry {
                entry_id: Uuid::new_v4(),
                installment_number: 1,
                amount: row.amount,
                purchase_date: row.date,
                statement_month: cycle.statement_month,
                due_date: cycle.due_date,
                external_id: None,
            }],
        }
    }

    pub fn income(&self, row: &IncomeRow, category_id: Uuid, refund_of: Option<Uuid>) -> IncomePlan {
        IncomePlan {
            income_id: Uuid::new_v4(),
            description: row.description.clone(),
            amount: row.amount,
            received_date: row.date,
            statement_month: self.cycle(row.date).statement_month,
            category_id,
            external_id: row.external_id.clone(),
            refund_of,
        }
    }
}

fn planned_entry(row: &InstallmentRow, cycle: Cycle) -> PlannedEntry {
    PlannedEntry {
        entry_id: Uuid::new_v4(),
        installment_number: row.current,
        amount: row.amount,
        purchase_date: row.date,
        statement_month: cycle.statement_month,
        due_date: cycle.due_date,
        external_id: row.external_id.clone(),
    }
}

//! Import orchestration: one validated batch in, one committed write out.

use crate::config::EngineConfig;
use crate::engine::{
    drop_duplicates, external_ids, group_installments, select_candidate, BatchScope, ImportPlan,
    Planner, PurchasePlan,
};
use crate::models::{
    Account, BillingStatement, CategoryKind, ClassifiedRows, ImportCommand, ImportSummary,
    StaleView, StatementMonth, StatementOverride,
};
use crate::services::database::{Database, WriteResult};
use crate::services::metrics::{
    record_error, record_import_request, record_rows, record_statement_recalc_failure,
};
use crate::services::refund::{MatchConfidence, RefundMatcher};
use service_core::error::AppError;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Category resolution for one batch: explicit per-row choices first, then
/// the user's defaults.
struct CategoryResolver<'a> {
    overrides: &'a HashMap<usize, Uuid>,
    expense_default: Option<Uuid>,
    income_default: Option<Uuid>,
}

impl CategoryResolver<'_> {
    fn resolve(&self, index: usize, kind: CategoryKind) -> Result<Uuid, AppError> {
        if let Some(category_id) = self.overrides.get(&index) {
            return Ok(*category_id);
        }
        let default = match kind {
            CategoryKind::Expense => self.expense_default,
            CategoryKind::Income => self.income_default,
        };
        default.ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!(
                "No default {} category configured",
                kind.as_str()
            ))
        })
    }

    /// Category of the first row in `indices` with an explicit choice.
    fn resolve_any(
        &self,
        indices: impl IntoIterator<Item = usize>,
        kind: CategoryKind,
    ) -> Result<Uuid, AppError> {
        let mut first = None;
        for index in indices {
            if let Some(category_id) = self.overrides.get(&index) {
                return Ok(*category_id);
            }
            first.get_or_insert(index);
        }
        self.resolve(first.unwrap_or(usize::MAX), kind)
    }
}

pub struct ImportService {
    db: Arc<Database>,
    refunds: Arc<dyn RefundMatcher>,
    engine: EngineConfig,
}

impl ImportService {
    pub fn new(db: Arc<Database>, refunds: Arc<dyn RefundMatcher>, engine: EngineConfig) -> Self {
        Self {
            db,
            refunds,
            engine,
        }
    }

    /// Reconcile a batch of statement rows into the account's ledger.
    #[instrument(skip(self, command), fields(user_id = %user_id, account_id = %account_id, rows = command.rows.len()))]
    pub async fn import(
        &self,
        user_id: Uuid,
        account_id: Uuid,
        command: ImportCommand,
    ) -> Result<ImportSummary, AppError> {
        let result = self.run_import(user_id, account_id, command).await;
        match &result {
            Ok(summary) => {
                record_import_request("success");
                record_rows("imported", summary.imported_expenses);
                record_rows("income", summary.imported_income);
                record_rows("skipped", summary.skipped_duplicates);
                record_rows("superseded", summary.superseded_rows);
            }
            Err(e) => {
                record_import_request("error");
                record_error(e.kind());
                warn!(error = %e, "Import rejected");
            }
        }
        result
    }

    async fn run_import(
        &self,
        user_id: Uuid,
        account_id: Uuid,
        command: ImportCommand,
    ) -> Result<ImportSummary, AppError> {
        let ImportCommand {
            rows,
            category_overrides,
            statement_override,
        } = command;

        if rows.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!("Import batch is empty")));
        }
        for row in &rows {
            row.validate()?;
        }
        if let Some(index) = category_overrides.keys().find(|i| **i >= rows.len()) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Category override for row {} is out of range",
                index
            )));
        }

        let account = self
            .db
            .get_account(user_id, account_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Account not found")))?;

        let requested: Vec<Uuid> = category_overrides
            .values()
            .copied()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let owned = self.db.owned_categories(user_id, &requested).await?;
        if let Some(category_id) = requested.iter().find(|id| !owned.contains(id)) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Category {} does not belong to the user",
                category_id
            )));
        }

        // Duplicate filter
        let ids = external_ids(&rows);
        let known = self.db.find_duplicates(user_id, &ids).await?;
        let dedup = drop_duplicates(rows, &known);
        let classified = ClassifiedRows::from_rows(dedup.kept);

        let needs_expense = classified
            .regular
            .iter()
            .map(|r| r.index)
            .chain(classified.installments.iter().map(|r| r.index))
            .any(|i| !category_overrides.contains_key(&i));
        let needs_income = classified
            .income
            .iter()
            .any(|r| !category_overrides.contains_key(&r.index));

        let categories = CategoryResolver {
            overrides: &category_overrides,
            expense_default: self
                .default_category_if(needs_expense, user_id, CategoryKind::Expense)
                .await?,
            income_default: self
                .default_category_if(needs_income, user_id, CategoryKind::Income)
                .await?,
        };

        let planner = Planner::new(account.cycle_config(), statement_override);
        let policy = self.engine.conflict_policy;
        let mut plan = ImportPlan::new(user_id, account_id);
        let mut scope = BatchScope::new();

        // Installment grouper and ledger matcher
        let grouping = group_installments(classified.installments, &policy);
        for group in grouping.groups.values() {
            let candidates = self
                .db
                .find_purchase_candidates(
                    user_id,
                    account_id,
                    &group.base_description,
                    group.installment_total,
                    &scope.exclude_ids(),
                )
                .await?;

            let purchase = match select_candidate(candidates, group, &scope, &policy) {
                Some(existing) => PurchasePlan::Extend(planner.extension(&existing, group)),
                None => {
                    let category_id = categories
                        .resolve_any(group.rows.values().map(|r| r.index), CategoryKind::Expense)?;
                    PurchasePlan::Create(planner.new_purchase(group, category_id))
                }
            };
            scope.claim(purchase.transaction_id());
            plan.purchases.push(purchase);
        }

        for row in &classified.regular {
            let category_id = categories.resolve(row.index, CategoryKind::Expense)?;
            let purchase = PurchasePlan::Create(planner.regular(row, category_id));
            scope.claim(purchase.transaction_id());
            plan.purchases.push(purchase);
        }

        if !classified.income.is_empty() {
            let refund_matches = self
                .refunds
                .match_refunds(user_id, account_id, &classified.income)
                .await
                .unwrap_or_else(|e| {
                    warn!(error = %e, "Refund matching unavailable, importing income unlinked");
                    HashMap::new()
                });

            for row in &classified.income {
                let refund_of = match refund_matches.get(&row.index) {
                    Some(m) if m.confidence == MatchConfidence::High => {
                        Some(m.matched_transaction_id)
                    }
                    Some(m) => {
                        info!(
                            row = row.index,
                            transaction_id = %m.matched_transaction_id,
                            score = m.score,
                            "Possible refund left unlinked for review"
                        );
                        None
                    }
                    None => None,
                };
                let category_id = categories.resolve(row.index, CategoryKind::Income)?;
                plan.income.push(planner.income(row, category_id, refund_of));
            }
        }

        // Reconciliation writer
        let written = if plan.is_empty() {
            WriteResult::default()
        } else {
            self.db.commit_import(&plan).await?
        };

        let mut months = written.touched_months.clone();
        if let Some(window) = planner.window() {
            months.insert(window.statement_month);
        }
        let statements_refreshed = self
            .refresh_statements(&account, &months, statement_override.as_ref())
            .await;

        let skipped_duplicates =
            dedup.skipped + grouping.in_batch_duplicates + plan.unchanged_entries();
        let summary = ImportSummary {
            imported_expenses: written.created_entries + written.updated_entries,
            imported_income: written.imported_income,
            skipped_duplicates,
            superseded_rows: grouping.superseded,
            created_purchases: written.created_purchases,
            updated_entries: written.updated_entries,
            stale_views: stale_views(&written, statements_refreshed, planner.window().is_some()),
        };

        if !summary.stale_views.is_empty() {
            info!(
                target: "import_service::invalidation",
                account_id = %account_id,
                stale_views = ?summary.stale_views,
                "Views invalidated by import"
            );
        }
        info!(
            imported_expenses = summary.imported_expenses,
            imported_income = summary.imported_income,
            skipped_duplicates = summary.skipped_duplicates,
            superseded_rows = summary.superseded_rows,
            created_purchases = summary.created_purchases,
            "Import completed"
        );

        Ok(summary)
    }

    async fn default_category_if(
        &self,
        needed: bool,
        user_id: Uuid,
        kind: CategoryKind,
    ) -> Result<Option<Uuid>, AppError> {
        if !needed {
            return Ok(None);
        }
        self.db
            .default_category(user_id, kind)
            .await?
            .ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!(
                    "No default {} category configured",
                    kind.as_str()
                ))
            })
            .map(Some)
    }

    /// Recompute statement aggregates after a committed import. Failures
    /// leave the aggregates stale and never fail the import.
    async fn refresh_statements(
        &self,
        account: &Account,
        months: &BTreeSet<StatementMonth>,
        statement_override: Option<&StatementOverride>,
    ) -> bool {
        if months.is_empty() || !account.cycle_config().is_revolving() {
            return false;
        }
        match self
            .db
            .reconcile_statements(account, months, statement_override)
            .await
        {
            Ok(statements) => !statements.is_empty(),
            Err(e) => {
                record_statement_recalc_failure();
                error!(
                    error = %e,
                    account_id = %account.account_id,
                    months = ?months,
                    "Statement recalculation failed; totals are stale until recomputed"
                );
                false
            }
        }
    }

    /// Manually recompute statement aggregates of `months`.
    #[instrument(skip(self, months), fields(user_id = %user_id, account_id = %account_id, months = months.len()))]
    pub async fn recompute_statements(
        &self,
        user_id: Uuid,
        account_id: Uuid,
        months: BTreeSet<StatementMonth>,
    ) -> Result<Vec<BillingStatement>, AppError> {
        let account = self
            .db
            .get_account(user_id, account_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Account not found")))?;

        self.db.reconcile_statements(&account, &months, None).await
    }
}

fn stale_views(
    written: &WriteResult,
    statements_refreshed: bool,
    declared_statement: bool,
) -> Vec<StaleView> {
    let mut views = Vec::new();
    let wrote = written.created_entries + written.updated_entries + written.imported_income > 0;
    if wrote {
        views.push(StaleView::ExpenseList);
        views.push(StaleView::Dashboard);
    }
    if statements_refreshed {
        views.push(StaleView::Statements);
    }
    if declared_statement && statements_refreshed {
        views.push(StaleView::AccountSettings);
    }
    views
}

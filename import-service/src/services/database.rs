//! Database service for import-service.

use crate::engine::{
    plan_following_realignment, plan_statement_windows, ImportPlan, KnownInstallment,
    PlannedEntry, PurchaseCandidate, PurchasePlan, StoredBoundary,
};
use crate::models::{
    Account, BillingStatement, Category, CategoryKind, CreateAccount, Entry, Purchase,
    PurchaseWithEntries, StatementMonth, StatementOverride,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::refund::RefundCandidate;
use chrono::NaiveDate;
use service_core::error::AppError;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Maximum number of stored purchases considered per installment group.
const MAX_PURCHASE_CANDIDATES: i64 = 20;

/// What a committed import wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteResult {
    pub created_purchases: usize,
    pub created_entries: usize,
    pub updated_entries: usize,
    pub imported_income: usize,
    pub linked_refunds: usize,
    /// Statement months of the account that received entry or income writes.
    pub touched_months: BTreeSet<StatementMonth>,
}

#[derive(Debug, sqlx::FromRow)]
struct CandidateRow {
    transaction_id: Uuid,
    description: String,
    provider_ref: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct KnownEntryRow {
    transaction_id: Uuid,
    entry_id: Uuid,
    installment_number: i32,
    amount: i64,
    statement_month: String,
}

#[derive(Debug, sqlx::FromRow)]
struct StoredStatementRow {
    statement_month: String,
    start_date: NaiveDate,
    closing_date: NaiveDate,
    due_date: NaiveDate,
}

/// Escape `%`, `_` and `\` so `value` matches literally inside a LIKE pattern.
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Map a write failure inside the import transaction. A unique violation
/// means a concurrent import stored the same external id first.
fn write_error(context: &str, e: sqlx::Error) -> AppError {
    match &e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => AppError::Conflict(
            anyhow::anyhow!("{}: row already imported by a concurrent request", context),
        ),
        _ => AppError::DatabaseError(anyhow::anyhow!("Import failed: {}: {}", context, e)),
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "import-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // =========================================================================
    // Accounts and Categories
    // =========================================================================

    #[instrument(skip(self, input), fields(user_id = %input.user_id))]
    pub async fn create_account(&self, input: &CreateAccount) -> Result<Account, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_account"])
            .start_timer();

        let account = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (account_id, user_id, name, account_type, closing_day, payment_due_day)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING account_id, user_id, name, account_type, closing_day, payment_due_day, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.user_id)
        .bind(&input.name)
        .bind(input.account_type.as_str())
        .bind(input.closing_day.map(|d| d as i32))
        .bind(input.payment_due_day.map(|d| d as i32))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create account: {}", e)))?;

        timer.observe_duration();
        info!(account_id = %account.account_id, account_type = %input.account_type, "Account created");

        Ok(account)
    }

    #[instrument(skip(self), fields(user_id = %user_id, account_id = %account_id))]
    pub async fn get_account(
        &self,
        user_id: Uuid,
        account_id: Uuid,
    ) -> Result<Option<Account>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_account"])
            .start_timer();

        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT account_id, user_id, name, account_type, closing_day, payment_due_day, created_utc
            FROM accounts
            WHERE user_id = $1 AND account_id = $2
            "#,
        )
        .bind(user_id)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get account: {}", e)))?;

        timer.observe_duration();

        Ok(account)
    }

    /// Register a category. A new default replaces the previous default of
    /// the same kind.
    #[instrument(skip(self, name), fields(user_id = %user_id, kind = kind.as_str()))]
    pub async fn create_category(
        &self,
        user_id: Uuid,
        name: &str,
        kind: CategoryKind,
        is_default: bool,
    ) -> Result<Category, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_category"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        if is_default {
            sqlx::query(
                "UPDATE categories SET is_default = FALSE WHERE user_id = $1 AND kind = $2 AND is_default",
            )
            .bind(user_id)
            .bind(kind.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to clear default category: {}", e))
            })?;
        }

        let category = sqlx::query_as::<_, Category>(
            r#"
            INSERT INTO categories (category_id, user_id, name, kind, is_default)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING category_id, user_id, name, kind, is_default, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(name)
        .bind(kind.as_str())
        .bind(is_default)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create category: {}", e)))?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        info!(category_id = %category.category_id, is_default = is_default, "Category created");

        Ok(category)
    }

    #[instrument(skip(self), fields(user_id = %user_id, kind = kind.as_str()))]
    pub async fn default_category(
        &self,
        user_id: Uuid,
        kind: CategoryKind,
    ) -> Result<Option<Uuid>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["default_category"])
            .start_timer();

        let category_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT category_id FROM categories
            WHERE user_id = $1 AND kind = $2 AND is_default
            ORDER BY created_utc DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get default category: {}", e))
        })?;

        timer.observe_duration();

        Ok(category_id)
    }

    /// Subset of `category_ids` owned by the user.
    #[instrument(skip(self, category_ids), fields(user_id = %user_id, count = category_ids.len()))]
    pub async fn owned_categories(
        &self,
        user_id: Uuid,
        category_ids: &[Uuid],
    ) -> Result<HashSet<Uuid>, AppError> {
        if category_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["owned_categories"])
            .start_timer();

        let owned = sqlx::query_scalar::<_, Uuid>(
            "SELECT category_id FROM categories WHERE user_id = $1 AND category_id = ANY($2)",
        )
        .bind(user_id)
        .bind(category_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to check categories: {}", e)))?;

        timer.observe_duration();

        Ok(owned.into_iter().collect())
    }

    // =========================================================================
    // Duplicate Filter
    // =========================================================================

    /// External ids from `external_ids` already stored anywhere in the user's
    /// ledger: purchases, entries, income or transfers.
    #[instrument(skip(self, external_ids), fields(user_id = %user_id, count = external_ids.len()))]
    pub async fn find_duplicates(
        &self,
        user_id: Uuid,
        external_ids: &[String],
    ) -> Result<HashSet<String>, AppError> {
        if external_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_duplicates"])
            .start_timer();

        let found = sqlx::query_scalar::<_, String>(
            r#"
            SELECT external_id FROM transactions WHERE user_id = $1 AND external_id = ANY($2)
            UNION
            SELECT external_id FROM entries WHERE user_id = $1 AND external_id = ANY($2)
            UNION
            SELECT external_id FROM income WHERE user_id = $1 AND external_id = ANY($2)
            UNION
            SELECT external_id FROM transfers WHERE user_id = $1 AND external_id = ANY($2)
            "#,
        )
        .bind(user_id)
        .bind(external_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find duplicates: {}", e)))?;

        timer.observe_duration();

        Ok(found.into_iter().collect())
    }

    // =========================================================================
    // Ledger Matcher
    // =========================================================================

    /// Stored purchases on the account whose description contains
    /// `base_description` and that have `installment_total` installments,
    /// newest first, with their stored installments.
    #[instrument(skip(self, exclude_ids), fields(user_id = %user_id, account_id = %account_id))]
    pub async fn find_purchase_candidates(
        &self,
        user_id: Uuid,
        account_id: Uuid,
        base_description: &str,
        installment_total: u32,
        exclude_ids: &[Uuid],
    ) -> Result<Vec<PurchaseCandidate>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_purchase_candidates"])
            .start_timer();

        let rows = sqlx::query_as::<_, CandidateRow>(
            r#"
            SELECT transaction_id, description, provider_ref
            FROM transactions
            WHERE user_id = $1
              AND account_id = $2
              AND installment_count = $3
              AND description ILIKE '%' || $4 || '%' ESCAPE '\'
              AND NOT (transaction_id = ANY($5))
            ORDER BY created_utc DESC, purchase_date DESC, transaction_id
            LIMIT $6
            "#,
        )
        .bind(user_id)
        .bind(account_id)
        .bind(installment_total as i32)
        .bind(escape_like(base_description.trim()))
        .bind(exclude_ids)
        .bind(MAX_PURCHASE_CANDIDATES)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to find purchase candidates: {}", e))
        })?;

        if rows.is_empty() {
            timer.observe_duration();
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = rows.iter().map(|r| r.transaction_id).collect();
        let entries = sqlx::query_as::<_, KnownEntryRow>(
            r#"
            SELECT transaction_id, entry_id, installment_number, amount, statement_month
            FROM entries
            WHERE transaction_id = ANY($1)
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to load candidate entries: {}", e))
        })?;

        let mut known: HashMap<Uuid, BTreeMap<u32, KnownInstallment>> = HashMap::new();
        for entry in entries {
            let Ok(statement_month) = entry.statement_month.parse::<StatementMonth>() else {
                warn!(entry_id = %entry.entry_id, statement_month = %entry.statement_month, "Skipping entry with malformed statement month");
                continue;
            };
            known.entry(entry.transaction_id).or_default().insert(
                entry.installment_number as u32,
                KnownInstallment {
                    entry_id: entry.entry_id,
                    amount: entry.amount,
                    statement_month,
                },
            );
        }

        timer.observe_duration();

        Ok(rows
            .into_iter()
            .map(|row| PurchaseCandidate {
                known_installments: known.remove(&row.transaction_id).unwrap_or_default(),
                transaction_id: row.transaction_id,
                description: row.description,
                provider_ref: row.provider_ref,
            })
            .collect())
    }

    /// Expense purchases on the account since `since` that still have an
    /// unrefunded amount, newest first.
    #[instrument(skip(self), fields(user_id = %user_id, account_id = %account_id))]
    pub async fn find_refund_candidates(
        &self,
        user_id: Uuid,
        account_id: Uuid,
        since: NaiveDate,
    ) -> Result<Vec<RefundCandidate>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_refund_candidates"])
            .start_timer();

        let candidates = sqlx::query_as::<_, RefundCandidate>(
            r#"
            SELECT transaction_id, description, total_amount, refunded_amount, purchase_date
            FROM transactions
            WHERE user_id = $1
              AND account_id = $2
              AND purchase_date >= $3
              AND refunded_amount < total_amount
            ORDER BY purchase_date DESC, created_utc DESC
            "#,
        )
        .bind(user_id)
        .bind(account_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to find refund candidates: {}", e))
        })?;

        timer.observe_duration();

        Ok(candidates)
    }

    // =========================================================================
    // Reconciliation Writer
    // =========================================================================

    /// Write an import plan in one transaction. Nothing is written if any
    /// statement fails.
    #[instrument(skip(self, plan), fields(user_id = %plan.user_id, account_id = %plan.account_id))]
    pub async fn commit_import(&self, plan: &ImportPlan) -> Result<WriteResult, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["commit_import"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let mut result = WriteResult::default();

        for purchase in &plan.purchases {
            match purchase {
                PurchasePlan::Create(new) => {
                    sqlx::query(
                        r#"
                        INSERT INTO transactions (transaction_id, user_id, account_id, description, total_amount,
                                                  installment_count, category_id, external_id, provider_ref, purchase_date)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                        "#,
                    )
                    .bind(new.transaction_id)
                    .bind(plan.user_id)
                    .bind(plan.account_id)
                    .bind(&new.description)
                    .bind(new.total_amount)
                    .bind(new.installment_count as i32)
                    .bind(new.category_id)
                    .bind(&new.external_id)
                    .bind(&new.provider_ref)
                    .bind(new.purchase_date)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| write_error("insert purchase", e))?;

                    for entry in &new.entries {
                        insert_entry(&mut *tx, plan, new.transaction_id, entry).await?;
                        result.touched_months.insert(entry.statement_month);
                    }
                    result.created_purchases += 1;
                    result.created_entries += new.entries.len();
                }
                PurchasePlan::Extend(extension) => {
                    if extension.is_noop() {
                        continue;
                    }

                    for update in &extension.amount_updates {
                        sqlx::query(
                            "UPDATE entries SET amount = $1 WHERE entry_id = $2 AND transaction_id = $3",
                        )
                        .bind(update.new_amount)
                        .bind(update.entry_id)
                        .bind(extension.transaction_id)
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| write_error("update entry amount", e))?;
                        result.touched_months.insert(update.statement_month);
                    }

                    for entry in &extension.new_entries {
                        insert_entry(&mut *tx, plan, extension.transaction_id, entry).await?;
                        result.touched_months.insert(entry.statement_month);
                    }

                    sqlx::query(
                        r#"
                        UPDATE transactions
                        SET total_amount = (
                            SELECT COALESCE(SUM(amount), 0)::BIGINT FROM entries WHERE transaction_id = $1
                        )
                        WHERE transaction_id = $1
                        "#,
                    )
                    .bind(extension.transaction_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| write_error("recompute purchase total", e))?;

                    result.created_entries += extension.new_entries.len();
                    result.updated_entries += extension.amount_updates.len();
                }
            }
        }

        for income in &plan.income {
            let replenish_category_id = match income.refund_of {
                Some(transaction_id) => sqlx::query_scalar::<_, Uuid>(
                    r#"
                    UPDATE transactions
                    SET refunded_amount = refunded_amount + $1
                    WHERE transaction_id = $2 AND user_id = $3
                    RETURNING category_id
                    "#,
                )
                .bind(income.amount)
                .bind(transaction_id)
                .bind(plan.user_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| write_error("record refund", e))?,
                None => None,
            };
            let refund_of = replenish_category_id.and(income.refund_of);

            sqlx::query(
                r#"
                INSERT INTO income (income_id, user_id, account_id, description, amount, received_date,
                                    statement_month, category_id, external_id, refund_of_transaction_id,
                                    replenish_category_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(income.income_id)
            .bind(plan.user_id)
            .bind(plan.account_id)
            .bind(&income.description)
            .bind(income.amount)
            .bind(income.received_date)
            .bind(income.statement_month.to_string())
            .bind(income.category_id)
            .bind(&income.external_id)
            .bind(refund_of)
            .bind(replenish_category_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| write_error("insert income", e))?;

            result.touched_months.insert(income.statement_month);
            result.imported_income += 1;
            if refund_of.is_some() {
                result.linked_refunds += 1;
            }
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Import failed: commit: {}", e))
        })?;

        timer.observe_duration();

        info!(
            created_purchases = result.created_purchases,
            created_entries = result.created_entries,
            updated_entries = result.updated_entries,
            imported_income = result.imported_income,
            linked_refunds = result.linked_refunds,
            "Import committed"
        );

        Ok(result)
    }

    // =========================================================================
    // Statement Totals Recalculator
    // =========================================================================

    /// Upsert the statements of `months` with fresh boundaries and totals,
    /// then realign the start of the following stored statement.
    #[instrument(skip(self, account, months, statement_override), fields(account_id = %account.account_id, months = months.len()))]
    pub async fn reconcile_statements(
        &self,
        account: &Account,
        months: &BTreeSet<StatementMonth>,
        statement_override: Option<&StatementOverride>,
    ) -> Result<Vec<BillingStatement>, AppError> {
        let config = account.cycle_config();
        let (Some(first), Some(last)) = (months.first(), months.last()) else {
            return Ok(Vec::new());
        };
        if !config.is_revolving() {
            return Ok(Vec::new());
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["reconcile_statements"])
            .start_timer();

        let mut window_months = Vec::new();
        let mut month = first.pred();
        while month <= last.succ() {
            window_months.push(month.to_string());
            month = month.succ();
        }

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let stored_rows = sqlx::query_as::<_, StoredStatementRow>(
            r#"
            SELECT statement_month, start_date, closing_date, due_date
            FROM billing_statements
            WHERE account_id = $1 AND statement_month = ANY($2)
            "#,
        )
        .bind(account.account_id)
        .bind(&window_months)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load statements: {}", e)))?;

        let stored: BTreeMap<StatementMonth, StoredBoundary> = stored_rows
            .into_iter()
            .filter_map(|row| {
                let month = row.statement_month.parse().ok()?;
                Some((
                    month,
                    StoredBoundary {
                        start_date: row.start_date,
                        closing_date: row.closing_date,
                        due_date: row.due_date,
                    },
                ))
            })
            .collect();

        let planned = plan_statement_windows(&config, months, statement_override, &stored);
        let mut statements = Vec::with_capacity(planned.len());

        for window in &planned {
            let statement = sqlx::query_as::<_, BillingStatement>(
                r#"
                INSERT INTO billing_statements (statement_id, account_id, user_id, statement_month,
                                                start_date, closing_date, due_date, total_amount)
                VALUES ($1, $2, $3, $4, $5, $6, $7,
                    (SELECT COALESCE(SUM(amount), 0)::BIGINT FROM entries
                     WHERE account_id = $2 AND statement_month = $4)
                  - (SELECT COALESCE(SUM(amount), 0)::BIGINT FROM income
                     WHERE account_id = $2 AND statement_month = $4))
                ON CONFLICT (account_id, statement_month) DO UPDATE SET
                    start_date = EXCLUDED.start_date,
                    closing_date = EXCLUDED.closing_date,
                    due_date = EXCLUDED.due_date,
                    total_amount = EXCLUDED.total_amount,
                    updated_utc = NOW()
                RETURNING statement_id, account_id, statement_month, start_date, closing_date,
                          due_date, total_amount, updated_utc
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(account.account_id)
            .bind(account.user_id)
            .bind(window.statement_month.to_string())
            .bind(window.start_date)
            .bind(window.closing_date)
            .bind(window.due_date)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to upsert statement: {}", e))
            })?;
            statements.push(statement);
        }

        if let Some(realignment) = plan_following_realignment(&planned, &stored) {
            sqlx::query(
                r#"
                UPDATE billing_statements
                SET start_date = $1, updated_utc = NOW()
                WHERE account_id = $2 AND statement_month = $3
                "#,
            )
            .bind(realignment.start_date)
            .bind(account.account_id)
            .bind(realignment.statement_month.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to realign statement: {}", e))
            })?;
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        info!(statements = statements.len(), "Statements reconciled");

        Ok(statements)
    }

    #[instrument(skip(self), fields(user_id = %user_id, account_id = %account_id))]
    pub async fn list_statements(
        &self,
        user_id: Uuid,
        account_id: Uuid,
    ) -> Result<Vec<BillingStatement>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_statements"])
            .start_timer();

        let statements = sqlx::query_as::<_, BillingStatement>(
            r#"
            SELECT statement_id, account_id, statement_month, start_date, closing_date,
                   due_date, total_amount, updated_utc
            FROM billing_statements
            WHERE user_id = $1 AND account_id = $2
            ORDER BY statement_month
            "#,
        )
        .bind(user_id)
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list statements: {}", e)))?;

        timer.observe_duration();

        Ok(statements)
    }

    #[instrument(skip(self), fields(user_id = %user_id, transaction_id = %transaction_id))]
    pub async fn get_purchase_with_entries(
        &self,
        user_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<Option<PurchaseWithEntries>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_purchase_with_entries"])
            .start_timer();

        let purchase = sqlx::query_as::<_, Purchase>(
            r#"
            SELECT transaction_id, user_id, account_id, description, total_amount, installment_count,
                   category_id, external_id, provider_ref, refunded_amount, purchase_date, created_utc
            FROM transactions
            WHERE user_id = $1 AND transaction_id = $2
            "#,
        )
        .bind(user_id)
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get purchase: {}", e)))?;

        let Some(purchase) = purchase else {
            timer.observe_duration();
            return Ok(None);
        };

        let entries = sqlx::query_as::<_, Entry>(
            r#"
            SELECT entry_id, transaction_id, account_id, amount, purchase_date, statement_month,
                   due_date, installment_number, external_id, paid_at
            FROM entries
            WHERE transaction_id = $1
            ORDER BY installment_number
            "#,
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get entries: {}", e)))?;

        timer.observe_duration();

        Ok(Some(PurchaseWithEntries { purchase, entries }))
    }

    /// Purchases on the account, newest first, with their entries.
    #[instrument(skip(self), fields(user_id = %user_id, account_id = %account_id))]
    pub async fn list_purchases(
        &self,
        user_id: Uuid,
        account_id: Uuid,
    ) -> Result<Vec<PurchaseWithEntries>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_purchases"])
            .start_timer();

        let purchases = sqlx::query_as::<_, Purchase>(
            r#"
            SELECT transaction_id, user_id, account_id, description, total_amount, installment_count,
                   category_id, external_id, provider_ref, refunded_amount, purchase_date, created_utc
            FROM transactions
            WHERE user_id = $1 AND account_id = $2
            ORDER BY purchase_date DESC, created_utc DESC
            "#,
        )
        .bind(user_id)
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list purchases: {}", e)))?;

        let ids: Vec<Uuid> = purchases.iter().map(|p| p.transaction_id).collect();
        let entries = sqlx::query_as::<_, Entry>(
            r#"
            SELECT entry_id, transaction_id, account_id, amount, purchase_date, statement_month,
                   due_date, installment_number, external_id, paid_at
            FROM entries
            WHERE transaction_id = ANY($1)
            ORDER BY installment_number
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list entries: {}", e)))?;

        let mut by_purchase: HashMap<Uuid, Vec<Entry>> = HashMap::new();
        for entry in entries {
            by_purchase.entry(entry.transaction_id).or_default().push(entry);
        }

        timer.observe_duration();

        Ok(purchases
            .into_iter()
            .map(|purchase| PurchaseWithEntries {
                entries: by_purchase.remove(&purchase.transaction_id).unwrap_or_default(),
                purchase,
            })
            .collect())
    }
}

async fn insert_entry(
    conn: &mut PgConnection,
    plan: &ImportPlan,
    transaction_id: Uuid,
    entry: &PlannedEntry,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO entries (entry_id, transaction_id, user_id, account_id, amount, purchase_date,
                             statement_month, due_date, installment_number, external_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(entry.entry_id)
    .bind(transaction_id)
    .bind(plan.user_id)
    .bind(plan.account_id)
    .bind(entry.amount)
    .bind(entry.purchase_date)
    .bind(entry.statement_month.to_string())
    .bind(entry.due_date)
    .bind(entry.installment_number as i32)
    .bind(&entry.external_id)
    .execute(conn)
    .await
    .map_err(|e| write_error("insert entry", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_like_metacharacters() {
        assert_eq!(escape_like("50% off_now\\"), "50\\% off\\_now\\\\");
        assert_eq!(escape_like("Amazon"), "Amazon");
    }
}

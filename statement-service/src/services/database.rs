//! Database service for statement-service.
//!
//! Statement, transaction and processing-log tables are protected by
//! row-level security keyed on `app.current_user_id`; every access to them
//! goes through [`Database::begin_scoped`], and queries also filter by owner.

use crate::extraction::BalanceCheck;
use crate::models::{
    Bank, BankStatement, NewProcessingLog, NewStatement, NewTransaction, ProcessingLog,
    StatementExtraction, StatementStatus, StatementSummary, Transaction, TransactionCategory, User,
};
use crate::services::metrics::DB_QUERY_DURATION;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction as SqlxTransaction};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const STATEMENT_SUMMARY_SELECT: &str = r#"
    SELECT s.*,
           (SELECT COUNT(*) FROM transactions t WHERE t.statement_id = s.id) AS transaction_count
    FROM bank_statements s
"#;

#[derive(Debug, FromRow)]
struct BalanceRow {
    opening_balance: Option<Decimal>,
    closing_balance: Option<Decimal>,
    total_credits: Option<Decimal>,
    total_debits: Option<Decimal>,
    expected_closing: Option<Decimal>,
    difference: Option<Decimal>,
    is_consistent: Option<bool>,
}

impl From<BalanceRow> for BalanceCheck {
    fn from(row: BalanceRow) -> Self {
        BalanceCheck {
            opening_balance: row.opening_balance,
            closing_balance: row.closing_balance,
            total_credits: row.total_credits.unwrap_or_default(),
            total_debits: row.total_debits.unwrap_or_default(),
            expected_closing: row.expected_closing,
            difference: row.difference,
            is_consistent: row.is_consistent,
        }
    }
}

/// A row of sqlx's migration history.
#[derive(Debug, FromRow)]
pub struct AppliedMigration {
    pub version: i64,
    pub description: String,
    pub installed_on: chrono::DateTime<chrono::Utc>,
    pub success: bool,
    pub execution_time_ms: i64,
}

fn db_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e))
}

/// Rows to skip for a 1-based page. Saturates instead of overflowing.
pub fn page_offset(page: i64, page_size: i64) -> i64 {
    (page.max(1) - 1).saturating_mul(page_size.max(0))
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "statement-service"))]
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

        let pool = Self::pool_options(max_connections, min_connections)
            .connect(database_url)
            .await
            .map_err(db_error("Failed to connect"))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    fn pool_options(max_connections: u32, min_connections: u32) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
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
            .map_err(db_error("Health check failed"))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Migrations recorded in `_sqlx_migrations`, oldest first. Empty when
    /// nothing has been applied yet.
    #[instrument(skip(self))]
    pub async fn applied_migrations(&self) -> Result<Vec<AppliedMigration>, AppError> {
        let exists: Option<String> =
            sqlx::query_scalar("SELECT to_regclass('_sqlx_migrations')::text")
                .fetch_one(&self.pool)
                .await
                .map_err(db_error("Failed to inspect migrations table"))?;
        if exists.is_none() {
            return Ok(Vec::new());
        }

        sqlx::query_as::<_, AppliedMigration>(
            r#"
            SELECT version, description, installed_on, success,
                   execution_time / 1000000 AS execution_time_ms
            FROM _sqlx_migrations
            ORDER BY version
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list migrations"))
    }

    /// Drop every object in the `public` schema, including migration history.
    #[instrument(skip(self))]
    pub async fn reset_schema(&self) -> Result<(), AppError> {
        tracing::warn!("Dropping public schema");
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;
        for stmt in ["DROP SCHEMA public CASCADE", "CREATE SCHEMA public"] {
            sqlx::query(stmt)
                .execute(&mut *tx)
                .await
                .map_err(db_error("Failed to reset schema"))?;
        }
        Self::commit(tx).await
    }

    /// Open a transaction with `app.current_user_id` set for row-level security.
    pub async fn begin_scoped(
        &self,
        user_id: Uuid,
    ) -> Result<SqlxTransaction<'static, Postgres>, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("Failed to begin transaction"))?;

        sqlx::query("SELECT set_config('app.current_user_id', $1, true)")
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to set user scope"))?;

        Ok(tx)
    }

    async fn commit(tx: SqlxTransaction<'static, Postgres>) -> Result<(), AppError> {
        tx.commit()
            .await
            .map_err(db_error("Failed to commit transaction"))
    }

    // =========================================================================
    // Users
    // =========================================================================

    #[instrument(skip(self, password_hash), fields(username = %username))]
    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<User, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_user"])
            .start_timer();

        let result = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, username, email, password_hash, created_at, updated_at
            "#,
        )
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await;

        timer.observe_duration();

        match result {
            Ok(user) => {
                info!(user_id = %user.id, "User created");
                Ok(user)
            }
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                let message = if db_err.constraint() == Some("users_email_key") {
                    "Email already registered"
                } else {
                    "Username already taken"
                };
                Err(AppError::Conflict(anyhow::anyhow!(message)))
            }
            Err(e) => Err(db_error("Failed to create user")(e)),
        }
    }

    #[instrument(skip(self, email))]
    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_user_by_email"])
            .start_timer();

        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, password_hash, created_at, updated_at
            FROM users
            WHERE lower(email) = lower($1)
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to find user"))?;

        timer.observe_duration();
        Ok(user)
    }

    // =========================================================================
    // Reference data
    // =========================================================================

    #[instrument(skip(self))]
    pub async fn list_banks(&self, active_only: bool) -> Result<Vec<Bank>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_banks"])
            .start_timer();

        let banks = sqlx::query_as::<_, Bank>(
            r#"
            SELECT id, name, code, date_format, statement_patterns, config_json, is_active, created_at, updated_at
            FROM banks
            WHERE is_active OR NOT $1
            ORDER BY name
            "#,
        )
        .bind(active_only)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list banks"))?;

        timer.observe_duration();
        Ok(banks)
    }

    #[instrument(skip(self))]
    pub async fn list_categories(&self) -> Result<Vec<TransactionCategory>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_categories"])
            .start_timer();

        let categories = sqlx::query_as::<_, TransactionCategory>(
            r#"
            SELECT id, name, parent_id, keywords, color, icon, position, created_at, updated_at
            FROM transaction_categories
            ORDER BY position, name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list categories"))?;

        timer.observe_duration();
        Ok(categories)
    }

    // =========================================================================
    // Statements
    // =========================================================================

    #[instrument(skip(self, new), fields(user_id = %new.user_id, filename = %new.original_filename))]
    pub async fn create_statement(&self, new: &NewStatement) -> Result<BankStatement, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_statement"])
            .start_timer();

        let mut tx = self.begin_scoped(new.user_id).await?;
        let statement = sqlx::query_as::<_, BankStatement>(
            r#"
            INSERT INTO bank_statements
                (user_id, original_filename, stored_filename, file_path, file_size, file_type, processing_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(new.user_id)
        .bind(&new.original_filename)
        .bind(&new.stored_filename)
        .bind(&new.file_path)
        .bind(new.file_size)
        .bind(&new.file_type)
        .bind(StatementStatus::Pending.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error("Failed to create statement"))?;
        Self::commit(tx).await?;

        timer.observe_duration();
        info!(statement_id = %statement.id, "Statement created");
        Ok(statement)
    }

    #[instrument(skip(self), fields(statement_id = %statement_id))]
    pub async fn set_statement_status(
        &self,
        user_id: Uuid,
        statement_id: Uuid,
        status: StatementStatus,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_statement_status"])
            .start_timer();

        let mut tx = self.begin_scoped(user_id).await?;
        sqlx::query(
            "UPDATE bank_statements SET processing_status = $3 WHERE id = $1 AND user_id = $2",
        )
        .bind(statement_id)
        .bind(user_id)
        .bind(status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to update statement status"))?;
        Self::commit(tx).await?;

        timer.observe_duration();
        Ok(())
    }

    /// Store extraction results and all transactions atomically, marking the
    /// statement completed.
    #[instrument(skip(self, extraction, transactions), fields(statement_id = %statement_id, count = transactions.len()))]
    pub async fn complete_statement(
        &self,
        user_id: Uuid,
        statement_id: Uuid,
        extraction: &StatementExtraction,
        transactions: &[NewTransaction],
    ) -> Result<Vec<Transaction>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["complete_statement"])
            .start_timer();

        let mut tx = self.begin_scoped(user_id).await?;

        let updated = sqlx::query(
            r#"
            UPDATE bank_statements SET
                bank_id = $3,
                bank_name = $4,
                account_number = $5,
                account_holder_name = $6,
                statement_period_start = $7,
                statement_period_end = $8,
                opening_balance = $9,
                closing_balance = $10,
                total_credits = $11,
                total_debits = $12,
                raw_text = $13,
                account_info_json = $14,
                processing_status = $15,
                processing_error = NULL,
                processed_at = NOW()
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(statement_id)
        .bind(user_id)
        .bind(extraction.bank_id)
        .bind(&extraction.bank_name)
        .bind(&extraction.account_number)
        .bind(&extraction.account_holder_name)
        .bind(extraction.statement_period_start)
        .bind(extraction.statement_period_end)
        .bind(extraction.opening_balance)
        .bind(extraction.closing_balance)
        .bind(extraction.total_credits)
        .bind(extraction.total_debits)
        .bind(&extraction.raw_text)
        .bind(&extraction.account_info_json)
        .bind(StatementStatus::Completed.as_str())
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to update statement"))?;

        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!("Statement not found")));
        }

        sqlx::query("DELETE FROM transactions WHERE statement_id = $1")
            .bind(statement_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to clear previous transactions"))?;

        let mut inserted = Vec::with_capacity(transactions.len());
        for t in transactions {
            let row = sqlx::query_as::<_, Transaction>(
                r#"
                INSERT INTO transactions
                    (statement_id, transaction_date, description, reference_number, amount,
                     transaction_type, balance, category, subcategory, category_id, merchant_name,
                     raw_text, metadata_json, confidence_score, is_flagged, flag_reason)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                RETURNING *
                "#,
            )
            .bind(statement_id)
            .bind(t.transaction_date)
            .bind(&t.description)
            .bind(&t.reference_number)
            .bind(t.amount)
            .bind(t.transaction_type.as_str())
            .bind(t.balance)
            .bind(&t.category)
            .bind(&t.subcategory)
            .bind(t.category_id)
            .bind(&t.merchant_name)
            .bind(&t.raw_text)
            .bind(&t.metadata_json)
            .bind(t.confidence_score)
            .bind(t.is_flagged)
            .bind(&t.flag_reason)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error("Failed to insert transaction"))?;
            inserted.push(row);
        }

        Self::commit(tx).await?;
        timer.observe_duration();

        info!(transactions = inserted.len(), "Statement completed");
        Ok(inserted)
    }

    #[instrument(skip(self, error), fields(statement_id = %statement_id))]
    pub async fn fail_statement(
        &self,
        user_id: Uuid,
        statement_id: Uuid,
        error: &str,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["fail_statement"])
            .start_timer();

        let mut tx = self.begin_scoped(user_id).await?;
        sqlx::query(
            r#"
            UPDATE bank_statements
            SET processing_status = $3, processing_error = $4, processed_at = NOW()
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(statement_id)
        .bind(user_id)
        .bind(StatementStatus::Failed.as_str())
        .bind(error)
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to mark statement failed"))?;
        Self::commit(tx).await?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self), fields(statement_id = %statement_id))]
    pub async fn get_statement(
        &self,
        user_id: Uuid,
        statement_id: Uuid,
    ) -> Result<Option<StatementSummary>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_statement"])
            .start_timer();

        let mut tx = self.begin_scoped(user_id).await?;
        let statement = sqlx::query_as::<_, StatementSummary>(&format!(
            "{STATEMENT_SUMMARY_SELECT} WHERE s.id = $1 AND s.user_id = $2"
        ))
        .bind(statement_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("Failed to get statement"))?;
        Self::commit(tx).await?;

        timer.observe_duration();
        Ok(statement)
    }

    /// Newest first. Returns the page and the caller's total statement count.
    #[instrument(skip(self))]
    pub async fn list_statements(
        &self,
        user_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<StatementSummary>, i64), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_statements"])
            .start_timer();

        let offset = page_offset(page, page_size);

        let mut tx = self.begin_scoped(user_id).await?;
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM bank_statements WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_error("Failed to count statements"))?;

        let statements = sqlx::query_as::<_, StatementSummary>(&format!(
            "{STATEMENT_SUMMARY_SELECT} WHERE s.user_id = $1 ORDER BY s.uploaded_at DESC, s.id LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(page_size)
        .bind(offset)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_error("Failed to list statements"))?;
        Self::commit(tx).await?;

        timer.observe_duration();
        Ok((statements, total))
    }

    /// Delete a statement and, by cascade, its transactions and logs.
    /// Returns the deleted row so the caller can remove the stored file.
    #[instrument(skip(self), fields(statement_id = %statement_id))]
    pub async fn delete_statement(
        &self,
        user_id: Uuid,
        statement_id: Uuid,
    ) -> Result<Option<BankStatement>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_statement"])
            .start_timer();

        let mut tx = self.begin_scoped(user_id).await?;
        let deleted = sqlx::query_as::<_, BankStatement>(
            "DELETE FROM bank_statements WHERE id = $1 AND user_id = $2 RETURNING *",
        )
        .bind(statement_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("Failed to delete statement"))?;
        Self::commit(tx).await?;

        timer.observe_duration();
        if deleted.is_some() {
            info!("Statement deleted");
        }
        Ok(deleted)
    }

    #[instrument(skip(self), fields(statement_id = %statement_id))]
    pub async fn list_transactions(
        &self,
        user_id: Uuid,
        statement_id: Uuid,
    ) -> Result<Vec<Transaction>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_transactions"])
            .start_timer();

        let mut tx = self.begin_scoped(user_id).await?;
        let transactions = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT t.*
            FROM transactions t
            JOIN bank_statements s ON s.id = t.statement_id
            WHERE t.statement_id = $1 AND s.user_id = $2
            ORDER BY t.transaction_date NULLS LAST, t.created_at, t.id
            "#,
        )
        .bind(statement_id)
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_error("Failed to list transactions"))?;
        Self::commit(tx).await?;

        timer.observe_duration();
        Ok(transactions)
    }

    // =========================================================================
    // Processing logs
    // =========================================================================

    #[instrument(skip(self, log), fields(statement_id = %log.statement_id, action = log.action.as_str()))]
    pub async fn insert_processing_log(
        &self,
        user_id: Uuid,
        log: &NewProcessingLog,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_processing_log"])
            .start_timer();

        let mut tx = self.begin_scoped(user_id).await?;
        sqlx::query(
            r#"
            INSERT INTO processing_logs
                (statement_id, action, status, message, details_json,
                 processing_time_ms, pages_processed, transactions_found)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(log.statement_id)
        .bind(log.action.as_str())
        .bind(log.status.as_str())
        .bind(&log.message)
        .bind(&log.details_json)
        .bind(log.processing_time_ms)
        .bind(log.pages_processed)
        .bind(log.transactions_found)
        .execute(&mut *tx)
        .await
        .map_err(db_error("Failed to insert processing log"))?;
        Self::commit(tx).await?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self), fields(statement_id = %statement_id))]
    pub async fn list_processing_logs(
        &self,
        user_id: Uuid,
        statement_id: Uuid,
    ) -> Result<Vec<ProcessingLog>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_processing_logs"])
            .start_timer();

        let mut tx = self.begin_scoped(user_id).await?;
        let logs = sqlx::query_as::<_, ProcessingLog>(
            r#"
            SELECT l.*
            FROM processing_logs l
            JOIN bank_statements s ON s.id = l.statement_id
            WHERE l.statement_id = $1 AND s.user_id = $2
            ORDER BY l.created_at, l.id
            "#,
        )
        .bind(statement_id)
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_error("Failed to list processing logs"))?;
        Self::commit(tx).await?;

        timer.observe_duration();
        Ok(logs)
    }

    /// Evaluate the stored `check_balance_consistency` function.
    #[instrument(skip(self), fields(statement_id = %statement_id))]
    pub async fn check_balance_consistency(
        &self,
        user_id: Uuid,
        statement_id: Uuid,
    ) -> Result<Option<BalanceCheck>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["check_balance_consistency"])
            .start_timer();

        let mut tx = self.begin_scoped(user_id).await?;
        let row = sqlx::query_as::<_, BalanceRow>(
            r#"
            SELECT c.*
            FROM check_balance_consistency($1) c
            WHERE EXISTS (SELECT 1 FROM bank_statements WHERE id = $1 AND user_id = $2)
            "#,
        )
        .bind(statement_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error("Failed to check balance consistency"))?;
        Self::commit(tx).await?;

        timer.observe_duration();
        Ok(row.map(BalanceCheck::from))
    }
}

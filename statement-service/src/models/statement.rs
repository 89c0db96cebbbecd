use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl StatementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct BankStatement {
    pub id: Uuid,
    pub user_id: Uuid,
    pub bank_id: Option<Uuid>,
    pub original_filename: String,
    pub stored_filename: String,
    pub file_path: String,
    pub file_size: i64,
    pub file_type: String,
    pub account_number: Option<String>,
    pub account_holder_name: Option<String>,
    pub bank_name: Option<String>,
    pub statement_period_start: Option<NaiveDate>,
    pub statement_period_end: Option<NaiveDate>,
    pub opening_balance: Option<Decimal>,
    pub closing_balance: Option<Decimal>,
    pub total_credits: Option<Decimal>,
    pub total_debits: Option<Decimal>,
    pub raw_text: Option<String>,
    pub account_info_json: Option<serde_json::Value>,
    pub processing_status: String,
    pub processing_error: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BankStatement {
    pub fn status(&self) -> StatementStatus {
        StatementStatus::from_str(&self.processing_status)
    }
}

/// Statement row joined with its transaction count, for listings.
#[derive(Debug, Clone, FromRow)]
pub struct StatementSummary {
    #[sqlx(flatten)]
    pub statement: BankStatement,
    pub transaction_count: i64,
}

/// Fields known at upload time.
#[derive(Debug, Clone)]
pub struct NewStatement {
    pub user_id: Uuid,
    pub original_filename: String,
    pub stored_filename: String,
    pub file_path: String,
    pub file_size: i64,
    pub file_type: String,
}

/// Fields produced by a successful extraction run.
#[derive(Debug, Clone, Default)]
pub struct StatementExtraction {
    pub bank_id: Option<Uuid>,
    pub bank_name: Option<String>,
    pub account_number: Option<String>,
    pub account_holder_name: Option<String>,
    pub statement_period_start: Option<NaiveDate>,
    pub statement_period_end: Option<NaiveDate>,
    pub opening_balance: Option<Decimal>,
    pub closing_balance: Option<Decimal>,
    pub total_credits: Decimal,
    pub total_debits: Decimal,
    pub raw_text: String,
    pub account_info_json: serde_json::Value,
}

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Credit,
    Debit,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "credit",
            Self::Debit => "debit",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "credit" => Self::Credit,
            _ => Self::Debit,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Transaction {
    pub id: Uuid,
    pub statement_id: Uuid,
    pub transaction_date: Option<NaiveDate>,
    pub posting_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub reference_number: Option<String>,
    pub amount: Decimal,
    pub transaction_type: String,
    pub balance: Option<Decimal>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub category_id: Option<Uuid>,
    pub merchant_name: Option<String>,
    #[serde(skip)]
    pub raw_text: Option<String>,
    #[serde(rename = "metadata")]
    pub metadata_json: Option<serde_json::Value>,
    pub confidence_score: Option<f64>,
    pub is_pending: bool,
    pub is_flagged: bool,
    pub flag_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub updated_at: DateTime<Utc>,
}

/// A transaction ready to be inserted under an existing statement.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub transaction_date: Option<NaiveDate>,
    pub description: String,
    pub reference_number: Option<String>,
    pub amount: Decimal,
    pub transaction_type: TransactionType,
    pub balance: Option<Decimal>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub category_id: Option<Uuid>,
    pub merchant_name: Option<String>,
    pub raw_text: String,
    pub metadata_json: serde_json::Value,
    pub confidence_score: f64,
    pub is_flagged: bool,
    pub flag_reason: Option<String>,
}

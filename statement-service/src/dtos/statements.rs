use crate::extraction::{AccountInfo, BalanceCheck, PipelineOutcome};
use crate::models::{BankStatement, StatementSummary, Transaction};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const RAW_TEXT_PREVIEW_CHARS: usize = 500;
pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// First `RAW_TEXT_PREVIEW_CHARS` characters, never splitting a code point.
pub fn preview(text: &str) -> String {
    text.chars().take(RAW_TEXT_PREVIEW_CHARS).collect()
}

#[derive(Debug, Serialize)]
pub struct BankSummary {
    pub id: Uuid,
    pub name: String,
    pub code: String,
}

/// Response for `POST /ocr/process` and `POST /upload`.
#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub success: bool,
    pub statement_id: Uuid,
    pub filename: String,
    pub bank: Option<BankSummary>,
    pub account_info: AccountInfo,
    pub transactions: Vec<Transaction>,
    pub transaction_count: usize,
    pub flagged_count: usize,
    pub pages: usize,
    pub raw_text_preview: String,
    pub balance_check: BalanceCheck,
}

impl ProcessResponse {
    pub fn new(filename: String, outcome: PipelineOutcome) -> Self {
        let extraction = outcome.extraction;
        Self {
            success: true,
            statement_id: outcome.statement_id,
            filename,
            bank: extraction.bank.as_ref().map(|b| BankSummary {
                id: b.id,
                name: b.name.clone(),
                code: b.code.clone(),
            }),
            flagged_count: outcome.transactions.iter().filter(|t| t.is_flagged).count(),
            transaction_count: outcome.transactions.len(),
            transactions: outcome.transactions,
            pages: outcome.pages,
            raw_text_preview: preview(&outcome.raw_text),
            account_info: extraction.account_info,
            balance_check: extraction.balance_check,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListStatementsQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl ListStatementsQuery {
    /// `(page, page_size)` with page >= 1 and page_size clamped to 1..=100.
    pub fn normalized(&self) -> (i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let page_size = self
            .page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        (page, page_size)
    }
}

#[derive(Debug, Serialize)]
pub struct StatementResponse {
    pub id: Uuid,
    pub original_filename: String,
    pub file_type: String,
    pub file_size: i64,
    pub bank_id: Option<Uuid>,
    pub bank_name: Option<String>,
    pub account_number: Option<String>,
    pub account_holder_name: Option<String>,
    pub statement_period_start: Option<NaiveDate>,
    pub statement_period_end: Option<NaiveDate>,
    pub opening_balance: Option<Decimal>,
    pub closing_balance: Option<Decimal>,
    pub total_credits: Option<Decimal>,
    pub total_debits: Option<Decimal>,
    pub processing_status: String,
    pub processing_error: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub transaction_count: i64,
}

impl From<StatementSummary> for StatementResponse {
    fn from(summary: StatementSummary) -> Self {
        let s: BankStatement = summary.statement;
        Self {
            id: s.id,
            original_filename: s.original_filename,
            file_type: s.file_type,
            file_size: s.file_size,
            bank_id: s.bank_id,
            bank_name: s.bank_name,
            account_number: s.account_number,
            account_holder_name: s.account_holder_name,
            statement_period_start: s.statement_period_start,
            statement_period_end: s.statement_period_end,
            opening_balance: s.opening_balance,
            closing_balance: s.closing_balance,
            total_credits: s.total_credits,
            total_debits: s.total_debits,
            processing_status: s.processing_status,
            processing_error: s.processing_error,
            uploaded_at: s.uploaded_at,
            processed_at: s.processed_at,
            transaction_count: summary.transaction_count,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatementDetailResponse {
    #[serde(flatten)]
    pub statement: StatementResponse,
    pub account_info: Option<serde_json::Value>,
    pub raw_text_preview: Option<String>,
}

impl From<StatementSummary> for StatementDetailResponse {
    fn from(mut summary: StatementSummary) -> Self {
        let account_info = summary.statement.account_info_json.take();
        let raw_text_preview = summary.statement.raw_text.as_deref().map(preview);
        Self {
            statement: summary.into(),
            account_info,
            raw_text_preview,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatementListResponse {
    pub statements: Vec<StatementResponse>,
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl StatementListResponse {
    pub fn new(statements: Vec<StatementSummary>, page: i64, page_size: i64, total: i64) -> Self {
        Self {
            statements: statements.into_iter().map(Into::into).collect(),
            page,
            page_size,
            total,
            total_pages: (total + page_size - 1) / page_size,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionListResponse {
    pub statement_id: Uuid,
    pub transactions: Vec<Transaction>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub removed: usize,
    pub retention_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_clamped() {
        let q = ListStatementsQuery {
            page: Some(0),
            page_size: Some(500),
        };
        assert_eq!(q.normalized(), (1, 100));

        let q = ListStatementsQuery {
            page: None,
            page_size: Some(0),
        };
        assert_eq!(q.normalized(), (1, 1));

        let q = ListStatementsQuery {
            page: Some(3),
            page_size: None,
        };
        assert_eq!(q.normalized(), (3, DEFAULT_PAGE_SIZE));
    }

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(StatementListResponse::new(vec![], 1, 20, 0).total_pages, 0);
        assert_eq!(StatementListResponse::new(vec![], 1, 20, 20).total_pages, 1);
        assert_eq!(StatementListResponse::new(vec![], 1, 20, 21).total_pages, 2);
    }

    #[test]
    fn preview_respects_char_boundaries() {
        let text = "é".repeat(600);
        let p = preview(&text);
        assert_eq!(p.chars().count(), RAW_TEXT_PREVIEW_CHARS);
        assert_eq!(preview("short"), "short");
    }
}

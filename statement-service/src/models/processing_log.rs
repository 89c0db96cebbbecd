use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Pipeline stage a log entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogAction {
    Upload,
    OcrStart,
    OcrComplete,
    ParseStart,
    ParseComplete,
    Categorize,
    Reconcile,
    Error,
}

impl LogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::OcrStart => "ocr_start",
            Self::OcrComplete => "ocr_complete",
            Self::ParseStart => "parse_start",
            Self::ParseComplete => "parse_complete",
            Self::Categorize => "categorize",
            Self::Reconcile => "reconcile",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStatus {
    Success,
    Failed,
    Warning,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Warning => "warning",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ProcessingLog {
    pub id: Uuid,
    pub statement_id: Uuid,
    pub action: String,
    pub status: String,
    pub message: Option<String>,
    #[serde(rename = "details")]
    pub details_json: Option<serde_json::Value>,
    pub processing_time_ms: Option<i32>,
    pub pages_processed: Option<i32>,
    pub transactions_found: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewProcessingLog {
    pub statement_id: Uuid,
    pub action: LogAction,
    pub status: LogStatus,
    pub message: String,
    pub details_json: Option<serde_json::Value>,
    pub processing_time_ms: Option<i32>,
    pub pages_processed: Option<i32>,
    pub transactions_found: Option<i32>,
}

impl NewProcessingLog {
    pub fn new(
        statement_id: Uuid,
        action: LogAction,
        status: LogStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            statement_id,
            action,
            status,
            message: message.into(),
            details_json: None,
            processing_time_ms: None,
            pages_processed: None,
            transactions_found: None,
        }
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details_json = Some(details);
        self
    }

    pub fn elapsed_ms(mut self, ms: u128) -> Self {
        self.processing_time_ms = Some(i32::try_from(ms).unwrap_or(i32::MAX));
        self
    }

    pub fn pages(mut self, pages: usize) -> Self {
        self.pages_processed = Some(i32::try_from(pages).unwrap_or(i32::MAX));
        self
    }

    pub fn transactions(mut self, count: usize) -> Self {
        self.transactions_found = Some(i32::try_from(count).unwrap_or(i32::MAX));
        self
    }
}

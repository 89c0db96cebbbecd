use crate::extraction::categorizer::{CategoryMatch, Categorizer};
use crate::extraction::error::ExtractionError;
use crate::extraction::ocr::{FileKind, OcrEngine};
use crate::extraction::parser::{AccountInfo, DateFormat, ParsedTransaction, StatementParser};
use crate::extraction::reconcile::{check_balance, BalanceCheck};
use crate::models::{
    Bank, LogAction, LogStatus, NewProcessingLog, NewTransaction, StatementExtraction,
    StatementStatus, Transaction,
};
use crate::services::database::Database;
use crate::services::metrics::{self, OCR_DURATION};
use serde_json::json;
use service_core::error::AppError;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Everything recovered from one statement's text.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub bank: Option<Bank>,
    pub account_info: AccountInfo,
    pub transactions: Vec<ParsedTransaction>,
    /// Parallel to `transactions`.
    pub categories: Vec<CategoryMatch>,
    pub balance_check: BalanceCheck,
}

impl Extraction {
    pub fn flagged_count(&self) -> usize {
        self.transactions.iter().filter(|t| t.is_flagged()).count()
    }

    /// True when the detected bank's `supported_formats` excludes `kind`.
    pub fn format_unsupported(&self, kind: FileKind) -> bool {
        self.bank
            .as_ref()
            .is_some_and(|b| !b.supports_format(kind.extensions()))
    }

    pub fn categorized_count(&self) -> usize {
        self.categories.iter().filter(|c| c.category_id.is_some()).count()
    }

    pub fn new_transactions(&self) -> Vec<NewTransaction> {
        self.transactions
            .iter()
            .zip(&self.categories)
            .map(|(t, c)| NewTransaction {
                transaction_date: t.date,
                description: t.description.clone(),
                reference_number: t.reference_number.clone(),
                amount: t.amount,
                transaction_type: t.transaction_type,
                balance: t.balance,
                category: Some(c.category.clone()),
                subcategory: c.subcategory.clone(),
                category_id: c.category_id,
                merchant_name: t.merchant_name.clone(),
                raw_text: t.raw_text.clone(),
                metadata_json: json!({
                    "line_number": t.line_number,
                    "raw_date": t.raw_date,
                    "type_source": t.type_source,
                    "matched_keyword": c.matched_keyword,
                }),
                confidence_score: t.confidence,
                is_flagged: t.is_flagged(),
                flag_reason: t.flag_reason.clone(),
            })
            .collect()
    }

    pub fn statement_fields(&self, raw_text: &str) -> StatementExtraction {
        let info = &self.account_info;
        StatementExtraction {
            bank_id: self.bank.as_ref().map(|b| b.id),
            bank_name: self.bank.as_ref().map(|b| b.name.clone()),
            account_number: info.account_number.clone(),
            account_holder_name: info.customer_name.clone(),
            statement_period_start: info.period_start,
            statement_period_end: info.period_end,
            opening_balance: info.opening_balance,
            closing_balance: info.closing_balance,
            total_credits: self.balance_check.total_credits,
            total_debits: self.balance_check.total_debits,
            raw_text: raw_text.to_string(),
            account_info_json: serde_json::to_value(info).unwrap_or_default(),
        }
    }
}

/// Pick the bank whose name, alias or code best matches the text.
///
/// Every candidate must appear as a whole run of words, so an alias such as
/// `chase` never matches inside `purchase`. The longest match wins.
pub fn detect_bank<'a>(text: &str, banks: &'a [Bank]) -> Option<&'a Bank> {
    let haystack = word_sequence(text);

    banks
        .iter()
        .filter_map(|bank| {
            bank.aliases()
                .iter()
                .chain(std::iter::once(&bank.code))
                .map(|candidate| word_sequence(candidate))
                .filter(|needle| !needle.trim().is_empty() && haystack.contains(needle.as_str()))
                .map(|needle| needle.trim().chars().count())
                .max()
                .map(|score| (score, bank))
        })
        .fold(None, |best: Option<(usize, &Bank)>, (score, bank)| match best {
            Some((s, _)) if s >= score => best,
            _ => Some((score, bank)),
        })
        .map(|(_, bank)| bank)
}

/// Lowercased alphanumeric words joined by single spaces, padded with a
/// space on both sides so `contains` only matches on word boundaries.
fn word_sequence(text: &str) -> String {
    let words = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>();
    format!(" {} ", words.join(" "))
}

/// Parse, categorize and reconcile statement text. Pure; no I/O.
pub fn extract_statement(
    text: &str,
    banks: &[Bank],
    categorizer: &Categorizer,
) -> Result<Extraction, ExtractionError> {
    if text.trim().is_empty() {
        return Err(ExtractionError::EmptyText);
    }

    let bank = detect_bank(text, banks);
    let patterns = bank.map(Bank::patterns);
    let date_format = bank
        .map(|b| DateFormat::from_label(&b.date_format))
        .unwrap_or_default();

    let parser = StatementParser::new(patterns.as_ref(), date_format)?;
    let parsed = parser.parse(text);

    let categories = parsed
        .transactions
        .iter()
        .map(|t| categorizer.categorize(&t.description))
        .collect();

    let balance_check = check_balance(
        parsed.account_info.opening_balance,
        parsed.account_info.closing_balance,
        &parsed.transactions,
    );

    Ok(Extraction {
        bank: bank.cloned(),
        account_info: parsed.account_info,
        transactions: parsed.transactions,
        categories,
        balance_check,
    })
}

/// Result of processing one uploaded statement.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub statement_id: Uuid,
    pub raw_text: String,
    pub pages: usize,
    pub extraction: Extraction,
    pub transactions: Vec<Transaction>,
}

/// Drives OCR, extraction and persistence for a stored upload.
#[derive(Clone)]
pub struct StatementPipeline {
    db: Database,
    ocr: Arc<dyn OcrEngine>,
}

impl StatementPipeline {
    pub fn new(db: Database, ocr: Arc<dyn OcrEngine>) -> Self {
        Self { db, ocr }
    }

    /// Process the statement. On failure the statement is marked failed,
    /// an `error` log row is written and the original error is returned.
    #[instrument(skip(self, path), fields(user_id = %user_id, statement_id = %statement_id, kind = kind.as_str()))]
    pub async fn process(
        &self,
        user_id: Uuid,
        statement_id: Uuid,
        path: &Path,
        kind: FileKind,
    ) -> Result<PipelineOutcome, AppError> {
        let started = Instant::now();
        match self.run(user_id, statement_id, path, kind).await {
            Ok(outcome) => {
                metrics::record_statement_processed(StatementStatus::Completed.as_str());
                info!(
                    transactions = outcome.transactions.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Statement processed"
                );
                Ok(outcome)
            }
            Err(err) => {
                metrics::record_statement_processed(StatementStatus::Failed.as_str());
                metrics::record_error("pipeline");
                self.record_failure(user_id, statement_id, &err, started).await;
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        user_id: Uuid,
        statement_id: Uuid,
        path: &Path,
        kind: FileKind,
    ) -> Result<PipelineOutcome, AppError> {
        self.db
            .set_statement_status(user_id, statement_id, StatementStatus::Processing)
            .await?;

        self.log(
            user_id,
            NewProcessingLog::new(statement_id, LogAction::OcrStart, LogStatus::Success, "OCR started"),
        )
        .await?;

        let stage = Instant::now();
        let ocr_timer = OCR_DURATION.with_label_values(&[kind.as_str()]).start_timer();
        let ocr = self.ocr.extract_text(path, kind).await?;
        ocr_timer.observe_duration();

        self.log(
            user_id,
            NewProcessingLog::new(
                statement_id,
                LogAction::OcrComplete,
                LogStatus::Success,
                format!("Extracted {} characters", ocr.text.len()),
            )
            .elapsed_ms(stage.elapsed().as_millis())
            .pages(ocr.pages),
        )
        .await?;

        self.log(
            user_id,
            NewProcessingLog::new(statement_id, LogAction::ParseStart, LogStatus::Success, "Parsing started"),
        )
        .await?;

        let stage = Instant::now();
        let banks = self.db.list_banks(true).await?;
        let categorizer = Categorizer::new(&self.db.list_categories().await?);
        let extraction = extract_statement(&ocr.text, &banks, &categorizer)?;

        let found = extraction.transactions.len();
        let format_unsupported = extraction.format_unsupported(kind);
        if format_unsupported {
            warn!(
                bank = extraction.bank.as_ref().map(|b| b.code.as_str()),
                kind = kind.as_str(),
                "File type not listed in the bank's supported formats"
            );
        }
        let parse_status = if found == 0 || format_unsupported {
            LogStatus::Warning
        } else {
            LogStatus::Success
        };
        self.log(
            user_id,
            NewProcessingLog::new(
                statement_id,
                LogAction::ParseComplete,
                parse_status,
                format!("Found {} transactions", found),
            )
            .details(json!({
                "bank": extraction.bank.as_ref().map(|b| &b.code),
                "account_info": &extraction.account_info,
                "flagged": extraction.flagged_count(),
                "format_supported": !format_unsupported,
            }))
            .elapsed_ms(stage.elapsed().as_millis())
            .transactions(found),
        )
        .await?;

        self.log(
            user_id,
            NewProcessingLog::new(
                statement_id,
                LogAction::Categorize,
                LogStatus::Success,
                format!(
                    "Categorized {} of {} transactions",
                    extraction.categorized_count(),
                    found
                ),
            )
            .transactions(found),
        )
        .await?;

        let check = &extraction.balance_check;
        let (reconcile_status, reconcile_message) = match check.is_consistent {
            Some(true) => (LogStatus::Success, "Balances reconcile".to_string()),
            Some(false) => (
                LogStatus::Warning,
                format!(
                    "Balances differ by {}",
                    check.difference.unwrap_or_default()
                ),
            ),
            None => (
                LogStatus::Warning,
                "Opening or closing balance not found".to_string(),
            ),
        };
        self.log(
            user_id,
            NewProcessingLog::new(statement_id, LogAction::Reconcile, reconcile_status, reconcile_message)
                .details(serde_json::to_value(check).unwrap_or_default()),
        )
        .await?;

        let transactions = self
            .db
            .complete_statement(
                user_id,
                statement_id,
                &extraction.statement_fields(&ocr.text),
                &extraction.new_transactions(),
            )
            .await?;

        metrics::record_transactions(found, extraction.flagged_count());

        Ok(PipelineOutcome {
            statement_id,
            raw_text: ocr.text,
            pages: ocr.pages,
            extraction,
            transactions,
        })
    }

    async fn log(&self, user_id: Uuid, entry: NewProcessingLog) -> Result<(), AppError> {
        self.db.insert_processing_log(user_id, &entry).await
    }

    async fn record_failure(&self, user_id: Uuid, statement_id: Uuid, err: &AppError, started: Instant) {
        let message = err.to_string();
        warn!(error = %message, "Statement processing failed");

        if let Err(e) = self.db.fail_statement(user_id, statement_id, &message).await {
            tracing::error!(error = %e, "Failed to mark statement as failed");
        }

        let entry = NewProcessingLog::new(statement_id, LogAction::Error, LogStatus::Failed, message)
            .elapsed_ms(started.elapsed().as_millis());
        if let Err(e) = self.log(user_id, entry).await {
            tracing::error!(error = %e, "Failed to write error log");
        }
    }
}

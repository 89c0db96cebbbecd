//! Domain models for statement-service.
//!
//! Row types derive `FromRow` and mirror the tables in `migrations/`.
//! Status-like columns are stored as text and converted through the
//! `as_str`/`from_str` pairs on their enums.

#![allow(clippy::should_implement_trait)]

pub mod bank;
pub mod category;
pub mod processing_log;
pub mod statement;
pub mod transaction;
pub mod user;

pub use bank::{Bank, BankPatterns};
pub use category::{CategoryNode, TransactionCategory};
pub use processing_log::{LogAction, LogStatus, NewProcessingLog, ProcessingLog};
pub use statement::{
    BankStatement, NewStatement, StatementExtraction, StatementStatus, StatementSummary,
};
pub use transaction::{NewTransaction, Transaction, TransactionType};
pub use user::User;

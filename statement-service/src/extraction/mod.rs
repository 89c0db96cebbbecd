//! Turning an uploaded statement into structured, categorized rows.
//!
//! `ocr` produces text from the file, `parser` pulls account fields and
//! transaction lines out of that text, `categorizer` assigns categories from
//! the keyword tree and `reconcile` checks the balances add up. `pipeline`
//! drives the stages for one statement and records each in the processing log.

pub mod categorizer;
pub mod error;
pub mod executor;
pub mod ocr;
pub mod parser;
pub mod pipeline;
pub mod reconcile;

pub use categorizer::{CategoryMatch, Categorizer};
pub use error::ExtractionError;
pub use executor::CommandExecutor;
pub use ocr::{FileKind, OcrEngine, OcrOutput, TesseractOcr};
pub use parser::{AccountInfo, DateFormat, ParsedTransaction, StatementParser, TypeSource};
pub use pipeline::{extract_statement, Extraction, PipelineOutcome, StatementPipeline};
pub use reconcile::{check_balance, BalanceCheck};

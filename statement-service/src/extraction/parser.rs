//! Regex-driven extraction of account details and transaction lines from
//! OCR text.
//!
//! Transactions are recognised one line at a time. A line qualifies when it
//! starts with a date and ends with an amount that carries cents, optionally
//! followed by a CR/DR marker and a running balance. Requiring cents keeps a
//! trailing year or reference number from being read as the amount.

use crate::extraction::error::ExtractionError;
use crate::models::{BankPatterns, TransactionType};
use crate::utils::truncate_chars;
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::{Captures, Regex, RegexBuilder};
use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;

/// Money with mandatory cents: `1,234.56`, `$45.00`, `(12.00)`, `-3.50`, `7.25-`.
const AMOUNT: &str = r"\(?-?\$?\s?(?:\d{1,3}(?:,\d{3})+|\d+)\.\d{2}\)?-?";

const DATE: &str = r"\d{1,2}[/.\-]\d{1,2}[/.\-]\d{2,4}|\d{4}-\d{2}-\d{2}|\d{1,2}[/\-]\d{1,2}|\d{1,2}\s+[A-Za-z]{3,9}\s+\d{4}";

/// Transactions below this confidence are flagged for review.
pub const FLAG_THRESHOLD: f64 = 0.6;

// Widths of the columns the extracted fields are stored in.
pub const ACCOUNT_NUMBER_MAX_CHARS: usize = 50;
pub const CUSTOMER_NAME_MAX_CHARS: usize = 255;
pub const REFERENCE_MAX_CHARS: usize = 100;
pub const MERCHANT_MAX_CHARS: usize = 255;
pub const FLAG_REASON_MAX_CHARS: usize = 255;

static DEFAULT_TRANSACTION: Lazy<Regex> = Lazy::new(|| {
    let pattern = format!(
        r"^(?P<date>{DATE})\s+(?P<description>.+?)\s+(?P<amount>{AMOUNT})(?:\s*(?P<direction>CR|DR)\b)?(?:\s+(?P<balance>{AMOUNT})(?:\s*(?:CR|DR)\b)?)?\s*$"
    );
    RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .expect("default transaction pattern is valid")
});

static ACCOUNT_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\baccount\s*(?:no\.?|number|num\.?|#)?\s*[:#]?\s*([xX*\-]*\d[\dxX*\-]*)")
        .expect("account number pattern is valid")
});

static CUSTOMER_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i:\b(?:customer\s+|account\s+holder\s*)?name)[ \t]*:?[ \t]*([A-Z][A-Za-z.'\-]*(?:[ \t][A-Z][A-Za-z.'\-]*)*)",
    )
    .expect("customer name pattern is valid")
});

static NAME_STOP_WORDS: &[&str] = &[
    "account", "statement", "period", "date", "address", "page", "branch", "customer",
];

static STATEMENT_PERIOD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:statement\s+)?period\s*:?[ \t]*([^\n]+?(?:\s+(?:to|through|thru)\s+|\s+-\s+)[^\n]*?\d{4})",
    )
    .expect("statement period pattern is valid")
});

static PERIOD_SEPARATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s+(?:to|through|thru|-)\s+").expect("period separator pattern is valid")
});

static OPENING_BALANCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:opening|beginning|previous|starting)\s+balance(?:\s+(?:on|as\s+of)\s+[^:\n]*?)?\s*:?\s*({AMOUNT})"
    ))
    .expect("opening balance pattern is valid")
});

static CLOSING_BALANCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:closing|ending|new|final)\s+balance(?:\s+(?:on|as\s+of)\s+[^:\n]*?)?\s*:?\s*({AMOUNT})"
    ))
    .expect("closing balance pattern is valid")
});

static BALANCE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:opening|beginning|closing|ending|previous|starting|new|final)\s+balance\b|\bbalance\s+(?:brought\s+|carried\s+)?forward\b",
    )
    .expect("balance line pattern is valid")
});

static REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:\b(?:ref(?:erence)?|conf(?:irmation)?|trace|chk|check)\s*(?:no\.?|num(?:ber)?|#)?\s*[:#.]?\s*([A-Z0-9][A-Z0-9\-]{3,})|#\s*([0-9]{4,}))",
    )
    .expect("reference pattern is valid")
});

static MERCHANT_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:(?:pos|ach|debit|credit|card|checkcard|visa|mastercard|purchase|payment|online|recurring|withdrawal|deposit)\b[\s:\-]*)+",
    )
    .expect("merchant prefix pattern is valid")
});

static MERCHANT_NOISE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*(?:#|\*|\bref\b|\bconf\b|\d{4,}|\s{2,}|\d{1,2}/\d{1,2}\b)")
        .expect("merchant noise pattern is valid")
});

const STRONG_CREDIT_HINTS: &[&str] = &[
    "deposit",
    "salary",
    "payroll",
    "refund",
    "interest",
    "dividend",
    "cashback",
    "reversal",
    "transfer in",
    "transfer from",
];

const DEBIT_HINTS: &[&str] = &[
    "withdrawal",
    "purchase",
    "payment",
    "fee",
    "debit",
    "atm",
    "pos ",
    "transfer to",
    "charge",
    "check ",
];

const WEAK_CREDIT_HINTS: &[&str] = &["credit"];

/// How a transaction's direction was decided, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeSource {
    Sign,
    Marker,
    BalanceDelta,
    Keyword,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateFormat {
    #[default]
    MonthFirst,
    DayFirst,
}

const TEXT_DATE_FORMATS: &[&str] = &[
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%b %d %Y",
    "%B %d %Y",
];

impl DateFormat {
    /// Interpret a bank's `date_format` column (`MM/DD/YYYY`, `DD-MM-YYYY`, ...).
    pub fn from_label(label: &str) -> Self {
        if label.trim().to_uppercase().starts_with("DD") {
            Self::DayFirst
        } else {
            Self::MonthFirst
        }
    }

    fn order(&self, first: u32, second: u32) -> (u32, u32) {
        match self {
            Self::MonthFirst => (first, second),
            Self::DayFirst => (second, first),
        }
    }

    /// Parse a date as printed on a statement. Two-digit years pivot at 70;
    /// dates without a year take `default_year`.
    pub fn parse(&self, raw: &str, default_year: Option<i32>) -> Option<NaiveDate> {
        let raw = raw.trim();
        let parts: Vec<&str> = raw.split(['/', '-', '.']).collect();
        let numeric = parts.len() >= 2
            && parts
                .iter()
                .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));

        if !numeric {
            let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
            return TEXT_DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(&normalized, fmt).ok());
        }

        let nums: Vec<u32> = parts.iter().filter_map(|p| p.parse().ok()).collect();
        if nums.len() != parts.len() {
            return None;
        }

        match nums.len() {
            3 if parts[0].len() == 4 => NaiveDate::from_ymd_opt(nums[0] as i32, nums[1], nums[2]),
            3 => {
                let (month, day) = self.order(nums[0], nums[1]);
                NaiveDate::from_ymd_opt(expand_year(nums[2], parts[2].len()), month, day)
            }
            2 => {
                let (month, day) = self.order(nums[0], nums[1]);
                NaiveDate::from_ymd_opt(default_year?, month, day)
            }
            _ => None,
        }
    }
}

fn expand_year(year: u32, digits: usize) -> i32 {
    let year = year as i32;
    match digits {
        1 | 2 if year < 70 => 2000 + year,
        1 | 2 => 1900 + year,
        _ => year,
    }
}

/// Parse a printed amount into its magnitude and whether it was marked negative.
pub fn parse_amount(raw: &str) -> Option<(Decimal, bool)> {
    let negative = raw.contains('(') || raw.contains('-');
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    Decimal::from_str(&cleaned).ok().map(|d| (d, negative))
}

fn signed_amount(raw: &str) -> Option<Decimal> {
    parse_amount(raw).map(|(value, negative)| if negative { -value } else { value })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccountInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement_period: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_start: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_end: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opening_balance: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closing_balance: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParsedTransaction {
    pub line_number: usize,
    pub date: Option<NaiveDate>,
    pub raw_date: String,
    pub description: String,
    /// Always non-negative; direction lives in `transaction_type`.
    pub amount: Decimal,
    pub transaction_type: TransactionType,
    pub type_source: TypeSource,
    pub balance: Option<Decimal>,
    pub reference_number: Option<String>,
    pub merchant_name: Option<String>,
    pub raw_text: String,
    pub confidence: f64,
    pub flag_reason: Option<String>,
}

impl ParsedTransaction {
    pub fn is_flagged(&self) -> bool {
        self.flag_reason.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ParsedStatement {
    pub account_info: AccountInfo,
    pub transactions: Vec<ParsedTransaction>,
}

struct LinePattern {
    regex: Regex,
    named: bool,
}

impl LinePattern {
    fn new(regex: Regex) -> Self {
        let named = regex.capture_names().any(|n| n == Some("amount"));
        Self { regex, named }
    }

    fn group<'t>(&self, caps: &Captures<'t>, name: &str, index: usize) -> Option<&'t str> {
        let m = if self.named {
            caps.name(name)
        } else {
            caps.get(index)
        };
        m.map(|m| m.as_str())
    }
}

pub struct StatementParser {
    transaction: LinePattern,
    /// Built-in line pattern, tried on lines a bank pattern does not match.
    fallback: Option<LinePattern>,
    account_number: Option<Regex>,
    balance: Option<Regex>,
    date_format: DateFormat,
}

fn compile(field: &'static str, pattern: &str) -> Result<Regex, ExtractionError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| ExtractionError::InvalidPattern { field, source })
}

impl StatementParser {
    /// Build a parser from a bank's stored patterns, falling back to the
    /// built-in expressions for anything the bank does not define.
    pub fn new(
        patterns: Option<&BankPatterns>,
        date_format: DateFormat,
    ) -> Result<Self, ExtractionError> {
        let patterns = patterns.cloned().unwrap_or_default();

        let custom = patterns
            .transaction
            .as_deref()
            .map(|p| compile("transaction", p))
            .transpose()?;
        let account_number = patterns
            .account_number
            .as_deref()
            .map(|p| compile("account_number", p))
            .transpose()?;
        let balance = patterns
            .balance
            .as_deref()
            .map(|p| compile("balance", p))
            .transpose()?;

        let (transaction, fallback) = match custom {
            Some(regex) => (
                LinePattern::new(regex),
                Some(LinePattern::new(DEFAULT_TRANSACTION.clone())),
            ),
            None => (LinePattern::new(DEFAULT_TRANSACTION.clone()), None),
        };

        Ok(Self {
            transaction,
            fallback,
            account_number,
            balance,
            date_format,
        })
    }

    pub fn with_defaults() -> Self {
        Self {
            transaction: LinePattern::new(DEFAULT_TRANSACTION.clone()),
            fallback: None,
            account_number: None,
            balance: None,
            date_format: DateFormat::MonthFirst,
        }
    }

    pub fn parse(&self, text: &str) -> ParsedStatement {
        let account_info = self.extract_account_info(text);
        let default_year = account_info
            .period_end
            .or(account_info.period_start)
            .map(|d| d.year());

        let transactions =
            self.parse_transactions(text, account_info.opening_balance, default_year);

        ParsedStatement {
            account_info,
            transactions,
        }
    }

    pub fn extract_account_info(&self, text: &str) -> AccountInfo {
        let mut info = AccountInfo {
            account_number: self
                .find_account_number(text)
                .map(|n| truncate_chars(&n, ACCOUNT_NUMBER_MAX_CHARS)),
            customer_name: find_customer_name(text)
                .map(|n| truncate_chars(&n, CUSTOMER_NAME_MAX_CHARS)),
            ..Default::default()
        };

        if let Some(period) = STATEMENT_PERIOD.captures(text).and_then(|c| c.get(1)) {
            let period = period.as_str().trim().to_string();
            let mut bounds = PERIOD_SEPARATOR.splitn(&period, 2);
            let start_raw = bounds.next().unwrap_or_default();
            let end_raw = bounds.next().unwrap_or_default();
            info.period_end = self.date_format.parse(end_raw, None);
            info.period_start = self
                .date_format
                .parse(start_raw, info.period_end.map(|d| d.year()));
            info.statement_period = Some(period);
        }

        info.opening_balance = first_amount(&OPENING_BALANCE, text);
        info.closing_balance = first_amount(&CLOSING_BALANCE, text).or_else(|| {
            self.balance.as_ref().and_then(|re| {
                re.captures_iter(text)
                    .filter_map(|c| c.get(1).or_else(|| c.get(0)))
                    .filter_map(|m| signed_amount(m.as_str()))
                    .last()
            })
        });

        info
    }

    fn find_account_number(&self, text: &str) -> Option<String> {
        let bank_match = self.account_number.as_ref().and_then(|re| {
            re.captures(text)
                .and_then(|c| c.get(1).or_else(|| c.get(0)))
                .map(|m| m.as_str().trim().to_string())
        });

        bank_match.or_else(|| {
            ACCOUNT_NUMBER.captures_iter(text).find_map(|c| {
                let value = c.get(1)?.as_str().trim_matches('-');
                let digits = value.chars().filter(|ch| ch.is_ascii_digit()).count();
                (value.len() >= 4 && digits >= 2).then(|| value.to_string())
            })
        })
    }

    /// Parse every transaction line. `opening_balance` seeds running-balance
    /// inference; `default_year` completes dates printed without a year.
    pub fn parse_transactions(
        &self,
        text: &str,
        opening_balance: Option<Decimal>,
        default_year: Option<i32>,
    ) -> Vec<ParsedTransaction> {
        let mut previous_balance = opening_balance;
        let mut transactions = Vec::new();

        for (index, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || BALANCE_LINE.is_match(line) {
                continue;
            }

            let Some((pattern, caps)) = std::iter::once(&self.transaction)
                .chain(self.fallback.as_ref())
                .find_map(|p| p.regex.captures(line).map(|caps| (p, caps)))
            else {
                continue;
            };
            let (Some(raw_date), Some(description), Some(raw_amount)) = (
                pattern.group(&caps, "date", 1),
                pattern.group(&caps, "description", 2),
                pattern.group(&caps, "amount", 3),
            ) else {
                continue;
            };
            let Some((amount, negative)) = parse_amount(raw_amount) else {
                continue;
            };

            let direction = if pattern.named {
                caps.name("direction").map(|m| m.as_str().to_uppercase())
            } else {
                None
            };
            let balance = pattern
                .group(&caps, "balance", 4)
                .and_then(signed_amount);

            let description = description.split_whitespace().collect::<Vec<_>>().join(" ");
            let date = self.date_format.parse(raw_date, default_year);

            let mut reasons = Vec::new();
            let (transaction_type, type_source) = infer_type(
                amount,
                negative,
                direction.as_deref(),
                balance,
                previous_balance,
                &description,
                &mut reasons,
            );

            if date.is_none() {
                reasons.push(format!("unrecognised date '{}'", raw_date));
            }

            let confidence = score(date.is_some(), &description, type_source, balance.is_some(), &reasons);
            if confidence < FLAG_THRESHOLD && reasons.is_empty() {
                reasons.push(format!("low confidence ({:.2})", confidence));
            }

            if balance.is_some() {
                previous_balance = balance;
            } else if let Some(prev) = previous_balance {
                previous_balance = Some(match transaction_type {
                    TransactionType::Credit => prev + amount,
                    TransactionType::Debit => prev - amount,
                });
            }

            transactions.push(ParsedTransaction {
                line_number: index + 1,
                date,
                raw_date: raw_date.to_string(),
                reference_number: extract_reference(&description),
                merchant_name: extract_merchant(&description),
                description,
                amount,
                transaction_type,
                type_source,
                balance,
                raw_text: line.to_string(),
                confidence,
                flag_reason: (!reasons.is_empty())
                    .then(|| truncate_chars(&reasons.join("; "), FLAG_REASON_MAX_CHARS)),
            });
        }

        transactions
    }
}

fn first_amount(re: &Regex, text: &str) -> Option<Decimal> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| signed_amount(m.as_str()))
}

fn find_customer_name(text: &str) -> Option<String> {
    CUSTOMER_NAME.captures_iter(text).find_map(|c| {
        let words: Vec<&str> = c
            .get(1)?
            .as_str()
            .split_whitespace()
            .take_while(|w| !NAME_STOP_WORDS.contains(&w.to_lowercase().as_str()))
            .collect();
        (!words.is_empty()).then(|| words.join(" "))
    })
}

fn infer_type(
    amount: Decimal,
    negative: bool,
    direction: Option<&str>,
    balance: Option<Decimal>,
    previous_balance: Option<Decimal>,
    description: &str,
    reasons: &mut Vec<String>,
) -> (TransactionType, TypeSource) {
    if negative {
        return (TransactionType::Debit, TypeSource::Sign);
    }
    match direction {
        Some("CR") => return (TransactionType::Credit, TypeSource::Marker),
        Some("DR") => return (TransactionType::Debit, TypeSource::Marker),
        _ => {}
    }

    if let (Some(current), Some(previous)) = (balance, previous_balance) {
        let tolerance = Decimal::new(1, 2);
        let delta = current - previous;
        if (delta - amount).abs() <= tolerance {
            return (TransactionType::Credit, TypeSource::BalanceDelta);
        }
        if (delta + amount).abs() <= tolerance {
            return (TransactionType::Debit, TypeSource::BalanceDelta);
        }
        reasons.push(format!(
            "running balance moved by {} but amount is {}",
            delta, amount
        ));
    }

    let lower = format!("{} ", description.to_lowercase());
    let has = |hints: &[&str]| hints.iter().any(|h| lower.contains(h));
    if has(STRONG_CREDIT_HINTS) {
        (TransactionType::Credit, TypeSource::Keyword)
    } else if has(DEBIT_HINTS) {
        (TransactionType::Debit, TypeSource::Keyword)
    } else if has(WEAK_CREDIT_HINTS) {
        (TransactionType::Credit, TypeSource::Keyword)
    } else {
        (TransactionType::Debit, TypeSource::Default)
    }
}

fn score(
    has_date: bool,
    description: &str,
    source: TypeSource,
    has_balance: bool,
    reasons: &[String],
) -> f64 {
    let mut confidence: f64 = 1.0;
    if !has_date {
        confidence -= 0.4;
    }
    if description.chars().filter(|c| c.is_alphabetic()).count() < 3 {
        confidence -= 0.2;
    }
    confidence -= match source {
        TypeSource::Sign | TypeSource::Marker | TypeSource::BalanceDelta => 0.0,
        TypeSource::Keyword => 0.1,
        TypeSource::Default => 0.25,
    };
    if !has_balance {
        confidence -= 0.05;
    }
    if !reasons.is_empty() {
        confidence -= 0.2;
    }
    (confidence.clamp(0.0, 1.0) * 100.0).round() / 100.0
}

pub fn extract_reference(description: &str) -> Option<String> {
    REFERENCE.captures_iter(description).find_map(|c| {
        let value = c.get(1).or_else(|| c.get(2))?.as_str();
        value
            .chars()
            .any(|ch| ch.is_ascii_digit())
            .then(|| truncate_chars(&value.to_uppercase(), REFERENCE_MAX_CHARS))
    })
}

pub fn extract_merchant(description: &str) -> Option<String> {
    let stripped = MERCHANT_PREFIX.replace(description.trim(), "");
    let head = match MERCHANT_NOISE.find(&stripped) {
        Some(m) => &stripped[..m.start()],
        None => &stripped[..],
    };
    let merchant = head
        .trim()
        .trim_end_matches(|c: char| !c.is_alphanumeric())
        .to_string();
    (merchant.chars().filter(|c| c.is_alphabetic()).count() >= 2)
        .then(|| truncate_chars(&merchant, MERCHANT_MAX_CHARS))
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Per-institution regexes stored in `banks.statement_patterns`.
///
/// Any pattern may be absent; the parser falls back to its built-in
/// expression for that field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BankPatterns {
    #[serde(default)]
    pub account_number: Option<String>,
    #[serde(default)]
    pub balance: Option<String>,
    #[serde(default)]
    pub transaction: Option<String>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Bank {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub date_format: String,
    #[serde(rename = "patterns")]
    pub statement_patterns: serde_json::Value,
    #[serde(rename = "config")]
    pub config_json: serde_json::Value,
    pub is_active: bool,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub updated_at: DateTime<Utc>,
}

impl Bank {
    pub fn patterns(&self) -> BankPatterns {
        serde_json::from_value(self.statement_patterns.clone()).unwrap_or_else(|e| {
            tracing::warn!(bank = %self.code, error = %e, "Ignoring malformed statement_patterns");
            BankPatterns::default()
        })
    }

    /// Names the bank may appear under in statement text, lowercased.
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases = vec![self.name.to_lowercase()];
        if let Some(extra) = self.config_json.get("aliases").and_then(|a| a.as_array()) {
            aliases.extend(
                extra
                    .iter()
                    .filter_map(|a| a.as_str())
                    .map(|a| a.trim().to_lowercase())
                    .filter(|a| !a.is_empty()),
            );
        }
        aliases
    }

    /// Whether `supported_formats` lists any of `extensions`. Banks without
    /// the setting accept every format.
    pub fn supports_format(&self, extensions: &[&str]) -> bool {
        match self.config_json.get("supported_formats").and_then(|f| f.as_array()) {
            Some(formats) => formats
                .iter()
                .filter_map(|f| f.as_str())
                .any(|f| extensions.iter().any(|ext| f.eq_ignore_ascii_case(ext))),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bank(patterns: serde_json::Value, config: serde_json::Value) -> Bank {
        Bank {
            id: Uuid::new_v4(),
            name: "Wells Fargo".to_string(),
            code: "WF".to_string(),
            date_format: "MM/DD/YYYY".to_string(),
            statement_patterns: patterns,
            config_json: config,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn patterns_tolerate_missing_fields() {
        let b = bank(json!({ "account_number": "Account\\s*#?:?\\s*(\\d+)" }), json!({}));
        let p = b.patterns();
        assert!(p.account_number.is_some());
        assert!(p.transaction.is_none());
    }

    #[test]
    fn malformed_patterns_fall_back_to_default() {
        let b = bank(json!("not an object"), json!({}));
        assert_eq!(b.patterns(), BankPatterns::default());
    }

    #[test]
    fn aliases_include_name_and_config_entries() {
        let b = bank(json!({}), json!({ "aliases": ["WellsFargo.com", " "] }));
        assert_eq!(b.aliases(), vec!["wells fargo", "wellsfargo.com"]);
    }

    #[test]
    fn supported_formats_default_to_everything() {
        let open = bank(json!({}), json!({}));
        assert!(open.supports_format(&["pdf"]));

        let pdf_only = bank(json!({}), json!({ "supported_formats": ["PDF"] }));
        assert!(pdf_only.supports_format(&["pdf"]));
        assert!(!pdf_only.supports_format(&["png", "jpg", "jpeg"]));
    }
}

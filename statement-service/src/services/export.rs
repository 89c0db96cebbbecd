//! CSV and JSON rendering for transaction exports.

use chrono::{DateTime, Utc};
use serde_json::Value;
use service_core::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn parse(format: &str) -> Result<Self, AppError> {
        match format.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            _ => Err(AppError::BadRequest(anyhow::anyhow!("Invalid export format"))),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Csv => "text/csv",
            Self::Json => "application/json",
        }
    }

    /// `transactions_YYYYMMDD_HHMMSS.csv` or `statement_data_YYYYMMDD_HHMMSS.json`.
    pub fn filename(&self, at: DateTime<Utc>) -> String {
        let stamp = at.format("%Y%m%d_%H%M%S");
        match self {
            Self::Csv => format!("transactions_{}.csv", stamp),
            Self::Json => format!("statement_data_{}.json", stamp),
        }
    }
}

/// Render JSON objects as CSV. Columns are the union of all keys, in order
/// of first appearance.
pub fn rows_to_csv(rows: &[Value]) -> Result<Vec<u8>, AppError> {
    let mut columns: Vec<&str> = Vec::new();
    for row in rows {
        let obj = row.as_object().ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("Each transaction must be a JSON object"))
        })?;
        for key in obj.keys() {
            if !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
    }

    let mut wtr = csv::Writer::from_writer(Vec::new());
    if !columns.is_empty() {
        wtr.write_record(&columns)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Failed to write CSV header: {}", e)))?;
    }

    for row in rows {
        let record: Vec<String> = columns
            .iter()
            .map(|col| row.get(*col).map(cell).unwrap_or_default())
            .collect();
        wtr.write_record(&record)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Failed to write CSV row: {}", e)))?;
    }

    wtr.into_inner()
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Failed to flush CSV: {}", e)))
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn to_pretty_json(value: &Value) -> Result<Vec<u8>, AppError> {
    serde_json::to_vec_pretty(value)
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Failed to serialize export: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn csv_uses_union_of_keys() {
        let rows = vec![
            json!({"amount": "45.20", "description": "GROCERY"}),
            json!({"amount": "10.00", "category": "Food & Dining"}),
        ];

        let out = String::from_utf8(rows_to_csv(&rows).unwrap()).unwrap();
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(lines[0], "amount,description,category");
        assert_eq!(lines[1], "45.20,GROCERY,");
        assert_eq!(lines[2], "10.00,,Food & Dining");
    }

    #[test]
    fn csv_quotes_and_flattens_values() {
        let rows = vec![json!({
            "description": "PAYMENT, THANK YOU",
            "is_flagged": true,
            "balance": null,
            "confidence": 0.85,
        })];

        let out = String::from_utf8(rows_to_csv(&rows).unwrap()).unwrap();
        assert!(out.contains("\"PAYMENT, THANK YOU\""));
        assert!(out.contains("true"));
        assert!(out.contains("0.85"));
    }

    #[test]
    fn empty_export_is_empty_csv() {
        assert!(rows_to_csv(&[]).unwrap().is_empty());
    }

    #[test]
    fn non_object_rows_are_rejected() {
        let err = rows_to_csv(&[json!([1, 2])]).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn formats_and_filenames() {
        assert_eq!(ExportFormat::parse("CSV").unwrap(), ExportFormat::Csv);
        assert_eq!(ExportFormat::parse("json").unwrap(), ExportFormat::Json);
        assert!(ExportFormat::parse("xlsx").is_err());

        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(ExportFormat::Csv.filename(at), "transactions_20240309_140507.csv");
        assert_eq!(ExportFormat::Json.filename(at), "statement_data_20240309_140507.json");
    }
}

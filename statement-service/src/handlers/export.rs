use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use service_core::error::AppError;

use crate::{
    dtos::statements::CleanupResponse,
    middleware::AuthUser,
    services::{export, ExportFormat},
    AppState,
};

/// File download with the export's content type and timestamped name.
pub fn attachment(format: ExportFormat, at: DateTime<Utc>, body: Vec<u8>) -> Response {
    let disposition = format!("attachment; filename=\"{}\"", format.filename(at));
    (
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response()
}

/// Render client-supplied data for download.
///
/// `csv` tabulates `body.transactions`; `json` returns the whole body.
pub async fn export_data(
    _user: AuthUser,
    Path(format): Path<String>,
    Json(data): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let format = ExportFormat::parse(&format)?;

    let body = match format {
        ExportFormat::Csv => {
            let rows = match data.get("transactions") {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(rows)) => rows.clone(),
                Some(_) => {
                    return Err(AppError::BadRequest(anyhow::anyhow!(
                        "transactions must be an array"
                    )))
                }
            };
            export::rows_to_csv(&rows)?
        }
        ExportFormat::Json => export::to_pretty_json(&data)?,
    };

    Ok(attachment(format, Utc::now(), body))
}

/// Remove stored uploads older than the configured retention window.
pub async fn cleanup_uploads(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let retention = state.config.storage.retention();
    let removed = state.storage.purge_older_than(retention).await?;

    Ok(Json(CleanupResponse {
        removed,
        retention_seconds: retention.as_secs(),
    }))
}

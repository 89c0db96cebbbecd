use axum::{
    extract::{multipart::Field, Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::json;
use service_core::error::AppError;

use crate::{
    dtos::statements::ProcessResponse,
    extraction::FileKind,
    middleware::AuthUser,
    models::{LogAction, LogStatus, NewProcessingLog, NewStatement},
    utils::{stored_filename, truncate_chars, ORIGINAL_FILENAME_MAX_CHARS},
    AppState,
};

/// Upload a statement and run it through OCR, extraction and categorization.
///
/// Served on both `/ocr/process` and `/upload`.
pub async fn process_statement(
    State(state): State<AppState>,
    user: AuthUser,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let user_id = user.user_id()?;

    let mut file = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some("file") {
            file = Some(read_file(field).await?);
            break;
        }
    }

    let (original_filename, data) = file
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("No file part in the request")))?;

    if original_filename.trim().is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!("No selected file")));
    }
    let kind = FileKind::from_filename(&original_filename)?;
    if data.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!("Uploaded file is empty")));
    }

    let original_filename = truncate_chars(&original_filename, ORIGINAL_FILENAME_MAX_CHARS);
    let file_size = data.len();
    let key = stored_filename(&original_filename, Utc::now());
    state.storage.upload(&key, data).await.map_err(|e| {
        tracing::error!(key = %key, error = %e, "Failed to store upload");
        e
    })?;
    let path = state.storage.path(&key);

    let created = state
        .db
        .create_statement(&NewStatement {
            user_id,
            original_filename: original_filename.clone(),
            stored_filename: key.clone(),
            file_path: path.to_string_lossy().into_owned(),
            file_size: file_size as i64,
            file_type: kind.as_str().to_string(),
        })
        .await;
    let statement = match created {
        Ok(statement) => statement,
        Err(e) => {
            // Orphaned: no statement row points at the file.
            if let Err(cleanup) = state.storage.delete(&key).await {
                tracing::warn!(key = %key, error = %cleanup, "Failed to remove orphaned upload");
            }
            return Err(e);
        }
    };

    tracing::info!(
        statement_id = %statement.id,
        filename = %original_filename,
        size = file_size,
        kind = kind.as_str(),
        "Statement uploaded"
    );

    state
        .db
        .insert_processing_log(
            user_id,
            &NewProcessingLog::new(
                statement.id,
                LogAction::Upload,
                LogStatus::Success,
                "File uploaded",
            )
            .details(json!({
                "filename": original_filename,
                "stored_filename": key,
                "size": file_size,
            })),
        )
        .await?;

    let outcome = state
        .pipeline
        .process(user_id, statement.id, &path, kind)
        .await?;

    Ok((
        StatusCode::OK,
        Json(ProcessResponse::new(original_filename, outcome)),
    ))
}

async fn read_file(field: Field<'_>) -> Result<(String, Vec<u8>), AppError> {
    let filename = field.file_name().unwrap_or_default().to_string();
    let data = field.bytes().await.map_err(multipart_error)?;
    Ok((filename, data.to_vec()))
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge("Uploaded file exceeds the size limit".to_string())
    } else {
        AppError::BadRequest(anyhow::anyhow!("Failed to read multipart body: {}", e.body_text()))
    }
}

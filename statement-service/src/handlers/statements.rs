use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::json;
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::{
        statements::{
            ListStatementsQuery, StatementDetailResponse, StatementListResponse,
            TransactionListResponse,
        },
        MessageResponse,
    },
    middleware::AuthUser,
    models::StatementSummary,
    services::{export, ExportFormat},
    AppState,
};

use super::export::attachment;

fn not_found() -> AppError {
    AppError::NotFound(anyhow::anyhow!("Statement not found"))
}

async fn owned_statement(
    state: &AppState,
    user_id: Uuid,
    statement_id: Uuid,
) -> Result<StatementSummary, AppError> {
    state
        .db
        .get_statement(user_id, statement_id)
        .await?
        .ok_or_else(not_found)
}

/// Caller's statements, newest first
pub async fn list_statements(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListStatementsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = user.user_id()?;
    let (page, page_size) = query.normalized();

    let (statements, total) = state.db.list_statements(user_id, page, page_size).await?;

    Ok(Json(StatementListResponse::new(
        statements, page, page_size, total,
    )))
}

pub async fn get_statement(
    State(state): State<AppState>,
    user: AuthUser,
    Path(statement_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let summary = owned_statement(&state, user.user_id()?, statement_id).await?;
    Ok(Json(StatementDetailResponse::from(summary)))
}

/// Delete a statement, its transactions and logs, and the stored upload.
pub async fn delete_statement(
    State(state): State<AppState>,
    user: AuthUser,
    Path(statement_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let deleted = state
        .db
        .delete_statement(user.user_id()?, statement_id)
        .await?
        .ok_or_else(not_found)?;

    // The row is gone either way; a leftover file is picked up by cleanup.
    if let Err(e) = state.storage.delete(&deleted.stored_filename).await {
        tracing::warn!(
            statement_id = %statement_id,
            error = %e,
            "Failed to remove stored upload"
        );
    }

    Ok(Json(MessageResponse {
        message: "Statement deleted".to_string(),
    }))
}

pub async fn list_statement_transactions(
    State(state): State<AppState>,
    user: AuthUser,
    Path(statement_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = user.user_id()?;
    owned_statement(&state, user_id, statement_id).await?;

    let transactions = state.db.list_transactions(user_id, statement_id).await?;

    Ok(Json(TransactionListResponse {
        statement_id,
        count: transactions.len(),
        transactions,
    }))
}

pub async fn list_statement_logs(
    State(state): State<AppState>,
    user: AuthUser,
    Path(statement_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = user.user_id()?;
    owned_statement(&state, user_id, statement_id).await?;

    let logs = state.db.list_processing_logs(user_id, statement_id).await?;
    Ok(Json(logs))
}

/// Opening balance + credits - debits against the stated closing balance
pub async fn statement_balance_check(
    State(state): State<AppState>,
    user: AuthUser,
    Path(statement_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let check = state
        .db
        .check_balance_consistency(user.user_id()?, statement_id)
        .await?
        .ok_or_else(not_found)?;
    Ok(Json(check))
}

/// Download a processed statement's transactions as CSV or JSON.
pub async fn export_statement(
    State(state): State<AppState>,
    user: AuthUser,
    Path((statement_id, format)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, AppError> {
    let format = ExportFormat::parse(&format)?;
    let user_id = user.user_id()?;

    let summary = owned_statement(&state, user_id, statement_id).await?;
    let transactions = state.db.list_transactions(user_id, statement_id).await?;

    let body = match format {
        ExportFormat::Csv => {
            let rows = transactions
                .iter()
                .map(serde_json::to_value)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| {
                    AppError::InternalError(anyhow::anyhow!("Failed to serialize transactions: {}", e))
                })?;
            export::rows_to_csv(&rows)?
        }
        ExportFormat::Json => export::to_pretty_json(&json!({
            "statement": StatementDetailResponse::from(summary),
            "transactions": transactions,
        }))?,
    };

    tracing::info!(
        statement_id = %statement_id,
        format = ?format,
        "Statement exported"
    );

    Ok(attachment(format, Utc::now(), body))
}

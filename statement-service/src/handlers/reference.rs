use axum::{extract::State, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{models::CategoryNode, AppState};

/// Active banks with their detection patterns
pub async fn list_banks(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let banks = state.db.list_banks(true).await?;
    Ok(Json(banks))
}

/// Category tree: top-level categories with nested subcategories
pub async fn list_categories(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let categories = state.db.list_categories().await?;
    Ok(Json(CategoryNode::build_tree(&categories)))
}

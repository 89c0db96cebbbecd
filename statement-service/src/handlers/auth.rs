use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::auth::{LoginRequest, LoginResponse, ProtectedResponse, RegisterRequest, RegisterResponse},
    middleware::AuthUser,
    utils::{hash_password, verify_password, ValidatedJson},
    AppState,
};

/// Register a new user
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let email = req.email.to_lowercase();

    if state.db.find_user_by_email(&email).await?.is_some() {
        return Err(AppError::Conflict(anyhow::anyhow!("Email already registered")));
    }

    let password_hash = hash_password(&req.password)?;
    let user = state.db.create_user(&req.username, &email, &password_hash).await?;

    tracing::info!(user_id = %user.id, "User registered");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully".to_string(),
            user_id: user.id,
        }),
    ))
}

/// Exchange email and password for an access token
pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let invalid = || AppError::Unauthorized(anyhow::anyhow!("Invalid credentials"));

    let user = state
        .db
        .find_user_by_email(&req.email.to_lowercase())
        .await?
        .ok_or_else(invalid)?;

    if !verify_password(&req.password, &user.password_hash)? {
        tracing::warn!(user_id = %user.id, "Failed login attempt");
        return Err(invalid());
    }

    let access_token = state
        .jwt
        .generate_access_token(&user.id.to_string(), &user.username)?;

    tracing::info!(user_id = %user.id, "User logged in");

    Ok(Json(LoginResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.jwt.access_token_expiry_seconds(),
    }))
}

/// Echo the authenticated user's id
pub async fn protected(user: AuthUser) -> Result<impl IntoResponse, AppError> {
    Ok(Json(ProtectedResponse {
        logged_in_as: user.user_id()?,
    }))
}

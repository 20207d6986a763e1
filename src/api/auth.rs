use axum::{extract::State, routing::{get, post}, Json, Router};
use serde::Deserialize;
use tower_sessions::Session;

use crate::api::middleware::{
    auth::{get_caller, AuthError, Caller},
    session::{AppState, SESSION_KEY_CALLER},
};
use crate::api::response::ApiResponse;
use crate::error::{AppError, Result};
use crate::services::password;

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

/// Verifies credentials and stores the caller in a fresh session
async fn login(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<LoginRequest>,
) -> Result<Json<ApiResponse<Caller>>> {
    let user = state
        .engine
        .primary()
        .find_user_by_email(request.email.trim())
        .await?;

    let Some(user) = user else {
        password::verify_unknown_user(&request.password);
        tracing::warn!(email = %request.email, "Login attempt for unknown user");
        return Err(AppError::Unauthorized);
    };

    let valid = password::verify_password(&request.password, &user.password_hash)
        .map_err(|e| AppError::Internal(e.to_string()))?;
    if !valid {
        tracing::warn!(user_id = %user.id, "Login attempt with wrong password");
        return Err(AppError::Unauthorized);
    }

    let caller = Caller {
        user_id: user.id,
        email: user.email,
        role: user.role,
        client_id: user.client_id,
    };

    session
        .cycle_id()
        .await
        .map_err(|_| AuthError::SessionError)?;
    session
        .insert(SESSION_KEY_CALLER, caller.clone())
        .await
        .map_err(|_| AuthError::SessionError)?;

    tracing::info!(user_id = %caller.user_id, role = ?caller.role, "User logged in");

    Ok(ApiResponse::ok("Logged in", caller))
}

/// Logs out the user
async fn logout(session: Session) -> Result<Json<ApiResponse<()>>> {
    session.flush().await.map_err(|_| AuthError::SessionError)?;
    Ok(ApiResponse::message("Logged out"))
}

async fn me(session: Session) -> Result<Json<ApiResponse<Caller>>> {
    let caller = get_caller(&session).await?;
    Ok(ApiResponse::ok("Current user", caller))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
}

use axum::{
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use uuid::Uuid;

use super::session::SESSION_KEY_CALLER;
use crate::error::AppError;
use crate::models::Role;
use crate::services::account_query::Visibility;

/// Authentication error responses
#[derive(Debug)]
pub enum AuthError {
    Unauthorized,
    Forbidden,
    SessionError,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        AppError::from(self).into_response()
    }
}

/// The logged-in user, as stored in the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    pub client_id: Option<Uuid>,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn visibility(&self) -> Visibility {
        Visibility::for_role(self.role, self.client_id)
    }
}

/// Middleware that requires the user to be authenticated
pub async fn require_auth(
    session: Session,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    get_caller(&session).await?;
    Ok(next.run(request).await)
}

/// Reads the caller from the session
pub async fn get_caller(session: &Session) -> Result<Caller, AuthError> {
    session
        .get::<Caller>(SESSION_KEY_CALLER)
        .await
        .map_err(|_| AuthError::SessionError)?
        .ok_or(AuthError::Unauthorized)
}

/// Same as `get_caller` but rejects non-administrators
pub async fn require_admin(session: &Session) -> Result<Caller, AuthError> {
    let caller = get_caller(session).await?;
    if !caller.is_admin() {
        tracing::warn!(user_id = %caller.user_id, "Non-admin caller on admin route");
        return Err(AuthError::Forbidden);
    }
    Ok(caller)
}

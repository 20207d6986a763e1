// API module - HTTP endpoints

use axum::Router;

use crate::api::middleware::session::AppState;

pub mod accounts;
pub mod auth;
pub mod health;
pub mod middleware;
pub mod response;

/// All routes, without the session layer
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(auth::router())
        .merge(accounts::router())
}

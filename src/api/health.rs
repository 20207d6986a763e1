use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::future::Future;
use std::time::Instant;

use crate::api::middleware::session::AppState;
use crate::api::response::ApiResponse;
use crate::services::store::StoreResult;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: String,
    pub timestamp: String,
    pub version: String,
    pub dependencies: DependencyStatus,
}

#[derive(Debug, Serialize)]
pub struct DependencyStatus {
    pub primary_database: ServiceHealth,
    pub archive_database: ServiceHealth,
}

#[derive(Debug, Serialize)]
pub struct ServiceHealth {
    pub status: String,
    pub response_time_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Health check endpoint
/// Returns 200 if both databases answer, 503 otherwise
pub async fn health_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<ApiResponse<HealthReport>>) {
    let start = Instant::now();

    let primary = check_store(state.engine.primary().ping()).await;
    let archive = check_store(state.engine.archive().ping()).await;

    let all_healthy = primary.status == "healthy" && archive.status == "healthy";
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let report = HealthReport {
        status: if all_healthy {
            "healthy".to_string()
        } else {
            "unhealthy".to_string()
        },
        timestamp: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        dependencies: DependencyStatus {
            primary_database: primary,
            archive_database: archive,
        },
    };

    tracing::info!(
        status = %report.status,
        duration_ms = start.elapsed().as_millis(),
        "Health check completed"
    );

    let mut body = ApiResponse::ok("Health check completed", report);
    body.0.success = all_healthy;

    (status_code, body)
}

async fn check_store(ping: impl Future<Output = StoreResult<()>>) -> ServiceHealth {
    let start = Instant::now();

    match ping.await {
        Ok(()) => ServiceHealth {
            status: "healthy".to_string(),
            response_time_ms: start.elapsed().as_millis(),
            error: None,
        },
        Err(e) => ServiceHealth {
            status: "unhealthy".to_string(),
            response_time_ms: start.elapsed().as_millis(),
            error: Some(e.to_string()),
        },
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

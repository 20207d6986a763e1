use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use uuid::Uuid;

use crate::api::middleware::{
    auth::{get_caller, require_admin, require_auth},
    session::AppState,
};
use crate::api::response::ApiResponse;
use crate::error::{AppError, Result};
use crate::models::{client::CreateClientData, Account, AccountKind, AccountView, ArchivedAccount};
use crate::services::account_query::{
    self, page_offset, AccountQuery, PageLinks, Pagination, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
use crate::services::lifecycle::{
    AccountHolder, AccountLookup, BlockRequest, CreateAccountRequest, StoreLocation, Transition,
    UnblockRequest, UpdateAccountRequest,
};

#[derive(Debug, Serialize)]
pub struct AccountList {
    pub accounts: Vec<AccountView>,
    pub pagination: Pagination,
    pub links: PageLinks,
}

#[derive(Debug, Serialize)]
pub struct ArchivedList {
    pub accounts: Vec<ArchivedAccount>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct TransitionData {
    pub account: Account,
    pub location: StoreLocation,
    pub archived: bool,
}

impl From<Transition> for TransitionData {
    fn from(transition: Transition) -> Self {
        Self {
            account: transition.account,
            location: transition.location,
            archived: transition.location == StoreLocation::Archive,
        }
    }
}

async fn list_accounts(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<AccountQuery>,
) -> Result<Json<ApiResponse<AccountList>>> {
    let caller = get_caller(&session).await?;
    let params = query.normalize();

    let (accounts, pagination) =
        account_query::list_accounts(state.engine.primary(), caller.visibility(), &params).await?;

    let listing_url = state
        .config
        .base_url
        .join("accounts")
        .map_err(|e| AppError::Internal(format!("invalid base url: {}", e)))?;
    let links = PageLinks::build(&listing_url, &params, &pagination);

    Ok(ApiResponse::ok(
        "Accounts retrieved",
        AccountList {
            accounts,
            pagination,
            links,
        },
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateAccountBody {
    client_id: Option<Uuid>,
    client: Option<CreateClientData>,
    kind: AccountKind,
    currency: String,
    initial_balance: Option<Decimal>,
}

async fn create_account(
    State(state): State<AppState>,
    session: Session,
    Json(body): Json<CreateAccountBody>,
) -> Result<(StatusCode, Json<ApiResponse<Account>>)> {
    require_admin(&session).await?;

    let holder = match (body.client_id, body.client) {
        (Some(id), None) => AccountHolder::Existing(id),
        (None, Some(data)) => AccountHolder::New(data),
        _ => {
            return Err(AppError::Validation(
                "Provide either clientId or client".to_string(),
            ))
        }
    };

    let account = state
        .engine
        .create(CreateAccountRequest {
            holder,
            kind: body.kind,
            currency: body.currency,
            initial_balance: body.initial_balance,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        ApiResponse::ok("Account created", account),
    ))
}

#[derive(Deserialize)]
struct PageQuery {
    page: Option<i64>,
    limit: Option<i64>,
}

async fn list_archived(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<PageQuery>,
) -> Result<Json<ApiResponse<ArchivedList>>> {
    require_admin(&session).await?;

    let page = query.page.unwrap_or(1).max(1);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let (accounts, total) = state
        .engine
        .archive()
        .list(limit, page_offset(page, limit))
        .await?;

    Ok(ApiResponse::ok(
        "Archived accounts retrieved",
        ArchivedList {
            accounts,
            pagination: Pagination::new(page, limit, total),
        },
    ))
}

/// Looks an account up by id or number. Archived accounts answer 410.
async fn get_account(
    State(state): State<AppState>,
    session: Session,
    Path(key): Path<String>,
) -> Result<Json<ApiResponse<Account>>> {
    let caller = get_caller(&session).await?;
    let visibility = caller.visibility();

    match state.engine.find(&key).await? {
        AccountLookup::Live(account) if caller.is_admin() || visibility.matches(&account) => {
            Ok(ApiResponse::ok("Account retrieved", account))
        }
        AccountLookup::Archived(record) if visibility.covers_client(record.client_id) => Err(
            AppError::Gone(format!("Account {} has been archived", record.numero)),
        ),
        _ => Err(AppError::NotFound(format!("Account {} not found", key))),
    }
}

#[derive(Deserialize)]
struct UpdateAccountBody {
    currency: Option<String>,
    version: Option<i64>,
}

async fn update_account(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateAccountBody>,
) -> Result<Json<ApiResponse<Account>>> {
    require_admin(&session).await?;

    let account = state
        .engine
        .update(
            id,
            UpdateAccountRequest {
                currency: body.currency,
                expected_version: body.version,
            },
        )
        .await?;

    Ok(ApiResponse::ok("Account updated", account))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockBody {
    reason: String,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    version: Option<i64>,
}

async fn block_account(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<Uuid>,
    Json(body): Json<BlockBody>,
) -> Result<Json<ApiResponse<TransitionData>>> {
    let caller = require_admin(&session).await?;

    let transition = state
        .engine
        .block(
            id,
            BlockRequest {
                reason: body.reason,
                start_date: body.start_date,
                end_date: body.end_date,
                expected_version: body.version,
            },
        )
        .await?;

    tracing::info!(account_id = %id, user_id = %caller.user_id, "Block requested");

    let message = match transition.location {
        StoreLocation::Archive => "Account blocked",
        StoreLocation::Primary => "Block scheduled",
    };

    Ok(ApiResponse::ok(message, transition.into()))
}

#[derive(Deserialize)]
struct UnblockBody {
    reason: Option<String>,
    version: Option<i64>,
}

async fn unblock_account(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<Uuid>,
    Json(body): Json<UnblockBody>,
) -> Result<Json<ApiResponse<TransitionData>>> {
    let caller = require_admin(&session).await?;

    let transition = state
        .engine
        .unblock(
            id,
            UnblockRequest {
                reason: body.reason,
                expected_version: body.version,
            },
        )
        .await?;

    tracing::info!(account_id = %id, user_id = %caller.user_id, "Unblock requested");

    Ok(ApiResponse::ok("Account unblocked", transition.into()))
}

#[derive(Deserialize)]
struct VersionQuery {
    version: Option<i64>,
}

async fn delete_account(
    State(state): State<AppState>,
    session: Session,
    Path(numero): Path<String>,
    Query(query): Query<VersionQuery>,
) -> Result<Json<ApiResponse<TransitionData>>> {
    let caller = require_admin(&session).await?;

    let transition = state
        .engine
        .delete_and_archive(&numero, query.version)
        .await?;

    tracing::info!(numero = %numero, user_id = %caller.user_id, "Closure requested");

    Ok(ApiResponse::ok(
        "Account closed and archived",
        transition.into(),
    ))
}

async fn restore_account(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<TransitionData>>> {
    let caller = require_admin(&session).await?;

    let transition = state.engine.restore(id).await?;

    tracing::info!(account_id = %id, user_id = %caller.user_id, "Restore requested");

    Ok(ApiResponse::ok("Account restored", transition.into()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/accounts", get(list_accounts).post(create_account))
        .route("/accounts/archived", get(list_archived))
        .route(
            "/accounts/:id",
            get(get_account)
                .patch(update_account)
                .delete(delete_account),
        )
        .route("/accounts/:id/block", post(block_account))
        .route("/accounts/:id/unblock", post(unblock_account))
        .route("/accounts/restore/:id", post(restore_account))
        .route_layer(middleware::from_fn(require_auth))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request},
        response::Response,
    };
    use chrono::Utc;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;
    use tower_sessions::{MemoryStore, SessionManagerLayer};

    use crate::config::Config;
    use crate::models::{AccountStatus, Role, User};
    use crate::services::lifecycle::{ArchivePolicy, LifecycleEngine};
    use crate::services::password::hash_password;
    use crate::services::store::memory::{MemoryArchiveStore, MemoryPrimaryStore};

    struct TestApp {
        router: Router,
        primary: MemoryPrimaryStore,
        archive: MemoryArchiveStore,
    }

    fn test_app() -> TestApp {
        let primary = MemoryPrimaryStore::new();
        let archive = MemoryArchiveStore::new();
        let engine = LifecycleEngine::new(
            Arc::new(primary.clone()),
            Arc::new(archive.clone()),
            ArchivePolicy::default(),
        );
        let state = AppState {
            engine: Arc::new(engine),
            config: Config::for_tests(),
        };

        let router = crate::api::router()
            .layer(SessionManagerLayer::new(MemoryStore::default()).with_secure(false))
            .with_state(state);

        TestApp {
            router,
            primary,
            archive,
        }
    }

    async fn seed_user(app: &TestApp, email: &str, role: Role, client_id: Option<Uuid>) {
        app.primary
            .seed_user(User {
                id: Uuid::new_v4(),
                email: email.to_string(),
                password_hash: hash_password("correct horse").unwrap(),
                role,
                client_id,
                created_at: Utc::now(),
            })
            .await;
    }

    async fn login(app: &TestApp, email: &str) -> String {
        let response = send(
            app,
            "POST",
            "/auth/login",
            None,
            Some(json!({ "email": email, "password": "correct horse" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap();
        cookie.split(';').next().unwrap().to_string()
    }

    async fn admin(app: &TestApp) -> String {
        seed_user(app, "admin@bank.test", Role::Admin, None).await;
        login(app, "admin@bank.test").await
    }

    async fn send(
        app: &TestApp,
        method: &str,
        uri: &str,
        cookie: Option<&str>,
        body: Option<Value>,
    ) -> Response {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        let body = match body {
            Some(json) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        app.router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_requires_login() {
        let app = test_app();
        let response = send(&app, "GET", "/accounts", None, None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_wrong_password_rejected() {
        let app = test_app();
        seed_user(&app, "admin@bank.test", Role::Admin, None).await;

        let response = send(
            &app,
            "POST",
            "/auth/login",
            None,
            Some(json!({ "email": "admin@bank.test", "password": "nope" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let wrong_password = json_body(response).await;

        let response = send(
            &app,
            "POST",
            "/auth/login",
            None,
            Some(json!({ "email": "ghost@bank.test", "password": "nope" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await, wrong_password);
    }

    #[tokio::test]
    async fn test_block_then_get_returns_gone() {
        let app = test_app();
        let cookie = admin(&app).await;
        let client = app.primary.seed_client("Mame Diarra").await;
        let account = app
            .primary
            .seed_account(client.id, "CP7000000001", AccountKind::Savings, AccountStatus::Active)
            .await;

        let response = send(
            &app,
            "POST",
            &format!("/accounts/{}/block", account.id),
            Some(&cookie),
            Some(json!({ "reason": "fraud review", "version": 1 })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["data"]["location"], "archive");
        assert_eq!(body["data"]["archived"], true);
        assert_eq!(body["data"]["account"]["status"], "blocked");
        assert!(app.archive.record(account.id).await.is_some());

        let response = send(&app, "GET", "/accounts/CP7000000001", Some(&cookie), None).await;
        assert_eq!(response.status(), StatusCode::GONE);

        let response = send(
            &app,
            "POST",
            &format!("/accounts/{}/unblock", account.id),
            Some(&cookie),
            Some(json!({ "reason": "cleared" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(
            &app,
            "GET",
            &format!("/accounts/{}", account.id),
            Some(&cookie),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["data"]["status"], "active");
        assert_eq!(body["data"]["version"], 3);
    }

    #[tokio::test]
    async fn test_block_checking_is_bad_request() {
        let app = test_app();
        let cookie = admin(&app).await;
        let client = app.primary.seed_client("Pape Ndour").await;
        let account = app
            .primary
            .seed_account(client.id, "CP7000000002", AccountKind::Checking, AccountStatus::Active)
            .await;

        let response = send(
            &app,
            "POST",
            &format!("/accounts/{}/block", account.id),
            Some(&cookie),
            Some(json!({ "reason": "test" })),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["code"], "INVALID_OPERATION");
    }

    #[tokio::test]
    async fn test_archive_outage_is_bad_gateway() {
        let app = test_app();
        let cookie = admin(&app).await;
        let client = app.primary.seed_client("Binta Camara").await;
        let account = app
            .primary
            .seed_account(client.id, "CP7000000003", AccountKind::Savings, AccountStatus::Active)
            .await;
        app.archive.fail_inserts(true);

        let response = send(
            &app,
            "DELETE",
            "/accounts/CP7000000003",
            Some(&cookie),
            None,
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(app.primary.account(account.id).await.unwrap().is_live());
    }

    #[tokio::test]
    async fn test_delete_unknown_and_restore_missing() {
        let app = test_app();
        let cookie = admin(&app).await;

        let response = send(&app, "DELETE", "/accounts/CP0000000000", Some(&cookie), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(
            &app,
            "POST",
            &format!("/accounts/restore/{}", Uuid::new_v4()),
            Some(&cookie),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_then_restore_via_api() {
        let app = test_app();
        let cookie = admin(&app).await;
        let client = app.primary.seed_client("Lamine Faye").await;
        let account = app
            .primary
            .seed_account(client.id, "CP7000000004", AccountKind::Savings, AccountStatus::Active)
            .await;

        let response = send(
            &app,
            "DELETE",
            "/accounts/CP7000000004?version=1",
            Some(&cookie),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&app, "GET", "/accounts/archived", Some(&cookie), None).await;
        let body = json_body(response).await;
        assert_eq!(body["data"]["pagination"]["totalItems"], 1);
        assert_eq!(body["data"]["accounts"][0]["archiveReason"], "manual closure");

        let response = send(
            &app,
            "POST",
            &format!("/accounts/restore/{}", account.id),
            Some(&cookie),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["data"]["location"], "primary");
        assert_eq!(body["data"]["archived"], false);
        assert_eq!(app.archive.len().await, 0);
    }

    #[tokio::test]
    async fn test_huge_page_number_returns_empty_page() {
        let app = test_app();
        let cookie = admin(&app).await;
        let client = app.primary.seed_client("Ndeye Fall").await;
        app.primary
            .seed_account(client.id, "CP7000000005", AccountKind::Checking, AccountStatus::Active)
            .await;

        for uri in [
            "/accounts?page=9223372036854775807&limit=100",
            "/accounts/archived?page=9223372036854775807&limit=100",
        ] {
            let response = send(&app, "GET", uri, Some(&cookie), None).await;
            assert_eq!(response.status(), StatusCode::OK);
            let body = json_body(response).await;
            assert_eq!(body["data"]["accounts"].as_array().unwrap().len(), 0);
            assert_eq!(body["data"]["pagination"]["hasNext"], false);
        }
    }

    #[tokio::test]
    async fn test_client_sees_only_own_visible_accounts() {
        let app = test_app();
        let own = app.primary.seed_client("Awa Mbaye").await;
        let other = app.primary.seed_client("Modou Sy").await;
        app.primary
            .seed_account(own.id, "CP8000000001", AccountKind::Savings, AccountStatus::Active)
            .await;
        app.primary
            .seed_account(own.id, "CP8000000002", AccountKind::Checking, AccountStatus::Blocked)
            .await;
        app.primary
            .seed_account(own.id, "CP8000000003", AccountKind::Savings, AccountStatus::Closed)
            .await;
        app.primary
            .seed_account(other.id, "CP8000000004", AccountKind::Checking, AccountStatus::Active)
            .await;

        seed_user(&app, "awa@bank.test", Role::Client, Some(own.id)).await;
        let cookie = login(&app, "awa@bank.test").await;

        let response = send(&app, "GET", "/accounts?limit=1", Some(&cookie), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let pagination = &body["data"]["pagination"];
        assert_eq!(pagination["totalItems"], 2);
        assert_eq!(pagination["totalPages"], 2);
        assert_eq!(pagination["hasNext"], true);
        assert!(body["data"]["links"]["next"]
            .as_str()
            .unwrap()
            .contains("page=2"));

        let response = send(&app, "GET", "/accounts/CP8000000004", Some(&cookie), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(
            &app,
            "POST",
            &format!("/accounts/{}/block", Uuid::new_v4()),
            Some(&cookie),
            Some(json!({ "reason": "self service" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_create_account_for_existing_client() {
        let app = test_app();
        let cookie = admin(&app).await;
        let client = app.primary.seed_client("Seynabou Gaye").await;

        let response = send(
            &app,
            "POST",
            "/accounts",
            Some(&cookie),
            Some(json!({
                "clientId": client.id,
                "kind": "savings",
                "currency": "XOF",
                "initialBalance": "25000.00"
            })),
        )
        .await;

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        assert_eq!(body["data"]["kind"], "savings");
        assert_eq!(body["data"]["version"], 1);
        assert!(body["data"]["numero"].as_str().unwrap().starts_with("CP"));
    }
}

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{delete, get, post},
};
use futures::{Stream, stream};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;

use crate::config::Config;
use morsel_core::db::{Database, SqliteStore};
use morsel_core::models::{FoodEntry, NewEntry};
use morsel_core::store::EntryStore;

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB

#[derive(Clone)]
struct AppState {
    store: Arc<SqliteStore>,
    app_id: String,
    api_key: Option<String>,
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct TokenRequest {
    token: String,
}

#[derive(Serialize)]
struct UserResponse {
    user_id: String,
}

#[derive(Deserialize)]
struct CreateEntryRequest {
    name: String,
    #[serde(default)]
    calories: f64,
    #[serde(default)]
    protein: f64,
    #[serde(default)]
    fat: f64,
    #[serde(default)]
    carbs: f64,
    #[serde(default)]
    fiber: f64,
    created_at: i64,
}

#[derive(Serialize)]
struct CreatedResponse {
    id: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(err) => {
                tracing::error!("internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(ref expected_key) = state.api_key {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected_key);

        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or missing API key".to_string(),
                }),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Handlers ---

fn check_app(state: &AppState, app: &str) -> Result<(), ApiError> {
    if app == state.app_id {
        Ok(())
    } else {
        Err(ApiError::NotFound(format!("Unknown application '{app}'")))
    }
}

async fn sign_in_anonymous(State(state): State<AppState>) -> Json<UserResponse> {
    Json(UserResponse {
        user_id: state.store.anonymous_user(),
    })
}

async fn exchange_token(
    State(state): State<AppState>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let user_id = state
        .store
        .exchange_token(&req.token)
        .map_err(|e| ApiError::BadRequest(format!("{e}")))?;
    Ok(Json(UserResponse { user_id }))
}

async fn list_entries(
    State(state): State<AppState>,
    Path((app, user)): Path<(String, String)>,
) -> Result<Json<Vec<FoodEntry>>, ApiError> {
    check_app(&state, &app)?;
    let entries = state.store.snapshot(&user).context("database error")?;
    Ok(Json(entries))
}

async fn create_entry(
    State(state): State<AppState>,
    Path((app, user)): Path<(String, String)>,
    Json(req): Json<CreateEntryRequest>,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    check_app(&state, &app)?;
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name must not be empty".to_string()));
    }

    let entry = NewEntry {
        name: req.name,
        calories: req.calories,
        protein: req.protein,
        fat: req.fat,
        carbs: req.carbs,
        fiber: req.fiber,
    };
    let id = state
        .store
        .create(&user, &entry, req.created_at)
        .context("failed to store entry")?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

async fn delete_entry(
    State(state): State<AppState>,
    Path((app, user, id)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    check_app(&state, &app)?;
    if state.store.delete(&user, &id).context("database error")? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Entry {id} not found")))
    }
}

/// Server-sent-events feed of full snapshots: one event per change to the
/// user's collection, starting with the current state.
async fn stream_entries(
    State(state): State<AppState>,
    Path((app, user)): Path<(String, String)>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    check_app(&state, &app)?;
    let subscription = state
        .store
        .subscribe(&user)
        .context("failed to open subscription")?;

    let events = stream::unfold(subscription, |mut subscription| async move {
        let snapshot = subscription.next().await?;
        let payload = serde_json::to_string(&snapshot).unwrap_or_else(|_| "[]".to_string());
        Some((Ok::<_, Infallible>(Event::default().data(payload)), subscription))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

// --- Router / entry point ---

fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/auth/anonymous", post(sign_in_anonymous))
        .route("/auth/token", post(exchange_token))
        .route(
            "/artifacts/{app}/users/{user}/foodLog",
            get(list_entries).post(create_entry),
        )
        .route(
            "/artifacts/{app}/users/{user}/foodLog/stream",
            get(stream_entries),
        )
        .route(
            "/artifacts/{app}/users/{user}/foodLog/{id}",
            delete(delete_entry),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(middleware::from_fn(security_headers))
}

pub(crate) async fn start_server(
    config: &Config,
    port: u16,
    bind: &str,
    api_key: Option<String>,
    ephemeral: bool,
) -> anyhow::Result<()> {
    let db = if ephemeral {
        Database::open_in_memory()?
    } else {
        Database::open(&config.db_path())?
    };
    let state = AppState {
        store: Arc::new(SqliteStore::new(db)),
        app_id: config.app_id.clone(),
        api_key,
    };
    let app = build_router(state);

    let addr = format!("{bind}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    println!(
        "morsel store listening on http://{addr} (app id: {})",
        config.app_id
    );
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

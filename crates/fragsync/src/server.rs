//! HTTP trigger surface.
//!
//! A thin JSON API over the [`Syncer`], used by UIs to poll state and to
//! force a sync pass.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/connectors?all=` | Connector states; unauthenticated ones only with `all=true` |
//! | `POST` | `/connectors/{type}/init` | Create a connector instance from `{ "name" }` |
//! | `GET`  | `/connectors/{id}/auth_setup` | Begin credential acquisition |
//! | `GET`  | `/connectors/{id}/callback?code=` | Complete credential acquisition |
//! | `DELETE` | `/connectors/{id}` | Cancel, delete indexed data, unregister |
//! | `GET`/`POST` | `/sync/force` | Run a full round and return it |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "unknown connector: c1" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use fragsync_core::models::ConnectorState;

use crate::connectors::ConnectorFactory;
use crate::error::SyncError;
use crate::scheduler::{SyncRound, Syncer};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub syncer: Arc<Syncer>,
    pub factory: Arc<ConnectorFactory>,
}

/// Bind `bind_addr` and serve until `shutdown` is cancelled.
pub async fn run_server(
    bind_addr: &str,
    state: AppState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!(addr = %listener.local_addr()?, "trigger server listening");
    serve(listener, state, shutdown).await
}

/// Serve on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("trigger server stopped");
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/connectors", get(handle_list_connectors))
        .route("/connectors/{type}/init", post(handle_init_connector))
        .route("/connectors/{id}/auth_setup", get(handle_auth_setup))
        .route("/connectors/{id}/callback", get(handle_auth_callback))
        .route("/connectors/{id}", delete(handle_delete_connector))
        .route("/sync/force", get(handle_force_sync).post(handle_force_sync))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

/// Maps typed engine errors to HTTP statuses; anything else is a 500.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        let message = format!("{err:#}");
        match SyncError::find(&err) {
            Some(SyncError::UnknownConnector(_)) | Some(SyncError::StateNotFound(_)) => {
                not_found(message)
            }
            Some(SyncError::UnknownConnectorType(_)) => bad_request(message),
            Some(SyncError::Store(_)) | None => {
                warn!(error = %message, "request failed");
                internal(message)
            }
        }
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        anyhow::Error::from(err).into()
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /connectors ============

#[derive(Deserialize)]
struct ListParams {
    #[serde(default)]
    all: bool,
}

async fn handle_list_connectors(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<ConnectorState>>, AppError> {
    Ok(Json(state.syncer.connector_states(params.all).await?))
}

// ============ POST /connectors/{type}/init ============

#[derive(Deserialize)]
struct InitRequest {
    name: String,
}

#[derive(Serialize)]
struct InitResponse {
    id: String,
}

async fn handle_init_connector(
    State(state): State<AppState>,
    Path(connector_type): Path<String>,
    Json(req): Json<InitRequest>,
) -> Result<Json<InitResponse>, AppError> {
    if req.name.trim().is_empty() {
        return Err(bad_request("name must not be empty"));
    }
    if !state.factory.is_known(&connector_type) {
        return Err(SyncError::UnknownConnectorType(connector_type).into());
    }

    let connector = state
        .factory
        .create(
            &connector_type,
            None,
            &req.name,
            Arc::clone(state.syncer.store()),
        )
        .map_err(|e| bad_request(format!("{e:#}")))?;
    connector.init().await?;

    let id = connector.id().to_string();
    state.syncer.add_connector(connector);
    info!(
        connector_id = %id,
        connector_type = %connector_type,
        name = %req.name,
        "connector created"
    );
    Ok(Json(InitResponse { id }))
}

// ============ GET /connectors/{id}/auth_setup ============

#[derive(Serialize)]
struct AuthSetupResponse {
    /// `None` when no interactive step is needed.
    url: Option<String>,
}

async fn handle_auth_setup(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AuthSetupResponse>, AppError> {
    let connector = state
        .syncer
        .get_connector(&id)
        .ok_or_else(|| SyncError::UnknownConnector(id.clone()))?;
    let url = connector.auth_setup().await?;
    Ok(Json(AuthSetupResponse { url }))
}

// ============ GET /connectors/{id}/callback ============

#[derive(Deserialize)]
struct CallbackParams {
    code: String,
    /// Opaque value round-tripped through the provider; echoed back.
    #[serde(default)]
    state: Option<String>,
}

#[derive(Serialize)]
struct CallbackResponse {
    id: String,
    auth_valid: bool,
    state: Option<String>,
}

async fn handle_auth_callback(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<CallbackResponse>, AppError> {
    let connector = state
        .syncer
        .get_connector(&id)
        .ok_or_else(|| SyncError::UnknownConnector(id.clone()))?;
    connector.auth_callback(&params.code).await?;
    let status = connector.status().await?;
    Ok(Json(CallbackResponse {
        id,
        auth_valid: status.auth_valid,
        state: params.state,
    }))
}

// ============ DELETE /connectors/{id} ============

async fn handle_delete_connector(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.syncer.delete_connector(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ GET|POST /sync/force ============

async fn handle_force_sync(State(state): State<AppState>) -> Json<SyncRound> {
    Json(state.syncer.sync_now().await)
}

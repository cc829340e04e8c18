use crate::auth::{AuthUser, CredentialService};
use crate::db::Database;
use crate::error::SwapError;
use crate::swap::SwapEngine;
use crate::types::{NewSlot, RequestStatus, Slot, SlotUpdate, SwapFilter, SwapRequest};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRef, FromRequest, FromRequestParts, Path, Query, State,
    },
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SwapEngine>,
    pub credentials: Arc<CredentialService>,
    pub db: Database,
}

impl AppState {
    pub fn new(db: Database, credentials: CredentialService) -> Self {
        Self {
            engine: Arc::new(SwapEngine::new(db.clone())),
            credentials: Arc::new(credentials),
            db,
        }
    }
}

impl FromRef<AppState> for Arc<CredentialService> {
    fn from_ref(state: &AppState) -> Self {
        state.credentials.clone()
    }
}

/// Create the API router
pub fn create_router(state: AppState, cors_origins: Vec<String>) -> Router {
    Router::new()
        // Account endpoints
        .route("/api/register", post(register))
        .route("/api/login", post(login))
        // Slot endpoints
        .route("/api/my-slots", get(my_slots))
        .route("/api/swappable-slots", get(swappable_slots))
        .route("/api/my-swappable", get(my_swappable))
        .route("/api/add", post(add_slot))
        .route("/api/events/:id/update", patch(update_slot))
        // Swap endpoints
        .route("/api/swap-request", post(request_swap))
        .route("/api/swaps-sent", get(swaps_sent))
        .route("/api/swaps-received", get(swaps_received))
        .route("/api/swap-response/:request_id", post(respond_to_swap))
        // Health
        .route("/health", get(health_check))
        .layer(cors_layer(&cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(cors_origins: &[String]) -> CorsLayer {
    if cors_origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

// ===== Extractors =====

/// JSON body extractor that reports malformed input as an API error
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct AppJson<T>(pub T);

/// Query string extractor that reports malformed input as an API error
#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(ApiError))]
pub struct AppQuery<T>(pub T);

// ===== Request/Response Types =====

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub message: String,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct SlotResponse {
    pub event: Slot,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SwapRequestBody {
    #[serde(rename = "user_Slot_Id", alias = "offeredSlotId")]
    pub user_slot_id: String,
    #[serde(rename = "desired_Slot_Id", alias = "desiredSlotId")]
    pub desired_slot_id: String,
}

#[derive(Debug, Serialize)]
pub struct UpdatedEvents {
    pub offered: Slot,
    pub requested: Slot,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequestResponse {
    pub message: String,
    pub request: SwapRequest,
    pub updated_events: UpdatedEvents,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SwapResponseBody {
    pub accept: bool,
}

#[derive(Debug, Serialize)]
pub struct SwapResponseResult {
    pub success: bool,
    pub message: String,
    pub request: SwapRequest,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListSwapsQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    SwapFilter::default().limit
}

impl ListSwapsQuery {
    fn into_filter(self) -> Result<SwapFilter, ApiError> {
        let status = self
            .status
            .map(|s| s.parse::<RequestStatus>())
            .transpose()
            .map_err(ApiError::BadRequest)?;

        Ok(SwapFilter {
            status,
            limit: self.limit,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub database: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
    pub code: String,
}

// ===== Handlers =====

/// Register a new account
async fn register(
    State(state): State<AppState>,
    AppJson(req): AppJson<RegisterRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    state
        .credentials
        .register(&req.name, &req.email, &req.password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: "User registered successfully".to_string(),
        }),
    ))
}

/// Exchange credentials for a bearer token
async fn login(
    State(state): State<AppState>,
    AppJson(req): AppJson<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let token = state.credentials.login(&req.email, &req.password).await?;

    Ok(Json(LoginResponse {
        message: "Login successful".to_string(),
        token,
    }))
}

/// Slots owned by the caller
async fn my_slots(
    State(state): State<AppState>,
    caller: AuthUser,
) -> Result<Json<Vec<Slot>>, ApiError> {
    Ok(Json(state.engine.my_slots(&caller.user_id).await?))
}

/// Marketplace: other users' swappable slots
async fn swappable_slots(
    State(state): State<AppState>,
    caller: AuthUser,
) -> Result<Json<Vec<Slot>>, ApiError> {
    Ok(Json(state.engine.marketplace(&caller.user_id).await?))
}

/// The caller's swappable slots
async fn my_swappable(
    State(state): State<AppState>,
    caller: AuthUser,
) -> Result<Json<Vec<Slot>>, ApiError> {
    Ok(Json(state.engine.my_swappable(&caller.user_id).await?))
}

/// Create a slot
async fn add_slot(
    State(state): State<AppState>,
    caller: AuthUser,
    AppJson(req): AppJson<NewSlot>,
) -> Result<(StatusCode, Json<SlotResponse>), ApiError> {
    let event = state.engine.create_slot(&caller.user_id, req).await?;
    Ok((StatusCode::CREATED, Json(SlotResponse { event })))
}

/// Change swappability or the busy marker of one of the caller's slots
async fn update_slot(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<String>,
    AppJson(req): AppJson<SlotUpdate>,
) -> Result<Json<SlotResponse>, ApiError> {
    let event = state.engine.update_slot(&id, &caller.user_id, req).await?;
    Ok(Json(SlotResponse { event }))
}

/// Propose a swap
async fn request_swap(
    State(state): State<AppState>,
    caller: AuthUser,
    AppJson(req): AppJson<SwapRequestBody>,
) -> Result<(StatusCode, Json<SwapRequestResponse>), ApiError> {
    let proposal = state
        .engine
        .request_swap(&caller.user_id, &req.user_slot_id, &req.desired_slot_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SwapRequestResponse {
            message: "Swap request created successfully".to_string(),
            request: proposal.request,
            updated_events: UpdatedEvents {
                offered: proposal.offered,
                requested: proposal.requested,
            },
        }),
    ))
}

/// Requests sent by the caller
async fn swaps_sent(
    State(state): State<AppState>,
    caller: AuthUser,
    AppQuery(query): AppQuery<ListSwapsQuery>,
) -> Result<Json<Vec<SwapRequest>>, ApiError> {
    let filter = query.into_filter()?;
    Ok(Json(state.engine.swaps_sent(&caller.user_id, filter).await?))
}

/// Requests addressed to the caller
async fn swaps_received(
    State(state): State<AppState>,
    caller: AuthUser,
    AppQuery(query): AppQuery<ListSwapsQuery>,
) -> Result<Json<Vec<SwapRequest>>, ApiError> {
    let filter = query.into_filter()?;
    Ok(Json(state.engine.swaps_received(&caller.user_id, filter).await?))
}

/// Accept or reject a request addressed to the caller
async fn respond_to_swap(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(request_id): Path<String>,
    AppJson(req): AppJson<SwapResponseBody>,
) -> Result<Json<SwapResponseResult>, ApiError> {
    let resolution = state
        .engine
        .respond_to_swap(&caller.user_id, &request_id, req.accept)
        .await?;

    let message = if req.accept {
        "Swap successfully completed"
    } else {
        "Swap request rejected"
    };

    Ok(Json(SwapResponseResult {
        success: true,
        message: message.to_string(),
        request: resolution.request,
    }))
}

/// Health check
async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let db_status = match state.db.pool().acquire().await {
        Ok(_) => "ok".to_string(),
        Err(e) => format!("error: {}", e),
    };

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now().to_rfc3339(),
        database: db_status,
    }))
}

// ===== Error Handling =====

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Swap(SwapError),
}

impl From<SwapError> for ApiError {
    fn from(err: SwapError) -> Self {
        ApiError::Swap(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg),
            ApiError::Swap(err) => {
                let (status, code) = match &err {
                    SwapError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED"),
                    SwapError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
                    SwapError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                    SwapError::InvalidSwap(_) => (StatusCode::BAD_REQUEST, "INVALID_SWAP"),
                    SwapError::InvalidState(_) => (StatusCode::BAD_REQUEST, "INVALID_STATE"),
                    SwapError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
                    SwapError::UserExists(_) => (StatusCode::BAD_REQUEST, "USER_EXISTS"),
                    SwapError::InvalidCredentials => (StatusCode::BAD_REQUEST, "INVALID_CREDENTIALS"),
                    SwapError::TransactionFailed(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "TRANSACTION_FAILED")
                    }
                    SwapError::Database(_) | SwapError::Password(_) | SwapError::Other(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
                    }
                };

                if err.is_client_error() {
                    (status, code, err.to_string())
                } else {
                    error!("Request failed: {}", err);
                    (status, code, "Internal server error".to_string())
                }
            }
        };

        let body = Json(ErrorResponse {
            message,
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}

// REST API over the registry (feature `server`)
//
// Every response uses the same envelope: { success, data, error }.

use crate::error::RegistryError;
use crate::member::{ApplicantInput, MemberId, MemberRecord, PaymentMethod};
use crate::notify::{NotificationStatus, PendingRegistration};
use crate::registry::Registry;
use crate::stats::{CurrentCounts, PeriodCount, PeriodKind, MAX_WINDOW};
use crate::storage::AuditEvent;
use crate::store::StatsSnapshot;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    registry: Arc<Registry>,
}

/// API Response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

impl ApiResponse<Option<()>> {
    fn failed(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    Registry(RegistryError),
    NotFound(String),
    BadRequest(String),
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        ApiError::Registry(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Registry(RegistryError::Validation(_)) => StatusCode::BAD_REQUEST,
            ApiError::Registry(RegistryError::DuplicateId(_)) => StatusCode::CONFLICT,
            ApiError::Registry(RegistryError::InvalidTransition { .. }) => StatusCode::CONFLICT,
            ApiError::Registry(RegistryError::StorageUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Registry(RegistryError::NotificationFailure(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Registry(e @ RegistryError::Validation(_)) => e.user_message(),
            ApiError::Registry(e) => e.to_string(),
            ApiError::NotFound(m) | ApiError::BadRequest(m) => m.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = %status, error = %self.message(), "Request failed");
        }
        (status, Json(ApiResponse::failed(self.message()))).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// ============================================================================
// Request / response bodies
// ============================================================================

/// Completed form plus the chosen payment method
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    #[serde(flatten)]
    pub applicant: ApplicantInput,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Serialize)]
pub struct RegistrationResponse {
    pub member: MemberRecord,
    pub notification: NotificationStatus,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_members: usize,
    pub last_issued: u64,
    pub current: CurrentCounts,
    pub last_7_days: Vec<PeriodCount>,
    pub last_6_months: Vec<PeriodCount>,
}

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    #[serde(default = "default_kind")]
    kind: String,
    #[serde(default = "default_n")]
    n: usize,
}

fn default_kind() -> String {
    "day".to_string()
}

fn default_n() -> usize {
    7
}

#[derive(Debug, Deserialize)]
pub struct MembersQuery {
    /// Return only the `recent` newest members, newest first
    recent: Option<usize>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/members - Registered members
async fn list_members(
    State(state): State<AppState>,
    Query(query): Query<MembersQuery>,
) -> ApiResult<Vec<MemberRecord>> {
    let store = state.registry.store();
    let members = match query.recent {
        Some(limit) => store.recent_first(limit)?,
        None => store.list()?,
    };
    Ok(Json(ApiResponse::ok(members)))
}

/// GET /api/members/:id - One member
async fn get_member(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<MemberRecord> {
    state
        .registry
        .store()
        .find(&MemberId::from(id.as_str()))?
        .map(|record| Json(ApiResponse::ok(record)))
        .ok_or_else(|| ApiError::NotFound(format!("No member with ID {}", id)))
}

/// GET /api/members/:id/history - Audit trail for one member
async fn member_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<AuditEvent>> {
    let events = state.registry.store().history(&MemberId::from(id.as_str()))?;
    Ok(Json(ApiResponse::ok(events)))
}

/// GET /api/stats - Dashboard figures
async fn get_stats(State(state): State<AppState>) -> ApiResult<StatsResponse> {
    let registry = &state.registry;
    let stats = registry.stats();

    Ok(Json(ApiResponse::ok(StatsResponse {
        total_members: registry.store().count()?,
        last_issued: registry.allocator().current()?,
        current: stats.current_counts()?,
        last_7_days: stats.recent_window(PeriodKind::Day, 7)?,
        last_6_months: stats.recent_window(PeriodKind::Month, 6)?,
    })))
}

/// GET /api/stats/recent?kind=day&n=7 - Zero-filled window ending now
async fn recent_window(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> ApiResult<Vec<PeriodCount>> {
    let kind: PeriodKind = query.kind.parse().map_err(ApiError::BadRequest)?;
    if query.n > MAX_WINDOW {
        return Err(ApiError::BadRequest(format!("n must be at most {}", MAX_WINDOW)));
    }

    let window = state.registry.stats().recent_window(kind, query.n)?;
    Ok(Json(ApiResponse::ok(window)))
}

/// GET /api/stats/export - Snapshot document
async fn export_stats(State(state): State<AppState>) -> ApiResult<StatsSnapshot> {
    Ok(Json(ApiResponse::ok(state.registry.export_snapshot()?)))
}

/// POST /api/stats/reset - Clear statistics and the member counter
async fn reset_stats(State(state): State<AppState>) -> ApiResult<&'static str> {
    state.registry.reset_statistics()?;
    Ok(Json(ApiResponse::ok("reset")))
}

/// POST /api/registrations - Submit and pay in one request
async fn create_registration(
    State(state): State<AppState>,
    Json(request): Json<RegistrationRequest>,
) -> Result<(StatusCode, Json<ApiResponse<RegistrationResponse>>), ApiError> {
    let mut workflow = state.registry.start_registration();
    workflow.submit(request.applicant)?;
    let member = workflow.confirm_payment(request.payment_method)?;

    let response = RegistrationResponse {
        member,
        notification: workflow.notification_status(),
    };
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(response))))
}

/// GET /api/pending - Registrations queued for admin review
async fn list_pending(State(state): State<AppState>) -> ApiResult<Vec<PendingRegistration>> {
    Ok(Json(ApiResponse::ok(state.registry.pending()?)))
}

// ============================================================================
// Router
// ============================================================================

pub fn router(registry: Arc<Registry>) -> Router {
    let state = AppState { registry };

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/members", get(list_members))
        .route("/members/:id", get(get_member))
        .route("/members/:id/history", get(member_history))
        .route("/stats", get(get_stats))
        .route("/stats/recent", get(recent_window))
        .route("/stats/export", get(export_stats))
        .route("/stats/reset", post(reset_stats))
        .route("/registrations", post(create_registration))
        .route("/pending", get(list_pending))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

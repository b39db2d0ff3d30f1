//! HTTP surface for the federation service.
//!
//! Identity arrives via headers (`X-Tenant-ID`, `X-User-ID`,
//! `X-Admin-Role`); the context middleware resolves them once per
//! request. Handlers open a connection per request from the backend,
//! call into the service modules, and map [`FederationError`] onto
//! status codes with a uniform `{error, code}` body.

use crate::consent::{self, SettingsPatch};
use crate::context::{context_middleware, RequestContext};
use crate::partnership::{self, CreatePartnershipRequest};
use crate::query::{self, EventQuery, ListingQuery, MemberQuery};
use crate::relay::{self, MailboxKind, SendMessageRequest};
use crate::system_control::{self, ControlsPatch};
use crate::{audit, whitelist};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{delete, get, post},
    Extension, Json, Router,
};
use fedmesh_federation_core::{FederationError, Result};
use fedmesh_federation_storage::FederationBackend;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub struct AppState<B: FederationBackend> {
    pub backend: Arc<B>,
}

impl<B: FederationBackend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type HandlerError = (StatusCode, Json<ErrorResponse>);

fn error_response(err: FederationError) -> HandlerError {
    let status = match &err {
        FederationError::Validation(_) => StatusCode::BAD_REQUEST,
        FederationError::NotFound(_) => StatusCode::NOT_FOUND,
        FederationError::Denied(_) | FederationError::Forbidden(_) => StatusCode::FORBIDDEN,
        FederationError::Conflict(_) => StatusCode::CONFLICT,
        FederationError::Sqlite(_) | FederationError::Internal(_) => {
            tracing::error!(error = %err, "internal error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            code: err.code().to_string(),
        }),
    )
}

fn connect<B: FederationBackend>(state: &AppState<B>) -> std::result::Result<Connection, HandlerError> {
    state.backend.get_connection().map_err(error_response)
}

/// Build the full router. Exposed for integration tests.
pub fn build_router<B: FederationBackend + 'static>(state: AppState<B>) -> Router {
    Router::new()
        .route("/health", get(health))
        // member-facing surface
        .route("/federation/status", get(federation_status))
        .route("/federation/opt-in", post(opt_in))
        .route("/federation/opt-out", post(opt_out))
        .route("/federation/settings", get(get_settings).put(put_settings))
        .route("/federation/partners", get(list_partners))
        .route("/federation/members", get(browse_members))
        .route("/federation/members/{id}", get(get_member))
        .route("/federation/listings", get(browse_listings))
        .route("/federation/events", get(browse_events))
        .route("/federation/messages", get(list_messages).post(send_message))
        .route("/federation/messages/{id}/mark-read", post(mark_read))
        .route(
            "/federation/messages/thread/{tenant_id}/{user_id}",
            get(thread_messages),
        )
        .route(
            "/federation/messages/thread/{tenant_id}/{user_id}/mark-read",
            post(mark_thread_read),
        )
        // admin surface
        .route(
            "/admin/federation/system-controls",
            get(get_controls).put(put_controls),
        )
        .route("/admin/federation/emergency-lockdown", post(emergency_lockdown))
        .route("/admin/federation/lift-lockdown", post(lift_lockdown))
        .route(
            "/admin/federation/whitelist",
            get(list_whitelist).post(add_whitelist),
        )
        .route(
            "/admin/federation/whitelist/{tenant_id}",
            delete(remove_whitelist),
        )
        .route("/admin/federation/partnerships", post(create_partnership))
        .route(
            "/admin/federation/partnerships/{id}/approve",
            post(approve_partnership),
        )
        .route(
            "/admin/federation/partnerships/{id}/suspend",
            post(suspend_partnership),
        )
        .route(
            "/admin/federation/partnerships/{id}/reactivate",
            post(reactivate_partnership),
        )
        .route(
            "/admin/federation/partnerships/{id}/terminate",
            post(terminate_partnership),
        )
        .route(
            "/admin/federation/tenant/{tenant_id}/features",
            get(get_tenant_features).put(put_tenant_features),
        )
        .route("/admin/federation/audit-log", get(audit_log))
        .layer(middleware::from_fn(context_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Debug, Serialize)]
struct FederationStatus {
    enabled: bool,
    tenant_federation_enabled: bool,
    partnerships_count: i64,
    federation_optin: bool,
}

async fn federation_status<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
) -> std::result::Result<Json<FederationStatus>, HandlerError> {
    let conn = connect(&state)?;
    let status = (|| -> Result<FederationStatus> {
        let (tenant_id, user_id) = ctx.require_user()?;
        let controls = system_control::get_controls(&conn)?;
        let features = system_control::get_tenant_features(&conn, tenant_id)?;
        let settings = consent::get_settings(&conn, user_id, tenant_id)?;
        Ok(FederationStatus {
            enabled: controls.federation_enabled && !controls.lockdown_active,
            tenant_federation_enabled: features.federation_enabled,
            partnerships_count: partnership::count_active_partnerships(&conn, tenant_id)?,
            federation_optin: settings.federation_optin,
        })
    })()
    .map_err(error_response)?;
    Ok(Json(status))
}

async fn opt_in<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
) -> std::result::Result<Json<fedmesh_federation_core::ConsentSettings>, HandlerError> {
    let conn = connect(&state)?;
    consent::opt_in(&conn, &ctx).map(Json).map_err(error_response)
}

async fn opt_out<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
) -> std::result::Result<Json<fedmesh_federation_core::ConsentSettings>, HandlerError> {
    let conn = connect(&state)?;
    consent::opt_out(&conn, &ctx).map(Json).map_err(error_response)
}

async fn get_settings<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
) -> std::result::Result<Json<fedmesh_federation_core::ConsentSettings>, HandlerError> {
    let conn = connect(&state)?;
    let (tenant_id, user_id) = ctx.require_user().map_err(error_response)?;
    consent::get_settings(&conn, user_id, tenant_id)
        .map(Json)
        .map_err(error_response)
}

async fn put_settings<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
    Json(patch): Json<SettingsPatch>,
) -> std::result::Result<Json<fedmesh_federation_core::ConsentSettings>, HandlerError> {
    let conn = connect(&state)?;
    consent::update_settings(&conn, &ctx, &patch)
        .map(Json)
        .map_err(error_response)
}

async fn list_partners<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
) -> std::result::Result<Json<Vec<partnership::PartnerInfo>>, HandlerError> {
    let conn = connect(&state)?;
    let (tenant_id, _) = ctx.require_user().map_err(error_response)?;
    partnership::list_active_partners(&conn, tenant_id)
        .map(Json)
        .map_err(error_response)
}

async fn browse_members<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
    Query(params): Query<MemberQuery>,
) -> std::result::Result<Json<query::Page<query::MemberRecord>>, HandlerError> {
    let conn = connect(&state)?;
    query::browse_members(&conn, &ctx, &params)
        .map(Json)
        .map_err(error_response)
}

async fn get_member<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
) -> std::result::Result<Json<query::MemberRecord>, HandlerError> {
    let conn = connect(&state)?;
    query::get_member(&conn, &ctx, id)
        .map(Json)
        .map_err(error_response)
}

async fn browse_listings<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
    Query(params): Query<ListingQuery>,
) -> std::result::Result<Json<query::Page<query::ListingRecord>>, HandlerError> {
    let conn = connect(&state)?;
    query::browse_listings(&conn, &ctx, &params)
        .map(Json)
        .map_err(error_response)
}

async fn browse_events<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
    Query(params): Query<EventQuery>,
) -> std::result::Result<Json<query::Page<query::EventRecord>>, HandlerError> {
    let conn = connect(&state)?;
    query::browse_events(&conn, &ctx, &params)
        .map(Json)
        .map_err(error_response)
}

#[derive(Debug, Default, Deserialize)]
struct MailboxQuery {
    #[serde(rename = "box")]
    mailbox: Option<MailboxKind>,
    cursor: Option<String>,
    per_page: Option<i64>,
}

#[derive(Debug, Serialize)]
struct MailboxResponse {
    items: Vec<fedmesh_federation_core::Message>,
    next_cursor: Option<String>,
    has_more: bool,
    unread_count: i64,
}

async fn list_messages<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
    Query(params): Query<MailboxQuery>,
) -> std::result::Result<Json<MailboxResponse>, HandlerError> {
    let conn = connect(&state)?;
    let response = (|| -> Result<MailboxResponse> {
        let page = relay::list_messages(
            &conn,
            &ctx,
            params.mailbox.unwrap_or_default(),
            params.cursor.as_deref(),
            params.per_page,
        )?;
        let unread_count = relay::unread_count(&conn, &ctx)?;
        Ok(MailboxResponse {
            items: page.items,
            next_cursor: page.next_cursor,
            has_more: page.has_more,
            unread_count,
        })
    })()
    .map_err(error_response)?;
    Ok(Json(response))
}

async fn send_message<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
    Json(request): Json<SendMessageRequest>,
) -> std::result::Result<(StatusCode, Json<relay::DeliveryReceipt>), HandlerError> {
    let conn = connect(&state)?;
    relay::send(&conn, &ctx, &request)
        .map(|receipt| (StatusCode::CREATED, Json(receipt)))
        .map_err(error_response)
}

async fn mark_read<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
) -> std::result::Result<Json<fedmesh_federation_core::Message>, HandlerError> {
    let conn = connect(&state)?;
    relay::mark_read(&conn, &ctx, id)
        .map(Json)
        .map_err(error_response)
}

#[derive(Debug, Default, Deserialize)]
struct ThreadQuery {
    cursor: Option<String>,
    per_page: Option<i64>,
}

async fn thread_messages<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
    Path((tenant_id, user_id)): Path<(i64, i64)>,
    Query(params): Query<ThreadQuery>,
) -> std::result::Result<Json<query::Page<fedmesh_federation_core::Message>>, HandlerError> {
    let conn = connect(&state)?;
    relay::thread(
        &conn,
        &ctx,
        tenant_id,
        user_id,
        params.cursor.as_deref(),
        params.per_page,
    )
    .map(Json)
    .map_err(error_response)
}

#[derive(Debug, Serialize)]
struct ThreadReadResponse {
    updated: i64,
}

async fn mark_thread_read<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
    Path((tenant_id, user_id)): Path<(i64, i64)>,
) -> std::result::Result<Json<ThreadReadResponse>, HandlerError> {
    let conn = connect(&state)?;
    relay::mark_thread_read(&conn, &ctx, tenant_id, user_id)
        .map(|updated| Json(ThreadReadResponse { updated }))
        .map_err(error_response)
}

async fn get_controls<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
) -> std::result::Result<Json<fedmesh_federation_core::SystemControls>, HandlerError> {
    let conn = connect(&state)?;
    ctx.require_admin().map_err(error_response)?;
    system_control::get_controls(&conn)
        .map(Json)
        .map_err(error_response)
}

async fn put_controls<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
    Json(patch): Json<ControlsPatch>,
) -> std::result::Result<Json<fedmesh_federation_core::SystemControls>, HandlerError> {
    let conn = connect(&state)?;
    system_control::update_controls(&conn, &ctx, &patch)
        .map(Json)
        .map_err(error_response)
}

#[derive(Debug, Deserialize)]
struct LockdownRequest {
    reason: String,
}

async fn emergency_lockdown<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
    Json(request): Json<LockdownRequest>,
) -> std::result::Result<Json<fedmesh_federation_core::SystemControls>, HandlerError> {
    let conn = connect(&state)?;
    system_control::trigger_lockdown(&conn, &ctx, &request.reason)
        .map(Json)
        .map_err(error_response)
}

async fn lift_lockdown<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
) -> std::result::Result<Json<fedmesh_federation_core::SystemControls>, HandlerError> {
    let conn = connect(&state)?;
    system_control::lift_lockdown(&conn, &ctx)
        .map(Json)
        .map_err(error_response)
}

async fn list_whitelist<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
) -> std::result::Result<Json<Vec<whitelist::WhitelistEntry>>, HandlerError> {
    let conn = connect(&state)?;
    ctx.require_admin().map_err(error_response)?;
    whitelist::list(&conn).map(Json).map_err(error_response)
}

#[derive(Debug, Deserialize)]
struct AddWhitelistRequest {
    tenant_id: i64,
    notes: Option<String>,
}

async fn add_whitelist<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
    Json(request): Json<AddWhitelistRequest>,
) -> std::result::Result<(StatusCode, Json<whitelist::WhitelistEntry>), HandlerError> {
    let conn = connect(&state)?;
    whitelist::add(&conn, &ctx, request.tenant_id, request.notes.as_deref())
        .map(|entry| (StatusCode::CREATED, Json(entry)))
        .map_err(error_response)
}

async fn remove_whitelist<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
    Path(tenant_id): Path<i64>,
) -> std::result::Result<StatusCode, HandlerError> {
    let conn = connect(&state)?;
    whitelist::remove(&conn, &ctx, tenant_id)
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(error_response)
}

async fn create_partnership<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
    Json(request): Json<CreatePartnershipRequest>,
) -> std::result::Result<(StatusCode, Json<fedmesh_federation_core::Partnership>), HandlerError> {
    let conn = connect(&state)?;
    partnership::create_partnership(&conn, &ctx, &request)
        .map(|p| (StatusCode::CREATED, Json(p)))
        .map_err(error_response)
}

async fn approve_partnership<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
) -> std::result::Result<Json<fedmesh_federation_core::Partnership>, HandlerError> {
    let conn = connect(&state)?;
    partnership::approve(&conn, &ctx, id)
        .map(Json)
        .map_err(error_response)
}

#[derive(Debug, Deserialize)]
struct TransitionReason {
    reason: String,
}

async fn suspend_partnership<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
    Json(request): Json<TransitionReason>,
) -> std::result::Result<Json<fedmesh_federation_core::Partnership>, HandlerError> {
    let conn = connect(&state)?;
    partnership::suspend(&conn, &ctx, id, &request.reason)
        .map(Json)
        .map_err(error_response)
}

async fn reactivate_partnership<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
) -> std::result::Result<Json<fedmesh_federation_core::Partnership>, HandlerError> {
    let conn = connect(&state)?;
    partnership::reactivate(&conn, &ctx, id)
        .map(Json)
        .map_err(error_response)
}

async fn terminate_partnership<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<i64>,
    Json(request): Json<TransitionReason>,
) -> std::result::Result<Json<fedmesh_federation_core::Partnership>, HandlerError> {
    let conn = connect(&state)?;
    partnership::terminate(&conn, &ctx, id, &request.reason)
        .map(Json)
        .map_err(error_response)
}

async fn get_tenant_features<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
    Path(tenant_id): Path<i64>,
) -> std::result::Result<Json<system_control::TenantFeatures>, HandlerError> {
    let conn = connect(&state)?;
    ctx.require_admin().map_err(error_response)?;
    system_control::get_tenant_features(&conn, tenant_id)
        .map(Json)
        .map_err(error_response)
}

#[derive(Debug, Deserialize)]
struct TenantFeaturesRequest {
    federation_enabled: bool,
}

async fn put_tenant_features<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
    Path(tenant_id): Path<i64>,
    Json(request): Json<TenantFeaturesRequest>,
) -> std::result::Result<Json<system_control::TenantFeatures>, HandlerError> {
    let conn = connect(&state)?;
    system_control::set_tenant_features(&conn, &ctx, tenant_id, request.federation_enabled)
        .map(Json)
        .map_err(error_response)
}

async fn audit_log<B: FederationBackend>(
    State(state): State<AppState<B>>,
    Extension(ctx): Extension<RequestContext>,
    Query(params): Query<audit::AuditQueryParams>,
) -> std::result::Result<Json<audit::AuditLogResponse>, HandlerError> {
    let conn = connect(&state)?;
    ctx.require_admin().map_err(error_response)?;
    audit::query_audit_log(&conn, &params)
        .map(Json)
        .map_err(error_response)
}

//! Request context resolution middleware
//!
//! Resolves the acting tenant and user from `X-Tenant-ID` / `X-User-ID`
//! headers and attaches a request-scoped [`RequestContext`] to request
//! extensions for downstream handlers. Admin privileges come from the
//! `X-Admin-Role` header (`god` or `super-admin`).
//!
//! Services never reach into ambient request state; the context is
//! passed explicitly by parameter through every layer.
//!
//! # Usage
//!
//! ```rust,ignore
//! use fedmesh_federation_api::context::{context_middleware, RequestContext};
//!
//! let app = Router::new()
//!     .route("/federation/status", get(status))
//!     .layer(middleware::from_fn(context_middleware));
//!
//! async fn status(Extension(ctx): Extension<RequestContext>) -> impl IntoResponse {
//!     let (tenant_id, user_id) = ctx.require_user()?;
//!     // ...
//! }
//! ```

use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};
use fedmesh_federation_core::{FederationError, Result};

/// Administrative role extracted from the `X-Admin-Role` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminRole {
    God,
    SuperAdmin,
}

impl AdminRole {
    fn from_header(value: &str) -> Option<Self> {
        match value {
            "god" => Some(AdminRole::God),
            "super-admin" => Some(AdminRole::SuperAdmin),
            _ => None,
        }
    }
}

/// Request-scoped caller identity.
///
/// Tenant and user are optional at this level so public routes (health)
/// can pass through; handlers that need them call [`require_user`] or
/// [`require_admin`].
///
/// [`require_user`]: RequestContext::require_user
/// [`require_admin`]: RequestContext::require_admin
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub tenant_id: Option<i64>,
    pub user_id: Option<i64>,
    pub admin_role: Option<AdminRole>,
    /// Correlation id attached to logs and audit details.
    pub request_id: String,
}

impl RequestContext {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let tenant_id = header_i64(headers, "x-tenant-id");
        let user_id = header_i64(headers, "x-user-id");
        let admin_role = headers
            .get("x-admin-role")
            .and_then(|v| v.to_str().ok())
            .and_then(AdminRole::from_header);

        Self {
            tenant_id,
            user_id,
            admin_role,
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// The acting (tenant, user) pair, or VALIDATION when either header
    /// is missing or malformed.
    pub fn require_user(&self) -> Result<(i64, i64)> {
        match (self.tenant_id, self.user_id) {
            (Some(tenant_id), Some(user_id)) => Ok((tenant_id, user_id)),
            _ => Err(FederationError::Validation(
                "X-Tenant-ID and X-User-ID headers are required".to_string(),
            )),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.admin_role.is_some()
    }

    /// FORBIDDEN unless the caller carries an admin role.
    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(FederationError::Forbidden(
                "administrator role required".to_string(),
            ))
        }
    }

    /// Actor label recorded in audit `updated_by`-style columns.
    pub fn actor_label(&self) -> String {
        match (self.user_id, self.admin_role) {
            (Some(user_id), Some(_)) => format!("admin:{}", user_id),
            (Some(user_id), None) => format!("user:{}", user_id),
            (None, Some(_)) => "admin:unknown".to_string(),
            (None, None) => "anonymous".to_string(),
        }
    }
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|v| *v > 0)
}

/// Middleware that attaches a [`RequestContext`] to every request.
pub async fn context_middleware(mut req: Request, next: Next) -> Response {
    let ctx = RequestContext::from_headers(req.headers());
    tracing::debug!(
        request_id = %ctx.request_id,
        tenant_id = ?ctx.tenant_id,
        user_id = ?ctx.user_id,
        admin = ctx.is_admin(),
        "resolved request context"
    );
    req.extensions_mut().insert(ctx);
    next.run(req).await
}

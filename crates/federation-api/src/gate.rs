//! Four-layer consent resolution.
//!
//! `resolve` combines the global kill-switch, tenant enablement,
//! partnership capability flags, and user opt-in into one allow/deny
//! decision. Evaluation is monotonic-restrictive and short-circuits at
//! the first denying layer (global > tenant > partnership > user); the
//! reason code clients receive identifies that layer. The ordering is
//! part of the external contract.

use crate::audit::{self, AuditAction, AuditEvent};
use crate::context::RequestContext;
use fedmesh_federation_core::{Capability, DenyReason, FederationError, Result};
use rusqlite::Connection;
use serde::Serialize;

/// Outcome of a gate resolution.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GateDecision {
    pub allowed: bool,
    pub reason: Option<DenyReason>,
}

impl GateDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: DenyReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Resolve whether `user_id` of `tenant_id` may exercise `capability`
/// toward `partner_tenant_id`.
pub fn resolve(
    conn: &Connection,
    tenant_id: i64,
    partner_tenant_id: i64,
    user_id: i64,
    capability: Capability,
) -> Result<GateDecision> {
    // Layer 1: global kill-switch and per-capability toggles
    let controls = crate::system_control::get_controls(conn)?;
    if !controls.federation_enabled || controls.lockdown_active {
        return Ok(GateDecision::deny(DenyReason::FederationNotAvailable));
    }
    if !controls.capability_allowed(capability) {
        return Ok(GateDecision::deny(DenyReason::FeatureDisabled));
    }

    // Layer 2: both tenants must have federation enabled
    for tenant in [tenant_id, partner_tenant_id] {
        let features = crate::system_control::get_tenant_features(conn, tenant)?;
        if !features.federation_enabled {
            return Ok(GateDecision::deny(DenyReason::TenantFederationDisabled));
        }
    }

    // Layer 3: an active partnership granting the capability, within
    // the system's level bound
    let partnership = match crate::partnership::active_partnership(conn, tenant_id, partner_tenant_id)? {
        Some(p) => p,
        None => return Ok(GateDecision::deny(DenyReason::NoPartnership)),
    };
    if !partnership.capabilities.enabled(capability) {
        return Ok(GateDecision::deny(DenyReason::CapabilityNotEnabled));
    }
    if partnership.federation_level.as_i64() > controls.max_federation_level {
        return Ok(GateDecision::deny(DenyReason::LevelNotPermitted));
    }

    // Layer 4: the acting user's opt-in and capability-specific consent
    let settings = crate::consent::get_settings(conn, user_id, tenant_id)?;
    if !settings.federation_optin {
        return Ok(GateDecision::deny(DenyReason::NotOptedIn));
    }
    if !settings.capability_allowed(capability) {
        return Ok(GateDecision::deny(DenyReason::user_layer(capability)));
    }

    Ok(GateDecision::allow())
}

/// Resolve and turn a deny into `FederationError::Denied`.
pub fn require(
    conn: &Connection,
    tenant_id: i64,
    partner_tenant_id: i64,
    user_id: i64,
    capability: Capability,
) -> Result<()> {
    let decision = resolve(conn, tenant_id, partner_tenant_id, user_id, capability)?;
    match decision.reason {
        None => Ok(()),
        Some(reason) => Err(FederationError::Denied(reason)),
    }
}

/// Like [`require`], but records denied attempts on sensitive
/// capabilities (messaging, transactions) in the audit trail. Attempted
/// cross-tenant actions are part of the audit contract, not only
/// successful ones.
pub fn require_audited(
    conn: &Connection,
    ctx: &RequestContext,
    partner_tenant_id: i64,
    capability: Capability,
) -> Result<()> {
    let (tenant_id, user_id) = ctx.require_user()?;
    let decision = resolve(conn, tenant_id, partner_tenant_id, user_id, capability)?;
    match decision.reason {
        None => Ok(()),
        Some(reason) => {
            audit_denial(conn, ctx, partner_tenant_id, capability, reason);
            Err(FederationError::Denied(reason))
        }
    }
}

/// Record a denied attempt on a sensitive capability. Callers that
/// resolve inside their own write transaction use this on the outer
/// connection so the entry survives the rollback.
pub(crate) fn audit_denial(
    conn: &Connection,
    ctx: &RequestContext,
    partner_tenant_id: i64,
    capability: Capability,
    reason: DenyReason,
) {
    if !matches!(capability, Capability::Messaging | Capability::Transactions) {
        return;
    }
    let mut event = AuditEvent::new(AuditAction::AccessDenied)
        .with_partner(partner_tenant_id)
        .with_details(serde_json::json!({
            "capability": capability.as_str(),
            "reason": reason.code(),
            "request_id": ctx.request_id,
        }));
    if let Some(tenant_id) = ctx.tenant_id {
        event = event.with_tenant(tenant_id);
    }
    if let Some(user_id) = ctx.user_id {
        event = event.with_actor(user_id);
    }
    audit::record_best_effort(conn, &event);
}

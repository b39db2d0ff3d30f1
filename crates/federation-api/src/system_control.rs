//! Global system controls: kill switch, capability defaults, emergency
//! lockdown, and per-tenant enablement.
//!
//! The control row is a singleton (id = 1, seeded by the schema).
//! Lockdown records the federation_enabled value in force at trigger
//! time; lifting restores exactly that value. If the prior value is
//! unrecoverable, lifting fails closed and leaves federation disabled.

use crate::audit::{self, AuditAction, AuditEvent};
use crate::context::RequestContext;
use fedmesh_federation_core::{validation, FederationError, Result, SystemControls};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;
use tracing::{info, warn};

/// Load the control singleton.
pub fn get_controls(conn: &Connection) -> Result<SystemControls> {
    let controls = conn.query_row(
        r#"
        SELECT federation_enabled, whitelist_mode_enabled, max_federation_level,
               allow_profiles, allow_messaging, allow_transactions,
               allow_listings, allow_events, allow_groups,
               lockdown_active, updated_by, updated_at
        FROM federation_system_control
        WHERE id = 1
        "#,
        [],
        |row| {
            Ok(SystemControls {
                federation_enabled: row.get::<_, i64>(0)? != 0,
                whitelist_mode_enabled: row.get::<_, i64>(1)? != 0,
                max_federation_level: row.get(2)?,
                allow_profiles: row.get::<_, i64>(3)? != 0,
                allow_messaging: row.get::<_, i64>(4)? != 0,
                allow_transactions: row.get::<_, i64>(5)? != 0,
                allow_listings: row.get::<_, i64>(6)? != 0,
                allow_events: row.get::<_, i64>(7)? != 0,
                allow_groups: row.get::<_, i64>(8)? != 0,
                lockdown_active: row.get::<_, i64>(9)? != 0,
                updated_by: row.get(10)?,
                updated_at: row.get(11)?,
            })
        },
    )?;
    Ok(controls)
}

/// Partial update for the control singleton; absent fields keep their
/// current value.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ControlsPatch {
    pub federation_enabled: Option<bool>,
    pub whitelist_mode_enabled: Option<bool>,
    pub max_federation_level: Option<i64>,
    pub allow_profiles: Option<bool>,
    pub allow_messaging: Option<bool>,
    pub allow_transactions: Option<bool>,
    pub allow_listings: Option<bool>,
    pub allow_events: Option<bool>,
    pub allow_groups: Option<bool>,
}

/// Apply a patch to the control singleton. Admin-only; audited, and the
/// audit write shares the update's transaction.
pub fn update_controls(
    conn: &Connection,
    ctx: &RequestContext,
    patch: &ControlsPatch,
) -> Result<SystemControls> {
    ctx.require_admin()?;
    if let Some(level) = patch.max_federation_level {
        validation::validate_max_federation_level(level)?;
    }

    let tx = conn.unchecked_transaction()?;
    let current = get_controls(&tx)?;

    let next = SystemControls {
        federation_enabled: patch.federation_enabled.unwrap_or(current.federation_enabled),
        whitelist_mode_enabled: patch
            .whitelist_mode_enabled
            .unwrap_or(current.whitelist_mode_enabled),
        max_federation_level: patch
            .max_federation_level
            .unwrap_or(current.max_federation_level),
        allow_profiles: patch.allow_profiles.unwrap_or(current.allow_profiles),
        allow_messaging: patch.allow_messaging.unwrap_or(current.allow_messaging),
        allow_transactions: patch
            .allow_transactions
            .unwrap_or(current.allow_transactions),
        allow_listings: patch.allow_listings.unwrap_or(current.allow_listings),
        allow_events: patch.allow_events.unwrap_or(current.allow_events),
        allow_groups: patch.allow_groups.unwrap_or(current.allow_groups),
        lockdown_active: current.lockdown_active,
        updated_by: Some(ctx.actor_label()),
        updated_at: chrono::Utc::now(),
    };

    tx.execute(
        r#"
        UPDATE federation_system_control SET
            federation_enabled = ?1,
            whitelist_mode_enabled = ?2,
            max_federation_level = ?3,
            allow_profiles = ?4,
            allow_messaging = ?5,
            allow_transactions = ?6,
            allow_listings = ?7,
            allow_events = ?8,
            allow_groups = ?9,
            updated_by = ?10,
            updated_at = ?11
        WHERE id = 1
        "#,
        params![
            next.federation_enabled,
            next.whitelist_mode_enabled,
            next.max_federation_level,
            next.allow_profiles,
            next.allow_messaging,
            next.allow_transactions,
            next.allow_listings,
            next.allow_events,
            next.allow_groups,
            next.updated_by,
            next.updated_at,
        ],
    )?;

    audit::record(
        &tx,
        &AuditEvent::new(AuditAction::ControlsUpdated)
            .with_actor(ctx.user_id.unwrap_or(0))
            .with_details(serde_json::json!({
                "federation_enabled": next.federation_enabled,
                "whitelist_mode_enabled": next.whitelist_mode_enabled,
                "max_federation_level": next.max_federation_level,
                "request_id": ctx.request_id,
            })),
    )?;
    tx.commit()?;

    info!(
        actor = %ctx.actor_label(),
        federation_enabled = next.federation_enabled,
        "system controls updated"
    );
    Ok(next)
}

/// Trigger emergency lockdown: force federation off and remember the
/// value it had, so lifting can restore it. Idempotent; repeated
/// triggers are no-ops that still audit.
pub fn trigger_lockdown(
    conn: &Connection,
    ctx: &RequestContext,
    reason: &str,
) -> Result<SystemControls> {
    ctx.require_admin()?;
    validation::validate_reason(reason)?;

    let tx = conn.unchecked_transaction()?;
    let already_locked: bool = tx.query_row(
        "SELECT lockdown_active FROM federation_system_control WHERE id = 1",
        [],
        |row| Ok(row.get::<_, i64>(0)? != 0),
    )?;

    if !already_locked {
        tx.execute(
            r#"
            UPDATE federation_system_control SET
                prior_federation_enabled = federation_enabled,
                federation_enabled = 0,
                lockdown_active = 1,
                updated_by = ?1,
                updated_at = ?2
            WHERE id = 1
            "#,
            params![ctx.actor_label(), chrono::Utc::now()],
        )?;
    }

    // A failed audit write fails the lockdown; both roll back together.
    audit::record(
        &tx,
        &AuditEvent::new(AuditAction::LockdownTriggered)
            .with_actor(ctx.user_id.unwrap_or(0))
            .with_details(serde_json::json!({
                "reason": reason,
                "already_locked": already_locked,
                "request_id": ctx.request_id,
            })),
    )?;
    tx.commit()?;

    warn!(actor = %ctx.actor_label(), reason, "emergency lockdown triggered");
    get_controls(conn)
}

/// Lift an active lockdown, restoring the federation_enabled value
/// recorded when the lockdown was triggered. If no prior value is
/// recoverable, federation stays disabled (fail closed).
pub fn lift_lockdown(conn: &Connection, ctx: &RequestContext) -> Result<SystemControls> {
    ctx.require_admin()?;

    let tx = conn.unchecked_transaction()?;
    let (locked, prior): (bool, Option<i64>) = tx.query_row(
        "SELECT lockdown_active, prior_federation_enabled FROM federation_system_control WHERE id = 1",
        [],
        |row| Ok((row.get::<_, i64>(0)? != 0, row.get(1)?)),
    )?;

    if !locked {
        return Err(FederationError::Conflict(
            "no lockdown is active".to_string(),
        ));
    }

    let restored = match prior {
        Some(value) => value != 0,
        None => {
            // Unrecoverable prior state: stay disabled rather than guess.
            warn!("lockdown lift found no recorded prior state, failing closed");
            false
        }
    };

    tx.execute(
        r#"
        UPDATE federation_system_control SET
            federation_enabled = ?1,
            lockdown_active = 0,
            prior_federation_enabled = NULL,
            updated_by = ?2,
            updated_at = ?3
        WHERE id = 1
        "#,
        params![restored, ctx.actor_label(), chrono::Utc::now()],
    )?;

    audit::record(
        &tx,
        &AuditEvent::new(AuditAction::LockdownLifted)
            .with_actor(ctx.user_id.unwrap_or(0))
            .with_details(serde_json::json!({
                "restored_federation_enabled": restored,
                "prior_recorded": prior.is_some(),
                "request_id": ctx.request_id,
            })),
    )?;
    tx.commit()?;

    info!(actor = %ctx.actor_label(), restored, "emergency lockdown lifted");
    get_controls(conn)
}

/// Per-tenant federation enablement.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TenantFeatures {
    pub tenant_id: i64,
    pub federation_enabled: bool,
}

/// Tenant features row, defaulting to disabled when absent.
pub fn get_tenant_features(conn: &Connection, tenant_id: i64) -> Result<TenantFeatures> {
    validation::validate_tenant_id(tenant_id)?;
    let enabled: Option<bool> = conn
        .query_row(
            "SELECT federation_enabled FROM federation_tenant_features WHERE tenant_id = ?1",
            params![tenant_id],
            |row| Ok(row.get::<_, i64>(0)? != 0),
        )
        .optional()?;

    Ok(TenantFeatures {
        tenant_id,
        federation_enabled: enabled.unwrap_or(false),
    })
}

/// Enable or disable federation for one tenant. Admin-only, audited.
pub fn set_tenant_features(
    conn: &Connection,
    ctx: &RequestContext,
    tenant_id: i64,
    federation_enabled: bool,
) -> Result<TenantFeatures> {
    ctx.require_admin()?;
    validation::validate_tenant_id(tenant_id)?;

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        r#"
        INSERT INTO federation_tenant_features (tenant_id, federation_enabled, updated_by, updated_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(tenant_id) DO UPDATE SET
            federation_enabled = excluded.federation_enabled,
            updated_by = excluded.updated_by,
            updated_at = excluded.updated_at
        "#,
        params![
            tenant_id,
            federation_enabled,
            ctx.actor_label(),
            chrono::Utc::now()
        ],
    )?;

    audit::record(
        &tx,
        &AuditEvent::new(AuditAction::TenantFeaturesUpdated)
            .with_tenant(tenant_id)
            .with_actor(ctx.user_id.unwrap_or(0))
            .with_details(serde_json::json!({
                "federation_enabled": federation_enabled,
                "request_id": ctx.request_id,
            })),
    )?;
    tx.commit()?;

    Ok(TenantFeatures {
        tenant_id,
        federation_enabled,
    })
}

//! Whitelist admission gate.
//!
//! When whitelist mode is on, only listed tenants may form new
//! partnerships. Eligibility is checked at partnership creation time;
//! removing a tenant never retroactively suspends partnerships it
//! already holds.

use crate::audit::{self, AuditAction, AuditEvent};
use crate::context::RequestContext;
use chrono::{DateTime, Utc};
use fedmesh_federation_core::{validation, FederationError, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct WhitelistEntry {
    pub tenant_id: i64,
    pub added_by: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Whether `tenant_id` may participate in new partnerships.
///
/// With whitelist mode off every tenant is eligible; with it on,
/// eligibility requires a whitelist entry.
pub fn is_eligible(conn: &Connection, tenant_id: i64) -> Result<bool> {
    validation::validate_tenant_id(tenant_id)?;

    let whitelist_mode: bool = conn.query_row(
        "SELECT whitelist_mode_enabled FROM federation_system_control WHERE id = 1",
        [],
        |row| Ok(row.get::<_, i64>(0)? != 0),
    )?;
    if !whitelist_mode {
        return Ok(true);
    }

    let listed: Option<i64> = conn
        .query_row(
            "SELECT tenant_id FROM federation_whitelist WHERE tenant_id = ?1",
            params![tenant_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(listed.is_some())
}

/// Add a tenant to the whitelist. Admin-only, audited; re-adding an
/// existing entry refreshes its notes.
pub fn add(
    conn: &Connection,
    ctx: &RequestContext,
    tenant_id: i64,
    notes: Option<&str>,
) -> Result<WhitelistEntry> {
    ctx.require_admin()?;
    validation::validate_tenant_id(tenant_id)?;

    let now = Utc::now();
    let added_by = ctx.actor_label();

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        r#"
        INSERT INTO federation_whitelist (tenant_id, added_by, notes, created_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(tenant_id) DO UPDATE SET
            added_by = excluded.added_by,
            notes = excluded.notes
        "#,
        params![tenant_id, added_by, notes, now],
    )?;

    audit::record(
        &tx,
        &AuditEvent::new(AuditAction::WhitelistAdded)
            .with_tenant(tenant_id)
            .with_actor(ctx.user_id.unwrap_or(0))
            .with_details(serde_json::json!({
                "notes": notes,
                "request_id": ctx.request_id,
            })),
    )?;
    tx.commit()?;

    info!(tenant_id, actor = %added_by, "tenant whitelisted");
    Ok(WhitelistEntry {
        tenant_id,
        added_by: Some(added_by),
        notes: notes.map(String::from),
        created_at: now,
    })
}

/// Remove a tenant from the whitelist. Admin-only, audited; NOT_FOUND
/// when the tenant is not listed.
pub fn remove(conn: &Connection, ctx: &RequestContext, tenant_id: i64) -> Result<()> {
    ctx.require_admin()?;
    validation::validate_tenant_id(tenant_id)?;

    let tx = conn.unchecked_transaction()?;
    let removed = tx.execute(
        "DELETE FROM federation_whitelist WHERE tenant_id = ?1",
        params![tenant_id],
    )?;
    if removed == 0 {
        return Err(FederationError::NotFound(format!(
            "tenant {} is not whitelisted",
            tenant_id
        )));
    }

    audit::record(
        &tx,
        &AuditEvent::new(AuditAction::WhitelistRemoved)
            .with_tenant(tenant_id)
            .with_actor(ctx.user_id.unwrap_or(0))
            .with_details(serde_json::json!({ "request_id": ctx.request_id })),
    )?;
    tx.commit()?;

    info!(tenant_id, actor = %ctx.actor_label(), "tenant removed from whitelist");
    Ok(())
}

/// All whitelist entries, newest first.
pub fn list(conn: &Connection) -> Result<Vec<WhitelistEntry>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT tenant_id, added_by, notes, created_at
        FROM federation_whitelist
        ORDER BY created_at DESC, tenant_id DESC
        "#,
    )?;
    let entries = stmt
        .query_map([], |row| {
            Ok(WhitelistEntry {
                tenant_id: row.get(0)?,
                added_by: row.get(1)?,
                notes: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(entries)
}

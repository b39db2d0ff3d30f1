//! Partnership registry and lifecycle state machine.
//!
//! ```text
//! pending   -> active      (approve)
//! active    -> suspended   (suspend, reason required)
//! suspended -> active      (reactivate)
//! active|suspended -> terminated  (terminate, reason required, irreversible)
//! ```
//!
//! Rows store the canonical pair orientation (lower tenant id first),
//! so every lookup is a single indexed probe with no symmetric SQL.
//! The partial unique index on live pairs makes "at most one
//! non-terminated partnership per pair" a store-level guarantee, and
//! all transitions are optimistic: the UPDATE carries the expected
//! prior status and a losing racer gets CONFLICT, not an overwrite.

use crate::audit::{self, AuditAction, AuditEvent};
use crate::context::RequestContext;
use fedmesh_federation_core::{
    normalize_pair, validation, CapabilityFlags, FederationError, FederationLevel, Partnership,
    PartnershipStatus, Result,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePartnershipRequest {
    pub tenant_a: i64,
    pub tenant_b: i64,
    pub federation_level: i64,
    /// When absent, the level's default capability set applies.
    pub capabilities: Option<CapabilityFlags>,
}

fn map_partnership(row: &Row<'_>) -> rusqlite::Result<Partnership> {
    Ok(Partnership {
        id: row.get(0)?,
        tenant_low: row.get(1)?,
        tenant_high: row.get(2)?,
        status: row.get(3)?,
        federation_level: row.get(4)?,
        capabilities: CapabilityFlags {
            profiles: row.get::<_, i64>(5)? != 0,
            messaging: row.get::<_, i64>(6)? != 0,
            transactions: row.get::<_, i64>(7)? != 0,
            listings: row.get::<_, i64>(8)? != 0,
            events: row.get::<_, i64>(9)? != 0,
            groups: row.get::<_, i64>(10)? != 0,
        },
        status_reason: row.get(11)?,
        created_by: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

const PARTNERSHIP_COLUMNS: &str = r#"
    id, tenant_low, tenant_high, status, federation_level,
    share_profiles, share_messaging, share_transactions,
    share_listings, share_events, share_groups,
    status_reason, created_by, created_at, updated_at
"#;

/// Create a pending partnership between two tenants.
///
/// Fails CONFLICT when a live partnership already exists for the pair
/// and FORBIDDEN when whitelist mode rejects either side.
pub fn create_partnership(
    conn: &Connection,
    ctx: &RequestContext,
    req: &CreatePartnershipRequest,
) -> Result<Partnership> {
    ctx.require_admin()?;
    validation::validate_tenant_id(req.tenant_a)?;
    validation::validate_tenant_id(req.tenant_b)?;
    validation::validate_federation_level(req.federation_level)?;
    if req.tenant_a == req.tenant_b {
        return Err(FederationError::Validation(
            "a tenant cannot partner with itself".to_string(),
        ));
    }

    let level = FederationLevel::from_i64(req.federation_level).ok_or_else(|| {
        FederationError::Validation(format!("invalid federation_level {}", req.federation_level))
    })?;

    let controls = crate::system_control::get_controls(conn)?;
    if level.as_i64() > controls.max_federation_level {
        return Err(FederationError::Validation(format!(
            "federation_level {} exceeds the system maximum {}",
            level.as_i64(),
            controls.max_federation_level
        )));
    }

    // Admission is re-checked on every creation; past whitelist removal
    // only blocks new partnerships.
    for tenant in [req.tenant_a, req.tenant_b] {
        if !crate::whitelist::is_eligible(conn, tenant)? {
            return Err(FederationError::Forbidden(format!(
                "tenant {} is not admitted to federation",
                tenant
            )));
        }
    }

    let capabilities = req.capabilities.unwrap_or_else(|| level.default_capabilities());
    let (low, high) = normalize_pair(req.tenant_a, req.tenant_b);
    let now = chrono::Utc::now();

    let tx = conn.unchecked_transaction()?;
    let insert = tx.execute(
        r#"
        INSERT INTO federation_partnerships
            (tenant_low, tenant_high, status, federation_level,
             share_profiles, share_messaging, share_transactions,
             share_listings, share_events, share_groups,
             created_by, created_at, updated_at)
        VALUES (?1, ?2, 'pending', ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
        params![
            low,
            high,
            level,
            capabilities.profiles,
            capabilities.messaging,
            capabilities.transactions,
            capabilities.listings,
            capabilities.events,
            capabilities.groups,
            ctx.user_id,
            now,
            now,
        ],
    );

    match insert {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            return Err(FederationError::Conflict(format!(
                "a non-terminated partnership already exists between tenants {} and {}",
                low, high
            )));
        }
        Err(e) => return Err(e.into()),
    }
    let id = tx.last_insert_rowid();

    audit::record(
        &tx,
        &AuditEvent::new(AuditAction::PartnershipCreated)
            .with_tenant(low)
            .with_partner(high)
            .with_actor(ctx.user_id.unwrap_or(0))
            .with_details(serde_json::json!({
                "partnership_id": id,
                "federation_level": level.as_i64(),
                "level_name": level.name(),
                "request_id": ctx.request_id,
            })),
    )?;
    tx.commit()?;

    info!(
        partnership_id = id,
        tenant_low = low,
        tenant_high = high,
        level = level.name(),
        "partnership created"
    );
    get_by_id(conn, id)
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Partnership by id, NOT_FOUND when absent.
pub fn get_by_id(conn: &Connection, id: i64) -> Result<Partnership> {
    conn.query_row(
        &format!(
            "SELECT {} FROM federation_partnerships WHERE id = ?1",
            PARTNERSHIP_COLUMNS
        ),
        params![id],
        map_partnership,
    )
    .optional()?
    .ok_or_else(|| FederationError::NotFound(format!("partnership {} not found", id)))
}

/// The live (non-terminated) partnership for a tenant pair, regardless
/// of argument order.
pub fn get_partnership(conn: &Connection, a: i64, b: i64) -> Result<Option<Partnership>> {
    let (low, high) = normalize_pair(a, b);
    let partnership = conn
        .query_row(
            &format!(
                r#"
                SELECT {} FROM federation_partnerships
                WHERE tenant_low = ?1 AND tenant_high = ?2 AND status != 'terminated'
                "#,
                PARTNERSHIP_COLUMNS
            ),
            params![low, high],
            map_partnership,
        )
        .optional()?;
    Ok(partnership)
}

/// The active partnership for a tenant pair, if any.
pub fn active_partnership(conn: &Connection, a: i64, b: i64) -> Result<Option<Partnership>> {
    Ok(get_partnership(conn, a, b)?.filter(|p| p.status == PartnershipStatus::Active))
}

fn transition(
    conn: &Connection,
    ctx: &RequestContext,
    id: i64,
    expected: &[PartnershipStatus],
    next: PartnershipStatus,
    reason: Option<&str>,
    action: AuditAction,
) -> Result<Partnership> {
    ctx.require_admin()?;

    let tx = conn.unchecked_transaction()?;
    let current = get_by_id(&tx, id)?;

    // Optimistic transition: the WHERE clause re-verifies the expected
    // prior status so a concurrent administrator loses with CONFLICT.
    let placeholders = expected
        .iter()
        .enumerate()
        .map(|(i, _)| format!("?{}", i + 5))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE federation_partnerships
         SET status = ?1, status_reason = ?2, updated_at = ?3
         WHERE id = ?4 AND status IN ({})",
        placeholders
    );

    let mut bind: Vec<Box<dyn rusqlite::ToSql>> = vec![
        Box::new(next),
        Box::new(reason.map(String::from)),
        Box::new(chrono::Utc::now()),
        Box::new(id),
    ];
    for status in expected {
        bind.push(Box::new(*status));
    }
    let bind_refs: Vec<&dyn rusqlite::ToSql> = bind.iter().map(|b| b.as_ref()).collect();

    let changed = tx.execute(&sql, bind_refs.as_slice())?;
    if changed != 1 {
        return Err(FederationError::Conflict(format!(
            "partnership {} is {}, cannot move to {}",
            id,
            current.status.as_str(),
            next.as_str()
        )));
    }

    audit::record(
        &tx,
        &AuditEvent::new(action)
            .with_tenant(current.tenant_low)
            .with_partner(current.tenant_high)
            .with_actor(ctx.user_id.unwrap_or(0))
            .with_details(serde_json::json!({
                "partnership_id": id,
                "from": current.status.as_str(),
                "to": next.as_str(),
                "reason": reason,
                "request_id": ctx.request_id,
            })),
    )?;
    tx.commit()?;

    info!(
        partnership_id = id,
        from = current.status.as_str(),
        to = next.as_str(),
        "partnership transition"
    );
    get_by_id(conn, id)
}

/// pending -> active
pub fn approve(conn: &Connection, ctx: &RequestContext, id: i64) -> Result<Partnership> {
    transition(
        conn,
        ctx,
        id,
        &[PartnershipStatus::Pending],
        PartnershipStatus::Active,
        None,
        AuditAction::PartnershipApproved,
    )
}

/// active -> suspended; a human-readable reason is mandatory.
pub fn suspend(conn: &Connection, ctx: &RequestContext, id: i64, reason: &str) -> Result<Partnership> {
    validation::validate_reason(reason)?;
    transition(
        conn,
        ctx,
        id,
        &[PartnershipStatus::Active],
        PartnershipStatus::Suspended,
        Some(reason),
        AuditAction::PartnershipSuspended,
    )
}

/// suspended -> active
pub fn reactivate(conn: &Connection, ctx: &RequestContext, id: i64) -> Result<Partnership> {
    transition(
        conn,
        ctx,
        id,
        &[PartnershipStatus::Suspended],
        PartnershipStatus::Active,
        None,
        AuditAction::PartnershipReactivated,
    )
}

/// active|suspended -> terminated. Irreversible.
pub fn terminate(
    conn: &Connection,
    ctx: &RequestContext,
    id: i64,
    reason: &str,
) -> Result<Partnership> {
    validation::validate_reason(reason)?;
    transition(
        conn,
        ctx,
        id,
        &[PartnershipStatus::Active, PartnershipStatus::Suspended],
        PartnershipStatus::Terminated,
        Some(reason),
        AuditAction::PartnershipTerminated,
    )
}

/// One active partner tenant as seen from a given tenant.
#[derive(Debug, Clone, Serialize)]
pub struct PartnerInfo {
    pub partnership_id: i64,
    pub tenant_id: i64,
    pub tenant_name: Option<String>,
    pub federation_level: i64,
    pub level_name: &'static str,
    pub capabilities: CapabilityFlags,
}

/// Active partners of `tenant_id`, with capability flags and level.
pub fn list_active_partners(conn: &Connection, tenant_id: i64) -> Result<Vec<PartnerInfo>> {
    validation::validate_tenant_id(tenant_id)?;

    let mut stmt = conn.prepare(&format!(
        r#"
        SELECT {} FROM federation_partnerships
        WHERE status = 'active' AND (tenant_low = ?1 OR tenant_high = ?1)
        ORDER BY id DESC
        "#,
        PARTNERSHIP_COLUMNS
    ))?;
    let partnerships = stmt
        .query_map(params![tenant_id], map_partnership)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut partners = Vec::with_capacity(partnerships.len());
    for p in partnerships {
        let partner_id = p.partner_of(tenant_id);
        let tenant_name: Option<String> = conn
            .query_row(
                "SELECT name FROM tenants WHERE id = ?1",
                params![partner_id],
                |row| row.get(0),
            )
            .optional()?;
        partners.push(PartnerInfo {
            partnership_id: p.id,
            tenant_id: partner_id,
            tenant_name,
            federation_level: p.federation_level.as_i64(),
            level_name: p.federation_level.name(),
            capabilities: p.capabilities,
        });
    }
    Ok(partners)
}

/// Count of active partnerships a tenant participates in.
pub fn count_active_partnerships(conn: &Connection, tenant_id: i64) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM federation_partnerships
         WHERE status = 'active' AND (tenant_low = ?1 OR tenant_high = ?1)",
        params![tenant_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

//! Append-only audit trail for federation state changes.
//!
//! Writes are synchronous on the caller's connection so that
//! security-relevant operations (lockdown, suspension, termination,
//! whitelist mutation) can run the audit insert inside their own
//! transaction and fail the parent operation if it fails. Routine
//! actions use [`record_best_effort`], which degrades to a tracing
//! warning instead of failing the caller.
//!
//! Severity is fixed per action type: lockdown trigger/lift are
//! `critical`, suspension/termination/whitelist-removal and denied
//! sensitive checks are `warning`, everything else is `info`.

use fedmesh_federation_core::{Result, Severity};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Audit action types (stored as `action_type` text)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ControlsUpdated,
    LockdownTriggered,
    LockdownLifted,
    TenantFeaturesUpdated,
    WhitelistAdded,
    WhitelistRemoved,
    PartnershipCreated,
    PartnershipApproved,
    PartnershipSuspended,
    PartnershipReactivated,
    PartnershipTerminated,
    UserOptedIn,
    UserOptedOut,
    SettingsUpdated,
    MessageSent,
    MessageRead,
    AccessDenied,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::ControlsUpdated => "controls_updated",
            AuditAction::LockdownTriggered => "lockdown_triggered",
            AuditAction::LockdownLifted => "lockdown_lifted",
            AuditAction::TenantFeaturesUpdated => "tenant_features_updated",
            AuditAction::WhitelistAdded => "whitelist_added",
            AuditAction::WhitelistRemoved => "whitelist_removed",
            AuditAction::PartnershipCreated => "partnership_created",
            AuditAction::PartnershipApproved => "partnership_approved",
            AuditAction::PartnershipSuspended => "partnership_suspended",
            AuditAction::PartnershipReactivated => "partnership_reactivated",
            AuditAction::PartnershipTerminated => "partnership_terminated",
            AuditAction::UserOptedIn => "user_opted_in",
            AuditAction::UserOptedOut => "user_opted_out",
            AuditAction::SettingsUpdated => "settings_updated",
            AuditAction::MessageSent => "message_sent",
            AuditAction::MessageRead => "message_read",
            AuditAction::AccessDenied => "access_denied",
        }
    }

    /// Severity escalation is a property of the action, not the caller.
    pub fn severity(&self) -> Severity {
        match self {
            AuditAction::LockdownTriggered | AuditAction::LockdownLifted => Severity::Critical,
            AuditAction::PartnershipSuspended
            | AuditAction::PartnershipTerminated
            | AuditAction::WhitelistRemoved
            | AuditAction::AccessDenied => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

/// An audit event to be written
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub tenant_id: Option<i64>,
    pub partner_tenant_id: Option<i64>,
    pub actor_user_id: Option<i64>,
    pub details: Option<serde_json::Value>,
}

impl AuditEvent {
    pub fn new(action: AuditAction) -> Self {
        Self {
            action,
            tenant_id: None,
            partner_tenant_id: None,
            actor_user_id: None,
            details: None,
        }
    }

    pub fn with_tenant(mut self, tenant_id: i64) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn with_partner(mut self, partner_tenant_id: i64) -> Self {
        self.partner_tenant_id = Some(partner_tenant_id);
        self
    }

    pub fn with_actor(mut self, actor_user_id: i64) -> Self {
        self.actor_user_id = Some(actor_user_id);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Write one audit entry, propagating any failure to the caller.
///
/// Call inside the parent operation's transaction for actions whose
/// audit write must not be lost.
pub fn record(conn: &rusqlite::Connection, event: &AuditEvent) -> Result<()> {
    let details = event
        .details
        .as_ref()
        .and_then(|v| serde_json::to_string(v).ok());

    let mut stmt = conn.prepare_cached(
        r#"
        INSERT INTO federation_audit_log
            (action_type, tenant_id, partner_tenant_id, actor_user_id, details, severity, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )?;
    stmt.execute(params![
        event.action.as_str(),
        event.tenant_id,
        event.partner_tenant_id,
        event.actor_user_id,
        details,
        event.action.severity(),
        chrono::Utc::now(),
    ])?;

    Ok(())
}

/// Write one audit entry, falling back to a tracing warning on failure.
///
/// For routine actions (opt-in/out, message send) where the parent
/// operation proceeds even if the audit store hiccups.
pub fn record_best_effort(conn: &rusqlite::Connection, event: &AuditEvent) {
    if let Err(e) = record(conn, event) {
        warn!(
            action = event.action.as_str(),
            tenant_id = ?event.tenant_id,
            actor_user_id = ?event.actor_user_id,
            error = %e,
            "audit write failed, continuing"
        );
    }
}

/// Query parameters for listing audit entries
#[derive(Debug, Default, Deserialize)]
pub struct AuditQueryParams {
    /// Filter by action type
    pub action_type: Option<String>,
    /// Filter by tenant
    pub tenant_id: Option<i64>,
    /// Filter by severity
    pub severity: Option<String>,
    /// Maximum number of results (default: 100, max: 1000)
    pub limit: Option<i64>,
    /// Offset for pagination (default: 0)
    pub offset: Option<i64>,
}

/// One audit log row
#[derive(Debug, Serialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub action_type: String,
    pub tenant_id: Option<i64>,
    pub partner_tenant_id: Option<i64>,
    pub actor_user_id: Option<i64>,
    pub details: Option<serde_json::Value>,
    pub severity: String,
    pub created_at: String,
}

/// Response for listing audit entries
#[derive(Debug, Serialize)]
pub struct AuditLogResponse {
    pub entries: Vec<AuditLogEntry>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Query the audit trail, newest first.
pub fn query_audit_log(
    conn: &rusqlite::Connection,
    params: &AuditQueryParams,
) -> Result<AuditLogResponse> {
    let limit = params.limit.unwrap_or(100).clamp(1, 1000);
    let offset = params.offset.unwrap_or(0).max(0);

    // Build WHERE clause dynamically
    let mut conditions: Vec<String> = Vec::new();
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(ref action_type) = params.action_type {
        conditions.push("action_type = ?".to_string());
        values.push(Box::new(action_type.clone()));
    }
    if let Some(tenant_id) = params.tenant_id {
        conditions.push("(tenant_id = ? OR partner_tenant_id = ?)".to_string());
        values.push(Box::new(tenant_id));
        values.push(Box::new(tenant_id));
    }
    if let Some(ref severity) = params.severity {
        conditions.push("severity = ?".to_string());
        values.push(Box::new(severity.clone()));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM federation_audit_log {}", where_clause);
    let total: i64 = {
        let mut stmt = conn.prepare(&count_sql)?;
        let params_ref: Vec<&dyn rusqlite::ToSql> = values.iter().map(|b| b.as_ref()).collect();
        stmt.query_row(params_ref.as_slice(), |row| row.get(0))?
    };

    let query_sql = format!(
        r#"
        SELECT id, action_type, tenant_id, partner_tenant_id, actor_user_id,
               details, severity, created_at
        FROM federation_audit_log
        {}
        ORDER BY id DESC
        LIMIT ? OFFSET ?
        "#,
        where_clause
    );

    let mut stmt = conn.prepare(&query_sql)?;
    values.push(Box::new(limit));
    values.push(Box::new(offset));
    let params_ref: Vec<&dyn rusqlite::ToSql> = values.iter().map(|b| b.as_ref()).collect();

    let entries: Vec<AuditLogEntry> = stmt
        .query_map(params_ref.as_slice(), |row| {
            let details: Option<String> = row.get(5)?;
            Ok(AuditLogEntry {
                id: row.get(0)?,
                action_type: row.get(1)?,
                tenant_id: row.get(2)?,
                partner_tenant_id: row.get(3)?,
                actor_user_id: row.get(4)?,
                details: details.and_then(|s| serde_json::from_str(&s).ok()),
                severity: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(AuditLogResponse {
        entries,
        total,
        limit,
        offset,
    })
}

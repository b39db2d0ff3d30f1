//! Per-user federation consent.
//!
//! A missing settings row always reads as fully opted out. Opt-in
//! applies a documented set of permissive defaults (visible by default
//! once opted in); opt-out resets everything and is idempotent. The
//! generic settings update merges only the fields present in the
//! request and never touches the opt-in flag itself.

use crate::audit::{self, AuditAction, AuditEvent};
use crate::context::RequestContext;
use fedmesh_federation_core::{
    validation, ConsentSettings, DenyReason, FederationError, Result, ServiceReach,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Deserialize;
use tracing::info;

fn map_settings(row: &Row<'_>) -> rusqlite::Result<ConsentSettings> {
    Ok(ConsentSettings {
        user_id: row.get(0)?,
        tenant_id: row.get(1)?,
        federation_optin: row.get::<_, i64>(2)? != 0,
        profile_visible: row.get::<_, i64>(3)? != 0,
        appear_in_search: row.get::<_, i64>(4)? != 0,
        show_skills: row.get::<_, i64>(5)? != 0,
        show_location: row.get::<_, i64>(6)? != 0,
        show_reviews: row.get::<_, i64>(7)? != 0,
        messaging_enabled: row.get::<_, i64>(8)? != 0,
        transactions_enabled: row.get::<_, i64>(9)? != 0,
        service_reach: row.get(10)?,
        travel_radius_km: row.get(11)?,
        email_notifications: row.get::<_, i64>(12)? != 0,
    })
}

const SETTINGS_COLUMNS: &str = r#"
    user_id, tenant_id, federation_optin, profile_visible, appear_in_search,
    show_skills, show_location, show_reviews, messaging_enabled,
    transactions_enabled, service_reach, travel_radius_km, email_notifications
"#;

/// Fully-populated settings for a user; the opted-out default when no
/// row exists. This is the only place "row missing" is interpreted.
pub fn get_settings(conn: &Connection, user_id: i64, tenant_id: i64) -> Result<ConsentSettings> {
    validation::validate_user_id(user_id)?;

    let settings = conn
        .query_row(
            &format!(
                "SELECT {} FROM federation_user_settings WHERE user_id = ?1",
                SETTINGS_COLUMNS
            ),
            params![user_id],
            map_settings,
        )
        .optional()?;
    Ok(settings.unwrap_or_else(|| ConsentSettings::opted_out(user_id, tenant_id)))
}

fn write_settings(conn: &Connection, settings: &ConsentSettings) -> Result<()> {
    let now = chrono::Utc::now();
    conn.execute(
        r#"
        INSERT INTO federation_user_settings
            (user_id, tenant_id, federation_optin, profile_visible, appear_in_search,
             show_skills, show_location, show_reviews, messaging_enabled,
             transactions_enabled, service_reach, travel_radius_km,
             email_notifications, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
        ON CONFLICT(user_id) DO UPDATE SET
            tenant_id = excluded.tenant_id,
            federation_optin = excluded.federation_optin,
            profile_visible = excluded.profile_visible,
            appear_in_search = excluded.appear_in_search,
            show_skills = excluded.show_skills,
            show_location = excluded.show_location,
            show_reviews = excluded.show_reviews,
            messaging_enabled = excluded.messaging_enabled,
            transactions_enabled = excluded.transactions_enabled,
            service_reach = excluded.service_reach,
            travel_radius_km = excluded.travel_radius_km,
            email_notifications = excluded.email_notifications,
            updated_at = excluded.updated_at
        "#,
        params![
            settings.user_id,
            settings.tenant_id,
            settings.federation_optin,
            settings.profile_visible,
            settings.appear_in_search,
            settings.show_skills,
            settings.show_location,
            settings.show_reviews,
            settings.messaging_enabled,
            settings.transactions_enabled,
            settings.service_reach,
            settings.travel_radius_km,
            settings.email_notifications,
            now,
        ],
    )?;
    Ok(())
}

/// Opt the acting user into federation.
///
/// Requires federation to be available globally and for the user's
/// tenant; sets the visible-by-default-once-opted-in flags.
pub fn opt_in(conn: &Connection, ctx: &RequestContext) -> Result<ConsentSettings> {
    let (tenant_id, user_id) = ctx.require_user()?;

    let controls = crate::system_control::get_controls(conn)?;
    let tenant = crate::system_control::get_tenant_features(conn, tenant_id)?;
    if !controls.federation_enabled || controls.lockdown_active || !tenant.federation_enabled {
        return Err(FederationError::Denied(DenyReason::FederationNotAvailable));
    }

    let mut settings = get_settings(conn, user_id, tenant_id)?;
    settings.federation_optin = true;
    // Permissive defaults: opted-in users are discoverable and
    // reachable unless they narrow their settings afterwards.
    settings.profile_visible = true;
    settings.appear_in_search = true;
    settings.show_skills = true;
    settings.messaging_enabled = true;
    settings.transactions_enabled = true;
    write_settings(conn, &settings)?;

    audit::record_best_effort(
        conn,
        &AuditEvent::new(AuditAction::UserOptedIn)
            .with_tenant(tenant_id)
            .with_actor(user_id)
            .with_details(serde_json::json!({ "request_id": ctx.request_id })),
    );

    info!(user_id, tenant_id, "user opted into federation");
    Ok(settings)
}

/// Opt the acting user out, resetting every visibility and capability
/// flag. Calling it again is a no-op success.
pub fn opt_out(conn: &Connection, ctx: &RequestContext) -> Result<ConsentSettings> {
    let (tenant_id, user_id) = ctx.require_user()?;

    let settings = ConsentSettings::opted_out(user_id, tenant_id);
    write_settings(conn, &settings)?;

    audit::record_best_effort(
        conn,
        &AuditEvent::new(AuditAction::UserOptedOut)
            .with_tenant(tenant_id)
            .with_actor(user_id)
            .with_details(serde_json::json!({ "request_id": ctx.request_id })),
    );

    info!(user_id, tenant_id, "user opted out of federation");
    Ok(settings)
}

/// Partial settings update; absent fields keep their current value.
/// `federation_optin` is deliberately not part of this surface.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct SettingsPatch {
    pub profile_visible: Option<bool>,
    pub appear_in_search: Option<bool>,
    pub show_skills: Option<bool>,
    pub show_location: Option<bool>,
    pub show_reviews: Option<bool>,
    pub messaging_enabled: Option<bool>,
    pub transactions_enabled: Option<bool>,
    pub service_reach: Option<String>,
    pub travel_radius_km: Option<i64>,
    pub email_notifications: Option<bool>,
}

/// Merge a patch onto the user's current settings, preserving opt-in
/// state. Opt-in changes only via the dedicated operations.
pub fn update_settings(
    conn: &Connection,
    ctx: &RequestContext,
    patch: &SettingsPatch,
) -> Result<ConsentSettings> {
    let (tenant_id, user_id) = ctx.require_user()?;

    let reach = patch
        .service_reach
        .as_deref()
        .map(ServiceReach::parse)
        .transpose()?;
    if let Some(radius) = patch.travel_radius_km {
        validation::validate_travel_radius(radius)?;
    }

    let mut settings = get_settings(conn, user_id, tenant_id)?;
    if let Some(v) = patch.profile_visible {
        settings.profile_visible = v;
    }
    if let Some(v) = patch.appear_in_search {
        settings.appear_in_search = v;
    }
    if let Some(v) = patch.show_skills {
        settings.show_skills = v;
    }
    if let Some(v) = patch.show_location {
        settings.show_location = v;
    }
    if let Some(v) = patch.show_reviews {
        settings.show_reviews = v;
    }
    if let Some(v) = patch.messaging_enabled {
        settings.messaging_enabled = v;
    }
    if let Some(v) = patch.transactions_enabled {
        settings.transactions_enabled = v;
    }
    if let Some(v) = reach {
        settings.service_reach = v;
    }
    if let Some(v) = patch.travel_radius_km {
        settings.travel_radius_km = Some(v);
    }
    if let Some(v) = patch.email_notifications {
        settings.email_notifications = v;
    }
    write_settings(conn, &settings)?;

    audit::record_best_effort(
        conn,
        &AuditEvent::new(AuditAction::SettingsUpdated)
            .with_tenant(tenant_id)
            .with_actor(user_id)
            .with_details(serde_json::json!({ "request_id": ctx.request_id })),
    );

    Ok(settings)
}

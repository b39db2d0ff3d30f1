//! Consent-filtered, cursor-paginated cross-tenant queries.
//!
//! Every query composes the same base predicate: an active partnership
//! granting the relevant capability between the caller's tenant and the
//! target row's tenant, the target tenant federation-enabled, and the
//! owning user opted in (members additionally require search
//! discoverability). Optional filters are ANDed on top, always via
//! bound parameters; the partnership/tenant scoping is part of the SQL
//! skeleton itself, so an unscoped cross-tenant query cannot be
//! expressed here.
//!
//! Pagination walks a descending id with an opaque cursor; a page reads
//! `per_page + 1` rows to learn `has_more` without a count query.
//! Pages are not isolated from concurrent partnership changes; the next
//! query reflects the new state.

use crate::context::RequestContext;
use fedmesh_federation_core::{
    cursor, validation, Capability, Result, ServiceReach,
};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

/// One page of results.
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub(crate) fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
            has_more: false,
        }
    }

    pub(crate) fn from_rows(mut rows: Vec<(i64, T)>, per_page: i64) -> Self {
        let has_more = rows.len() as i64 > per_page;
        if has_more {
            rows.truncate(per_page as usize);
        }
        let next_cursor = if has_more {
            rows.last().map(|(id, _)| cursor::encode(*id))
        } else {
            None
        };
        Self {
            items: rows.into_iter().map(|(_, item)| item).collect(),
            next_cursor,
            has_more,
        }
    }
}

/// Whether the caller clears the global, tenant, and own-consent layers
/// for browsing. A denial yields an empty page, not an error: under
/// lockdown the directory simply looks empty.
fn caller_may_browse(
    conn: &Connection,
    tenant_id: i64,
    user_id: i64,
    capability: Capability,
) -> Result<bool> {
    let controls = crate::system_control::get_controls(conn)?;
    if !controls.federation_enabled || controls.lockdown_active {
        return Ok(false);
    }
    if !controls.capability_allowed(capability) {
        return Ok(false);
    }
    if !crate::system_control::get_tenant_features(conn, tenant_id)?.federation_enabled {
        return Ok(false);
    }
    let settings = crate::consent::get_settings(conn, user_id, tenant_id)?;
    Ok(settings.federation_optin)
}

/// Shared decode of the pagination window.
pub(crate) fn page_window(cursor_token: Option<&str>, per_page: Option<i64>) -> Result<(i64, i64)> {
    let before_id = match cursor_token {
        Some(token) => cursor::decode(token)?,
        None => i64::MAX,
    };
    Ok((before_id, validation::clamp_per_page(per_page)))
}

// The partnership scope predicate shared by all cross-tenant queries.
// Canonical orientation makes the pair probe a single index lookup.
macro_rules! partnership_scope {
    ($capability_column:literal, $target_tenant:literal) => {
        concat!(
            "JOIN federation_partnerships fp
               ON fp.status = 'active'
              AND fp.",
            $capability_column,
            " = 1
              AND fp.tenant_low = MIN(?1, ",
            $target_tenant,
            ")
              AND fp.tenant_high = MAX(?1, ",
            $target_tenant,
            ")
             JOIN federation_tenant_features tf
               ON tf.tenant_id = ",
            $target_tenant,
            "
              AND tf.federation_enabled = 1"
        )
    };
}

#[derive(Debug, Default, Deserialize)]
pub struct MemberQuery {
    pub q: Option<String>,
    pub partner_id: Option<i64>,
    pub service_reach: Option<String>,
    /// Comma-separated skill terms; every term must match.
    pub skills: Option<String>,
    pub cursor: Option<String>,
    pub per_page: Option<i64>,
}

/// A member visible across a partnership, with per-user redaction
/// already applied.
#[derive(Debug, Clone, Serialize)]
pub struct MemberRecord {
    pub user_id: i64,
    pub tenant_id: i64,
    pub tenant_name: String,
    pub display_name: String,
    pub skills: Option<String>,
    pub location: Option<String>,
    pub service_reach: ServiceReach,
}

struct MemberRow {
    record: MemberRecord,
    show_skills: bool,
    show_location: bool,
}

impl MemberRow {
    fn redacted(self) -> MemberRecord {
        let mut record = self.record;
        // Redaction follows the member's own flags, independent of the
        // coarse partnership/tenant gates.
        if !self.show_skills {
            record.skills = None;
        }
        if !self.show_location {
            record.location = None;
        }
        record
    }
}

const MEMBER_SELECT: &str = r#"
    SELECT u.id, u.tenant_id, t.name, u.display_name, u.skills, u.location,
           s.service_reach, s.show_skills, s.show_location
    FROM users u
    JOIN tenants t ON t.id = u.tenant_id AND t.active = 1
    JOIN federation_user_settings s ON s.user_id = u.id
"#;

fn map_member_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemberRow> {
    Ok(MemberRow {
        record: MemberRecord {
            user_id: row.get(0)?,
            tenant_id: row.get(1)?,
            tenant_name: row.get(2)?,
            display_name: row.get(3)?,
            skills: row.get(4)?,
            location: row.get(5)?,
            service_reach: row.get(6)?,
        },
        show_skills: row.get::<_, i64>(7)? != 0,
        show_location: row.get::<_, i64>(8)? != 0,
    })
}

/// Members of partner tenants, search-discoverable and opted in.
pub fn browse_members(
    conn: &Connection,
    ctx: &RequestContext,
    query: &MemberQuery,
) -> Result<Page<MemberRecord>> {
    let (tenant_id, user_id) = ctx.require_user()?;
    if let Some(ref q) = query.q {
        validation::validate_search_query(q)?;
    }
    let (before_id, per_page) = page_window(query.cursor.as_deref(), query.per_page)?;

    if !caller_may_browse(conn, tenant_id, user_id, Capability::Profiles)? {
        return Ok(Page::empty());
    }

    let mut sql = format!(
        "{} {} WHERE u.active = 1
           AND u.tenant_id != ?1
           AND s.federation_optin = 1
           AND s.appear_in_search = 1
           AND u.id < ?2",
        MEMBER_SELECT,
        partnership_scope!("share_profiles", "u.tenant_id"),
    );
    let mut bind: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(tenant_id), Box::new(before_id)];

    if let Some(partner_id) = query.partner_id {
        validation::validate_tenant_id(partner_id)?;
        bind.push(Box::new(partner_id));
        sql.push_str(&format!(" AND u.tenant_id = ?{}", bind.len()));
    }
    if let Some(ref q) = query.q {
        bind.push(Box::new(format!("%{}%", q)));
        sql.push_str(&format!(
            " AND (u.display_name LIKE ?{n} OR u.skills LIKE ?{n})",
            n = bind.len()
        ));
    }
    if let Some(ref reach) = query.service_reach {
        match ServiceReach::parse(reach)? {
            // Remote-capable covers willing travelers too
            ServiceReach::RemoteOk => {
                sql.push_str(" AND s.service_reach IN ('remote_ok', 'travel_ok')");
            }
            exact => {
                bind.push(Box::new(exact));
                sql.push_str(&format!(" AND s.service_reach = ?{}", bind.len()));
            }
        }
    }
    if let Some(ref skills) = query.skills {
        for term in skills.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            bind.push(Box::new(format!("%{}%", term)));
            sql.push_str(&format!(" AND u.skills LIKE ?{}", bind.len()));
        }
    }

    bind.push(Box::new(per_page + 1));
    sql.push_str(&format!(" ORDER BY u.id DESC LIMIT ?{}", bind.len()));

    let bind_refs: Vec<&dyn rusqlite::ToSql> = bind.iter().map(|b| b.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(bind_refs.as_slice(), map_member_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let keyed = rows
        .into_iter()
        .map(|row| (row.record.user_id, row.redacted()))
        .collect();
    Ok(Page::from_rows(keyed, per_page))
}

/// One partner-tenant member by id, NOT_FOUND when any gate hides them.
pub fn get_member(
    conn: &Connection,
    ctx: &RequestContext,
    member_user_id: i64,
) -> Result<MemberRecord> {
    let (tenant_id, user_id) = ctx.require_user()?;
    validation::validate_user_id(member_user_id)?;

    let invisible =
        || fedmesh_federation_core::FederationError::NotFound(format!("member {} not found", member_user_id));

    if !caller_may_browse(conn, tenant_id, user_id, Capability::Profiles)? {
        return Err(invisible());
    }

    let sql = format!(
        "{} {} WHERE u.active = 1
           AND u.tenant_id != ?1
           AND s.federation_optin = 1
           AND s.profile_visible = 1
           AND u.id = ?2",
        MEMBER_SELECT,
        partnership_scope!("share_profiles", "u.tenant_id"),
    );
    let row = conn
        .query_row(&sql, rusqlite::params![tenant_id, member_user_id], map_member_row)
        .optional()?;

    row.map(MemberRow::redacted).ok_or_else(invisible)
}

#[derive(Debug, Default, Deserialize)]
pub struct ListingQuery {
    pub q: Option<String>,
    pub partner_id: Option<i64>,
    pub category: Option<String>,
    pub cursor: Option<String>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListingRecord {
    pub id: i64,
    pub tenant_id: i64,
    pub tenant_name: String,
    pub user_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub created_at: String,
}

/// Listings of partner tenants whose owners are opted in.
pub fn browse_listings(
    conn: &Connection,
    ctx: &RequestContext,
    query: &ListingQuery,
) -> Result<Page<ListingRecord>> {
    let (tenant_id, user_id) = ctx.require_user()?;
    if let Some(ref q) = query.q {
        validation::validate_search_query(q)?;
    }
    let (before_id, per_page) = page_window(query.cursor.as_deref(), query.per_page)?;

    if !caller_may_browse(conn, tenant_id, user_id, Capability::Listings)? {
        return Ok(Page::empty());
    }

    let mut sql = format!(
        "SELECT l.id, l.tenant_id, t.name, l.user_id, l.title, l.description,
                l.category, l.created_at
         FROM listings l
         JOIN tenants t ON t.id = l.tenant_id AND t.active = 1
         JOIN federation_user_settings s ON s.user_id = l.user_id
         {}
         WHERE l.active = 1
           AND l.tenant_id != ?1
           AND s.federation_optin = 1
           AND l.id < ?2",
        partnership_scope!("share_listings", "l.tenant_id"),
    );
    let mut bind: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(tenant_id), Box::new(before_id)];

    if let Some(partner_id) = query.partner_id {
        validation::validate_tenant_id(partner_id)?;
        bind.push(Box::new(partner_id));
        sql.push_str(&format!(" AND l.tenant_id = ?{}", bind.len()));
    }
    if let Some(ref category) = query.category {
        bind.push(Box::new(category.clone()));
        sql.push_str(&format!(" AND l.category = ?{}", bind.len()));
    }
    if let Some(ref q) = query.q {
        bind.push(Box::new(format!("%{}%", q)));
        sql.push_str(&format!(
            " AND (l.title LIKE ?{n} OR l.description LIKE ?{n})",
            n = bind.len()
        ));
    }

    bind.push(Box::new(per_page + 1));
    sql.push_str(&format!(" ORDER BY l.id DESC LIMIT ?{}", bind.len()));

    let bind_refs: Vec<&dyn rusqlite::ToSql> = bind.iter().map(|b| b.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(bind_refs.as_slice(), |row| {
            Ok(ListingRecord {
                id: row.get(0)?,
                tenant_id: row.get(1)?,
                tenant_name: row.get(2)?,
                user_id: row.get(3)?,
                title: row.get(4)?,
                description: row.get(5)?,
                category: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let keyed = rows.into_iter().map(|r| (r.id, r)).collect();
    Ok(Page::from_rows(keyed, per_page))
}

#[derive(Debug, Default, Deserialize)]
pub struct EventQuery {
    pub q: Option<String>,
    pub partner_id: Option<i64>,
    pub event_type: Option<String>,
    /// When true, only events that have not started yet.
    pub upcoming: Option<bool>,
    pub cursor: Option<String>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub id: i64,
    pub tenant_id: i64,
    pub tenant_name: String,
    pub user_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub event_type: Option<String>,
    pub starts_at: Option<String>,
    pub created_at: String,
}

/// Events of partner tenants whose owners are opted in.
pub fn browse_events(
    conn: &Connection,
    ctx: &RequestContext,
    query: &EventQuery,
) -> Result<Page<EventRecord>> {
    let (tenant_id, user_id) = ctx.require_user()?;
    if let Some(ref q) = query.q {
        validation::validate_search_query(q)?;
    }
    let (before_id, per_page) = page_window(query.cursor.as_deref(), query.per_page)?;

    if !caller_may_browse(conn, tenant_id, user_id, Capability::Events)? {
        return Ok(Page::empty());
    }

    let mut sql = format!(
        "SELECT e.id, e.tenant_id, t.name, e.user_id, e.title, e.description,
                e.event_type, e.starts_at, e.created_at
         FROM events e
         JOIN tenants t ON t.id = e.tenant_id AND t.active = 1
         JOIN federation_user_settings s ON s.user_id = e.user_id
         {}
         WHERE e.active = 1
           AND e.tenant_id != ?1
           AND s.federation_optin = 1
           AND e.id < ?2",
        partnership_scope!("share_events", "e.tenant_id"),
    );
    let mut bind: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(tenant_id), Box::new(before_id)];

    if let Some(partner_id) = query.partner_id {
        validation::validate_tenant_id(partner_id)?;
        bind.push(Box::new(partner_id));
        sql.push_str(&format!(" AND e.tenant_id = ?{}", bind.len()));
    }
    if let Some(ref event_type) = query.event_type {
        bind.push(Box::new(event_type.clone()));
        sql.push_str(&format!(" AND e.event_type = ?{}", bind.len()));
    }
    if query.upcoming.unwrap_or(false) {
        bind.push(Box::new(chrono::Utc::now()));
        sql.push_str(&format!(" AND e.starts_at >= ?{}", bind.len()));
    }
    if let Some(ref q) = query.q {
        bind.push(Box::new(format!("%{}%", q)));
        sql.push_str(&format!(
            " AND (e.title LIKE ?{n} OR e.description LIKE ?{n})",
            n = bind.len()
        ));
    }

    bind.push(Box::new(per_page + 1));
    sql.push_str(&format!(" ORDER BY e.id DESC LIMIT ?{}", bind.len()));

    let bind_refs: Vec<&dyn rusqlite::ToSql> = bind.iter().map(|b| b.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(bind_refs.as_slice(), |row| {
            Ok(EventRecord {
                id: row.get(0)?,
                tenant_id: row.get(1)?,
                tenant_name: row.get(2)?,
                user_id: row.get(3)?,
                title: row.get(4)?,
                description: row.get(5)?,
                event_type: row.get(6)?,
                starts_at: row.get(7)?,
                created_at: row.get(8)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let keyed = rows.into_iter().map(|r| (r.id, r)).collect();
    Ok(Page::from_rows(keyed, per_page))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consent::SettingsPatch;
    use crate::context::RequestContext;
    use crate::partnership::CreatePartnershipRequest;
    use axum::http::HeaderMap;
    use fedmesh_federation_core::{schema, FederationError};

    fn admin_ctx() -> RequestContext {
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", "99".parse().unwrap());
        headers.insert("x-admin-role", "god".parse().unwrap());
        RequestContext::from_headers(&headers)
    }

    fn user_ctx(tenant: i64, user: i64) -> RequestContext {
        let mut headers = HeaderMap::new();
        headers.insert("x-tenant-id", tenant.to_string().parse().unwrap());
        headers.insert("x-user-id", user.to_string().parse().unwrap());
        RequestContext::from_headers(&headers)
    }

    /// Two federated tenants with an active level-2 partnership.
    /// Tenant 1 user 10 is the caller; tenant 2 users 20..=22 exist,
    /// 20 and 21 opted in, 22 not.
    fn fixture() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::init_schema(&conn).unwrap();
        let admin = admin_ctx();

        crate::system_control::update_controls(
            &conn,
            &admin,
            &crate::system_control::ControlsPatch {
                federation_enabled: Some(true),
                whitelist_mode_enabled: Some(false),
                max_federation_level: Some(4),
                allow_profiles: Some(true),
                allow_messaging: Some(true),
                allow_transactions: Some(true),
                allow_listings: Some(true),
                allow_events: Some(true),
                allow_groups: Some(true),
            },
        )
        .unwrap();
        crate::system_control::set_tenant_features(&conn, &admin, 1, true).unwrap();
        crate::system_control::set_tenant_features(&conn, &admin, 2, true).unwrap();

        conn.execute_batch(
            r#"
            INSERT INTO tenants (id, name, slug) VALUES (1, 'Alpha', 'alpha');
            INSERT INTO tenants (id, name, slug) VALUES (2, 'Beta', 'beta');
            INSERT INTO users (id, tenant_id, display_name, skills, location)
                VALUES (10, 1, 'Caller', NULL, NULL);
            INSERT INTO users (id, tenant_id, display_name, skills, location)
                VALUES (20, 2, 'Ada Weaver', 'carpentry, repair', 'North District');
            INSERT INTO users (id, tenant_id, display_name, skills, location)
                VALUES (21, 2, 'Bram Stoker', 'gardening', 'South District');
            INSERT INTO users (id, tenant_id, display_name, skills, location)
                VALUES (22, 2, 'Cleo Hidden', 'welding', 'East District');
            "#,
        )
        .unwrap();

        let p = crate::partnership::create_partnership(
            &conn,
            &admin,
            &CreatePartnershipRequest {
                tenant_a: 1,
                tenant_b: 2,
                federation_level: 2,
                capabilities: None,
            },
        )
        .unwrap();
        crate::partnership::approve(&conn, &admin, p.id).unwrap();

        crate::consent::opt_in(&conn, &user_ctx(1, 10)).unwrap();
        crate::consent::opt_in(&conn, &user_ctx(2, 20)).unwrap();
        crate::consent::opt_in(&conn, &user_ctx(2, 21)).unwrap();
        conn
    }

    fn insert_listing(conn: &Connection, id: i64, tenant: i64, user: i64, title: &str, category: &str) {
        conn.execute(
            "INSERT INTO listings (id, tenant_id, user_id, title, category, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, '2026-02-01T00:00:00Z')",
            rusqlite::params![id, tenant, user, title, category],
        )
        .unwrap();
    }

    #[test]
    fn test_members_require_optin_and_search_visibility() {
        let conn = fixture();
        let page = browse_members(&conn, &user_ctx(1, 10), &MemberQuery::default()).unwrap();
        let ids: Vec<i64> = page.items.iter().map(|m| m.user_id).collect();
        // 22 never opted in; the caller's own tenant is excluded
        assert_eq!(ids, vec![21, 20]);

        crate::consent::update_settings(
            &conn,
            &user_ctx(2, 21),
            &SettingsPatch {
                appear_in_search: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
        let page = browse_members(&conn, &user_ctx(1, 10), &MemberQuery::default()).unwrap();
        let ids: Vec<i64> = page.items.iter().map(|m| m.user_id).collect();
        assert_eq!(ids, vec![20]);
    }

    #[test]
    fn test_member_redaction_follows_user_flags() {
        let conn = fixture();
        // Opt-in defaults: skills shown, location hidden
        let page = browse_members(&conn, &user_ctx(1, 10), &MemberQuery::default()).unwrap();
        let ada = page.items.iter().find(|m| m.user_id == 20).unwrap();
        assert_eq!(ada.skills.as_deref(), Some("carpentry, repair"));
        assert!(ada.location.is_none());

        crate::consent::update_settings(
            &conn,
            &user_ctx(2, 20),
            &SettingsPatch {
                show_skills: Some(false),
                show_location: Some(true),
                ..Default::default()
            },
        )
        .unwrap();
        let page = browse_members(&conn, &user_ctx(1, 10), &MemberQuery::default()).unwrap();
        let ada = page.items.iter().find(|m| m.user_id == 20).unwrap();
        assert!(ada.skills.is_none());
        assert_eq!(ada.location.as_deref(), Some("North District"));
    }

    #[test]
    fn test_member_search_filter() {
        let conn = fixture();
        let page = browse_members(
            &conn,
            &user_ctx(1, 10),
            &MemberQuery {
                q: Some("garden".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].user_id, 21);
    }

    #[test]
    fn test_member_service_reach_filter() {
        let conn = fixture();
        crate::consent::update_settings(
            &conn,
            &user_ctx(2, 20),
            &SettingsPatch {
                service_reach: Some("travel_ok".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        // 21 stays on the opt-in default, local_only

        let ctx = user_ctx(1, 10);
        let filter = |reach: &str| MemberQuery {
            service_reach: Some(reach.to_string()),
            ..Default::default()
        };

        let page = browse_members(&conn, &ctx, &filter("local_only")).unwrap();
        assert_eq!(page.items.iter().map(|m| m.user_id).collect::<Vec<_>>(), vec![21]);

        // remote_ok is satisfied by travelers as well
        let page = browse_members(&conn, &ctx, &filter("remote_ok")).unwrap();
        assert_eq!(page.items.iter().map(|m| m.user_id).collect::<Vec<_>>(), vec![20]);

        let page = browse_members(&conn, &ctx, &filter("travel_ok")).unwrap();
        assert_eq!(page.items.iter().map(|m| m.user_id).collect::<Vec<_>>(), vec![20]);

        assert!(matches!(
            browse_members(&conn, &ctx, &filter("teleport")),
            Err(FederationError::Validation(_))
        ));
    }

    #[test]
    fn test_member_skills_filter_is_conjunctive() {
        let conn = fixture();
        let ctx = user_ctx(1, 10);
        let filter = |skills: &str| MemberQuery {
            skills: Some(skills.to_string()),
            ..Default::default()
        };

        let page = browse_members(&conn, &ctx, &filter("carpentry")).unwrap();
        assert_eq!(page.items.iter().map(|m| m.user_id).collect::<Vec<_>>(), vec![20]);

        // Every comma-separated term must match
        let page = browse_members(&conn, &ctx, &filter("carpentry, repair")).unwrap();
        assert_eq!(page.items.iter().map(|m| m.user_id).collect::<Vec<_>>(), vec![20]);
        let page = browse_members(&conn, &ctx, &filter("carpentry, gardening")).unwrap();
        assert!(page.items.is_empty());

        // Blank terms are ignored
        let page = browse_members(&conn, &ctx, &filter(" , gardening, ")).unwrap();
        assert_eq!(page.items.iter().map(|m| m.user_id).collect::<Vec<_>>(), vec![21]);
    }

    #[test]
    fn test_events_upcoming_filter() {
        let conn = fixture();
        conn.execute_batch(
            r#"
            INSERT INTO events (id, tenant_id, user_id, title, starts_at, created_at)
                VALUES (1, 2, 20, 'Past repair cafe', '2020-05-01T10:00:00Z', '2020-04-01T00:00:00Z');
            INSERT INTO events (id, tenant_id, user_id, title, starts_at, created_at)
                VALUES (2, 2, 20, 'Future repair cafe', '2099-05-01T10:00:00Z', '2026-04-01T00:00:00Z');
            "#,
        )
        .unwrap();

        let ctx = user_ctx(1, 10);
        let page = browse_events(&conn, &ctx, &EventQuery::default()).unwrap();
        assert_eq!(page.items.len(), 2);

        let page = browse_events(
            &conn,
            &ctx,
            &EventQuery {
                upcoming: Some(true),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].title, "Future repair cafe");
    }

    #[test]
    fn test_lockdown_empties_browse_results() {
        let conn = fixture();
        crate::system_control::trigger_lockdown(&conn, &admin_ctx(), "incident").unwrap();

        let page = browse_members(&conn, &user_ctx(1, 10), &MemberQuery::default()).unwrap();
        assert!(page.items.is_empty());
        assert!(!page.has_more);

        // Lifting restores prior browsing behavior exactly
        crate::system_control::lift_lockdown(&conn, &admin_ctx()).unwrap();
        let page = browse_members(&conn, &user_ctx(1, 10), &MemberQuery::default()).unwrap();
        assert_eq!(page.items.len(), 2);
    }

    #[test]
    fn test_suspended_partnership_empties_results() {
        let conn = fixture();
        let p = crate::partnership::get_partnership(&conn, 1, 2).unwrap().unwrap();
        crate::partnership::suspend(&conn, &admin_ctx(), p.id, "pause").unwrap();

        let page = browse_members(&conn, &user_ctx(1, 10), &MemberQuery::default()).unwrap();
        assert!(page.items.is_empty());
    }

    #[test]
    fn test_member_detail_and_invisibility() {
        let conn = fixture();
        let ctx = user_ctx(1, 10);

        let ada = get_member(&conn, &ctx, 20).unwrap();
        assert_eq!(ada.display_name, "Ada Weaver");
        assert_eq!(ada.tenant_name, "Beta");

        // Not opted in: indistinguishable from nonexistent
        assert!(matches!(
            get_member(&conn, &ctx, 22),
            Err(FederationError::NotFound(_))
        ));
        // Own-tenant users are not served by the federation surface
        assert!(matches!(
            get_member(&conn, &ctx, 10),
            Err(FederationError::NotFound(_))
        ));

        // Hiding the profile hides the detail view even though the
        // member stays search-discoverable
        crate::consent::update_settings(
            &conn,
            &user_ctx(2, 20),
            &SettingsPatch {
                profile_visible: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(matches!(
            get_member(&conn, &ctx, 20),
            Err(FederationError::NotFound(_))
        ));
    }

    #[test]
    fn test_listing_filters() {
        let conn = fixture();
        insert_listing(&conn, 1, 2, 20, "Handmade chair", "woodwork");
        insert_listing(&conn, 2, 2, 20, "Garden help", "services");
        insert_listing(&conn, 3, 2, 22, "Welding job", "services");
        insert_listing(&conn, 4, 1, 10, "Local only", "services");

        let ctx = user_ctx(1, 10);
        let page = browse_listings(&conn, &ctx, &ListingQuery::default()).unwrap();
        let ids: Vec<i64> = page.items.iter().map(|l| l.id).collect();
        // Owner 22 is not opted in; listing 4 belongs to the caller's tenant
        assert_eq!(ids, vec![2, 1]);

        let page = browse_listings(
            &conn,
            &ctx,
            &ListingQuery {
                category: Some("woodwork".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].title, "Handmade chair");

        let page = browse_listings(
            &conn,
            &ctx,
            &ListingQuery {
                q: Some("garden".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, 2);
    }

    #[test]
    fn test_events_require_capability_flag() {
        let conn = fixture();
        conn.execute(
            "INSERT INTO events (id, tenant_id, user_id, title, event_type, created_at)
             VALUES (1, 2, 20, 'Repair cafe', 'workshop', '2026-02-01T00:00:00Z')",
            [],
        )
        .unwrap();

        let ctx = user_ctx(1, 10);
        let page = browse_events(&conn, &ctx, &EventQuery::default()).unwrap();
        assert_eq!(page.items.len(), 1);

        // Withdraw the events capability from the partnership
        conn.execute(
            "UPDATE federation_partnerships SET share_events = 0",
            [],
        )
        .unwrap();
        let page = browse_events(&conn, &ctx, &EventQuery::default()).unwrap();
        assert!(page.items.is_empty());
    }

    #[test]
    fn test_pagination_is_complete_and_stable_under_insertion() {
        let conn = fixture();
        for i in 1..=7 {
            insert_listing(&conn, i, 2, 20, &format!("Listing {}", i), "misc");
        }

        let ctx = user_ctx(1, 10);
        let first = browse_listings(
            &conn,
            &ctx,
            &ListingQuery {
                per_page: Some(3),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(
            first.items.iter().map(|l| l.id).collect::<Vec<_>>(),
            vec![7, 6, 5]
        );
        assert!(first.has_more);

        // New higher-id rows mid-pagination must not duplicate or shift
        // the remaining pages
        insert_listing(&conn, 100, 2, 20, "Late arrival", "misc");

        let second = browse_listings(
            &conn,
            &ctx,
            &ListingQuery {
                per_page: Some(3),
                cursor: first.next_cursor.clone(),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(
            second.items.iter().map(|l| l.id).collect::<Vec<_>>(),
            vec![4, 3, 2]
        );
        assert!(second.has_more);

        let third = browse_listings(
            &conn,
            &ctx,
            &ListingQuery {
                per_page: Some(3),
                cursor: second.next_cursor.clone(),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(third.items.iter().map(|l| l.id).collect::<Vec<_>>(), vec![1]);
        assert!(!third.has_more);
        assert!(third.next_cursor.is_none());
    }

    #[test]
    fn test_per_page_is_clamped() {
        let conn = fixture();
        for i in 1..=3 {
            insert_listing(&conn, i, 2, 20, &format!("Listing {}", i), "misc");
        }
        let page = browse_listings(
            &conn,
            &user_ctx(1, 10),
            &ListingQuery {
                per_page: Some(0),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(page.has_more);
    }

    #[test]
    fn test_invalid_cursor_is_validation_error() {
        let conn = fixture();
        let result = browse_members(
            &conn,
            &user_ctx(1, 10),
            &MemberQuery {
                cursor: Some("bogus".to_string()),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(FederationError::Validation(_))));
    }
}

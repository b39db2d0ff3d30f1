//! Versioned SQLite schema for the federation core.
//!
//! The whole schema is applied in one idempotent batch at deploy time;
//! services assume these tables exist and fail loudly otherwise. There
//! is no runtime schema probing.

use crate::{FederationError, Result};

/// Current schema version stamped into `federation_meta`.
pub const SCHEMA_VERSION: i64 = 1;

/// Initialize the SQLite schema for the federation core.
///
/// Creates all tables if they don't exist:
/// - `federation_meta`: schema version stamp
/// - `federation_system_control`: global kill-switch singleton
/// - `federation_tenant_features`: per-tenant enablement
/// - `federation_whitelist`: admission gate entries
/// - `federation_partnerships`: partnership registry (canonical pair
///   orientation, partial unique index on live pairs)
/// - `federation_user_settings`: per-user consent
/// - `federation_messages`: paired relay rows
/// - `federation_audit_log`: append-only audit trail
/// - directory read models: `tenants`, `users`, `listings`, `events`
pub fn init_schema(conn: &rusqlite::Connection) -> Result<()> {
    let ddl = r#"
    -- Schema version stamp
    CREATE TABLE IF NOT EXISTS federation_meta (
      key TEXT PRIMARY KEY,
      value TEXT NOT NULL
    );

    INSERT OR IGNORE INTO federation_meta (key, value) VALUES ('schema_version', '1');

    -- Global kill-switch and defaults. Exactly one row may exist.
    CREATE TABLE IF NOT EXISTS federation_system_control (
      id INTEGER PRIMARY KEY CHECK (id = 1),
      federation_enabled INTEGER NOT NULL DEFAULT 0,
      whitelist_mode_enabled INTEGER NOT NULL DEFAULT 1,
      max_federation_level INTEGER NOT NULL DEFAULT 2
        CHECK (max_federation_level BETWEEN 0 AND 4),
      allow_profiles INTEGER NOT NULL DEFAULT 0,
      allow_messaging INTEGER NOT NULL DEFAULT 0,
      allow_transactions INTEGER NOT NULL DEFAULT 0,
      allow_listings INTEGER NOT NULL DEFAULT 0,
      allow_events INTEGER NOT NULL DEFAULT 0,
      allow_groups INTEGER NOT NULL DEFAULT 0,
      lockdown_active INTEGER NOT NULL DEFAULT 0,
      -- federation_enabled value recorded at lockdown time; lifting
      -- restores this, never a hardcoded default
      prior_federation_enabled INTEGER,
      updated_by TEXT,
      updated_at TEXT NOT NULL
    );

    INSERT OR IGNORE INTO federation_system_control (id, updated_at)
      VALUES (1, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'));

    -- Per-tenant federation enablement
    CREATE TABLE IF NOT EXISTS federation_tenant_features (
      tenant_id INTEGER PRIMARY KEY,
      federation_enabled INTEGER NOT NULL DEFAULT 0,
      updated_by TEXT,
      updated_at TEXT NOT NULL
    );

    -- Whitelist admission entries
    CREATE TABLE IF NOT EXISTS federation_whitelist (
      tenant_id INTEGER PRIMARY KEY,
      added_by TEXT,
      notes TEXT,
      created_at TEXT NOT NULL
    );

    -- Partnership registry. Canonical orientation: tenant_low < tenant_high.
    CREATE TABLE IF NOT EXISTS federation_partnerships (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      tenant_low INTEGER NOT NULL,
      tenant_high INTEGER NOT NULL,
      status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'active', 'suspended', 'terminated')),
      federation_level INTEGER NOT NULL DEFAULT 1
        CHECK (federation_level BETWEEN 1 AND 4),
      share_profiles INTEGER NOT NULL DEFAULT 0,
      share_messaging INTEGER NOT NULL DEFAULT 0,
      share_transactions INTEGER NOT NULL DEFAULT 0,
      share_listings INTEGER NOT NULL DEFAULT 0,
      share_events INTEGER NOT NULL DEFAULT 0,
      share_groups INTEGER NOT NULL DEFAULT 0,
      status_reason TEXT,
      created_by INTEGER,
      created_at TEXT NOT NULL,
      updated_at TEXT NOT NULL,
      CHECK (tenant_low < tenant_high)
    );

    -- At most one non-terminated partnership per tenant pair
    CREATE UNIQUE INDEX IF NOT EXISTS idx_partnerships_live_pair
      ON federation_partnerships(tenant_low, tenant_high)
      WHERE status != 'terminated';

    CREATE INDEX IF NOT EXISTS idx_partnerships_tenant_low ON federation_partnerships(tenant_low);
    CREATE INDEX IF NOT EXISTS idx_partnerships_tenant_high ON federation_partnerships(tenant_high);
    CREATE INDEX IF NOT EXISTS idx_partnerships_status ON federation_partnerships(status);

    -- Per-user consent. Absence of a row means fully opted out.
    CREATE TABLE IF NOT EXISTS federation_user_settings (
      user_id INTEGER PRIMARY KEY,
      tenant_id INTEGER NOT NULL,
      federation_optin INTEGER NOT NULL DEFAULT 0,
      profile_visible INTEGER NOT NULL DEFAULT 0,
      appear_in_search INTEGER NOT NULL DEFAULT 0,
      show_skills INTEGER NOT NULL DEFAULT 0,
      show_location INTEGER NOT NULL DEFAULT 0,
      show_reviews INTEGER NOT NULL DEFAULT 0,
      messaging_enabled INTEGER NOT NULL DEFAULT 0,
      transactions_enabled INTEGER NOT NULL DEFAULT 0,
      service_reach TEXT NOT NULL DEFAULT 'local_only'
        CHECK (service_reach IN ('local_only', 'remote_ok', 'travel_ok')),
      travel_radius_km INTEGER,
      email_notifications INTEGER NOT NULL DEFAULT 0,
      created_at TEXT NOT NULL,
      updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_user_settings_tenant ON federation_user_settings(tenant_id);
    CREATE INDEX IF NOT EXISTS idx_user_settings_optin ON federation_user_settings(federation_optin);

    -- Relayed messages. One logical send is two rows: outbound owned by
    -- the sender, inbound owned by the receiver.
    CREATE TABLE IF NOT EXISTS federation_messages (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      sender_tenant_id INTEGER NOT NULL,
      sender_user_id INTEGER NOT NULL,
      receiver_tenant_id INTEGER NOT NULL,
      receiver_user_id INTEGER NOT NULL,
      subject TEXT NOT NULL,
      body TEXT NOT NULL,
      direction TEXT NOT NULL CHECK (direction IN ('outbound', 'inbound')),
      status TEXT NOT NULL CHECK (status IN ('unread', 'delivered', 'read')),
      reference_message_id INTEGER,
      created_at TEXT NOT NULL,
      read_at TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_messages_inbox
      ON federation_messages(receiver_user_id, direction, status);
    CREATE INDEX IF NOT EXISTS idx_messages_outbox
      ON federation_messages(sender_user_id, direction);

    -- Append-only audit trail; rows are never updated or deleted
    CREATE TABLE IF NOT EXISTS federation_audit_log (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      action_type TEXT NOT NULL,
      tenant_id INTEGER,
      partner_tenant_id INTEGER,
      actor_user_id INTEGER,
      details TEXT,
      severity TEXT NOT NULL DEFAULT 'info'
        CHECK (severity IN ('info', 'warning', 'critical')),
      created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_audit_action ON federation_audit_log(action_type);
    CREATE INDEX IF NOT EXISTS idx_audit_tenant ON federation_audit_log(tenant_id);
    CREATE INDEX IF NOT EXISTS idx_audit_created ON federation_audit_log(created_at);

    -- Directory read models consulted (not administered) by this core

    CREATE TABLE IF NOT EXISTS tenants (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      name TEXT NOT NULL,
      slug TEXT UNIQUE NOT NULL,
      active INTEGER NOT NULL DEFAULT 1
    );

    CREATE TABLE IF NOT EXISTS users (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      tenant_id INTEGER NOT NULL,
      display_name TEXT NOT NULL,
      skills TEXT,
      location TEXT,
      active INTEGER NOT NULL DEFAULT 1,
      FOREIGN KEY (tenant_id) REFERENCES tenants(id)
    );

    CREATE INDEX IF NOT EXISTS idx_users_tenant ON users(tenant_id);

    CREATE TABLE IF NOT EXISTS listings (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      tenant_id INTEGER NOT NULL,
      user_id INTEGER NOT NULL,
      title TEXT NOT NULL,
      description TEXT,
      category TEXT,
      active INTEGER NOT NULL DEFAULT 1,
      created_at TEXT NOT NULL,
      FOREIGN KEY (tenant_id) REFERENCES tenants(id),
      FOREIGN KEY (user_id) REFERENCES users(id)
    );

    CREATE INDEX IF NOT EXISTS idx_listings_tenant ON listings(tenant_id);
    CREATE INDEX IF NOT EXISTS idx_listings_category ON listings(category);

    CREATE TABLE IF NOT EXISTS events (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      tenant_id INTEGER NOT NULL,
      user_id INTEGER NOT NULL,
      title TEXT NOT NULL,
      description TEXT,
      event_type TEXT,
      starts_at TEXT,
      active INTEGER NOT NULL DEFAULT 1,
      created_at TEXT NOT NULL,
      FOREIGN KEY (tenant_id) REFERENCES tenants(id),
      FOREIGN KEY (user_id) REFERENCES users(id)
    );

    CREATE INDEX IF NOT EXISTS idx_events_tenant ON events(tenant_id);
    CREATE INDEX IF NOT EXISTS idx_events_type ON events(event_type);
    "#;

    conn.execute_batch(ddl)?;
    Ok(())
}

/// Read the stamped schema version.
pub fn schema_version(conn: &rusqlite::Connection) -> Result<i64> {
    let version: String = conn.query_row(
        "SELECT value FROM federation_meta WHERE key = 'schema_version'",
        [],
        |row| row.get(0),
    )?;

    version
        .parse()
        .map_err(|e| FederationError::Internal(format!("invalid schema version: {}", e)))
}

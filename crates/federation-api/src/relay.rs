//! Cross-tenant message relay.
//!
//! A send writes two rows in one transaction: an outbound copy in the
//! sender's mailbox (status `delivered`) and an inbound copy in the
//! receiver's (status `unread`). Both carry the same subject, body,
//! and thread reference; either both land or neither does. Read state
//! lives on the inbound copy only.

use crate::audit::{self, AuditAction, AuditEvent};
use crate::context::RequestContext;
use crate::query::{self, Page};
use chrono::Utc;
use fedmesh_federation_core::{
    validation, Capability, DenyReason, Direction, FederationError, Message, MessageStatus, Result,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub receiver_tenant_id: i64,
    pub receiver_user_id: i64,
    pub subject: String,
    pub body: String,
    pub reference_message_id: Option<i64>,
}

/// Ids of the row pair created by a successful send.
#[derive(Debug, Serialize)]
pub struct DeliveryReceipt {
    pub message_id: i64,
    pub inbound_message_id: i64,
    pub created_at: chrono::DateTime<Utc>,
}

/// Which mailbox to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailboxKind {
    #[default]
    Inbox,
    Outbox,
}

fn map_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        sender_tenant_id: row.get(1)?,
        sender_user_id: row.get(2)?,
        receiver_tenant_id: row.get(3)?,
        receiver_user_id: row.get(4)?,
        subject: row.get(5)?,
        body: row.get(6)?,
        direction: row.get(7)?,
        status: row.get(8)?,
        reference_message_id: row.get(9)?,
        created_at: row.get(10)?,
        read_at: row.get(11)?,
    })
}

const MESSAGE_COLUMNS: &str = "id, sender_tenant_id, sender_user_id, receiver_tenant_id, \
     receiver_user_id, subject, body, direction, status, reference_message_id, created_at, read_at";

/// Relay a message to a partner-tenant member.
pub fn send(
    conn: &Connection,
    ctx: &RequestContext,
    request: &SendMessageRequest,
) -> Result<DeliveryReceipt> {
    let (tenant_id, user_id) = ctx.require_user()?;
    validation::validate_tenant_id(request.receiver_tenant_id)?;
    validation::validate_user_id(request.receiver_user_id)?;
    validation::validate_subject(&request.subject)?;
    validation::validate_body(&request.body)?;
    let subject = request.subject.trim();
    let body = request.body.trim();
    if request.receiver_tenant_id == tenant_id {
        return Err(FederationError::Validation(
            "receiver is in the sender's own tenant".to_string(),
        ));
    }

    // Gate checks and inserts share one transaction: the partnership
    // seen active here is the one the rows are written under
    let tx = conn.unchecked_transaction()?;

    let receiver_exists: bool = tx
        .query_row(
            "SELECT 1 FROM users WHERE id = ?1 AND tenant_id = ?2 AND active = 1",
            params![request.receiver_user_id, request.receiver_tenant_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if !receiver_exists {
        return Err(FederationError::NotFound(format!(
            "user {} not found in tenant {}",
            request.receiver_user_id, request.receiver_tenant_id
        )));
    }

    let decision = crate::gate::resolve(
        &tx,
        tenant_id,
        request.receiver_tenant_id,
        user_id,
        Capability::Messaging,
    )?;
    if let Some(reason) = decision.reason {
        // Audit on the outer connection or the rollback would take the
        // entry with it
        tx.rollback()?;
        crate::gate::audit_denial(conn, ctx, request.receiver_tenant_id, Capability::Messaging, reason);
        return Err(FederationError::Denied(reason));
    }

    // The receiver's consent gates delivery, not just the sender's
    let receiver = crate::consent::get_settings(
        &tx,
        request.receiver_user_id,
        request.receiver_tenant_id,
    )?;
    if !receiver.federation_optin || !receiver.messaging_enabled {
        return Err(FederationError::Denied(DenyReason::MessagingDisabled));
    }

    // A thread reference must point at a message the sender was party to
    if let Some(reference_id) = request.reference_message_id {
        validation::validate_message_id(reference_id)?;
        let participates: bool = tx
            .query_row(
                "SELECT 1 FROM federation_messages
                 WHERE id = ?1 AND (sender_user_id = ?2 OR receiver_user_id = ?2)",
                params![reference_id, user_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !participates {
            return Err(FederationError::Validation(format!(
                "reference message {} is not in the sender's history",
                reference_id
            )));
        }
    }

    let now = Utc::now();
    tx.execute(
        r#"
        INSERT INTO federation_messages
            (sender_tenant_id, sender_user_id, receiver_tenant_id, receiver_user_id,
             subject, body, direction, status, reference_message_id, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
        params![
            tenant_id,
            user_id,
            request.receiver_tenant_id,
            request.receiver_user_id,
            subject,
            body,
            Direction::Outbound,
            MessageStatus::Delivered,
            request.reference_message_id,
            now,
        ],
    )?;
    let outbound_id = tx.last_insert_rowid();

    tx.execute(
        r#"
        INSERT INTO federation_messages
            (sender_tenant_id, sender_user_id, receiver_tenant_id, receiver_user_id,
             subject, body, direction, status, reference_message_id, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
        params![
            tenant_id,
            user_id,
            request.receiver_tenant_id,
            request.receiver_user_id,
            subject,
            body,
            Direction::Inbound,
            MessageStatus::Unread,
            request.reference_message_id,
            now,
        ],
    )?;
    let inbound_id = tx.last_insert_rowid();

    audit::record_best_effort(
        &tx,
        &AuditEvent::new(AuditAction::MessageSent)
            .with_tenant(tenant_id)
            .with_partner(request.receiver_tenant_id)
            .with_actor(user_id)
            .with_details(serde_json::json!({
                "message_id": outbound_id,
                "receiver_user_id": request.receiver_user_id,
            })),
    );

    tx.commit()?;
    Ok(DeliveryReceipt {
        message_id: outbound_id,
        inbound_message_id: inbound_id,
        created_at: now,
    })
}

/// Mark an unread inbound message as read. Only the receiver's own
/// unread inbound copy qualifies; anything else is NOT_FOUND.
pub fn mark_read(conn: &Connection, ctx: &RequestContext, message_id: i64) -> Result<Message> {
    let (tenant_id, user_id) = ctx.require_user()?;
    validation::validate_message_id(message_id)?;

    let now = Utc::now();
    let changed = conn.execute(
        r#"
        UPDATE federation_messages
        SET status = ?1, read_at = ?2
        WHERE id = ?3
          AND receiver_user_id = ?4
          AND receiver_tenant_id = ?5
          AND direction = 'inbound'
          AND status = 'unread'
        "#,
        params![MessageStatus::Read, now, message_id, user_id, tenant_id],
    )?;
    if changed == 0 {
        return Err(FederationError::NotFound(format!(
            "unread message {} not found",
            message_id
        )));
    }

    audit::record_best_effort(
        conn,
        &AuditEvent::new(AuditAction::MessageRead)
            .with_tenant(tenant_id)
            .with_actor(user_id)
            .with_details(serde_json::json!({"message_id": message_id})),
    );

    let sql = format!(
        "SELECT {} FROM federation_messages WHERE id = ?1",
        MESSAGE_COLUMNS
    );
    Ok(conn.query_row(&sql, params![message_id], map_message)?)
}

/// List one of the caller's mailboxes, newest first.
pub fn list_messages(
    conn: &Connection,
    ctx: &RequestContext,
    mailbox: MailboxKind,
    cursor: Option<&str>,
    per_page: Option<i64>,
) -> Result<Page<Message>> {
    let (tenant_id, user_id) = ctx.require_user()?;
    let (before_id, per_page) = query::page_window(cursor, per_page)?;

    let sql = match mailbox {
        MailboxKind::Inbox => format!(
            "SELECT {} FROM federation_messages
             WHERE direction = 'inbound' AND receiver_user_id = ?1
               AND receiver_tenant_id = ?2 AND id < ?3
             ORDER BY id DESC LIMIT ?4",
            MESSAGE_COLUMNS
        ),
        MailboxKind::Outbox => format!(
            "SELECT {} FROM federation_messages
             WHERE direction = 'outbound' AND sender_user_id = ?1
               AND sender_tenant_id = ?2 AND id < ?3
             ORDER BY id DESC LIMIT ?4",
            MESSAGE_COLUMNS
        ),
    };

    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map(
            params![user_id, tenant_id, before_id, per_page + 1],
            map_message,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let keyed = rows.into_iter().map(|m| (m.id, m)).collect();
    Ok(Page::from_rows(keyed, per_page))
}

/// The caller's exchange with one partner-tenant member, newest first:
/// outbound copies the caller sent them and inbound copies received
/// from them. Each side of the conversation sees only its own rows.
pub fn thread(
    conn: &Connection,
    ctx: &RequestContext,
    other_tenant_id: i64,
    other_user_id: i64,
    cursor: Option<&str>,
    per_page: Option<i64>,
) -> Result<Page<Message>> {
    let (tenant_id, user_id) = ctx.require_user()?;
    validation::validate_tenant_id(other_tenant_id)?;
    validation::validate_user_id(other_user_id)?;
    let (before_id, per_page) = query::page_window(cursor, per_page)?;

    let sql = format!(
        "SELECT {} FROM federation_messages
         WHERE ((direction = 'outbound'
                 AND sender_tenant_id = ?1 AND sender_user_id = ?2
                 AND receiver_tenant_id = ?3 AND receiver_user_id = ?4)
             OR (direction = 'inbound'
                 AND receiver_tenant_id = ?1 AND receiver_user_id = ?2
                 AND sender_tenant_id = ?3 AND sender_user_id = ?4))
           AND id < ?5
         ORDER BY id DESC LIMIT ?6",
        MESSAGE_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map(
            params![
                tenant_id,
                user_id,
                other_tenant_id,
                other_user_id,
                before_id,
                per_page + 1
            ],
            map_message,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let keyed = rows.into_iter().map(|m| (m.id, m)).collect();
    Ok(Page::from_rows(keyed, per_page))
}

/// Mark every unread inbound message from one counterpart as read.
/// Returns the number of rows transitioned; zero is a valid outcome.
pub fn mark_thread_read(
    conn: &Connection,
    ctx: &RequestContext,
    other_tenant_id: i64,
    other_user_id: i64,
) -> Result<i64> {
    let (tenant_id, user_id) = ctx.require_user()?;
    validation::validate_tenant_id(other_tenant_id)?;
    validation::validate_user_id(other_user_id)?;

    let now = Utc::now();
    let updated = conn.execute(
        r#"
        UPDATE federation_messages
        SET status = ?1, read_at = ?2
        WHERE receiver_tenant_id = ?3
          AND receiver_user_id = ?4
          AND sender_tenant_id = ?5
          AND sender_user_id = ?6
          AND direction = 'inbound'
          AND status = 'unread'
        "#,
        params![
            MessageStatus::Read,
            now,
            tenant_id,
            user_id,
            other_tenant_id,
            other_user_id
        ],
    )?;

    if updated > 0 {
        audit::record_best_effort(
            conn,
            &AuditEvent::new(AuditAction::MessageRead)
                .with_tenant(tenant_id)
                .with_partner(other_tenant_id)
                .with_actor(user_id)
                .with_details(serde_json::json!({
                    "thread_user_id": other_user_id,
                    "count": updated,
                })),
        );
    }

    Ok(updated as i64)
}

/// Unread inbound messages for the caller.
pub fn unread_count(conn: &Connection, ctx: &RequestContext) -> Result<i64> {
    let (tenant_id, user_id) = ctx.require_user()?;
    let mut stmt = conn.prepare_cached(
        "SELECT COUNT(*) FROM federation_messages
         WHERE direction = 'inbound' AND receiver_user_id = ?1
           AND receiver_tenant_id = ?2 AND status = 'unread'",
    )?;
    Ok(stmt.query_row(params![user_id, tenant_id], |row| row.get(0))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consent::SettingsPatch;
    use crate::partnership::CreatePartnershipRequest;
    use axum::http::HeaderMap;
    use fedmesh_federation_core::schema;

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

    fn fixture() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::init_schema(&conn).unwrap();
        seed_fixture(&conn);
        conn
    }

    fn seed_fixture(conn: &Connection) {
        let admin = admin_ctx();

        crate::system_control::update_controls(
            conn,
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
        crate::system_control::set_tenant_features(conn, &admin, 1, true).unwrap();
        crate::system_control::set_tenant_features(conn, &admin, 2, true).unwrap();

        conn.execute_batch(
            r#"
            INSERT INTO tenants (id, name, slug) VALUES (1, 'Alpha', 'alpha');
            INSERT INTO tenants (id, name, slug) VALUES (2, 'Beta', 'beta');
            INSERT INTO users (id, tenant_id, display_name) VALUES (10, 1, 'Sender');
            INSERT INTO users (id, tenant_id, display_name) VALUES (20, 2, 'Receiver');
            "#,
        )
        .unwrap();

        let p = crate::partnership::create_partnership(
            conn,
            &admin,
            &CreatePartnershipRequest {
                tenant_a: 1,
                tenant_b: 2,
                federation_level: 2,
                capabilities: None,
            },
        )
        .unwrap();
        crate::partnership::approve(conn, &admin, p.id).unwrap();

        crate::consent::opt_in(conn, &user_ctx(1, 10)).unwrap();
        crate::consent::opt_in(conn, &user_ctx(2, 20)).unwrap();
    }

    fn request_to(tenant: i64, user: i64) -> SendMessageRequest {
        SendMessageRequest {
            receiver_tenant_id: tenant,
            receiver_user_id: user,
            subject: "Hello".to_string(),
            body: "Across the mesh".to_string(),
            reference_message_id: None,
        }
    }

    #[test]
    fn test_send_creates_paired_rows() {
        let conn = fixture();
        let receipt = send(&conn, &user_ctx(1, 10), &request_to(2, 20)).unwrap();
        assert_eq!(receipt.inbound_message_id, receipt.message_id + 1);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM federation_messages", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);

        let outbox = list_messages(&conn, &user_ctx(1, 10), MailboxKind::Outbox, None, None).unwrap();
        assert_eq!(outbox.items.len(), 1);
        assert_eq!(outbox.items[0].status, MessageStatus::Delivered);
        assert_eq!(outbox.items[0].direction, Direction::Outbound);

        let inbox = list_messages(&conn, &user_ctx(2, 20), MailboxKind::Inbox, None, None).unwrap();
        assert_eq!(inbox.items.len(), 1);
        assert_eq!(inbox.items[0].status, MessageStatus::Unread);
        assert_eq!(inbox.items[0].subject, "Hello");
        assert_eq!(inbox.items[0].body, "Across the mesh");

        assert_eq!(unread_count(&conn, &user_ctx(2, 20)).unwrap(), 1);
        assert_eq!(unread_count(&conn, &user_ctx(1, 10)).unwrap(), 0);
    }

    #[test]
    fn test_send_without_partnership_writes_nothing() {
        let conn = fixture();
        let p = crate::partnership::get_partnership(&conn, 1, 2).unwrap().unwrap();
        crate::partnership::suspend(&conn, &admin_ctx(), p.id, "pause").unwrap();

        let result = send(&conn, &user_ctx(1, 10), &request_to(2, 20));
        assert!(matches!(
            result,
            Err(FederationError::Denied(DenyReason::NoPartnership))
        ));
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM federation_messages", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_receiver_consent_gates_delivery() {
        let conn = fixture();
        crate::consent::update_settings(
            &conn,
            &user_ctx(2, 20),
            &SettingsPatch {
                messaging_enabled: Some(false),
                ..Default::default()
            },
        )
        .unwrap();

        let result = send(&conn, &user_ctx(1, 10), &request_to(2, 20));
        assert!(matches!(
            result,
            Err(FederationError::Denied(DenyReason::MessagingDisabled))
        ));
    }

    #[test]
    fn test_send_to_unknown_receiver_is_not_found() {
        let conn = fixture();
        let result = send(&conn, &user_ctx(1, 10), &request_to(2, 999));
        assert!(matches!(result, Err(FederationError::NotFound(_))));
    }

    #[test]
    fn test_send_rejects_own_tenant_and_blank_subject() {
        let conn = fixture();
        let result = send(&conn, &user_ctx(1, 10), &request_to(1, 10));
        assert!(matches!(result, Err(FederationError::Validation(_))));

        let mut request = request_to(2, 20);
        request.subject = "   ".to_string();
        let result = send(&conn, &user_ctx(1, 10), &request);
        assert!(matches!(result, Err(FederationError::Validation(_))));
    }

    #[test]
    fn test_reference_must_be_in_sender_history() {
        let conn = fixture();
        let receipt = send(&conn, &user_ctx(1, 10), &request_to(2, 20)).unwrap();

        // Replying to the delivered copy is fine for the receiver
        let mut reply = request_to(1, 10);
        reply.reference_message_id = Some(receipt.inbound_message_id);
        let reply_receipt = send(&conn, &user_ctx(2, 20), &reply).unwrap();

        let inbox = list_messages(&conn, &user_ctx(1, 10), MailboxKind::Inbox, None, None).unwrap();
        assert_eq!(inbox.items[0].id, reply_receipt.inbound_message_id);
        assert_eq!(
            inbox.items[0].reference_message_id,
            Some(receipt.inbound_message_id)
        );

        // An unrelated third party cannot thread onto it
        conn.execute(
            "INSERT INTO users (id, tenant_id, display_name) VALUES (21, 2, 'Bystander')",
            [],
        )
        .unwrap();
        crate::consent::opt_in(&conn, &user_ctx(2, 21)).unwrap();
        let mut intrusion = request_to(1, 10);
        intrusion.reference_message_id = Some(receipt.message_id);
        let result = send(&conn, &user_ctx(2, 21), &intrusion);
        assert!(matches!(result, Err(FederationError::Validation(_))));
    }

    #[test]
    fn test_mark_read_transitions_inbound_copy_only() {
        let conn = fixture();
        let receipt = send(&conn, &user_ctx(1, 10), &request_to(2, 20)).unwrap();

        let read = mark_read(&conn, &user_ctx(2, 20), receipt.inbound_message_id).unwrap();
        assert_eq!(read.status, MessageStatus::Read);
        assert!(read.read_at.is_some());
        assert_eq!(unread_count(&conn, &user_ctx(2, 20)).unwrap(), 0);

        // Second attempt: no longer unread
        assert!(matches!(
            mark_read(&conn, &user_ctx(2, 20), receipt.inbound_message_id),
            Err(FederationError::NotFound(_))
        ));
        // The sender cannot mark the outbound copy
        assert!(matches!(
            mark_read(&conn, &user_ctx(1, 10), receipt.message_id),
            Err(FederationError::NotFound(_))
        ));
        // The outbound copy is untouched
        let outbox = list_messages(&conn, &user_ctx(1, 10), MailboxKind::Outbox, None, None).unwrap();
        assert_eq!(outbox.items[0].status, MessageStatus::Delivered);
    }

    #[test]
    fn test_mailbox_pagination() {
        let conn = fixture();
        for i in 0..5 {
            let mut request = request_to(2, 20);
            request.subject = format!("Message {}", i);
            send(&conn, &user_ctx(1, 10), &request).unwrap();
        }

        let first =
            list_messages(&conn, &user_ctx(2, 20), MailboxKind::Inbox, None, Some(3)).unwrap();
        assert_eq!(first.items.len(), 3);
        assert!(first.has_more);
        assert_eq!(first.items[0].subject, "Message 4");

        let second = list_messages(
            &conn,
            &user_ctx(2, 20),
            MailboxKind::Inbox,
            first.next_cursor.as_deref(),
            Some(3),
        )
        .unwrap();
        assert_eq!(second.items.len(), 2);
        assert!(!second.has_more);
        assert_eq!(second.items[1].subject, "Message 0");
    }

    #[test]
    fn test_send_gate_sees_commits_from_other_connections() {
        use fedmesh_federation_storage::{FederationBackend, LocalSqliteBackend};

        let dir = tempfile::TempDir::new().unwrap();
        let backend = LocalSqliteBackend::new(dir.path().join("federation.db"));
        backend.initialize().unwrap();

        // A member's connection and an admin's connection to the same db
        let member_conn = backend.get_connection().unwrap();
        let admin_conn = backend.get_connection().unwrap();
        seed_fixture(&admin_conn);

        send(&member_conn, &user_ctx(1, 10), &request_to(2, 20)).unwrap();

        let p = crate::partnership::get_partnership(&admin_conn, 1, 2).unwrap().unwrap();
        crate::partnership::suspend(&admin_conn, &admin_ctx(), p.id, "pause").unwrap();

        // The member's next send resolves the gate inside its own write
        // transaction and must observe the committed suspension
        let result = send(&member_conn, &user_ctx(1, 10), &request_to(2, 20));
        assert!(matches!(
            result,
            Err(FederationError::Denied(DenyReason::NoPartnership))
        ));
        let count: i64 = admin_conn
            .query_row("SELECT COUNT(*) FROM federation_messages", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_thread_lists_both_directions_for_one_counterpart() {
        let conn = fixture();
        conn.execute(
            "INSERT INTO users (id, tenant_id, display_name) VALUES (21, 2, 'Other')",
            [],
        )
        .unwrap();
        crate::consent::opt_in(&conn, &user_ctx(2, 21)).unwrap();

        send(&conn, &user_ctx(1, 10), &request_to(2, 20)).unwrap();
        let mut reply = request_to(1, 10);
        reply.subject = "Reply".to_string();
        send(&conn, &user_ctx(2, 20), &reply).unwrap();
        // Unrelated exchange with a different member
        send(&conn, &user_ctx(1, 10), &request_to(2, 21)).unwrap();

        let page = thread(&conn, &user_ctx(1, 10), 2, 20, None, None).unwrap();
        assert_eq!(page.items.len(), 2);
        // Newest first: the inbound reply, then our outbound copy
        assert_eq!(page.items[0].subject, "Reply");
        assert_eq!(page.items[0].direction, Direction::Inbound);
        assert_eq!(page.items[1].direction, Direction::Outbound);

        // The counterpart sees their own two copies, not ours
        let other_side = thread(&conn, &user_ctx(2, 20), 1, 10, None, None).unwrap();
        assert_eq!(other_side.items.len(), 2);
        assert!(other_side
            .items
            .iter()
            .all(|m| m.id != page.items[0].id && m.id != page.items[1].id));

        // A bystander in the partner tenant sees nothing of it
        let outsider = thread(&conn, &user_ctx(2, 21), 1, 10, None, None).unwrap();
        assert_eq!(outsider.items.len(), 1); // only their own inbound copy
        assert_ne!(outsider.items[0].subject, "Reply");
    }

    #[test]
    fn test_mark_thread_read_clears_one_counterpart_only() {
        let conn = fixture();
        conn.execute(
            "INSERT INTO users (id, tenant_id, display_name) VALUES (11, 1, 'Second sender')",
            [],
        )
        .unwrap();
        crate::consent::opt_in(&conn, &user_ctx(1, 11)).unwrap();

        send(&conn, &user_ctx(1, 10), &request_to(2, 20)).unwrap();
        send(&conn, &user_ctx(1, 10), &request_to(2, 20)).unwrap();
        send(&conn, &user_ctx(1, 11), &request_to(2, 20)).unwrap();
        assert_eq!(unread_count(&conn, &user_ctx(2, 20)).unwrap(), 3);

        let updated = mark_thread_read(&conn, &user_ctx(2, 20), 1, 10).unwrap();
        assert_eq!(updated, 2);
        // The other sender's message stays unread
        assert_eq!(unread_count(&conn, &user_ctx(2, 20)).unwrap(), 1);

        // Nothing left to transition: zero, not an error
        assert_eq!(mark_thread_read(&conn, &user_ctx(2, 20), 1, 10).unwrap(), 0);
    }

    #[test]
    fn test_denied_send_attempt_is_audited() {
        let conn = fixture();
        crate::consent::opt_out(&conn, &user_ctx(1, 10)).unwrap();

        let result = send(&conn, &user_ctx(1, 10), &request_to(2, 20));
        assert!(matches!(
            result,
            Err(FederationError::Denied(DenyReason::NotOptedIn))
        ));

        let denied: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM federation_audit_log WHERE action_type = 'access_denied'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(denied, 1);
    }
}

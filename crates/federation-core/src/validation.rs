//! Input validation for federation operations
//!
//! Provides validation functions to prevent:
//! - Malformed identifiers and levels
//! - Excessively long message fields
//! - Unbounded pagination requests

use crate::{FederationError, Result};

/// Maximum length for message subjects
pub const MAX_SUBJECT_LEN: usize = 200;

/// Maximum length for message bodies
pub const MAX_BODY_LEN: usize = 10_000;

/// Maximum length for free-text search queries
pub const MAX_SEARCH_QUERY_LEN: usize = 200;

/// Maximum length for human-readable reasons (suspension/termination)
pub const MAX_REASON_LEN: usize = 500;

/// Default page size for cursor-paginated queries
pub const DEFAULT_PER_PAGE: i64 = 20;

/// Maximum page size for cursor-paginated queries
pub const MAX_PER_PAGE: i64 = 100;

/// Validate a tenant identifier (positive integer)
pub fn validate_tenant_id(tenant_id: i64) -> Result<()> {
    if tenant_id <= 0 {
        return Err(FederationError::Validation(format!(
            "tenant_id must be positive, got {}",
            tenant_id
        )));
    }
    Ok(())
}

/// Validate a user identifier (positive integer)
pub fn validate_user_id(user_id: i64) -> Result<()> {
    if user_id <= 0 {
        return Err(FederationError::Validation(format!(
            "user_id must be positive, got {}",
            user_id
        )));
    }
    Ok(())
}

/// Validate a message identifier (positive integer)
pub fn validate_message_id(message_id: i64) -> Result<()> {
    if message_id <= 0 {
        return Err(FederationError::Validation(format!(
            "message_id must be positive, got {}",
            message_id
        )));
    }
    Ok(())
}

/// Validate a federation level
///
/// Requirements:
/// - In [1, 4] for partnerships
pub fn validate_federation_level(level: i64) -> Result<()> {
    if !(1..=4).contains(&level) {
        return Err(FederationError::Validation(format!(
            "federation_level must be between 1 and 4, got {}",
            level
        )));
    }
    Ok(())
}

/// Validate the global max federation level bound
///
/// Requirements:
/// - In [0, 4]; 0 means no partnership level is permitted
pub fn validate_max_federation_level(level: i64) -> Result<()> {
    if !(0..=4).contains(&level) {
        return Err(FederationError::Validation(format!(
            "max_federation_level must be between 0 and 4, got {}",
            level
        )));
    }
    Ok(())
}

/// Validate a message subject
pub fn validate_subject(subject: &str) -> Result<()> {
    if subject.trim().is_empty() {
        return Err(FederationError::Validation(
            "subject cannot be empty".to_string(),
        ));
    }
    // Limits are in characters, not bytes
    let chars = subject.chars().count();
    if chars > MAX_SUBJECT_LEN {
        return Err(FederationError::Validation(format!(
            "subject too long: {} > {} characters",
            chars, MAX_SUBJECT_LEN
        )));
    }
    Ok(())
}

/// Validate a message body
pub fn validate_body(body: &str) -> Result<()> {
    if body.trim().is_empty() {
        return Err(FederationError::Validation(
            "body cannot be empty".to_string(),
        ));
    }
    let chars = body.chars().count();
    if chars > MAX_BODY_LEN {
        return Err(FederationError::Validation(format!(
            "body too long: {} > {} characters",
            chars, MAX_BODY_LEN
        )));
    }
    Ok(())
}

/// Validate a suspension/termination reason
pub fn validate_reason(reason: &str) -> Result<()> {
    if reason.trim().is_empty() {
        return Err(FederationError::Validation(
            "a reason is required".to_string(),
        ));
    }
    let chars = reason.chars().count();
    if chars > MAX_REASON_LEN {
        return Err(FederationError::Validation(format!(
            "reason too long: {} > {} characters",
            chars, MAX_REASON_LEN
        )));
    }
    Ok(())
}

/// Validate a free-text search query
pub fn validate_search_query(query: &str) -> Result<()> {
    let chars = query.chars().count();
    if chars > MAX_SEARCH_QUERY_LEN {
        return Err(FederationError::Validation(format!(
            "search query too long: {} > {} characters",
            chars, MAX_SEARCH_QUERY_LEN
        )));
    }
    Ok(())
}

/// Validate a travel radius
pub fn validate_travel_radius(radius_km: i64) -> Result<()> {
    if radius_km < 0 {
        return Err(FederationError::Validation(format!(
            "travel_radius_km cannot be negative, got {}",
            radius_km
        )));
    }
    Ok(())
}

/// Clamp a requested page size into [1, MAX_PER_PAGE], defaulting when absent.
pub fn clamp_per_page(per_page: Option<i64>) -> i64 {
    per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE)
}

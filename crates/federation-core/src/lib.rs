//! FedMesh Federation Core
//!
//! Core types, error taxonomy, and SQLite schema for the FedMesh
//! federation subsystem: partnership lifecycle, layered consent,
//! cross-tenant visibility, and message relay.

pub mod cursor;
pub mod schema;
pub mod validation;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cross-tenant capability a partnership may grant.
///
/// Each capability maps to one flag column on the partnership row and
/// one global toggle column on the system control row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Profiles,
    Messaging,
    Transactions,
    Listings,
    Events,
    Groups,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Profiles => "profiles",
            Capability::Messaging => "messaging",
            Capability::Transactions => "transactions",
            Capability::Listings => "listings",
            Capability::Events => "events",
            Capability::Groups => "groups",
        }
    }

    /// Flag column on `federation_partnerships` for this capability.
    pub fn partnership_column(&self) -> &'static str {
        match self {
            Capability::Profiles => "share_profiles",
            Capability::Messaging => "share_messaging",
            Capability::Transactions => "share_transactions",
            Capability::Listings => "share_listings",
            Capability::Events => "share_events",
            Capability::Groups => "share_groups",
        }
    }

    /// Global toggle column on `federation_system_control`.
    pub fn control_column(&self) -> &'static str {
        match self {
            Capability::Profiles => "allow_profiles",
            Capability::Messaging => "allow_messaging",
            Capability::Transactions => "allow_transactions",
            Capability::Listings => "allow_listings",
            Capability::Events => "allow_events",
            Capability::Groups => "allow_groups",
        }
    }
}

/// Ordinal bound on how much capability a partnership may exercise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FederationLevel {
    Discovery = 1,
    Social = 2,
    Economic = 3,
    Integrated = 4,
}

impl FederationLevel {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(FederationLevel::Discovery),
            2 => Some(FederationLevel::Social),
            3 => Some(FederationLevel::Economic),
            4 => Some(FederationLevel::Integrated),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> i64 {
        *self as i64
    }

    pub fn name(&self) -> &'static str {
        match self {
            FederationLevel::Discovery => "discovery",
            FederationLevel::Social => "social",
            FederationLevel::Economic => "economic",
            FederationLevel::Integrated => "integrated",
        }
    }

    /// Capabilities granted by default when a partnership is created at
    /// this level without explicit flags.
    pub fn default_capabilities(&self) -> CapabilityFlags {
        let mut flags = CapabilityFlags::none();
        flags.profiles = true;
        if *self >= FederationLevel::Social {
            flags.messaging = true;
            flags.listings = true;
            flags.events = true;
        }
        if *self >= FederationLevel::Economic {
            flags.transactions = true;
        }
        if *self >= FederationLevel::Integrated {
            flags.groups = true;
        }
        flags
    }
}

/// Per-partnership capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityFlags {
    pub profiles: bool,
    pub messaging: bool,
    pub transactions: bool,
    pub listings: bool,
    pub events: bool,
    pub groups: bool,
}

impl CapabilityFlags {
    pub fn none() -> Self {
        Self {
            profiles: false,
            messaging: false,
            transactions: false,
            listings: false,
            events: false,
            groups: false,
        }
    }

    pub fn enabled(&self, capability: Capability) -> bool {
        match capability {
            Capability::Profiles => self.profiles,
            Capability::Messaging => self.messaging,
            Capability::Transactions => self.transactions,
            Capability::Listings => self.listings,
            Capability::Events => self.events,
            Capability::Groups => self.groups,
        }
    }
}

/// Partnership lifecycle state. `Terminated` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartnershipStatus {
    Pending,
    Active,
    Suspended,
    Terminated,
}

impl PartnershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartnershipStatus::Pending => "pending",
            PartnershipStatus::Active => "active",
            PartnershipStatus::Suspended => "suspended",
            PartnershipStatus::Terminated => "terminated",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(PartnershipStatus::Pending),
            "active" => Ok(PartnershipStatus::Active),
            "suspended" => Ok(PartnershipStatus::Suspended),
            "terminated" => Ok(PartnershipStatus::Terminated),
            other => Err(FederationError::Internal(format!(
                "unknown partnership status: {}",
                other
            ))),
        }
    }
}

/// A bidirectional trust relationship between two tenants.
///
/// Orientation is canonical: the lower tenant id is always stored in
/// `tenant_low`, so a pair lookup never needs symmetric SQL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partnership {
    pub id: i64,
    pub tenant_low: i64,
    pub tenant_high: i64,
    pub status: PartnershipStatus,
    pub federation_level: FederationLevel,
    pub capabilities: CapabilityFlags,
    pub status_reason: Option<String>,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Partnership {
    pub fn involves(&self, tenant_id: i64) -> bool {
        self.tenant_low == tenant_id || self.tenant_high == tenant_id
    }

    /// The other side of the pair from `tenant_id`'s perspective.
    pub fn partner_of(&self, tenant_id: i64) -> i64 {
        if self.tenant_low == tenant_id {
            self.tenant_high
        } else {
            self.tenant_low
        }
    }
}

/// Canonical orientation for a tenant pair: (lower, higher).
pub fn normalize_pair(a: i64, b: i64) -> (i64, i64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// How far a user is willing to provide services across tenants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceReach {
    LocalOnly,
    RemoteOk,
    TravelOk,
}

impl ServiceReach {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceReach::LocalOnly => "local_only",
            ServiceReach::RemoteOk => "remote_ok",
            ServiceReach::TravelOk => "travel_ok",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "local_only" => Ok(ServiceReach::LocalOnly),
            "remote_ok" => Ok(ServiceReach::RemoteOk),
            "travel_ok" => Ok(ServiceReach::TravelOk),
            other => Err(FederationError::Validation(format!(
                "invalid service_reach: {}",
                other
            ))),
        }
    }
}

/// Per-user federation consent and visibility preferences.
///
/// A missing settings row always resolves to `opted_out`, never to
/// "fully visible": defaulting happens in exactly one place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentSettings {
    pub user_id: i64,
    pub tenant_id: i64,
    pub federation_optin: bool,
    pub profile_visible: bool,
    pub appear_in_search: bool,
    pub show_skills: bool,
    pub show_location: bool,
    pub show_reviews: bool,
    pub messaging_enabled: bool,
    pub transactions_enabled: bool,
    pub service_reach: ServiceReach,
    pub travel_radius_km: Option<i64>,
    pub email_notifications: bool,
}

impl ConsentSettings {
    /// The fully-opted-out record used when no row exists.
    pub fn opted_out(user_id: i64, tenant_id: i64) -> Self {
        Self {
            user_id,
            tenant_id,
            federation_optin: false,
            profile_visible: false,
            appear_in_search: false,
            show_skills: false,
            show_location: false,
            show_reviews: false,
            messaging_enabled: false,
            transactions_enabled: false,
            service_reach: ServiceReach::LocalOnly,
            travel_radius_km: None,
            email_notifications: false,
        }
    }

    /// User-layer consent for a capability. Capabilities without a
    /// dedicated flag fall through to the opt-in alone.
    pub fn capability_allowed(&self, capability: Capability) -> bool {
        if !self.federation_optin {
            return false;
        }
        match capability {
            Capability::Profiles => self.profile_visible,
            Capability::Messaging => self.messaging_enabled,
            Capability::Transactions => self.transactions_enabled,
            Capability::Listings | Capability::Events | Capability::Groups => true,
        }
    }
}

/// Direction of one physical message row relative to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outbound,
    Inbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Outbound => "outbound",
            Direction::Inbound => "inbound",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "outbound" => Ok(Direction::Outbound),
            "inbound" => Ok(Direction::Inbound),
            other => Err(FederationError::Internal(format!(
                "unknown message direction: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Unread,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Unread => "unread",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "unread" => Ok(MessageStatus::Unread),
            "delivered" => Ok(MessageStatus::Delivered),
            "read" => Ok(MessageStatus::Read),
            other => Err(FederationError::Internal(format!(
                "unknown message status: {}",
                other
            ))),
        }
    }
}

/// One physical row of a relayed message. A logical send produces two:
/// an outbound row owned by the sender and an inbound row owned by the
/// receiver, agreeing on subject/body/reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub sender_tenant_id: i64,
    pub sender_user_id: i64,
    pub receiver_tenant_id: i64,
    pub receiver_user_id: i64,
    pub subject: String,
    pub body: String,
    pub direction: Direction,
    pub status: MessageStatus,
    pub reference_message_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

/// Audit severity. Escalation is fixed per action type, not per caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

/// Why a feature-gate resolution denied the request.
///
/// The first failing layer (global > tenant > partnership > user)
/// determines the reason; clients branch on the code strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenyReason {
    FederationNotAvailable,
    FeatureDisabled,
    TenantFederationDisabled,
    NoPartnership,
    CapabilityNotEnabled,
    LevelNotPermitted,
    NotOptedIn,
    MessagingDisabled,
    TransactionsDisabled,
    ProfileNotVisible,
}

impl DenyReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::FederationNotAvailable => "FEDERATION_NOT_AVAILABLE",
            DenyReason::FeatureDisabled => "FEATURE_DISABLED",
            DenyReason::TenantFederationDisabled => "TENANT_FEDERATION_DISABLED",
            DenyReason::NoPartnership => "NO_PARTNERSHIP",
            DenyReason::CapabilityNotEnabled => "CAPABILITY_NOT_ENABLED",
            DenyReason::LevelNotPermitted => "LEVEL_NOT_PERMITTED",
            DenyReason::NotOptedIn => "NOT_OPTED_IN",
            DenyReason::MessagingDisabled => "MESSAGING_DISABLED",
            DenyReason::TransactionsDisabled => "TRANSACTIONS_DISABLED",
            DenyReason::ProfileNotVisible => "PROFILE_NOT_VISIBLE",
        }
    }

    /// Capability-specific user-layer reason.
    pub fn user_layer(capability: Capability) -> Self {
        match capability {
            Capability::Messaging => DenyReason::MessagingDisabled,
            Capability::Transactions => DenyReason::TransactionsDisabled,
            Capability::Profiles => DenyReason::ProfileNotVisible,
            _ => DenyReason::NotOptedIn,
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Global federation configuration singleton.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemControls {
    pub federation_enabled: bool,
    pub whitelist_mode_enabled: bool,
    pub max_federation_level: i64,
    pub allow_profiles: bool,
    pub allow_messaging: bool,
    pub allow_transactions: bool,
    pub allow_listings: bool,
    pub allow_events: bool,
    pub allow_groups: bool,
    pub lockdown_active: bool,
    pub updated_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SystemControls {
    pub fn capability_allowed(&self, capability: Capability) -> bool {
        match capability {
            Capability::Profiles => self.allow_profiles,
            Capability::Messaging => self.allow_messaging,
            Capability::Transactions => self.allow_transactions,
            Capability::Listings => self.allow_listings,
            Capability::Events => self.allow_events,
            Capability::Groups => self.allow_groups,
        }
    }
}

/// Errors that can occur in federation operations
#[derive(Debug, thiserror::Error)]
pub enum FederationError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("denied: {0}")]
    Denied(DenyReason),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl FederationError {
    /// Stable machine-readable code for transport-layer responses.
    pub fn code(&self) -> &'static str {
        match self {
            FederationError::Sqlite(_) | FederationError::Internal(_) => "INTERNAL",
            FederationError::Validation(_) => "VALIDATION_ERROR",
            FederationError::NotFound(_) => "NOT_FOUND",
            FederationError::Denied(reason) => reason.code(),
            FederationError::Forbidden(_) => "FORBIDDEN",
            FederationError::Conflict(_) => "CONFLICT",
        }
    }
}

/// Result type for federation operations
pub type Result<T> = std::result::Result<T, FederationError>;

// SQL conversions so row-mapping closures read enums directly.

macro_rules! text_sql_enum {
    ($ty:ty) => {
        impl rusqlite::types::ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                Ok(self.as_str().into())
            }
        }

        impl rusqlite::types::FromSql for $ty {
            fn column_result(
                value: rusqlite::types::ValueRef<'_>,
            ) -> rusqlite::types::FromSqlResult<Self> {
                let text = value.as_str()?;
                Self::parse(text).map_err(|e| rusqlite::types::FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

text_sql_enum!(PartnershipStatus);
text_sql_enum!(Direction);
text_sql_enum!(MessageStatus);
text_sql_enum!(ServiceReach);

impl rusqlite::types::ToSql for FederationLevel {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        Ok(self.as_i64().into())
    }
}

impl rusqlite::types::FromSql for FederationLevel {
    fn column_result(value: rusqlite::types::ValueRef<'_>) -> rusqlite::types::FromSqlResult<Self> {
        let raw = value.as_i64()?;
        FederationLevel::from_i64(raw).ok_or(rusqlite::types::FromSqlError::OutOfRange(raw))
    }
}

impl rusqlite::types::ToSql for Severity {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

//! FedMesh Federation API
//!
//! Service layer and HTTP surface for the multi-tenant federation
//! subsystem: partnership lifecycle, the four-layer permission gate,
//! consent management, cross-tenant directory queries, the message
//! relay, and the audit trail.
//!
//! Authorization composes monotonically: global controls, per-tenant
//! enablement, the partnership's capability grants, and the acting
//! user's consent each only restrict what the layers above allow.

pub mod audit;
pub mod consent;
pub mod context;
pub mod gate;
pub mod http;
pub mod partnership;
pub mod query;
pub mod relay;
pub mod system_control;
pub mod whitelist;

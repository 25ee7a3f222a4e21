//! Persistence layer: PostgreSQL-backed collaborators.
//!
//! The marketplace tables are owned by the main application; this crate
//! reads decided moderation and seller-application rows for reconciliation
//! and appends to `audit_log`, whose schema ships in `migrations/`.

pub mod models;
pub mod postgres;

pub use postgres::{ModerationDecisionSource, PostgresAuditSink, SellerApplicationSource};

//! Domain layer: identities, connections, rules, throttling and the
//! notification model.
//!
//! Everything here is transport-agnostic. The [`ConnectionRegistry`] owns
//! live connections and their outbound queues, the [`RuleTable`] decides
//! which inbound events a role may emit, and the [`Throttler`] bounds how
//! often each outbound event type reaches clients.

pub mod audit;
pub mod catalog;
pub mod connection;
pub mod connection_registry;
pub mod event_rule;
pub mod ids;
pub mod journal;
pub mod notification;
pub mod outbound;
pub mod role;
pub mod room;
pub mod rule_table;
pub mod sync_state;
pub mod throttle;
pub mod update_source;

pub use audit::{AuditCategory, AuditError, AuditRecord, AuditSink, Severity, TracingAuditSink};
pub use connection::{Connection, ConnectionSummary, Identity};
pub use connection_registry::{
    ConnectionCommand, ConnectionRegistry, DeliveryReport, EvictionReason,
};
pub use event_rule::{Constraint, EventRule, RuleError, RuleSpec, SelfTarget, Validation};
pub use ids::{ConnectionId, UserId};
pub use journal::NotificationJournal;
pub use notification::{Notification, Priority, ReviewDecision};
pub use outbound::{OutboundEvent, TargetSelector};
pub use role::{Role, UnknownRole};
pub use room::{InvalidRoom, RoomId};
pub use rule_table::{Decision, RuleTable};
pub use sync_state::{SyncSignal, SyncState};
pub use throttle::{EmitOutcome, ThrottleConfig, Throttler};
pub use update_source::{Cursor, SourceQuery, SourcedUpdate, UpdateSource, order_newest_first};

//! Service layer: orchestration on top of the domain types.
//!
//! [`ConnectionGate`] admits and evicts connections, [`EventBus`]
//! dispatches inbound events, [`NotificationPublisher`] pushes outbound
//! ones, and [`ReconciliationService`] answers the polling fallback. All
//! audit records leave through the [`AuditForwarder`].

pub mod admin;
pub mod audit_forwarder;
pub mod event_bus;
pub mod gate;
pub mod handlers;
pub mod publisher;
pub mod reconciliation;

pub use admin::AdminService;
pub use audit_forwarder::{AuditForwarder, RetryPolicy};
pub use event_bus::{AcceptedEvent, EventBus, EventHandler, HandlerContext};
pub use gate::ConnectionGate;
pub use handlers::{BroadcastHandler, EvictConnectionHandler, MarkReadHandler};
pub use publisher::NotificationPublisher;
pub use reconciliation::{Cursor, PageLimits, ReconciliationService, UpdatesPage, UpdatesQuery};

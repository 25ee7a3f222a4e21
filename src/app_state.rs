//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::auth::{IdentityVerifier, JwtVerifier};
use crate::config::RealtimeConfig;
use crate::domain::{
    AuditSink, ConnectionRegistry, NotificationJournal, RuleTable, Throttler, UpdateSource,
    catalog,
};
use crate::service::{
    AdminService, AuditForwarder, BroadcastHandler, ConnectionGate, EventBus,
    EvictConnectionHandler, MarkReadHandler, NotificationPublisher, ReconciliationService,
};
use crate::ws::connection::SessionLimits;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Token verification, admission and eviction.
    pub gate: ConnectionGate,
    /// Inbound event authorization and dispatch.
    pub bus: Arc<EventBus>,
    /// Rule table and connection administration.
    pub admin: AdminService,
    /// Outbound notification entry point for domain code.
    pub publisher: NotificationPublisher,
    /// Outbound broadcast rate limiter.
    pub throttler: Throttler,
    /// Record of pushed notifications.
    pub journal: Arc<NotificationJournal>,
    /// Polling fallback.
    pub reconciliation: Arc<ReconciliationService>,
    /// Background audit queue.
    pub audit: AuditForwarder,
    /// Handshake and liveness timing.
    pub limits: SessionLimits,
}

impl AppState {
    /// Wires every component from `config`.
    ///
    /// The journal is always the first update source; `sources` are
    /// appended after it. Returns the state and the audit drain task, which
    /// ends once every clone of the state is dropped.
    #[must_use]
    pub fn from_config(
        config: &RealtimeConfig,
        audit_sink: Arc<dyn AuditSink>,
        sources: Vec<Arc<dyn UpdateSource>>,
    ) -> (Self, JoinHandle<()>) {
        let verifier: Arc<dyn IdentityVerifier> = Arc::new(JwtVerifier::new(
            config.jwt_secret.as_bytes(),
            config.jwt_issuer.as_deref(),
        ));
        let (audit, audit_task) =
            AuditForwarder::spawn(audit_sink, config.audit_channel_capacity, config.audit_retry);

        let registry = Arc::new(ConnectionRegistry::new(config.outbound_queue_capacity));
        let rules = Arc::new(RuleTable::with_rules(catalog::default_rules()));
        let journal = Arc::new(NotificationJournal::new(
            config.journal_capacity_per_key,
            config.reconciliation_max_lookback,
        ));
        let throttler = Throttler::new(Arc::clone(&registry), config.throttle.clone());

        let gate = ConnectionGate::new(verifier, Arc::clone(&registry), audit.clone());
        let admin = AdminService::new(Arc::clone(&rules), gate.clone(), audit.clone());
        let bus = EventBus::new(
            rules,
            audit.clone(),
            config.event_bus_capacity,
            config.validation_audit_threshold,
        )
        .with_handler(
            catalog::ADMIN_EVICT_CONNECTION,
            Arc::new(EvictConnectionHandler::new(admin.clone())),
        )
        .with_handler(
            catalog::ADMIN_BROADCAST,
            Arc::new(BroadcastHandler::new(admin.clone())),
        )
        .with_handler(catalog::NOTIFICATION_MARK_READ, Arc::new(MarkReadHandler));

        let publisher =
            NotificationPublisher::new(registry, Arc::clone(&journal), throttler.clone());

        let mut all_sources: Vec<Arc<dyn UpdateSource>> = vec![Arc::clone(&journal) as Arc<dyn UpdateSource>];
        all_sources.extend(sources);
        let reconciliation = Arc::new(ReconciliationService::new(
            all_sources,
            config.reconciliation_max_lookback,
            config.page_limits,
        ));

        let state = Self {
            gate,
            bus: Arc::new(bus),
            admin,
            publisher,
            throttler,
            journal,
            reconciliation,
            audit,
            limits: config.session,
        };
        (state, audit_task)
    }
}

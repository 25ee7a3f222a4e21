//! Connection admission and eviction.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::auth::{IdentityVerifier, verify_off_thread};
use crate::domain::{
    AuditCategory, AuditRecord, Connection, ConnectionCommand, ConnectionId, ConnectionRegistry,
    EvictionReason, Identity, OutboundEvent, Severity, TargetSelector, catalog,
};
use crate::error::AdmissionError;

use super::AuditForwarder;

/// Binds verified identities to registry entries and tears them down.
#[derive(Debug, Clone)]
pub struct ConnectionGate {
    verifier: Arc<dyn IdentityVerifier>,
    registry: Arc<ConnectionRegistry>,
    audit: AuditForwarder,
}

impl ConnectionGate {
    /// Creates a gate in front of `registry`.
    #[must_use]
    pub fn new(
        verifier: Arc<dyn IdentityVerifier>,
        registry: Arc<ConnectionRegistry>,
        audit: AuditForwarder,
    ) -> Self {
        Self {
            verifier,
            registry,
            audit,
        }
    }

    /// Registry this gate admits into.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Verifies `token` without registering anything.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError`] for a missing, malformed, expired or
    /// wrongly signed token.
    pub async fn authenticate(&self, token: &str) -> Result<Identity, AdmissionError> {
        if token.trim().is_empty() {
            return Err(AdmissionError::MissingToken);
        }
        verify_off_thread(Arc::clone(&self.verifier), token.to_string()).await
    }

    /// Registers a connection for an authenticated identity and queues the
    /// `connection:ready` event as its first outbound message.
    pub async fn admit(
        &self,
        identity: Identity,
    ) -> (Arc<Connection>, mpsc::Receiver<ConnectionCommand>) {
        let (connection, receiver) = self.registry.register(identity).await;
        let ready = serde_json::json!({
            "connectionId": connection.id(),
            "userId": connection.user_id(),
            "role": connection.role(),
            "rooms": connection.rooms(),
        });
        self.registry
            .deliver(
                &TargetSelector::Connections {
                    ids: vec![connection.id()],
                },
                OutboundEvent::new(catalog::CONNECTION_READY, ready),
            )
            .await;
        tracing::info!(
            connection_id = %connection.id(),
            user_id = %connection.user_id(),
            role = %connection.role(),
            "connection admitted"
        );
        (connection, receiver)
    }

    /// Verifies `token` and registers the resulting identity.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError`] when verification fails; nothing is
    /// registered in that case.
    pub async fn admit_token(
        &self,
        token: &str,
    ) -> Result<(Arc<Connection>, mpsc::Receiver<ConnectionCommand>), AdmissionError> {
        let identity = self.authenticate(token).await?;
        Ok(self.admit(identity).await)
    }

    /// Removes a connection. Administrative evictions are audited.
    ///
    /// Returns `None` if the connection was already gone.
    pub async fn evict(&self, id: ConnectionId, reason: EvictionReason) -> Option<Arc<Connection>> {
        let connection = self.registry.remove(id, Some(reason.clone())).await?;
        tracing::info!(
            connection_id = %id,
            user_id = %connection.user_id(),
            reason = %reason,
            "connection evicted"
        );
        if let EvictionReason::Administrative { actor } = &reason {
            self.audit.forward(AuditRecord::new(
                actor.clone(),
                "connection_evicted",
                AuditCategory::Administration,
                Severity::High,
                serde_json::json!({
                    "connectionId": id,
                    "userId": connection.user_id(),
                    "role": connection.role(),
                }),
            ));
        }
        Some(connection)
    }

    /// Evicts every live connection with `server_shutdown`, returning how
    /// many were closed.
    pub async fn evict_all(&self) -> usize {
        let mut closed = 0;
        for id in self.registry.ids().await {
            if self.evict(id, EvictionReason::ServerShutdown).await.is_some() {
                closed += 1;
            }
        }
        closed
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::auth::{JwtVerifier, encode_token};
    use crate::domain::audit::RecordingAuditSink;
    use crate::domain::{AuditSink, Role, UserId};
    use crate::service::audit_forwarder::RetryPolicy;

    const SECRET: &[u8] = b"gate-secret";

    fn gate() -> (ConnectionGate, Arc<RecordingAuditSink>) {
        let sink = Arc::new(RecordingAuditSink::default());
        let (audit, _task) = AuditForwarder::spawn(
            Arc::clone(&sink) as Arc<dyn AuditSink>,
            16,
            RetryPolicy::default(),
        );
        let gate = ConnectionGate::new(
            Arc::new(JwtVerifier::new(SECRET, None)),
            Arc::new(ConnectionRegistry::new(16)),
            audit,
        );
        (gate, sink)
    }

    fn identity(user: &str, role: Role) -> Identity {
        Identity {
            user_id: UserId::new(user),
            role,
            email: format!("{user}@example.com"),
        }
    }

    #[tokio::test]
    async fn valid_token_is_admitted_with_ready_event() {
        let (gate, _) = gate();
        let Ok(token) = encode_token(SECRET, &identity("s1", Role::Seller), 60, None) else {
            panic!("token");
        };
        let Ok((conn, mut rx)) = gate.admit_token(&token).await else {
            panic!("admission failed");
        };
        assert_eq!(conn.role(), Role::Seller);
        match rx.try_recv() {
            Ok(ConnectionCommand::Deliver(event)) => {
                assert_eq!(event.event_name, catalog::CONNECTION_READY);
                assert_eq!(event.payload["userId"], "s1");
            }
            other => panic!("expected ready event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_token_never_reaches_the_registry() {
        let (gate, _) = gate();
        let result = gate.admit_token("garbage").await;
        assert!(matches!(result, Err(AdmissionError::InvalidToken(_))));
        assert!(gate.registry().is_empty().await);

        assert!(matches!(
            gate.admit_token("").await,
            Err(AdmissionError::MissingToken)
        ));
    }

    #[tokio::test]
    async fn only_administrative_evictions_are_audited() {
        let (gate, sink) = gate();
        let (a, _rx_a) = gate.admit(identity("c1", Role::Customer)).await;
        let (b, _rx_b) = gate.admit(identity("c2", Role::Customer)).await;

        assert!(gate.evict(a.id(), EvictionReason::Timeout).await.is_some());
        let admin = EvictionReason::Administrative {
            actor: UserId::new("admin-1"),
        };
        assert!(gate.evict(b.id(), admin.clone()).await.is_some());
        assert!(gate.evict(b.id(), admin).await.is_none());

        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records.first().map(|r| r.action.as_str()),
            Some("connection_evicted")
        );
    }

    #[tokio::test]
    async fn evict_all_empties_the_registry() {
        let (gate, _) = gate();
        let _first = gate.admit(identity("u1", Role::Customer)).await;
        let _second = gate.admit(identity("u2", Role::Seller)).await;
        assert_eq!(gate.evict_all().await, 2);
        assert!(gate.registry().is_empty().await);
    }
}

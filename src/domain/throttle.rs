//! Per-event-type emission throttling with last-write-wins coalescing.
//!
//! Each event type owns a slot that is either `Idle` or
//! `Scheduled { pending }`. An emission in an idle slot whose interval has
//! elapsed goes out immediately; otherwise the payload becomes the slot's
//! single pending value and one timer is armed for the end of the window.
//! Later emissions in the same window overwrite the pending value, so the
//! timer always delivers the most recent payload.
//!
//! Slots are keyed by event type, never by connection, so a disconnect
//! does not affect any timer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{ConnectionRegistry, DeliveryReport, OutboundEvent, TargetSelector};

/// Emission intervals by event type.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    default_interval: Duration,
    intervals: HashMap<String, Duration>,
}

impl ThrottleConfig {
    /// Creates a config where every type uses `default_interval`.
    #[must_use]
    pub fn new(default_interval: Duration) -> Self {
        Self {
            default_interval,
            intervals: HashMap::new(),
        }
    }

    /// Overrides the interval for one event type.
    #[must_use]
    pub fn with_interval(mut self, event_type: impl Into<String>, interval: Duration) -> Self {
        self.intervals.insert(event_type.into(), interval);
        self
    }

    /// Interval applied to `event_type`.
    #[must_use]
    pub fn interval(&self, event_type: &str) -> Duration {
        self.intervals
            .get(event_type)
            .copied()
            .unwrap_or(self.default_interval)
    }
}

/// What [`Throttler::emit`] did with a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    /// Delivered immediately.
    Emitted(DeliveryReport),
    /// Held; a timer will deliver it at `at`.
    Scheduled {
        /// When the pending payload goes out.
        at: Instant,
    },
    /// Replaced an already pending payload.
    Coalesced,
}

#[derive(Debug)]
struct Pending {
    target: TargetSelector,
    payload: serde_json::Value,
}

#[derive(Debug)]
enum Phase {
    Idle,
    Scheduled { pending: Pending, timer: JoinHandle<()> },
}

#[derive(Debug)]
struct Slot {
    last_emitted_at: Option<Instant>,
    phase: Phase,
}

#[derive(Debug)]
struct Inner {
    registry: Arc<ConnectionRegistry>,
    config: ThrottleConfig,
    slots: Mutex<HashMap<String, Slot>>,
}

/// Rate limiter in front of outbound broadcast emission.
#[derive(Debug, Clone)]
pub struct Throttler {
    inner: Arc<Inner>,
}

impl Throttler {
    /// Creates a throttler delivering through `registry`.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, config: ThrottleConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                config,
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Emits `payload` as `event_type` to `target`, immediately or at the
    /// next permitted slot.
    pub async fn emit(
        &self,
        event_type: &str,
        target: TargetSelector,
        payload: serde_json::Value,
    ) -> EmitOutcome {
        let interval = self.inner.config.interval(event_type);
        let mut slots = self.inner.slots.lock().await;
        let slot = slots.entry(event_type.to_string()).or_insert(Slot {
            last_emitted_at: None,
            phase: Phase::Idle,
        });

        if let Phase::Scheduled { pending, .. } = &mut slot.phase {
            *pending = Pending { target, payload };
            tracing::trace!(event = event_type, "throttled payload coalesced");
            return EmitOutcome::Coalesced;
        }

        let now = Instant::now();
        let due = slot.last_emitted_at.map_or(now, |last| last + interval);
        if now >= due {
            slot.last_emitted_at = Some(now);
            let report = self
                .inner
                .registry
                .deliver(&target, OutboundEvent::new(event_type, payload))
                .await;
            return EmitOutcome::Emitted(report);
        }

        let timer = tokio::spawn(fire(
            Arc::clone(&self.inner),
            event_type.to_string(),
            due,
        ));
        slot.phase = Phase::Scheduled {
            pending: Pending { target, payload },
            timer,
        };
        tracing::trace!(event = event_type, "throttled payload scheduled");
        EmitOutcome::Scheduled { at: due }
    }

    /// Returns `true` if a timer is armed for `event_type`.
    pub async fn is_scheduled(&self, event_type: &str) -> bool {
        self.inner
            .slots
            .lock()
            .await
            .get(event_type)
            .is_some_and(|slot| matches!(slot.phase, Phase::Scheduled { .. }))
    }

    /// Payload currently waiting for `event_type`.
    pub async fn pending_payload(&self, event_type: &str) -> Option<serde_json::Value> {
        match &self.inner.slots.lock().await.get(event_type)?.phase {
            Phase::Scheduled { pending, .. } => Some(pending.payload.clone()),
            Phase::Idle => None,
        }
    }

    /// Number of event types with a pending payload.
    pub async fn pending_count(&self) -> usize {
        self.inner
            .slots
            .lock()
            .await
            .values()
            .filter(|slot| matches!(slot.phase, Phase::Scheduled { .. }))
            .count()
    }

    /// Aborts every armed timer, discarding pending payloads.
    pub async fn shutdown(&self) {
        let mut slots = self.inner.slots.lock().await;
        for slot in slots.values_mut() {
            if let Phase::Scheduled { timer, .. } = std::mem::replace(&mut slot.phase, Phase::Idle)
            {
                timer.abort();
            }
        }
    }
}

/// Timer body: waits for the window to end and delivers the latest payload.
async fn fire(inner: Arc<Inner>, event_type: String, due: Instant) {
    tokio::time::sleep_until(due).await;

    let mut slots = inner.slots.lock().await;
    let Some(slot) = slots.get_mut(&event_type) else {
        return;
    };
    let Phase::Scheduled { pending, .. } = std::mem::replace(&mut slot.phase, Phase::Idle) else {
        return;
    };
    slot.last_emitted_at = Some(Instant::now());
    let report = inner
        .registry
        .deliver(
            &pending.target,
            OutboundEvent::new(event_type.as_str(), pending.payload),
        )
        .await;
    tracing::debug!(
        event = %event_type,
        delivered = report.delivered,
        "coalesced payload emitted"
    );
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{ConnectionCommand, Identity, Role, UserId};
    use tokio::sync::mpsc;

    const ANALYTICS: &str = "analytics:update";

    async fn setup(
        config: ThrottleConfig,
    ) -> (Throttler, mpsc::Receiver<ConnectionCommand>) {
        let registry = Arc::new(ConnectionRegistry::new(32));
        let (_conn, rx) = registry
            .register(Identity {
                user_id: UserId::new("dash"),
                role: Role::Admin,
                email: "dash@example.com".to_string(),
            })
            .await;
        (Throttler::new(registry, config), rx)
    }

    fn received(rx: &mut mpsc::Receiver<ConnectionCommand>) -> Vec<serde_json::Value> {
        let mut payloads = Vec::new();
        while let Ok(ConnectionCommand::Deliver(event)) = rx.try_recv() {
            payloads.push(event.payload.clone());
        }
        payloads
    }

    fn five_second_analytics() -> ThrottleConfig {
        ThrottleConfig::new(Duration::from_secs(1)).with_interval(ANALYTICS, Duration::from_secs(5))
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_then_coalesced_latest_payload() {
        let (throttler, mut rx) = setup(five_second_analytics()).await;
        let all = TargetSelector::All;

        let first = throttler
            .emit(ANALYTICS, all.clone(), serde_json::json!({"n": 1}))
            .await;
        assert!(matches!(first, EmitOutcome::Emitted(r) if r.delivered == 1));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let second = throttler
            .emit(ANALYTICS, all.clone(), serde_json::json!({"n": 2}))
            .await;
        assert!(matches!(second, EmitOutcome::Scheduled { .. }));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let third = throttler
            .emit(ANALYTICS, all.clone(), serde_json::json!({"n": 3}))
            .await;
        assert_eq!(third, EmitOutcome::Coalesced);
        assert_eq!(
            throttler.pending_payload(ANALYTICS).await,
            Some(serde_json::json!({"n": 3}))
        );

        assert_eq!(received(&mut rx), vec![serde_json::json!({"n": 1})]);

        // t = 4.9s: window still open
        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert!(received(&mut rx).is_empty());

        // t = 5.1s: the slot fired once with the latest payload
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(received(&mut rx), vec![serde_json::json!({"n": 3})]);
        assert!(!throttler.is_scheduled(ANALYTICS).await);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(received(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn emission_after_timer_waits_for_next_window() {
        let (throttler, mut rx) = setup(five_second_analytics()).await;
        let all = TargetSelector::All;

        throttler.emit(ANALYTICS, all.clone(), serde_json::json!(1)).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        throttler.emit(ANALYTICS, all.clone(), serde_json::json!(2)).await;
        tokio::time::sleep(Duration::from_millis(4_500)).await;
        assert_eq!(received(&mut rx).len(), 2);

        // last emission at t=5, so t=5.5 falls inside the next window
        let outcome = throttler.emit(ANALYTICS, all, serde_json::json!(3)).await;
        let EmitOutcome::Scheduled { at } = outcome else {
            panic!("expected scheduling, got {outcome:?}");
        };
        assert!(at > Instant::now());
    }

    #[tokio::test(start_paused = true)]
    async fn event_types_are_throttled_independently() {
        let (throttler, mut rx) = setup(five_second_analytics()).await;
        let all = TargetSelector::All;

        throttler.emit(ANALYTICS, all.clone(), serde_json::json!("a")).await;
        let other = throttler
            .emit("search:progress", all, serde_json::json!("b"))
            .await;
        assert!(matches!(other, EmitOutcome::Emitted(_)));
        assert_eq!(received(&mut rx).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_never_holds() {
        let (throttler, mut rx) = setup(ThrottleConfig::new(Duration::ZERO)).await;
        for n in 0..5 {
            let outcome = throttler
                .emit("moderation:decision", TargetSelector::All, serde_json::json!(n))
                .await;
            assert!(matches!(outcome, EmitOutcome::Emitted(_)));
        }
        assert_eq!(received(&mut rx).len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_discards_pending() {
        let (throttler, mut rx) = setup(five_second_analytics()).await;
        throttler
            .emit(ANALYTICS, TargetSelector::All, serde_json::json!(1))
            .await;
        throttler
            .emit(ANALYTICS, TargetSelector::All, serde_json::json!(2))
            .await;
        assert_eq!(throttler.pending_count().await, 1);

        throttler.shutdown().await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(received(&mut rx), vec![serde_json::json!(1)]);
        assert_eq!(throttler.pending_count().await, 0);
    }

    #[test]
    fn config_falls_back_to_default() {
        let config = five_second_analytics();
        assert_eq!(config.interval(ANALYTICS), Duration::from_secs(5));
        assert_eq!(config.interval("other"), Duration::from_secs(1));
    }
}

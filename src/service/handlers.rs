//! Handlers for the inbound events the gateway itself owns.

use futures_util::future::BoxFuture;

use crate::domain::{ConnectionId, RoomId};
use crate::error::HandlerError;

use super::event_bus::{EventHandler, HandlerContext};
use super::AdminService;

fn text_field<'a>(ctx: &'a HandlerContext, field: &str) -> Result<&'a str, HandlerError> {
    ctx.payload
        .get(field)
        .and_then(serde_json::Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| HandlerError::Rejected(format!("{field} must be a non-empty string")))
}

/// `admin:evict_connection`: forced eviction of another connection.
#[derive(Debug, Clone)]
pub struct EvictConnectionHandler {
    admin: AdminService,
}

impl EvictConnectionHandler {
    /// Creates the handler.
    #[must_use]
    pub const fn new(admin: AdminService) -> Self {
        Self { admin }
    }
}

impl EventHandler for EvictConnectionHandler {
    fn handle(
        &self,
        ctx: HandlerContext,
    ) -> BoxFuture<'static, Result<serde_json::Value, HandlerError>> {
        let admin = self.admin.clone();
        Box::pin(async move {
            let raw = text_field(&ctx, "connectionId")?;
            let target: ConnectionId = raw
                .parse()
                .map_err(|_| HandlerError::Rejected(format!("Invalid connectionId: {raw}")))?;
            let evicted = admin
                .evict_connection(ctx.connection.identity(), Some(ctx.connection.id()), target)
                .await?;
            Ok(serde_json::json!({
                "evicted": evicted.connection_id,
                "userId": evicted.user_id,
            }))
        })
    }
}

/// `admin:broadcast`: push an arbitrary event to a room.
#[derive(Debug, Clone)]
pub struct BroadcastHandler {
    admin: AdminService,
}

impl BroadcastHandler {
    /// Creates the handler.
    #[must_use]
    pub const fn new(admin: AdminService) -> Self {
        Self { admin }
    }
}

impl EventHandler for BroadcastHandler {
    fn handle(
        &self,
        ctx: HandlerContext,
    ) -> BoxFuture<'static, Result<serde_json::Value, HandlerError>> {
        let admin = self.admin.clone();
        Box::pin(async move {
            let raw_room = text_field(&ctx, "room")?;
            let room: RoomId = raw_room
                .parse()
                .map_err(|_| HandlerError::Rejected(format!("Invalid room: {raw_room}")))?;
            let event = text_field(&ctx, "event")?;
            let payload = ctx
                .payload
                .get("payload")
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            let report = admin
                .broadcast(ctx.connection.identity(), Some(room), event, payload)
                .await?;
            Ok(serde_json::json!({
                "delivered": report.delivered,
                "dropped": report.dropped,
            }))
        })
    }
}

/// `notification:mark_read`: acknowledged here, persisted by whichever
/// collaborator subscribes to accepted events.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkReadHandler;

impl EventHandler for MarkReadHandler {
    fn handle(
        &self,
        ctx: HandlerContext,
    ) -> BoxFuture<'static, Result<serde_json::Value, HandlerError>> {
        Box::pin(async move {
            let id = text_field(&ctx, "notificationId")?;
            tracing::debug!(
                user_id = %ctx.connection.user_id(),
                notification_id = id,
                "notification marked read"
            );
            Ok(serde_json::json!({ "notificationId": id, "read": true }))
        })
    }
}

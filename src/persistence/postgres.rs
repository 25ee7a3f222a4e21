//! PostgreSQL collaborators: reconciliation sources and the audit sink.
//!
//! Both sources page inside the database. Rows are ordered by the same
//! `(millis, notification id)` key the reconciliation cursor uses, so a
//! window holding more rows than one page is walked page by page instead of
//! being cut off.

use futures_util::future::BoxFuture;
use sqlx::PgPool;

use super::models::{ApplicationRow, ModerationRow};
use crate::domain::{
    AuditError, AuditRecord, AuditSink, Cursor, Identity, SourceQuery, SourcedUpdate, UpdateSource,
};
use crate::error::RealtimeError;

/// Keyset page over decided moderation rows. `$3`/`$4` hold the cursor,
/// both NULL on the first page. The id expression must match
/// `Notification::moderation_decision`.
const MODERATION_PAGE: &str = "\
    WITH decided AS ( \
        SELECT product_id::text AS product_id, product_name, decision, reason, decided_at, \
               floor(extract(epoch FROM decided_at) * 1000)::bigint AS decided_ms \
        FROM product_moderation \
        WHERE seller_id::text = $1 AND decided_at > $2 AND decision IN ('approved', 'rejected') \
    ), keyed AS ( \
        SELECT *, ('moderation:' || product_id || ':' || decided_ms::text) COLLATE \"C\" AS notification_id \
        FROM decided \
    ) \
    SELECT product_id, product_name, decision, reason, decided_at FROM keyed \
    WHERE $3::bigint IS NULL OR (decided_ms, notification_id) < ($3::bigint, $4::text COLLATE \"C\") \
    ORDER BY decided_ms DESC, notification_id DESC \
    LIMIT $5";

/// Keyset page over reviewed seller applications; same parameters as
/// [`MODERATION_PAGE`]. The id expression must match
/// `Notification::seller_application`.
const APPLICATION_PAGE: &str = "\
    WITH decided AS ( \
        SELECT id::text AS application_id, status AS decision, review_note AS note, reviewed_at AS decided_at, \
               floor(extract(epoch FROM reviewed_at) * 1000)::bigint AS decided_ms \
        FROM seller_applications \
        WHERE applicant_id::text = $1 AND reviewed_at > $2 AND status IN ('approved', 'rejected') \
    ), keyed AS ( \
        SELECT *, ('seller-application:' || application_id || ':' || decided_ms::text) COLLATE \"C\" AS notification_id \
        FROM decided \
    ) \
    SELECT application_id, decision, note, decided_at FROM keyed \
    WHERE $3::bigint IS NULL OR (decided_ms, notification_id) < ($3::bigint, $4::text COLLATE \"C\") \
    ORDER BY decided_ms DESC, notification_id DESC \
    LIMIT $5";

fn page_size(query: &SourceQuery) -> i64 {
    i64::try_from(query.limit).unwrap_or(i64::MAX)
}

/// Moderation decisions on the caller's products.
#[derive(Debug, Clone)]
pub struct ModerationDecisionSource {
    pool: PgPool,
}

impl ModerationDecisionSource {
    /// Creates a source reading from `product_moderation`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(
        &self,
        identity: &Identity,
        query: &SourceQuery,
    ) -> Result<Vec<SourcedUpdate>, RealtimeError> {
        let rows = sqlx::query_as::<_, ModerationRow>(MODERATION_PAGE)
            .bind(identity.user_id.as_str())
            .bind(query.since)
            .bind(query.after.as_ref().map(Cursor::millis))
            .bind(query.after.as_ref().map(|c| c.id().to_string()))
            .bind(page_size(query))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RealtimeError::SourceUnavailable {
                source_name: self.name(),
                detail: e.to_string(),
            })?;

        Ok(rows.into_iter().filter_map(ModerationRow::into_update).collect())
    }
}

impl UpdateSource for ModerationDecisionSource {
    fn name(&self) -> &'static str {
        "product_moderation"
    }

    fn updates<'a>(
        &'a self,
        identity: &'a Identity,
        query: &'a SourceQuery,
    ) -> BoxFuture<'a, Result<Vec<SourcedUpdate>, RealtimeError>> {
        Box::pin(self.fetch(identity, query))
    }
}

/// Decisions on the caller's seller applications.
#[derive(Debug, Clone)]
pub struct SellerApplicationSource {
    pool: PgPool,
}

impl SellerApplicationSource {
    /// Creates a source reading from `seller_applications`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(
        &self,
        identity: &Identity,
        query: &SourceQuery,
    ) -> Result<Vec<SourcedUpdate>, RealtimeError> {
        let rows = sqlx::query_as::<_, ApplicationRow>(APPLICATION_PAGE)
            .bind(identity.user_id.as_str())
            .bind(query.since)
            .bind(query.after.as_ref().map(Cursor::millis))
            .bind(query.after.as_ref().map(|c| c.id().to_string()))
            .bind(page_size(query))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RealtimeError::SourceUnavailable {
                source_name: self.name(),
                detail: e.to_string(),
            })?;

        Ok(rows.into_iter().filter_map(ApplicationRow::into_update).collect())
    }
}

impl UpdateSource for SellerApplicationSource {
    fn name(&self) -> &'static str {
        "seller_applications"
    }

    fn updates<'a>(
        &'a self,
        identity: &'a Identity,
        query: &'a SourceQuery,
    ) -> BoxFuture<'a, Result<Vec<SourcedUpdate>, RealtimeError>> {
        Box::pin(self.fetch(identity, query))
    }
}

/// Audit sink appending to `audit_log`.
#[derive(Debug, Clone)]
pub struct PostgresAuditSink {
    pool: PgPool,
}

impl PostgresAuditSink {
    /// Creates a sink writing through `pool`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AuditSink for PostgresAuditSink {
    fn submit<'a>(&'a self, record: &'a AuditRecord) -> BoxFuture<'a, Result<(), AuditError>> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO audit_log (actor_user_id, action, category, severity, metadata, occurred_at) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(record.actor_user_id.as_str())
            .bind(&record.action)
            .bind(record.category.as_str())
            .bind(record.severity.as_str())
            .bind(&record.metadata)
            .bind(record.occurred_at)
            .execute(&self.pool)
            .await
            .map_err(|e| AuditError::Unavailable(e.to_string()))?;
            Ok(())
        })
    }
}

//! Binding audit event model.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use sspm_discovery::audit::{BindingAuditEvent, BindingAuditEventInput, BindingAuditFilter};
use sspm_discovery::SaasAppId;
use uuid::Uuid;

use super::decode;
use crate::error::DbError;

/// A row of `saas_app_binding_audit_events`.
#[derive(Debug, Clone, FromRow)]
pub struct BindingAuditEventRow {
    pub id: Uuid,
    pub app_id: Uuid,
    pub action: String,
    pub actor_id: Option<Uuid>,
    pub before_state: Option<JsonValue>,
    pub after_state: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<BindingAuditEventRow> for BindingAuditEvent {
    type Error = DbError;

    fn try_from(row: BindingAuditEventRow) -> Result<Self, Self::Error> {
        Ok(BindingAuditEvent {
            id: row.id,
            app_id: SaasAppId::from(row.app_id),
            action: decode("action", &row.action)?,
            actor_id: row.actor_id,
            before_state: row.before_state,
            after_state: row.after_state,
            timestamp: row.created_at,
        })
    }
}

impl BindingAuditEventRow {
    pub async fn insert(pool: &PgPool, input: &BindingAuditEventInput) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r"
            INSERT INTO saas_app_binding_audit_events (
                id, app_id, action, actor_id, before_state, after_state, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            RETURNING *
            ",
        )
        .bind(Uuid::new_v4())
        .bind(input.app_id.into_inner())
        .bind(input.action.as_str())
        .bind(input.actor_id)
        .bind(&input.before_state)
        .bind(&input.after_state)
        .fetch_one(pool)
        .await
    }

    /// Events matching `filter`, most recent first.
    pub async fn query(pool: &PgPool, filter: &BindingAuditFilter) -> Result<Vec<Self>, sqlx::Error> {
        let limit = filter
            .limit
            .map_or(i64::MAX, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let offset = filter
            .offset
            .map_or(0, |o| i64::try_from(o).unwrap_or(i64::MAX));

        sqlx::query_as(
            r"
            SELECT * FROM saas_app_binding_audit_events
            WHERE ($1::uuid IS NULL OR app_id = $1)
              AND ($2::uuid IS NULL OR actor_id = $2)
              AND ($3::text IS NULL OR action = $3)
              AND ($4::timestamptz IS NULL OR created_at >= $4)
              AND ($5::timestamptz IS NULL OR created_at <= $5)
            ORDER BY created_at DESC, id
            LIMIT $6 OFFSET $7
            ",
        )
        .bind(filter.app_id.map(SaasAppId::into_inner))
        .bind(filter.actor_id)
        .bind(filter.action.map(|a| a.as_str()))
        .bind(filter.from_date)
        .bind(filter.to_date)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }
}

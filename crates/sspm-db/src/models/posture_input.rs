//! Per-app posture inputs, assembled in one query.
//!
//! Joins each app with its primary binding, usage evidence and governance
//! override. Scope flags consider every recorded access event; the actor
//! count only the trailing window.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use sspm_discovery::{PostureInputRow, SaasAppId, UsageSignals};
use uuid::Uuid;

use super::decode_opt;
use crate::error::DbError;

/// Raw posture input row as returned by [`PostureInputDbRow::list`].
#[derive(Debug, Clone, FromRow)]
pub struct PostureInputDbRow {
    pub app_id: Uuid,
    pub display_name: String,
    pub bound_connector_kind: Option<String>,
    pub bound_source_name: Option<String>,
    pub has_privileged_scope: bool,
    pub has_confidential_scope: bool,
    pub actors_30d: i64,
    pub owner_id: Option<Uuid>,
    pub override_criticality: Option<String>,
    pub override_classification: Option<String>,
}

impl TryFrom<PostureInputDbRow> for PostureInputRow {
    type Error = DbError;

    fn try_from(row: PostureInputDbRow) -> Result<Self, Self::Error> {
        Ok(PostureInputRow {
            app_id: SaasAppId::from(row.app_id),
            display_name: row.display_name,
            bound_connector_kind: row.bound_connector_kind,
            bound_source_name: row.bound_source_name,
            signals: UsageSignals {
                has_privileged_scope: row.has_privileged_scope,
                has_confidential_scope: row.has_confidential_scope,
                actors_30d: u32::try_from(row.actors_30d.max(0)).unwrap_or(u32::MAX),
            },
            owner_id: row.owner_id,
            override_criticality: decode_opt(
                "business_criticality",
                row.override_criticality.as_deref(),
            )?,
            override_classification: decode_opt(
                "data_classification",
                row.override_classification.as_deref(),
            )?,
        })
    }
}

impl PostureInputDbRow {
    /// One row per app, ordered by canonical key. `actors_since` bounds the
    /// distinct-actor count.
    pub async fn list(pool: &PgPool, actors_since: DateTime<Utc>) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT
                a.id AS app_id,
                a.display_name,
                b.connector_kind AS bound_connector_kind,
                b.source_name AS bound_source_name,
                COALESCE(u.has_privileged_scope, FALSE) AS has_privileged_scope,
                COALESCE(u.has_confidential_scope, FALSE) AS has_confidential_scope,
                COALESCE(u.actors_30d, 0) AS actors_30d,
                g.owner_id,
                g.business_criticality AS override_criticality,
                g.data_classification AS override_classification
            FROM saas_apps a
            LEFT JOIN LATERAL (
                SELECT connector_kind, source_name
                FROM saas_app_bindings
                WHERE app_id = a.id AND is_primary
                ORDER BY confidence DESC, connector_kind, source_name
                LIMIT 1
            ) b ON TRUE
            LEFT JOIN LATERAL (
                SELECT
                    bool_or(scope_kind = 'privileged') AS has_privileged_scope,
                    bool_or(scope_kind = 'confidential') AS has_confidential_scope,
                    COUNT(DISTINCT actor_ref) FILTER (WHERE occurred_at >= $1) AS actors_30d
                FROM saas_app_access_events
                WHERE app_id = a.id
            ) u ON TRUE
            LEFT JOIN saas_app_governance_overrides g ON g.app_id = a.id
            ORDER BY a.canonical_key
            ",
        )
        .bind(actors_since)
        .fetch_all(pool)
        .await
    }
}

//! Discovered SaaS application model.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use sspm_discovery::{AppSighting, ConnectorKind, PostureUpdate, SaasApp, SaasAppId, SourceKey};
use uuid::Uuid;

use super::{decode, decode_opt};
use crate::error::DbError;

/// A row of `saas_apps`.
#[derive(Debug, Clone, FromRow)]
pub struct SaasAppRow {
    pub id: Uuid,
    pub canonical_key: String,
    pub display_name: String,
    pub primary_domain: Option<String>,
    pub vendor_name: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub managed_state: String,
    pub managed_reason: String,
    pub bound_connector_kind: Option<String>,
    pub bound_source_name: Option<String>,
    pub risk_score: i16,
    pub risk_level: String,
    pub suggested_criticality: Option<String>,
    pub suggested_classification: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<SaasAppRow> for SaasApp {
    type Error = DbError;

    fn try_from(row: SaasAppRow) -> Result<Self, Self::Error> {
        let risk_score = u8::try_from(row.risk_score)
            .map_err(|_| DbError::Decode(format!("risk_score: {} out of range", row.risk_score)))?;
        let bound_source = match (row.bound_connector_kind.as_deref(), row.bound_source_name) {
            (Some(kind), Some(name)) => {
                let kind: ConnectorKind = kind
                    .parse()
                    .map_err(|e| DbError::Decode(format!("bound_connector_kind: {e}")))?;
                Some(SourceKey::new(kind, name))
            }
            _ => None,
        };
        Ok(SaasApp {
            id: SaasAppId::from(row.id),
            canonical_key: row.canonical_key,
            display_name: row.display_name,
            primary_domain: row.primary_domain,
            vendor_name: row.vendor_name,
            first_seen_at: row.first_seen_at,
            last_seen_at: row.last_seen_at,
            managed_state: decode("managed_state", &row.managed_state)?,
            managed_reason: row.managed_reason,
            bound_source,
            risk_score,
            risk_level: decode("risk_level", &row.risk_level)?,
            suggested_criticality: decode_opt(
                "suggested_criticality",
                row.suggested_criticality.as_deref(),
            )?,
            suggested_classification: decode_opt(
                "suggested_classification",
                row.suggested_classification.as_deref(),
            )?,
        })
    }
}

impl SaasAppRow {
    /// Find an app by ID.
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM saas_apps
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// List every app ordered by canonical key.
    pub async fn list_all(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM saas_apps
            ORDER BY canonical_key
            ",
        )
        .fetch_all(pool)
        .await
    }

    /// Insert the app on first sighting, otherwise widen the seen window and
    /// fill a missing vendor name.
    pub async fn upsert_sighting(
        pool: &PgPool,
        canonical_key: &str,
        sighting: &AppSighting,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r"
            INSERT INTO saas_apps (
                id, canonical_key, display_name, primary_domain, vendor_name,
                first_seen_at, last_seen_at
            )
            VALUES ($1, $2, $3, $2, $4, $5, $5)
            ON CONFLICT (canonical_key) DO UPDATE SET
                first_seen_at = LEAST(saas_apps.first_seen_at, EXCLUDED.first_seen_at),
                last_seen_at = GREATEST(saas_apps.last_seen_at, EXCLUDED.last_seen_at),
                vendor_name = COALESCE(saas_apps.vendor_name, EXCLUDED.vendor_name),
                updated_at = NOW()
            RETURNING *
            ",
        )
        .bind(Uuid::new_v4())
        .bind(canonical_key)
        .bind(&sighting.display_name)
        .bind(&sighting.vendor_name)
        .bind(sighting.seen_at)
        .fetch_one(pool)
        .await
    }

    /// Write posture and risk fields. Returns the number of rows updated.
    pub async fn update_posture(pool: &PgPool, update: &PostureUpdate) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE saas_apps SET
                managed_state = $2,
                managed_reason = $3,
                bound_connector_kind = $4,
                bound_source_name = $5,
                risk_score = $6,
                risk_level = $7,
                suggested_criticality = $8,
                suggested_classification = $9,
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(update.app_id.into_inner())
        .bind(update.managed_state.as_str())
        .bind(&update.managed_reason)
        .bind(update.bound_source.as_ref().map(|s| s.connector_kind.as_str()))
        .bind(update.bound_source.as_ref().map(|s| s.source_name.as_str()))
        .bind(i16::from(update.risk_score))
        .bind(update.risk_level.as_str())
        .bind(update.suggested_criticality.as_str())
        .bind(update.suggested_classification.as_str())
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sspm_discovery::{ManagedState, RiskLevel};

    fn row() -> SaasAppRow {
        let now = Utc::now();
        SaasAppRow {
            id: Uuid::new_v4(),
            canonical_key: "notion.so".into(),
            display_name: "Notion".into(),
            primary_domain: Some("notion.so".into()),
            vendor_name: None,
            first_seen_at: now,
            last_seen_at: now,
            managed_state: "managed".into(),
            managed_reason: "actively synced by a configured, enabled connector".into(),
            bound_connector_kind: Some("okta".into()),
            bound_source_name: Some("acme.okta.com".into()),
            risk_score: 42,
            risk_level: "medium".into(),
            suggested_criticality: None,
            suggested_classification: Some("internal".into()),
            updated_at: now,
        }
    }

    #[test]
    fn test_row_converts_to_app() {
        let app = SaasApp::try_from(row()).unwrap();
        assert_eq!(app.managed_state, ManagedState::Managed);
        assert_eq!(app.risk_level, RiskLevel::Medium);
        assert_eq!(app.risk_score, 42);
        assert!(app.suggested_classification.is_some());
        assert_eq!(
            app.bound_source,
            Some(SourceKey::new(ConnectorKind::Okta, "acme.okta.com"))
        );
    }

    #[test]
    fn test_row_without_bound_source() {
        let mut unbound = row();
        unbound.bound_connector_kind = None;
        unbound.bound_source_name = None;
        assert_eq!(SaasApp::try_from(unbound).unwrap().bound_source, None);

        let mut bad = row();
        bad.bound_connector_kind = Some("salesforce".into());
        assert!(matches!(SaasApp::try_from(bad), Err(DbError::Decode(_))));
    }

    #[test]
    fn test_row_with_bad_level_fails() {
        let mut bad = row();
        bad.risk_level = "extreme".into();
        assert!(matches!(SaasApp::try_from(bad), Err(DbError::Decode(_))));

        let mut bad = row();
        bad.risk_score = -1;
        assert!(matches!(SaasApp::try_from(bad), Err(DbError::Decode(_))));
    }
}

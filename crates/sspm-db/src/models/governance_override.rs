//! Administrator governance override model. One row per app.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use sspm_discovery::{GovernanceOverride, SaasAppId};
use uuid::Uuid;

use super::decode_opt;
use crate::error::DbError;

/// A row of `saas_app_governance_overrides`.
#[derive(Debug, Clone, FromRow)]
pub struct GovernanceOverrideRow {
    pub app_id: Uuid,
    pub owner_id: Option<Uuid>,
    pub business_criticality: Option<String>,
    pub data_classification: Option<String>,
    pub notes: Option<String>,
    pub updated_by: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<GovernanceOverrideRow> for GovernanceOverride {
    type Error = DbError;

    fn try_from(row: GovernanceOverrideRow) -> Result<Self, Self::Error> {
        Ok(GovernanceOverride {
            app_id: SaasAppId::from(row.app_id),
            owner_id: row.owner_id,
            business_criticality: decode_opt(
                "business_criticality",
                row.business_criticality.as_deref(),
            )?,
            data_classification: decode_opt(
                "data_classification",
                row.data_classification.as_deref(),
            )?,
            notes: row.notes,
            updated_by: row.updated_by,
            updated_at: row.updated_at,
        })
    }
}

impl GovernanceOverrideRow {
    pub async fn find_by_app(pool: &PgPool, app_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM saas_app_governance_overrides
            WHERE app_id = $1
            ",
        )
        .bind(app_id)
        .fetch_optional(pool)
        .await
    }

    /// Replace the override for an app.
    pub async fn upsert(pool: &PgPool, input: &GovernanceOverride) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            INSERT INTO saas_app_governance_overrides (
                app_id, owner_id, business_criticality, data_classification,
                notes, updated_by, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (app_id) DO UPDATE SET
                owner_id = EXCLUDED.owner_id,
                business_criticality = EXCLUDED.business_criticality,
                data_classification = EXCLUDED.data_classification,
                notes = EXCLUDED.notes,
                updated_by = EXCLUDED.updated_by,
                updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(input.app_id.into_inner())
        .bind(input.owner_id)
        .bind(input.business_criticality.map(|c| c.as_str()))
        .bind(input.data_classification.map(|c| c.as_str()))
        .bind(&input.notes)
        .bind(input.updated_by)
        .bind(input.updated_at)
        .execute(pool)
        .await?;
        Ok(())
    }
}

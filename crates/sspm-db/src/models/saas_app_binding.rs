//! Connector binding model.
//!
//! One row per (app, connector kind, source name). The upsert is a single
//! conditional statement so an automatic claim can never overwrite a manual
//! one, whatever order concurrent writers arrive in.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgExecutor, PgPool};
use sspm_discovery::{
    BindingId, SaasAppBinding, SaasAppId, SourceKey, UpsertBinding, UpsertOutcome,
};
use uuid::Uuid;

use super::{decode, source_key};

/// A row of `saas_app_bindings`.
#[derive(Debug, Clone, FromRow)]
pub struct SaasAppBindingRow {
    pub id: Uuid,
    pub app_id: Uuid,
    pub connector_kind: String,
    pub source_name: String,
    pub origin: String,
    pub confidence: f64,
    pub is_primary: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SaasAppBindingRow {
    pub fn into_binding(self) -> sspm_discovery::Result<SaasAppBinding> {
        Ok(SaasAppBinding {
            id: BindingId::from(self.id),
            app_id: SaasAppId::from(self.app_id),
            source: source_key(&self.connector_kind, self.source_name)?,
            origin: decode("origin", &self.origin)?,
            confidence: self.confidence,
            is_primary: self.is_primary,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    /// Conditional upsert.
    ///
    /// The update arm only fires when the existing row is not manual or the
    /// incoming row is manual. `xmax = 0` distinguishes a fresh insert from an
    /// update; no returned row means the manual row was left alone.
    pub async fn upsert<'e, E>(executor: E, input: &UpsertBinding) -> Result<UpsertOutcome, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let inserted: Option<bool> = sqlx::query_scalar(
            r"
            INSERT INTO saas_app_bindings (
                id, app_id, connector_kind, source_name, origin, confidence,
                is_primary, created_by, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), NOW())
            ON CONFLICT (app_id, connector_kind, source_name) DO UPDATE SET
                origin = EXCLUDED.origin,
                confidence = EXCLUDED.confidence,
                is_primary = EXCLUDED.is_primary,
                created_by = COALESCE(EXCLUDED.created_by, saas_app_bindings.created_by),
                updated_at = NOW()
            WHERE saas_app_bindings.origin <> 'manual' OR EXCLUDED.origin = 'manual'
            RETURNING (xmax = 0) AS inserted
            ",
        )
        .bind(Uuid::new_v4())
        .bind(input.app_id.into_inner())
        .bind(input.source.connector_kind.as_str())
        .bind(&input.source.source_name)
        .bind(input.origin.as_str())
        .bind(input.confidence)
        .bind(input.is_primary)
        .bind(input.created_by)
        .fetch_optional(executor)
        .await?;

        Ok(match inserted {
            Some(true) => UpsertOutcome::Inserted,
            Some(false) => UpsertOutcome::Updated,
            None => UpsertOutcome::SkippedManual,
        })
    }

    /// Take the app row lock that serialises primary arbitration. Binding
    /// inserts wait on it through the foreign key.
    async fn lock_app(conn: &mut PgConnection, app_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            SELECT id FROM saas_apps
            WHERE id = $1
            FOR UPDATE
            ",
        )
        .bind(app_id)
        .fetch_optional(conn)
        .await?;
        Ok(())
    }

    /// Delete the app's other manual rows and upsert `input`, in one
    /// transaction.
    pub async fn pin_manual(pool: &PgPool, input: &UpsertBinding) -> Result<UpsertOutcome, sqlx::Error> {
        let mut tx = pool.begin().await?;
        Self::lock_app(&mut tx, input.app_id.into_inner()).await?;

        sqlx::query(
            r"
            DELETE FROM saas_app_bindings
            WHERE app_id = $1
              AND origin = 'manual'
              AND (connector_kind, source_name) <> ($2::text, $3::text)
            ",
        )
        .bind(input.app_id.into_inner())
        .bind(input.source.connector_kind.as_str())
        .bind(&input.source.source_name)
        .execute(&mut *tx)
        .await?;

        let outcome = Self::upsert(&mut *tx, input).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// Rank the app's bindings and rewrite the primary flags under the app
    /// row lock. The order matches `sspm_discovery::select_primary`:
    /// confidence, manual before auto, then byte order of kind and name.
    pub async fn recompute_primary(pool: &PgPool, app_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let mut tx = pool.begin().await?;
        Self::lock_app(&mut tx, app_id).await?;

        sqlx::query(
            r#"
            WITH ranked AS (
                SELECT id,
                       ROW_NUMBER() OVER (
                           ORDER BY confidence DESC,
                                    (origin = 'manual') DESC,
                                    connector_kind COLLATE "C",
                                    source_name COLLATE "C"
                       ) = 1 AS wins
                FROM saas_app_bindings
                WHERE app_id = $1
            )
            UPDATE saas_app_bindings b SET
                is_primary = ranked.wins,
                updated_at = NOW()
            FROM ranked
            WHERE b.id = ranked.id
              AND b.is_primary IS DISTINCT FROM ranked.wins
            "#,
        )
        .bind(app_id)
        .execute(&mut *tx)
        .await?;

        let primary: Option<Self> = sqlx::query_as(
            r"
            SELECT * FROM saas_app_bindings
            WHERE app_id = $1 AND is_primary
            ",
        )
        .bind(app_id)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(primary)
    }

    /// All bindings for an app, ordered by source.
    pub async fn list_by_app(pool: &PgPool, app_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM saas_app_bindings
            WHERE app_id = $1
            ORDER BY connector_kind, source_name
            ",
        )
        .bind(app_id)
        .fetch_all(pool)
        .await
    }

    /// Mark exactly one binding primary in a single statement. `None` clears
    /// every flag. Rows already in the wanted state are not touched.
    pub async fn set_primary(
        pool: &PgPool,
        app_id: Uuid,
        primary: Option<&SourceKey>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE saas_app_bindings SET
                is_primary = COALESCE(connector_kind = $2::text AND source_name = $3::text, FALSE),
                updated_at = NOW()
            WHERE app_id = $1
              AND is_primary IS DISTINCT FROM
                  COALESCE(connector_kind = $2::text AND source_name = $3::text, FALSE)
            ",
        )
        .bind(app_id)
        .bind(primary.map(|s| s.connector_kind.as_str()))
        .bind(primary.map(|s| s.source_name.as_str()))
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Delete manual rows and, if any went, clear every primary flag, in one
    /// transaction.
    pub async fn clear_manual(pool: &PgPool, app_id: Uuid) -> Result<u64, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let removed = sqlx::query(
            r"
            DELETE FROM saas_app_bindings
            WHERE app_id = $1 AND origin = 'manual'
            ",
        )
        .bind(app_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if removed > 0 {
            sqlx::query(
                r"
                UPDATE saas_app_bindings SET is_primary = FALSE, updated_at = NOW()
                WHERE app_id = $1 AND is_primary
                ",
            )
            .bind(app_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sspm_discovery::{BindingOrigin, ConnectorKind, DiscoveryError};

    fn row(kind: &str, origin: &str) -> SaasAppBindingRow {
        let now = Utc::now();
        SaasAppBindingRow {
            id: Uuid::new_v4(),
            app_id: Uuid::new_v4(),
            connector_kind: kind.into(),
            source_name: "acme".into(),
            origin: origin.into(),
            confidence: 0.8,
            is_primary: true,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_row_converts_to_binding() {
        let binding = row("github", "auto").into_binding().unwrap();
        assert_eq!(binding.source, SourceKey::new(ConnectorKind::Github, "acme"));
        assert_eq!(binding.origin, BindingOrigin::Auto);
        assert!(binding.is_primary);
    }

    #[test]
    fn test_unknown_kind_is_record_scoped() {
        let err = row("salesforce", "auto").into_binding().unwrap_err();
        assert!(matches!(err, DiscoveryError::UnknownConnectorKind(_)));
        assert!(err.is_record_scoped());
    }

    #[test]
    fn test_bad_origin_is_repository_error() {
        let err = row("github", "imported").into_binding().unwrap_err();
        assert!(err.is_transient());
    }
}

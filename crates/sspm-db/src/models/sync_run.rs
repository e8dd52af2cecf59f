//! Connector sync run history and its rollups.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use sspm_discovery::{SourceKey, SyncRun, SyncRunRollup};
use uuid::Uuid;

use super::{decode, decode_opt, source_arrays, source_key};

/// A row of `connector_sync_runs`.
#[derive(Debug, Clone, FromRow)]
pub struct SyncRunRow {
    pub id: Uuid,
    pub connector_kind: String,
    pub source_name: String,
    pub status: String,
    pub error_kind: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SyncRunRow {
    pub fn into_run(self) -> sspm_discovery::Result<SyncRun> {
        Ok(SyncRun {
            source: source_key(&self.connector_kind, self.source_name)?,
            status: decode("status", &self.status)?,
            error_kind: self.error_kind,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }

    /// Record a sync run outcome reported by a connector.
    pub async fn insert(pool: &PgPool, run: &SyncRun) -> Result<Uuid, sqlx::Error> {
        sqlx::query_scalar(
            r"
            INSERT INTO connector_sync_runs (
                id, connector_kind, source_name, status, error_kind, started_at, finished_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            ",
        )
        .bind(Uuid::new_v4())
        .bind(run.source.connector_kind.as_str())
        .bind(&run.source.source_name)
        .bind(run.status.as_str())
        .bind(&run.error_kind)
        .bind(run.started_at)
        .bind(run.finished_at)
        .fetch_one(pool)
        .await
    }

    /// Latest successful finish per requested source, in one round trip.
    pub async fn latest_successful(
        pool: &PgPool,
        sources: &[SourceKey],
    ) -> Result<Vec<(String, String, DateTime<Utc>)>, sqlx::Error> {
        let (kinds, names) = source_arrays(sources);
        sqlx::query_as(
            r"
            SELECT r.connector_kind, r.source_name, MAX(r.finished_at) AS finished_at
            FROM connector_sync_runs r
            JOIN UNNEST($1::text[], $2::text[]) AS s(connector_kind, source_name)
              ON r.connector_kind = s.connector_kind AND r.source_name = s.source_name
            WHERE r.status = 'success' AND r.finished_at IS NOT NULL
            GROUP BY r.connector_kind, r.source_name
            ",
        )
        .bind(kinds)
        .bind(names)
        .fetch_all(pool)
        .await
    }
}

/// Aggregate row per requested source.
#[derive(Debug, Clone, FromRow)]
pub struct SyncRunRollupRow {
    pub connector_kind: String,
    pub source_name: String,
    pub last_run_status: Option<String>,
    pub last_error_kind: Option<String>,
    pub last_run_finished_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub finished_count: i64,
    pub success_count: i64,
    pub avg_duration_secs: Option<f64>,
}

impl SyncRunRollupRow {
    pub fn into_rollup(self) -> sspm_discovery::Result<SyncRunRollup> {
        Ok(SyncRunRollup {
            source: source_key(&self.connector_kind, self.source_name)?,
            last_run_status: decode_opt("last_run_status", self.last_run_status.as_deref())?,
            last_error_kind: self.last_error_kind,
            last_run_finished_at: self.last_run_finished_at,
            last_success_at: self.last_success_at,
            finished_count: self.finished_count,
            success_count: self.success_count,
            avg_duration_secs: self.avg_duration_secs,
        })
    }

    /// Rollups for every requested source. Counts and average duration cover
    /// runs finished since `since`; the last run and last success do not.
    pub async fn for_sources(
        pool: &PgPool,
        sources: &[SourceKey],
        since: DateTime<Utc>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let (kinds, names) = source_arrays(sources);
        sqlx::query_as(
            r"
            SELECT
                s.connector_kind,
                s.source_name,
                last_run.status AS last_run_status,
                last_run.error_kind AS last_error_kind,
                last_run.finished_at AS last_run_finished_at,
                last_success.finished_at AS last_success_at,
                agg.finished_count,
                agg.success_count,
                agg.avg_duration_secs
            FROM UNNEST($1::text[], $2::text[]) AS s(connector_kind, source_name)
            LEFT JOIN LATERAL (
                SELECT status, error_kind, finished_at
                FROM connector_sync_runs r
                WHERE r.connector_kind = s.connector_kind AND r.source_name = s.source_name
                ORDER BY r.started_at DESC
                LIMIT 1
            ) last_run ON TRUE
            LEFT JOIN LATERAL (
                SELECT MAX(r.finished_at) AS finished_at
                FROM connector_sync_runs r
                WHERE r.connector_kind = s.connector_kind AND r.source_name = s.source_name
                  AND r.status = 'success'
            ) last_success ON TRUE
            CROSS JOIN LATERAL (
                SELECT
                    COUNT(*) AS finished_count,
                    COUNT(*) FILTER (WHERE r.status = 'success') AS success_count,
                    AVG(EXTRACT(EPOCH FROM (r.finished_at - r.started_at)))::double precision
                        AS avg_duration_secs
                FROM connector_sync_runs r
                WHERE r.connector_kind = s.connector_kind AND r.source_name = s.source_name
                  AND r.status <> 'running'
                  AND r.finished_at IS NOT NULL
                  AND r.finished_at >= $3
            ) agg
            ORDER BY s.connector_kind, s.source_name
            ",
        )
        .bind(kinds)
        .bind(names)
        .bind(since)
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sspm_discovery::SyncRunStatus;

    #[test]
    fn test_rollup_row_converts() {
        let row = SyncRunRollupRow {
            connector_kind: "okta".into(),
            source_name: "acme.okta.com".into(),
            last_run_status: Some("failed".into()),
            last_error_kind: Some("timeout".into()),
            last_run_finished_at: None,
            last_success_at: None,
            finished_count: 4,
            success_count: 3,
            avg_duration_secs: Some(12.5),
        };
        let rollup = row.into_rollup().unwrap();
        assert_eq!(rollup.last_run_status, Some(SyncRunStatus::Failed));
        assert_eq!(rollup.success_count, 3);
        assert_eq!(rollup.source.to_string(), "okta:acme.okta.com");
    }

    #[test]
    fn test_run_row_with_unknown_status_fails() {
        let row = SyncRunRow {
            id: Uuid::new_v4(),
            connector_kind: "github".into(),
            source_name: "acme".into(),
            status: "exploded".into(),
            error_kind: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        assert!(row.into_run().is_err());
    }
}

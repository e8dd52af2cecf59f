//! Connector health derived from sync-run history.
//!
//! Each connector source moves through a small state machine evaluated in a
//! fixed order: `unsupported`, `not_configured`, `disabled`, then one of
//! `never_synced`, `stale`, `healthy` or `degraded` from the rollup. The
//! staleness window computed here is separate from the posture freshness
//! window.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::config::{DiscoveryConfig, StalenessPolicy};
use crate::connector::{ConnectorKind, ConnectorRegistry};
use crate::error::Result;
use crate::guard::guarded;
use crate::metrics::{labels, DiscoveryGauge, GaugeLabels, GaugePublisher};
use crate::store::DiscoveryRepository;
use crate::types::SourceKey;

/// Placeholder for labels with no value.
pub const NO_VALUE_LABEL: &str = "—";

/// Outcome of a single sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncRunStatus {
    Running,
    Success,
    Failed,
    Cancelled,
}

impl SyncRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for SyncRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SyncRunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(Self::Running),
            "success" | "succeeded" => Ok(Self::Success),
            "failed" | "error" => Ok(Self::Failed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown sync run status: {s}")),
        }
    }
}

/// One recorded sync run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub source: SourceKey,
    pub status: SyncRunStatus,
    pub error_kind: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Aggregate over a source's recent sync runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRunRollup {
    pub source: SourceKey,
    pub last_run_status: Option<SyncRunStatus>,
    pub last_error_kind: Option<String>,
    pub last_run_finished_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    /// Finished runs within the trailing window.
    pub finished_count: i64,
    /// Successful runs within the trailing window.
    pub success_count: i64,
    pub avg_duration_secs: Option<f64>,
}

impl SyncRunRollup {
    /// Rollup for a source with no recorded runs.
    pub fn empty(source: SourceKey) -> Self {
        Self {
            source,
            last_run_status: None,
            last_error_kind: None,
            last_run_finished_at: None,
            last_success_at: None,
            finished_count: 0,
            success_count: 0,
            avg_duration_secs: None,
        }
    }

    /// Build a rollup from raw runs. Runs for other sources are ignored.
    pub fn from_runs<'a>(
        source: SourceKey,
        runs: impl IntoIterator<Item = &'a SyncRun>,
        since: DateTime<Utc>,
    ) -> Self {
        let mut rollup = Self::empty(source);
        let mut last_started: Option<DateTime<Utc>> = None;
        let mut total_secs = 0.0;

        for run in runs.into_iter().filter(|r| r.source == rollup.source) {
            if last_started.is_none_or(|started| run.started_at > started) {
                last_started = Some(run.started_at);
                rollup.last_run_status = Some(run.status);
                rollup.last_error_kind = run.error_kind.clone();
                rollup.last_run_finished_at = run.finished_at;
            }

            let Some(finished_at) = run.finished_at else {
                continue;
            };
            if run.status == SyncRunStatus::Success
                && rollup.last_success_at.is_none_or(|last| finished_at > last)
            {
                rollup.last_success_at = Some(finished_at);
            }
            if run.status.is_finished() && finished_at >= since {
                rollup.finished_count += 1;
                if run.status == SyncRunStatus::Success {
                    rollup.success_count += 1;
                }
                total_secs += (finished_at - run.started_at).num_milliseconds() as f64 / 1000.0;
            }
        }

        if rollup.finished_count > 0 {
            rollup.avg_duration_secs = Some(total_secs / rollup.finished_count as f64);
        }
        rollup
    }
}

/// Connector health state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Unsupported,
    NotConfigured,
    Disabled,
    NeverSynced,
    Healthy,
    Degraded,
    Stale,
}

impl HealthStatus {
    pub fn all() -> &'static [HealthStatus] {
        &[
            HealthStatus::Unsupported,
            HealthStatus::NotConfigured,
            HealthStatus::Disabled,
            HealthStatus::NeverSynced,
            HealthStatus::Healthy,
            HealthStatus::Degraded,
            HealthStatus::Stale,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unsupported => "unsupported",
            HealthStatus::NotConfigured => "not_configured",
            HealthStatus::Disabled => "disabled",
            HealthStatus::NeverSynced => "never_synced",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Stale => "stale",
        }
    }

    /// Whether the connector counts toward the enabled aggregate.
    pub fn counts_as_enabled(&self) -> bool {
        matches!(
            self,
            HealthStatus::Healthy
                | HealthStatus::Degraded
                | HealthStatus::Stale
                | HealthStatus::NeverSynced
        )
    }

    pub fn needs_attention(&self) -> bool {
        matches!(
            self,
            HealthStatus::Stale | HealthStatus::NeverSynced | HealthStatus::Degraded
        )
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Inputs for one health evaluation.
#[derive(Debug, Clone, Copy)]
pub struct HealthInput<'a> {
    pub syncable: bool,
    pub configured: bool,
    pub enabled: bool,
    pub rollup: Option<&'a SyncRunRollup>,
    pub expected_interval: Duration,
    pub now: DateTime<Utc>,
}

/// Derived health for one connector source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResult {
    pub status: HealthStatus,
    pub counts_as_enabled: bool,
    pub needs_attention: bool,
    /// Staleness window applied, in seconds.
    pub stale_after_secs: i64,
    pub last_success_label: String,
    pub last_run_label: String,
    pub success_rate_label: String,
    pub avg_duration_label: String,
    pub last_error_kind: Option<String>,
}

impl HealthResult {
    fn without_history(status: HealthStatus, stale_after: Duration) -> Self {
        Self {
            status,
            counts_as_enabled: status.counts_as_enabled(),
            needs_attention: status.needs_attention(),
            stale_after_secs: stale_after.num_seconds(),
            last_success_label: NO_VALUE_LABEL.to_string(),
            last_run_label: NO_VALUE_LABEL.to_string(),
            success_rate_label: NO_VALUE_LABEL.to_string(),
            avg_duration_label: NO_VALUE_LABEL.to_string(),
            last_error_kind: None,
        }
    }
}

/// Staleness window for a sync interval under the default policy.
///
/// `clamp(interval * 4, 2h, 72h)`.
pub fn stale_after(expected_interval: Duration) -> Duration {
    StalenessPolicy::default().stale_after(expected_interval)
}

/// Evaluate connector health.
pub fn evaluate_health(input: &HealthInput<'_>, staleness: &StalenessPolicy) -> HealthResult {
    let window = staleness.stale_after(input.expected_interval);

    if !input.syncable {
        return HealthResult::without_history(HealthStatus::Unsupported, window);
    }
    if !input.configured {
        return HealthResult::without_history(HealthStatus::NotConfigured, window);
    }

    let last_success = input.rollup.and_then(|r| r.last_success_at);
    let last_run = input.rollup.and_then(|r| r.last_run_finished_at);
    let (success_count, finished_count) = input
        .rollup
        .map_or((0, 0), |r| (r.success_count, r.finished_count));

    let status = if !input.enabled {
        HealthStatus::Disabled
    } else {
        match last_success {
            None => HealthStatus::NeverSynced,
            Some(at) if input.now - at > window => HealthStatus::Stale,
            Some(_) => match input.rollup.and_then(|r| r.last_run_status) {
                Some(SyncRunStatus::Success) => HealthStatus::Healthy,
                _ => HealthStatus::Degraded,
            },
        }
    };

    HealthResult {
        status,
        counts_as_enabled: status.counts_as_enabled(),
        needs_attention: status.needs_attention(),
        stale_after_secs: window.num_seconds(),
        last_success_label: format_age(last_success, input.now),
        last_run_label: format_age(last_run, input.now),
        success_rate_label: success_rate_label(success_count, finished_count),
        avg_duration_label: duration_label(input.rollup.and_then(|r| r.avg_duration_secs)),
        last_error_kind: input.rollup.and_then(|r| r.last_error_kind.clone()),
    }
}

/// Relative age such as "5m ago".
pub fn format_age(at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(at) = at else {
        return "never".to_string();
    };
    let age = now - at;
    if age < Duration::minutes(1) {
        "just now".to_string()
    } else if age < Duration::hours(1) {
        format!("{}m ago", age.num_minutes())
    } else if age < Duration::hours(24) {
        format!("{}h ago", age.num_hours())
    } else {
        format!("{}d ago", age.num_days())
    }
}

/// Success percentage over the trailing window.
pub fn success_rate_label(success_count: i64, finished_count: i64) -> String {
    if finished_count <= 0 {
        return NO_VALUE_LABEL.to_string();
    }
    let rate = (success_count as f64 / finished_count as f64 * 100.0).clamp(0.0, 100.0);
    format!("{rate:.0}%")
}

/// Compact duration such as "1m 5s".
pub fn duration_label(secs: Option<f64>) -> String {
    let Some(secs) = secs.filter(|s| s.is_finite() && *s >= 0.0) else {
        return NO_VALUE_LABEL.to_string();
    };
    let total = secs.round() as i64;
    if total < 60 {
        format!("{total}s")
    } else if total < 3600 {
        format!("{}m {}s", total / 60, total % 60)
    } else {
        format!("{}h {}m", total / 3600, (total % 3600) / 60)
    }
}

/// Health of one connector as reported to operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorHealthReport {
    pub kind: ConnectorKind,
    pub display_name: String,
    pub source_name: String,
    pub health: HealthResult,
}

/// Aggregate counts across connectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub total: usize,
    pub enabled: usize,
    pub healthy: usize,
    pub needs_attention: usize,
}

impl HealthSummary {
    pub fn from_reports(reports: &[ConnectorHealthReport]) -> Self {
        reports.iter().fold(Self::default(), |mut summary, report| {
            summary.total += 1;
            if report.health.counts_as_enabled {
                summary.enabled += 1;
            }
            if report.health.status == HealthStatus::Healthy {
                summary.healthy += 1;
            }
            if report.health.needs_attention {
                summary.needs_attention += 1;
            }
            summary
        })
    }
}

/// Reports plus summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthOverview {
    pub reports: Vec<ConnectorHealthReport>,
    pub summary: HealthSummary,
}

/// Evaluates health for every registered connector.
pub struct ConnectorHealthMonitor {
    registry: Arc<dyn ConnectorRegistry>,
    repository: Arc<dyn DiscoveryRepository>,
    gauges: Arc<GaugePublisher>,
    config: DiscoveryConfig,
}

impl ConnectorHealthMonitor {
    pub fn new(
        registry: Arc<dyn ConnectorRegistry>,
        repository: Arc<dyn DiscoveryRepository>,
        gauges: Arc<GaugePublisher>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            registry,
            repository,
            gauges,
            config,
        }
    }

    /// Load connector states and rollups, evaluate health, publish
    /// `sspm_connectors{status}`.
    #[instrument(skip(self, cancel))]
    pub async fn check(&self, cancel: &CancellationToken) -> Result<HealthOverview> {
        let timeout = self.config.repository_timeout();
        let now = Utc::now();

        let mut states = guarded(cancel, timeout, "load connector states", self.registry.load_states()).await?;
        states.sort_by(|a, b| a.source_key().cmp(&b.source_key()));

        let sources: Vec<SourceKey> = states
            .iter()
            .filter(|s| s.configured && s.is_syncable())
            .map(|s| s.source_key())
            .collect();
        let since = now - self.config.rollup_window();
        let rollups: HashMap<SourceKey, SyncRunRollup> = if sources.is_empty() {
            HashMap::new()
        } else {
            guarded(
                cancel,
                timeout,
                "load sync run rollups",
                self.repository.sync_run_rollup(&sources, since),
            )
            .await?
            .into_iter()
            .map(|r| (r.source.clone(), r))
            .collect()
        };

        let reports: Vec<ConnectorHealthReport> = states
            .iter()
            .map(|state| {
                let key = state.source_key();
                let health = evaluate_health(
                    &HealthInput {
                        syncable: state.is_syncable(),
                        configured: state.configured,
                        enabled: state.enabled,
                        rollup: rollups.get(&key),
                        expected_interval: state.effective_sync_interval(),
                        now,
                    },
                    &self.config.staleness,
                );
                if health.needs_attention {
                    warn!(
                        connector_kind = %state.kind,
                        source_name = %state.source_name,
                        status = %health.status,
                        last_success = %health.last_success_label,
                        "Connector needs attention"
                    );
                }
                ConnectorHealthReport {
                    kind: state.kind,
                    display_name: state.display_name.clone(),
                    source_name: state.source_name.clone(),
                    health,
                }
            })
            .collect();

        let summary = HealthSummary::from_reports(&reports);

        let mut by_status: HashMap<GaugeLabels, i64> = HealthStatus::all()
            .iter()
            .map(|status| (labels([("status", status.as_str())]), 0))
            .collect();
        for report in &reports {
            *by_status
                .entry(labels([("status", report.health.status.as_str())]))
                .or_default() += 1;
        }
        self.gauges.publish(DiscoveryGauge::Connectors, &by_status);

        info!(
            total = summary.total,
            enabled = summary.enabled,
            healthy = summary.healthy,
            needs_attention = summary.needs_attention,
            "Connector health evaluated"
        );

        Ok(HealthOverview { reports, summary })
    }
}

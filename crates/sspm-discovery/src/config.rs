//! Engine configuration.
//!
//! Every field has a serde default so a partial document (or none at all)
//! yields the documented behaviour.

use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{DiscoveryError, Result};
use crate::risk::{RiskScorer, RiskThresholds, RiskWeights};

/// How the driver reacts to a per-app failure during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record record-scoped failures and continue with the remaining apps.
    /// Store errors and timeouts still abort the pass.
    #[default]
    IsolatePerApp,
    /// Abort the pass on the first failed app.
    AbortOnFirstError,
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "isolate_per_app" | "isolate" => Ok(Self::IsolatePerApp),
            "abort_on_first_error" | "abort" => Ok(Self::AbortOnFirstError),
            _ => Err(format!("Unknown failure policy: {s}")),
        }
    }
}

/// Freshness window for posture classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessPolicy {
    #[serde(default = "default_freshness_multiplier")]
    pub multiplier: i32,
    #[serde(default = "default_freshness_floor_minutes")]
    pub floor_minutes: i64,
}

fn default_freshness_multiplier() -> i32 {
    2
}

fn default_freshness_floor_minutes() -> i64 {
    30
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            multiplier: default_freshness_multiplier(),
            floor_minutes: default_freshness_floor_minutes(),
        }
    }
}

impl FreshnessPolicy {
    /// `max(interval * multiplier, floor)`.
    pub fn window(&self, sync_interval: Duration) -> Duration {
        let floor = Duration::minutes(self.floor_minutes);
        sync_interval
            .checked_mul(self.multiplier)
            .map_or(floor, |scaled| scaled.max(floor))
    }
}

/// Staleness window for connector health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StalenessPolicy {
    #[serde(default = "default_staleness_multiplier")]
    pub multiplier: i32,
    #[serde(default = "default_staleness_floor_hours")]
    pub floor_hours: i64,
    #[serde(default = "default_staleness_ceiling_hours")]
    pub ceiling_hours: i64,
}

fn default_staleness_multiplier() -> i32 {
    4
}

fn default_staleness_floor_hours() -> i64 {
    2
}

fn default_staleness_ceiling_hours() -> i64 {
    72
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            multiplier: default_staleness_multiplier(),
            floor_hours: default_staleness_floor_hours(),
            ceiling_hours: default_staleness_ceiling_hours(),
        }
    }
}

impl StalenessPolicy {
    /// `clamp(interval * multiplier, floor, ceiling)`. Overflow saturates at
    /// the ceiling.
    pub fn stale_after(&self, sync_interval: Duration) -> Duration {
        let floor = Duration::hours(self.floor_hours);
        let ceiling = Duration::hours(self.ceiling_hours);
        sync_interval
            .checked_mul(self.multiplier)
            .map_or(ceiling, |scaled| scaled.max(floor).min(ceiling))
    }
}

/// Top-level configuration for the reconciliation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub freshness: FreshnessPolicy,
    #[serde(default)]
    pub staleness: StalenessPolicy,
    /// Trailing window for sync-run rollups.
    #[serde(default = "default_rollup_window_days")]
    pub rollup_window_days: i64,
    /// Upper bound on any single repository call.
    #[serde(default = "default_repository_timeout_secs")]
    pub repository_timeout_secs: u64,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default)]
    pub risk: RiskConfig,
}

/// Risk weights and level thresholds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default)]
    pub weights: RiskWeights,
    #[serde(default)]
    pub thresholds: RiskThresholds,
}

fn default_rollup_window_days() -> i64 {
    7
}

fn default_repository_timeout_secs() -> u64 {
    10
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            freshness: FreshnessPolicy::default(),
            staleness: StalenessPolicy::default(),
            rollup_window_days: default_rollup_window_days(),
            repository_timeout_secs: default_repository_timeout_secs(),
            failure_policy: FailurePolicy::default(),
            risk: RiskConfig::default(),
        }
    }
}

impl DiscoveryConfig {
    /// Check invariants the engine relies on.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(DiscoveryError::InvalidConfiguration(msg));

        if self.freshness.multiplier <= 0 {
            return invalid("freshness.multiplier must be positive".into());
        }
        if self.freshness.floor_minutes < 0 {
            return invalid("freshness.floor_minutes must not be negative".into());
        }
        if self.staleness.multiplier <= 0 {
            return invalid("staleness.multiplier must be positive".into());
        }
        if self.staleness.floor_hours < 0 || self.staleness.floor_hours > self.staleness.ceiling_hours {
            return invalid(format!(
                "staleness.floor_hours ({}) must be between 0 and ceiling_hours ({})",
                self.staleness.floor_hours, self.staleness.ceiling_hours
            ));
        }
        if self.rollup_window_days <= 0 {
            return invalid("rollup_window_days must be positive".into());
        }
        if self.repository_timeout_secs == 0 {
            return invalid("repository_timeout_secs must be positive".into());
        }
        self.risk
            .weights
            .validate()
            .map_err(DiscoveryError::InvalidConfiguration)?;
        self.risk
            .thresholds
            .validate()
            .map_err(DiscoveryError::InvalidConfiguration)
    }

    pub fn repository_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.repository_timeout_secs)
    }

    pub fn rollup_window(&self) -> Duration {
        Duration::days(self.rollup_window_days)
    }

    pub fn risk_scorer(&self) -> RiskScorer {
        RiskScorer::new(self.risk.weights.clone(), self.risk.thresholds)
    }
}

//! Risk scoring for discovered applications.
//!
//! A score in 0-100 is the saturating sum of independent factors:
//!
//! | Factor | Points |
//! |--------|--------|
//! | Baseline | 35 unmanaged, 10 managed |
//! | Privileged scope observed | +25 |
//! | Confidential-data scope observed | +15 |
//! | No assigned owner | +10 |
//! | Distinct actors (30d) | 0 / 3 / 6 / 8 / 10 for 0, 1-5, 6-25, 26-100, >100 |
//! | Business criticality | 0 / 3 / 6 / 10 for low, medium, high, critical |
//! | Data classification | 0 / 2 / 6 / 10 for public, internal, confidential, restricted |
//!
//! # Risk Levels
//!
//! | Score Range | Level |
//! |-------------|-------|
//! | 0-24 | Low |
//! | 25-49 | Medium |
//! | 50-74 | High |
//! | 75-100 | Critical |
//!
//! Dashboards filter by level, so the default thresholds are stable. Both
//! weights and thresholds are configurable.
//!
//! # Example
//!
//! ```rust
//! use sspm_discovery::{ManagedState, RiskInput, RiskLevel, RiskScorer};
//!
//! let scorer = RiskScorer::default();
//! let result = scorer.score(&RiskInput {
//!     managed_state: ManagedState::Unmanaged,
//!     has_privileged_scope: true,
//!     has_owner: false,
//!     ..RiskInput::default()
//! });
//! assert_eq!(result.score, 72); // 35 + 25 + 10 + internal 2
//! assert_eq!(result.level, RiskLevel::High);
//! ```

use serde::{Deserialize, Serialize};

use crate::types::{BusinessCriticality, DataClassification, ManagedState, RiskLevel};

/// Maximum risk score.
pub const MAX_RISK_SCORE: u8 = 100;

/// Points contributed by each risk signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskWeights {
    pub unmanaged_baseline: u8,
    pub managed_baseline: u8,
    pub privileged_scope: u8,
    pub confidential_scope: u8,
    pub no_owner: u8,
    /// 1-5 distinct actors.
    pub actors_few: u8,
    /// 6-25 distinct actors.
    pub actors_some: u8,
    /// 26-100 distinct actors.
    pub actors_many: u8,
    /// More than 100 distinct actors.
    pub actors_widespread: u8,
    pub criticality_medium: u8,
    pub criticality_high: u8,
    pub criticality_critical: u8,
    pub classification_internal: u8,
    pub classification_confidential: u8,
    pub classification_restricted: u8,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            unmanaged_baseline: 35,
            managed_baseline: 10,
            privileged_scope: 25,
            confidential_scope: 15,
            no_owner: 10,
            actors_few: 3,
            actors_some: 6,
            actors_many: 8,
            actors_widespread: 10,
            criticality_medium: 3,
            criticality_high: 6,
            criticality_critical: 10,
            classification_internal: 2,
            classification_confidential: 6,
            classification_restricted: 10,
        }
    }
}

impl RiskWeights {
    /// Reject weight tables that would let more risk evidence lower a score.
    pub fn validate(&self) -> Result<(), String> {
        if self.managed_baseline > self.unmanaged_baseline {
            return Err(format!(
                "managed_baseline ({}) must not exceed unmanaged_baseline ({})",
                self.managed_baseline, self.unmanaged_baseline
            ));
        }
        let ladders: [(&str, [u8; 4]); 3] = [
            (
                "actor",
                [self.actors_few, self.actors_some, self.actors_many, self.actors_widespread],
            ),
            (
                "criticality",
                [0, self.criticality_medium, self.criticality_high, self.criticality_critical],
            ),
            (
                "classification",
                [
                    0,
                    self.classification_internal,
                    self.classification_confidential,
                    self.classification_restricted,
                ],
            ),
        ];
        for (name, points) in ladders {
            if points.windows(2).any(|pair| pair[0] > pair[1]) {
                return Err(format!("{name} weights must not decrease: {points:?}"));
            }
        }
        Ok(())
    }

    /// Points for a 30-day distinct actor count. Monotonic and saturating.
    pub fn actor_points(&self, actors_30d: u32) -> u8 {
        match actors_30d {
            0 => 0,
            1..=5 => self.actors_few,
            6..=25 => self.actors_some,
            26..=100 => self.actors_many,
            _ => self.actors_widespread,
        }
    }

    pub fn criticality_points(&self, criticality: BusinessCriticality) -> u8 {
        match criticality {
            BusinessCriticality::Low => 0,
            BusinessCriticality::Medium => self.criticality_medium,
            BusinessCriticality::High => self.criticality_high,
            BusinessCriticality::Critical => self.criticality_critical,
        }
    }

    pub fn classification_points(&self, classification: DataClassification) -> u8 {
        match classification {
            DataClassification::Public => 0,
            DataClassification::Internal => self.classification_internal,
            DataClassification::Confidential => self.classification_confidential,
            DataClassification::Restricted => self.classification_restricted,
        }
    }
}

/// Score boundaries for each risk level (inclusive upper bounds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    /// Max score for "Low" level (default: 24).
    pub low_max: u8,
    /// Max score for "Medium" level (default: 49).
    pub medium_max: u8,
    /// Max score for "High" level (default: 74).
    pub high_max: u8,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            low_max: 24,
            medium_max: 49,
            high_max: 74,
        }
    }
}

impl RiskThresholds {
    /// Validate threshold boundaries.
    ///
    /// Returns `Ok(())` if thresholds are valid, or an error message if not.
    pub fn validate(&self) -> Result<(), String> {
        if self.low_max >= self.medium_max {
            return Err(format!(
                "low_max ({}) must be less than medium_max ({})",
                self.low_max, self.medium_max
            ));
        }
        if self.medium_max >= self.high_max {
            return Err(format!(
                "medium_max ({}) must be less than high_max ({})",
                self.medium_max, self.high_max
            ));
        }
        if self.high_max >= MAX_RISK_SCORE {
            return Err(format!(
                "high_max ({}) must be less than {MAX_RISK_SCORE}",
                self.high_max
            ));
        }
        Ok(())
    }

    /// Get the risk level for a given score.
    pub fn level_for(&self, score: u8) -> RiskLevel {
        if score <= self.low_max {
            RiskLevel::Low
        } else if score <= self.medium_max {
            RiskLevel::Medium
        } else if score <= self.high_max {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }
}

/// Signals feeding the risk score of one app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskInput {
    pub managed_state: ManagedState,
    pub has_privileged_scope: bool,
    pub has_confidential_scope: bool,
    pub has_owner: bool,
    pub actors_30d: u32,
    /// Effective criticality (override, else suggestion).
    pub business_criticality: BusinessCriticality,
    /// Effective classification (override, else suggestion).
    pub data_classification: DataClassification,
}

impl Default for RiskInput {
    fn default() -> Self {
        Self {
            managed_state: ManagedState::Unmanaged,
            has_privileged_scope: false,
            has_confidential_scope: false,
            has_owner: true,
            actors_30d: 0,
            business_criticality: BusinessCriticality::Low,
            data_classification: DataClassification::Internal,
        }
    }
}

/// Contribution of one factor to a risk score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskFactorResult {
    pub name: String,
    pub points: u8,
    pub description: String,
}

impl RiskFactorResult {
    fn new(name: &str, points: u8, description: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            points,
            description: description.into(),
        }
    }
}

/// Output of the risk scorer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskResult {
    /// Clamped to 0-100.
    pub score: u8,
    pub level: RiskLevel,
    /// Factors that contributed non-zero points.
    pub factors: Vec<RiskFactorResult>,
}

/// Pure risk scorer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskScorer {
    pub weights: RiskWeights,
    pub thresholds: RiskThresholds,
}

impl RiskScorer {
    pub fn new(weights: RiskWeights, thresholds: RiskThresholds) -> Self {
        Self {
            weights,
            thresholds,
        }
    }

    /// Score one app.
    pub fn score(&self, input: &RiskInput) -> RiskResult {
        let w = &self.weights;
        let mut factors = Vec::with_capacity(7);

        factors.push(match input.managed_state {
            ManagedState::Unmanaged => RiskFactorResult::new(
                "baseline",
                w.unmanaged_baseline,
                "not governed by a healthy connector",
            ),
            ManagedState::Managed => {
                RiskFactorResult::new("baseline", w.managed_baseline, "governed by a connector")
            }
        });

        if input.has_privileged_scope {
            factors.push(RiskFactorResult::new(
                "privileged_scope",
                w.privileged_scope,
                "privileged scopes or grants observed",
            ));
        }
        if input.has_confidential_scope {
            factors.push(RiskFactorResult::new(
                "confidential_scope",
                w.confidential_scope,
                "confidential-data scopes observed",
            ));
        }
        if !input.has_owner {
            factors.push(RiskFactorResult::new(
                "no_owner",
                w.no_owner,
                "no owner assigned",
            ));
        }

        factors.push(RiskFactorResult::new(
            "actors_30d",
            w.actor_points(input.actors_30d),
            format!("{} distinct actors in the last 30 days", input.actors_30d),
        ));
        factors.push(RiskFactorResult::new(
            "business_criticality",
            w.criticality_points(input.business_criticality),
            format!("{} business criticality", input.business_criticality),
        ));
        factors.push(RiskFactorResult::new(
            "data_classification",
            w.classification_points(input.data_classification),
            format!("{} data", input.data_classification),
        ));

        factors.retain(|f| f.points > 0);

        let total: u32 = factors.iter().map(|f| u32::from(f.points)).sum();
        let score = u8::try_from(total.min(u32::from(MAX_RISK_SCORE))).unwrap_or(MAX_RISK_SCORE);

        RiskResult {
            score,
            level: self.thresholds.level_for(score),
            factors,
        }
    }
}

/// Default criticality when no administrator override exists.
pub fn suggested_business_criticality(
    actors_30d: u32,
    has_privileged_scope: bool,
) -> BusinessCriticality {
    if has_privileged_scope && actors_30d >= 25 {
        BusinessCriticality::Critical
    } else if has_privileged_scope || actors_30d >= 50 {
        BusinessCriticality::High
    } else if actors_30d >= 10 {
        BusinessCriticality::Medium
    } else {
        BusinessCriticality::Low
    }
}

/// Default classification when no administrator override exists.
pub fn suggested_data_classification(
    has_privileged_scope: bool,
    has_confidential_scope: bool,
) -> DataClassification {
    match (has_privileged_scope, has_confidential_scope) {
        (true, true) => DataClassification::Restricted,
        (false, true) => DataClassification::Confidential,
        _ => DataClassification::Internal,
    }
}

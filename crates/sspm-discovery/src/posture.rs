//! Managed/unmanaged posture classification.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::FreshnessPolicy;
use crate::types::ManagedState;

/// Why an app received its managed state. First matching rule wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostureReason {
    NoConnectorBinding,
    ConnectorNotConfigured,
    ConnectorDisabled,
    NeverSynced,
    SyncStale,
    ActivelySynced,
}

impl PostureReason {
    /// Human-readable reason persisted on the app row.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoConnectorBinding => "no connector binding",
            Self::ConnectorNotConfigured => "bound connector not configured",
            Self::ConnectorDisabled => "bound connector disabled",
            Self::NeverSynced => "connector has never completed a successful sync",
            Self::SyncStale => "bound connector sync is stale",
            Self::ActivelySynced => "actively synced by a configured, enabled connector",
        }
    }

    pub fn managed_state(&self) -> ManagedState {
        match self {
            Self::ActivelySynced => ManagedState::Managed,
            _ => ManagedState::Unmanaged,
        }
    }
}

impl std::fmt::Display for PostureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs for one classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostureInput {
    pub has_primary_binding: bool,
    pub connector_configured: bool,
    pub connector_enabled: bool,
    pub last_successful_sync: Option<DateTime<Utc>>,
    pub freshness_window: Duration,
    pub now: DateTime<Utc>,
}

/// Managed state plus the rule that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostureResult {
    pub state: ManagedState,
    pub reason: PostureReason,
}

impl From<PostureReason> for PostureResult {
    fn from(reason: PostureReason) -> Self {
        Self {
            state: reason.managed_state(),
            reason,
        }
    }
}

/// Classify an app's managed state.
pub fn classify_managed_state(input: &PostureInput) -> PostureResult {
    let reason = if !input.has_primary_binding {
        PostureReason::NoConnectorBinding
    } else if !input.connector_configured {
        PostureReason::ConnectorNotConfigured
    } else if !input.connector_enabled {
        PostureReason::ConnectorDisabled
    } else {
        match input.last_successful_sync {
            None => PostureReason::NeverSynced,
            Some(last) if input.now - last > input.freshness_window => PostureReason::SyncStale,
            Some(_) => PostureReason::ActivelySynced,
        }
    };
    reason.into()
}

/// Freshness window for a sync interval under the default policy.
pub fn freshness_window(sync_interval: Duration) -> Duration {
    FreshnessPolicy::default().window(sync_interval)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy_input(now: DateTime<Utc>) -> PostureInput {
        PostureInput {
            has_primary_binding: true,
            connector_configured: true,
            connector_enabled: true,
            last_successful_sync: Some(now - Duration::minutes(5)),
            freshness_window: Duration::minutes(30),
            now,
        }
    }

    #[test]
    fn test_actively_synced_is_managed() {
        let now = Utc::now();
        let result = classify_managed_state(&healthy_input(now));
        assert_eq!(result.state, ManagedState::Managed);
        assert_eq!(result.reason.as_str(), "actively synced by a configured, enabled connector");
    }

    #[test]
    fn test_no_binding_wins_over_everything() {
        let now = Utc::now();
        let input = PostureInput {
            has_primary_binding: false,
            ..healthy_input(now)
        };
        let result = classify_managed_state(&input);
        assert_eq!(result.state, ManagedState::Unmanaged);
        assert_eq!(result.reason.as_str(), "no connector binding");
    }

    #[test]
    fn test_decision_order() {
        let now = Utc::now();
        let input = PostureInput {
            connector_configured: false,
            connector_enabled: false,
            last_successful_sync: None,
            ..healthy_input(now)
        };
        assert_eq!(classify_managed_state(&input).reason, PostureReason::ConnectorNotConfigured);

        let input = PostureInput {
            connector_enabled: false,
            last_successful_sync: None,
            ..healthy_input(now)
        };
        assert_eq!(classify_managed_state(&input).reason, PostureReason::ConnectorDisabled);

        let input = PostureInput {
            last_successful_sync: None,
            ..healthy_input(now)
        };
        assert_eq!(
            classify_managed_state(&input).reason.to_string(),
            "connector has never completed a successful sync"
        );
    }

    #[test]
    fn test_stale_boundary() {
        let now = Utc::now();
        let at_edge = PostureInput {
            last_successful_sync: Some(now - Duration::minutes(30)),
            ..healthy_input(now)
        };
        assert_eq!(classify_managed_state(&at_edge).state, ManagedState::Managed);

        let past_edge = PostureInput {
            last_successful_sync: Some(now - Duration::minutes(31)),
            ..healthy_input(now)
        };
        let result = classify_managed_state(&past_edge);
        assert_eq!(result.state, ManagedState::Unmanaged);
        assert_eq!(result.reason.as_str(), "bound connector sync is stale");
    }

    #[test]
    fn test_freshness_window_defaults() {
        assert_eq!(freshness_window(Duration::minutes(15)), Duration::minutes(30));
        assert_eq!(freshness_window(Duration::minutes(60)), Duration::minutes(120));
    }
}

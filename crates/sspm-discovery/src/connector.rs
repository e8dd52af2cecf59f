//! Connector catalog and runtime registry.
//!
//! Each connector kind has a fixed set of capabilities (display name, whether
//! it syncs at all, default sync interval). Capabilities live in a lookup
//! table indexed by kind so adding a connector is one enum variant plus one
//! table row.

use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{DiscoveryError, Result};
use crate::types::SourceKey;

/// Identity or SaaS provider a connector pulls evidence from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorKind {
    Okta,
    Entra,
    Github,
    Datadog,
    AwsIdentityCenter,
    GoogleWorkspace,
    Vault,
}

/// Static capabilities of a connector kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectorCapabilities {
    pub kind: ConnectorKind,
    pub display_name: &'static str,
    /// Whether the connector runs sync jobs at all. Static secret stores do not.
    pub syncable: bool,
    /// Default sync interval in minutes (0 when not syncable).
    pub default_sync_interval_minutes: i64,
}

// Row order must match the `ConnectorKind` declaration order.
const CATALOG: [ConnectorCapabilities; 7] = [
    ConnectorCapabilities {
        kind: ConnectorKind::Okta,
        display_name: "Okta",
        syncable: true,
        default_sync_interval_minutes: 15,
    },
    ConnectorCapabilities {
        kind: ConnectorKind::Entra,
        display_name: "Microsoft Entra ID",
        syncable: true,
        default_sync_interval_minutes: 15,
    },
    ConnectorCapabilities {
        kind: ConnectorKind::Github,
        display_name: "GitHub",
        syncable: true,
        default_sync_interval_minutes: 30,
    },
    ConnectorCapabilities {
        kind: ConnectorKind::Datadog,
        display_name: "Datadog",
        syncable: true,
        default_sync_interval_minutes: 60,
    },
    ConnectorCapabilities {
        kind: ConnectorKind::AwsIdentityCenter,
        display_name: "AWS IAM Identity Center",
        syncable: true,
        default_sync_interval_minutes: 60,
    },
    ConnectorCapabilities {
        kind: ConnectorKind::GoogleWorkspace,
        display_name: "Google Workspace",
        syncable: true,
        default_sync_interval_minutes: 30,
    },
    ConnectorCapabilities {
        kind: ConnectorKind::Vault,
        display_name: "Secrets Vault",
        syncable: false,
        default_sync_interval_minutes: 0,
    },
];

impl ConnectorKind {
    /// All connector kinds, in catalog order.
    #[must_use]
    pub fn all() -> &'static [ConnectorKind] {
        &[
            ConnectorKind::Okta,
            ConnectorKind::Entra,
            ConnectorKind::Github,
            ConnectorKind::Datadog,
            ConnectorKind::AwsIdentityCenter,
            ConnectorKind::GoogleWorkspace,
            ConnectorKind::Vault,
        ]
    }

    /// String representation used in storage and metric labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorKind::Okta => "okta",
            ConnectorKind::Entra => "entra",
            ConnectorKind::Github => "github",
            ConnectorKind::Datadog => "datadog",
            ConnectorKind::AwsIdentityCenter => "aws_identity_center",
            ConnectorKind::GoogleWorkspace => "google_workspace",
            ConnectorKind::Vault => "vault",
        }
    }

    /// Catalog entry for this kind.
    #[must_use]
    pub fn capabilities(self) -> &'static ConnectorCapabilities {
        &CATALOG[self as usize]
    }

    /// Default sync interval, `None` for connectors that never sync.
    #[must_use]
    pub fn default_sync_interval(self) -> Option<Duration> {
        let caps = self.capabilities();
        (caps.syncable && caps.default_sync_interval_minutes > 0)
            .then(|| Duration::minutes(caps.default_sync_interval_minutes))
    }
}

impl fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConnectorKind {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "okta" => Ok(ConnectorKind::Okta),
            "entra" | "microsoft_entra" | "azure_ad" => Ok(ConnectorKind::Entra),
            "github" => Ok(ConnectorKind::Github),
            "datadog" => Ok(ConnectorKind::Datadog),
            "aws_identity_center" | "aws_sso" => Ok(ConnectorKind::AwsIdentityCenter),
            "google_workspace" | "google" => Ok(ConnectorKind::GoogleWorkspace),
            "vault" => Ok(ConnectorKind::Vault),
            _ => Err(DiscoveryError::UnknownConnectorKind(s.to_string())),
        }
    }
}

/// Read-only snapshot of one connector as reported by the runtime registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorRuntimeState {
    pub kind: ConnectorKind,
    pub display_name: String,
    pub enabled: bool,
    pub configured: bool,
    /// Tenant, org, or domain this connector represents.
    pub source_name: String,
    /// Operator-configured sync interval, if any.
    pub sync_interval: Option<Duration>,
}

impl ConnectorRuntimeState {
    /// Runtime state for a configured, enabled connector with catalog defaults.
    pub fn active(kind: ConnectorKind, source_name: impl Into<String>) -> Self {
        Self {
            kind,
            display_name: kind.capabilities().display_name.to_string(),
            enabled: true,
            configured: true,
            source_name: source_name.into(),
            sync_interval: None,
        }
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_configured(mut self, configured: bool) -> Self {
        self.configured = configured;
        self
    }

    #[must_use]
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// The (kind, source name) pair this connector reports evidence under.
    #[must_use]
    pub fn source_key(&self) -> SourceKey {
        SourceKey::new(self.kind, self.source_name.clone())
    }

    #[must_use]
    pub fn is_syncable(&self) -> bool {
        self.kind.capabilities().syncable
    }

    /// Configured interval when positive, else the catalog default, else zero.
    #[must_use]
    pub fn effective_sync_interval(&self) -> Duration {
        self.sync_interval
            .filter(|interval| *interval > Duration::zero())
            .or_else(|| self.kind.default_sync_interval())
            .unwrap_or_else(Duration::zero)
    }
}

/// Source of connector runtime snapshots.
#[async_trait]
pub trait ConnectorRegistry: Send + Sync {
    /// Load the runtime state of every known connector.
    async fn load_states(&self) -> Result<Vec<ConnectorRuntimeState>>;
}

/// In-memory registry for tests and embedded use.
#[derive(Debug, Default)]
pub struct InMemoryConnectorRegistry {
    states: RwLock<Vec<ConnectorRuntimeState>>,
}

impl InMemoryConnectorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with the given states.
    #[must_use]
    pub fn with_states(states: Vec<ConnectorRuntimeState>) -> Self {
        Self {
            states: RwLock::new(states),
        }
    }

    /// Insert or replace the state for a connector kind.
    pub fn upsert(&self, state: ConnectorRuntimeState) {
        let mut states = self.states.write().unwrap_or_else(|e| e.into_inner());
        states.retain(|s| s.kind != state.kind);
        states.push(state);
    }

    /// Remove a connector kind from the registry.
    pub fn remove(&self, kind: ConnectorKind) {
        self.states
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|s| s.kind != kind);
    }
}

#[async_trait]
impl ConnectorRegistry for InMemoryConnectorRegistry {
    async fn load_states(&self) -> Result<Vec<ConnectorRuntimeState>> {
        Ok(self
            .states
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }
}

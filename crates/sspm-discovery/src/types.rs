//! Type definitions for the discovery domain.
//!
//! Includes newtype wrappers for IDs, governance enums, and the row shapes
//! exchanged with the evidence repository.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::connector::ConnectorKind;
use crate::error::Result;

// ============================================================================
// ID Types (Newtype Pattern)
// ============================================================================

/// Unique identifier for a discovered SaaS application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SaasAppId(pub Uuid);

impl SaasAppId {
    /// Create a new random SaasAppId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for SaasAppId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SaasAppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SaasAppId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<SaasAppId> for Uuid {
    fn from(id: SaasAppId) -> Self {
        id.0
    }
}

/// Unique identifier for a connector binding row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BindingId(pub Uuid);

impl BindingId {
    /// Create a new random BindingId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for BindingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for BindingId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

// ============================================================================
// Governance enums
// ============================================================================

/// Governance state of a discovered application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagedState {
    /// Actively synced by a configured, enabled connector.
    Managed,
    /// No healthy connector claims the application.
    #[default]
    Unmanaged,
}

impl ManagedState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Managed => "managed",
            Self::Unmanaged => "unmanaged",
        }
    }
}

impl fmt::Display for ManagedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ManagedState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "managed" => Ok(Self::Managed),
            "unmanaged" => Ok(Self::Unmanaged),
            _ => Err(format!("Unknown managed state: {s}")),
        }
    }
}

/// Risk level bucket derived from the numeric risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// High and critical apps feed the hotspot gauge.
    pub fn is_elevated(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Unknown risk level: {s}")),
        }
    }
}

/// Where a binding came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingOrigin {
    /// Created by automatic evidence correlation.
    Auto,
    /// Created by an administrator override. Never replaced by `Auto`.
    Manual,
}

impl BindingOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for BindingOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BindingOrigin {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            _ => Err(format!("Unknown binding origin: {s}")),
        }
    }
}

/// Business criticality of an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusinessCriticality {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl BusinessCriticality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for BusinessCriticality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BusinessCriticality {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Unknown business criticality: {s}")),
        }
    }
}

/// Sensitivity of the data an application handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataClassification {
    Public,
    #[default]
    Internal,
    Confidential,
    Restricted,
}

impl DataClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Internal => "internal",
            Self::Confidential => "confidential",
            Self::Restricted => "restricted",
        }
    }
}

impl fmt::Display for DataClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DataClassification {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "internal" => Ok(Self::Internal),
            "confidential" => Ok(Self::Confidential),
            "restricted" => Ok(Self::Restricted),
            _ => Err(format!("Unknown data classification: {s}")),
        }
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A connector source: connector kind plus the tenant/org/domain it represents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceKey {
    pub connector_kind: ConnectorKind,
    pub source_name: String,
}

impl SourceKey {
    pub fn new(connector_kind: ConnectorKind, source_name: impl Into<String>) -> Self {
        Self {
            connector_kind,
            source_name: source_name.into(),
        }
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.connector_kind, self.source_name)
    }
}

/// A deduplicated application identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaasApp {
    pub id: SaasAppId,
    /// Stable dedup key (normalised domain).
    pub canonical_key: String,
    pub display_name: String,
    pub primary_domain: Option<String>,
    pub vendor_name: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub managed_state: ManagedState,
    pub managed_reason: String,
    /// Source whose primary binding classified the app in the last pass.
    pub bound_source: Option<SourceKey>,
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub suggested_criticality: Option<BusinessCriticality>,
    pub suggested_classification: Option<DataClassification>,
}

/// A claim that a connector source has produced evidence for an app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaasAppBinding {
    pub id: BindingId,
    pub app_id: SaasAppId,
    pub source: SourceKey,
    pub origin: BindingOrigin,
    /// Correlation confidence in [0, 1].
    pub confidence: f64,
    pub is_primary: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for the binding upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertBinding {
    pub app_id: SaasAppId,
    pub source: SourceKey,
    pub origin: BindingOrigin,
    pub confidence: f64,
    pub is_primary: bool,
    pub created_by: Option<Uuid>,
}

impl UpsertBinding {
    /// An automatic correlation claim.
    pub fn auto(app_id: SaasAppId, source: SourceKey, confidence: f64) -> Self {
        Self {
            app_id,
            source,
            origin: BindingOrigin::Auto,
            confidence,
            is_primary: false,
            created_by: None,
        }
    }

    /// An administrator override: full confidence and primary.
    pub fn manual(app_id: SaasAppId, source: SourceKey, actor_id: Option<Uuid>) -> Self {
        Self {
            app_id,
            source,
            origin: BindingOrigin::Manual,
            confidence: 1.0,
            is_primary: true,
            created_by: actor_id,
        }
    }
}

/// What a binding upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// An auto upsert found a manual binding on the tuple and left it alone.
    SkippedManual,
}

/// Administrator-entered governance metadata for one app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceOverride {
    pub app_id: SaasAppId,
    pub owner_id: Option<Uuid>,
    pub business_criticality: Option<BusinessCriticality>,
    pub data_classification: Option<DataClassification>,
    pub notes: Option<String>,
    pub updated_by: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl GovernanceOverride {
    /// Empty override for an app.
    pub fn new(app_id: SaasAppId) -> Self {
        Self {
            app_id,
            owner_id: None,
            business_criticality: None,
            data_classification: None,
            notes: None,
            updated_by: None,
            updated_at: Utc::now(),
        }
    }
}

/// Evidence that a connector source has seen an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSighting {
    pub source: SourceKey,
    pub domain: String,
    pub display_name: String,
    pub vendor_name: Option<String>,
    pub confidence: f64,
    pub seen_at: DateTime<Utc>,
}

/// Aggregated usage evidence for one app.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSignals {
    pub has_privileged_scope: bool,
    pub has_confidential_scope: bool,
    pub actors_30d: u32,
}

/// Everything the driver needs to classify one app, loaded in one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostureInputRow {
    pub app_id: SaasAppId,
    pub display_name: String,
    /// Raw connector kind of the primary binding, as stored.
    pub bound_connector_kind: Option<String>,
    pub bound_source_name: Option<String>,
    pub signals: UsageSignals,
    pub owner_id: Option<Uuid>,
    pub override_criticality: Option<BusinessCriticality>,
    pub override_classification: Option<DataClassification>,
}

impl PostureInputRow {
    /// Parse the primary binding's source.
    ///
    /// Fails with `UnknownConnectorKind` when the stored kind is no longer in
    /// the catalog.
    pub fn bound_source(&self) -> Result<Option<SourceKey>> {
        match (&self.bound_connector_kind, &self.bound_source_name) {
            (Some(kind), Some(name)) => {
                let kind: ConnectorKind = kind.parse()?;
                Ok(Some(SourceKey::new(kind, name.clone())))
            }
            _ => Ok(None),
        }
    }
}

/// Combined posture and risk write for one app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostureUpdate {
    pub app_id: SaasAppId,
    pub managed_state: ManagedState,
    pub managed_reason: String,
    pub bound_source: Option<SourceKey>,
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub suggested_criticality: BusinessCriticality,
    pub suggested_classification: DataClassification,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saas_app_id() {
        let id = SaasAppId::new();
        let uuid: Uuid = id.into();
        let back: SaasAppId = uuid.into();
        assert_eq!(id, back);
    }

    #[test]
    fn test_risk_level_display_and_parse() {
        assert_eq!(RiskLevel::Low.to_string(), "low");
        assert_eq!(RiskLevel::Critical.to_string(), "critical");
        assert_eq!("HIGH".parse::<RiskLevel>().unwrap(), RiskLevel::High);
        assert!("severe".parse::<RiskLevel>().is_err());
    }

    #[test]
    fn test_risk_level_elevated() {
        assert!(!RiskLevel::Low.is_elevated());
        assert!(!RiskLevel::Medium.is_elevated());
        assert!(RiskLevel::High.is_elevated());
        assert!(RiskLevel::Critical.is_elevated());
    }

    #[test]
    fn test_binding_origin_serialization() {
        let json = serde_json::to_string(&BindingOrigin::Manual).unwrap();
        assert_eq!(json, "\"manual\"");
        assert_eq!("auto".parse::<BindingOrigin>().unwrap(), BindingOrigin::Auto);
    }

    #[test]
    fn test_manual_upsert_defaults() {
        let app_id = SaasAppId::new();
        let input = UpsertBinding::manual(app_id, SourceKey::new(ConnectorKind::Github, "acme"), None);
        assert_eq!(input.origin, BindingOrigin::Manual);
        assert_eq!(input.confidence, 1.0);
        assert!(input.is_primary);
    }

    #[test]
    fn test_source_key_display() {
        let key = SourceKey::new(ConnectorKind::Github, "acme");
        assert_eq!(key.to_string(), "github:acme");
    }

    #[test]
    fn test_posture_row_bound_source() {
        let mut row = PostureInputRow {
            app_id: SaasAppId::new(),
            display_name: "Notion".into(),
            bound_connector_kind: Some("okta".into()),
            bound_source_name: Some("acme.okta.com".into()),
            signals: UsageSignals::default(),
            owner_id: None,
            override_criticality: None,
            override_classification: None,
        };
        assert_eq!(
            row.bound_source().unwrap(),
            Some(SourceKey::new(ConnectorKind::Okta, "acme.okta.com"))
        );

        row.bound_connector_kind = Some("lotus_notes".into());
        assert!(row.bound_source().unwrap_err().is_record_scoped());

        row.bound_connector_kind = None;
        assert_eq!(row.bound_source().unwrap(), None);
    }
}

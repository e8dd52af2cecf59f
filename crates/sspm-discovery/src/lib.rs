//! Discovery and access-governance reconciliation engine.
//!
//! This crate decides, for every discovered SaaS application, which connector
//! source owns it, whether it is managed, how risky it is, and how healthy the
//! connectors feeding that decision are.
//!
//! # Components
//!
//! - [`binding`] - connector bindings and primary-binding arbitration
//! - [`posture`] - managed/unmanaged classification with a reason
//! - [`risk`] - numeric risk score and level
//! - [`health`] - connector health from sync-run history
//! - [`driver`] - one full reconciliation pass over every app
//! - [`service`] - administrator mutations and sighting ingestion
//!
//! Storage is reached through [`store::DiscoveryRepository`] and
//! [`binding::BindingStore`]; in-memory implementations live beside the
//! traits, PostgreSQL ones in `sspm-db`.
//!
//! # Audit
//!
//! The [`audit`] module records administrator changes:
//! - [`audit::BindingAuditStore`] trait for pluggable storage backends
//! - [`audit::InMemoryBindingAuditStore`] for testing

pub mod audit;
pub mod binding;
pub mod config;
pub mod connector;
pub mod correlation;
pub mod driver;
pub mod error;
mod guard;
pub mod health;
pub mod metrics;
pub mod posture;
pub mod risk;
pub mod service;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use error::{DiscoveryError, Result};
pub use types::{
    AppSighting, BindingId, BindingOrigin, BusinessCriticality, DataClassification,
    GovernanceOverride, ManagedState, PostureInputRow, PostureUpdate, RiskLevel, SaasApp,
    SaasAppBinding, SaasAppId, SourceKey, UpsertBinding, UpsertOutcome, UsageSignals,
};

pub use binding::{select_primary, validate_confidence, BindingResolver, BindingStore};
pub use config::{DiscoveryConfig, FailurePolicy, FreshnessPolicy, RiskConfig, StalenessPolicy};
pub use connector::{
    ConnectorCapabilities, ConnectorKind, ConnectorRegistry, ConnectorRuntimeState,
    InMemoryConnectorRegistry,
};
pub use correlation::canonical_app_key;
pub use driver::{AppFailure, PassReport, ReconciliationDriver};
pub use health::{
    evaluate_health, format_age, stale_after, ConnectorHealthMonitor, ConnectorHealthReport,
    HealthInput, HealthOverview, HealthResult, HealthStatus, HealthSummary, SyncRun,
    SyncRunRollup, SyncRunStatus,
};
pub use metrics::{
    DiscoveryGauge, GaugePublisher, InMemoryMetricsSink, MetricsSink, PrometheusMetricsSink,
};
pub use posture::{classify_managed_state, freshness_window, PostureInput, PostureReason, PostureResult};
pub use risk::{
    suggested_business_criticality, suggested_data_classification, RiskFactorResult, RiskInput,
    RiskResult, RiskScorer, RiskThresholds, RiskWeights,
};
pub use service::{BindingChange, DiscoveryService, DiscoveryServiceDeps, SightingOutcome};
pub use store::{DiscoveryRepository, InMemoryDiscoveryStore};

// Re-export audit types
pub use audit::{
    BindingAuditAction, BindingAuditEvent, BindingAuditStore, InMemoryBindingAuditStore,
};

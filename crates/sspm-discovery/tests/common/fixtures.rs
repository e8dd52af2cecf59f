//! Test fixtures factory for integration tests.

use chrono::{DateTime, Utc};
use sspm_discovery::metrics::{labels, GaugeLabels};
use sspm_discovery::{
    AppSighting, ConnectorKind, ManagedState, RiskLevel, SaasApp, SaasAppId, SourceKey,
};

use super::TestContext;

pub const OKTA_TENANT: &str = "acme.okta.com";
pub const GITHUB_ORG: &str = "acme";

pub fn okta() -> SourceKey {
    SourceKey::new(ConnectorKind::Okta, OKTA_TENANT)
}

pub fn github() -> SourceKey {
    SourceKey::new(ConnectorKind::Github, GITHUB_ORG)
}

/// A sighting of `domain` reported by `source`.
pub fn sighting(source: SourceKey, domain: &str, confidence: f64) -> AppSighting {
    AppSighting {
        source,
        domain: domain.to_string(),
        display_name: domain.split('.').next().unwrap_or(domain).to_string(),
        vendor_name: None,
        confidence,
        seen_at: Utc::now(),
    }
}

/// An app with no bindings at all.
pub fn unbound_app(canonical_key: &str) -> SaasApp {
    let now = Utc::now();
    SaasApp {
        id: SaasAppId::new(),
        canonical_key: canonical_key.to_string(),
        display_name: canonical_key.to_string(),
        primary_domain: Some(canonical_key.to_string()),
        vendor_name: None,
        first_seen_at: now,
        last_seen_at: now,
        managed_state: ManagedState::Unmanaged,
        managed_reason: String::new(),
        bound_source: None,
        risk_score: 0,
        risk_level: RiskLevel::Low,
        suggested_criticality: None,
        suggested_classification: None,
    }
}

/// Record a sighting through the service and return the app.
pub async fn seed_sighting(
    ctx: &TestContext,
    source: SourceKey,
    domain: &str,
    confidence: f64,
) -> SaasApp {
    ctx.service
        .record_sighting(&sighting(source, domain, confidence), &ctx.cancel)
        .await
        .expect("Failed to record sighting")
        .app
}

/// Mark `source` as having synced successfully at `at`.
pub fn synced_at(ctx: &TestContext, source: SourceKey, at: DateTime<Utc>) {
    ctx.stores.discovery.record_successful_sync(source, at);
}

pub fn app_gauge_labels(source: &SourceKey, state: ManagedState) -> GaugeLabels {
    labels([
        ("connector_kind", source.connector_kind.as_str()),
        ("source_name", source.source_name.as_str()),
        ("managed_state", state.as_str()),
    ])
}

pub fn risk_gauge_labels(source: &SourceKey, level: RiskLevel) -> GaugeLabels {
    labels([
        ("connector_kind", source.connector_kind.as_str()),
        ("source_name", source.source_name.as_str()),
        ("risk_level", level.as_str()),
    ])
}

//! Administrator and ingestion surface over the engine.
//!
//! Administrator mutations are sequenced as: write, recompute primary, audit
//! event, full reconciliation pass. Each store write is its own atomic step,
//! so a caller never observes a half-updated binding set, and a failed pass
//! never leaves a stored change without its audit record.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::audit::{BindingAuditAction, BindingAuditEvent, BindingAuditEventInput, BindingAuditFilter, BindingAuditStore};
use crate::binding::{validate_confidence, BindingResolver, BindingStore};
use crate::config::DiscoveryConfig;
use crate::connector::{ConnectorKind, ConnectorRegistry};
use crate::correlation::canonical_app_key;
use crate::driver::{PassReport, ReconciliationDriver};
use crate::error::{DiscoveryError, Result};
use crate::guard::guarded;
use crate::health::{ConnectorHealthMonitor, HealthOverview};
use crate::metrics::{GaugePublisher, MetricsSink};
use crate::store::DiscoveryRepository;
use crate::types::{
    AppSighting, GovernanceOverride, SaasApp, SaasAppBinding, SaasAppId, SourceKey, UpsertBinding,
    UpsertOutcome,
};

/// Result of an administrator binding change.
#[derive(Debug, Clone)]
pub struct BindingChange {
    /// Primary binding after the change.
    pub primary: Option<SaasAppBinding>,
    pub pass: PassReport,
}

/// Result of recording one sighting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SightingOutcome {
    pub app: SaasApp,
    pub binding: UpsertOutcome,
    pub primary: Option<SaasAppBinding>,
}

/// Collaborators for a [`DiscoveryService`].
pub struct DiscoveryServiceDeps {
    pub registry: Arc<dyn ConnectorRegistry>,
    pub repository: Arc<dyn DiscoveryRepository>,
    pub bindings: Arc<dyn BindingStore>,
    pub audit: Arc<dyn BindingAuditStore>,
    pub metrics: Arc<dyn MetricsSink>,
}

/// Entry point used by the presentation layer and ingestion jobs.
pub struct DiscoveryService {
    repository: Arc<dyn DiscoveryRepository>,
    resolver: BindingResolver,
    driver: ReconciliationDriver,
    health: ConnectorHealthMonitor,
    audit: Arc<dyn BindingAuditStore>,
    config: DiscoveryConfig,
}

impl DiscoveryService {
    pub fn new(deps: DiscoveryServiceDeps, config: DiscoveryConfig) -> Self {
        let gauges = Arc::new(GaugePublisher::new(deps.metrics));
        Self {
            driver: ReconciliationDriver::new(
                deps.registry.clone(),
                deps.repository.clone(),
                gauges.clone(),
                config.clone(),
            ),
            health: ConnectorHealthMonitor::new(
                deps.registry,
                deps.repository.clone(),
                gauges,
                config.clone(),
            ),
            repository: deps.repository,
            resolver: BindingResolver::new(deps.bindings),
            audit: deps.audit,
            config,
        }
    }

    pub fn driver(&self) -> &ReconciliationDriver {
        &self.driver
    }

    async fn guard<T>(
        &self,
        cancel: &CancellationToken,
        operation: &'static str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        guarded(cancel, self.config.repository_timeout(), operation, call).await
    }

    async fn require_app(&self, app_id: SaasAppId, cancel: &CancellationToken) -> Result<SaasApp> {
        self.guard(cancel, "get app", self.repository.get_app(app_id))
            .await?
            .ok_or(DiscoveryError::AppNotFound(app_id))
    }

    async fn bindings_snapshot(
        &self,
        app_id: SaasAppId,
        cancel: &CancellationToken,
    ) -> Result<Option<serde_json::Value>> {
        let bindings = self
            .guard(cancel, "list bindings", self.resolver.list_bindings(app_id))
            .await?;
        Ok(serde_json::to_value(bindings).ok())
    }

    /// Run one full reconciliation pass.
    pub async fn recompute_posture(&self, cancel: &CancellationToken) -> Result<PassReport> {
        self.driver.run_pass(cancel).await
    }

    /// Pin an app to a connector source.
    #[instrument(skip(self, cancel), fields(app_id = %app_id, connector_kind = %kind))]
    pub async fn set_manual_binding(
        &self,
        app_id: SaasAppId,
        kind: ConnectorKind,
        source_name: &str,
        actor_id: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<BindingChange> {
        self.require_app(app_id, cancel).await?;
        let before = self.bindings_snapshot(app_id, cancel).await?;

        let input = UpsertBinding::manual(app_id, SourceKey::new(kind, source_name), actor_id);
        self.guard(cancel, "pin manual binding", self.resolver.pin_manual_binding(&input))
            .await?;
        let primary = self
            .guard(cancel, "recompute primary", self.resolver.recompute_primary(app_id))
            .await?;

        self.audit
            .log_event(BindingAuditEventInput {
                app_id,
                action: BindingAuditAction::ManualBindingSet,
                actor_id,
                before_state: before,
                after_state: serde_json::to_value(&primary).ok(),
            })
            .await?;
        let pass = self.driver.run_pass(cancel).await?;

        info!(source_name, "Manual binding set");
        Ok(BindingChange { primary, pass })
    }

    /// Remove manual bindings and fall back to automatic arbitration.
    #[instrument(skip(self, cancel), fields(app_id = %app_id))]
    pub async fn reset_bindings(
        &self,
        app_id: SaasAppId,
        actor_id: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<BindingChange> {
        self.require_app(app_id, cancel).await?;
        let before = self.bindings_snapshot(app_id, cancel).await?;

        let removed = self
            .guard(
                cancel,
                "clear manual bindings",
                self.resolver.clear_manual_bindings(app_id),
            )
            .await?;
        let primary = self
            .guard(cancel, "recompute primary", self.resolver.recompute_primary(app_id))
            .await?;

        self.audit
            .log_event(BindingAuditEventInput {
                app_id,
                action: BindingAuditAction::ManualBindingsCleared,
                actor_id,
                before_state: before,
                after_state: serde_json::to_value(&primary).ok(),
            })
            .await?;
        let pass = self.driver.run_pass(cancel).await?;

        info!(removed, "Manual bindings reset");
        Ok(BindingChange { primary, pass })
    }

    /// Replace the governance override for an app.
    #[instrument(skip(self, input, cancel), fields(app_id = %input.app_id))]
    pub async fn set_governance_override(
        &self,
        input: GovernanceOverride,
        actor_id: Option<Uuid>,
        cancel: &CancellationToken,
    ) -> Result<PassReport> {
        self.require_app(input.app_id, cancel).await?;
        let before = self
            .guard(
                cancel,
                "get governance override",
                self.repository.get_governance_override(input.app_id),
            )
            .await?;

        let input = GovernanceOverride {
            updated_by: actor_id,
            updated_at: chrono::Utc::now(),
            ..input
        };
        self.guard(
            cancel,
            "upsert governance override",
            self.repository.upsert_governance_override(&input),
        )
        .await?;

        self.audit
            .log_event(BindingAuditEventInput {
                app_id: input.app_id,
                action: BindingAuditAction::GovernanceOverrideSet,
                actor_id,
                before_state: before.and_then(|b| serde_json::to_value(b).ok()),
                after_state: serde_json::to_value(&input).ok(),
            })
            .await?;
        let pass = self.driver.run_pass(cancel).await?;

        info!("Governance override set");
        Ok(pass)
    }

    /// Correlate one sighting into the inventory and claim it for the
    /// reporting source.
    #[instrument(skip(self, sighting, cancel), fields(source = %sighting.source, domain = %sighting.domain))]
    pub async fn record_sighting(
        &self,
        sighting: &AppSighting,
        cancel: &CancellationToken,
    ) -> Result<SightingOutcome> {
        let canonical_key = canonical_app_key(&sighting.domain)?;
        validate_confidence(sighting.confidence)?;

        let app = self
            .guard(cancel, "upsert app", self.repository.upsert_app(&canonical_key, sighting))
            .await?;
        let input = UpsertBinding::auto(app.id, sighting.source.clone(), sighting.confidence);
        let binding = self
            .guard(cancel, "upsert binding", self.resolver.upsert_binding(&input))
            .await?;
        let primary = self
            .guard(cancel, "recompute primary", self.resolver.recompute_primary(app.id))
            .await?;

        info!(app_id = %app.id, canonical_key = %canonical_key, ?binding, "Sighting recorded");
        Ok(SightingOutcome {
            app,
            binding,
            primary,
        })
    }

    /// Evaluate health for every registered connector.
    pub async fn connector_health(&self, cancel: &CancellationToken) -> Result<HealthOverview> {
        self.health.check(cancel).await
    }

    pub async fn get_app(&self, app_id: SaasAppId, cancel: &CancellationToken) -> Result<SaasApp> {
        self.require_app(app_id, cancel).await
    }

    pub async fn list_apps(&self, cancel: &CancellationToken) -> Result<Vec<SaasApp>> {
        self.guard(cancel, "list apps", self.repository.list_apps()).await
    }

    pub async fn list_bindings(
        &self,
        app_id: SaasAppId,
        cancel: &CancellationToken,
    ) -> Result<Vec<SaasAppBinding>> {
        self.guard(cancel, "list bindings", self.resolver.list_bindings(app_id))
            .await
    }

    /// Audit events for one app, most recent first.
    pub async fn audit_trail(&self, app_id: SaasAppId) -> Result<Vec<BindingAuditEvent>> {
        self.audit
            .query_events(BindingAuditFilter {
                app_id: Some(app_id),
                ..Default::default()
            })
            .await
    }
}

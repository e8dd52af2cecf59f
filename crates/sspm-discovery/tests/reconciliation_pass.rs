//! Integration tests for full reconciliation passes.

mod common;

use chrono::{Duration, Utc};
use sspm_discovery::{
    BindingStore, BusinessCriticality, ConnectorKind, ConnectorRuntimeState, DataClassification,
    DiscoveryConfig, DiscoveryError, DiscoveryGauge, FailurePolicy, GovernanceOverride,
    ManagedState, RiskLevel, SourceKey, UsageSignals,
};

use common::fixtures::{
    app_gauge_labels, github, okta, risk_gauge_labels, seed_sighting, synced_at, unbound_app,
    GITHUB_ORG, OKTA_TENANT,
};
use common::TestContext;

#[tokio::test]
async fn test_freshly_synced_app_is_managed() {
    let ctx = TestContext::new();
    ctx.connect(ConnectorKind::Okta, OKTA_TENANT);
    let app = seed_sighting(&ctx, okta(), "notion.so", 0.9).await;
    synced_at(&ctx, okta(), Utc::now() - Duration::minutes(10));

    let report = ctx.service.recompute_posture(&ctx.cancel).await.unwrap();
    assert_eq!(report.apps_total, 1);
    assert_eq!(report.managed, 1);
    assert!(report.is_clean());

    let app = ctx.service.get_app(app.id, &ctx.cancel).await.unwrap();
    assert_eq!(app.managed_state, ManagedState::Managed);
    assert_eq!(app.managed_reason, "actively synced by a configured, enabled connector");
    assert_eq!(app.bound_source, Some(okta()));
    assert_eq!(
        ctx.stores.metrics.get(
            DiscoveryGauge::DiscoveredApps,
            &app_gauge_labels(&okta(), ManagedState::Managed)
        ),
        Some(1)
    );
}

#[tokio::test]
async fn test_posture_reasons_follow_decision_order() {
    let ctx = TestContext::new();
    let now = Utc::now();

    // Bound to a source the registry does not report.
    let missing = seed_sighting(&ctx, github(), "figma.com", 0.9).await;

    // Bound to a disabled connector.
    ctx.stores.registry.upsert(
        ConnectorRuntimeState::active(ConnectorKind::Datadog, "acme-dd").with_enabled(false),
    );
    let disabled = seed_sighting(
        &ctx,
        SourceKey::new(ConnectorKind::Datadog, "acme-dd"),
        "datadoghq.com",
        0.9,
    )
    .await;

    // Bound to an enabled connector that never synced.
    ctx.connect(ConnectorKind::Entra, "acme.onmicrosoft.com");
    let never = seed_sighting(
        &ctx,
        SourceKey::new(ConnectorKind::Entra, "acme.onmicrosoft.com"),
        "office.com",
        0.9,
    )
    .await;

    // Bound to a connector whose last success is older than the window.
    ctx.connect(ConnectorKind::Okta, OKTA_TENANT);
    let stale = seed_sighting(&ctx, okta(), "zoom.us", 0.9).await;
    synced_at(&ctx, okta(), now - Duration::hours(3));

    // No binding at all.
    let unbound = unbound_app("miro.com");
    ctx.stores.discovery.insert_app(unbound.clone());

    let report = ctx.service.recompute_posture(&ctx.cancel).await.unwrap();
    assert_eq!(report.apps_total, 5);
    assert_eq!(report.unmanaged, 5);

    let expected = [
        (missing.id, "bound connector not configured"),
        (disabled.id, "bound connector disabled"),
        (never.id, "connector has never completed a successful sync"),
        (stale.id, "bound connector sync is stale"),
        (unbound.id, "no connector binding"),
    ];
    for (app_id, reason) in expected {
        let app = ctx.service.get_app(app_id, &ctx.cancel).await.unwrap();
        assert_eq!(app.managed_reason, reason, "app {}", app.canonical_key);
    }
    let missing = ctx.service.get_app(missing.id, &ctx.cancel).await.unwrap();
    assert_eq!(missing.bound_source, Some(github()));
}

#[tokio::test]
async fn test_app_without_primary_is_unmanaged_despite_healthy_binding() {
    let ctx = TestContext::new();
    ctx.connect(ConnectorKind::Github, GITHUB_ORG);
    let app = seed_sighting(&ctx, github(), "github.com", 0.9).await;
    synced_at(&ctx, github(), Utc::now());
    ctx.stores.discovery.set_primary(app.id, None).await.unwrap();

    ctx.service.recompute_posture(&ctx.cancel).await.unwrap();

    let app = ctx.service.get_app(app.id, &ctx.cancel).await.unwrap();
    assert_eq!(app.managed_state, ManagedState::Unmanaged);
    assert_eq!(app.managed_reason, "no connector binding");
    assert_eq!(app.bound_source, None);
}

#[tokio::test]
async fn test_risk_uses_override_over_suggestion() {
    let ctx = TestContext::new();
    ctx.connect(ConnectorKind::Okta, OKTA_TENANT);
    let app = seed_sighting(&ctx, okta(), "salesforce.com", 0.9).await;
    synced_at(&ctx, okta(), Utc::now());
    ctx.stores.discovery.set_usage_signals(
        app.id,
        UsageSignals {
            has_privileged_scope: true,
            has_confidential_scope: false,
            actors_30d: 3,
        },
    );

    ctx.service.recompute_posture(&ctx.cancel).await.unwrap();
    let before = ctx.service.get_app(app.id, &ctx.cancel).await.unwrap();
    // managed 10 + privileged 25 + no owner 10 + actors 3 + high 6 + internal 2
    assert_eq!(before.risk_score, 56);
    assert_eq!(before.risk_level, RiskLevel::High);
    assert_eq!(before.suggested_criticality, Some(BusinessCriticality::High));
    assert_eq!(before.suggested_classification, Some(DataClassification::Internal));

    let mut input = GovernanceOverride::new(app.id);
    input.owner_id = Some(ctx.actor_id);
    input.business_criticality = Some(BusinessCriticality::Low);
    input.data_classification = Some(DataClassification::Public);
    ctx.service
        .set_governance_override(input, Some(ctx.actor_id), &ctx.cancel)
        .await
        .unwrap();

    let after = ctx.service.get_app(app.id, &ctx.cancel).await.unwrap();
    // managed 10 + privileged 25 + actors 3
    assert_eq!(after.risk_score, 38);
    assert_eq!(after.risk_level, RiskLevel::Medium);
    // Suggestions are still stored for display.
    assert_eq!(after.suggested_criticality, Some(BusinessCriticality::High));
    assert_eq!(ctx.service.audit_trail(app.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_isolate_policy_records_failures_and_continues() {
    let ctx = TestContext::new();
    ctx.connect(ConnectorKind::Okta, OKTA_TENANT);
    let broken = seed_sighting(&ctx, okta(), "asana.com", 0.9).await;
    let healthy = seed_sighting(&ctx, okta(), "zoom.us", 0.9).await;
    ctx.stores.discovery.set_stored_bound_kind(broken.id, "salesforce");

    let report = ctx.service.recompute_posture(&ctx.cancel).await.unwrap();

    assert_eq!(report.apps_total, 2);
    assert_eq!(report.apps_reconciled, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].app_id, broken.id);
    assert!(matches!(
        report.failures[0].error,
        DiscoveryError::UnknownConnectorKind(_)
    ));

    let healthy = ctx.service.get_app(healthy.id, &ctx.cancel).await.unwrap();
    assert_eq!(healthy.managed_reason, "connector has never completed a successful sync");
}

#[tokio::test]
async fn test_repository_error_aborts_pass_under_isolate_policy() {
    let ctx = TestContext::new();
    ctx.connect(ConnectorKind::Okta, OKTA_TENANT);
    let first = seed_sighting(&ctx, okta(), "asana.com", 0.9).await;
    seed_sighting(&ctx, okta(), "zoom.us", 0.9).await;
    ctx.stores.discovery.fail_posture_updates_for(first.id);

    let err = ctx.service.recompute_posture(&ctx.cancel).await.unwrap_err();

    assert!(matches!(err, DiscoveryError::Repository(_)));
    assert_eq!(ctx.stores.discovery.posture_write_count(), 0);
    assert!(ctx.stores.metrics.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_hung_store_times_out_once() {
    let ctx = TestContext::new();
    ctx.connect(ConnectorKind::Okta, OKTA_TENANT);
    for i in 0..20 {
        seed_sighting(&ctx, okta(), &format!("app{i}.io"), 0.9).await;
    }
    ctx.stores.discovery.stall_posture_updates();

    let started = tokio::time::Instant::now();
    let err = ctx.service.recompute_posture(&ctx.cancel).await.unwrap_err();

    assert!(matches!(err, DiscoveryError::Timeout { operation: "update posture", .. }));
    assert!(started.elapsed() < std::time::Duration::from_secs(20));
    assert!(ctx.stores.metrics.is_empty());
}

#[tokio::test]
async fn test_abort_policy_stops_on_first_failure() {
    let config = DiscoveryConfig {
        failure_policy: FailurePolicy::AbortOnFirstError,
        ..DiscoveryConfig::default()
    };
    let ctx = TestContext::with_config(config);
    ctx.connect(ConnectorKind::Okta, OKTA_TENANT);
    // Passes visit apps in canonical key order.
    let first = seed_sighting(&ctx, okta(), "asana.com", 0.9).await;
    seed_sighting(&ctx, okta(), "zoom.us", 0.9).await;
    ctx.stores.discovery.fail_posture_updates_for(first.id);

    let err = ctx.service.recompute_posture(&ctx.cancel).await.unwrap_err();
    assert!(matches!(err, DiscoveryError::Repository(_)));
    assert_eq!(ctx.stores.discovery.posture_write_count(), 0);
    assert!(ctx.stores.metrics.is_empty());
}

#[tokio::test]
async fn test_cancelled_pass_publishes_nothing() {
    let ctx = TestContext::new();
    ctx.connect(ConnectorKind::Okta, OKTA_TENANT);
    seed_sighting(&ctx, okta(), "notion.so", 0.9).await;

    ctx.cancel.cancel();
    let err = ctx.service.recompute_posture(&ctx.cancel).await.unwrap_err();

    assert!(matches!(err, DiscoveryError::Cancelled));
    assert_eq!(ctx.stores.discovery.posture_write_count(), 0);
    assert!(ctx.stores.metrics.is_empty());
}

#[tokio::test]
async fn test_removed_source_gauges_are_zeroed() {
    let ctx = TestContext::new();
    ctx.connect(ConnectorKind::Okta, OKTA_TENANT);
    let app = seed_sighting(&ctx, okta(), "notion.so", 0.9).await;
    ctx.stores.discovery.set_usage_signals(
        app.id,
        UsageSignals {
            has_privileged_scope: true,
            has_confidential_scope: true,
            actors_30d: 200,
        },
    );

    ctx.service.recompute_posture(&ctx.cancel).await.unwrap();
    let unmanaged = app_gauge_labels(&okta(), ManagedState::Unmanaged);
    let critical = risk_gauge_labels(&okta(), RiskLevel::Critical);
    assert_eq!(ctx.stores.metrics.get(DiscoveryGauge::DiscoveredApps, &unmanaged), Some(1));
    assert_eq!(ctx.stores.metrics.get(DiscoveryGauge::HighRiskApps, &critical), Some(1));

    ctx.stores.registry.remove(ConnectorKind::Okta);
    let report = ctx.service.recompute_posture(&ctx.cancel).await.unwrap();

    assert_eq!(report.high_risk, 1);
    assert_eq!(ctx.stores.metrics.get(DiscoveryGauge::DiscoveredApps, &unmanaged), Some(0));
    assert_eq!(ctx.stores.metrics.get(DiscoveryGauge::HighRiskApps, &critical), Some(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_passes_converge() {
    let ctx = TestContext::new();
    ctx.connect(ConnectorKind::Okta, OKTA_TENANT);
    ctx.connect(ConnectorKind::Github, GITHUB_ORG);
    synced_at(&ctx, okta(), Utc::now());
    for domain in ["a.io", "b.io", "c.io", "d.io"] {
        seed_sighting(&ctx, okta(), domain, 0.8).await;
        seed_sighting(&ctx, github(), domain, 0.6).await;
    }

    let (first, second) = tokio::join!(
        ctx.service.recompute_posture(&ctx.cancel),
        ctx.service.recompute_posture(&ctx.cancel)
    );
    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first.managed, second.managed);
    assert_eq!(first.managed, 4);

    let apps = ctx.service.list_apps(&ctx.cancel).await.unwrap();
    assert_eq!(apps.len(), 4);
    assert!(apps.iter().all(|a| a.managed_state == ManagedState::Managed));

    let again = ctx.service.recompute_posture(&ctx.cancel).await.unwrap();
    let apps_again = ctx.service.list_apps(&ctx.cancel).await.unwrap();
    assert_eq!(again.managed, 4);
    assert_eq!(apps, apps_again);
}

//! Integration tests for binding arbitration and administrator overrides.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use sspm_discovery::{
    select_primary, BindingAuditAction, BindingOrigin, BindingResolver, BindingStore,
    ConnectorKind, ConnectorRegistry, ConnectorRuntimeState, DiscoveryConfig, DiscoveryError,
    DiscoveryService, DiscoveryServiceDeps, SaasAppId, UpsertBinding, UpsertOutcome,
};

use common::fixtures::{github, okta, seed_sighting, sighting, GITHUB_ORG, OKTA_TENANT};
use common::{TestContext, TestStores};

/// Registry whose backing store is down.
struct UnavailableRegistry;

#[async_trait]
impl ConnectorRegistry for UnavailableRegistry {
    async fn load_states(&self) -> sspm_discovery::Result<Vec<ConnectorRuntimeState>> {
        Err(DiscoveryError::Repository("connector registry unavailable".into()))
    }
}

#[tokio::test]
async fn test_manual_binding_survives_later_auto_upsert() {
    let ctx = TestContext::new();
    ctx.connect(ConnectorKind::Okta, OKTA_TENANT);
    let app = seed_sighting(&ctx, github(), "notion.so", 0.9).await;

    ctx.service
        .set_manual_binding(app.id, ConnectorKind::Okta, OKTA_TENANT, Some(ctx.actor_id), &ctx.cancel)
        .await
        .expect("Failed to set manual binding");

    let outcome = ctx
        .service
        .record_sighting(&sighting(okta(), "https://www.notion.so/", 0.1), &ctx.cancel)
        .await
        .unwrap();
    assert_eq!(outcome.binding, UpsertOutcome::SkippedManual);

    let bindings = ctx.service.list_bindings(app.id, &ctx.cancel).await.unwrap();
    let manual = bindings.iter().find(|b| b.source == okta()).unwrap();
    assert_eq!(manual.origin, BindingOrigin::Manual);
    assert_eq!(manual.confidence, 1.0);
    assert!(manual.is_primary);
    assert_eq!(bindings.iter().filter(|b| b.is_primary).count(), 1);
}

#[tokio::test]
async fn test_manual_upserts_are_last_writer_wins() {
    let ctx = TestContext::new();
    let app = seed_sighting(&ctx, github(), "linear.app", 0.5).await;
    let store = ctx.stores.discovery.clone();

    let first = UpsertBinding::manual(app.id, okta(), Some(ctx.actor_id));
    let second = UpsertBinding {
        created_by: None,
        ..UpsertBinding::manual(app.id, okta(), None)
    };
    assert_eq!(store.upsert_binding(&first).await.unwrap(), UpsertOutcome::Inserted);
    assert_eq!(store.upsert_binding(&second).await.unwrap(), UpsertOutcome::Updated);

    let bindings = store.list_bindings(app.id).await.unwrap();
    assert_eq!(bindings.iter().filter(|b| b.source == okta()).count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_auto_and_manual_upserts_keep_manual() {
    let ctx = TestContext::new();
    let app = seed_sighting(&ctx, github(), "figma.com", 0.5).await;
    let store: Arc<dyn BindingStore> = ctx.stores.discovery.clone();

    let mut handles = Vec::new();
    for i in 0..50_i32 {
        let store = store.clone();
        let input = if i == 25 {
            UpsertBinding::manual(app.id, okta(), None)
        } else {
            UpsertBinding::auto(app.id, okta(), f64::from(i) / 100.0)
        };
        handles.push(tokio::spawn(async move { store.upsert_binding(&input).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let binding = store
        .list_bindings(app.id)
        .await
        .unwrap()
        .into_iter()
        .find(|b| b.source == okta())
        .unwrap();
    assert_eq!(binding.origin, BindingOrigin::Manual);
    assert_eq!(binding.confidence, 1.0);
}

#[tokio::test]
async fn test_recompute_primary_is_idempotent() {
    let ctx = TestContext::new();
    let app = seed_sighting(&ctx, github(), "slack.com", 0.7).await;
    seed_sighting(&ctx, okta(), "slack.com", 0.7).await;

    let resolver = BindingResolver::new(ctx.stores.discovery.clone());
    let first = resolver.recompute_primary(app.id).await.unwrap().unwrap();
    let second = resolver.recompute_primary(app.id).await.unwrap().unwrap();

    assert_eq!(first.source, second.source);
    // Equal confidence and origin: "github" sorts before "okta".
    assert_eq!(first.source, github());
    let bindings = resolver.list_bindings(app.id).await.unwrap();
    assert_eq!(bindings.iter().filter(|b| b.is_primary).count(), 1);
}

#[tokio::test]
async fn test_reset_without_manual_binding_is_noop() {
    let ctx = TestContext::new();
    ctx.connect(ConnectorKind::Github, GITHUB_ORG);
    let app = seed_sighting(&ctx, github(), "datadoghq.com", 0.8).await;

    let change = ctx
        .service
        .reset_bindings(app.id, Some(ctx.actor_id), &ctx.cancel)
        .await
        .unwrap();

    let primary = change.primary.expect("auto primary should remain");
    assert_eq!(primary.source, github());
    assert_eq!(primary.origin, BindingOrigin::Auto);
    assert_eq!(primary.confidence, 0.8);

    let removed = ctx
        .stores
        .discovery
        .clear_manual_bindings(app.id)
        .await
        .unwrap();
    assert_eq!(removed, 0);
    let bindings = ctx.service.list_bindings(app.id, &ctx.cancel).await.unwrap();
    assert!(bindings[0].is_primary);
}

#[tokio::test]
async fn test_reset_restores_automatic_primary() {
    let ctx = TestContext::new();
    let app = seed_sighting(&ctx, github(), "notion.so", 0.8).await;
    ctx.service
        .set_manual_binding(app.id, ConnectorKind::Okta, OKTA_TENANT, None, &ctx.cancel)
        .await
        .unwrap();

    let change = ctx
        .service
        .reset_bindings(app.id, Some(ctx.actor_id), &ctx.cancel)
        .await
        .unwrap();

    assert_eq!(change.primary.unwrap().source, github());
    let bindings = ctx.service.list_bindings(app.id, &ctx.cancel).await.unwrap();
    assert_eq!(bindings.len(), 1);
    assert!(bindings.iter().all(|b| b.origin == BindingOrigin::Auto));
}

#[tokio::test]
async fn test_admin_changes_are_audited() {
    let ctx = TestContext::new();
    let app = seed_sighting(&ctx, github(), "notion.so", 0.8).await;

    ctx.service
        .set_manual_binding(app.id, ConnectorKind::Okta, OKTA_TENANT, Some(ctx.actor_id), &ctx.cancel)
        .await
        .unwrap();
    ctx.service
        .reset_bindings(app.id, Some(ctx.actor_id), &ctx.cancel)
        .await
        .unwrap();

    let events = ctx.service.audit_trail(app.id).await.unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.actor_id == Some(ctx.actor_id)));
    assert!(events
        .iter()
        .any(|e| e.action == BindingAuditAction::ManualBindingSet));
    let cleared = events
        .iter()
        .find(|e| e.action == BindingAuditAction::ManualBindingsCleared)
        .unwrap();
    assert!(cleared.before_state.is_some());
}

#[tokio::test]
async fn test_manual_binding_requires_known_app() {
    let ctx = TestContext::new();
    let err = ctx
        .service
        .set_manual_binding(SaasAppId::new(), ConnectorKind::Okta, OKTA_TENANT, None, &ctx.cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::AppNotFound(_)));
    assert_eq!(ctx.stores.audit.count().await, 0);
}

#[tokio::test]
async fn test_sighting_validation() {
    let ctx = TestContext::new();

    let err = ctx
        .service
        .record_sighting(&sighting(okta(), "notion.so", 1.5), &ctx.cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::InvalidConfidence(_)));

    let err = ctx
        .service
        .record_sighting(&sighting(okta(), "not a domain", 0.5), &ctx.cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::InvalidDomain(_)));

    assert!(ctx.service.list_apps(&ctx.cancel).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sightings_dedupe_on_canonical_key() {
    let ctx = TestContext::new();
    let a = seed_sighting(&ctx, okta(), "https://WWW.Notion.so/login", 0.6).await;
    let b = seed_sighting(&ctx, github(), "notion.so.", 0.9).await;

    assert_eq!(a.id, b.id);
    assert_eq!(a.canonical_key, "notion.so");
    let bindings = ctx.service.list_bindings(a.id, &ctx.cancel).await.unwrap();
    assert_eq!(bindings.len(), 2);
    let primary = bindings.iter().find(|b| b.is_primary).unwrap();
    assert_eq!(primary.source, github());
}

#[tokio::test]
async fn test_latest_manual_pin_replaces_earlier_pin() {
    let ctx = TestContext::new();
    let app = seed_sighting(&ctx, github(), "notion.so", 0.8).await;

    ctx.service
        .set_manual_binding(app.id, ConnectorKind::Github, GITHUB_ORG, None, &ctx.cancel)
        .await
        .unwrap();
    let change = ctx
        .service
        .set_manual_binding(app.id, ConnectorKind::Okta, OKTA_TENANT, None, &ctx.cancel)
        .await
        .unwrap();

    assert_eq!(change.primary.unwrap().source, okta());
    let bindings = ctx.service.list_bindings(app.id, &ctx.cancel).await.unwrap();
    let manual: Vec<_> = bindings
        .iter()
        .filter(|b| b.origin == BindingOrigin::Manual)
        .collect();
    assert_eq!(manual.len(), 1);
    assert_eq!(manual[0].source, okta());
    assert!(manual[0].is_primary);
    assert_eq!(bindings.iter().filter(|b| b.is_primary).count(), 1);
}

#[tokio::test]
async fn test_change_is_audited_when_pass_fails() {
    let stores = TestStores::new();
    let service = DiscoveryService::new(
        DiscoveryServiceDeps {
            registry: Arc::new(UnavailableRegistry),
            ..stores.deps()
        },
        DiscoveryConfig::default(),
    );
    let cancel = tokio_util::sync::CancellationToken::new();
    let app = service
        .record_sighting(&sighting(github(), "notion.so", 0.8), &cancel)
        .await
        .unwrap()
        .app;

    let err = service
        .set_manual_binding(app.id, ConnectorKind::Okta, OKTA_TENANT, None, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::Repository(_)));

    let bindings = service.list_bindings(app.id, &cancel).await.unwrap();
    let manual = bindings.iter().find(|b| b.source == okta()).unwrap();
    assert!(manual.is_primary);

    let events = service.audit_trail(app.id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, BindingAuditAction::ManualBindingSet);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_recomputes_leave_ranked_primary() {
    let ctx = TestContext::new();
    let app = seed_sighting(&ctx, github(), "miro.com", 0.4).await;
    let store: Arc<dyn BindingStore> = ctx.stores.discovery.clone();
    let resolver = BindingResolver::new(store.clone());

    let mut handles = Vec::new();
    for i in 0..20_i32 {
        let resolver = resolver.clone();
        let app_id = app.id;
        handles.push(tokio::spawn(async move {
            if i == 10 {
                resolver
                    .pin_manual_binding(&UpsertBinding::manual(app_id, okta(), None))
                    .await?;
            } else {
                resolver
                    .upsert_binding(&UpsertBinding::auto(app_id, github(), f64::from(i) / 40.0))
                    .await?;
            }
            resolver.recompute_primary(app_id).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let bindings = store.list_bindings(app.id).await.unwrap();
    let expected = select_primary(&bindings).unwrap().source.clone();
    assert_eq!(expected, okta());
    let primaries: Vec<_> = bindings.iter().filter(|b| b.is_primary).collect();
    assert_eq!(primaries.len(), 1);
    assert_eq!(primaries[0].source, expected);
}

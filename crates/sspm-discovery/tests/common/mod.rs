//! Common test utilities for sspm-discovery integration tests.
//!
//! All tests use in-memory stores for isolation and speed.

#![allow(dead_code)]

pub mod fixtures;

use std::sync::Arc;

use sspm_discovery::{
    ConnectorKind, ConnectorRuntimeState, DiscoveryConfig, DiscoveryService, DiscoveryServiceDeps,
    InMemoryBindingAuditStore, InMemoryConnectorRegistry, InMemoryDiscoveryStore,
    InMemoryMetricsSink,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// All the in-memory stores behind one service.
#[derive(Clone)]
pub struct TestStores {
    pub discovery: Arc<InMemoryDiscoveryStore>,
    pub registry: Arc<InMemoryConnectorRegistry>,
    pub audit: Arc<InMemoryBindingAuditStore>,
    pub metrics: Arc<InMemoryMetricsSink>,
}

impl TestStores {
    /// Create a new set of isolated test stores.
    pub fn new() -> Self {
        Self {
            discovery: Arc::new(InMemoryDiscoveryStore::new()),
            registry: Arc::new(InMemoryConnectorRegistry::new()),
            audit: Arc::new(InMemoryBindingAuditStore::new()),
            metrics: Arc::new(InMemoryMetricsSink::new()),
        }
    }

    pub fn deps(&self) -> DiscoveryServiceDeps {
        DiscoveryServiceDeps {
            registry: self.registry.clone(),
            repository: self.discovery.clone(),
            bindings: self.discovery.clone(),
            audit: self.audit.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl Default for TestStores {
    fn default() -> Self {
        Self::new()
    }
}

/// Test context containing stores, the service, and an administrator.
pub struct TestContext {
    pub stores: TestStores,
    pub service: DiscoveryService,
    pub actor_id: Uuid,
    pub cancel: CancellationToken,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(DiscoveryConfig::default())
    }

    pub fn with_config(config: DiscoveryConfig) -> Self {
        let stores = TestStores::new();
        let service = DiscoveryService::new(stores.deps(), config);
        Self {
            stores,
            service,
            actor_id: Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap(),
            cancel: CancellationToken::new(),
        }
    }

    /// Register a configured, enabled connector.
    pub fn connect(&self, kind: ConnectorKind, source_name: &str) {
        self.stores
            .registry
            .upsert(ConnectorRuntimeState::active(kind, source_name));
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

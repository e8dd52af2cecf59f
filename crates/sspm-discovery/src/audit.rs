//! Audit trail for administrator binding and governance changes.
//!
//! Every administrator mutation made through
//! [`DiscoveryService`](crate::DiscoveryService) records one event with the
//! state before and after the change.
//!
//! # Example
//!
//! ```rust,ignore
//! use sspm_discovery::audit::{BindingAuditAction, BindingAuditEventInput, BindingAuditStore, InMemoryBindingAuditStore};
//!
//! let store = InMemoryBindingAuditStore::new();
//! let event = store
//!     .log_event(BindingAuditEventInput {
//!         app_id,
//!         action: BindingAuditAction::ManualBindingSet,
//!         actor_id: Some(admin_id),
//!         ..Default::default()
//!     })
//!     .await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::types::SaasAppId;

/// Administrator action on an app's bindings or governance metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BindingAuditAction {
    /// A manual binding was created or overwritten.
    #[default]
    ManualBindingSet,
    /// All manual bindings for the app were removed.
    ManualBindingsCleared,
    /// The governance override row was replaced.
    GovernanceOverrideSet,
}

impl BindingAuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManualBindingSet => "manual_binding_set",
            Self::ManualBindingsCleared => "manual_bindings_cleared",
            Self::GovernanceOverrideSet => "governance_override_set",
        }
    }
}

impl std::fmt::Display for BindingAuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BindingAuditAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "manual_binding_set" => Ok(Self::ManualBindingSet),
            "manual_bindings_cleared" => Ok(Self::ManualBindingsCleared),
            "governance_override_set" => Ok(Self::GovernanceOverrideSet),
            _ => Err(format!("Unknown binding audit action: {s}")),
        }
    }
}

/// A recorded administrator change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingAuditEvent {
    pub id: Uuid,
    pub app_id: SaasAppId,
    pub action: BindingAuditAction,
    /// Administrator who made the change, if known.
    pub actor_id: Option<Uuid>,
    /// State before the change (JSON).
    pub before_state: Option<serde_json::Value>,
    /// State after the change (JSON).
    pub after_state: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// Input for creating an audit event.
#[derive(Debug, Clone, Default)]
pub struct BindingAuditEventInput {
    pub app_id: SaasAppId,
    pub action: BindingAuditAction,
    pub actor_id: Option<Uuid>,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
}

/// Filter for querying audit events.
#[derive(Debug, Clone, Default)]
pub struct BindingAuditFilter {
    pub app_id: Option<SaasAppId>,
    pub actor_id: Option<Uuid>,
    pub action: Option<BindingAuditAction>,
    /// Events at or after this time.
    pub from_date: Option<DateTime<Utc>>,
    /// Events at or before this time.
    pub to_date: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Trait for audit event storage backends.
#[async_trait::async_trait]
pub trait BindingAuditStore: Send + Sync {
    /// Log an audit event.
    async fn log_event(&self, input: BindingAuditEventInput) -> Result<BindingAuditEvent>;

    /// Query audit events, most recent first.
    async fn query_events(&self, filter: BindingAuditFilter) -> Result<Vec<BindingAuditEvent>>;
}

/// In-memory audit store for testing.
#[derive(Debug, Default)]
pub struct InMemoryBindingAuditStore {
    events: Arc<RwLock<HashMap<Uuid, BindingAuditEvent>>>,
}

impl InMemoryBindingAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the count of events in the store.
    pub async fn count(&self) -> usize {
        self.events.read().await.len()
    }
}

#[async_trait::async_trait]
impl BindingAuditStore for InMemoryBindingAuditStore {
    async fn log_event(&self, input: BindingAuditEventInput) -> Result<BindingAuditEvent> {
        let event = BindingAuditEvent {
            id: Uuid::new_v4(),
            app_id: input.app_id,
            action: input.action,
            actor_id: input.actor_id,
            before_state: input.before_state,
            after_state: input.after_state,
            timestamp: Utc::now(),
        };
        self.events.write().await.insert(event.id, event.clone());
        Ok(event)
    }

    async fn query_events(&self, filter: BindingAuditFilter) -> Result<Vec<BindingAuditEvent>> {
        let events = self.events.read().await;
        let mut results: Vec<_> = events
            .values()
            .filter(|e| filter.app_id.is_none_or(|id| e.app_id == id))
            .filter(|e| filter.actor_id.is_none_or(|id| e.actor_id == Some(id)))
            .filter(|e| filter.action.is_none_or(|a| e.action == a))
            .filter(|e| filter.from_date.is_none_or(|d| e.timestamp >= d))
            .filter(|e| filter.to_date.is_none_or(|d| e.timestamp <= d))
            .cloned()
            .collect();

        results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let offset = filter.offset.unwrap_or(0);
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(results.into_iter().skip(offset).take(limit).collect())
    }
}

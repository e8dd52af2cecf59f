//! Connector bindings and primary-binding arbitration.
//!
//! An app may be claimed by several connector sources. Exactly one claim is
//! primary: the highest confidence, `manual` before `auto` on ties, then the
//! lowest `(connector_kind, source_name)` pair. A `manual` binding is never
//! replaced by an `auto` upsert for the same tuple; stores enforce that with
//! a conditional write, not read-then-write.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::error::{DiscoveryError, Result};
use crate::types::{BindingOrigin, SaasAppBinding, SaasAppId, SourceKey, UpsertBinding, UpsertOutcome};

/// Trait for storing connector bindings.
#[async_trait]
pub trait BindingStore: Send + Sync {
    /// Insert or update the binding for `(app, kind, source)`.
    ///
    /// An `auto` upsert onto an existing `manual` row must leave the row
    /// untouched and return `SkippedManual`. The check and the write happen
    /// atomically.
    async fn upsert_binding(&self, input: &UpsertBinding) -> Result<UpsertOutcome>;

    /// Upsert a manual binding and delete the app's other manual bindings in
    /// the same atomic step. The latest pin is the only manual claim left.
    async fn pin_manual_binding(&self, input: &UpsertBinding) -> Result<UpsertOutcome>;

    /// All bindings for an app.
    async fn list_bindings(&self, app_id: SaasAppId) -> Result<Vec<SaasAppBinding>>;

    /// Mark exactly `primary` as primary for the app and clear the flag on
    /// every other binding. `None` clears all flags.
    async fn set_primary(&self, app_id: SaasAppId, primary: Option<&SourceKey>) -> Result<()>;

    /// Rank the app's bindings with the [`select_primary`] order and persist
    /// the flags, reading and writing in one atomic step. Returns the new
    /// primary.
    async fn recompute_primary(&self, app_id: SaasAppId) -> Result<Option<SaasAppBinding>>;

    /// Delete all manual bindings for the app and, if any were deleted, clear
    /// every primary flag. Returns the number of deleted rows.
    async fn clear_manual_bindings(&self, app_id: SaasAppId) -> Result<u64>;
}

/// Reject confidences that are not finite or fall outside [0, 1].
pub fn validate_confidence(confidence: f64) -> Result<()> {
    if confidence.is_finite() && (0.0..=1.0).contains(&confidence) {
        Ok(())
    } else {
        Err(DiscoveryError::InvalidConfidence(confidence))
    }
}

fn origin_rank(origin: BindingOrigin) -> u8 {
    match origin {
        BindingOrigin::Manual => 0,
        BindingOrigin::Auto => 1,
    }
}

fn primary_order(a: &SaasAppBinding, b: &SaasAppBinding) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| origin_rank(a.origin).cmp(&origin_rank(b.origin)))
        .then_with(|| a.source.connector_kind.as_str().cmp(b.source.connector_kind.as_str()))
        .then_with(|| a.source.source_name.cmp(&b.source.source_name))
}

/// Pick the binding that should be primary. Deterministic for any input order.
pub fn select_primary(bindings: &[SaasAppBinding]) -> Option<&SaasAppBinding> {
    bindings.iter().min_by(|a, b| primary_order(a, b))
}

/// Mutation surface over a [`BindingStore`].
#[derive(Clone)]
pub struct BindingResolver {
    store: Arc<dyn BindingStore>,
}

impl BindingResolver {
    pub fn new(store: Arc<dyn BindingStore>) -> Self {
        Self { store }
    }

    /// Validate and upsert one binding.
    #[instrument(skip(self, input), fields(app_id = %input.app_id, source = %input.source, origin = %input.origin))]
    pub async fn upsert_binding(&self, input: &UpsertBinding) -> Result<UpsertOutcome> {
        validate_confidence(input.confidence)?;
        let outcome = self.store.upsert_binding(input).await?;
        debug!(?outcome, "Binding upserted");
        Ok(outcome)
    }

    /// Replace the app's manual pin with `input`.
    #[instrument(skip(self, input), fields(app_id = %input.app_id, source = %input.source))]
    pub async fn pin_manual_binding(&self, input: &UpsertBinding) -> Result<UpsertOutcome> {
        validate_confidence(input.confidence)?;
        if input.origin != BindingOrigin::Manual {
            return self.upsert_binding(input).await;
        }
        let outcome = self.store.pin_manual_binding(input).await?;
        debug!(?outcome, "Manual binding pinned");
        Ok(outcome)
    }

    /// Re-derive the primary binding for an app and persist it.
    #[instrument(skip(self), fields(app_id = %app_id))]
    pub async fn recompute_primary(&self, app_id: SaasAppId) -> Result<Option<SaasAppBinding>> {
        let primary = self.store.recompute_primary(app_id).await?;
        debug!(
            primary = primary.as_ref().map(|b| b.source.to_string()).as_deref(),
            "Primary binding recomputed"
        );
        Ok(primary)
    }

    /// Remove manual bindings. Callers follow with [`Self::recompute_primary`].
    #[instrument(skip(self), fields(app_id = %app_id))]
    pub async fn clear_manual_bindings(&self, app_id: SaasAppId) -> Result<u64> {
        let removed = self.store.clear_manual_bindings(app_id).await?;
        debug!(removed, "Manual bindings cleared");
        Ok(removed)
    }

    pub async fn list_bindings(&self, app_id: SaasAppId) -> Result<Vec<SaasAppBinding>> {
        self.store.list_bindings(app_id).await
    }
}

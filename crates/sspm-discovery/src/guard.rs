//! Cancellation and timeout guard for collaborator calls.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{DiscoveryError, Result};

/// Run `call`, aborting with `Cancelled` when the token fires first and with
/// `Timeout` when it takes longer than `after`.
pub(crate) async fn guarded<T, F>(
    cancel: &CancellationToken,
    after: Duration,
    operation: &'static str,
    call: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(DiscoveryError::Cancelled);
    }
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(DiscoveryError::Cancelled),
        outcome = tokio::time::timeout(after, call) => match outcome {
            Ok(result) => result,
            Err(_) => Err(DiscoveryError::Timeout { operation, after }),
        },
    }
}

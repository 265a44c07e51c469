//! Pending-request registry and result correlator
//!
//! The registry is shared by exactly two parties: the dispatcher, which
//! registers entries and removes them on timeout, and the correlator task,
//! which removes them when a boundary result arrives. Both go through
//! [`PendingRegistry::take`], so whichever side removes an entry first is the
//! only one allowed to resolve it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ExecutionError;
use crate::metrics::EngineMetrics;
use crate::protocol::{BoundaryResponse, CorrelationId};

/// An in-flight call awaiting either a boundary result or its timeout.
#[derive(Debug)]
pub struct PendingRequest {
    pub id: CorrelationId,
    pub resolve: oneshot::Sender<BoundaryResponse>,
    pub registered_at: Instant,
}

/// Pending calls keyed by correlation id.
///
/// The lock is never held across an `.await`.
#[derive(Debug, Default)]
pub struct PendingRegistry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<CorrelationId, PendingRequest>>,
}

impl PendingRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Allocate a correlation id unique for the lifetime of this registry.
    pub fn next_id(&self) -> CorrelationId {
        CorrelationId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Register a pending call and return the receiver its response arrives on.
    pub fn register(&self, id: CorrelationId) -> oneshot::Receiver<BoundaryResponse> {
        let (resolve, rx) = oneshot::channel();
        let previous = self.lock().insert(
            id,
            PendingRequest {
                id,
                resolve,
                registered_at: Instant::now(),
            },
        );
        debug_assert!(previous.is_none(), "correlation id {id} reused while pending");
        rx
    }

    /// Remove an entry. At most one caller ever gets `Some` for a given id.
    pub fn take(&self, id: CorrelationId) -> Option<PendingRequest> {
        self.lock().remove(&id)
    }

    pub fn contains(&self, id: CorrelationId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CorrelationId, PendingRequest>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes a pending entry when the owning call goes away, including when the
/// caller drops the `evaluate()` future mid-flight.
pub(crate) struct PendingGuard<'a> {
    registry: &'a PendingRegistry,
    id: CorrelationId,
}

impl<'a> PendingGuard<'a> {
    pub(crate) fn new(registry: &'a PendingRegistry, id: CorrelationId) -> Self {
        Self { registry, id }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.registry.take(self.id).is_some() {
            debug!(id = %self.id, "Pending request abandoned by caller");
        }
    }
}

/// Deliver one boundary result to its pending call, or drop it.
///
/// Returns `true` if a pending call was resolved.
pub fn correlate(registry: &PendingRegistry, metrics: &EngineMetrics, response: BoundaryResponse) -> bool {
    let id = response.id;
    let Some(pending) = registry.take(id) else {
        // Expected when a call timed out or its context was recreated
        // mid-flight; a high rate points at timeouts tuned too tight.
        metrics.record_stale_drop();
        warn!(%id, success = response.result.success, "Dropping result for unknown correlation id");
        return false;
    };

    if response.degraded {
        metrics.record_degraded_return();
        let reason = ExecutionError::Serialization("kept its String() form".into());
        warn!(%id, %reason, "Return value degraded");
    }
    debug!(
        %id,
        elapsed_ms = pending.registered_at.elapsed().as_millis() as u64,
        success = response.result.success,
        "Correlated boundary result"
    );
    if pending.resolve.send(response).is_err() {
        debug!(%id, "Caller went away before the result was delivered");
    }
    true
}

/// Correlator task for one context generation. Stops when the boundary closes
/// its response channel or the context is torn down.
pub async fn run_correlator(
    generation: u64,
    mut responses: mpsc::UnboundedReceiver<BoundaryResponse>,
    registry: Arc<PendingRegistry>,
    metrics: Arc<EngineMetrics>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(generation, "Correlator cancelled");
                break;
            }
            message = responses.recv() => match message {
                Some(response) => {
                    correlate(&registry, &metrics, response);
                }
                None => {
                    debug!(generation, "Boundary closed its response channel");
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ExecutionResult;
    use serde_json::json;

    fn response(id: u64, value: serde_json::Value) -> BoundaryResponse {
        BoundaryResponse {
            id: CorrelationId(id),
            result: ExecutionResult::success(None, Some(value)),
            degraded: false,
            interrupted: false,
        }
    }

    #[test]
    fn test_ids_are_unique() {
        let registry = PendingRegistry::new();
        let a = registry.next_id();
        let b = registry.next_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_take_is_exclusive() {
        let registry = PendingRegistry::new();
        let id = registry.next_id();
        let _rx = registry.register(id);

        assert!(registry.take(id).is_some());
        assert!(registry.take(id).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_correlate_resolves_matching_entry() {
        let registry = PendingRegistry::new();
        let metrics = EngineMetrics::new();
        let id = registry.next_id();
        let rx = registry.register(id);

        assert!(correlate(&registry, &metrics, response(id.0, json!("ok"))));
        let result = rx.await.unwrap().result;
        assert_eq!(result.return_value, Some(json!("ok")));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_stale_result_is_dropped_and_counted() {
        let registry = PendingRegistry::new();
        let metrics = EngineMetrics::new();

        assert!(!correlate(&registry, &metrics, response(404, json!(1))));
        assert_eq!(metrics.snapshot().stale_results_dropped, 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_degraded_results_are_counted() {
        let registry = PendingRegistry::new();
        let metrics = EngineMetrics::new();
        let id = registry.next_id();
        let _rx = registry.register(id);

        let mut degraded = response(id.0, json!("[object Object]"));
        degraded.degraded = true;
        correlate(&registry, &metrics, degraded);
        assert_eq!(metrics.snapshot().degraded_return_values, 1);
    }

    #[test]
    fn test_guard_removes_entry() {
        let registry = PendingRegistry::new();
        let id = registry.next_id();
        let _rx = registry.register(id);
        {
            let _guard = PendingGuard::new(&registry, id);
        }
        assert!(!registry.contains(id));
    }

    #[tokio::test]
    async fn test_out_of_order_results_reach_their_own_callers() {
        let registry = PendingRegistry::new();
        let metrics = EngineMetrics::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let first = registry.next_id();
        let second = registry.next_id();
        let first_rx = registry.register(first);
        let second_rx = registry.register(second);

        let task = tokio::spawn(run_correlator(
            1,
            rx,
            Arc::clone(&registry),
            Arc::clone(&metrics),
            shutdown.clone(),
        ));

        tx.send(response(second.0, json!("second"))).unwrap();
        tx.send(response(first.0, json!("first"))).unwrap();

        assert_eq!(second_rx.await.unwrap().result.return_value, Some(json!("second")));
        assert_eq!(first_rx.await.unwrap().result.return_value, Some(json!("first")));

        drop(tx);
        task.await.unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_correlator_stops_delivering() {
        let registry = PendingRegistry::new();
        let metrics = EngineMetrics::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        run_correlator(1, rx, Arc::clone(&registry), metrics, shutdown).await;

        let id = registry.next_id();
        let _pending = registry.register(id);
        // Nothing reads the channel any more; the entry stays until its timeout.
        assert!(tx.send(response(id.0, json!(1))).is_err());
        assert!(registry.contains(id));
    }
}

//! Request Dispatcher - Isolated Evaluation Path
//!
//! Turns one `evaluate()` call into a typed RPC across the boundary:
//!
//! ```text
//!  evaluate() ─▶ plan ─▶ register id ─▶ ensure_context ─▶ post
//!                  │                                        │
//!                  ▼                                        ▼
//!           immediate result          race: correlated result vs. deadline
//! ```
//!
//! Each call ends in exactly one of `Resolved`, `TimedOut` or
//! `ContextUnavailable`, and each of those produces a single result.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::correlator::{PendingGuard, PendingRegistry};
use crate::engine::context::ContextManager;
use crate::engine::isolation::BoundaryLauncher;
use crate::error::ExecutionError;
use crate::evaluator::Evaluator;
use crate::language::{plan, Language, Plan};
use crate::metrics::EngineMetrics;
use crate::protocol::{BoundaryRequest, BoundaryResponse, ExecutionRequest, ExecutionResult, Inputs};

/// Terminal state of one dispatched call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terminal {
    Resolved,
    TimedOut,
    ContextUnavailable,
}

/// The isolated [`Evaluator`]: every snippet runs behind the boundary.
pub struct Dispatcher {
    contexts: ContextManager,
    registry: Arc<PendingRegistry>,
    metrics: Arc<EngineMetrics>,
}

impl Dispatcher {
    /// Create a dispatcher with its own pending registry. No context is built
    /// until the first snippet needs one.
    pub fn new(launcher: Arc<dyn BoundaryLauncher>, ready_timeout: Duration, metrics: Arc<EngineMetrics>) -> Self {
        let registry = PendingRegistry::new();
        let contexts = ContextManager::new(launcher, Arc::clone(&registry), Arc::clone(&metrics), ready_timeout);
        Self {
            contexts,
            registry,
            metrics,
        }
    }

    /// Calls currently waiting on the boundary.
    pub fn registry(&self) -> &PendingRegistry {
        &self.registry
    }

    /// The context lifecycle behind this dispatcher.
    pub fn contexts(&self) -> &ContextManager {
        &self.contexts
    }

    async fn dispatch(&self, request: ExecutionRequest, timeout: Duration) -> (ExecutionResult, Terminal) {
        let id = request.id;
        let timeout_ms = timeout.as_millis() as u64;
        let deadline = Instant::now() + timeout;
        let boundary_deadline = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|budget| Utc::now().checked_add_signed(budget))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let mut rx = self.registry.register(id);
        let _guard = PendingGuard::new(&self.registry, id);

        let handle = match tokio::time::timeout_at(deadline, self.contexts.ensure_context()).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(err)) => {
                return (ExecutionResult::failure(err.into(), None), Terminal::ContextUnavailable);
            }
            Err(_) => {
                debug!(%id, "Deadline passed while waiting for a context");
                return (ExecutionResult::failure(ExecutionError::Timeout(timeout_ms), None), Terminal::TimedOut);
            }
        };

        let language = request.language.clone();
        if let Err(rejected) = handle.post(encode(request, timeout_ms, boundary_deadline)) {
            warn!(id = %rejected.id, generation = handle.generation(), "Boundary closed before the request was posted");
            let err = ExecutionError::ContextUnavailable("boundary closed its request channel".into());
            return (ExecutionResult::failure(err, None), Terminal::ContextUnavailable);
        }
        self.metrics.record_dispatch();
        debug!(%id, %language, generation = handle.generation(), timeout_ms, "Posted snippet to boundary");

        match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(response)) => settle(response),
            Ok(Err(_)) => {
                let err = ExecutionError::ContextUnavailable("result channel closed".into());
                (ExecutionResult::failure(err, None), Terminal::ContextUnavailable)
            }
            Err(_) => {
                if self.registry.take(id).is_some() {
                    debug!(%id, timeout_ms, "Pending request timed out");
                    return (ExecutionResult::failure(ExecutionError::Timeout(timeout_ms), None), Terminal::TimedOut);
                }
                // The correlator took the entry first; its send is already done.
                match rx.await {
                    Ok(response) => settle(response),
                    Err(_) => (ExecutionResult::failure(ExecutionError::Timeout(timeout_ms), None), Terminal::TimedOut),
                }
            }
        }
    }
}

/// A boundary-side interrupt is a timeout, whichever side noticed first.
fn settle(response: BoundaryResponse) -> (ExecutionResult, Terminal) {
    let terminal = if response.interrupted {
        Terminal::TimedOut
    } else {
        Terminal::Resolved
    };
    (response.result, terminal)
}

/// Build the wire request. Inputs cross the boundary as JSON text only.
fn encode(request: ExecutionRequest, timeout_ms: u64, deadline: DateTime<Utc>) -> BoundaryRequest {
    let inputs_json = serde_json::to_string(&request.inputs).unwrap_or_else(|err| {
        warn!(id = %request.id, error = %err, "Inputs failed to serialize, sending empty object");
        "{}".to_string()
    });
    BoundaryRequest {
        id: request.id,
        code: request.code,
        inputs_json,
        timeout_ms,
        deadline,
    }
}

#[async_trait]
impl Evaluator for Dispatcher {
    async fn evaluate(
        &self,
        code: &str,
        language: &Language,
        inputs: &Inputs,
        timeout: Duration,
    ) -> ExecutionResult {
        if let Plan::Respond(result) = plan(code, language) {
            self.metrics.record_short_circuit();
            debug!(%language, success = result.success, "Answered without dispatch");
            return result;
        }

        let request = ExecutionRequest {
            id: self.registry.next_id(),
            code: code.to_string(),
            language: language.clone(),
            inputs: inputs.clone(),
        };

        let started = std::time::Instant::now();
        let (result, terminal) = self.dispatch(request, timeout).await;
        match terminal {
            Terminal::TimedOut => self.metrics.record_timeout(),
            Terminal::Resolved if !result.success => self.metrics.record_runtime_error(),
            _ => {}
        }
        self.metrics.record_evaluation(started.elapsed());
        result
    }

    fn evaluator_type(&self) -> &str {
        "isolated"
    }

    fn is_isolated(&self) -> bool {
        true
    }

    async fn teardown(&self) {
        self.contexts.teardown().await;
    }
}

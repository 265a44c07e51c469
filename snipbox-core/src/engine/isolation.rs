//! Isolation Boundary - Dedicated Runtime Thread
//!
//! The boundary is a named OS thread that owns a [`SnippetRuntime`]. The host
//! talks to it exclusively through channels:
//!
//! ```text
//!  Dispatcher ──BoundaryRequest──▶ ┌──────────────────────┐
//!                                  │ snipbox-boundary-N   │
//!  Correlator ◀─BoundaryResponse── │  SnippetRuntime      │
//!                                  └──────────────────────┘
//! ```
//!
//! # Security Model:
//! - The QuickJS runtime has its own heap, capped by `memory_limit_bytes`
//! - No host functions are registered; the snippet sees only `console`
//!   (the recording shim) and a JSON copy of its inputs
//! - Each request runs in a fresh context, so state never carries over
//!
//! The thread evaluates requests one at a time. Every request carries its
//! caller's deadline: a hung snippet is interrupted when the deadline passes,
//! and a request that waited in the queue past its deadline is never run.
//! Teardown interrupts whatever is running immediately.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::engine::shim::SnippetRuntime;
use crate::error::{ContextError, ExecutionError};
use crate::protocol::{BoundaryRequest, BoundaryResponse, ExecutionResult};

/// Limits applied to every boundary runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationConfig {
    /// Heap cap for the embedded runtime.
    pub memory_limit_bytes: usize,
    /// Interpreter stack cap.
    pub max_stack_bytes: usize,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            memory_limit_bytes: 64 * 1024 * 1024,
            max_stack_bytes: 1024 * 1024,
        }
    }
}

/// Host-side ends of a freshly launched boundary.
pub struct LaunchedBoundary {
    pub requests: mpsc::UnboundedSender<BoundaryRequest>,
    pub responses: mpsc::UnboundedReceiver<BoundaryResponse>,
    /// Fires once the boundary can accept requests, or with the reason it cannot.
    pub ready: oneshot::Receiver<Result<(), String>>,
    /// Raising this interrupts whatever the boundary is running.
    pub interrupt: Arc<AtomicBool>,
}

/// Builds boundaries for the context manager.
///
/// [`Isolation`] is the production implementation; tests substitute fakes to
/// drive readiness failures and out-of-order responses deterministically.
pub trait BoundaryLauncher: Send + Sync {
    fn launch(&self, generation: u64) -> Result<LaunchedBoundary, ContextError>;
}

/// Launches QuickJS boundary threads.
pub struct Isolation {
    config: IsolationConfig,
}

impl Isolation {
    pub fn new(config: IsolationConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(IsolationConfig::default())
    }

    pub fn config(&self) -> &IsolationConfig {
        &self.config
    }
}

impl BoundaryLauncher for Isolation {
    fn launch(&self, generation: u64) -> Result<LaunchedBoundary, ContextError> {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let interrupt = Arc::new(AtomicBool::new(false));

        let config = self.config.clone();
        let abort = Arc::clone(&interrupt);
        thread::Builder::new()
            .name(format!("snipbox-boundary-{generation}"))
            .stack_size(config.max_stack_bytes + 2 * 1024 * 1024)
            .spawn(move || boundary_main(generation, config, request_rx, response_tx, ready_tx, abort))
            .map_err(|e| ContextError::Launch(e.to_string()))?;

        info!(generation, "Launched isolation boundary");
        Ok(LaunchedBoundary {
            requests: request_tx,
            responses: response_rx,
            ready: ready_rx,
            interrupt,
        })
    }
}

/// Body of the boundary thread: the isolated evaluator loop.
fn boundary_main(
    generation: u64,
    config: IsolationConfig,
    mut requests: mpsc::UnboundedReceiver<BoundaryRequest>,
    responses: mpsc::UnboundedSender<BoundaryResponse>,
    ready: oneshot::Sender<Result<(), String>>,
    abort: Arc<AtomicBool>,
) {
    let runtime = match SnippetRuntime::new(&config, Arc::clone(&abort)) {
        Ok(runtime) => runtime,
        Err(err) => {
            warn!(generation, error = %err, "Boundary runtime could not be created");
            let _ = ready.send(Err(err.to_string()));
            return;
        }
    };
    if let Err(reason) = runtime.probe() {
        warn!(generation, %reason, "Boundary prelude failed to load");
        let _ = ready.send(Err(reason));
        return;
    }
    if ready.send(Ok(())).is_err() {
        debug!(generation, "Nobody waiting for readiness, shutting boundary down");
        return;
    }

    while let Some(request) = requests.blocking_recv() {
        if abort.load(Ordering::SeqCst) {
            debug!(generation, id = %request.id, "Boundary torn down, skipping queued request");
            continue;
        }

        let response = match request.remaining() {
            Some(budget) => {
                debug!(generation, id = %request.id, budget_ms = budget.as_millis() as u64, "Evaluating snippet");
                let outcome = runtime.run(&request.code, &request.inputs_json, request.timeout_ms, budget);
                BoundaryResponse {
                    id: request.id,
                    result: outcome.result,
                    degraded: outcome.degraded,
                    interrupted: outcome.interrupted,
                }
            }
            None => {
                debug!(generation, id = %request.id, "Deadline passed while queued, not evaluating");
                BoundaryResponse {
                    id: request.id,
                    result: ExecutionResult::failure(ExecutionError::Timeout(request.timeout_ms), None),
                    degraded: false,
                    interrupted: true,
                }
            }
        };
        if responses.send(response).is_err() {
            debug!(generation, "Correlator gone, shutting boundary down");
            break;
        }
    }

    info!(generation, "Isolation boundary exited");
}

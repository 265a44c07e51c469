//! Execution Context Manager - Lazy, Single-Flight Boundary Lifecycle
//!
//! The isolated context is expensive relative to a single evaluation, so it
//! is built on first use and then reused for the life of the engine. Nothing
//! is launched until the first snippet actually needs it.
//!
//! # Lifecycle:
//! ```text
//!   (empty) ──ensure_context()──▶ launching ──ready──▶ live
//!      ▲                              │                  │
//!      └──────── failure ─────────────┘    teardown() / boundary exit
//!      └─────────────────────────────────────────────────┘
//! ```
//!
//! Construction happens while holding an async mutex, so concurrent callers
//! all wait for the one in-flight construction instead of launching their own.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::correlator::{run_correlator, PendingRegistry};
use crate::engine::isolation::BoundaryLauncher;
use crate::error::ContextError;
use crate::metrics::EngineMetrics;
use crate::protocol::BoundaryRequest;

/// Cheap, cloneable reference to a live boundary.
#[derive(Debug, Clone)]
pub struct ContextHandle {
    generation: u64,
    requests: mpsc::UnboundedSender<BoundaryRequest>,
}

impl ContextHandle {
    /// Which construction of the context this handle belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Post a request across the boundary. Hands the request back if the
    /// boundary has already gone away.
    pub fn post(&self, request: BoundaryRequest) -> Result<(), BoundaryRequest> {
        self.requests.send(request).map_err(|e| e.0)
    }

    pub fn is_alive(&self) -> bool {
        !self.requests.is_closed()
    }
}

/// The singleton boundary owned by a [`ContextManager`].
struct ExecutionContext {
    handle: ContextHandle,
    ready: bool,
    interrupt: Arc<AtomicBool>,
    correlator: CancellationToken,
}

impl ExecutionContext {
    fn is_usable(&self) -> bool {
        self.ready && self.handle.is_alive()
    }

    /// Detach: stop delivering results, stop whatever runs, close the inbox.
    fn shutdown(self) {
        self.correlator.cancel();
        self.interrupt.store(true, Ordering::SeqCst);
        drop(self.handle);
    }
}

/// Owns the singleton execution context and its correlator task.
pub struct ContextManager {
    launcher: Arc<dyn BoundaryLauncher>,
    registry: Arc<PendingRegistry>,
    metrics: Arc<EngineMetrics>,
    ready_timeout: Duration,
    slot: Mutex<Option<ExecutionContext>>,
    generations: AtomicU64,
}

impl ContextManager {
    /// Create the manager without launching anything.
    pub fn new(
        launcher: Arc<dyn BoundaryLauncher>,
        registry: Arc<PendingRegistry>,
        metrics: Arc<EngineMetrics>,
        ready_timeout: Duration,
    ) -> Self {
        debug!(ready_timeout_ms = ready_timeout.as_millis() as u64, "Creating ContextManager (deferred)");
        Self {
            launcher,
            registry,
            metrics,
            ready_timeout,
            slot: Mutex::new(None),
            generations: AtomicU64::new(0),
        }
    }

    /// Return a ready context, building one if none exists or the last one died.
    pub async fn ensure_context(&self) -> Result<ContextHandle, ContextError> {
        let mut slot = self.slot.lock().await;

        if let Some(context) = slot.as_ref() {
            if context.is_usable() {
                return Ok(context.handle.clone());
            }
        }
        if let Some(dead) = slot.take() {
            warn!(generation = dead.handle.generation, "Execution context no longer alive, recreating");
            dead.shutdown();
        }

        match self.construct().await {
            Ok(context) => {
                let handle = context.handle.clone();
                *slot = Some(context);
                Ok(handle)
            }
            Err(err) => {
                self.metrics.record_context_failure();
                warn!(error = %err, "Execution context unavailable");
                Err(err)
            }
        }
    }

    async fn construct(&self) -> Result<ExecutionContext, ContextError> {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        info!(generation, "Constructing execution context");

        let boundary = self.launcher.launch(generation)?;
        let interrupt = boundary.interrupt;

        let readiness = tokio::time::timeout(self.ready_timeout, boundary.ready).await;
        let failure = match readiness {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(reason))) => Some(ContextError::Startup(reason)),
            Ok(Err(_)) => Some(ContextError::Vanished),
            Err(_) => Some(ContextError::ReadyTimeout(self.ready_timeout.as_millis() as u64)),
        };
        if let Some(err) = failure {
            interrupt.store(true, Ordering::SeqCst);
            return Err(err);
        }

        let correlator = CancellationToken::new();
        tokio::spawn(run_correlator(
            generation,
            boundary.responses,
            Arc::clone(&self.registry),
            Arc::clone(&self.metrics),
            correlator.clone(),
        ));

        self.metrics.record_context_created();
        info!(generation, "Execution context ready");
        Ok(ExecutionContext {
            handle: ContextHandle {
                generation,
                requests: boundary.requests,
            },
            ready: true,
            interrupt,
            correlator,
        })
    }

    /// Detach and invalidate the current context. The next call recreates it.
    ///
    /// Requests in flight against the old context are not answered; they run
    /// into their timeouts.
    pub async fn teardown(&self) {
        if let Some(context) = self.slot.lock().await.take() {
            info!(generation = context.handle.generation, "Tearing down execution context");
            context.shutdown();
        }
    }

    /// Whether a ready, live context currently exists. Never builds one.
    pub async fn is_ready(&self) -> bool {
        self.slot
            .lock()
            .await
            .as_ref()
            .is_some_and(ExecutionContext::is_usable)
    }
}

//! Engine module - Snippet evaluation facade
//!
//! [`SnippetEngine`] is the one surface the calling UI talks to. It picks an
//! [`Evaluator`] (isolated by default), fills in the default timeout, and
//! optionally runs the output classifier over the result.

pub mod context;
pub mod isolation;
pub mod shim;

pub use context::{ContextHandle, ContextManager};
pub use isolation::{BoundaryLauncher, Isolation, IsolationConfig};

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::classifier::{classify, OutputMode};
use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::evaluator::{DirectEvaluator, Evaluator};
use crate::language::Language;
use crate::metrics::EngineMetrics;
use crate::protocol::{ExecutionResult, Inputs};

/// A result together with the classifier's verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub result: ExecutionResult,
    /// The caller should persist `OutputMode::Markup` for this snippet.
    pub adopt_markup: bool,
}

/// Public evaluation surface over one [`Evaluator`].
pub struct SnippetEngine {
    evaluator: Arc<dyn Evaluator>,
    config: EngineConfig,
    metrics: Arc<EngineMetrics>,
}

impl SnippetEngine {
    /// Engine evaluating behind the isolation boundary.
    pub fn isolated(config: EngineConfig) -> Self {
        let launcher = Arc::new(Isolation::new(config.isolation.clone()));
        Self::with_launcher(config, launcher)
    }

    /// Engine with a custom boundary launcher.
    pub fn with_launcher(config: EngineConfig, launcher: Arc<dyn BoundaryLauncher>) -> Self {
        let metrics = EngineMetrics::new();
        let dispatcher = Dispatcher::new(launcher, config.ready_timeout(), Arc::clone(&metrics));
        Self::assemble(config, Arc::new(dispatcher), metrics)
    }

    /// Same-process engine. No boundary is ever built.
    pub fn direct(config: EngineConfig) -> Self {
        let metrics = EngineMetrics::new();
        let evaluator = DirectEvaluator::new(config.isolation.clone(), Arc::clone(&metrics));
        Self::assemble(config, Arc::new(evaluator), metrics)
    }

    fn assemble(config: EngineConfig, evaluator: Arc<dyn Evaluator>, metrics: Arc<EngineMetrics>) -> Self {
        info!(
            evaluator = evaluator.evaluator_type(),
            default_timeout_ms = config.default_timeout_ms,
            "Snippet engine created"
        );
        Self {
            evaluator,
            config,
            metrics,
        }
    }

    /// Evaluate one snippet. `None` uses the configured default timeout.
    pub async fn evaluate(
        &self,
        code: &str,
        language: &Language,
        inputs: &Inputs,
        timeout_ms: Option<u64>,
    ) -> ExecutionResult {
        let timeout = timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.default_timeout());
        debug!(%language, timeout_ms = timeout.as_millis() as u64, "Evaluating snippet");
        self.evaluator.evaluate(code, language, inputs, timeout).await
    }

    /// Evaluate, then promote tag-like output to markup unless `mode` already
    /// renders markup.
    pub async fn evaluate_with_mode(
        &self,
        code: &str,
        language: &Language,
        inputs: &Inputs,
        timeout_ms: Option<u64>,
        mode: OutputMode,
    ) -> Evaluation {
        let mut result = self.evaluate(code, language, inputs, timeout_ms).await;
        let classification = classify(&mut result, mode);
        Evaluation {
            result,
            adopt_markup: classification.adopt_markup,
        }
    }

    /// Discard the execution context. The next evaluation rebuilds it.
    pub async fn teardown(&self) {
        self.evaluator.teardown().await;
    }

    /// Counters shared by every component of this engine.
    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn evaluator_type(&self) -> &str {
        self.evaluator.evaluator_type()
    }

    pub fn is_isolated(&self) -> bool {
        self.evaluator.is_isolated()
    }
}

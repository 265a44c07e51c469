//! Direct (same-process) evaluator
//!
//! Runs snippets on tokio's blocking pool instead of the boundary thread.
//! There is no context to construct, so there is no readiness wait and no
//! correlation. Each call builds its own [`SnippetRuntime`].

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::engine::isolation::IsolationConfig;
use crate::engine::shim::SnippetRuntime;
use crate::error::ExecutionError;
use crate::evaluator::Evaluator;
use crate::language::{plan, Language, Plan};
use crate::metrics::EngineMetrics;
use crate::protocol::{ExecutionResult, Inputs};

/// Same-process [`Evaluator`] with no isolation boundary.
pub struct DirectEvaluator {
    config: IsolationConfig,
    metrics: Arc<EngineMetrics>,
}

impl DirectEvaluator {
    /// Runtime limits come from `config`; nothing is built until a call arrives.
    pub fn new(config: IsolationConfig, metrics: Arc<EngineMetrics>) -> Self {
        Self { config, metrics }
    }
}

#[async_trait]
impl Evaluator for DirectEvaluator {
    async fn evaluate(
        &self,
        code: &str,
        language: &Language,
        inputs: &Inputs,
        timeout: Duration,
    ) -> ExecutionResult {
        if let Plan::Respond(result) = plan(code, language) {
            self.metrics.record_short_circuit();
            return result;
        }

        let timeout_ms = timeout.as_millis() as u64;
        let inputs_json = serde_json::to_string(inputs).unwrap_or_else(|err| {
            warn!(error = %err, "Inputs failed to serialize, sending empty object");
            "{}".to_string()
        });
        let code = code.to_string();
        let config = self.config.clone();
        let abort = Arc::new(AtomicBool::new(false));
        let abort_on_expiry = Arc::clone(&abort);

        let started = Instant::now();
        let worker = tokio::task::spawn_blocking(move || {
            let runtime = SnippetRuntime::new(&config, abort)
                .map_err(|e| ExecutionError::ContextUnavailable(e.to_string()))?;
            Ok::<_, ExecutionError>(runtime.run(&code, &inputs_json, timeout_ms, timeout))
        });

        let (result, timed_out) = match tokio::time::timeout(timeout, worker).await {
            Ok(Ok(Ok(outcome))) => {
                if outcome.degraded {
                    self.metrics.record_degraded_return();
                    let reason = ExecutionError::Serialization("kept its String() form".into());
                    warn!(%reason, "Return value degraded");
                }
                (outcome.result, outcome.interrupted)
            }
            Ok(Ok(Err(err))) => (ExecutionResult::failure(err, None), false),
            Ok(Err(join_err)) => {
                warn!(error = %join_err, "Direct evaluation worker failed");
                let err = ExecutionError::Runtime(format!("InternalError: {join_err}"));
                (ExecutionResult::failure(err, None), false)
            }
            Err(_) => {
                // The interrupt hook ends the run shortly; its result is discarded.
                abort_on_expiry.store(true, Ordering::SeqCst);
                (ExecutionResult::failure(ExecutionError::Timeout(timeout_ms), None), true)
            }
        };

        if timed_out {
            self.metrics.record_timeout();
        } else if !result.success {
            self.metrics.record_runtime_error();
        }
        self.metrics.record_evaluation(started.elapsed());
        debug!(success = result.success, elapsed_ms = started.elapsed().as_millis() as u64, "Direct evaluation finished");
        result
    }

    fn evaluator_type(&self) -> &str {
        "direct"
    }

    fn is_isolated(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn evaluator() -> (DirectEvaluator, Arc<EngineMetrics>) {
        let metrics = EngineMetrics::new();
        (DirectEvaluator::new(IsolationConfig::default(), Arc::clone(&metrics)), metrics)
    }

    fn inputs(value: serde_json::Value) -> Inputs {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_direct_round_trip() {
        let (evaluator, metrics) = evaluator();
        let result = evaluator
            .evaluate(
                "console.log('sum'); return inputs.a + inputs.b",
                &Language::JavaScript,
                &inputs(json!({"a": 1, "b": 2})),
                Duration::from_secs(2),
            )
            .await;

        assert!(result.success);
        assert_eq!(result.output.as_deref(), Some("sum"));
        assert_eq!(result.return_value, Some(json!(3)));
        assert_eq!(metrics.snapshot().evaluations, 1);
        assert_eq!(metrics.snapshot().boundary_dispatches, 0);
    }

    #[tokio::test]
    async fn test_direct_short_circuits() {
        let (evaluator, metrics) = evaluator();
        let result = evaluator
            .evaluate("print(1)", &Language::Python, &Inputs::new(), Duration::from_secs(1))
            .await;
        assert_eq!(result.error.as_deref(), Some("language not supported: python"));

        let result = evaluator
            .evaluate("  ", &Language::JavaScript, &Inputs::new(), Duration::from_secs(1))
            .await;
        assert!(result.success);
        assert_eq!(metrics.snapshot().short_circuits, 2);
        assert_eq!(metrics.snapshot().evaluations, 0);
    }

    #[tokio::test]
    async fn test_direct_timeout() {
        let (evaluator, metrics) = evaluator();
        let result = evaluator
            .evaluate("while (true) {}", &Language::JavaScript, &Inputs::new(), Duration::from_millis(100))
            .await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("timed out after 100ms"));
        assert_eq!(metrics.snapshot().timeouts, 1);
    }

    #[tokio::test]
    async fn test_direct_runtime_error() {
        let (evaluator, metrics) = evaluator();
        let result = evaluator
            .evaluate(
                "console.log('a'); null.x",
                &Language::JavaScript,
                &Inputs::new(),
                Duration::from_secs(1),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.output.as_deref(), Some("a"));
        assert!(result.error.unwrap().starts_with("TypeError: "));
        assert_eq!(metrics.snapshot().runtime_errors, 1);
    }
}

//! Evaluator Trait - Strategy Interface for Snippet Evaluation
//!
//! Two implementations exist:
//! - **Isolated** ([`Dispatcher`](crate::dispatcher::Dispatcher)): posts into the
//!   boundary thread and correlates the reply. The default.
//! - **Direct** ([`DirectEvaluator`]): runs the same runtime on a blocking
//!   worker in the caller's process. Faster to start, but shares the host.
//!
//! # Contract:
//! - `evaluate()` never fails; every outcome is an [`ExecutionResult`]
//! - Both implementations apply [`plan`](crate::language::plan) first, so
//!   short-circuit behavior is identical
//! - `teardown()` is idempotent

use async_trait::async_trait;
use std::time::Duration;

use crate::language::Language;
use crate::protocol::{ExecutionResult, Inputs};

pub mod direct;

pub use direct::DirectEvaluator;

#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Evaluate one snippet within `timeout`.
    async fn evaluate(
        &self,
        code: &str,
        language: &Language,
        inputs: &Inputs,
        timeout: Duration,
    ) -> ExecutionResult;

    /// Short identifier used in logs and CLI output.
    fn evaluator_type(&self) -> &str;

    /// Whether snippets run behind the isolation boundary.
    fn is_isolated(&self) -> bool;

    /// Release any long-lived resources. The next call rebuilds them.
    async fn teardown(&self) {}
}

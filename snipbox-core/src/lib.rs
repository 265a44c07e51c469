//! Snipbox Core - Isolated Evaluation of User-Authored Snippets
//!
//! Runs short JavaScript snippets on behalf of a notebook-style UI and hands
//! back a serializable [`ExecutionResult`]: captured console output, a JSON
//! return value, or an error string. Evaluation happens behind an isolation
//! boundary (a dedicated thread owning an embedded QuickJS runtime) so a
//! misbehaving snippet cannot corrupt or hang the host.
//!
//! # Layout:
//! - [`engine`]: the [`SnippetEngine`] facade, context lifecycle and boundary
//! - [`dispatcher`] / [`correlator`]: typed RPC across the boundary
//! - [`evaluator`]: the evaluator trait and the same-process fallback
//! - [`language`] / [`classifier`]: pre-dispatch rules and markup promotion

pub mod classifier;
pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod language;
pub mod metrics;
pub mod protocol;

pub use classifier::{classify, Classification, OutputMode};
pub use config::EngineConfig;
pub use engine::{Evaluation, Isolation, IsolationConfig, SnippetEngine};
pub use error::{ConfigError, ContextError, ExecutionError};
pub use evaluator::{DirectEvaluator, Evaluator};
pub use language::{Language, Strategy};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use protocol::{ExecutionResult, Inputs};

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. Logs go to stderr
/// so stdout stays clean for results. Safe to call more than once.
pub fn init() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok();

    if installed {
        info!("Initializing Snipbox v{}", env!("CARGO_PKG_VERSION"));
    }
    Ok(())
}

//! Snipbox - evaluate a snippet from the command line
//!
//! Reads a snippet from a file (or `-` for stdin), evaluates it through the
//! same engine the UI uses, and prints the result as JSON.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use std::io::Read;
use std::path::PathBuf;
use tracing::debug;

use snipbox_core::{init, EngineConfig, ExecutionResult, Inputs, Language, OutputMode, SnippetEngine};

#[derive(Debug, Parser)]
#[command(name = "snipbox", version, about = "Evaluate user-authored snippets in an isolated runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Evaluate one snippet and print its result
    Run(RunArgs),
}

#[derive(Debug, clap::Args)]
struct RunArgs {
    /// Snippet file, or `-` to read from stdin
    file: String,

    /// Language tag of the snippet
    #[arg(short, long, default_value = "javascript")]
    language: String,

    /// JSON file holding the inputs object
    #[arg(long, conflicts_with = "inputs_json")]
    inputs: Option<PathBuf>,

    /// Inputs object as inline JSON
    #[arg(long)]
    inputs_json: Option<String>,

    /// Evaluation budget; defaults to the configured timeout
    #[arg(short, long, env = "SNIPBOX_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Evaluate in-process instead of behind the isolation boundary
    #[arg(long)]
    direct: bool,

    /// The caller already renders markup; skip markup promotion
    #[arg(long)]
    markup: bool,

    /// TOML configuration file
    #[arg(short, long, env = "SNIPBOX_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    #[serde(flatten)]
    result: ExecutionResult,
    adopt_markup: bool,
}

fn read_snippet(file: &str) -> Result<String> {
    if file == "-" {
        let mut code = String::new();
        std::io::stdin()
            .read_to_string(&mut code)
            .context("failed to read snippet from stdin")?;
        return Ok(code);
    }
    std::fs::read_to_string(file).with_context(|| format!("failed to read snippet {file}"))
}

fn read_inputs(args: &RunArgs) -> Result<Inputs> {
    let text = match (&args.inputs, &args.inputs_json) {
        (Some(path), _) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read inputs {}", path.display()))?,
        (None, Some(inline)) => inline.clone(),
        (None, None) => return Ok(Inputs::new()),
    };
    match serde_json::from_str::<Value>(&text).context("inputs are not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("inputs must be a JSON object, got {other}"),
    }
}

async fn run(args: RunArgs) -> Result<bool> {
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::from_env()?,
    };
    debug!(?config, "Loaded configuration");

    let code = read_snippet(&args.file)?;
    let inputs = read_inputs(&args)?;
    let language = Language::from(args.language.as_str());
    let mode = if args.markup { OutputMode::Markup } else { OutputMode::Console };

    let engine = if args.direct {
        SnippetEngine::direct(config)
    } else {
        SnippetEngine::isolated(config)
    };

    let evaluation = engine
        .evaluate_with_mode(&code, &language, &inputs, args.timeout_ms, mode)
        .await;
    engine.teardown().await;
    debug!(metrics = ?engine.metrics().snapshot(), "Evaluation finished");

    let success = evaluation.result.success;
    let report = Report {
        result: evaluation.result,
        adopt_markup: evaluation.adopt_markup,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(success)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init()?;

    let succeeded = match cli.command {
        Command::Run(args) => run(args).await?,
    };
    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

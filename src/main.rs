//! # deepflow
//!
//! Command-line front end for the deepflow workflow engine.
//!
//! ## Quick Start
//! ```bash
//! deepflow validate workflows/
//! deepflow tools
//! deepflow run workflows/research.yaml -i topic="rust async" --offline
//! ```

/// CLI configuration (models, Ollama host)
mod config;

/// Router backends built from the configured models
mod backends;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use deepflow::{
    FailurePolicy, FileRunStore, RouterConfig, RunStore, SmartRouter, ToolRegistry, WorkflowLoader, WorkflowRunner,
};

use crate::backends::register_backends;
use crate::config::CliConfig;

#[derive(Parser, Debug)]
#[command(
    name = "deepflow",
    version,
    about = "Run multi-agent workflows defined as YAML DAGs",
    long_about = r#"
deepflow loads a workflow file, routes each step to a local tool or a model
backend, and runs the graph with bounded concurrency.

ENVIRONMENT:
  DEEPFLOW_MODELS        models to register, e.g. "llama3.2@1,qwen2.5:14b@2"
  OLLAMA_API_BASE_URL    Ollama server (default http://localhost:11434)
  DEEPFLOW_CONFIG        optional engine config YAML
  DEEPFLOW_*             engine overrides (concurrency, timeouts, data dir, ...)

EXAMPLES:
  deepflow run research.yaml -i topic="rust async"
  deepflow run research.yaml -i topic=x --on-failure best-effort --offline
  deepflow validate workflows/
"#
)]
struct Args {
    /// Enable verbose/debug logging
    #[arg(short = 'v', long = "verbose", global = true, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a workflow file and print its run record
    Run {
        /// Workflow YAML file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Workflow input as key=value; JSON values are parsed, anything else is a string
        #[arg(short = 'i', long = "input", value_name = "KEY=VALUE", value_parser = parse_input)]
        inputs: Vec<(String, Value)>,

        /// Override the workflow's concurrency limit
        #[arg(short = 'c', long = "concurrency")]
        concurrency: Option<usize>,

        /// Override the workflow's failure policy
        #[arg(long = "on-failure", value_enum)]
        on_failure: Option<OnFailure>,

        /// Use echo backends instead of Ollama
        #[arg(long = "offline", default_value = "false")]
        offline: bool,

        /// Do not write the run record, artifacts or router stats
        #[arg(long = "no-persist", default_value = "false")]
        no_persist: bool,
    },

    /// Load and validate workflow files without running them
    Validate {
        /// A workflow file or a directory of them
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },

    /// List registered capabilities
    Tools {
        /// Only capabilities runnable at this tier or below
        #[arg(long = "tier")]
        tier: Option<u8>,
    },

    /// Print persisted router statistics
    Stats,

    /// List stored runs, or print one run record
    Runs {
        /// Run id to print
        #[arg(value_name = "RUN_ID")]
        run_id: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OnFailure {
    FailFast,
    BestEffort,
}

impl From<OnFailure> for FailurePolicy {
    fn from(value: OnFailure) -> Self {
        match value {
            OnFailure::FailFast => FailurePolicy::FailFast,
            OnFailure::BestEffort => FailurePolicy::BestEffort,
        }
    }
}

fn parse_input(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("input '{}' must look like key=value", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("input '{}' has an empty key", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    init_logging(args.verbose)?;

    let config = CliConfig::from_env()?;
    config.validate()?;

    match args.command {
        Command::Run {
            file,
            inputs,
            concurrency,
            on_failure,
            offline,
            no_persist,
        } => {
            let inputs: Map<String, Value> = inputs.into_iter().collect();
            run(&config, file, inputs, concurrency, on_failure, offline, no_persist).await
        }
        Command::Validate { path } => validate(&config, path).await,
        Command::Tools { tier } => tools(tier),
        Command::Stats => stats(&config).await,
        Command::Runs { run_id } => runs(&config, run_id).await,
    }
}

async fn run(
    config: &CliConfig,
    file: PathBuf,
    inputs: Map<String, Value>,
    concurrency: Option<usize>,
    on_failure: Option<OnFailure>,
    offline: bool,
    no_persist: bool,
) -> Result<()> {
    let mut engine = config.engine()?;
    if no_persist {
        engine = engine.with_persistence(false, false).with_artifacts(false);
    }

    let router = SmartRouter::new(engine.router.clone());
    register_backends(&router, config, offline)?;

    let runner = WorkflowRunner::new(engine, Arc::new(ToolRegistry::discover()?), Arc::new(router));

    let mut definition = runner
        .loader()
        .load_file(&file)
        .await
        .with_context(|| format!("failed to load {}", file.display()))?;
    if let Some(n) = concurrency {
        definition = definition.with_concurrency(n);
    }
    if let Some(policy) = on_failure {
        definition = definition.with_failure_policy(policy.into());
    }

    info!(
        workflow = %definition.name,
        steps = definition.dag.len(),
        concurrency = definition.concurrency,
        on_failure = %definition.failure_policy,
        "Starting workflow"
    );

    // Ctrl-C cancels the run; in-flight steps are abandoned and marked failed
    let token = runner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling workflow");
            token.cancel();
        }
    });

    let record = runner.run_definition(&definition, inputs).await;
    println!("{}", serde_json::to_string_pretty(&record)?);

    if record.is_success() {
        info!(run_id = %record.run_id(), "Workflow succeeded");
        Ok(())
    } else {
        error!(run_id = %record.run_id(), status = %record.status(), "Workflow did not succeed");
        anyhow::bail!("workflow '{}' finished with status {}", record.workflow(), record.status())
    }
}

async fn validate(config: &CliConfig, path: PathBuf) -> Result<()> {
    let engine = config.engine()?;
    let loader = WorkflowLoader::new(Arc::new(ToolRegistry::discover()?)).with_config(&engine);

    let files = if path.is_dir() {
        WorkflowLoader::discover(&path)
    } else {
        vec![path.clone()]
    };
    if files.is_empty() {
        anyhow::bail!("no workflow files found under {}", path.display());
    }

    let mut failures = 0;
    for file in &files {
        match loader.load_file(file).await {
            Ok(def) => println!("ok    {} ({}, {} steps)", file.display(), def.name, def.dag.len()),
            Err(e) => {
                failures += 1;
                println!("error {}: {}", file.display(), e);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} workflow files are invalid", failures, files.len());
    }
    Ok(())
}

fn tools(tier: Option<u8>) -> Result<()> {
    let registry = ToolRegistry::discover()?;
    let descriptors = registry.list_by_tier(tier.unwrap_or(u8::MAX));
    for d in descriptors {
        println!("{:<12} tier {}  {}", d.name, d.tier, d.description);
    }
    Ok(())
}

async fn stats(config: &CliConfig) -> Result<()> {
    let engine = config.engine()?;
    let router = SmartRouter::new(RouterConfig::default());
    let path = engine.stats_path();
    let loaded = router.load_stats(&path).await?;
    if loaded == 0 {
        println!("no router stats at {}", path.display());
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(&router.snapshot())?);
    Ok(())
}

async fn runs(config: &CliConfig, run_id: Option<String>) -> Result<()> {
    let engine = config.engine()?;
    let store = FileRunStore::new(engine.runs_dir());

    match run_id {
        Some(raw) => {
            let id: uuid::Uuid = raw.parse().with_context(|| format!("'{}' is not a run id", raw))?;
            let record = store
                .load(id)
                .await?
                .with_context(|| format!("run {} not found in {}", raw, store.dir().display()))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        None => {
            for id in store.list().await? {
                println!("{}", id);
            }
        }
    }
    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // Logs go to stderr so stdout stays parseable JSON
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_run() {
        let args = Args::parse_from([
            "deepflow",
            "run",
            "wf.yaml",
            "-i",
            "topic=rust async",
            "-i",
            "limit=3",
            "--on-failure",
            "best-effort",
            "--offline",
            "-v",
        ]);
        assert!(args.verbose);
        match args.command {
            Command::Run {
                file,
                inputs,
                on_failure,
                offline,
                ..
            } => {
                assert_eq!(file, PathBuf::from("wf.yaml"));
                assert_eq!(inputs[0], ("topic".to_string(), Value::String("rust async".into())));
                assert_eq!(inputs[1].1, serde_json::json!(3));
                assert!(matches!(on_failure, Some(OnFailure::BestEffort)));
                assert!(offline);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input("a={\"b\":1}").unwrap().1["b"], 1);
        assert_eq!(parse_input("a=b=c").unwrap().1, Value::String("b=c".into()));
        assert!(parse_input("novalue").is_err());
        assert!(parse_input("=x").is_err());
    }

    #[test]
    fn test_args_validate() {
        let args = Args::parse_from(["deepflow", "validate", "workflows/"]);
        assert!(matches!(args.command, Command::Validate { .. }));
    }
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;

mod adapters;
mod aggregator;
mod blob;
mod config;
mod error;
mod extractor;
mod models;
mod orchestrator;
mod output;
mod poller;
mod provider;
mod records;
mod submitter;
mod telemetry;
#[cfg(test)]
mod testing;

use crate::blob::FsBlobStore;
use crate::config::Config;
use crate::error::EvalError;
use crate::models::GenerationOverrides;
use crate::orchestrator::Orchestrator;
use crate::output::OutputFormat;
use crate::provider::HttpEvaluationProvider;
use crate::records::FsRecordStore;
use crate::submitter::{SubmitterSettings, TrialRequest};

/// Model Evaluation Orchestrator - Compare LLM backends on a shared context
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "eval.toml", global = true)]
    config: PathBuf,

    /// Output format: plain or json
    #[arg(short, long, default_value = "plain", global = true)]
    output: OutputFormat,

    /// Verbose output - log every provider and store call
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run inference for one slot and submit its evaluation job
    Submit {
        /// Slot to fill, e.g. model1
        #[arg(long)]
        slot: String,

        /// Provider-qualified model identifier
        #[arg(long)]
        model: String,

        /// Context shown to the model
        #[arg(long, conflicts_with = "context_file", required_unless_present = "context_file")]
        context: Option<String>,

        /// Read the context from a file instead
        #[arg(long)]
        context_file: Option<PathBuf>,

        /// Existing run to join; a new run id is generated when omitted
        #[arg(long)]
        run_id: Option<String>,

        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        max_tokens: Option<u32>,

        #[arg(long)]
        temperature: Option<f64>,

        #[arg(long)]
        top_p: Option<f64>,

        #[arg(long)]
        top_k: Option<u32>,

        /// Stop sequence; repeat for several
        #[arg(long = "stop")]
        stop_sequences: Vec<String>,
    },

    /// Poll one slot's evaluation job and merge its results when complete
    Status {
        #[arg(long)]
        run_id: String,

        #[arg(long)]
        slot: String,
    },

    /// Show a run with every slot
    Run {
        #[arg(long)]
        run_id: String,
    },

    /// List recorded runs
    Runs,
}

/// Wire the configured provider and local stores into an orchestrator.
///
/// Only submissions need the execution role, so other commands run without it.
fn build_orchestrator(config: &Config, needs_role: bool) -> Result<Orchestrator> {
    let provider = HttpEvaluationProvider::from_config(&config.provider)
        .context("Failed to create evaluation provider")?;

    let settings = SubmitterSettings {
        evaluation: config.evaluation.clone(),
        role: if needs_role {
            config.evaluation.resolve_role()?
        } else {
            config.evaluation.role.clone().unwrap_or_default()
        },
        generation: config.generation.clone(),
    };

    Ok(Orchestrator::new(
        settings,
        Arc::new(provider),
        Arc::new(FsBlobStore::new(&config.storage.blob_dir)),
        Arc::new(FsRecordStore::new(&config.storage.record_dir)),
    ))
}

/// Tell the caller whether re-running the same command can succeed
fn with_retry_hint(err: EvalError) -> anyhow::Error {
    if err.is_retryable() {
        anyhow::Error::new(err).context("transient failure; re-run the same command to retry")
    } else {
        anyhow::Error::new(err)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    telemetry::init_tracing(args.log_json, level);

    let config = Config::from_file(&args.config)?;
    let needs_role = matches!(args.command, Command::Submit { .. });
    let orchestrator = build_orchestrator(&config, needs_role)?;

    match args.command {
        Command::Submit {
            slot,
            model,
            context,
            context_file,
            run_id,
            category,
            max_tokens,
            temperature,
            top_p,
            top_k,
            stop_sequences,
        } => {
            let context = match (context, context_file) {
                (Some(context), _) => context,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read context file: {}", path.display()))?,
                (None, None) => anyhow::bail!("Either --context or --context-file is required"),
            };

            let request = TrialRequest {
                run_id,
                slot,
                model_id: model,
                context,
                category,
                overrides: GenerationOverrides {
                    max_tokens,
                    temperature,
                    top_p,
                    top_k,
                    stop_sequences: (!stop_sequences.is_empty()).then_some(stop_sequences),
                },
            };

            let receipt = orchestrator
                .submit_trial(&request)
                .await
                .map_err(with_retry_hint)
                .context("Failed to submit trial")?;
            output::print_receipt(&receipt, args.output);
        }
        Command::Status { run_id, slot } => {
            let report = orchestrator
                .check_trial_status(&run_id, &slot)
                .await
                .map_err(with_retry_hint)
                .with_context(|| format!("Failed to check slot {} of run {}", slot, run_id))?;
            output::print_status(&report, args.output);
        }
        Command::Run { run_id } => {
            let run = orchestrator
                .get_run(&run_id)
                .await
                .map_err(with_retry_hint)
                .with_context(|| format!("Failed to load run {}", run_id))?;
            output::print_run(&run, args.output);
        }
        Command::Runs => {
            let runs = orchestrator
                .list_runs()
                .await
                .map_err(with_retry_hint)
                .context("Failed to list runs")?;
            output::print_runs(&runs, args.output);
        }
    }

    Ok(())
}

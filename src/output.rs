use crate::models::{Run, RunSummary};
use crate::orchestrator::TrialStatusReport;
use crate::submitter::TrialReceipt;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Output format options
#[derive(Debug, Clone, Copy, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    Plain,
    Json,
}

/// Print a submission receipt
pub fn print_receipt(receipt: &TrialReceipt, format: OutputFormat) {
    match format {
        OutputFormat::Plain => print!("{}", render_receipt(receipt)),
        OutputFormat::Json => print_json(receipt),
    }
}

/// Print the state of a single trial
pub fn print_status(report: &TrialStatusReport, format: OutputFormat) {
    match format {
        OutputFormat::Plain => print!("{}", render_status(report)),
        OutputFormat::Json => print_json(report),
    }
}

/// Print a full run with every slot
pub fn print_run(run: &Run, format: OutputFormat) {
    match format {
        OutputFormat::Plain => print!("{}", render_run(run)),
        OutputFormat::Json => print_json(run),
    }
}

pub fn print_runs(runs: &[RunSummary], format: OutputFormat) {
    match format {
        OutputFormat::Plain => print!("{}", render_runs(runs)),
        OutputFormat::Json => print_json(&runs),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing output to JSON: {}", e),
    }
}

fn render_receipt(receipt: &TrialReceipt) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Run:     {}", receipt.run_id);
    let _ = writeln!(out, "Slot:    {}", receipt.slot);
    let _ = writeln!(out, "Job:     {}", receipt.job_handle);
    let _ = writeln!(out, "Dataset: {}", receipt.dataset_uri);
    out
}

fn render_status(report: &TrialStatusReport) -> String {
    let mut out = String::new();
    match report {
        TrialStatusReport::NotFound { what } => {
            let _ = writeln!(out, "Not found: {}", what);
        }
        TrialStatusReport::InProgress { provider_status } => {
            let _ = writeln!(out, "In progress ({})", provider_status);
        }
        TrialStatusReport::Completed {
            model_id,
            metrics,
            summary,
        } => {
            let _ = writeln!(out, "Completed: {}", model_id);
            for (name, value) in metrics {
                let _ = writeln!(out, "  • {}: {}", name, display_value(value));
            }
            let _ = writeln!(out, "Summary: {}", summary);
        }
        TrialStatusReport::Failed { reason } => {
            let _ = writeln!(out, "Failed: {}", reason);
        }
    }
    out
}

fn display_value(value: &str) -> &str {
    if value.is_empty() { "-" } else { value }
}

fn render_run(run: &Run) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Run {} ===", run.run_id);
    let _ = writeln!(out, "Status:   {}", run.status);
    let _ = writeln!(out, "Category: {}", run.category);
    let _ = writeln!(out, "Context:  {}", run.context);
    let _ = writeln!(out);

    let _ = writeln!(
        out,
        "{:<10} {:<45} {:<10} {:<10} {:<10}",
        "Slot", "Model", "Accuracy", "Robust.", "Toxicity"
    );
    let _ = writeln!(out, "{}", "-".repeat(89));

    for slot_id in &run.slot_ids {
        match run.slot(slot_id) {
            Some(trial) => {
                let metric = |name: &str| {
                    display_value(trial.metrics.get(name).map(String::as_str).unwrap_or_default())
                        .to_string()
                };
                let _ = writeln!(
                    out,
                    "{:<10} {:<45} {:<10} {:<10} {:<10}",
                    slot_id,
                    trial.model_id,
                    metric("Accuracy"),
                    metric("Robustness"),
                    metric("Toxicity"),
                );
                if let Some(reason) = &trial.failure {
                    let _ = writeln!(out, "{:<10} failed: {}", "", reason);
                }
            }
            None => {
                let _ = writeln!(out, "{:<10} (not submitted)", slot_id);
            }
        }
    }

    for slot_id in &run.slot_ids {
        if let Some(summary) = run.slot(slot_id).and_then(|t| t.summary.as_deref()) {
            let _ = writeln!(out);
            let _ = writeln!(out, "📝 {} summary", slot_id);
            let _ = writeln!(out, "{}", summary);
        }
    }

    out
}

fn render_runs(runs: &[RunSummary]) -> String {
    if runs.is_empty() {
        return "No runs recorded.\n".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(out, "{:<38} {:<10} {}", "Run", "Status", "Context");
    let _ = writeln!(out, "{}", "-".repeat(70));
    for run in runs {
        let _ = writeln!(
            out,
            "{:<38} {:<10} {}",
            run.run_id,
            run.status.to_string(),
            truncate(&run.context, 40)
        );
    }
    out
}

fn truncate(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

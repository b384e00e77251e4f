use crate::error::{EvalError, EvalResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Quality measurement a provider evaluation job can score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Metric {
    Accuracy,
    Robustness,
    Toxicity,
}

impl Metric {
    /// Name used in result artifacts and run records
    pub fn name(self) -> &'static str {
        match self {
            Metric::Accuracy => "Accuracy",
            Metric::Robustness => "Robustness",
            Metric::Toxicity => "Toxicity",
        }
    }

    /// Identifier the provider expects in an evaluation job request
    pub fn builtin_name(self) -> &'static str {
        match self {
            Metric::Accuracy => "Builtin.Accuracy",
            Metric::Robustness => "Builtin.Robustness",
            Metric::Toxicity => "Builtin.Toxicity",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Overall state of a run, derived from its slots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    #[default]
    Running,
    Completed,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Running => "Running",
            RunStatus::Completed => "Completed",
            RunStatus::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Generation parameters shared by every provider family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Maximum output length in tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: f64,
    /// Nucleus-sampling probability mass
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

fn default_max_tokens() -> u32 {
    512
}

fn default_top_p() -> f64 {
    1.0
}

fn default_top_k() -> u32 {
    250
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: 0.0,
            top_p: default_top_p(),
            top_k: default_top_k(),
            stop_sequences: Vec::new(),
        }
    }
}

impl GenerationParams {
    /// Layer per-trial overrides over these parameters
    pub fn with_overrides(&self, overrides: &GenerationOverrides) -> Self {
        Self {
            max_tokens: overrides.max_tokens.unwrap_or(self.max_tokens),
            temperature: overrides.temperature.unwrap_or(self.temperature),
            top_p: overrides.top_p.unwrap_or(self.top_p),
            top_k: overrides.top_k.unwrap_or(self.top_k),
            stop_sequences: overrides
                .stop_sequences
                .clone()
                .unwrap_or_else(|| self.stop_sequences.clone()),
        }
    }
}

/// Per-trial generation parameter overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOverrides {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub stop_sequences: Option<Vec<String>>,
}

/// Outcome of one model's trial within a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    /// Provider-qualified model identifier
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_uri: Option<String>,
    /// Metric name to value; values may be empty strings
    #[serde(default)]
    pub metrics: BTreeMap<String, String>,
    /// Reference text produced by the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Terminal failure reason, if the trial failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl TrialResult {
    pub fn accuracy(&self) -> Option<&str> {
        self.metrics.get(Metric::Accuracy.name()).map(String::as_str)
    }

    /// A trial counts as complete once it reports a non-empty Accuracy
    pub fn is_complete(&self) -> bool {
        self.accuracy().is_some_and(|value| !value.is_empty())
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

/// One evaluation session comparing several models on the same context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub context: String,
    pub category: String,
    #[serde(default)]
    pub status: RunStatus,
    /// Closed, ordered slot universe for this run
    pub slot_ids: Vec<String>,
    #[serde(default)]
    pub slots: BTreeMap<String, TrialResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    pub fn new(run_id: &str, context: &str, category: &str, slot_ids: &[String]) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.to_string(),
            context: context.to_string(),
            category: category.to_string(),
            status: RunStatus::Running,
            slot_ids: slot_ids.to_vec(),
            slots: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_slot_id(&self, slot: &str) -> bool {
        self.slot_ids.iter().any(|id| id == slot)
    }

    pub fn slot(&self, slot: &str) -> Option<&TrialResult> {
        self.slots.get(slot)
    }

    /// Derive the run status from the full slot universe.
    ///
    /// Any failed slot wins over completeness; otherwise every slot must hold
    /// a non-empty Accuracy for the run to be complete.
    pub fn derive_status(&self) -> RunStatus {
        if self.slots.values().any(TrialResult::is_failed) {
            return RunStatus::Failed;
        }

        let all_complete = !self.slot_ids.is_empty()
            && self
                .slot_ids
                .iter()
                .all(|id| self.slots.get(id).is_some_and(TrialResult::is_complete));

        if all_complete {
            RunStatus::Completed
        } else {
            RunStatus::Running
        }
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            context: self.context.clone(),
            status: self.status,
        }
    }
}

/// Listing view of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub context: String,
    pub status: RunStatus,
}

/// Provider-side job lifecycle as observed by polling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Submitted,
    InProgress,
    Completed,
    Failed,
    Stopped,
}

impl JobState {
    /// Interpret a provider status string. Unknown vocabulary is non-terminal.
    pub fn from_provider(status: &str) -> Self {
        let status = status.trim();
        if status.eq_ignore_ascii_case("Completed") {
            JobState::Completed
        } else if status.eq_ignore_ascii_case("Failed") {
            JobState::Failed
        } else if status.eq_ignore_ascii_case("Stopped") {
            JobState::Stopped
        } else if status.eq_ignore_ascii_case("Submitted") {
            JobState::Submitted
        } else {
            JobState::InProgress
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Stopped)
    }
}

/// External asynchronous evaluation job, as described by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationJob {
    pub handle: String,
    /// Raw provider status string
    pub status: String,
    pub job_name: String,
    pub model_identifier: String,
    /// Output prefix, once the provider has assigned it
    pub artifact_location: Option<String>,
}

impl EvaluationJob {
    pub fn state(&self) -> JobState {
        JobState::from_provider(&self.status)
    }
}

/// Single named measurement from a result artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricScore {
    pub metric_name: String,
    #[serde(default)]
    pub result: Value,
}

impl MetricScore {
    /// Render the score the way run records store it
    pub fn result_string(&self) -> String {
        match &self.result {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Generate a fresh run identifier
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Run ids key record files and dataset blobs
pub fn validate_run_id(run_id: &str) -> EvalResult<()> {
    let valid = !run_id.is_empty()
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && run_id != "."
        && run_id != "..";

    if valid {
        Ok(())
    } else {
        Err(EvalError::InvalidRunId(run_id.to_string()))
    }
}

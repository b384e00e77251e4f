//! Result extraction from evaluation job artifacts
//!
//! The provider writes its results under a deterministic subpath of the
//! job's output location. One `.jsonl` file is expected per job and only its
//! first record is read.

use crate::blob::{BlobLocation, BlobStore};
use crate::error::{EvalError, EvalResult};
use crate::models::{EvaluationJob, Metric, MetricScore};
use crate::provider::EvaluationProvider;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

const RESULT_EXTENSION: &str = ".jsonl";

/// Normalized metrics and reference text for one trial
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedResult {
    /// One entry per requested metric; absent scores are empty strings
    pub metrics: BTreeMap<String, String>,
    pub summary: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultRecord {
    #[serde(default)]
    automated_evaluation_result: AutomatedResult,
    #[serde(default)]
    input_record: InputRecord,
}

#[derive(Debug, Default, Deserialize)]
struct AutomatedResult {
    #[serde(default)]
    scores: Vec<MetricScore>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InputRecord {
    #[serde(default)]
    reference_response: String,
}

/// Full artifact prefix for a completed job:
/// `{output}{job_name}/{handle tail}/models/{model}/taskTypes/{task}/datasets/{dataset}/`
pub fn artifact_prefix(
    job: &EvaluationJob,
    task_type: &str,
    dataset_name: &str,
) -> EvalResult<BlobLocation> {
    let output = job
        .artifact_location
        .as_deref()
        .ok_or_else(|| EvalError::no_result(&job.handle, "job has no output location"))?;

    if job.job_name.is_empty() || job.model_identifier.is_empty() {
        return Err(EvalError::no_result(
            &job.handle,
            "job description lacks its name or model identifier",
        ));
    }

    let handle_tail = job.handle.rsplit('/').next().unwrap_or(&job.handle);
    let subpath = format!(
        "{}/{}/models/{}/taskTypes/{}/datasets/{}/",
        job.job_name, handle_tail, job.model_identifier, task_type, dataset_name
    );

    Ok(BlobLocation::parse(output)?.child(&subpath))
}

/// Score names may arrive with or without the `Builtin.` prefix
fn score_for<'a>(scores: &'a [MetricScore], metric: Metric) -> Option<&'a MetricScore> {
    scores.iter().find(|score| {
        let name = score
            .metric_name
            .strip_prefix("Builtin.")
            .unwrap_or(&score.metric_name);
        name == metric.name()
    })
}

/// Parse the first non-blank line of a result file
pub fn parse_result_content(
    job_handle: &str,
    content: &str,
    metrics: &[Metric],
) -> EvalResult<ExtractedResult> {
    let line = content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| EvalError::no_result(job_handle, "result file has no records"))?;

    let record: ResultRecord = serde_json::from_str(line).map_err(|e| {
        EvalError::no_result(job_handle, format!("unparseable result record: {}", e))
    })?;

    let scores = &record.automated_evaluation_result.scores;
    let metrics = metrics
        .iter()
        .map(|metric| {
            let value = score_for(scores, *metric)
                .map(MetricScore::result_string)
                .unwrap_or_default();
            (metric.name().to_string(), value)
        })
        .collect();

    Ok(ExtractedResult {
        metrics,
        summary: record.input_record.reference_response,
    })
}

#[derive(Clone)]
pub struct ResultExtractor {
    provider: Arc<dyn EvaluationProvider>,
    blobs: Arc<dyn BlobStore>,
    task_type: String,
    dataset_name: String,
}

impl ResultExtractor {
    pub fn new(
        provider: Arc<dyn EvaluationProvider>,
        blobs: Arc<dyn BlobStore>,
        task_type: &str,
        dataset_name: &str,
    ) -> Self {
        Self {
            provider,
            blobs,
            task_type: task_type.to_string(),
            dataset_name: dataset_name.to_string(),
        }
    }

    /// Describe the job, then extract its metrics
    pub async fn extract(&self, job_handle: &str, metrics: &[Metric]) -> EvalResult<ExtractedResult> {
        let job = self.provider.get_job(job_handle).await?;
        self.extract_from_job(&job, metrics).await
    }

    /// Extract metrics for a job already known to be complete
    pub async fn extract_from_job(
        &self,
        job: &EvaluationJob,
        metrics: &[Metric],
    ) -> EvalResult<ExtractedResult> {
        let prefix = artifact_prefix(job, &self.task_type, &self.dataset_name)?;
        debug!(job_handle = %job.handle, %prefix, "listing result artifacts");

        let objects = self.blobs.list_objects(&prefix).await?;
        let result_file = objects
            .iter()
            .find(|object| object.key.ends_with(RESULT_EXTENSION))
            .ok_or_else(|| {
                EvalError::no_result(&job.handle, format!("no {} object under {}", RESULT_EXTENSION, prefix))
            })?;

        let bytes = self.blobs.get_object(result_file).await?;
        let content = String::from_utf8(bytes).map_err(|e| {
            EvalError::no_result(&job.handle, format!("{} is not valid UTF-8: {}", result_file, e))
        })?;
        let result = parse_result_content(&job.handle, &content, metrics)?;

        info!(
            job_handle = %job.handle,
            file = result_file.file_name(),
            metrics = ?result.metrics,
            "extracted evaluation results"
        );
        Ok(result)
    }
}

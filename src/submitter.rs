//! Trial submission
//!
//! A trial runs one synchronous inference call to get the model's reference
//! summary, writes it as a single-record dataset, submits an evaluation job
//! over that dataset, and records the job handle on the run. Nothing is rolled
//! back on failure: resubmitting the same `(run_id, slot)` recomputes the same
//! dataset key and replaces the slot's job handle.

use crate::adapters::AdapterRegistry;
use crate::aggregator::{RunAggregator, RunSeed, SlotPatch};
use crate::blob::{BlobLocation, BlobStore};
use crate::config::EvaluationSettings;
use crate::error::{EvalError, EvalResult};
use crate::models::{GenerationOverrides, GenerationParams, Metric, new_run_id, validate_run_id};
use crate::provider::{EvaluationJobRequest, EvaluationProvider};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Caller input for one trial
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialRequest {
    /// Existing or caller-chosen run; generated when absent
    pub run_id: Option<String>,
    pub slot: String,
    pub model_id: String,
    pub context: String,
    pub category: Option<String>,
    #[serde(default)]
    pub overrides: GenerationOverrides,
}

/// What a successful submission recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialReceipt {
    pub run_id: String,
    pub slot: String,
    pub job_handle: String,
    pub dataset_uri: String,
}

/// Single-line dataset record handed to the evaluation job
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DatasetRecord<'a> {
    prompt: &'a str,
    reference_response: &'a str,
    category: &'a str,
}

/// Static inputs shared by every submission
#[derive(Debug, Clone)]
pub struct SubmitterSettings {
    pub evaluation: EvaluationSettings,
    /// Execution role for evaluation jobs
    pub role: String,
    /// Defaults that per-trial overrides are layered over
    pub generation: GenerationParams,
}

#[derive(Clone)]
pub struct TrialSubmitter {
    registry: AdapterRegistry,
    provider: Arc<dyn EvaluationProvider>,
    blobs: Arc<dyn BlobStore>,
    aggregator: RunAggregator,
    settings: SubmitterSettings,
}

impl TrialSubmitter {
    pub fn new(
        registry: AdapterRegistry,
        provider: Arc<dyn EvaluationProvider>,
        blobs: Arc<dyn BlobStore>,
        aggregator: RunAggregator,
        settings: SubmitterSettings,
    ) -> Self {
        Self {
            registry,
            provider,
            blobs,
            aggregator,
            settings,
        }
    }

    /// Submit one trial. Any failure past validation is recorded on the slot,
    /// which marks the run Failed, before the error is returned.
    pub async fn submit_trial(&self, request: &TrialRequest) -> EvalResult<TrialReceipt> {
        let run_id = request.run_id.clone().unwrap_or_else(new_run_id);
        validate_run_id(&run_id)?;

        let seed = RunSeed {
            run_id: run_id.clone(),
            context: request.context.clone(),
            category: request
                .category
                .clone()
                .unwrap_or_else(|| self.settings.evaluation.default_category.clone()),
            slot_ids: self.settings.evaluation.slots.clone(),
        };

        let universe = self.aggregator.slot_universe(&seed).await?;
        if !universe.contains(&request.slot) {
            return Err(EvalError::UnknownSlot {
                run_id,
                slot: request.slot.clone(),
            });
        }

        info!(
            run_id = %run_id,
            slot = %request.slot,
            model_id = %request.model_id,
            "submitting trial"
        );

        match self.run_submission(&seed, request).await {
            Ok(receipt) => Ok(receipt),
            Err(err) => {
                error!(run_id = %run_id, slot = %request.slot, error = %err, "trial submission failed");
                let patch = SlotPatch::Failed {
                    model_id: Some(request.model_id.clone()),
                    reason: err.to_string(),
                };
                if let Err(record_err) = self.aggregator.upsert(&seed, &request.slot, patch).await {
                    warn!(run_id = %run_id, error = %record_err, "could not record submission failure");
                }
                Err(err)
            }
        }
    }

    async fn run_submission(&self, seed: &RunSeed, request: &TrialRequest) -> EvalResult<TrialReceipt> {
        let model_id = request.model_id.as_str();
        let slot = request.slot.as_str();
        let evaluation = &self.settings.evaluation;
        let params = self.settings.generation.with_overrides(&request.overrides);

        let prompt = evaluation.render_prompt(&seed.context);
        let body = self.registry.encode_request(model_id, &prompt, &params)?;
        let response = self.provider.invoke_inference(model_id, &body).await?;
        let reference_response = self.registry.decode_response(model_id, &response)?;

        let dataset = BlobLocation::parse(&evaluation.dataset_root)?
            .child(&format!("{}_{}.jsonl", seed.run_id, slot));
        let record = DatasetRecord {
            prompt: &seed.context,
            reference_response: &reference_response,
            category: &seed.category,
        };
        let line = format!("{}\n", serde_json::to_string(&record)?);
        self.blobs.put_object(&dataset, line.into_bytes()).await?;

        let metrics = self.registry.supported_metrics(model_id)?;
        let output_location = BlobLocation::parse(&evaluation.output_root)?
            .child(&format!("{}_{}/", seed.run_id, slot));

        let job_request = EvaluationJobRequest {
            job_name: job_name(&evaluation.job_name_prefix),
            role: self.settings.role.clone(),
            metric_config: metric_config(evaluation, &dataset, &metrics),
            model_config: json!({
                "models": [self.registry.inference_config(model_id, &params)?],
            }),
            output_location: output_location.to_string(),
        };
        let job_handle = self.provider.submit_evaluation_job(&job_request).await?;

        let patch = SlotPatch::Submitted {
            model_id: model_id.to_string(),
            job_handle: job_handle.clone(),
            dataset_uri: dataset.to_string(),
        };
        self.aggregator.upsert(seed, slot, patch).await?;

        info!(
            run_id = %seed.run_id,
            slot,
            job_handle = %job_handle,
            job_name = %job_request.job_name,
            "evaluation job submitted"
        );

        Ok(TrialReceipt {
            run_id: seed.run_id.clone(),
            slot: slot.to_string(),
            job_handle,
            dataset_uri: dataset.to_string(),
        })
    }
}

/// Job names carry a short random suffix
fn job_name(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &id[..8])
}

/// Automated evaluation over one custom dataset with the requested metrics
fn metric_config(settings: &EvaluationSettings, dataset: &BlobLocation, metrics: &[Metric]) -> Value {
    let metric_names: Vec<&str> = metrics.iter().map(|m| m.builtin_name()).collect();
    json!({
        "automated": {
            "datasetMetricConfigs": [{
                "taskType": settings.task_type,
                "dataset": {
                    "name": settings.dataset_name,
                    "datasetLocation": {"s3Uri": dataset.to_string()},
                },
                "metricNames": metric_names,
            }],
        },
    })
}

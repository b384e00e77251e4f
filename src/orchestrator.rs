use crate::adapters::AdapterRegistry;
use crate::aggregator::{RunAggregator, SlotPatch};
use crate::blob::BlobStore;
use crate::error::{EvalError, EvalResult};
use crate::extractor::ResultExtractor;
use crate::models::{Run, RunSummary, TrialResult, validate_run_id};
use crate::poller::{JobPoller, PollOutcome};
use crate::provider::EvaluationProvider;
use crate::records::RecordStore;
use crate::submitter::{SubmitterSettings, TrialReceipt, TrialRequest, TrialSubmitter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Caller-facing state of one trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum TrialStatusReport {
    /// The run, slot, or job handle does not exist yet
    NotFound { what: String },
    InProgress { provider_status: String },
    Completed {
        model_id: String,
        metrics: BTreeMap<String, String>,
        summary: String,
    },
    Failed { reason: String },
}

impl TrialStatusReport {
    fn completed(trial: &TrialResult) -> Self {
        TrialStatusReport::Completed {
            model_id: trial.model_id.clone(),
            metrics: trial.metrics.clone(),
            summary: trial.summary.clone().unwrap_or_default(),
        }
    }
}

/// Coordinates the submit -> poll -> extract -> merge pipeline for every trial
pub struct Orchestrator {
    registry: AdapterRegistry,
    submitter: TrialSubmitter,
    poller: JobPoller,
    extractor: ResultExtractor,
    aggregator: RunAggregator,
}

impl Orchestrator {
    /// Create a new orchestrator over the given collaborators
    pub fn new(
        settings: SubmitterSettings,
        provider: Arc<dyn EvaluationProvider>,
        blobs: Arc<dyn BlobStore>,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        let registry = AdapterRegistry::builtin();
        let aggregator = RunAggregator::new(records);
        let extractor = ResultExtractor::new(
            provider.clone(),
            blobs.clone(),
            &settings.evaluation.task_type,
            &settings.evaluation.dataset_name,
        );

        Self {
            poller: JobPoller::new(provider.clone()),
            submitter: TrialSubmitter::new(
                registry.clone(),
                provider,
                blobs,
                aggregator.clone(),
                settings,
            ),
            registry,
            extractor,
            aggregator,
        }
    }

    pub async fn submit_trial(&self, request: &TrialRequest) -> EvalResult<TrialReceipt> {
        self.submitter.submit_trial(request).await
    }

    /// Advance one trial by a single step and report where it stands.
    ///
    /// Terminal slots are answered from the run record. Otherwise the job is
    /// polled once; a completed job is extracted and merged in the same call.
    pub async fn check_trial_status(&self, run_id: &str, slot: &str) -> EvalResult<TrialStatusReport> {
        validate_run_id(run_id)?;

        let Some(run) = self.aggregator.find(run_id).await? else {
            return Ok(TrialStatusReport::NotFound {
                what: format!("run {}", run_id),
            });
        };

        if !run.has_slot_id(slot) {
            return Err(EvalError::UnknownSlot {
                run_id: run_id.to_string(),
                slot: slot.to_string(),
            });
        }

        let Some(trial) = run.slot(slot) else {
            return Ok(TrialStatusReport::NotFound {
                what: format!("slot {} of run {}", slot, run_id),
            });
        };

        if let Some(reason) = &trial.failure {
            return Ok(TrialStatusReport::Failed {
                reason: reason.clone(),
            });
        }

        if trial.is_complete() {
            return Ok(TrialStatusReport::completed(trial));
        }

        let Some(job_handle) = trial.job_handle.as_deref() else {
            return Ok(TrialStatusReport::NotFound {
                what: format!("job handle for slot {} of run {}", slot, run_id),
            });
        };

        match self.advance(run_id, slot, trial, job_handle).await {
            Ok(report) => Ok(report),
            Err(err) => {
                self.record_failure(run_id, slot, &err).await;
                Err(err)
            }
        }
    }

    async fn advance(
        &self,
        run_id: &str,
        slot: &str,
        trial: &TrialResult,
        job_handle: &str,
    ) -> EvalResult<TrialStatusReport> {
        match self.poller.poll(job_handle).await? {
            PollOutcome::InProgress { provider_status } => {
                Ok(TrialStatusReport::InProgress { provider_status })
            }
            PollOutcome::Terminated { reason } => {
                warn!(run_id, slot, job_handle, %reason, "evaluation job terminated");
                let patch = SlotPatch::Failed {
                    model_id: None,
                    reason: reason.clone(),
                };
                self.aggregator.merge(run_id, slot, patch).await?;
                Ok(TrialStatusReport::Failed { reason })
            }
            PollOutcome::Completed { job } => {
                let metrics = self.registry.supported_metrics(&trial.model_id)?;
                let extracted = self.extractor.extract(&job.handle, &metrics).await?;

                let patch = SlotPatch::Scored {
                    metrics: extracted.metrics,
                    summary: extracted.summary,
                };
                let run = self.aggregator.merge(run_id, slot, patch).await?;
                info!(run_id, slot, status = %run.status, "trial results merged");

                let merged = run
                    .slot(slot)
                    .ok_or_else(|| EvalError::Storage(format!("slot {} vanished during merge", slot)))?;
                Ok(TrialStatusReport::completed(merged))
            }
        }
    }

    /// Best-effort: mark the slot failed so the run cannot read as complete
    async fn record_failure(&self, run_id: &str, slot: &str, err: &EvalError) {
        let patch = SlotPatch::Failed {
            model_id: None,
            reason: err.to_string(),
        };
        if let Err(record_err) = self.aggregator.merge(run_id, slot, patch).await {
            warn!(run_id, slot, error = %record_err, "could not record trial failure");
        }
    }

    /// Fetch a run with its status freshly derived from its slots
    pub async fn get_run(&self, run_id: &str) -> EvalResult<Run> {
        validate_run_id(run_id)?;
        self.aggregator.recompute_status(run_id).await?;
        self.aggregator.load(run_id).await
    }

    pub async fn list_runs(&self) -> EvalResult<Vec<RunSummary>> {
        self.aggregator.list().await
    }
}

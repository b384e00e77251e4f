use crate::error::EvalResult;
use crate::models::{EvaluationJob, JobState};
use crate::provider::EvaluationProvider;
use std::sync::Arc;
use tracing::debug;

/// What a single poll observed
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Not terminal yet; carries the provider's own status word
    InProgress { provider_status: String },
    /// Finished successfully; the artifact is ready for extraction
    Completed { job: EvaluationJob },
    /// Failed or stopped; nothing to extract
    Terminated { reason: String },
}

/// Observes evaluation jobs one poll at a time.
///
/// There is no loop or wait here; an external scheduler re-invokes `poll`
/// until it returns a terminal outcome.
#[derive(Clone)]
pub struct JobPoller {
    provider: Arc<dyn EvaluationProvider>,
}

impl JobPoller {
    pub fn new(provider: Arc<dyn EvaluationProvider>) -> Self {
        Self { provider }
    }

    pub async fn poll(&self, job_handle: &str) -> EvalResult<PollOutcome> {
        let job = self.provider.get_job(job_handle).await?;
        let state = job.state();
        debug!(job_handle, status = %job.status, ?state, "polled evaluation job");

        Ok(match state {
            JobState::Completed => PollOutcome::Completed { job },
            state if state.is_terminal() => PollOutcome::Terminated {
                reason: format!("evaluation job ended with status {}", job.status),
            },
            _ => PollOutcome::InProgress {
                provider_status: job.status,
            },
        })
    }
}

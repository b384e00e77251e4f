//! Run aggregator
//!
//! Every mutation is read-merge-write against the record store: load the
//! current run, touch only the target slot, recompute status, and write the
//! whole record back. Mutations of one run are serialized in-process so a
//! merge never writes back a record read before a sibling's merge landed.
//! Across processes there is no such guard: the record store has no
//! compare-and-swap, so separate processes racing on one run get
//! last-writer-wins on the whole record.

use crate::error::{EvalError, EvalResult};
use crate::models::{Run, RunStatus, RunSummary, TrialResult};
use crate::records::RecordStore;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Identity of a run, used when a trial implicitly creates it
#[derive(Debug, Clone, PartialEq)]
pub struct RunSeed {
    pub run_id: String,
    pub context: String,
    pub category: String,
    pub slot_ids: Vec<String>,
}

/// Change applied to a single slot
#[derive(Debug, Clone, PartialEq)]
pub enum SlotPatch {
    /// A job was (re)submitted for the slot
    Submitted {
        model_id: String,
        job_handle: String,
        dataset_uri: String,
    },
    /// Metrics extracted from a completed job
    Scored {
        metrics: BTreeMap<String, String>,
        summary: String,
    },
    /// The trial hit a terminal failure
    Failed {
        model_id: Option<String>,
        reason: String,
    },
}

impl SlotPatch {
    fn apply(self, trial: &mut TrialResult) {
        match self {
            SlotPatch::Submitted {
                model_id,
                job_handle,
                dataset_uri,
            } => {
                *trial = TrialResult {
                    model_id,
                    job_handle: Some(job_handle),
                    dataset_uri: Some(dataset_uri),
                    ..Default::default()
                };
            }
            SlotPatch::Scored { metrics, summary } => {
                trial.metrics.extend(metrics);
                trial.summary = Some(summary);
            }
            SlotPatch::Failed { model_id, reason } => {
                if let Some(model_id) = model_id {
                    if model_id != trial.model_id {
                        *trial = TrialResult {
                            model_id,
                            ..Default::default()
                        };
                    }
                }
                trial.failure = Some(reason);
            }
        }
    }
}

/// Merge a patch into one slot of `run` and refresh its status
fn merge_slot(run: &mut Run, slot: &str, patch: SlotPatch) -> EvalResult<()> {
    if !run.has_slot_id(slot) {
        return Err(EvalError::UnknownSlot {
            run_id: run.run_id.clone(),
            slot: slot.to_string(),
        });
    }

    patch.apply(run.slots.entry(slot.to_string()).or_default());
    run.status = run.derive_status();
    run.updated_at = Utc::now();
    Ok(())
}

#[derive(Clone)]
pub struct RunAggregator {
    store: Arc<dyn RecordStore>,
    /// One async lock per run id, held across each read-merge-write
    run_locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl RunAggregator {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            run_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn lock_run(&self, run_id: &str) -> EvalResult<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self
                .run_locks
                .lock()
                .map_err(|_| EvalError::Storage("run lock table poisoned".to_string()))?;
            locks.entry(run_id.to_string()).or_default().clone()
        };
        Ok(lock.lock_owned().await)
    }

    pub async fn find(&self, run_id: &str) -> EvalResult<Option<Run>> {
        self.store.get(run_id).await
    }

    pub async fn load(&self, run_id: &str) -> EvalResult<Run> {
        self.find(run_id)
            .await?
            .ok_or_else(|| EvalError::RunNotFound(run_id.to_string()))
    }

    /// Slot universe of the stored run, or of the seed if the run is new
    pub async fn slot_universe(&self, seed: &RunSeed) -> EvalResult<Vec<String>> {
        Ok(match self.find(&seed.run_id).await? {
            Some(run) => run.slot_ids,
            None => seed.slot_ids.clone(),
        })
    }

    /// Merge into an existing run
    pub async fn merge(&self, run_id: &str, slot: &str, patch: SlotPatch) -> EvalResult<Run> {
        let _guard = self.lock_run(run_id).await?;
        let mut run = self.load(run_id).await?;
        merge_slot(&mut run, slot, patch)?;
        self.store.put(&run).await?;

        debug!(run_id, slot, status = %run.status, "merged slot");
        Ok(run)
    }

    /// Merge into a run, creating it from `seed` if absent
    pub async fn upsert(&self, seed: &RunSeed, slot: &str, patch: SlotPatch) -> EvalResult<Run> {
        let _guard = self.lock_run(&seed.run_id).await?;
        let mut run = match self.find(&seed.run_id).await? {
            Some(run) => {
                if run.context != seed.context || run.category != seed.category {
                    warn!(
                        run_id = %run.run_id,
                        "run context is fixed at creation; ignoring the submitted context and category"
                    );
                }
                run
            }
            None => {
                info!(run_id = %seed.run_id, slots = ?seed.slot_ids, "creating run");
                Run::new(&seed.run_id, &seed.context, &seed.category, &seed.slot_ids)
            }
        };

        merge_slot(&mut run, slot, patch)?;
        self.store.put(&run).await?;

        debug!(run_id = %run.run_id, slot, status = %run.status, "upserted slot");
        Ok(run)
    }

    /// Recompute the run status from its slots, persisting it if it changed
    pub async fn recompute_status(&self, run_id: &str) -> EvalResult<RunStatus> {
        let _guard = self.lock_run(run_id).await?;
        let mut run = self.load(run_id).await?;
        let status = run.derive_status();

        if status != run.status {
            info!(run_id, from = %run.status, to = %status, "run status changed");
            run.status = status;
            run.updated_at = Utc::now();
            self.store.put(&run).await?;
        }

        Ok(status)
    }

    pub async fn list(&self) -> EvalResult<Vec<RunSummary>> {
        let runs = self.store.scan().await?;
        Ok(runs.iter().map(Run::summary).collect())
    }
}

//! In-process collaborators for tests

use crate::blob::{BlobLocation, BlobStore};
use crate::error::{EvalError, EvalResult};
use crate::models::{EvaluationJob, Run};
use crate::provider::{EvaluationJobRequest, EvaluationProvider};
use crate::records::RecordStore;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Provider whose inference responses and job states are set by the test
#[derive(Default)]
pub struct ScriptedProvider {
    responses: Mutex<HashMap<String, Value>>,
    jobs: Mutex<HashMap<String, EvaluationJob>>,
    pub invocations: Mutex<Vec<(String, Value)>>,
    pub submissions: Mutex<Vec<EvaluationJobRequest>>,
    pub fail_inference: AtomicBool,
    pub fail_submit: AtomicBool,
    pub fail_get_job: AtomicBool,
    counter: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canned response body for a model
    pub fn respond(&self, model_id: &str, body: Value) {
        self.responses
            .lock()
            .unwrap()
            .insert(model_id.to_string(), body);
    }

    fn next_handle(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("arn:aws:bedrock:us-east-1:000000000000:evaluation-job/job{:04}", n)
    }

    /// Register a job directly, bypassing submission
    pub fn add_job(&self, model_id: &str, output_location: &str, status: &str) -> String {
        let handle = self.next_handle();
        let job = EvaluationJob {
            handle: handle.clone(),
            status: status.to_string(),
            job_name: format!("summ-eval-{}", &handle[handle.len() - 7..]),
            model_identifier: model_id.to_string(),
            artifact_location: Some(output_location.to_string()),
        };
        self.jobs.lock().unwrap().insert(handle.clone(), job);
        handle
    }

    pub fn job(&self, handle: &str) -> Option<EvaluationJob> {
        self.jobs.lock().unwrap().get(handle).cloned()
    }

    pub fn set_status(&self, handle: &str, status: &str) {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(handle) {
            job.status = status.to_string();
        }
    }
}

#[async_trait]
impl EvaluationProvider for ScriptedProvider {
    async fn invoke_inference(&self, model_id: &str, body: &Value) -> EvalResult<Value> {
        if self.fail_inference.load(Ordering::SeqCst) {
            return Err(EvalError::provider("invoke_inference", "throttled"));
        }
        self.invocations
            .lock()
            .unwrap()
            .push((model_id.to_string(), body.clone()));
        self.responses
            .lock()
            .unwrap()
            .get(model_id)
            .cloned()
            .ok_or_else(|| EvalError::provider("invoke_inference", "no scripted response"))
    }

    async fn submit_evaluation_job(&self, request: &EvaluationJobRequest) -> EvalResult<String> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(EvalError::provider("submit_evaluation_job", "quota exceeded"));
        }

        let handle = self.next_handle();
        let model_identifier = request
            .model_config
            .pointer("/models/0/bedrockModel/modelIdentifier")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        self.jobs.lock().unwrap().insert(
            handle.clone(),
            EvaluationJob {
                handle: handle.clone(),
                status: "InProgress".to_string(),
                job_name: request.job_name.clone(),
                model_identifier,
                artifact_location: Some(request.output_location.clone()),
            },
        );
        self.submissions.lock().unwrap().push(request.clone());
        Ok(handle)
    }

    async fn get_job(&self, job_handle: &str) -> EvalResult<EvaluationJob> {
        if self.fail_get_job.load(Ordering::SeqCst) {
            return Err(EvalError::provider("get_job", "connection reset"));
        }
        self.job(job_handle)
            .ok_or_else(|| EvalError::provider("get_job", format!("unknown job {}", job_handle)))
    }
}

/// One result-artifact line in the provider's output format
pub fn result_line(scores: &[(&str, &str)], reference_response: &str) -> String {
    let scores: Vec<Value> = scores
        .iter()
        .map(|(name, result)| json!({"metricName": name, "result": result}))
        .collect();

    let line = json!({
        "automatedEvaluationResult": {"scores": scores},
        "inputRecord": {
            "prompt": "ignored",
            "referenceResponse": reference_response,
        },
    });
    format!("{}\n", line)
}

/// In-memory blob store keyed by full location URI
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put_object(&self, location: &BlobLocation, bytes: Vec<u8>) -> EvalResult<()> {
        self.objects
            .lock()
            .unwrap()
            .insert(location.to_string(), bytes);
        Ok(())
    }

    async fn list_objects(&self, prefix: &BlobLocation) -> EvalResult<Vec<BlobLocation>> {
        let prefix = prefix.to_string();
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|uri| uri.starts_with(&prefix))
            .map(|uri| BlobLocation::parse(uri))
            .collect()
    }

    async fn get_object(&self, location: &BlobLocation) -> EvalResult<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&location.to_string())
            .cloned()
            .ok_or_else(|| EvalError::provider("get_object", format!("{}: no such object", location)))
    }
}

/// In-memory record store
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    runs: Mutex<BTreeMap<String, Run>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, run_id: &str) -> EvalResult<Option<Run>> {
        Ok(self.runs.lock().unwrap().get(run_id).cloned())
    }

    async fn put(&self, run: &Run) -> EvalResult<()> {
        self.runs
            .lock()
            .unwrap()
            .insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    async fn scan(&self) -> EvalResult<Vec<Run>> {
        Ok(self.runs.lock().unwrap().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(uri: &str) -> BlobLocation {
        BlobLocation::parse(uri).unwrap()
    }

    #[tokio::test]
    async fn test_memory_blob_store_prefix_listing() {
        let store = MemoryBlobStore::new();
        store
            .put_object(&loc("s3://out/job/1.jsonl"), b"a".to_vec())
            .await
            .unwrap();
        store
            .put_object(&loc("s3://out/jobx/2.jsonl"), b"b".to_vec())
            .await
            .unwrap();

        let listed = store.list_objects(&loc("s3://out/job/")).await.unwrap();
        assert_eq!(listed, vec![loc("s3://out/job/1.jsonl")]);
        assert_eq!(store.get_object(&listed[0]).await.unwrap(), b"a");
        assert!(store.get_object(&loc("s3://out/none")).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_record_store_overwrites_whole_record() {
        let store = MemoryRecordStore::new();
        let slots = vec!["model1".to_string()];
        let mut run = Run::new("r1", "ctx", "c", &slots);
        store.put(&run).await.unwrap();

        run.context = "changed".to_string();
        store.put(&run).await.unwrap();

        let loaded = store.get("r1").await.unwrap().unwrap();
        assert_eq!(loaded.context, "changed");
        assert_eq!(store.scan().await.unwrap().len(), 1);
    }
}

//! Evaluation provider boundary
//!
//! The provider runs synchronous inference and owns asynchronous evaluation
//! jobs. This crate only submits jobs and observes them; it never transitions
//! a job's state itself.

use crate::config::ProviderConfig;
use crate::error::{EvalError, EvalResult};
use crate::models::EvaluationJob;
use async_trait::async_trait;
use reqwest::Url;
use serde_json::{Value, json};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::debug;

/// Everything needed to create one evaluation job
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationJobRequest {
    pub job_name: String,
    /// Execution role the provider assumes while running the job
    pub role: String,
    /// Task, dataset, and requested metric configuration
    pub metric_config: Value,
    /// Per-model inference configuration
    pub model_config: Value,
    /// Blob-store prefix the provider writes its artifacts under
    pub output_location: String,
}

/// External inference and evaluation service
#[async_trait]
pub trait EvaluationProvider: Send + Sync {
    /// Run one synchronous inference call and return the raw response body
    async fn invoke_inference(&self, model_id: &str, body: &Value) -> EvalResult<Value>;

    /// Create an asynchronous evaluation job and return its handle
    async fn submit_evaluation_job(&self, request: &EvaluationJobRequest) -> EvalResult<String>;

    /// Describe an existing job
    async fn get_job(&self, job_handle: &str) -> EvalResult<EvaluationJob>;
}

/// Evaluation provider reached through a JSON-over-HTTP gateway
pub struct HttpEvaluationProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    rate_limit_rps: f64,
    last_request: Mutex<Option<Instant>>,
}

impl HttpEvaluationProvider {
    pub fn new(
        endpoint: &str,
        api_key: Option<String>,
        rate_limit_rps: f64,
        timeout: Duration,
    ) -> EvalResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EvalError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key,
            rate_limit_rps,
            last_request: Mutex::new(None),
        })
    }

    /// Build a provider from configuration, reading the API key from the environment
    pub fn from_config(config: &ProviderConfig) -> EvalResult<Self> {
        let api_key = match &config.env_var_api_key {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                EvalError::Config(format!("Environment variable {} not found", var))
            })?),
            None => None,
        };

        Self::new(
            &config.endpoint,
            api_key,
            config.rate_limit_rps,
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Enforce the minimum interval between requests
    async fn enforce_rate_limit(&self) {
        if self.rate_limit_rps.is_nan() || self.rate_limit_rps <= 0.0 {
            return;
        }

        let Ok(min_interval) = Duration::try_from_secs_f64(1.0 / self.rate_limit_rps) else {
            return;
        };
        let mut last_request = self.last_request.lock().await;

        if let Some(last_time) = *last_request {
            let elapsed = last_time.elapsed();
            if elapsed < min_interval {
                sleep(min_interval - elapsed).await;
            }
        }

        *last_request = Some(Instant::now());
    }

    /// Endpoint URL with each segment percent-encoded
    fn url(&self, segments: &[&str]) -> EvalResult<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| EvalError::Config(format!("Invalid provider endpoint: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| EvalError::Config(format!("Provider endpoint cannot be a base: {}", self.endpoint)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, operation: &str, request: reqwest::RequestBuilder) -> EvalResult<Value> {
        self.enforce_rate_limit().await;

        let request = match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|e| EvalError::provider(operation, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EvalError::provider(
                operation,
                format!("HTTP {}: {}", status, body),
            ));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| EvalError::provider(operation, e))
    }
}

/// Translate a job description from the gateway's wire shape
fn parse_job(job_handle: &str, body: &Value) -> EvalResult<EvaluationJob> {
    let status = body
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| EvalError::provider("get_job", "response carries no status"))?;

    let text = |pointer: &str| {
        body.pointer(pointer)
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    Ok(EvaluationJob {
        handle: job_handle.to_string(),
        status: status.to_string(),
        job_name: text("/jobName").unwrap_or_default(),
        model_identifier: text("/inferenceConfig/models/0/bedrockModel/modelIdentifier")
            .unwrap_or_default(),
        artifact_location: text("/outputDataConfig/s3Uri"),
    })
}

#[async_trait]
impl EvaluationProvider for HttpEvaluationProvider {
    async fn invoke_inference(&self, model_id: &str, body: &Value) -> EvalResult<Value> {
        let url = self.url(&["model", model_id, "invoke"])?;
        debug!(model_id, %url, "invoking model");
        self.send("invoke_inference", self.client.post(url).json(body))
            .await
    }

    async fn submit_evaluation_job(&self, request: &EvaluationJobRequest) -> EvalResult<String> {
        let url = self.url(&["evaluation-jobs"])?;
        let body = json!({
            "jobName": request.job_name,
            "roleArn": request.role,
            "evaluationConfig": request.metric_config,
            "inferenceConfig": request.model_config,
            "outputDataConfig": {"s3Uri": request.output_location},
        });

        debug!(job_name = %request.job_name, "creating evaluation job");
        let response = self
            .send("submit_evaluation_job", self.client.post(url).json(&body))
            .await?;

        response
            .get("jobArn")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| EvalError::provider("submit_evaluation_job", "response carries no jobArn"))
    }

    async fn get_job(&self, job_handle: &str) -> EvalResult<EvaluationJob> {
        let url = self.url(&["evaluation-jobs", job_handle])?;
        let body = self.send("get_job", self.client.get(url)).await?;
        parse_job(job_handle, &body)
    }
}

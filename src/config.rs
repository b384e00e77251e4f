use crate::models::GenerationParams;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Connection settings for the evaluation provider gateway
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Base URL of the provider gateway
    pub endpoint: String,
    /// Environment variable name containing the API key
    #[serde(default)]
    pub env_var_api_key: Option<String>,
    /// Rate limit for provider requests per second
    #[serde(default = "default_rate_limit")]
    pub rate_limit_rps: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// How trials are turned into evaluation jobs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvaluationSettings {
    /// Environment variable holding the job execution role
    #[serde(default = "default_env_var_role")]
    pub env_var_role: String,
    /// Execution role used when the environment variable is unset
    #[serde(default)]
    pub role: Option<String>,
    /// Blob prefix that receives per-slot prompt datasets
    #[serde(default = "default_dataset_root")]
    pub dataset_root: String,
    /// Blob prefix the provider writes job artifacts under
    #[serde(default = "default_output_root")]
    pub output_root: String,
    #[serde(default = "default_task_type")]
    pub task_type: String,
    #[serde(default = "default_dataset_name")]
    pub dataset_name: String,
    #[serde(default = "default_job_name_prefix")]
    pub job_name_prefix: String,
    /// Inference prompt; `{context}` is replaced with the run context
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,
    /// Ordered slot universe for new runs
    #[serde(default = "default_slots")]
    pub slots: Vec<String>,
    #[serde(default = "default_category")]
    pub default_category: String,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            env_var_role: default_env_var_role(),
            role: None,
            dataset_root: default_dataset_root(),
            output_root: default_output_root(),
            task_type: default_task_type(),
            dataset_name: default_dataset_name(),
            job_name_prefix: default_job_name_prefix(),
            prompt_template: default_prompt_template(),
            slots: default_slots(),
            default_category: default_category(),
        }
    }
}

impl EvaluationSettings {
    /// Resolve the execution role, preferring the environment
    pub fn resolve_role(&self) -> Result<String> {
        match std::env::var(&self.env_var_role) {
            Ok(role) if !role.is_empty() => Ok(role),
            _ => self.role.clone().with_context(|| {
                format!(
                    "Environment variable {} not found and no role configured",
                    self.env_var_role
                )
            }),
        }
    }

    pub fn render_prompt(&self, context: &str) -> String {
        self.prompt_template.replace("{context}", context)
    }
}

/// Local directories backing the blob and record stores
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_blob_dir")]
    pub blob_dir: PathBuf,
    #[serde(default = "default_record_dir")]
    pub record_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            blob_dir: default_blob_dir(),
            record_dir: default_record_dir(),
        }
    }
}

fn default_rate_limit() -> f64 {
    5.0
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_env_var_role() -> String {
    "EVAL_ROLE_ARN".to_string()
}

fn default_dataset_root() -> String {
    "s3://input-datas-directory".to_string()
}

fn default_output_root() -> String {
    "s3://outputs-data-directory".to_string()
}

fn default_task_type() -> String {
    "Summarization".to_string()
}

fn default_dataset_name() -> String {
    "CustomDataset".to_string()
}

fn default_job_name_prefix() -> String {
    "summ-eval".to_string()
}

fn default_prompt_template() -> String {
    "summarise the content as follows: {context}".to_string()
}

fn default_slots() -> Vec<String> {
    vec!["model1".to_string(), "model2".to_string(), "model3".to_string()]
}

fn default_category() -> String {
    "default_category".to_string()
}

fn default_blob_dir() -> PathBuf {
    PathBuf::from(".eval/blobs")
}

fn default_record_dir() -> PathBuf {
    PathBuf::from(".eval/runs")
}

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub provider: ProviderConfig,
    #[serde(default)]
    pub evaluation: EvaluationSettings,
    /// Default generation parameters, overridable per trial
    #[serde(default)]
    pub generation: GenerationParams,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config: {}", path.display()))?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let slots = &self.evaluation.slots;
        if slots.is_empty() {
            bail!("evaluation.slots must name at least one slot");
        }

        let mut seen = HashSet::new();
        for slot in slots {
            if slot.is_empty() {
                bail!("evaluation.slots contains an empty slot name");
            }
            if !seen.insert(slot) {
                bail!("evaluation.slots contains duplicate slot {:?}", slot);
            }
        }

        let rps = self.provider.rate_limit_rps;
        if !rps.is_finite() {
            bail!("provider.rate_limit_rps must be a finite number, got {}", rps);
        }
        if rps > 0.0 && Duration::try_from_secs_f64(1.0 / rps).is_err() {
            bail!("provider.rate_limit_rps {} is too small to pace requests", rps);
        }

        if !self.evaluation.prompt_template.contains("{context}") {
            bail!("evaluation.prompt_template must contain a {{context}} placeholder");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", content).unwrap();
        temp_file
    }

    #[test]
    fn test_config_parsing() {
        let toml_content = r#"
[provider]
endpoint = "https://eval-gateway.example.com"
env_var_api_key = "EVAL_PROVIDER_API_KEY"
rate_limit_rps = 2.5
timeout_secs = 30

[evaluation]
role = "arn:aws:iam::123:role/eval"
dataset_root = "s3://datasets"
output_root = "s3://outputs"
slots = ["left", "right"]
prompt_template = "Summarize: {context}"

[generation]
max_tokens = 256
temperature = 0.3
stop_sequences = ["END"]

[storage]
blob_dir = "/tmp/blobs"
record_dir = "/tmp/runs"
"#;

        let temp_file = write_config(toml_content);
        let config = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(config.provider.endpoint, "https://eval-gateway.example.com");
        assert_eq!(config.provider.rate_limit_rps, 2.5);
        assert_eq!(config.provider.timeout_secs, 30);
        assert_eq!(config.evaluation.slots, vec!["left", "right"]);
        assert_eq!(config.evaluation.dataset_root, "s3://datasets");
        assert_eq!(config.generation.max_tokens, 256);
        assert_eq!(config.generation.temperature, 0.3);
        assert_eq!(config.generation.top_k, 250);
        assert_eq!(config.generation.stop_sequences, vec!["END"]);
        assert_eq!(config.storage.record_dir, PathBuf::from("/tmp/runs"));
        assert_eq!(config.evaluation.render_prompt("abc"), "Summarize: abc");
    }

    #[test]
    fn test_config_defaults() {
        let toml_content = r#"
[provider]
endpoint = "http://localhost:8080"
"#;

        let temp_file = write_config(toml_content);
        let config = Config::from_file(temp_file.path()).unwrap();

        assert_eq!(config.provider.env_var_api_key, None);
        assert_eq!(config.provider.rate_limit_rps, 5.0);
        assert_eq!(config.evaluation.slots, vec!["model1", "model2", "model3"]);
        assert_eq!(config.evaluation.task_type, "Summarization");
        assert_eq!(config.evaluation.dataset_name, "CustomDataset");
        assert_eq!(config.evaluation.default_category, "default_category");
        assert_eq!(config.generation, GenerationParams::default());
        assert_eq!(config.storage.blob_dir, PathBuf::from(".eval/blobs"));
    }

    #[test]
    fn test_duplicate_slots_rejected() {
        let toml_content = r#"
[provider]
endpoint = "http://localhost:8080"

[evaluation]
slots = ["model1", "model1"]
"#;

        let temp_file = write_config(toml_content);
        assert!(Config::from_file(temp_file.path()).is_err());
    }

    #[test]
    fn test_template_without_placeholder_rejected() {
        let toml_content = r#"
[provider]
endpoint = "http://localhost:8080"

[evaluation]
prompt_template = "Summarize the text"
"#;

        let temp_file = write_config(toml_content);
        let err = Config::from_file(temp_file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("{context}"));
    }

    #[test]
    fn test_non_finite_rate_limit_rejected() {
        for value in ["nan", "inf", "1e-320"] {
            let toml_content = format!(
                "[provider]\nendpoint = \"http://localhost:8080\"\nrate_limit_rps = {}\n",
                value
            );
            let temp_file = write_config(&toml_content);
            let err = Config::from_file(temp_file.path()).unwrap_err();
            assert!(format!("{:#}", err).contains("rate_limit_rps"), "{}", value);
        }
    }

    #[test]
    fn test_missing_file() {
        let result = Config::from_file(Path::new("/nonexistent/eval.toml"));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_resolve_role_falls_back_to_configured_value() {
        let settings = EvaluationSettings {
            env_var_role: "MODEL_EVAL_TEST_UNSET_ROLE".to_string(),
            role: Some("arn:role/fallback".to_string()),
            ..Default::default()
        };
        unsafe {
            std::env::remove_var("MODEL_EVAL_TEST_UNSET_ROLE");
        }
        assert_eq!(settings.resolve_role().unwrap(), "arn:role/fallback");

        let settings = EvaluationSettings {
            role: None,
            ..settings
        };
        assert!(settings.resolve_role().is_err());
    }
}

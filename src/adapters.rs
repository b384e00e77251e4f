//! Provider adapter registry
//!
//! Each provider family speaks its own request and response envelope. Model
//! identifiers are resolved to a family by longest-prefix match over a
//! static table, so `anthropic.claude-3-*` and `anthropic.claude-v2*` land in
//! different families even though they share a vendor prefix.

use crate::error::{EvalError, EvalResult};
use crate::models::{GenerationParams, Metric};
use serde_json::{Value, json};

const FULL_METRICS: &[Metric] = &[Metric::Accuracy, Metric::Robustness, Metric::Toxicity];
const BASIC_METRICS: &[Metric] = &[Metric::Accuracy, Metric::Robustness];

/// Request/response wire shape of one provider family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFamily {
    /// Claude v2 / instant text-completion API
    ClaudeText,
    /// Claude 3 messages API
    ClaudeMessages,
    CohereCommandText,
    CohereCommandR,
    Ai21Jurassic,
    MetaLlama3,
    Mistral,
    AmazonTitan,
}

/// Prefix table; resolution picks the longest matching prefix
const FAMILY_PREFIXES: &[(&str, ProviderFamily)] = &[
    ("anthropic.claude-instant-v1", ProviderFamily::ClaudeText),
    ("anthropic.claude-v2", ProviderFamily::ClaudeText),
    ("anthropic.claude-3", ProviderFamily::ClaudeMessages),
    ("cohere.command-text", ProviderFamily::CohereCommandText),
    ("cohere.command-r", ProviderFamily::CohereCommandR),
    ("ai21.j2", ProviderFamily::Ai21Jurassic),
    ("meta.llama3", ProviderFamily::MetaLlama3),
    ("amazon.titan", ProviderFamily::AmazonTitan),
    ("mistral.", ProviderFamily::Mistral),
];

impl ProviderFamily {
    /// Encode a prompt into this family's request body
    pub fn encode(self, prompt: &str, params: &GenerationParams) -> Value {
        match self {
            ProviderFamily::ClaudeText => {
                let mut stop_sequences = params.stop_sequences.clone();
                stop_sequences.push("\n\nHuman:".to_string());
                json!({
                    "prompt": format!("\n\nHuman: {}\n\nAssistant:", prompt),
                    "max_tokens_to_sample": params.max_tokens,
                    "temperature": params.temperature,
                    "top_p": params.top_p,
                    "top_k": params.top_k,
                    "stop_sequences": stop_sequences,
                })
            }
            ProviderFamily::ClaudeMessages => json!({
                "messages": [{"role": "user", "content": prompt}],
                "max_tokens": params.max_tokens,
                "temperature": params.temperature,
                "top_p": params.top_p,
                "top_k": params.top_k,
                "anthropic_version": "bedrock-2023-05-31",
            }),
            ProviderFamily::CohereCommandText => json!({
                "prompt": prompt,
                "max_tokens": params.max_tokens,
                "temperature": params.temperature,
                "p": params.top_p,
                "k": params.top_k,
                "stop_sequences": params.stop_sequences,
                "return_likelihoods": "NONE",
            }),
            ProviderFamily::CohereCommandR => json!({
                "message": prompt,
                "max_tokens": params.max_tokens,
                "temperature": params.temperature,
                "p": params.top_p,
                "k": params.top_k,
                "stop_sequences": params.stop_sequences,
            }),
            ProviderFamily::Ai21Jurassic => json!({
                "prompt": prompt,
                "maxTokens": params.max_tokens,
                "temperature": params.temperature,
                "topP": params.top_p,
                "stopSequences": params.stop_sequences,
                "countPenalty": {"scale": 0},
                "presencePenalty": {"scale": 0},
                "frequencyPenalty": {"scale": 0},
            }),
            ProviderFamily::MetaLlama3 => json!({
                "prompt": format!("Human: {}\nAssistant:", prompt),
                "max_gen_len": params.max_tokens,
                "temperature": params.temperature,
                "top_p": params.top_p,
            }),
            ProviderFamily::Mistral => json!({
                "prompt": format!("<s>[INST] {} [/INST]", prompt),
                "max_tokens": params.max_tokens,
                "temperature": params.temperature,
                "top_p": params.top_p,
            }),
            ProviderFamily::AmazonTitan => json!({
                "inputText": prompt,
                "textGenerationConfig": {
                    "maxTokenCount": params.max_tokens,
                    "temperature": params.temperature,
                    "topP": params.top_p,
                    "stopSequences": params.stop_sequences,
                },
            }),
        }
    }

    /// JSON pointer to the generated text in this family's response
    fn response_pointer(self) -> &'static str {
        match self {
            ProviderFamily::ClaudeText => "/completion",
            ProviderFamily::ClaudeMessages => "/content/0/text",
            ProviderFamily::CohereCommandText => "/generations/0/text",
            ProviderFamily::CohereCommandR => "/text",
            ProviderFamily::Ai21Jurassic => "/completions/0/data/text",
            ProviderFamily::MetaLlama3 => "/generation",
            ProviderFamily::Mistral => "/outputs/0/text",
            ProviderFamily::AmazonTitan => "/results/0/outputText",
        }
    }

    /// Extract the generated text. A missing field decodes to an empty string.
    pub fn decode(self, body: &Value) -> String {
        body.pointer(self.response_pointer())
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    pub fn supported_metrics(self) -> &'static [Metric] {
        match self {
            ProviderFamily::ClaudeText
            | ProviderFamily::ClaudeMessages
            | ProviderFamily::AmazonTitan => FULL_METRICS,
            ProviderFamily::CohereCommandText
            | ProviderFamily::CohereCommandR
            | ProviderFamily::Ai21Jurassic
            | ProviderFamily::MetaLlama3
            | ProviderFamily::Mistral => BASIC_METRICS,
        }
    }
}

/// Resolves model identifiers to provider families
#[derive(Debug, Clone)]
pub struct AdapterRegistry {
    prefixes: Vec<(String, ProviderFamily)>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl AdapterRegistry {
    /// Registry over the built-in family table
    pub fn builtin() -> Self {
        Self {
            prefixes: FAMILY_PREFIXES
                .iter()
                .map(|(prefix, family)| (prefix.to_string(), *family))
                .collect(),
        }
    }

    /// Resolve a model identifier by longest matching prefix
    pub fn resolve(&self, model_id: &str) -> EvalResult<ProviderFamily> {
        self.prefixes
            .iter()
            .filter(|(prefix, _)| model_id.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, family)| *family)
            .ok_or_else(|| EvalError::UnsupportedModel {
                model_id: model_id.to_string(),
            })
    }

    pub fn encode_request(
        &self,
        model_id: &str,
        prompt: &str,
        params: &GenerationParams,
    ) -> EvalResult<Value> {
        Ok(self.resolve(model_id)?.encode(prompt, params))
    }

    pub fn decode_response(&self, model_id: &str, body: &Value) -> EvalResult<String> {
        Ok(self.resolve(model_id)?.decode(body))
    }

    pub fn supported_metrics(&self, model_id: &str) -> EvalResult<Vec<Metric>> {
        Ok(self.resolve(model_id)?.supported_metrics().to_vec())
    }

    /// Per-model inference config embedded in an evaluation job request.
    ///
    /// `inferenceParams` is a JSON document serialized into a string.
    pub fn inference_config(&self, model_id: &str, params: &GenerationParams) -> EvalResult<Value> {
        self.resolve(model_id)?;
        let inference_params = json!({
            "maxTokens": params.max_tokens,
            "temperature": params.temperature,
            "topP": params.top_p,
            "stopSequences": params.stop_sequences,
        });

        Ok(json!({
            "bedrockModel": {
                "modelIdentifier": model_id,
                "inferenceParams": serde_json::to_string(&inference_params)?,
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One representative model id per family, a canned response body, and its text
    fn family_fixtures() -> Vec<(&'static str, Value, &'static str)> {
        vec![
            ("anthropic.claude-v2:1", json!({"completion": "claude text"}), "claude text"),
            ("anthropic.claude-instant-v1", json!({"completion": "instant"}), "instant"),
            (
                "anthropic.claude-3-sonnet-20240229-v1:0",
                json!({"content": [{"type": "text", "text": "claude3 text"}]}),
                "claude3 text",
            ),
            (
                "cohere.command-text-v14",
                json!({"generations": [{"text": "cohere text"}]}),
                "cohere text",
            ),
            ("cohere.command-r-plus-v1:0", json!({"text": "command r"}), "command r"),
            (
                "ai21.j2-ultra-v1",
                json!({"completions": [{"data": {"text": "ai21 text"}}]}),
                "ai21 text",
            ),
            ("meta.llama3-8b-instruct-v1:0", json!({"generation": "llama"}), "llama"),
            (
                "mistral.mistral-7b-instruct-v0:2",
                json!({"outputs": [{"text": "mistral text"}]}),
                "mistral text",
            ),
            (
                "amazon.titan-text-express-v1",
                json!({"results": [{"outputText": "titan text"}]}),
                "titan text",
            ),
        ]
    }

    #[test]
    fn test_every_family_decodes_its_own_envelope() {
        let registry = AdapterRegistry::builtin();
        let params = GenerationParams::default();

        for (model_id, body, expected) in family_fixtures() {
            let request = registry
                .encode_request(model_id, "summarise this", &params)
                .unwrap();
            assert!(request.is_object(), "{} encodes an object", model_id);

            let text = registry.decode_response(model_id, &body).unwrap();
            assert_eq!(text, expected, "decoding {}", model_id);
        }
    }

    #[test]
    fn test_claude_families_do_not_collide() {
        let registry = AdapterRegistry::builtin();
        assert_eq!(
            registry.resolve("anthropic.claude-3-haiku-20240307-v1:0").unwrap(),
            ProviderFamily::ClaudeMessages
        );
        assert_eq!(
            registry.resolve("anthropic.claude-v2").unwrap(),
            ProviderFamily::ClaudeText
        );
        assert_eq!(
            registry.resolve("cohere.command-r-v1:0").unwrap(),
            ProviderFamily::CohereCommandR
        );
    }

    #[test]
    fn test_longest_prefix_wins_regardless_of_order() {
        let registry = AdapterRegistry {
            prefixes: vec![
                ("anthropic.".to_string(), ProviderFamily::ClaudeText),
                ("anthropic.claude-3".to_string(), ProviderFamily::ClaudeMessages),
            ],
        };
        assert_eq!(
            registry.resolve("anthropic.claude-3-opus").unwrap(),
            ProviderFamily::ClaudeMessages
        );
        assert_eq!(
            registry.resolve("anthropic.claude-2").unwrap(),
            ProviderFamily::ClaudeText
        );
    }

    #[test]
    fn test_unknown_model_is_rejected() {
        let registry = AdapterRegistry::builtin();
        let err = registry
            .encode_request("openai.gpt-4", "hi", &GenerationParams::default())
            .unwrap_err();
        match err {
            EvalError::UnsupportedModel { model_id } => assert_eq!(model_id, "openai.gpt-4"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(registry.supported_metrics("openai.gpt-4").is_err());
    }

    #[test]
    fn test_missing_response_field_decodes_empty() {
        let registry = AdapterRegistry::builtin();
        let text = registry
            .decode_response("anthropic.claude-3-sonnet", &json!({"content": []}))
            .unwrap();
        assert_eq!(text, "");
        let text = registry
            .decode_response("amazon.titan-text-lite-v1", &json!({}))
            .unwrap();
        assert_eq!(text, "");
    }

    #[test]
    fn test_claude_text_request_shape() {
        let params = GenerationParams {
            stop_sequences: vec!["STOP".to_string()],
            ..Default::default()
        };
        let body = ProviderFamily::ClaudeText.encode("hello", &params);
        assert_eq!(body["prompt"], "\n\nHuman: hello\n\nAssistant:");
        assert_eq!(body["max_tokens_to_sample"], 512);
        assert_eq!(body["stop_sequences"], json!(["STOP", "\n\nHuman:"]));
        // The caller's parameters are not mutated by the extra stop sequence
        assert_eq!(params.stop_sequences, vec!["STOP".to_string()]);
    }

    #[test]
    fn test_provider_specific_field_names() {
        let params = GenerationParams::default();

        let claude3 = ProviderFamily::ClaudeMessages.encode("hi", &params);
        assert_eq!(claude3["anthropic_version"], "bedrock-2023-05-31");
        assert_eq!(claude3["messages"][0]["content"], "hi");

        let cohere = ProviderFamily::CohereCommandText.encode("hi", &params);
        assert_eq!(cohere["p"], 1.0);
        assert_eq!(cohere["k"], 250);
        assert_eq!(cohere["return_likelihoods"], "NONE");

        let titan = ProviderFamily::AmazonTitan.encode("hi", &params);
        assert_eq!(titan["textGenerationConfig"]["maxTokenCount"], 512);

        let llama = ProviderFamily::MetaLlama3.encode("hi", &params);
        assert_eq!(llama["prompt"], "Human: hi\nAssistant:");
        assert_eq!(llama["max_gen_len"], 512);

        let mistral = ProviderFamily::Mistral.encode("hi", &params);
        assert_eq!(mistral["prompt"], "<s>[INST] hi [/INST]");
    }

    #[test]
    fn test_supported_metrics_by_family() {
        let registry = AdapterRegistry::builtin();
        assert_eq!(
            registry.supported_metrics("anthropic.claude-3-haiku").unwrap(),
            vec![Metric::Accuracy, Metric::Robustness, Metric::Toxicity]
        );
        assert_eq!(
            registry.supported_metrics("meta.llama3-70b-instruct-v1:0").unwrap(),
            vec![Metric::Accuracy, Metric::Robustness]
        );
    }

    #[test]
    fn test_inference_config_embeds_params_as_string() {
        let registry = AdapterRegistry::builtin();
        let config = registry
            .inference_config("amazon.titan-text-express-v1", &GenerationParams::default())
            .unwrap();
        assert_eq!(
            config["bedrockModel"]["modelIdentifier"],
            "amazon.titan-text-express-v1"
        );
        let params: Value =
            serde_json::from_str(config["bedrockModel"]["inferenceParams"].as_str().unwrap())
                .unwrap();
        assert_eq!(params["maxTokens"], 512);
        assert_eq!(params["topP"], 1.0);
    }
}

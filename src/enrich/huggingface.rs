//! Hugging Face inference API client

use super::LanguageModel;
use crate::config::ModelConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
    parameters: InferenceParameters,
    options: InferenceOptions,
}

#[derive(Debug, Serialize)]
struct InferenceParameters {
    min_length: u32,
    max_length: u32,
}

#[derive(Debug, Serialize)]
struct InferenceOptions {
    wait_for_model: bool,
}

#[derive(Debug, Deserialize)]
struct Generation {
    generated_text: String,
}

/// Text-generation client for a hosted model
pub struct HuggingFaceClient {
    config: ModelConfig,
    api_key: String,
    client: reqwest::Client,
}

impl HuggingFaceClient {
    pub fn new(config: ModelConfig, api_key: impl Into<String>) -> Self {
        Self {
            config,
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl LanguageModel for HuggingFaceClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = InferenceRequest {
            inputs: prompt,
            parameters: InferenceParameters {
                min_length: self.config.min_length,
                max_length: self.config.max_length,
            },
            options: InferenceOptions {
                wait_for_model: true,
            },
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Collaborator(format!("Model request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::from_status("Model", status, &body));
        }

        let generations: Vec<Generation> = response
            .json()
            .await
            .map_err(|e| Error::Collaborator(format!("Failed to parse model response: {}", e)))?;

        generations
            .into_iter()
            .next()
            .map(|g| g.generated_text)
            .ok_or_else(|| Error::Collaborator("Model returned no generations".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint() {
        let client = HuggingFaceClient::new(
            ModelConfig {
                base_url: "https://api-inference.huggingface.co/models/".to_string(),
                ..Default::default()
            },
            "hf_test",
        );
        assert_eq!(
            client.endpoint(),
            "https://api-inference.huggingface.co/models/mistralai/Mistral-7B-Instruct-v0.1"
        );
    }

    #[test]
    fn test_request_shape() {
        let request = InferenceRequest {
            inputs: "prompt",
            parameters: InferenceParameters {
                min_length: 50,
                max_length: 400,
            },
            options: InferenceOptions {
                wait_for_model: true,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["inputs"], "prompt");
        assert_eq!(json["parameters"]["max_length"], 400);
        assert_eq!(json["options"]["wait_for_model"], true);
    }

    #[test]
    fn test_generation_parses() {
        let generations: Vec<Generation> =
            serde_json::from_str(r#"[{"generated_text":"[/INST] {'ActionItems':[]}"}]"#).unwrap();
        assert_eq!(generations[0].generated_text, "[/INST] {'ActionItems':[]}");
    }
}

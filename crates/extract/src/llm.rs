use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::prompt;

/// Turns one batch of serialized rows into a raw partial graph.
///
/// The returned value is untrusted; the pipeline validates it against the schema.
#[async_trait]
pub trait StructuredExtractor: Send + Sync {
    async fn extract(&self, batch_text: &str) -> Result<Value>;
}

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    max_repairs: usize,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: String, // "json" for structured output
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            max_repairs: 3,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_max_repairs(mut self, max_repairs: usize) -> Self {
        self.max_repairs = max_repairs;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            format: "json".to_string(),
            options: OllamaOptions { temperature: 0.0 },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            anyhow::bail!("Ollama request failed: {}", response.status());
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(ollama_response.response)
    }

    /// Generate, then ask the model to repair its own output while it is not valid JSON.
    pub async fn generate_json_with_retry(&self, prompt: &str) -> Result<Value> {
        let mut output = self.generate(prompt).await?;

        for attempt in 0..=self.max_repairs {
            match serde_json::from_str::<Value>(&output) {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_repairs => {
                    warn!(attempt = attempt + 1, error = %e, "Invalid JSON from model, asking for a repair");
                    output = self.generate(&prompt::build_retry_prompt(&output)).await?;
                }
                Err(_) => break,
            }
        }

        anyhow::bail!("Failed to get valid JSON after {} repairs", self.max_repairs)
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new("http://localhost:11434", "llama3")
    }
}

#[async_trait]
impl StructuredExtractor for OllamaClient {
    async fn extract(&self, batch_text: &str) -> Result<Value> {
        debug!(model = %self.model, chars = batch_text.len(), "Requesting extraction");
        let prompt = prompt::build_extraction_prompt(batch_text);
        self.generate_json_with_retry(&prompt)
            .await
            .context("Structured extraction failed")
    }
}

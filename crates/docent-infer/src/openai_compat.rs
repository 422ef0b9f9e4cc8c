//! OpenAI-compatible HTTP adapter (OpenRouter and similar gateways).

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use docent_core::{Error, ProviderConfig, Result};

use crate::embedder::{check_batch, render_instruction, Embedder};
use crate::llm::{CompletionMode, LanguageModel};
use crate::retry::with_retry;

/// Client for `/embeddings` and `/chat/completions`.
pub struct OpenAiCompatClient {
    http: Client,
    config: ProviderConfig,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl OpenAiCompatClient {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(Error::Config("provider api key is empty".into()));
        }
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let mut request = self
            .http
            .post(self.url(path))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json");
        if let Some(referer) = &self.config.http_referer {
            request = request.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.config.app_title {
            request = request.header("X-Title", title);
        }

        let response = request
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Http(format!("Request to {} failed: {}", path, e)))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Http(format!("Reading {} response failed: {}", path, e)))?;
        let payload: Option<Value> = serde_json::from_str(&text).ok();

        if !status.is_success() {
            let msg = payload
                .as_ref()
                .and_then(extract_error_message)
                .unwrap_or_else(|| format!("HTTP {} from {}", status, path));
            return Err(Error::Http(msg));
        }
        // Gateways occasionally answer 200 with an error body.
        if let Some(msg) = payload.as_ref().and_then(extract_error_message) {
            return Err(Error::Collaborator(msg));
        }
        payload.ok_or_else(|| Error::Collaborator(format!("Non-JSON response from {}", path)))
    }

    /// Embed raw inputs (no instruction rendering).
    pub async fn embeddings(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = json!({
            "model": self.config.embedding_model,
            "input": inputs,
            "encoding_format": "float",
        });
        debug!(
            "Embedding {} inputs with model {}",
            inputs.len(),
            self.config.embedding_model
        );
        let payload = self.post_json("embeddings", &body).await?;
        let vectors = parse_embeddings(payload)?;
        check_batch(inputs.len(), &vectors)?;
        Ok(vectors)
    }

    /// Single-turn, non-streaming completion at temperature 0.
    pub async fn chat(&self, model: &str, prompt: &str) -> Result<String> {
        let body = json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.0,
            "stream": false,
        });
        debug!("Chat completion with model {}", model);
        let payload = self.post_json("chat/completions", &body).await?;
        parse_chat(&payload)
    }

    fn model_for(&self, mode: CompletionMode) -> &str {
        match mode {
            CompletionMode::Simple => &self.config.simple_model,
            CompletionMode::Complex => &self.config.complex_model,
        }
    }
}

impl Embedder for OpenAiCompatClient {
    fn embed(
        &self,
        texts: Vec<String>,
        instruction_hint: Option<String>,
    ) -> BoxFuture<'_, Result<Vec<Vec<f32>>>> {
        Box::pin(async move {
            let inputs: Vec<String> = texts
                .iter()
                .map(|t| render_instruction(instruction_hint.as_deref(), t))
                .collect();
            if inputs.is_empty() {
                return Ok(Vec::new());
            }
            with_retry(&self.config.retry, "embeddings", || self.embeddings(&inputs)).await
        })
    }
}

impl LanguageModel for OpenAiCompatClient {
    fn complete(&self, prompt: String, mode: CompletionMode) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let model = self.model_for(mode).to_string();
            let operation = format!("chat/{}", mode);
            with_retry(&self.config.retry, &operation, || self.chat(&model, &prompt)).await
        })
    }
}

/// `"{code}: {message}"` (or just the message) from an `{"error": {...}}` body.
fn extract_error_message(payload: &Value) -> Option<String> {
    let err = payload.get("error")?;
    if let Some(msg) = err.as_str() {
        return Some(msg.to_string());
    }
    let msg = err.get("message").and_then(Value::as_str)?;
    match err.get("code").filter(|c| !c.is_null()) {
        Some(Value::String(code)) => Some(format!("{}: {}", code, msg)),
        Some(code) => Some(format!("{}: {}", code, msg)),
        None => Some(msg.to_string()),
    }
}

fn parse_embeddings(payload: Value) -> Result<Vec<Vec<f32>>> {
    let response: EmbeddingResponse = serde_json::from_value(payload)
        .map_err(|e| Error::Collaborator(format!("Malformed embeddings response: {}", e)))?;
    if response.data.is_empty() {
        return Err(Error::Collaborator("Embeddings response has no data".into()));
    }
    let mut items = response.data;
    if items.iter().all(|item| item.index.is_some()) {
        items.sort_by_key(|item| item.index);
    }
    Ok(items.into_iter().map(|item| item.embedding).collect())
}

fn parse_chat(payload: &Value) -> Result<String> {
    let content = payload["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| Error::Collaborator("Chat response missing choices[0].message.content".into()))?;
    Ok(content.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_error_message() {
        let payload = json!({"error": {"code": 429, "message": "rate limited"}});
        assert_eq!(extract_error_message(&payload).as_deref(), Some("429: rate limited"));

        let payload = json!({"error": {"code": "bad_model", "message": "no such model"}});
        assert_eq!(
            extract_error_message(&payload).as_deref(),
            Some("bad_model: no such model")
        );

        let payload = json!({"error": {"message": "oops"}});
        assert_eq!(extract_error_message(&payload).as_deref(), Some("oops"));

        assert!(extract_error_message(&json!({"data": []})).is_none());
    }

    #[test]
    fn test_parse_embeddings_orders_by_index() {
        let payload = json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]},
            ]
        });
        let vectors = parse_embeddings(payload).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_embeddings_rejects_empty_data() {
        assert!(matches!(
            parse_embeddings(json!({"data": []})),
            Err(Error::Collaborator(_))
        ));
        assert!(matches!(
            parse_embeddings(json!({"object": "list"})),
            Err(Error::Collaborator(_))
        ));
    }

    #[test]
    fn test_parse_chat_trims_content() {
        let payload = json!({"choices": [{"message": {"role": "assistant", "content": "  yes \n"}}]});
        assert_eq!(parse_chat(&payload).unwrap(), "yes");
        assert!(parse_chat(&json!({"choices": []})).is_err());
    }

    #[test]
    fn test_new_requires_api_key() {
        assert!(matches!(
            OpenAiCompatClient::new(ProviderConfig::default()),
            Err(Error::Config(_))
        ));
        let config = ProviderConfig {
            api_key: "sk-test".into(),
            base_url: "http://localhost:9/v1/".into(),
            ..Default::default()
        };
        let client = OpenAiCompatClient::new(config).unwrap();
        assert_eq!(client.url("embeddings"), "http://localhost:9/v1/embeddings");
        assert_eq!(client.model_for(CompletionMode::Complex), client.config().complex_model);
    }
}

//! HTTP clients for the generative and embedding oracles.

use super::models::{Usage, MODEL_MAX_TOKENS};
use super::{OracleRequest, TextOracle};
use crate::util::truncate;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// OpenRouter chat-completions endpoint (default).
const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// OpenAI-compatible embeddings endpoint (default).
const EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// Rate limit retry configuration
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_SECS: u64 = 2;
const BACKOFF_MULTIPLIER: u64 = 2;

/// Response from the oracle including content and usage stats.
#[derive(Debug)]
pub struct LlmResponse {
    pub content: String,
    pub usage: Option<Usage>,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: String,
}

/// Blocking-by-await chat client with bounded rate-limit retries.
pub struct OracleClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OracleClient {
    pub fn new(api_key: String, model: String, endpoint: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.unwrap_or_else(|| OPENROUTER_URL.to_string()),
            api_key,
            model,
        }
    }

    /// Call the chat API with automatic retry and exponential backoff on 429.
    pub async fn call(&self, request: &OracleRequest) -> Result<LlmResponse> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: request.system.clone(),
                },
                Message {
                    role: "user".to_string(),
                    content: request.user.clone(),
                },
            ],
            max_tokens: MODEL_MAX_TOKENS,
            stream: false,
        };

        let mut retry_count = 0;

        loop {
            let response = self
                .http
                .post(&self.endpoint)
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            let text = response.text().await?;

            if status.is_success() {
                let parsed: ChatResponse = serde_json::from_str(&text)
                    .map_err(|e| anyhow!("Failed to parse oracle response: {}\n{}", e, text))?;

                let content = parsed
                    .choices
                    .first()
                    .map(|c| c.message.content.clone())
                    .unwrap_or_default();

                return Ok(LlmResponse {
                    content,
                    usage: parsed.usage,
                });
            }

            if status.as_u16() == 429 && retry_count < MAX_RETRIES {
                retry_count += 1;
                let backoff = INITIAL_BACKOFF_SECS * BACKOFF_MULTIPLIER.pow(retry_count - 1);
                eprintln!(
                    "  Oracle rate limited. Retrying in {}s (attempt {}/{})",
                    backoff, retry_count, MAX_RETRIES
                );
                tokio::time::sleep(tokio::time::Duration::from_secs(backoff)).await;
                continue;
            }

            let error_msg = match status.as_u16() {
                401 => "Invalid API key. Run 'mend --setup' to update it.".to_string(),
                429 => format!(
                    "Rate limited after {} retries. Try again in a few minutes.",
                    retry_count
                ),
                500..=599 => format!(
                    "Oracle server error ({}). The service may be temporarily unavailable.",
                    status
                ),
                _ => format!("API error {}: {}", status, truncate(&text, 200)),
            };
            return Err(anyhow!("{}", error_msg));
        }
    }
}

#[async_trait]
impl TextOracle for OracleClient {
    async fn generate(&self, request: OracleRequest) -> Result<String> {
        self.call(&request).await.map(|r| r.content)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Client for the OpenAI-compatible embeddings endpoint.
///
/// Unconfigured (no key) means unavailable: callers degrade to unranked
/// retrieval instead of failing the run.
pub struct EmbeddingClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl EmbeddingClient {
    pub fn new(api_key: Option<String>, model: String, endpoint: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.unwrap_or_else(|| EMBEDDINGS_URL.to_string()),
            api_key,
            model,
        }
    }

    /// A client that reports unavailable and never touches the network.
    pub fn disabled() -> Self {
        Self::new(None, String::new(), None)
    }

    pub fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow!("No embedding backend configured"))?;

        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbeddingRequest {
            model: self.model.clone(),
            input: texts.to_vec(),
        };

        let response = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(anyhow!(
                "Embedding API error {}: {}",
                status,
                truncate(&text, 200)
            ));
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow!("Failed to parse embedding response: {}", e))?;

        if parsed.data.len() != texts.len() {
            return Err(anyhow!(
                "Embedding count mismatch: sent {}, got {}",
                texts.len(),
                parsed.data.len()
            ));
        }

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_embedding_client_is_unavailable() {
        let client = EmbeddingClient::disabled();
        assert!(!client.is_available());
    }

    #[tokio::test]
    async fn test_disabled_embedding_client_errors_without_network() {
        let client = EmbeddingClient::disabled();
        let result = client.embed(&["text".to_string()]).await;
        assert!(result.is_err());
    }
}

// SPDX-License-Identifier: MIT
//! HTTP client for an OpenAI-compatible `/embeddings` endpoint.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

const HTTP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// How much of an error body is carried into error messages.
const BODY_PREFIX_LEN: usize = 512;

/// Generates vector embeddings via a remote embeddings API.
///
/// Stateless beyond its configuration; safe to share behind an `Arc`.
pub struct Embedder {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    /// A single string or an array of strings.
    input: serde_json::Value,
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingDataItem>,
}

#[derive(Deserialize)]
struct EmbeddingDataItem {
    embedding: Vec<f32>,
}

impl Embedder {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .expect("reqwest client"),
        }
    }

    /// The embedding model name this client is configured for.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Embed a single text.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self
            .request(EmbeddingRequest {
                input: serde_json::Value::String(text.to_string()),
                model: &self.model,
            })
            .await?;
        if vectors.is_empty() {
            return Err(anyhow!("empty embedding response"));
        }
        Ok(vectors.swap_remove(0))
    }

    /// Embed multiple texts in one request, preserving input order.
    /// An empty input returns an empty result without a network call.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self
            .request(EmbeddingRequest {
                input: serde_json::json!(texts),
                model: &self.model,
            })
            .await?;
        if vectors.is_empty() {
            return Err(anyhow!("empty embedding response"));
        }
        Ok(vectors)
    }

    async fn request(&self, body: EmbeddingRequest<'_>) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let mut req = self.client.post(&url).json(&body);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(anyhow!(
                "embedding API error (status {}): {}",
                status.as_u16(),
                body_prefix(&text)
            ));
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow!("failed to parse embedding response: {e} (body: {})", body_prefix(&text)))?;

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

fn body_prefix(body: &str) -> &str {
    let mut end = body.len().min(BODY_PREFIX_LEN);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_keeps_model() {
        let e = Embedder::new("http://localhost:8080/v1", "test-key", "test-model");
        assert_eq!(e.model(), "test-model");
    }

    #[tokio::test]
    async fn embed_batch_empty_skips_network() {
        // The base URL is unroutable; an empty batch must not touch it.
        let e = Embedder::new("http://invalid.invalid", "k", "m");
        let result = e.embed_batch(&[]).await.unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn body_prefix_respects_char_boundaries() {
        let s = "é".repeat(600);
        let p = body_prefix(&s);
        assert!(p.len() <= BODY_PREFIX_LEN);
        assert!(s.starts_with(p));
    }
}

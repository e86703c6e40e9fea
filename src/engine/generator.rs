// SPDX-License-Identifier: MIT
//! HTTP client for the remote text-generation API.
//!
//! Two wire shapes are supported, selected by `generation.api_type`:
//! the "responses" endpoint and classic "chat_completions". Both take a
//! system prompt plus a user message and return the raw output text.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::json;

const HTTP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);
const BODY_PREFIX_LEN: usize = 512;

/// Performs text generation against an OpenAI-compatible API.
pub struct Generator {
    base_url: String,
    api_key: String,
    model: String,
    api_type: String,
    max_tokens: u32,
    temperature: f64,
    stop: Vec<String>,
    /// Attach OpenRouter attribution headers.
    telemetry: bool,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    output: Vec<ResponsesOutput>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ResponsesOutput {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    content: Vec<ResponsesContent>,
}

#[derive(Deserialize)]
struct ResponsesContent {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

impl Generator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        api_type: String,
        max_tokens: u32,
        temperature: f64,
        stop: Vec<String>,
        telemetry: bool,
    ) -> Self {
        Self {
            base_url,
            api_key,
            model,
            api_type,
            max_tokens,
            temperature,
            stop,
            telemetry,
            client: reqwest::Client::builder()
                .timeout(HTTP_TIMEOUT)
                .build()
                .expect("reqwest client"),
        }
    }

    /// Send one generation request and return the model's output text.
    pub async fn generate(&self, system_prompt: &str, user_message: &str) -> Result<String> {
        if self.api_type == "chat_completions" {
            self.generate_chat_completions(system_prompt, user_message)
                .await
        } else {
            self.generate_responses(system_prompt, user_message).await
        }
    }

    async fn generate_responses(&self, system_prompt: &str, user_message: &str) -> Result<String> {
        let mut body = json!({
            "model": self.model,
            "input": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_message},
            ],
        });
        self.apply_tuning(&mut body, "max_output_tokens");

        let text = self.post("/responses", &body).await?;
        let result: ResponsesResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow!("failed to parse response: {e} (body: {})", body_prefix(&text)))?;

        if let Some(err) = result.error {
            return Err(anyhow!("API error: {}", err.message));
        }
        for out in result.output {
            if out.kind == "message" {
                for content in out.content {
                    if content.kind == "output_text" {
                        return Ok(content.text);
                    }
                }
            }
        }
        Err(anyhow!("no text content in response"))
    }

    async fn generate_chat_completions(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<String> {
        let mut body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_message},
            ],
        });
        self.apply_tuning(&mut body, "max_tokens");

        let text = self.post("/chat/completions", &body).await?;
        let result: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow!("failed to parse response: {e} (body: {})", body_prefix(&text)))?;

        if let Some(err) = result.error {
            return Err(anyhow!("API error: {}", err.message));
        }
        match result.choices.into_iter().next() {
            Some(choice) if !choice.message.content.is_empty() => Ok(choice.message.content),
            Some(_) => Err(anyhow!("no text content in response")),
            None => Err(anyhow!("no choices in response")),
        }
    }

    fn apply_tuning(&self, body: &mut serde_json::Value, max_tokens_key: &str) {
        let obj = body.as_object_mut().expect("request body is an object");
        if self.max_tokens > 0 {
            obj.insert(max_tokens_key.to_string(), json!(self.max_tokens));
        }
        if self.temperature > 0.0 {
            obj.insert("temperature".to_string(), json!(self.temperature));
        }
        if !self.stop.is_empty() {
            obj.insert("stop".to_string(), json!(self.stop));
        }
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<String> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.post(&url).json(body);
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }
        if self.telemetry {
            req = req
                .header("X-Title", "Ashlet - auto complete your shell commands")
                .header("HTTP-Referer", "https://github.com/ashlet/ashlet");
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(anyhow!(
                "API error (status {}): {}",
                status.as_u16(),
                body_prefix(&text)
            ));
        }
        Ok(text)
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

    fn sample() -> Generator {
        Generator::new(
            "http://localhost:1".into(),
            "key".into(),
            "model".into(),
            "responses".into(),
            128,
            0.2,
            vec![],
            false,
        )
    }

    #[test]
    fn responses_extraction_shape() {
        let raw = r#"{
            "output": [
                {"type": "reasoning", "content": []},
                {"type": "message", "content": [
                    {"type": "refusal", "text": ""},
                    {"type": "output_text", "text": "git status"}
                ]}
            ]
        }"#;
        let parsed: ResponsesResponse = serde_json::from_str(raw).unwrap();
        let text = parsed
            .output
            .iter()
            .find(|o| o.kind == "message")
            .and_then(|o| o.content.iter().find(|c| c.kind == "output_text"))
            .map(|c| c.text.clone());
        assert_eq!(text.as_deref(), Some("git status"));
    }

    #[test]
    fn chat_extraction_shape() {
        let raw = r#"{"choices": [{"message": {"role": "assistant", "content": "git push"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content, "git push");
    }

    #[test]
    fn tuning_fields_attached() {
        let g = sample();
        let mut body = json!({"model": "m"});
        g.apply_tuning(&mut body, "max_output_tokens");
        assert_eq!(body["max_output_tokens"], 128);
        assert_eq!(body["temperature"], 0.2);
        assert!(body.get("stop").is_none());
    }
}

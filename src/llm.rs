//! Remote language model for spoken questions
//!
//! The prompt carries the labels currently in view and the user's question.
//! Hosted inference APIs wrap their answer in different envelopes;
//! [`extract_generated_text`] accepts the common ones.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::{Value, json};

use crate::config::{AuthStyle, LlmConfig};
use crate::{Error, Result};

/// Answers a question about the current scene
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// # Errors
    ///
    /// Returns error if the request fails or the reply has no text
    async fn ask(&self, labels: &[String], question: &str) -> Result<String>;
}

/// Fill the prompt template with the scene labels and the question
#[must_use]
pub fn build_prompt(template: &str, labels: &[String], question: &str) -> String {
    let scene = if labels.is_empty() {
        "nada".to_string()
    } else {
        labels.join(", ")
    };
    template
        .replace("{labels}", &scene)
        .replace("{question}", question.trim())
}

/// Pull the generated text out of a response body
///
/// Accepts `[{"generated_text"}]`, `{"generated_text"}`, chat and completion
/// `choices`, `{"answer"}`, and `candidates[].content.parts[].text`.
#[must_use]
pub fn extract_generated_text(body: &Value) -> Option<String> {
    let text = match body {
        Value::Array(items) => items.first().and_then(extract_generated_text),
        Value::Object(map) => {
            if let Some(text) = map.get("generated_text").and_then(Value::as_str) {
                Some(text.to_string())
            } else if let Some(choice) = body.pointer("/choices/0") {
                choice
                    .pointer("/message/content")
                    .or_else(|| choice.get("text"))
                    .and_then(Value::as_str)
                    .map(ToString::to_string)
            } else if let Some(text) = map.get("answer").and_then(Value::as_str) {
                Some(text.to_string())
            } else {
                body.pointer("/candidates/0/content/parts").and_then(|parts| {
                    let joined: String = parts
                        .as_array()?
                        .iter()
                        .filter_map(|p| p.get("text").and_then(Value::as_str))
                        .collect();
                    Some(joined)
                })
            }
        }
        Value::String(text) => Some(text.clone()),
        _ => None,
    };
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

/// Drop an echoed prompt: everything up to and including the last `marker`
#[must_use]
pub fn strip_instruction<'a>(text: &'a str, marker: &str) -> &'a str {
    if marker.is_empty() {
        return text.trim();
    }
    text.rfind(marker)
        .map_or(text, |idx| &text[idx + marker.len()..])
        .trim()
}

/// Hosted text-generation endpoint
pub struct HttpLanguageModel {
    client: reqwest::Client,
    config: LlmConfig,
    url: String,
}

impl HttpLanguageModel {
    /// # Errors
    ///
    /// Returns error if no endpoint is configured or the client cannot be built
    pub fn new(config: LlmConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| Error::Config("no language model url configured".to_string()))?;
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            config,
            url,
        })
    }

    fn request_body(&self, prompt: &str) -> Value {
        let mut body = json!({
            "parameters": {
                "max_new_tokens": self.config.max_new_tokens,
                "temperature": self.config.temperature,
                "return_full_text": false,
            },
        });
        body[self.config.prompt_field.as_str()] = Value::String(prompt.to_string());
        body
    }
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    async fn ask(&self, labels: &[String], question: &str) -> Result<String> {
        let prompt = build_prompt(&self.config.prompt_template, labels, question);
        let mut request = self.client.post(&self.url).json(&self.request_body(&prompt));

        if let Some(token) = &self.config.token {
            request = match self.config.auth {
                AuthStyle::Bearer => request.bearer_auth(token.expose_secret()),
                AuthStyle::Query => {
                    request.query(&[(self.config.query_param.as_str(), token.expose_secret())])
                }
            };
        }

        tracing::debug!(labels = labels.len(), "asking language model");
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Remote(format!("language model error {status}: {body}")));
        }

        let body: Value = response.json().await?;
        let text = extract_generated_text(&body)
            .ok_or_else(|| Error::Remote("language model returned no text".to_string()))?;
        let answer = strip_instruction(&text, &self.config.instruction_marker);
        if answer.is_empty() {
            return Err(Error::Remote("language model returned an empty answer".to_string()));
        }
        Ok(answer.to_string())
    }
}

//! Remote image analysis client.
//!
//! The orchestrator only sees [`AnalysisClient`]: one async call taking the
//! raw image and an opaque prompt, returning an [`AnalysisResult`] or an
//! [`AnalysisError`]. [`GeminiClient`] implements it against the Gemini
//! `generateContent` REST endpoint, asking for both text and image output.
//!
//! Requests are never retried here. A failed call is reported to the user,
//! who decides whether to submit again.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use farmhand_types::{AnalysisResult, Language};
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash-image-preview";
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("API Key is not configured. Please contact support.")]
    NotConfigured,

    #[error("Failed to analyze image: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Failed to analyze image: API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Failed to analyze image: No content generated. The response was empty.")]
    EmptyResponse,

    #[error("Failed to analyze image: {0}")]
    Other(String),
}

/// A remote service that answers questions about an image.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn analyze(
        &self,
        image: &[u8],
        mime_type: &str,
        prompt: &str,
    ) -> Result<AnalysisResult, AnalysisError>;
}

/// Prefix the question with the response-language directive.
pub fn build_prompt(question: &str, language: Language) -> String {
    format!(
        "Please respond in {}. Here is the user's question: \"{}\"",
        language.display_name(),
        question
    )
}

/// Settings for [`GeminiClient`].
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub api_base: String,
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_GEMINI_MODEL.to_string(),
            api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Client for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    config: GeminiConfig,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, AnalysisError> {
        if config.api_key.is_none() {
            warn!(target: "farmhand::remote", "No Gemini API key configured; analysis requests will fail");
        }
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, http })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.api_base.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl AnalysisClient for GeminiClient {
    async fn analyze(
        &self,
        image: &[u8],
        mime_type: &str,
        prompt: &str,
    ) -> Result<AnalysisResult, AnalysisError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(AnalysisError::NotConfigured)?;

        debug!(
            target: "farmhand::remote",
            model = %self.config.model,
            image_bytes = image.len(),
            "Calling generateContent"
        );

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&build_request_body(image, mime_type, prompt))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Api {
                status: status.as_u16(),
                message: extract_error_message(&body),
            });
        }

        let json: Value = response.json().await?;
        parse_generate_response(&json)
    }
}

/// Request body asking for text and image output about one inline image.
fn build_request_body(image: &[u8], mime_type: &str, prompt: &str) -> Value {
    json!({
        "contents": [{
            "parts": [
                {
                    "inline_data": {
                        "mime_type": mime_type,
                        "data": BASE64.encode(image),
                    }
                },
                { "text": prompt }
            ]
        }],
        "generationConfig": {
            "responseModalities": ["IMAGE", "TEXT"]
        }
    })
}

/// Pull text and image parts out of the first candidate.
///
/// Later text parts overwrite earlier ones, as do later images.
fn parse_generate_response(json: &Value) -> Result<AnalysisResult, AnalysisError> {
    let mut result = AnalysisResult::default();

    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for part in parts {
        if let Some(text) = part.get("text").and_then(Value::as_str).filter(|t| !t.is_empty()) {
            result.text = Some(text.to_string());
        } else if let Some(inline) = part.get("inlineData").or_else(|| part.get("inline_data")) {
            let data = inline.get("data").and_then(Value::as_str);
            let mime = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .unwrap_or("image/png");
            if let Some(data) = data {
                result.image = Some(format!("data:{};base64,{}", mime, data));
            }
        }
    }

    if result.is_empty() {
        if let Some(reason) = json.pointer("/promptFeedback/blockReason").and_then(Value::as_str) {
            return Err(AnalysisError::Other(format!("Request was blocked: {}", reason)));
        }
        return Err(AnalysisError::EmptyResponse);
    }

    Ok(result)
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(String::from))
        .unwrap_or_else(|| body.trim().to_string())
}

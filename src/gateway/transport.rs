use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(40);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f64,
    pub top_k: u32,
    pub top_p: f64,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
}

impl GenerateContentRequest {
    pub fn new(prompt: String, temperature: f64) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![Part { text: Some(prompt) }],
            }],
            generation_config: GenerationConfig {
                temperature,
                top_k: 40,
                top_p: 0.95,
                max_output_tokens: 512,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
}

#[derive(Debug, Deserialize)]
struct ResponseCandidate {
    content: Option<Content>,
}

/// Concatenated text parts of the first candidate. An empty completion is an error.
pub fn extract_text(body: &str) -> Result<String, String> {
    let response: GenerateContentResponse =
        serde_json::from_str(body).map_err(|e| format!("parse error: {e}"))?;
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        Err("parse error: empty completion".to_string())
    } else {
        Ok(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_invalid_key(&self) -> bool {
        self.status == 400 && self.body.contains("API_KEY_INVALID")
    }
}

/// One HTTP exchange with the provider. Errors are network failures or timeouts.
#[async_trait]
pub trait GenerationTransport: Send + Sync {
    async fn send(
        &self,
        api_key: &str,
        api_version: &str,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<TransportResponse>;
}

pub struct GeminiTransport {
    client: Client,
    base_url: String,
}

impl GeminiTransport {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, api_version: &str, model: &str) -> String {
        format!(
            "{}/{}/models/{}:generateContent",
            self.base_url, api_version, model
        )
    }
}

#[async_trait]
impl GenerationTransport for GeminiTransport {
    async fn send(
        &self,
        api_key: &str,
        api_version: &str,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<TransportResponse> {
        let response = self
            .client
            .post(self.endpoint(api_version, model))
            .query(&[("key", api_key)])
            .json(request)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(TransportResponse { status, body })
    }
}

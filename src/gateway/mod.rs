//! External generation gateway.
//!
//! Every request walks an ordered plan of (credential, api version, model) candidates against the
//! provider and stops at the first usable completion. Failures along the way land in a bounded
//! diagnostics log instead of reaching the caller.

mod candidate;
mod diagnostics;
mod transport;

pub use candidate::{
    AttemptPlan, Candidate, Credential, CredentialSource, API_VERSIONS, FALLBACK_MODELS,
};
pub use diagnostics::{Diagnostics, DiagnosticsSnapshot};
pub use transport::{
    extract_text, GeminiTransport, GenerateContentRequest, GenerationTransport, TransportResponse,
    GEMINI_BASE_URL,
};

use std::sync::Arc;

use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::prompts::Prompts;
use diagnostics::truncate_chars;

pub const PROMPT_LIMIT: usize = 6000;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
const EXCERPT_LIMIT: usize = 400;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("no generation credentials configured")]
    NoCredentials,

    #[error("all generation candidates failed")]
    Exhausted { last_error: Option<String> },
}

impl GatewayError {
    /// The renderable reply used when no candidate produced text.
    pub fn apology(&self) -> String {
        match self {
            GatewayError::Exhausted {
                last_error: Some(last_error),
            } => format!(
                "{}\n\n[diagnostic]\n{}",
                Prompts::PROVIDER_UNAVAILABLE,
                truncate_chars(last_error, EXCERPT_LIMIT)
            ),
            _ => Prompts::PROVIDER_UNAVAILABLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerationRequest<'a> {
    pub message: &'a str,
    pub context: Option<&'a str>,
    pub temperature: Option<f64>,
    pub caller_key: Option<&'a str>,
}

impl GenerationRequest<'_> {
    /// Context block prepended when present, then cut to the provider ceiling.
    pub fn prompt(&self) -> String {
        let prompt = match self.context.filter(|c| !c.trim().is_empty()) {
            Some(context) => format!("Context:\n{}\n\nUser: {}", context, self.message),
            None => self.message.to_string(),
        };
        truncate_chars(&prompt, PROMPT_LIMIT)
    }

    pub fn temperature(&self) -> f64 {
        match self.temperature {
            Some(t) if t.is_finite() => t.clamp(0.0, 1.0),
            _ => DEFAULT_TEMPERATURE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub api_version: String,
    pub source: CredentialSource,
}

/// Result of a single attempt, deciding what the loop does next.
enum AttemptOutcome {
    Success(String),
    Continue,
    SkipCredential,
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub server_key: Option<String>,
    pub preferred_model: Option<String>,
    pub fallback_models: Vec<String>,
    pub api_versions: Vec<String>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            server_key: None,
            preferred_model: None,
            fallback_models: FALLBACK_MODELS.iter().map(|m| m.to_string()).collect(),
            api_versions: API_VERSIONS.iter().map(|v| v.to_string()).collect(),
        }
    }
}

impl GatewaySettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            server_key: config.gemini_api_key.clone(),
            preferred_model: config.gemini_model.clone(),
            ..Self::default()
        }
    }
}

pub struct Gateway {
    transport: Arc<dyn GenerationTransport>,
    settings: GatewaySettings,
    diagnostics: Diagnostics,
}

impl Gateway {
    pub fn new(transport: Arc<dyn GenerationTransport>, settings: GatewaySettings) -> Self {
        Self {
            transport,
            settings,
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let transport = GeminiTransport::new(&config.gemini_base_url)?;
        Ok(Self::new(
            Arc::new(transport),
            GatewaySettings::from_config(config),
        ))
    }

    pub fn server_key_configured(&self) -> bool {
        self.settings
            .server_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty())
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    pub fn plan(&self, caller_key: Option<&str>) -> AttemptPlan {
        let fallback: Vec<&str> = self
            .settings
            .fallback_models
            .iter()
            .map(String::as_str)
            .collect();
        let versions: Vec<&str> = self
            .settings
            .api_versions
            .iter()
            .map(String::as_str)
            .collect();
        AttemptPlan::build(
            caller_key,
            self.settings.server_key.as_deref(),
            self.settings.preferred_model.as_deref(),
            &fallback,
            &versions,
        )
    }

    /// Always yields renderable text: the completion, or an apology with a diagnostic excerpt.
    pub async fn complete(&self, request: GenerationRequest<'_>) -> String {
        match self.generate(request).await {
            Ok(completion) => completion.text,
            Err(err) => err.apology(),
        }
    }

    pub async fn generate(&self, request: GenerationRequest<'_>) -> Result<Completion, GatewayError> {
        self.diagnostics.record_event(
            "generation_request_received",
            json!({
                "has_context": request.context.is_some_and(|c| !c.trim().is_empty()),
                "message_len": request.message.chars().count(),
            }),
        );

        let plan = self.plan(request.caller_key);
        if plan.is_empty() {
            warn!("No generation credentials available");
            self.diagnostics.record_event("no_credentials", json!({}));
            return Err(GatewayError::NoCredentials);
        }

        let body = GenerateContentRequest::new(request.prompt(), request.temperature());
        let mut last_error: Option<String> = None;
        let mut skipped: Option<usize> = None;
        let mut announced: Option<usize> = None;

        for candidate in &plan.candidates {
            if skipped == Some(candidate.credential) {
                continue;
            }
            let credential = plan.credential(candidate);
            if announced != Some(candidate.credential) {
                info!("Using {} Gemini key: {}", credential.source, credential.masked());
                announced = Some(candidate.credential);
            }

            match self.attempt(credential, candidate, &body, &mut last_error).await {
                AttemptOutcome::Success(text) => {
                    self.diagnostics.record_event(
                        "generation_success",
                        json!({
                            "source": credential.source.as_str(),
                            "model": candidate.model,
                            "api_version": candidate.api_version,
                        }),
                    );
                    return Ok(Completion {
                        text,
                        model: candidate.model.clone(),
                        api_version: candidate.api_version.clone(),
                        source: credential.source,
                    });
                }
                AttemptOutcome::SkipCredential => {
                    warn!(
                        "Gemini key invalid for {}. Trying next key if available.",
                        credential.source
                    );
                    skipped = Some(candidate.credential);
                }
                AttemptOutcome::Continue => {}
            }
        }

        self.diagnostics.record_event(
            "generation_exhausted",
            json!({ "attempted_credentials": plan.credentials.len() }),
        );
        Err(GatewayError::Exhausted { last_error })
    }

    async fn attempt(
        &self,
        credential: &Credential,
        candidate: &Candidate,
        body: &GenerateContentRequest,
        last_error: &mut Option<String>,
    ) -> AttemptOutcome {
        let source = credential.source.as_str();
        let version = Some(candidate.api_version.as_str());
        let model = Some(candidate.model.as_str());

        let response = match self
            .transport
            .send(&credential.key, &candidate.api_version, &candidate.model, body)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let text = err.to_string();
                self.diagnostics.record_error(
                    source,
                    version,
                    model,
                    None,
                    &text,
                    "exception during request",
                );
                *last_error = Some(text);
                return AttemptOutcome::Continue;
            }
        };

        if response.is_success() {
            return match extract_text(&response.body) {
                Ok(text) => AttemptOutcome::Success(text),
                Err(note) => {
                    self.diagnostics.record_error(
                        source,
                        version,
                        model,
                        Some(response.status),
                        &response.body,
                        &note,
                    );
                    *last_error = Some(format!("{note}: {}", response.body));
                    AttemptOutcome::Continue
                }
            };
        }

        self.diagnostics.record_error(
            source,
            version,
            model,
            Some(response.status),
            &response.body,
            "http error",
        );
        let invalid_key = response.is_invalid_key();
        *last_error = Some(response.body);
        if invalid_key {
            AttemptOutcome::SkipCredential
        } else {
            AttemptOutcome::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    type Responder = Box<dyn Fn(&str, &str, &str) -> anyhow::Result<TransportResponse> + Send + Sync>;

    /// Records every attempt and answers through a closure.
    struct RecordingTransport {
        calls: Mutex<Vec<(String, String, String)>>,
        prompts: Mutex<Vec<String>>,
        responder: Responder,
    }

    impl RecordingTransport {
        fn new(
            responder: impl Fn(&str, &str, &str) -> anyhow::Result<TransportResponse>
                + Send
                + Sync
                + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                prompts: Mutex::new(Vec::new()),
                responder: Box::new(responder),
            })
        }

        fn calls(&self) -> Vec<(String, String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GenerationTransport for RecordingTransport {
        async fn send(
            &self,
            api_key: &str,
            api_version: &str,
            model: &str,
            request: &GenerateContentRequest,
        ) -> anyhow::Result<TransportResponse> {
            self.calls.lock().unwrap().push((
                api_key.to_string(),
                api_version.to_string(),
                model.to_string(),
            ));
            if let Some(text) = request.contents[0].parts[0].text.clone() {
                self.prompts.lock().unwrap().push(text);
            }
            (self.responder)(api_key, api_version, model)
        }
    }

    fn reply(status: u16, body: &str) -> anyhow::Result<TransportResponse> {
        Ok(TransportResponse {
            status,
            body: body.to_string(),
        })
    }

    fn success(text: &str) -> anyhow::Result<TransportResponse> {
        reply(
            200,
            &serde_json::json!({"candidates": [{"content": {"parts": [{"text": text}]}}]})
                .to_string(),
        )
    }

    fn gateway(transport: Arc<RecordingTransport>, server_key: Option<&str>) -> Gateway {
        Gateway::new(
            transport,
            GatewaySettings {
                server_key: server_key.map(str::to_string),
                preferred_model: Some("M".to_string()),
                fallback_models: vec!["X".to_string(), "Y".to_string()],
                api_versions: vec!["v1".to_string(), "v2".to_string()],
            },
        )
    }

    fn request<'a>(caller_key: Option<&'a str>) -> GenerationRequest<'a> {
        GenerationRequest {
            message: "hello",
            caller_key,
            ..Default::default()
        }
    }

    fn triple(key: &str, version: &str, model: &str) -> (String, String, String) {
        (key.to_string(), version.to_string(), model.to_string())
    }

    #[tokio::test]
    async fn walks_every_candidate_in_order() {
        let transport = RecordingTransport::new(|_, _, _| reply(503, "overloaded"));
        let gateway = gateway(transport.clone(), Some("B"));

        let err = gateway.generate(request(Some("A"))).await.unwrap_err();
        assert_eq!(
            err,
            GatewayError::Exhausted {
                last_error: Some("overloaded".to_string())
            }
        );

        let mut expected = Vec::new();
        for key in ["A", "B"] {
            for version in ["v1", "v2"] {
                for model in ["M", "X", "Y"] {
                    expected.push(triple(key, version, model));
                }
            }
        }
        assert_eq!(transport.calls(), expected);
    }

    #[tokio::test]
    async fn stops_at_first_success() {
        let transport = RecordingTransport::new(|_, version, model| {
            if version == "v1" && model == "X" {
                success("Hi! How can I help?")
            } else {
                reply(404, "model not found")
            }
        });
        let gateway = gateway(transport.clone(), Some("B"));

        let completion = gateway.generate(request(None)).await.unwrap();
        assert_eq!(completion.text, "Hi! How can I help?");
        assert_eq!(completion.model, "X");
        assert_eq!(completion.source, CredentialSource::Server);
        assert_eq!(
            transport.calls(),
            vec![triple("B", "v1", "M"), triple("B", "v1", "X")]
        );

        let events = gateway.diagnostics().recent_events;
        assert_eq!(events[0].event, "generation_success");
        assert_eq!(events[0].detail["model"], "X");
    }

    #[tokio::test]
    async fn invalid_key_skips_to_next_credential() {
        let transport = RecordingTransport::new(|key, _, _| {
            if key == "A" {
                reply(400, r#"{"error": {"status": "INVALID_ARGUMENT", "reason": "API_KEY_INVALID"}}"#)
            } else {
                success("from server key")
            }
        });
        let gateway = gateway(transport.clone(), Some("B"));

        let completion = gateway.generate(request(Some("A"))).await.unwrap();
        assert_eq!(completion.text, "from server key");
        assert_eq!(
            transport.calls(),
            vec![triple("A", "v1", "M"), triple("B", "v1", "M")]
        );
    }

    #[tokio::test]
    async fn transport_and_parse_failures_continue() {
        let transport = RecordingTransport::new(|_, version, model| match (version, model) {
            ("v1", "M") => Err(anyhow::anyhow!("connection reset")),
            ("v1", "X") => reply(200, r#"{"candidates": []}"#),
            _ => success("third time lucky"),
        });
        let gateway = gateway(transport.clone(), Some("B"));

        let completion = gateway.generate(request(None)).await.unwrap();
        assert_eq!(completion.model, "Y");

        let errors = gateway.diagnostics().recent_errors;
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].note, "parse error: empty completion");
        assert_eq!(errors[1].note, "exception during request");
        assert_eq!(errors[1].status, None);
    }

    #[tokio::test]
    async fn exhaustion_yields_apology_with_excerpt() {
        let long_error = "x".repeat(1000);
        let body = long_error.clone();
        let transport = RecordingTransport::new(move |_, _, _| reply(500, &body));
        let gateway = gateway(transport, Some("B"));

        let text = gateway.complete(request(None)).await;
        let expected = format!(
            "{}\n\n[diagnostic]\n{}",
            Prompts::PROVIDER_UNAVAILABLE,
            &long_error[..400]
        );
        assert_eq!(text, expected);
    }

    #[tokio::test]
    async fn no_credentials_means_no_attempts() {
        let transport = RecordingTransport::new(|_, _, _| success("unreachable"));
        let gateway = gateway(transport.clone(), None);

        let text = gateway.complete(request(Some("  "))).await;
        assert_eq!(text, Prompts::PROVIDER_UNAVAILABLE);
        assert!(transport.calls().is_empty());
        assert_eq!(gateway.diagnostics().recent_events[0].event, "no_credentials");
    }

    #[tokio::test]
    async fn prompt_is_contextualised_and_truncated() {
        let transport = RecordingTransport::new(|_, _, _| success("ok"));
        let gateway = gateway(transport.clone(), Some("B"));

        let message = "m".repeat(7000);
        gateway
            .generate(GenerationRequest {
                message: &message,
                context: Some("prior calls"),
                temperature: Some(3.5),
                caller_key: None,
            })
            .await
            .unwrap();

        let prompts = transport.prompts.lock().unwrap().clone();
        assert!(prompts[0].starts_with("Context:\nprior calls\n\nUser: mmm"));
        assert_eq!(prompts[0].chars().count(), PROMPT_LIMIT);
    }

    #[test]
    fn temperature_is_clamped() {
        let mut req = request(None);
        assert_eq!(req.temperature(), DEFAULT_TEMPERATURE);
        req.temperature = Some(1.7);
        assert_eq!(req.temperature(), 1.0);
        req.temperature = Some(-0.3);
        assert_eq!(req.temperature(), 0.0);
        req.temperature = Some(f64::NAN);
        assert_eq!(req.temperature(), DEFAULT_TEMPERATURE);
    }
}

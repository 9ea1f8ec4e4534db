use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_openai::config::OpenAIConfig;
use async_openai::types::{AudioInput, AudioResponseFormat, CreateTranscriptionRequestArgs};
use async_openai::Client;
use async_trait::async_trait;
use tracing::info;

use crate::config::AppConfig;
use crate::models::call::AudioBlob;

pub const WHISPER_MODEL: &str = "whisper-1";
const TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(120);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionResult {
    pub text: String,
    pub provider: &'static str,
    pub language: Option<String>,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// `api_key` overrides the configured credential for this request.
    async fn transcribe(&self, audio: AudioBlob, api_key: Option<&str>) -> Result<TranscriptionResult>;
}

pub struct WhisperTranscriber {
    api_key: Option<String>,
    api_base: String,
}

impl WhisperTranscriber {
    pub fn new(api_key: Option<String>, api_base: impl Into<String>) -> Self {
        Self {
            api_key,
            api_base: api_base.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.whisper_api_key.clone(), config.whisper_base_url.clone())
    }

    fn client(&self, api_key: Option<&str>) -> Result<Client<OpenAIConfig>> {
        let key = api_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .or(self.api_key.as_deref())
            .ok_or_else(|| anyhow!("speech-to-text API key is not configured"))?;

        let config = OpenAIConfig::new()
            .with_api_key(key)
            .with_api_base(&self.api_base);
        Ok(Client::with_config(config))
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: AudioBlob, api_key: Option<&str>) -> Result<TranscriptionResult> {
        let client = self.client(api_key)?;
        let size = audio.bytes.len();
        let file_name = format!("audio.{}", extension_for(&audio.mime_type));

        let request = CreateTranscriptionRequestArgs::default()
            .file(AudioInput::from_vec_u8(file_name, audio.bytes))
            .model(WHISPER_MODEL)
            .response_format(AudioResponseFormat::Json)
            .build()?;

        info!("Sending {} bytes of {} to Whisper", size, audio.mime_type);
        let response = tokio::time::timeout(TRANSCRIBE_TIMEOUT, client.audio().transcribe(request))
            .await
            .context("transcription timed out")??;

        Ok(TranscriptionResult {
            text: response.text,
            provider: "openai-whisper",
            language: None,
        })
    }
}

/// Fetches audio kept outside the database, such as a storage bucket URL.
pub async fn download_audio(url: &str, mime_hint: Option<&str>) -> Result<AudioBlob> {
    let client = reqwest::Client::builder().timeout(DOWNLOAD_TIMEOUT).build()?;
    let response = client
        .get(url)
        .send()
        .await
        .context("failed to download audio file")?
        .error_for_status()
        .context("failed to download audio file")?;

    let mime_type = mime_hint
        .map(str::to_string)
        .or_else(|| {
            response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .filter(|v| v.starts_with("audio/") || v.starts_with("video/"))
                .map(str::to_string)
        })
        .unwrap_or_else(|| crate::models::call::DEFAULT_AUDIO_MIME.to_string());
    let bytes = response.bytes().await?.to_vec();

    Ok(AudioBlob { bytes, mime_type })
}

/// Whisper infers the container from the file name.
pub fn extension_for(mime_type: &str) -> &'static str {
    let subtype = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .rsplit('/')
        .next()
        .unwrap_or_default();
    match subtype {
        "mpeg" | "mp3" => "mp3",
        "mp4" => "mp4",
        "wav" | "x-wav" | "wave" => "wav",
        "webm" => "webm",
        "ogg" => "ogg",
        "flac" | "x-flac" => "flac",
        "aac" => "aac",
        _ => "m4a",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn blob() -> AudioBlob {
        AudioBlob {
            bytes: vec![0u8; 64],
            mime_type: "audio/mpeg".to_string(),
        }
    }

    #[test]
    fn picks_file_extensions() {
        assert_eq!(extension_for("audio/mpeg"), "mp3");
        assert_eq!(extension_for("audio/wav; codecs=1"), "wav");
        assert_eq!(extension_for("audio/m4a"), "m4a");
        assert_eq!(extension_for("application/octet-stream"), "m4a");
    }

    #[tokio::test]
    async fn sends_audio_to_whisper() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .and(header("authorization", "Bearer sk-caller"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"text": "Hi, this is Dana from Acme."})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let transcriber = WhisperTranscriber::new(Some("sk-server".to_string()), server.uri());
        let result = transcriber.transcribe(blob(), Some("sk-caller")).await.unwrap();
        assert_eq!(result.text, "Hi, this is Dana from Acme.");
        assert_eq!(result.provider, "openai-whisper");
    }

    #[tokio::test]
    async fn requires_a_key() {
        let transcriber = WhisperTranscriber::new(None, "http://127.0.0.1:1");
        let err = transcriber.transcribe(blob(), Some(" ")).await.unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }

    #[tokio::test]
    async fn downloads_external_audio() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/recordings/1.wav"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "audio/wav")
                    .set_body_bytes(vec![1u8, 2, 3]),
            )
            .mount(&server)
            .await;

        let audio = download_audio(&format!("{}/recordings/1.wav", server.uri()), None)
            .await
            .unwrap();
        assert_eq!(audio.bytes, vec![1, 2, 3]);
        assert_eq!(audio.mime_type, "audio/wav");

        let missing = download_audio(&format!("{}/nope", server.uri()), None).await;
        assert!(missing.is_err());
    }
}

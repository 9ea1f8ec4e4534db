use std::env;

use anyhow::{anyhow, Context};
use tracing::warn;

use crate::gateway::GEMINI_BASE_URL;

const DEV_JWT_SECRET: &str = "dev-only-jwt-secret-change-me";
const DEFAULT_WHISPER_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub jwt_expires_minutes: i64,
    pub api_host: String,
    pub api_port: u16,
    pub cors_origins: Vec<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_model: Option<String>,
    pub gemini_base_url: String,
    pub debug_ai: bool,
    pub admin_emails: Vec<String>,
    pub whisper_api_key: Option<String>,
    pub whisper_base_url: String,
    pub firebase_project_id: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            database_url: None,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            jwt_expires_minutes: 1440,
            api_host: "0.0.0.0".to_string(),
            api_port: 8001,
            cors_origins: vec!["*".to_string()],
            gemini_api_key: None,
            gemini_model: None,
            gemini_base_url: GEMINI_BASE_URL.to_string(),
            debug_ai: true,
            admin_emails: Vec::new(),
            whisper_api_key: None,
            whisper_base_url: DEFAULT_WHISPER_BASE_URL.to_string(),
            firebase_project_id: None,
        }
    }
}

impl AppConfig {
    /// Builds the config from the process environment. A `.env` file in the working
    /// directory is loaded first when present.
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = AppConfig::default();

        let jwt_secret = match get("JWT_SECRET") {
            Some(secret) => secret,
            None if cfg!(debug_assertions) => {
                warn!("JWT_SECRET not set, using the development secret");
                defaults.jwt_secret
            }
            None => return Err(anyhow!("JWT_SECRET not found")),
        };

        let jwt_expires_minutes = match get("JWT_EXPIRES_MINUTES") {
            Some(raw) => raw
                .parse::<i64>()
                .context("JWT_EXPIRES_MINUTES must be an integer")?,
            None => defaults.jwt_expires_minutes,
        };
        if jwt_expires_minutes <= 0 {
            return Err(anyhow!("JWT_EXPIRES_MINUTES must be positive"));
        }

        let api_port = match get("PORT") {
            Some(raw) => raw.parse::<u16>().context("PORT must be a valid port")?,
            None => defaults.api_port,
        };

        let cors_origins = get("CORS_ORIGINS")
            .map(|raw| split_list(&raw))
            .unwrap_or(defaults.cors_origins);

        Ok(AppConfig {
            database_url: get("DATABASE_URL").or_else(|| get("NEON_CONNECTION_STRING")),
            jwt_secret,
            jwt_expires_minutes,
            api_host: get("HOST").unwrap_or(defaults.api_host),
            api_port,
            cors_origins,
            gemini_api_key: get("GEMINI_API_KEY"),
            gemini_model: get("GEMINI_MODEL"),
            gemini_base_url: get("GEMINI_BASE_URL").unwrap_or(defaults.gemini_base_url),
            debug_ai: get("DEBUG_AI")
                .map(|raw| parse_flag(&raw))
                .unwrap_or(defaults.debug_ai),
            admin_emails: get("ADMIN_EMAILS")
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
            whisper_api_key: get("WHISPER_API_KEY").or_else(|| get("OPENAI_API_KEY")),
            whisper_base_url: get("WHISPER_BASE_URL").unwrap_or(defaults.whisper_base_url),
            firebase_project_id: get("FIREBASE_PROJECT_ID"),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[("JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(config.jwt_expires_minutes, 1440);
        assert_eq!(config.api_port, 8001);
        assert_eq!(config.cors_origins, vec!["*".to_string()]);
        assert!(config.debug_ai);
        assert!(config.database_url.is_none());
        assert!(config.admin_emails.is_empty());
        assert_eq!(config.gemini_base_url, GEMINI_BASE_URL);
    }

    #[test]
    fn reads_lists_and_aliases() {
        let config = config_from(&[
            ("JWT_SECRET", "s3cret"),
            ("NEON_CONNECTION_STRING", "postgres://localhost/calls"),
            ("ADMIN_EMAILS", " boss@x.com, ,ops@x.com "),
            ("CORS_ORIGINS", "http://localhost:3000,http://127.0.0.1:3000"),
            ("DEBUG_AI", "off"),
            ("OPENAI_API_KEY", "sk-test"),
        ])
        .unwrap();
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/calls")
        );
        assert_eq!(config.admin_emails, vec!["boss@x.com", "ops@x.com"]);
        assert_eq!(config.cors_origins.len(), 2);
        assert!(!config.debug_ai);
        assert_eq!(config.whisper_api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn rejects_bad_expiry() {
        assert!(config_from(&[("JWT_SECRET", "x"), ("JWT_EXPIRES_MINUTES", "soon")]).is_err());
        assert!(config_from(&[("JWT_SECRET", "x"), ("JWT_EXPIRES_MINUTES", "0")]).is_err());
    }
}

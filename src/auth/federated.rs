use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, jwk::JwkSet, Algorithm, DecodingKey, Validation};
use moka::future::Cache;
use reqwest::Client;
use serde::Deserialize;
use tracing::{error, warn};

use super::AuthError;

const GOOGLE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

/// An identity asserted by the external provider and already verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedIdentity {
    pub subject: String,
    pub email: String,
    pub name: Option<String>,
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, id_token: &str) -> Result<FederatedIdentity, AuthError>;
}

#[derive(Debug, Deserialize)]
struct FirebaseClaims {
    sub: String,
    email: Option<String>,
    name: Option<String>,
}

/// Verifies Firebase ID tokens against Google's published signing keys.
pub struct FirebaseVerifier {
    project_id: String,
    jwks_url: String,
    client: Client,
    keys: Cache<&'static str, JwkSet>,
}

impl FirebaseVerifier {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self::with_jwks_url(project_id, GOOGLE_JWKS_URL)
    }

    pub fn with_jwks_url(project_id: impl Into<String>, jwks_url: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            jwks_url: jwks_url.into(),
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            keys: Cache::builder()
                .max_capacity(1)
                .time_to_live(Duration::from_secs(3600))
                .build(),
        }
    }

    async fn key_set(&self) -> Result<JwkSet, AuthError> {
        let client = self.client.clone();
        let url = self.jwks_url.clone();
        self.keys
            .try_get_with("google", async move {
                client
                    .get(&url)
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<JwkSet>()
                    .await
            })
            .await
            .map_err(|e| {
                error!("Failed to fetch identity provider keys: {}", e);
                AuthError::TokenInvalid
            })
    }
}

#[async_trait]
impl IdentityVerifier for FirebaseVerifier {
    async fn verify(&self, id_token: &str) -> Result<FederatedIdentity, AuthError> {
        let header = decode_header(id_token).map_err(|_| AuthError::TokenInvalid)?;
        let kid = header.kid.ok_or(AuthError::TokenInvalid)?;

        let key_set = self.key_set().await?;
        let jwk = key_set.find(&kid).ok_or_else(|| {
            warn!("Identity token signed with unknown key id {}", kid);
            AuthError::TokenInvalid
        })?;
        let key = DecodingKey::from_jwk(jwk).map_err(|_| AuthError::TokenInvalid)?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.project_id]);
        validation.set_issuer(&[format!("https://securetoken.google.com/{}", self.project_id)]);

        let claims = decode::<FirebaseClaims>(id_token, &key, &validation)
            .map_err(|e| {
                warn!("Identity token rejected: {}", e);
                AuthError::TokenInvalid
            })?
            .claims;

        let email = claims
            .email
            .filter(|e| !e.trim().is_empty())
            .ok_or(AuthError::TokenInvalid)?;

        Ok(FederatedIdentity {
            subject: claims.sub,
            email,
            name: claims.name,
        })
    }
}

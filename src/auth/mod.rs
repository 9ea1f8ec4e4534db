//! Credential & session management: password hashing, session tokens, role policy
//! and provisioning of users seen through the federated identity provider.

mod federated;
mod password;
mod role;
mod token;

pub use federated::{FederatedIdentity, FirebaseVerifier, IdentityVerifier};
pub use password::{random_placeholder_password, PasswordHasher};
pub use role::{normalize_email, AdminAllowlist, Role};
pub use token::{Claims, SessionKeys};

use actix_web::web;
use chrono::Duration;
use lazy_static::lazy_static;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::AppError;
use crate::models::user::{NewUser, User, DEFAULT_COMPANY};
use crate::models::is_unique_violation;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Account is deactivated")]
    AccountDeactivated,

    #[error("Could not validate credentials")]
    TokenInvalid,

    #[error("User with this email already exists")]
    EmailTaken,

    #[error("Admin access required")]
    Forbidden,

    #[error("hashing failed: {0}")]
    Hashing(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials
            | AuthError::AccountDeactivated
            | AuthError::TokenInvalid => AppError::Unauthorized(err.to_string()),
            AuthError::EmailTaken => AppError::Conflict(err.to_string()),
            AuthError::Forbidden => AppError::Forbidden(err.to_string()),
            AuthError::Hashing(msg) => AppError::Internal(anyhow::anyhow!(msg)),
            AuthError::Storage(e) => AppError::Internal(e),
        }
    }
}

lazy_static! {
    // Verified against when the email is unknown so both failure paths cost the same.
    static ref DUMMY_HASH: String = PasswordHasher::new()
        .hash("timing-equalizer")
        .unwrap_or_default();
}

pub struct Signup<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub name: &'a str,
    pub role: Option<&'a str>,
    pub company_id: Option<&'a str>,
}

#[derive(Clone)]
pub struct CredentialManager {
    hasher: PasswordHasher,
    keys: SessionKeys,
    allowlist: AdminAllowlist,
}

impl CredentialManager {
    pub fn new(keys: SessionKeys, allowlist: AdminAllowlist) -> Self {
        Self {
            hasher: PasswordHasher::new(),
            keys,
            allowlist,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            SessionKeys::new(
                config.jwt_secret.as_bytes(),
                Duration::minutes(config.jwt_expires_minutes),
            ),
            AdminAllowlist::new(&config.admin_emails),
        )
    }

    /// Argon2 is deliberately slow, so hashing runs off the async workers.
    pub async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        web::block(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::Hashing(e.to_string()))?
    }

    pub async fn verify_password(&self, password: &str, hash: &str) -> bool {
        let hasher = self.hasher.clone();
        let password = password.to_string();
        let hash = hash.to_string();
        web::block(move || hasher.verify(&password, &hash))
            .await
            .unwrap_or(false)
    }

    pub fn issue_token(&self, user_id: &str) -> Result<String, AuthError> {
        self.keys.issue(user_id)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        self.keys.verify(token)
    }

    pub fn require_admin(&self, user: User) -> Result<User, AuthError> {
        if user.is_admin() {
            Ok(user)
        } else {
            Err(AuthError::Forbidden)
        }
    }

    pub async fn register(&self, pool: &PgPool, signup: Signup<'_>) -> Result<User, AuthError> {
        let email = normalize_email(signup.email);
        if User::find_by_email(pool, &email).await?.is_some() {
            info!("[signup] email already exists (normalized): {}", email);
            return Err(AuthError::EmailTaken);
        }

        let hashed_password = self.hash_password(signup.password).await?;
        let role = self.allowlist.resolve_role(&email, signup.role);
        let company_id = signup
            .company_id
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_COMPANY);

        let user = User::create(
            pool,
            NewUser {
                email: &email,
                name: signup.name,
                role,
                company_id,
                hashed_password: &hashed_password,
            },
        )
        .await
        .map_err(|e| {
            // a concurrent signup can still hit the unique index
            if is_unique_violation(&e) {
                AuthError::EmailTaken
            } else {
                AuthError::Storage(e)
            }
        })?;

        info!("New user registered: {} ({})", user.email, user.role);
        Ok(user)
    }

    pub async fn authenticate(
        &self,
        pool: &PgPool,
        email: &str,
        password: &str,
    ) -> Result<User, AuthError> {
        let Some(user) = User::find_by_email(pool, email).await? else {
            self.verify_password(password, &DUMMY_HASH).await;
            return Err(AuthError::InvalidCredentials);
        };

        let Some(stored_hash) = user.hashed_password.clone() else {
            self.verify_password(password, &DUMMY_HASH).await;
            return Err(AuthError::InvalidCredentials);
        };
        if !self.verify_password(password, &stored_hash).await {
            return Err(AuthError::InvalidCredentials);
        }
        if !user.is_active {
            return Err(AuthError::AccountDeactivated);
        }

        let role = self
            .allowlist
            .resolve_role(&user.email, Some(user.role.as_str()));
        let upgraded_hash = if self.hasher.needs_rehash(&stored_hash) {
            info!("Upgrading legacy password hash for user {}", user.id);
            Some(self.hash_password(password).await?)
        } else {
            None
        };

        if role != user.role || upgraded_hash.is_some() {
            User::record_login(pool, &user.id, role, upgraded_hash.as_deref()).await?;
        }

        Ok(User { role, ..user })
    }

    /// Looks up the local user for a verified federated identity, creating it on first sight.
    pub async fn resolve_or_provision(
        &self,
        pool: &PgPool,
        identity: &FederatedIdentity,
        requested_role: Option<&str>,
        company_id: Option<&str>,
    ) -> Result<User, AuthError> {
        let email = normalize_email(&identity.email);
        let company_id = company_id.map(str::trim).filter(|c| !c.is_empty());
        let display_name = identity
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());

        match User::find_by_email(pool, &email).await? {
            Some(existing) => {
                let requested = requested_role.or(Some(existing.role.as_str()));
                let role = self.allowlist.resolve_role(&email, requested);
                if !existing.is_active {
                    warn!("Reactivating federated user {}", existing.id);
                }
                Ok(User::refresh_federated(pool, &existing.id, &display_name, role, company_id)
                    .await?)
            }
            None => {
                let role = self.allowlist.resolve_role(&email, requested_role);
                let placeholder = self.hash_password(&random_placeholder_password()).await?;
                let user = User::create(
                    pool,
                    NewUser {
                        email: &email,
                        name: &display_name,
                        role,
                        company_id: company_id.unwrap_or(DEFAULT_COMPANY),
                        hashed_password: &placeholder,
                    },
                )
                .await?;
                info!(
                    "Provisioned federated user {} ({}) for subject {}",
                    user.email, user.role, identity.subject
                );
                Ok(user)
            }
        }
    }
}

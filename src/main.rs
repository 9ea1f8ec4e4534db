use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::auth::{CredentialManager, FirebaseVerifier, IdentityVerifier};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::gateway::Gateway;
use crate::middleware::auth::Authentication;
use crate::transcription::{Transcriber, WhisperTranscriber};

mod auth;
mod config;
mod error;
mod gateway;
mod middleware {
    pub mod auth;
}
mod models;
mod prompts;
mod routes;
mod schema;
mod transcription;
mod types;

pub struct AppState {
    pub pool: Option<PgPool>,
    pub db_connected: bool,
    pub schema_ready: bool,
    pub config: AppConfig,
    pub credentials: Arc<CredentialManager>,
    pub gateway: Gateway,
    pub transcriber: Arc<dyn Transcriber>,
    pub identity: Option<Arc<dyn IdentityVerifier>>,
}

impl AppState {
    /// The pool, or a 500 for routes that cannot work without it.
    pub fn db(&self) -> Result<&PgPool, AppError> {
        self.pool.as_ref().ok_or(AppError::DatabaseUnavailable)
    }

    #[cfg(test)]
    pub fn for_tests(pool: Option<PgPool>) -> Arc<Self> {
        let config = AppConfig::default();
        Arc::new(AppState {
            db_connected: pool.is_some(),
            schema_ready: pool.is_some(),
            pool,
            credentials: Arc::new(CredentialManager::from_config(&config)),
            gateway: Gateway::from_config(&config).expect("gateway"),
            transcriber: Arc::new(WhisperTranscriber::from_config(&config)),
            identity: None,
            config,
        })
    }
}

#[derive(OpenApi)]
#[openapi(
    info(title = "Call Companion API"),
    components(schemas(
        models::User,
        auth::Role,
        models::Call,
        models::CallType,
        models::CallStatus,
        models::Customer,
        models::Transcript,
        models::Summary,
        models::SummaryContent,
        models::ChatMessage,
        types::SignupRequest,
        types::LoginRequest,
        types::FederatedSyncRequest,
        types::TokenResponse,
        types::UpdateUserRequest,
        types::MessageResponse,
        types::AiChatRequest,
        types::AiChatResponse,
        types::UpdateCallRequest,
        types::TranscribeRequest,
        types::TranscriptionResponse,
        types::SummaryResponse,
        types::CustomerRequest,
        types::CustomerChatRequest,
        types::CustomerChatResponse,
    ))
)]
struct ApiDoc;

async fn connect(config: &AppConfig) -> Option<PgPool> {
    let Some(url) = config.database_url.as_deref() else {
        warn!("DATABASE_URL not set, database routes are unavailable");
        return None;
    };

    match PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(30))
        .connect(url)
        .await
    {
        Ok(pool) => {
            info!("Connected to database");
            Some(pool)
        }
        Err(e) => {
            error!("Database connection failed: {}", e);
            None
        }
    }
}

fn cors(origins: &[String]) -> Cors {
    let cors = Cors::default()
        .allow_any_method()
        .allow_any_header()
        .max_age(3600);
    if origins.iter().any(|o| o == "*") {
        return cors.allow_any_origin();
    }
    origins
        .iter()
        .fold(cors.supports_credentials(), |cors, origin| {
            cors.allowed_origin(origin)
        })
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env()?;

    let pool = connect(&config).await;
    let schema_ready = match &pool {
        Some(pool) => match schema::reconcile(pool).await {
            Ok(report) => {
                info!(
                    "Schema ready (user key: {:?}, added columns: {:?})",
                    report.user_key, report.added_columns
                );
                true
            }
            Err(e) => {
                error!("Schema reconciliation failed: {:#}", e);
                false
            }
        },
        None => false,
    };

    let identity = config.firebase_project_id.clone().map(|project_id| {
        info!("Federated sign-in enabled for project {}", project_id);
        Arc::new(FirebaseVerifier::new(project_id)) as Arc<dyn IdentityVerifier>
    });

    let gateway = Gateway::from_config(&config)?;
    if !gateway.server_key_configured() {
        warn!("GEMINI_API_KEY not set, AI replies need a caller key");
    }

    let app_state = Arc::new(AppState {
        db_connected: pool.is_some(),
        schema_ready,
        pool: pool.clone(),
        credentials: Arc::new(CredentialManager::from_config(&config)),
        gateway,
        transcriber: Arc::new(WhisperTranscriber::from_config(&config)),
        identity,
        config: config.clone(),
    });

    let bind_address = config.bind_address();
    info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::JsonConfig::default().error_handler(|err, _req| {
                AppError::Validation(err.to_string()).into()
            }))
            .app_data(web::QueryConfig::default().error_handler(|err, _req| {
                AppError::Validation(err.to_string()).into()
            }))
            .wrap(Authentication {
                credentials: app_state.credentials.clone(),
            })
            .wrap(cors(&app_state.config.cors_origins))
            .wrap(Logger::default())
            .service(Scalar::with_url("/docs", ApiDoc::openapi()))
            .configure(routes::configure)
    })
    .bind(bind_address)?
    .run()
    .await?;

    if let Some(pool) = pool {
        pool.close().await;
    }
    info!("Server stopped");
    Ok(())
}

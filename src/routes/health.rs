use std::sync::Arc;

use actix_web::{get, web, HttpResponse};
use serde_json::json;

use crate::AppState;

const SERVICE_NAME: &str = "call-companion-api";
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[get("/")]
pub async fn root() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "message": "Call Companion API",
        "version": VERSION,
        "docs": "/docs",
        "health": "/health",
        "api_health": "/api/health",
    }))
}

#[get("/health")]
pub async fn health(app_state: web::Data<Arc<AppState>>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": VERSION,
        "database_connected": app_state.db_connected,
    }))
}

#[get("/health")]
pub async fn api_health(app_state: web::Data<Arc<AppState>>) -> HttpResponse {
    let auth_mode = if app_state.db_connected {
        "full_auth"
    } else {
        "api_auth"
    };
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "database_connected": app_state.db_connected,
        "schema_ready": app_state.schema_ready,
        "gemini_api_configured": app_state.gateway.server_key_configured(),
        "api_host": app_state.config.bind_address(),
        "auth_mode": auth_mode,
    }))
}

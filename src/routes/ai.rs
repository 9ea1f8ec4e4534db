use std::sync::Arc;

use actix_web::{get, post, web, HttpResponse};
use serde_json::json;

use crate::gateway::GenerationRequest;
use crate::middleware::auth::AuthenticatedUser;
use crate::types::{AiChatRequest, AiChatResponse};
use crate::AppState;

/// Never fails on provider trouble; the reply degrades to an apology instead.
#[post("/chat")]
pub async fn chat(
    app_state: web::Data<Arc<AppState>>,
    _authenticated_user: AuthenticatedUser,
    body: web::Json<AiChatRequest>,
) -> web::Json<AiChatResponse> {
    let reply = app_state
        .gateway
        .complete(GenerationRequest {
            message: &body.message,
            context: body.context.as_deref(),
            temperature: body.temperature,
            caller_key: body.api_key.as_deref(),
        })
        .await;

    web::Json(AiChatResponse { reply })
}

#[get("/diagnostics")]
pub async fn diagnostics(app_state: web::Data<Arc<AppState>>) -> HttpResponse {
    if !app_state.config.debug_ai {
        return HttpResponse::Ok().json(json!({ "message": "AI diagnostics disabled" }));
    }
    HttpResponse::Ok().json(app_state.gateway.diagnostics())
}

#[get("/ping")]
pub async fn ping() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "ok": true, "note": "AI router is reachable" }))
}

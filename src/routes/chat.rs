use std::sync::Arc;

use actix_web::{get, post, web};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::gateway::{Completion, GatewayError, GenerationRequest};
use crate::middleware::auth::CurrentUser;
use crate::models::{ChatMessage, Summary};
use crate::prompts;
use crate::routes::customers::authorized_customer;
use crate::types::{CustomerChatRequest, CustomerChatResponse};
use crate::AppState;

const CONTEXT_SUMMARIES: usize = 10;
const CONTEXT_MESSAGES: usize = 20;

fn tail<T>(items: &[T], n: usize) -> &[T] {
    &items[items.len().saturating_sub(n)..]
}

/// The reply shown to the caller, and whether it belongs in the stored conversation.
/// Provider apologies are only shown, so later prompts never carry the failure text.
fn reply_for(outcome: Result<Completion, GatewayError>) -> (String, bool) {
    match outcome {
        Ok(completion) => (completion.text, true),
        Err(err) => (err.apology(), false),
    }
}

#[get("/{customer_id}/chat")]
pub async fn chat_history(
    app_state: web::Data<Arc<AppState>>,
    current_user: CurrentUser,
    customer_id: web::Path<Uuid>,
) -> Result<web::Json<Vec<ChatMessage>>, AppError> {
    let customer =
        authorized_customer(&app_state, &current_user.0, customer_id.into_inner()).await?;
    let history = ChatMessage::history(app_state.db()?, customer.id, &current_user.0.id).await?;
    Ok(web::Json(history))
}

#[post("/{customer_id}/chat")]
pub async fn customer_chat(
    app_state: web::Data<Arc<AppState>>,
    current_user: CurrentUser,
    customer_id: web::Path<Uuid>,
    body: web::Json<CustomerChatRequest>,
) -> Result<web::Json<CustomerChatResponse>, AppError> {
    let message = body.message.trim();
    if message.is_empty() {
        return Err(AppError::Validation("message is required".to_string()));
    }

    let pool = app_state.db()?;
    let user = &current_user.0;
    let customer = authorized_customer(&app_state, user, customer_id.into_inner()).await?;

    let summaries =
        Summary::list_for_customer(pool, &customer.employee_id, &customer.phone_number).await?;
    let history = ChatMessage::history(pool, customer.id, &user.id).await?;
    let prompt = prompts::customer_chat_prompt(
        tail(&summaries, CONTEXT_SUMMARIES),
        tail(&history, CONTEXT_MESSAGES),
        message,
    );

    let outcome = app_state
        .gateway
        .generate(GenerationRequest {
            message: &prompt,
            ..Default::default()
        })
        .await;
    let (reply, keep_reply) = reply_for(outcome);

    let question = ChatMessage::create(pool, customer.id, &user.id, message, true).await?;
    let mut messages = vec![question];
    if keep_reply {
        match ChatMessage::create(pool, customer.id, &user.id, &reply, false).await {
            Ok(answer) => messages.push(answer),
            Err(e) => {
                warn!("Stored the question but not the reply for customer {}: {}", customer.id, e);
                return Err(e.into());
            }
        }
    } else {
        warn!("No AI reply for customer {}, only the question was stored", customer.id);
    }

    info!(
        "Customer chat for {} by {} ({} summaries in context)",
        customer.id,
        user.id,
        summaries.len()
    );
    Ok(web::Json(CustomerChatResponse {
        reply,
        messages,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::CredentialSource;
    use crate::prompts::Prompts;

    #[test]
    fn tail_keeps_the_newest() {
        let items = [1, 2, 3, 4, 5];
        assert_eq!(tail(&items, 2), &[4, 5]);
        assert_eq!(tail(&items, 10), &items);
        assert!(tail(&items[..0], 3).is_empty());
    }

    #[test]
    fn provider_failures_are_shown_but_not_stored() {
        let (reply, keep) = reply_for(Ok(Completion {
            text: "Offer the annual plan.".to_string(),
            model: "gemini-1.5-flash".to_string(),
            api_version: "v1beta".to_string(),
            source: CredentialSource::Server,
        }));
        assert_eq!(reply, "Offer the annual plan.");
        assert!(keep);

        let (reply, keep) = reply_for(Err(GatewayError::Exhausted {
            last_error: Some("429 quota exceeded".to_string()),
        }));
        assert!(reply.contains("[diagnostic]"));
        assert!(!keep);

        let (reply, keep) = reply_for(Err(GatewayError::NoCredentials));
        assert_eq!(reply, Prompts::PROVIDER_UNAVAILABLE);
        assert!(!keep);
    }
}

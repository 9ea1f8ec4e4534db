use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::ChatMessage;

#[derive(Deserialize, ToSchema)]
pub struct CustomerChatRequest {
    pub message: String,
}

#[derive(Serialize, ToSchema)]
pub struct CustomerChatResponse {
    pub reply: String,
    pub messages: Vec<ChatMessage>,
}

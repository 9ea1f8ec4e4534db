use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AiChatRequest {
    pub message: String,
    pub context: Option<String>,
    pub temperature: Option<f64>,
    pub api_key: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct AiChatResponse {
    pub reply: String,
}

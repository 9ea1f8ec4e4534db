use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{CallStatus, SummaryContent};

#[derive(Deserialize, ToSchema)]
pub struct CallsQuery {
    pub customer_number: Option<String>,
    pub user_id: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateCallRequest {
    pub notes: Option<String>,
    pub status: Option<CallStatus>,
}

#[derive(Deserialize, Default, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TranscribeRequest {
    pub api_key: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionResponse {
    pub transcript_id: uuid::Uuid,
    pub text: String,
    pub cached: bool,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SummaryResponse {
    pub summary_id: uuid::Uuid,
    pub summary: SummaryContent,
    pub cached: bool,
}

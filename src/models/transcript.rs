use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{query_as, FromRow, PgPool};
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub id: Uuid,
    pub call_id: Uuid,
    pub full_text: String,
    pub provider: Option<String>,
    pub language: Option<String>,
    pub confidence_score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Transcript {
    pub async fn create(
        pool: &PgPool,
        call_id: Uuid,
        full_text: &str,
        provider: &str,
        language: Option<&str>,
    ) -> Result<Self> {
        let transcript = query_as::<_, Transcript>(
            r#"
            INSERT INTO transcripts (id, call_id, full_text, provider, language)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, call_id, full_text, provider, language, confidence_score, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(call_id)
        .bind(full_text)
        .bind(provider)
        .bind(language)
        .fetch_one(pool)
        .await?;

        debug!("Transcript created: {} for call {}", transcript.id, call_id);
        Ok(transcript)
    }

    pub async fn get_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>> {
        Ok(query_as::<_, Transcript>(
            r#"
            SELECT id, call_id, full_text, provider, language, confidence_score, created_at
            FROM transcripts WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?)
    }
}

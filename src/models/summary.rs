use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{query_as, FromRow, PgPool};
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

const SUMMARY_COLUMNS: &str =
    "id, call_id, transcript_id, highlights, sentiment, next_steps, raw_response, created_at";

/// The structured part of a summary as produced by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SummaryContent {
    #[serde(default)]
    pub highlights: Vec<String>,
    #[serde(default = "neutral")]
    pub sentiment: String,
    #[serde(default)]
    pub next_steps: Vec<String>,
}

fn neutral() -> String {
    "neutral".to_string()
}

impl SummaryContent {
    /// Stored when the model reply cannot be read as JSON.
    pub fn placeholder() -> Self {
        Self {
            highlights: vec!["Failed to parse highlights".to_string()],
            sentiment: neutral(),
            next_steps: vec!["Review transcript manually".to_string()],
        }
    }

    /// Maps the sentiment label onto [-1, 1]; the label may carry an explanation after it.
    pub fn sentiment_score(&self) -> Option<f64> {
        let label = self.sentiment.trim().to_ascii_lowercase();
        if label.starts_with("positive") {
            Some(1.0)
        } else if label.starts_with("negative") {
            Some(-1.0)
        } else if label.starts_with("neutral") {
            Some(0.0)
        } else {
            None
        }
    }

    /// Flat text kept on the call row.
    pub fn to_text(&self) -> String {
        let mut text = String::from("Highlights:\n");
        for highlight in &self.highlights {
            text.push_str(&format!("- {highlight}\n"));
        }
        text.push_str(&format!("Sentiment: {}\n", self.sentiment));
        text.push_str("Next Steps:\n");
        for step in &self.next_steps {
            text.push_str(&format!("- {step}\n"));
        }
        text
    }
}

#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub id: Uuid,
    pub call_id: Uuid,
    pub transcript_id: Uuid,
    #[schema(value_type = Vec<String>)]
    pub highlights: Json<Vec<String>>,
    pub sentiment: String,
    #[schema(value_type = Vec<String>)]
    pub next_steps: Json<Vec<String>>,
    pub raw_response: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Summary {
    pub fn content(&self) -> SummaryContent {
        SummaryContent {
            highlights: self.highlights.0.clone(),
            sentiment: self.sentiment.clone(),
            next_steps: self.next_steps.0.clone(),
        }
    }

    pub async fn create(
        pool: &PgPool,
        call_id: Uuid,
        transcript_id: Uuid,
        content: &SummaryContent,
        raw_response: &str,
    ) -> Result<Self> {
        let sql = format!(
            r#"
            INSERT INTO ai_summaries (id, call_id, transcript_id, highlights, sentiment,
                next_steps, raw_response)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {SUMMARY_COLUMNS}
            "#
        );
        let summary = query_as::<_, Summary>(&sql)
            .bind(Uuid::new_v4())
            .bind(call_id)
            .bind(transcript_id)
            .bind(Json(&content.highlights))
            .bind(&content.sentiment)
            .bind(Json(&content.next_steps))
            .bind(raw_response)
            .fetch_one(pool)
            .await?;

        debug!("Summary created: {} for call {}", summary.id, call_id);
        Ok(summary)
    }

    pub async fn get_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>> {
        let sql = format!("SELECT {SUMMARY_COLUMNS} FROM ai_summaries WHERE id = $1");
        Ok(query_as::<_, Summary>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await?)
    }

    /// Summaries of the employee's calls with this number, oldest first.
    pub async fn list_for_customer(
        pool: &PgPool,
        employee_id: &str,
        phone_number: &str,
    ) -> Result<Vec<Self>> {
        let sql = format!(
            r#"
            SELECT s.id, s.call_id, s.transcript_id, s.highlights, s.sentiment, s.next_steps,
                   s.raw_response, s.created_at
            FROM ai_summaries s
            JOIN calls c ON c.id = s.call_id
            WHERE c.user_id = $1 AND c.customer_number = $2
            ORDER BY s.created_at ASC
            "#
        );
        Ok(query_as::<_, Summary>(&sql)
            .bind(employee_id)
            .bind(phone_number)
            .fetch_all(pool)
            .await?)
    }
}

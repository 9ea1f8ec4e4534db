use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{query_as, FromRow, PgPool};
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub employee_id: String,
    pub content: String,
    pub is_from_user: bool,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub async fn create(
        pool: &PgPool,
        customer_id: Uuid,
        employee_id: &str,
        content: &str,
        is_from_user: bool,
    ) -> Result<Self> {
        let message = query_as::<_, ChatMessage>(
            r#"
            INSERT INTO chat_messages (id, customer_id, employee_id, content, is_from_user)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, customer_id, employee_id, content, is_from_user, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(customer_id)
        .bind(employee_id)
        .bind(content)
        .bind(is_from_user)
        .fetch_one(pool)
        .await?;

        debug!("Chat message created: {}", message.id);
        Ok(message)
    }

    /// Conversation between one employee and the assistant about one customer, oldest first.
    pub async fn history(pool: &PgPool, customer_id: Uuid, employee_id: &str) -> Result<Vec<Self>> {
        Ok(query_as::<_, ChatMessage>(
            r#"
            SELECT id, customer_id, employee_id, content, is_from_user, created_at
            FROM chat_messages
            WHERE customer_id = $1 AND employee_id = $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(customer_id)
        .bind(employee_id)
        .fetch_all(pool)
        .await?)
    }

    pub fn speaker(&self) -> &'static str {
        if self.is_from_user {
            "User"
        } else {
            "AI"
        }
    }
}

use std::fmt;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{query, query_as, FromRow, PgPool};
use thiserror::Error;
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

const CALL_COLUMNS: &str = "id, user_id, customer_number, customer_name, call_type, status, \
     started_at, ended_at, duration_sec, audio_file_size, audio_mime_type, firebase_call_id, \
     firebase_audio_url, transcript_id, transcript_text, summary_id, ai_summary, sentiment_score, \
     notes, (audio_bytes IS NOT NULL) AS has_audio, created_at, updated_at";

pub const DEFAULT_AUDIO_MIME: &str = "audio/m4a";

#[derive(Debug, Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Incoming,
    Outgoing,
}

impl CallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallType::Incoming => "incoming",
            CallType::Outgoing => "outgoing",
        }
    }
}

impl TryFrom<String> for CallType {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "incoming" => Ok(CallType::Incoming),
            "outgoing" => Ok(CallType::Outgoing),
            _ => Err(UnknownVariant {
                kind: "call type",
                value,
            }),
        }
    }
}

/// Lifecycle: recording -> completed -> transcribing -> analyzed, or failed at any point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Recording,
    Completed,
    Transcribing,
    Analyzed,
    Failed,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Recording => "recording",
            CallStatus::Completed => "completed",
            CallStatus::Transcribing => "transcribing",
            CallStatus::Analyzed => "analyzed",
            CallStatus::Failed => "failed",
        }
    }

    /// A failed call may be retried from transcription or from analysis.
    pub fn can_transition_to(self, next: CallStatus) -> bool {
        use CallStatus::*;
        matches!(
            (self, next),
            (Recording, Completed)
                | (Completed, Transcribing)
                | (Transcribing, Analyzed)
                | (Failed, Transcribing)
                | (Failed, Analyzed)
        ) || (next == Failed && self != Failed)
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for CallStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "recording" => Ok(CallStatus::Recording),
            // older rows used the pipeline step names
            "completed" | "recorded" => Ok(CallStatus::Completed),
            "transcribing" | "transcribed" => Ok(CallStatus::Transcribing),
            "analyzed" | "summarized" => Ok(CallStatus::Analyzed),
            "failed" => Ok(CallStatus::Failed),
            _ => Err(UnknownVariant {
                kind: "call status",
                value,
            }),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    pub id: Uuid,
    pub user_id: String,
    pub customer_number: String,
    pub customer_name: Option<String>,
    #[sqlx(try_from = "String")]
    pub call_type: CallType,
    #[sqlx(try_from = "String")]
    pub status: CallStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_sec: Option<i32>,
    pub audio_file_size: Option<i64>,
    pub audio_mime_type: Option<String>,
    pub firebase_call_id: Option<String>,
    pub firebase_audio_url: Option<String>,
    pub transcript_id: Option<Uuid>,
    pub transcript_text: Option<String>,
    pub summary_id: Option<Uuid>,
    pub ai_summary: Option<String>,
    pub sentiment_score: Option<f64>,
    pub notes: Option<String>,
    pub has_audio: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Inline audio as uploaded.
#[derive(Debug, Clone)]
pub struct AudioBlob {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, Clone)]
pub struct NewCall {
    pub user_id: String,
    pub customer_number: String,
    pub customer_name: Option<String>,
    pub call_type: CallType,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_sec: Option<i32>,
    pub firebase_call_id: Option<String>,
    pub firebase_audio_url: Option<String>,
    pub notes: Option<String>,
    pub audio: Option<AudioBlob>,
}

#[derive(Debug, Default)]
pub struct CallFilter<'a> {
    pub customer_number: Option<&'a str>,
    pub user_id: Option<&'a str>,
    pub limit: i64,
}

impl Call {
    /// Non-admins may only touch their own calls.
    pub fn accessible_by(&self, user_id: &str, is_admin: bool) -> bool {
        is_admin || self.user_id == user_id
    }

    pub async fn create(pool: &PgPool, new_call: NewCall) -> Result<Self> {
        let status = if new_call.ended_at.is_some() {
            CallStatus::Completed
        } else {
            CallStatus::Recording
        };
        let (audio_bytes, audio_size, audio_mime) = match new_call.audio {
            Some(audio) => {
                let size = audio.bytes.len() as i64;
                (Some(audio.bytes), Some(size), Some(audio.mime_type))
            }
            None => (None, None, None),
        };

        let sql = format!(
            r#"
            INSERT INTO calls (id, user_id, customer_number, customer_name, call_type, status,
                started_at, ended_at, duration_sec, audio_bytes, audio_file_size, audio_mime_type,
                firebase_call_id, firebase_audio_url, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {CALL_COLUMNS}
            "#
        );
        let call = query_as::<_, Call>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new_call.user_id)
            .bind(&new_call.customer_number)
            .bind(&new_call.customer_name)
            .bind(new_call.call_type.as_str())
            .bind(status.as_str())
            .bind(new_call.started_at)
            .bind(new_call.ended_at)
            .bind(new_call.duration_sec)
            .bind(audio_bytes)
            .bind(audio_size)
            .bind(audio_mime)
            .bind(&new_call.firebase_call_id)
            .bind(&new_call.firebase_audio_url)
            .bind(&new_call.notes)
            .fetch_one(pool)
            .await?;

        debug!("Call created: {}", call.id);
        Ok(call)
    }

    pub async fn get_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>> {
        let sql = format!("SELECT {CALL_COLUMNS} FROM calls WHERE id = $1");
        Ok(query_as::<_, Call>(&sql).bind(id).fetch_optional(pool).await?)
    }

    /// Most recent first.
    pub async fn list(pool: &PgPool, filter: CallFilter<'_>) -> Result<Vec<Self>> {
        let sql = format!(
            r#"
            SELECT {CALL_COLUMNS} FROM calls
            WHERE ($1::text IS NULL OR customer_number = $1)
              AND ($2::text IS NULL OR user_id = $2)
            ORDER BY started_at DESC
            LIMIT $3
            "#
        );
        Ok(query_as::<_, Call>(&sql)
            .bind(filter.customer_number)
            .bind(filter.user_id)
            .bind(filter.limit)
            .fetch_all(pool)
            .await?)
    }

    pub async fn fetch_audio(pool: &PgPool, id: Uuid) -> Result<Option<AudioBlob>> {
        let row: Option<(Option<Vec<u8>>, Option<String>)> =
            query_as("SELECT audio_bytes, audio_mime_type FROM calls WHERE id = $1")
                .bind(id)
                .fetch_optional(pool)
                .await?;

        Ok(row.and_then(|(bytes, mime)| {
            bytes
                .filter(|b| !b.is_empty())
                .map(|bytes| AudioBlob {
                    bytes,
                    mime_type: mime.unwrap_or_else(|| DEFAULT_AUDIO_MIME.to_string()),
                })
        }))
    }

    pub async fn set_status(pool: &PgPool, id: Uuid, status: CallStatus) -> Result<()> {
        query("UPDATE calls SET status = $1, updated_at = NOW() WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn update_details(
        pool: &PgPool,
        id: Uuid,
        notes: Option<&str>,
        status: Option<CallStatus>,
    ) -> Result<Self> {
        let sql = format!(
            r#"
            UPDATE calls
            SET notes = COALESCE($1, notes), status = COALESCE($2, status), updated_at = NOW()
            WHERE id = $3
            RETURNING {CALL_COLUMNS}
            "#
        );
        Ok(query_as::<_, Call>(&sql)
            .bind(notes)
            .bind(status.map(|s| s.as_str()))
            .bind(id)
            .fetch_one(pool)
            .await?)
    }

    pub async fn link_transcript(
        pool: &PgPool,
        id: Uuid,
        transcript_id: Uuid,
        transcript_text: &str,
    ) -> Result<()> {
        query(
            r#"
            UPDATE calls
            SET transcript_id = $1, transcript_text = $2, updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(transcript_id)
        .bind(transcript_text)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn link_summary(
        pool: &PgPool,
        id: Uuid,
        summary_id: Uuid,
        ai_summary: &str,
        sentiment_score: Option<f64>,
    ) -> Result<()> {
        query(
            r#"
            UPDATE calls
            SET summary_id = $1, ai_summary = $2, sentiment_score = $3, status = $4,
                updated_at = NOW()
            WHERE id = $5
            "#,
        )
        .bind(summary_id)
        .bind(ai_summary)
        .bind(sentiment_score)
        .bind(CallStatus::Analyzed.as_str())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Transcripts, summaries and their rows go with the call through cascading keys.
    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool> {
        let result = query("DELETE FROM calls WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

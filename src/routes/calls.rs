use std::sync::Arc;

use actix_multipart::{Field, Multipart};
use actix_web::{delete, get, http::header, patch, post, web, HttpResponse};
use chrono::{DateTime, NaiveDateTime, Utc};
use futures_util::StreamExt;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::gateway::GenerationRequest;
use crate::middleware::auth::CurrentUser;
use crate::models::call::{AudioBlob, CallFilter, NewCall, DEFAULT_AUDIO_MIME};
use crate::models::{Call, CallStatus, CallType, Customer, Summary, SummaryContent, Transcript, User};
use crate::prompts;
use crate::transcription::{download_audio, extension_for};
use crate::types::{
    CallsQuery, MessageResponse, SummaryResponse, TranscribeRequest, TranscriptionResponse,
    UpdateCallRequest,
};
use crate::AppState;

const MAX_AUDIO_BYTES: usize = 100 * 1024 * 1024;
const MAX_FIELD_BYTES: usize = 64 * 1024;
const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

lazy_static! {
    static ref FENCED_JSON: Regex = Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").unwrap();
}

/// Loads a call the user may access: 404 when missing, 403 when owned by someone else.
pub(crate) async fn authorized_call(
    app_state: &AppState,
    user: &User,
    call_id: Uuid,
) -> Result<Call, AppError> {
    let call = Call::get_by_id(app_state.db()?, call_id)
        .await?
        .ok_or_else(|| AppError::not_found("Call record"))?;
    if !call.accessible_by(&user.id, user.is_admin()) {
        return Err(AppError::forbidden());
    }
    Ok(call)
}

/// Accepts RFC 3339 or a bare ISO timestamp, read as UTC.
fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>, AppError> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").map(|dt| dt.and_utc())
        })
        .map_err(|_| AppError::Validation(format!("{field} must be an ISO 8601 timestamp")))
}

async fn read_field(field: &mut Field, limit: usize) -> Result<Vec<u8>, AppError> {
    let mut buf = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::Validation(format!("Malformed upload: {e}")))?;
        if buf.len() + chunk.len() > limit {
            return Err(AppError::Validation("Upload is too large".to_string()));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

#[derive(Default)]
struct UploadForm {
    user_id: Option<String>,
    customer_number: Option<String>,
    customer_name: Option<String>,
    call_type: Option<String>,
    started_at: Option<String>,
    ended_at: Option<String>,
    duration_sec: Option<String>,
    firebase_call_id: Option<String>,
    firebase_audio_url: Option<String>,
    notes: Option<String>,
    audio: Option<AudioBlob>,
}

impl UploadForm {
    async fn read(mut payload: Multipart) -> Result<Self, AppError> {
        let mut form = UploadForm::default();
        while let Some(field) = payload.next().await {
            let mut field =
                field.map_err(|e| AppError::Validation(format!("Malformed upload: {e}")))?;
            let name = field
                .content_disposition()
                .get_name()
                .unwrap_or_default()
                .to_string();

            if name == "audio_file" {
                let mime_type = field
                    .content_type()
                    .map(|m| m.essence_str().to_string())
                    .filter(|m| m != "application/octet-stream")
                    .unwrap_or_else(|| DEFAULT_AUDIO_MIME.to_string());
                let bytes = read_field(&mut field, MAX_AUDIO_BYTES).await?;
                if !bytes.is_empty() {
                    form.audio = Some(AudioBlob { bytes, mime_type });
                }
                continue;
            }

            let raw = read_field(&mut field, MAX_FIELD_BYTES).await?;
            let value = String::from_utf8(raw)
                .map_err(|_| AppError::Validation(format!("{name} must be UTF-8 text")))?;
            let value = Some(value.trim().to_string()).filter(|v| !v.is_empty());
            match name.as_str() {
                "user_id" => form.user_id = value,
                "customer_number" => form.customer_number = value,
                "customer_name" => form.customer_name = value,
                "call_type" => form.call_type = value,
                "started_at" => form.started_at = value,
                "ended_at" => form.ended_at = value,
                "duration_sec" => form.duration_sec = value,
                "firebase_call_id" => form.firebase_call_id = value,
                "firebase_audio_url" => form.firebase_audio_url = value,
                "notes" => form.notes = value,
                other => warn!("Ignoring unknown upload field '{}'", other),
            }
        }
        Ok(form)
    }

    /// Validates the fields and decides the owner. Admins may upload for another user.
    fn into_new_call(self, uploader: &User) -> Result<NewCall, AppError> {
        let required = |value: Option<String>, name: &str| {
            value.ok_or_else(|| AppError::Validation(format!("{name} is required")))
        };

        let user_id = match self.user_id {
            Some(id) if id != uploader.id => {
                if !uploader.is_admin() {
                    return Err(AppError::forbidden());
                }
                id
            }
            _ => uploader.id.clone(),
        };
        let call_type = CallType::try_from(required(self.call_type, "call_type")?)
            .map_err(|e| AppError::Validation(e.to_string()))?;
        let started_at = parse_timestamp("started_at", &required(self.started_at, "started_at")?)?;
        let ended_at = self
            .ended_at
            .map(|raw| parse_timestamp("ended_at", &raw))
            .transpose()?;
        let duration_sec = self
            .duration_sec
            .map(|raw| {
                raw.parse::<i32>()
                    .ok()
                    .filter(|d| *d >= 0)
                    .ok_or_else(|| {
                        AppError::Validation("duration_sec must be a non-negative integer".into())
                    })
            })
            .transpose()?;

        Ok(NewCall {
            user_id,
            customer_number: required(self.customer_number, "customer_number")?,
            customer_name: self.customer_name,
            call_type,
            started_at,
            ended_at,
            duration_sec,
            firebase_call_id: self.firebase_call_id,
            firebase_audio_url: self.firebase_audio_url,
            notes: self.notes,
            audio: self.audio,
        })
    }
}

#[post("/upload")]
pub async fn upload_call(
    app_state: web::Data<Arc<AppState>>,
    current_user: CurrentUser,
    payload: Multipart,
) -> Result<web::Json<Call>, AppError> {
    let pool = app_state.db()?;
    let new_call = UploadForm::read(payload).await?.into_new_call(&current_user.0)?;
    info!(
        "Uploading call for user {} to {} ({}, audio: {} bytes)",
        new_call.user_id,
        new_call.customer_number,
        new_call.call_type.as_str(),
        new_call.audio.as_ref().map_or(0, |a| a.bytes.len())
    );

    let call = Call::create(pool, new_call).await?;
    if let Err(e) =
        Customer::touch_last_call(pool, &call.user_id, &call.customer_number, call.started_at).await
    {
        warn!("Failed to update customer last call for {}: {}", call.id, e);
    }
    Ok(web::Json(call))
}

#[get("")]
pub async fn list_calls(
    app_state: web::Data<Arc<AppState>>,
    current_user: CurrentUser,
    query: web::Query<CallsQuery>,
) -> Result<web::Json<Vec<Call>>, AppError> {
    let user = &current_user.0;
    // non-admins only ever see their own calls
    let user_id = if user.is_admin() {
        query.user_id.as_deref().filter(|u| !u.is_empty())
    } else {
        Some(user.id.as_str())
    };

    let calls = Call::list(
        app_state.db()?,
        CallFilter {
            customer_number: query.customer_number.as_deref().filter(|c| !c.is_empty()),
            user_id,
            limit: query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        },
    )
    .await?;
    info!("Found {} call records", calls.len());
    Ok(web::Json(calls))
}

#[get("/{call_id}")]
pub async fn get_call(
    app_state: web::Data<Arc<AppState>>,
    current_user: CurrentUser,
    call_id: web::Path<Uuid>,
) -> Result<web::Json<Call>, AppError> {
    let call = authorized_call(&app_state, &current_user.0, call_id.into_inner()).await?;
    Ok(web::Json(call))
}

#[get("/{call_id}/audio")]
pub async fn get_call_audio(
    app_state: web::Data<Arc<AppState>>,
    current_user: CurrentUser,
    call_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let call = authorized_call(&app_state, &current_user.0, call_id.into_inner()).await?;
    let audio = Call::fetch_audio(app_state.db()?, call.id)
        .await?
        .ok_or_else(|| AppError::not_found("Audio file"))?;

    let file_name = format!("call_{}.{}", call.id, extension_for(&audio.mime_type));
    Ok(HttpResponse::Ok()
        .content_type(audio.mime_type.as_str())
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("inline; filename={file_name}"),
        ))
        .body(audio.bytes))
}

#[patch("/{call_id}")]
pub async fn update_call(
    app_state: web::Data<Arc<AppState>>,
    current_user: CurrentUser,
    call_id: web::Path<Uuid>,
    body: web::Json<UpdateCallRequest>,
) -> Result<web::Json<Call>, AppError> {
    let call = authorized_call(&app_state, &current_user.0, call_id.into_inner()).await?;

    if let Some(next) = body.status.filter(|next| *next != call.status) {
        if !call.status.can_transition_to(next) {
            return Err(AppError::Validation(format!(
                "Cannot move call from {} to {}",
                call.status, next
            )));
        }
    }

    let call = Call::update_details(app_state.db()?, call.id, body.notes.as_deref(), body.status)
        .await?;
    Ok(web::Json(call))
}

#[delete("/{call_id}")]
pub async fn delete_call(
    app_state: web::Data<Arc<AppState>>,
    current_user: CurrentUser,
    call_id: web::Path<Uuid>,
) -> Result<web::Json<MessageResponse>, AppError> {
    let call = authorized_call(&app_state, &current_user.0, call_id.into_inner()).await?;
    Call::delete(app_state.db()?, call.id).await?;

    info!("Deleted call {}", call.id);
    Ok(web::Json(MessageResponse::new("Call record deleted successfully")))
}

async fn mark_failed(app_state: &AppState, call_id: Uuid) {
    if let Ok(pool) = app_state.db() {
        if let Err(e) = Call::set_status(pool, call_id, CallStatus::Failed).await {
            error!("Failed to mark call {} as failed: {}", call_id, e);
        }
    }
}

#[post("/{call_id}/transcribe")]
pub async fn transcribe_call(
    app_state: web::Data<Arc<AppState>>,
    current_user: CurrentUser,
    call_id: web::Path<Uuid>,
    body: Option<web::Json<TranscribeRequest>>,
) -> Result<web::Json<TranscriptionResponse>, AppError> {
    let pool = app_state.db()?;
    let call = authorized_call(&app_state, &current_user.0, call_id.into_inner()).await?;

    if let Some(transcript_id) = call.transcript_id {
        if let Some(transcript) = Transcript::get_by_id(pool, transcript_id).await? {
            return Ok(web::Json(TranscriptionResponse {
                transcript_id: transcript.id,
                text: transcript.full_text,
                cached: true,
            }));
        }
        warn!("Call {} points at missing transcript {}", call.id, transcript_id);
    }

    if call.status != CallStatus::Transcribing && !call.status.can_transition_to(CallStatus::Transcribing) {
        return Err(AppError::Validation(format!(
            "Call cannot be transcribed while {}",
            call.status
        )));
    }
    Call::set_status(pool, call.id, CallStatus::Transcribing).await?;

    let audio = match Call::fetch_audio(pool, call.id).await? {
        Some(audio) => audio,
        None => match call.firebase_audio_url.as_deref() {
            Some(url) => match download_audio(url, call.audio_mime_type.as_deref()).await {
                Ok(audio) => audio,
                Err(e) => {
                    error!("Audio download failed for call {}: {:#}", call.id, e);
                    mark_failed(&app_state, call.id).await;
                    return Err(AppError::Upstream("Failed to download audio file".to_string()));
                }
            },
            None => {
                mark_failed(&app_state, call.id).await;
                return Err(AppError::Validation("Call has no audio".to_string()));
            }
        },
    };

    let api_key = body.as_ref().and_then(|b| b.api_key.clone());
    let result = match app_state.transcriber.transcribe(audio, api_key.as_deref()).await {
        Ok(result) => result,
        Err(e) => {
            error!("Transcription failed for call {}: {:#}", call.id, e);
            mark_failed(&app_state, call.id).await;
            return Err(AppError::Upstream("Transcription failed".to_string()));
        }
    };

    // Two separate writes: a failed link leaves the transcript row orphaned.
    let transcript = Transcript::create(
        pool,
        call.id,
        &result.text,
        result.provider,
        result.language.as_deref(),
    )
    .await?;
    Call::link_transcript(pool, call.id, transcript.id, &transcript.full_text).await?;

    info!("Transcribed call {} ({} chars)", call.id, transcript.full_text.len());
    Ok(web::Json(TranscriptionResponse {
        transcript_id: transcript.id,
        text: transcript.full_text,
        cached: false,
    }))
}

/// Reads the model reply as summary JSON, tolerating markdown fences around it.
pub(crate) fn parse_summary(reply: &str) -> SummaryContent {
    let fenced = FENCED_JSON
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str());
    let braced = match (reply.find('{'), reply.rfind('}')) {
        (Some(start), Some(end)) if start < end => Some(&reply[start..=end]),
        _ => None,
    };

    [fenced, Some(reply.trim()), braced]
        .into_iter()
        .flatten()
        .find_map(|candidate| serde_json::from_str::<SummaryContent>(candidate).ok())
        .unwrap_or_else(SummaryContent::placeholder)
}

#[post("/{call_id}/summary")]
pub async fn summarize_call(
    app_state: web::Data<Arc<AppState>>,
    current_user: CurrentUser,
    call_id: web::Path<Uuid>,
) -> Result<web::Json<SummaryResponse>, AppError> {
    let pool = app_state.db()?;
    let call = authorized_call(&app_state, &current_user.0, call_id.into_inner()).await?;

    if let Some(summary_id) = call.summary_id {
        if let Some(summary) = Summary::get_by_id(pool, summary_id).await? {
            return Ok(web::Json(SummaryResponse {
                summary_id: summary.id,
                summary: summary.content(),
                cached: true,
            }));
        }
    }

    let transcript_id = call
        .transcript_id
        .ok_or_else(|| AppError::Validation("Call has no transcript".to_string()))?;
    let transcript = Transcript::get_by_id(pool, transcript_id)
        .await?
        .ok_or_else(|| AppError::not_found("Transcript"))?;

    let prompt = prompts::call_summary(&transcript.full_text);
    let completion = match app_state
        .gateway
        .generate(GenerationRequest {
            message: &prompt,
            ..Default::default()
        })
        .await
    {
        Ok(completion) => completion,
        Err(e) => {
            error!("Summary generation failed for call {}: {}", call.id, e);
            mark_failed(&app_state, call.id).await;
            return Err(AppError::Upstream(e.apology()));
        }
    };

    let content = parse_summary(&completion.text);
    let summary = Summary::create(pool, call.id, transcript.id, &content, &completion.text).await?;
    Call::link_summary(
        pool,
        call.id,
        summary.id,
        &content.to_text(),
        content.sentiment_score(),
    )
    .await?;

    info!("Summarized call {} with {}", call.id, completion.model);
    Ok(web::Json(SummaryResponse {
        summary_id: summary.id,
        summary: content,
        cached: false,
    }))
}

#[get("/{transcript_id}")]
pub async fn get_transcript(
    app_state: web::Data<Arc<AppState>>,
    current_user: CurrentUser,
    transcript_id: web::Path<Uuid>,
) -> Result<web::Json<Transcript>, AppError> {
    let transcript = Transcript::get_by_id(app_state.db()?, transcript_id.into_inner())
        .await?
        .ok_or_else(|| AppError::not_found("Transcript"))?;
    authorized_call(&app_state, &current_user.0, transcript.call_id).await?;
    Ok(web::Json(transcript))
}

#[get("/{summary_id}")]
pub async fn get_summary(
    app_state: web::Data<Arc<AppState>>,
    current_user: CurrentUser,
    summary_id: web::Path<Uuid>,
) -> Result<web::Json<Summary>, AppError> {
    let summary = Summary::get_by_id(app_state.db()?, summary_id.into_inner())
        .await?
        .ok_or_else(|| AppError::not_found("Summary"))?;
    authorized_call(&app_state, &current_user.0, summary.call_id).await?;
    Ok(web::Json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;

    fn user(id: &str, role: Role) -> User {
        User {
            id: id.to_string(),
            email: format!("{id}@x.com"),
            name: id.to_string(),
            role,
            company_id: "c1".to_string(),
            is_active: true,
            hashed_password: None,
            created_at: None,
            updated_at: None,
        }
    }

    fn form() -> UploadForm {
        UploadForm {
            customer_number: Some("+15550100".to_string()),
            call_type: Some("Outgoing".to_string()),
            started_at: Some("2024-05-01T09:30:00Z".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn parses_client_timestamps() {
        let zulu = parse_timestamp("started_at", "2024-05-01T09:30:00Z").unwrap();
        let offset = parse_timestamp("started_at", "2024-05-01T11:30:00+02:00").unwrap();
        let naive = parse_timestamp("started_at", "2024-05-01T09:30:00.000").unwrap();
        assert_eq!(zulu, offset);
        assert_eq!(zulu, naive);
        assert!(parse_timestamp("started_at", "yesterday").is_err());
    }

    #[test]
    fn upload_defaults_owner_to_uploader() {
        let call = form().into_new_call(&user("emp", Role::Employee)).unwrap();
        assert_eq!(call.user_id, "emp");
        assert_eq!(call.call_type, CallType::Outgoing);
        assert!(call.ended_at.is_none());
    }

    #[test]
    fn only_admins_upload_for_others() {
        let on_behalf = UploadForm {
            user_id: Some("someone-else".to_string()),
            ..form()
        };
        assert!(matches!(
            on_behalf.into_new_call(&user("emp", Role::Employee)),
            Err(AppError::Forbidden(_))
        ));

        let on_behalf = UploadForm {
            user_id: Some("someone-else".to_string()),
            ..form()
        };
        let call = on_behalf.into_new_call(&user("boss", Role::Admin)).unwrap();
        assert_eq!(call.user_id, "someone-else");
    }

    #[test]
    fn rejects_bad_upload_fields() {
        let missing = UploadForm {
            customer_number: None,
            ..form()
        };
        assert!(matches!(
            missing.into_new_call(&user("emp", Role::Employee)),
            Err(AppError::Validation(_))
        ));

        let bad_type = UploadForm {
            call_type: Some("voicemail".to_string()),
            ..form()
        };
        assert!(bad_type.into_new_call(&user("emp", Role::Employee)).is_err());

        let bad_duration = UploadForm {
            duration_sec: Some("-4".to_string()),
            ..form()
        };
        assert!(bad_duration.into_new_call(&user("emp", Role::Employee)).is_err());
    }

    #[test]
    fn summary_json_is_read_from_fences() {
        let reply = "Here you go:\n```json\n{\"highlights\": [\"budget approved\"], \"sentiment\": \"positive\", \"nextSteps\": [\"send contract\"]}\n```";
        let content = parse_summary(reply);
        assert_eq!(content.highlights, vec!["budget approved"]);
        assert_eq!(content.next_steps, vec!["send contract"]);

        let bare = parse_summary("{\"highlights\": [], \"sentiment\": \"negative\", \"nextSteps\": []}");
        assert_eq!(bare.sentiment, "negative");

        let chatty = parse_summary("Sure! {\"sentiment\": \"neutral\"} Hope that helps.");
        assert_eq!(chatty.sentiment, "neutral");
        assert!(chatty.highlights.is_empty());
    }

    #[test]
    fn unreadable_summary_falls_back_to_placeholder() {
        assert_eq!(
            parse_summary("The customer was happy."),
            SummaryContent::placeholder()
        );
    }
}

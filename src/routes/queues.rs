use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::config::QueueConfig;
use crate::error::AppError;
use crate::models::{Payload, Pipeline, QueueItem};
use crate::outbox::{BatchReport, NewItem, QueueStats};
use crate::state::SharedState;
use crate::templates::{self, Variables};

#[derive(Deserialize)]
pub struct ProcessParams {
    pub batch_size: Option<usize>,
}

#[derive(Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct EnqueueParams {
    pub process: Option<bool>,
}

#[derive(Deserialize)]
pub struct EnqueueEmail {
    pub to_email: String,
    pub subject: Option<String>,
    pub html_content: Option<String>,
    pub text_content: Option<String>,
    pub template_name: Option<String>,
    #[serde(default)]
    pub variables: Variables,
    pub max_attempts: Option<i32>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct EnqueueText {
    pub recipient_phone: String,
    pub message_content: String,
    pub max_attempts: Option<i32>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

fn batch_size(requested: Option<usize>, config: &QueueConfig) -> Result<usize, AppError> {
    match requested {
        None => Ok(config.batch_size),
        Some(0) => Err(AppError::BadRequest(
            "batch_size must be positive".to_string(),
        )),
        Some(n) => Ok(n.min(config.max_batch_size)),
    }
}

/// Run one batch for the pipeline.
pub async fn process(
    State(state): State<SharedState>,
    Path(pipeline): Path<Pipeline>,
    Query(params): Query<ProcessParams>,
) -> Result<Json<BatchReport>, AppError> {
    let batch_size = batch_size(params.batch_size, &state.config.queue)?;
    let report = state.queues.get(pipeline).process_batch(batch_size).await?;
    Ok(Json(report))
}

pub async fn stats(
    State(state): State<SharedState>,
    Path(pipeline): Path<Pipeline>,
) -> Json<QueueStats> {
    Json(state.queues.get(pipeline).stats().await)
}

pub async fn list_items(
    State(state): State<SharedState>,
    Path(pipeline): Path<Pipeline>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<QueueItem>>, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    let items = state.queues.get(pipeline).store().recent(limit).await?;
    Ok(Json(items))
}

pub async fn enqueue(
    State(state): State<SharedState>,
    Path(pipeline): Path<Pipeline>,
    Query(params): Query<EnqueueParams>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Json(body) = body?;
    let default_attempts = state.config.queue.default_max_attempts;

    let item = match pipeline {
        Pipeline::Email => {
            let req: EnqueueEmail = serde_json::from_value(body)
                .map_err(|e| AppError::BadRequest(format!("Invalid email request: {e}")))?;
            email_item(&state, req, default_attempts).await?
        }
        Pipeline::Sms | Pipeline::Telegram => {
            let req: EnqueueText = serde_json::from_value(body)
                .map_err(|e| AppError::BadRequest(format!("Invalid {pipeline} request: {e}")))?;
            NewItem {
                recipient: req.recipient_phone,
                payload: Payload::Text {
                    message_content: req.message_content,
                },
                template_name: None,
                max_attempts: req.max_attempts.unwrap_or(default_attempts),
                scheduled_at: req.scheduled_at,
            }
        }
    };

    item.validate().map_err(AppError::BadRequest)?;

    let queue = state.queues.get(pipeline);
    let queued = queue.store().enqueue(item).await?;
    tracing::info!("Queued {pipeline} notification {} for {}", queued.id, queued.recipient);

    // Follow-on run for producers that want immediate delivery. The item is
    // already queued, so a failed run is only logged.
    let report = if params.process.unwrap_or(false) {
        match queue.process_batch(state.config.queue.batch_size).await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!("Follow-on {pipeline} batch failed: {e}");
                None
            }
        }
    } else {
        None
    };

    Ok(Json(json!({
        "message": format!("{} notification queued", pipeline.title()),
        "item": queued,
        "report": report,
    })))
}

async fn email_item(
    state: &SharedState,
    req: EnqueueEmail,
    default_attempts: i32,
) -> Result<NewItem, AppError> {
    let payload = match &req.template_name {
        Some(name) => {
            let template = state
                .templates
                .find_active(name)
                .await?
                .ok_or_else(|| AppError::NotFound("Email template not found".to_string()))?;
            templates::render_email(&template, &req.variables)
        }
        None => Payload::Email {
            subject: req
                .subject
                .ok_or_else(|| AppError::BadRequest("subject is required".to_string()))?,
            html_content: req
                .html_content
                .ok_or_else(|| AppError::BadRequest("html_content is required".to_string()))?,
            text_content: req.text_content,
        },
    };

    Ok(NewItem {
        recipient: req.to_email,
        payload,
        template_name: req.template_name,
        max_attempts: req.max_attempts.unwrap_or(default_attempts),
        scheduled_at: req.scheduled_at,
    })
}

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::api::dto::*;
use crate::api::rate_limiter::{rate_limit_middleware, RateLimiter};
use crate::config::Config;
use crate::models::internal::ConversationId;
use crate::orchestrator::{
    conversation_title, format_summary, SchedulerStats, SummaryError, SummaryOutcome,
    SummaryScheduler,
};
use crate::services::clock::Clock;
use crate::storage::{MessageStore, SummaryArchive, WindowRetriever};

const DEFAULT_HISTORY_LIMIT: usize = 7;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<MessageStore>,
    pub retriever: Arc<WindowRetriever>,
    pub archive: Arc<SummaryArchive>,
    pub clock: Arc<dyn Clock>,
    /// `None` when summarization is disabled.
    pub scheduler: Option<SummaryScheduler>,
    /// Shared budget for the summary triggers.
    pub rate_limiter: RateLimiter,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: status.as_u16(),
        }),
    )
}

fn require_scheduler(state: &AppState) -> Result<&SummaryScheduler, ApiError> {
    state
        .scheduler
        .as_ref()
        .ok_or_else(|| api_error(StatusCode::SERVICE_UNAVAILABLE, "Summarization is disabled"))
}

pub async fn ingest_message(
    State(state): State<AppState>,
    Json(req): Json<MessageDto>,
) -> Result<(StatusCode, Json<MessageStoredResponse>), ApiError> {
    let message = req
        .into_message()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;

    let partition = state.store.append(&message).await.map_err(|e| {
        tracing::error!("Failed to store message {}: {}", message.message_id, e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    Ok((
        StatusCode::CREATED,
        Json(MessageStoredResponse {
            message_id: message.message_id,
            partition: partition.storage_key(),
        }),
    ))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(id): Path<ConversationId>,
    Query(params): Query<MessagesQuery>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let messages = match (params.window.as_deref(), params.date.as_deref()) {
        (Some("24h"), _) => {
            state
                .retriever
                .by_rolling_24h(id, state.clock.now())
                .await
        }
        (Some(other), _) => {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                format!("Unsupported window '{}', expected 24h", other),
            ))
        }
        (None, Some(raw)) => {
            let date = parse_date(raw).map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;
            state.retriever.by_calendar_date(id, date).await
        }
        (None, None) => {
            let today = state.clock.now().date();
            state.retriever.by_calendar_date(id, today).await
        }
    };

    Ok(Json(MessagesResponse {
        conversation_id: id,
        count: messages.len(),
        messages: messages.iter().map(MessageDto::from).collect(),
    }))
}

fn outcome_response(
    conversation_id: ConversationId,
    outcome: Result<SummaryOutcome, SummaryError>,
) -> Result<(StatusCode, Json<SummaryResponse>), ApiError> {
    match outcome {
        Ok(SummaryOutcome::Generated { artifact, title }) => Ok((
            StatusCode::CREATED,
            Json(SummaryResponse {
                status: "generated".to_string(),
                conversation_id,
                message_count: artifact.message_count,
                threshold: None,
                summary: Some(SummaryDto::from(&artifact)),
                formatted: Some(format_summary(&artifact, &title)),
            }),
        )),
        Ok(SummaryOutcome::Skipped {
            message_count,
            threshold,
        }) => Ok((
            StatusCode::OK,
            Json(SummaryResponse {
                status: "skipped".to_string(),
                conversation_id,
                message_count,
                threshold: Some(threshold),
                summary: None,
                formatted: None,
            }),
        )),
        Ok(SummaryOutcome::InProgress) => Ok((
            StatusCode::CONFLICT,
            Json(SummaryResponse {
                status: "in_progress".to_string(),
                conversation_id,
                message_count: 0,
                threshold: None,
                summary: None,
                formatted: None,
            }),
        )),
        Err(e @ SummaryError::Provider(_)) => {
            tracing::error!("Manual summary for {} failed: {}", conversation_id, e);
            Err(api_error(StatusCode::BAD_GATEWAY, e.to_string()))
        }
        Err(e @ SummaryError::Persistence(_)) => {
            tracing::error!("Manual summary for {} was not saved: {}", conversation_id, e);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

pub async fn trigger_summary(
    State(state): State<AppState>,
    Path(id): Path<ConversationId>,
    body: Bytes,
) -> Result<(StatusCode, Json<SummaryResponse>), ApiError> {
    let scheduler = require_scheduler(&state)?;

    let req: ManualSummaryRequest = if body.is_empty() {
        ManualSummaryRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?
    };
    let date = req
        .date
        .as_deref()
        .map(parse_date)
        .transpose()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;

    outcome_response(id, scheduler.manual_summary(id, date).await)
}

pub async fn trigger_today_summary(
    State(state): State<AppState>,
    Path(id): Path<ConversationId>,
) -> Result<(StatusCode, Json<SummaryResponse>), ApiError> {
    let scheduler = require_scheduler(&state)?;
    outcome_response(id, scheduler.today_summary(id).await)
}

pub async fn summary_history(
    State(state): State<AppState>,
    Path(id): Path<ConversationId>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let artifacts = state
        .archive
        .history(id, limit)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(HistoryResponse {
        conversation_id: id,
        summaries: artifacts.iter().map(SummaryDto::from).collect(),
    }))
}

pub async fn get_summary(
    State(state): State<AppState>,
    Path((id, raw_date)): Path<(ConversationId, String)>,
) -> Result<Json<SummaryResponse>, ApiError> {
    let date = parse_date(&raw_date).map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;
    let artifact = state
        .archive
        .get(id, date)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Summary not found"))?;

    let messages = state.retriever.by_calendar_date(id, date).await;
    let title = conversation_title(id, &messages);

    Ok(Json(SummaryResponse {
        status: "stored".to_string(),
        conversation_id: id,
        message_count: artifact.message_count,
        threshold: None,
        summary: Some(SummaryDto::from(&artifact)),
        formatted: Some(format_summary(&artifact, &title)),
    }))
}

pub async fn scheduler_stats(
    State(state): State<AppState>,
) -> Result<Json<SchedulerStats>, ApiError> {
    let scheduler = require_scheduler(&state)?;
    Ok(Json(scheduler.stats().await))
}

pub async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub async fn health() -> &'static str {
    "OK"
}

pub fn create_router(state: AppState) -> Router {
    let limited = middleware::from_fn_with_state(state.rate_limiter.clone(), rate_limit_middleware);

    Router::new()
        .route("/api/v1/messages", post(ingest_message))
        .route("/api/v1/conversations/{id}/messages", get(get_messages))
        // Only the triggers are limited; `.get` is added after the layer.
        .route(
            "/api/v1/conversations/{id}/summaries",
            post(trigger_summary)
                .layer(limited.clone())
                .get(summary_history),
        )
        .route(
            "/api/v1/conversations/{id}/summaries/today",
            post(trigger_today_summary).layer(limited),
        )
        .route(
            "/api/v1/conversations/{id}/summaries/{date}",
            get(get_summary),
        )
        .route("/api/v1/scheduler", get(scheduler_stats))
        .route("/api-docs/openapi.json", get(openapi))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

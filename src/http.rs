//! HTTP surface: the batch streaming endpoint and the single-image endpoint.
//!
//! `POST /api/process-images` answers with a newline-delimited JSON event
//! stream drained from the batch coordinator's channel; production and
//! delivery are decoupled, so the coordinator never waits on a slow client
//! beyond channel backpressure.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::{DefaultBodyLimit, Multipart, State, multipart::Field},
    http::{StatusCode, header},
    response::{Json, Response},
    routing::{get, post},
};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};

use crate::ai::{AiService, Constraints, GeminiService, build_prompt, post_process};
use crate::batch::{Event, ImageItem, encode_image, run_batch};
use crate::config::Config;
use crate::error::Error;
use crate::export::ExportPreset;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
}

/// Build the router with permissive CORS and a body limit sized for large
/// image batches.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/process-images", post(process_images))
        .route("/api/analyze-image", post(analyze_image))
        .with_state(state)
        .layer(DefaultBodyLimit::max(200 * 1024 * 1024)) // 200MB for large batches
        .layer(cors)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

type BadRequest = (StatusCode, String);

async fn field_text(field: Field<'_>) -> Result<String, BadRequest> {
    field
        .text()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Field read error: {e}")))
}

/// Parse a numeric form field, falling back to the configured default when
/// the field is absent or unparsable.
async fn field_number(field: Field<'_>, default: usize) -> Result<usize, BadRequest> {
    Ok(field_text(field).await?.trim().parse().unwrap_or(default))
}

/// Batch submit endpoint.
///
/// # Request format
/// multipart/form-data with repeated `files` plus `apiKey`, `maxWorkers`,
/// `batchSize`, `platform`, `titleMin`, `titleMax`, `keywordMin`,
/// `keywordMax` (numeric fields fall back to configured defaults).
///
/// # Response
/// `application/x-ndjson`: one event object per line, ending with either a
/// `complete` event or a single `fatal-error` event when the batch cannot
/// start.
async fn process_images(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, BadRequest> {
    let defaults = &state.config.processing;

    let mut items: Vec<ImageItem> = Vec::new();
    let mut api_key = String::new();
    let mut max_workers = defaults.max_workers;
    let mut batch_size = defaults.batch_size;
    let mut platform = defaults.platform;
    let mut title_min = defaults.title_min;
    let mut title_max = defaults.title_max;
    let mut keyword_min = defaults.keyword_min;
    let mut keyword_max = defaults.keyword_max;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Multipart error: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "files" => {
                let filename = field.file_name().unwrap_or("unknown").to_string();
                let mime_type = field.content_type().unwrap_or("image/jpeg").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, format!("Read error: {e}")))?;
                items.push(ImageItem {
                    filename,
                    mime_type,
                    bytes: data.to_vec(),
                });
            }
            "apiKey" => api_key = field_text(field).await?,
            "maxWorkers" => max_workers = field_number(field, defaults.max_workers).await?,
            "batchSize" => batch_size = field_number(field, defaults.batch_size).await?,
            "platform" => platform = ExportPreset::parse(&field_text(field).await?),
            "titleMin" => title_min = field_number(field, defaults.title_min).await?,
            "titleMax" => title_max = field_number(field, defaults.title_max).await?,
            "keywordMin" => keyword_min = field_number(field, defaults.keyword_min).await?,
            "keywordMax" => keyword_max = field_number(field, defaults.keyword_max).await?,
            _ => {}
        }
    }

    let constraints = Constraints {
        platform,
        title_min,
        title_max,
        keyword_min,
        keyword_max,
    };

    let (tx, rx) = mpsc::channel::<Event>(32);

    if api_key.is_empty() {
        let err = Error::FatalBatch("API key is required".to_string());
        let _ = tx
            .send(Event::FatalError {
                message: err.to_string(),
            })
            .await;
        drop(tx);
    } else {
        log::info!(
            "Batch request: {} images, {} workers, platform {}",
            items.len(),
            max_workers,
            platform.name()
        );
        let service = GeminiService::new(
            api_key,
            state.config.gemini.model.clone(),
            Duration::from_secs(state.config.gemini.timeout_secs),
        );
        tokio::spawn(async move {
            let report = run_batch(&service, items, &constraints, max_workers, batch_size, &tx).await;
            if report.cancelled {
                log::warn!("Batch cancelled by consumer after {} items", report.counters.total);
            } else {
                log::info!(
                    "Batch finished: {} processed, {} failed",
                    report.counters.total,
                    report.counters.failed
                );
            }
        });
    }

    let body = Body::from_stream(
        ReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(event.to_ndjson())),
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    title: String,
    category: String,
    keywords: Vec<String>,
    title_length: usize,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

/// Pre-processing rejections are [`Error::Validation`]; their display text
/// becomes the response body.
fn bad_request(err: Error) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
}

fn internal_error(err: Error) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
}

/// Interactive single-image endpoint.
///
/// multipart/form-data with `image`, `apiKey`, and optional `keywordsCount`;
/// responds with `{title, category, keywords, titleLength}` or an error
/// object with a client/server error status.
async fn analyze_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let mut item: Option<ImageItem> = None;
    let mut api_key = String::new();
    let mut keywords_count = state.config.processing.keyword_max;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(Error::Validation(format!("Multipart error: {e}"))))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "image" => {
                let filename = field.file_name().unwrap_or("unknown").to_string();
                let mime_type = field.content_type().unwrap_or("image/jpeg").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(Error::Validation(format!("Read error: {e}"))))?;
                item = Some(ImageItem {
                    filename,
                    mime_type,
                    bytes: data.to_vec(),
                });
            }
            "apiKey" => {
                api_key = field.text().await.map_err(|e| {
                    bad_request(Error::Validation(format!("Field read error: {e}")))
                })?;
            }
            "keywordsCount" => {
                let text = field.text().await.map_err(|e| {
                    bad_request(Error::Validation(format!("Field read error: {e}")))
                })?;
                keywords_count = text.trim().parse().unwrap_or(keywords_count);
            }
            _ => {}
        }
    }

    let Some(item) = item else {
        return Err(bad_request(Error::Validation(
            "No image provided".to_string(),
        )));
    };
    if api_key.is_empty() {
        return Err(bad_request(Error::Validation(
            "API key is required".to_string(),
        )));
    }
    if item.mime_type != "image/jpeg" && item.mime_type != "image/png" {
        return Err(bad_request(Error::Validation(
            "Only JPEG and PNG images are supported".to_string(),
        )));
    }

    let encoded = encode_image(&item).map_err(internal_error)?;

    let constraints = Constraints {
        keyword_max: keywords_count,
        ..Constraints::from_config(&state.config.processing)
    };
    let prompt = build_prompt(&constraints);

    let service = GeminiService::new(
        api_key,
        state.config.gemini.model.clone(),
        Duration::from_secs(state.config.gemini.timeout_secs),
    );

    let raw = service
        .analyze(&encoded.data, &prompt, &encoded.mime_type)
        .await
        .map_err(internal_error)?;

    let metadata = post_process(raw, constraints.keyword_target());
    Ok(Json(AnalyzeResponse {
        title: metadata.title,
        category: metadata.category,
        keywords: metadata.keywords,
        title_length: metadata.title_length,
    }))
}

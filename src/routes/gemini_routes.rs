use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::TryStreamExt;
use tracing::{error, warn};

use crate::agent::proxy::{ErrorBody, GenerationRequest, ImageResponse, MISSING_API_KEY_CODE};
use crate::agent::GenerationClient;
use crate::errors::AppError;

/// GET `/health`
pub async fn health_handler() -> &'static str {
    "ok"
}

/// GET `/api/gemini/config`: 204 when generation can run, otherwise the
/// same error body a generation request would get.
pub async fn config_handler(State(generator): State<Arc<dyn GenerationClient>>) -> Response {
    match generator.ensure_configured().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST `/api/gemini`: runs a text or image generation on behalf of a client
/// that has no API key of its own.
///
/// Text replies are streamed back as `text/plain`; image replies are JSON
/// `{ "imageUrl": "data:..." }`.
pub async fn gemini_handler(
    State(generator): State<Arc<dyn GenerationClient>>,
    body: Bytes,
) -> Response {
    let request: GenerationRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            warn!("Rejected generation request: {e}");
            return error_body(StatusCode::BAD_REQUEST, "Invalid request type".to_string(), None);
        }
    };

    let result = match request {
        GenerationRequest::Text { history, new_message } => {
            stream_text(generator.as_ref(), &history, &new_message).await
        }
        GenerationRequest::Image { prompt } => generator
            .generate_image(&prompt)
            .await
            .map(|image_url| Json(ImageResponse { image_url }).into_response()),
    };
    result.unwrap_or_else(|e| error_response(&e))
}

async fn stream_text(
    generator: &dyn GenerationClient,
    history: &[crate::models::ChatTurn],
    new_message: &str,
) -> Result<Response, AppError> {
    let fragments = generator
        .generate_text_stream(history, new_message)
        .await?
        .inspect_err(|e| error!("Reply stream aborted: {e}"));

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(fragments),
    )
        .into_response())
}

// ── Helper ────────────────────────────────────────────────────────────────────

fn error_response(err: &AppError) -> Response {
    if err.is_configuration() {
        warn!("Generation requested without an API key");
        return error_body(
            StatusCode::BAD_REQUEST,
            err.to_string(),
            Some(MISSING_API_KEY_CODE.to_string()),
        );
    }
    error!("Error in generation proxy: {err}");
    error_body(StatusCode::INTERNAL_SERVER_ERROR, err.to_string(), None)
}

fn error_body(status: StatusCode, message: String, code: Option<String>) -> Response {
    (status, Json(ErrorBody { message, code })).into_response()
}

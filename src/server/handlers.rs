use crate::core::InferenceError;
use crate::handler::{self, JSON_CONTENT_TYPE};
use crate::pipelines::sentiment_analysis_pipeline::{
    SentimentAnalysisModel, SentimentAnalysisPipeline,
};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub struct AppState<M: SentimentAnalysisModel> {
    pub pipeline: Arc<SentimentAnalysisPipeline<M>>,
}

impl<M: SentimentAnalysisModel> Clone for AppState<M> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// An [`InferenceError`] together with the HTTP status it maps to.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: InferenceError,
}

impl ApiError {
    /// Error raised while reading the request.
    fn request(error: InferenceError) -> Self {
        let status = match &error {
            InferenceError::UnsupportedContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            InferenceError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            InferenceError::Load(_) | InferenceError::Inference(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self { status, error }
    }

    /// Error raised while producing the response.
    fn response(error: InferenceError) -> Self {
        let status = match &error {
            InferenceError::UnsupportedContentType(_) => StatusCode::NOT_ACCEPTABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, error }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, "invocation failed: {}", self.error);
        } else {
            warn!(status = %self.status, "invocation rejected: {}", self.error);
        }
        (
            self.status,
            Json(ErrorResponse {
                error: self.error.to_string(),
            }),
        )
            .into_response()
    }
}

/// Health check. The router only exists once the model has loaded.
pub async fn ping() -> StatusCode {
    StatusCode::OK
}

fn header_value<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// A missing `Accept` header means JSON.
fn accept_type(headers: &HeaderMap) -> &str {
    header_value(headers, header::ACCEPT)
        .map(str::trim)
        .filter(|accept| !accept.is_empty())
        .unwrap_or(JSON_CONTENT_TYPE)
}

pub async fn invocations<M>(
    State(state): State<AppState<M>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError>
where
    M: SentimentAnalysisModel + Send + Sync + 'static,
{
    let content_type = header_value(&headers, header::CONTENT_TYPE).unwrap_or_default();
    let accept = accept_type(&headers).to_string();

    let request = handler::decode_request(&body, content_type).map_err(ApiError::request)?;
    handler::ensure_accepts_json(&accept).map_err(ApiError::response)?;
    debug!(texts = request.len(), "received invocation");

    let pipeline = Arc::clone(&state.pipeline);
    let response = tokio::task::spawn_blocking(move || handler::predict(&request, &*pipeline))
        .await
        .map_err(|e| {
            ApiError::request(InferenceError::inference(format!(
                "prediction task failed: {e}"
            )))
        })?
        .map_err(ApiError::request)?;

    let body = handler::encode_response(&response, &accept).map_err(ApiError::response)?;
    Ok(([(header::CONTENT_TYPE, JSON_CONTENT_TYPE)], body).into_response())
}

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::routing::post;
use axum::Router;
use serde::{Deserialize, Serialize};

use keyproxy_core::errors::ProviderError;
use keyproxy_core::provider::SelectRequest;
use keyproxy_pool::KeyPool;
use keyproxy_queue::{CancelToken, QueueOutcome};

use crate::handoff::UpstreamHandoff;

#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<KeyPool>,
    pub handoff: Arc<dyn UpstreamHandoff>,
    pub allowed_model_families: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub messages: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    message: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: ErrorDetail { message: message.into() } })).into_response()
}

/// Translates the two permanent `ProviderError` conditions spec.md §7 says
/// may cross into the response path; every other variant is an internal
/// bug surfaced as a 500 rather than silently swallowed.
fn provider_error_response(err: ProviderError) -> Response {
    match err {
        ProviderError::NoCredential { .. } => error_response(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        ProviderError::UnknownService { .. } => error_response(StatusCode::BAD_REQUEST, err.to_string()),
        other => error_response(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

/// Minimal axum surface exercising spec.md §6's external interfaces: one
/// endpoint classifying a request, routing it through the Dispatch Queue,
/// and handing the admitted credential to [`UpstreamHandoff`] (SPEC_FULL.md
/// §7) — the boundary where the out-of-scope transform layer would plug in.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn chat_completions(State(state): State<AppState>, Json(req): Json<ChatCompletionRequest>) -> Response {
    let family = keyproxy_providers::generic_family_of(&req.model);

    if !state.allowed_model_families.is_empty() && !state.allowed_model_families.contains(&family) {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("model family {family:?} is not in ALLOWED_MODEL_FAMILIES"),
        );
    }

    let select_req = SelectRequest::new(req.model.clone()).streaming(req.stream);
    let outcome = match state.pool.enqueue(select_req, None, family, CancelToken::new()).await {
        Ok(outcome) => outcome,
        Err(err) => return provider_error_response(err),
    };

    let credential = match outcome {
        QueueOutcome::Admitted(credential) => credential,
        QueueOutcome::NoCredential => {
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "no eligible credential available");
        }
        QueueOutcome::Cancelled => {
            return error_response(StatusCode::REQUEST_TIMEOUT, "request was cancelled before admission");
        }
    };

    let body = serde_json::to_vec(&req.messages).unwrap_or_default();
    match state.handoff.forward(credential, &req.model, &body).await {
        Ok(bytes) => (StatusCode::OK, bytes).into_response(),
        Err(err) => provider_error_response(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_sets_requested_status() {
        let resp = error_response(StatusCode::BAD_REQUEST, "nope");
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn no_credential_maps_to_503() {
        let err = ProviderError::NoCredential {
            service: keyproxy_core::service::Service::Deepseek,
            family: Some("deepseek-chat".to_string()),
        };
        let resp = provider_error_response(err);
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn unknown_service_maps_to_400() {
        let err = ProviderError::UnknownService { model: "mystery-model".to_string() };
        let resp = provider_error_response(err);
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}

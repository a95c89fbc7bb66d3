use super::error::{ApiError, JSON_CONTENT_TYPE};
use super::forward::{copy_response_headers, forward_to_local, relay_response};
use crate::config::{ConfigStore, ProxyConfig};
use crate::llm::routing::strip_local_marker;
use crate::llm::transcode::{pump_sse_to_ndjson, DebugTee, PumpOutcome, SseTranscoder};
use crate::llm::{CatalogAggregator, ChatRequest, ModelRouter, Route, UpstreamClients};
use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub const LIVENESS_MESSAGE: &str = "Ollama is running";
const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Shared handler state. Configuration is read fresh on every request.
#[derive(Clone)]
pub struct AppState {
    pub config: ConfigStore,
    pub catalog: CatalogAggregator,
    pub clients: UpstreamClients,
}

/// GET /
pub async fn root() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        LIVENESS_MESSAGE,
    )
}

/// GET /api/tags
pub async fn list_tags(State(state): State<AppState>) -> Result<Response, ApiError> {
    let config = state.config.snapshot().await;
    let payload = state.catalog.get_catalog(&config.proxy).await?;
    Ok(([(header::CONTENT_TYPE, JSON_CONTENT_TYPE)], payload).into_response())
}

/// POST /api/chat and /v1/chat/completions
pub async fn chat(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let config = state.config.snapshot().await;
    let proxy = &config.proxy;

    if proxy.debug_logging {
        tracing::info!("Chat request from client: {}", String::from_utf8_lossy(&body));
    }

    let mut request = ChatRequest::from_slice(&body)?;

    if proxy.override_parameters {
        tracing::debug!("Applying parameter overrides");
        proxy.parameters.apply_to(&mut request.extra);
    }
    request.prepend_system_prompt(&proxy.system_prompt);

    let requested = strip_local_marker(&request.model).to_string();
    match ModelRouter::new(proxy).route(&request.model)? {
        Route::Local { model } => {
            request.model = model;
            chat_local(&state, proxy, request).await
        }
        Route::Remote { model } => {
            request.model = model;
            chat_remote(&state, proxy, request, requested).await
        }
    }
}

async fn chat_local(
    state: &AppState,
    proxy: &ProxyConfig,
    request: ChatRequest,
) -> Result<Response, ApiError> {
    let base = proxy.local_base();
    let body = request.to_vec()?;
    if proxy.debug_logging {
        tracing::info!(
            "Chat request to {}/api/chat: {}",
            base,
            String::from_utf8_lossy(&body)
        );
    }

    let upstream = state
        .clients
        .local_chat_request(base, body)
        .await
        .map_err(|e| {
            tracing::error!("Failed to forward chat to local backend at {}: {}", base, e);
            ApiError::local_unreachable(base)
        })?;

    let tee = proxy
        .debug_logging
        .then(|| DebugTee::spawn(format!("Local backend ({})", upstream.status())));
    Ok(relay_response(upstream, tee))
}

async fn chat_remote(
    state: &AppState,
    proxy: &ProxyConfig,
    mut request: ChatRequest,
    display_model: String,
) -> Result<Response, ApiError> {
    request.stream = Some(true);
    let body = request.to_vec()?;
    let base = proxy.remote_base();
    if proxy.debug_logging {
        tracing::info!(
            "Chat request to {}/chat/completions: {}",
            base,
            String::from_utf8_lossy(&body)
        );
    }

    let upstream = state
        .clients
        .remote_chat_request(base, proxy.api_key.trim(), body)
        .await
        .map_err(|e| {
            tracing::error!("Failed to reach remote provider at {}: {}", base, e);
            ApiError::BadGateway(format!("Failed to connect to OpenRouter at {}", base))
        })?;

    let status = upstream.status();
    let tee = proxy
        .debug_logging
        .then(|| DebugTee::spawn(format!("Remote provider ({})", status)));

    if !status.is_success() {
        tracing::warn!("Remote provider answered {} for '{}'", status, request.model);
        return Ok(relay_response(upstream, tee));
    }

    let upstream_headers = upstream.headers().clone();
    let (tx, rx) = mpsc::channel(1);
    let transcoder = SseTranscoder::new(display_model);
    tokio::spawn(async move {
        let outcome =
            pump_sse_to_ndjson(upstream.bytes_stream(), &transcoder, &tx, tee.as_ref()).await;
        if outcome != PumpOutcome::Completed {
            tracing::debug!("Stream for '{}' closed: {:?}", transcoder.model(), outcome);
        }
    });

    let mut response = Response::new(Body::from_stream(ReceiverStream::new(rx)));
    *response.status_mut() = status;
    copy_response_headers(&upstream_headers, response.headers_mut());
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(NDJSON_CONTENT_TYPE),
    );
    Ok(response)
}

/// Every other path: reverse-proxied in bypass mode, 404 in proxy mode
pub async fn fallback(State(state): State<AppState>, request: Request) -> Response {
    let config = state.config.snapshot().await;
    if config.proxy.enabled {
        tracing::debug!("No route for {} {}", request.method(), request.uri());
        return ApiError::NotFound("Not Found".to_string()).into_response();
    }

    match forward_to_local(state.clients.local(), config.proxy.local_base(), request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

/// Panic handler for `CatchPanicLayer`
pub fn panic_response(_: Box<dyn std::any::Any + Send + 'static>) -> Response {
    tracing::error!("Request handler panicked");
    ApiError::InternalError("Internal server error".to_string()).into_response()
}

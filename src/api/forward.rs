use super::error::ApiError;
use crate::llm::transcode::{tee_stream, DebugTee};
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, Method};
use axum::response::Response;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Headers that describe one connection or its framing and must not cross
/// the proxy
pub fn is_hop_by_hop_or_framing_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("content-length")
        || name.eq_ignore_ascii_case("transfer-encoding")
        || name.eq_ignore_ascii_case("connection")
        || name.eq_ignore_ascii_case("keep-alive")
        || name.eq_ignore_ascii_case("proxy-authenticate")
        || name.eq_ignore_ascii_case("proxy-authorization")
        || name.eq_ignore_ascii_case("te")
        || name.eq_ignore_ascii_case("trailer")
        || name.eq_ignore_ascii_case("upgrade")
}

/// Inbound headers minus `Host` and hop-by-hop headers
pub fn forwardable_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if name == header::HOST || is_hop_by_hop_or_framing_header(name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

pub fn copy_response_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from {
        if is_hop_by_hop_or_framing_header(name.as_str()) {
            continue;
        }
        to.append(name.clone(), value.clone());
    }
}

/// Stream an upstream response back unchanged: status, headers and body
pub fn relay_response(upstream: reqwest::Response, tee: Option<DebugTee>) -> Response {
    let status = upstream.status();
    let headers = upstream.headers().clone();

    let mut response = Response::new(Body::from_stream(tee_stream(upstream.bytes_stream(), tee)));
    *response.status_mut() = status;
    copy_response_headers(&headers, response.headers_mut());
    response
}

/// Transparent reverse proxy to `{base}{path}?{query}` on the local backend
pub async fn forward_to_local(
    client: &reqwest::Client,
    base: &str,
    request: Request,
) -> Result<Response, ApiError> {
    let (parts, body) = request.into_parts();
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}{}", base, path);
    tracing::debug!("Forwarding {} {}", parts.method, url);

    let mut builder = client
        .request(parts.method.clone(), &url)
        .headers(forwardable_request_headers(&parts.headers));
    if parts.method == Method::POST || parts.method == Method::PUT {
        builder = builder.body(stream_body(body));
    }

    let upstream = builder.send().await.map_err(|e| {
        tracing::error!("Failed to forward request to local backend at {}: {}", base, e);
        ApiError::local_unreachable(base)
    })?;
    Ok(relay_response(upstream, None))
}

// Inbound body as an outbound streaming body, fed through a channel
fn stream_body(body: Body) -> reqwest::Body {
    let (tx, rx) = mpsc::channel::<Result<Bytes, axum::Error>>(8);
    tokio::spawn(async move {
        let mut stream = body.into_data_stream();
        while let Some(chunk) = stream.next().await {
            if tx.send(chunk).await.is_err() {
                break;
            }
        }
    });
    reqwest::Body::wrap_stream(ReceiverStream::new(rx))
}

//! Upstream Proxy
//!
//! Every request outside `/_cache` is treated as an outgoing client call:
//! it is buffered, tagged with the operation its route declares, run
//! through the [`CacheInterceptor`](crate::interceptor::CacheInterceptor)
//! and forwarded to the upstream base URL on a miss.

use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    extract::State,
    http::{header, HeaderMap, Method, Uri},
    response::{IntoResponse, Response},
};
use tracing::debug;

use super::handlers::AppState;
use crate::cache::{RequestBody, MAX_PAYLOAD_SIZE};
use crate::error::{CacheError, Result};
use crate::interceptor::{Forwarder, HttpResponse, OutgoingRequest};

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

// == Reqwest Forwarder ==
/// Sends outgoing requests over the network with `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestForwarder {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestForwarder {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .user_agent(concat!("response_cache/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CacheError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute upstream URL for a gateway request URI.
    pub fn upstream_url(&self, uri: &Uri) -> String {
        let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl Forwarder for ReqwestForwarder {
    type Error = CacheError;

    async fn send(&self, request: OutgoingRequest) -> Result<HttpResponse> {
        let mut headers = request.headers;
        strip_headers(&mut headers);

        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(headers);
        match request.body {
            Some(RequestBody::Bytes(bytes)) => builder = builder.body(bytes),
            Some(RequestBody::Stream { .. }) => {
                return Err(CacheError::InvalidRequest(
                    "streaming request bodies cannot be forwarded".to_string(),
                ))
            }
            None => {}
        }

        let response = builder
            .send()
            .await
            .map_err(|e| CacheError::Upstream(e.to_string()))?;
        let status = response.status();
        let mut headers = response.headers().clone();
        strip_headers(&mut headers);
        let body = response
            .bytes()
            .await
            .map_err(|e| CacheError::Upstream(e.to_string()))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Drops hop-by-hop and length headers, which no longer hold once the
/// body has been buffered.
fn strip_headers(headers: &mut HeaderMap) {
    for name in [
        header::HOST,
        header::CONNECTION,
        header::CONTENT_LENGTH,
        header::TRANSFER_ENCODING,
    ] {
        headers.remove(name);
    }
}

impl IntoResponse for HttpResponse {
    fn into_response(self) -> Response {
        (self.status, self.headers, self.body).into_response()
    }
}

/// Fallback handler forwarding everything outside `/_cache`.
pub async fn proxy_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Result<HttpResponse> {
    let body = body::to_bytes(body, MAX_PAYLOAD_SIZE)
        .await
        .map_err(|e| CacheError::InvalidRequest(format!("request body: {}", e)))?;

    let interceptor = state.manager.interceptor();
    let operation = interceptor
        .policies()
        .match_route(method.as_str(), uri.path())
        .map(str::to_string);

    let mut request = OutgoingRequest::new(method, state.upstream.upstream_url(&uri));
    request.headers = headers;
    if !body.is_empty() {
        request = request.with_body(body);
    }
    if let Some(operation) = operation {
        debug!("{} {} belongs to operation '{}'", request.method, uri.path(), operation);
        request = request.with_operation(operation);
    }

    interceptor.intercept(request, state.upstream.as_ref()).await
}

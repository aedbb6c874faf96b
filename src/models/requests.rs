//! Request DTOs for the admin API
//!
//! Defines the structure of incoming admin request bodies.

use axum::http::Method;
use serde::Deserialize;

use crate::interceptor::OutgoingRequest;

/// Identifies one outgoing call, as used by
/// `POST /_cache/entry/lookup` and `DELETE /_cache/entry`.
///
/// `url` is either absolute or a path relative to the upstream base URL.
#[derive(Debug, Clone, Deserialize)]
pub struct EntryRequest {
    /// HTTP method, case-insensitive
    pub method: String,
    /// Absolute URL or upstream-relative path, including the query string
    pub url: String,
    /// Request body, for methods whose body is part of the key
    #[serde(default)]
    pub body: Option<String>,
}

impl EntryRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.url.is_empty() {
            return Some("URL cannot be empty".to_string());
        }
        if Method::from_bytes(self.method.to_ascii_uppercase().as_bytes()).is_err() {
            return Some(format!("Invalid HTTP method: {}", self.method));
        }
        None
    }

    /// Builds the outgoing request this entry would be cached under.
    pub fn to_outgoing(&self, upstream_base: &str) -> Option<OutgoingRequest> {
        let method = Method::from_bytes(self.method.to_ascii_uppercase().as_bytes()).ok()?;
        let url = if self.url.starts_with('/') {
            format!("{}{}", upstream_base.trim_end_matches('/'), self.url)
        } else {
            self.url.clone()
        };

        let request = OutgoingRequest::new(method, url);
        Some(match &self.body {
            Some(body) => request.with_body(axum::body::Bytes::from(body.clone())),
            None => request,
        })
    }
}

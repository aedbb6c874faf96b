//! Cache key derivation.
//!
//! Keys are the hex SHA-256 of the request identity: upper-cased method,
//! full URL (query string included) and, for methods whose body matters,
//! the SHA-256 of the body.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use axum::body::Bytes;
use sha2::{Digest, Sha256};
use tracing::warn;

/// Opaque, deterministic cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the key was built without hashing the body.
    pub fn is_weak(&self) -> bool {
        self.0.starts_with(WEAK_PREFIX)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

const WEAK_PREFIX: &str = "weak:";

/// Outgoing request body as seen by the cache.
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// Fully buffered bytes
    Bytes(Bytes),
    /// A one-shot stream that cannot be read without consuming it
    Stream { content_length: Option<u64> },
}

impl RequestBody {
    fn is_empty(&self) -> bool {
        match self {
            RequestBody::Bytes(bytes) => bytes.is_empty(),
            RequestBody::Stream { content_length } => *content_length == Some(0),
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        RequestBody::Bytes(bytes)
    }
}

impl From<&'static str> for RequestBody {
    fn from(s: &'static str) -> Self {
        RequestBody::Bytes(Bytes::from_static(s.as_bytes()))
    }
}

/// GET and HEAD are identified by method and URL alone.
fn body_is_identity(method: &str) -> bool {
    !matches!(method, "GET" | "HEAD")
}

/// Derives the cache key for a request.
///
/// Never fails: a body that cannot be read yields a weaker key built from
/// a plain string hash of the method, URL and declared length.
pub fn derive(method: &str, url: &str, body: Option<&RequestBody>) -> CacheKey {
    let method = method.to_ascii_uppercase();
    let body = body.filter(|b| body_is_identity(&method) && !b.is_empty());

    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_bytes());

    match body {
        None => {}
        Some(RequestBody::Bytes(bytes)) => {
            hasher.update(b"\n");
            hasher.update(hex::encode(Sha256::digest(bytes)).as_bytes());
        }
        Some(RequestBody::Stream { content_length }) => {
            warn!(
                "Request body for {} {} is not replayable; using a weak cache key",
                method, url
            );
            return weak_key(&method, url, *content_length);
        }
    }

    CacheKey(hex::encode(hasher.finalize()))
}

fn weak_key(method: &str, url: &str, content_length: Option<u64>) -> CacheKey {
    let mut hasher = DefaultHasher::new();
    method.hash(&mut hasher);
    url.hash(&mut hasher);
    content_length.hash(&mut hasher);
    CacheKey(format!("{}{:016x}", WEAK_PREFIX, hasher.finish()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(s: &'static str) -> RequestBody {
        RequestBody::from(s)
    }

    #[test]
    fn test_key_is_deterministic() {
        let a = derive("GET", "https://api.github.com/users", None);
        let b = derive("GET", "https://api.github.com/users", None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_format() {
        let key = derive("GET", "/users", None);
        assert_eq!(key.as_str().len(), 64);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!key.is_weak());
    }

    #[test]
    fn test_query_string_changes_key() {
        assert_ne!(
            derive("GET", "/users", None),
            derive("GET", "/users?since=5", None)
        );
    }

    #[test]
    fn test_method_changes_key() {
        assert_ne!(derive("GET", "/x", None), derive("DELETE", "/x", None));
    }

    #[test]
    fn test_method_case_is_normalized() {
        assert_eq!(derive("get", "/x", None), derive("GET", "/x", None));
    }

    #[test]
    fn test_body_changes_post_key() {
        let one = derive("POST", "/x", Some(&bytes(r#"{"q":1}"#)));
        let two = derive("POST", "/x", Some(&bytes(r#"{"q":2}"#)));
        assert_ne!(one, two);
        assert_ne!(one, derive("POST", "/x", None));
    }

    #[test]
    fn test_same_body_same_key() {
        let one = derive("PUT", "/x", Some(&bytes("payload")));
        let two = derive("PUT", "/x", Some(&bytes("payload")));
        assert_eq!(one, two);
    }

    #[test]
    fn test_body_ignored_for_get() {
        assert_eq!(
            derive("GET", "/x", Some(&bytes("ignored"))),
            derive("GET", "/x", None)
        );
    }

    #[test]
    fn test_empty_body_is_no_body() {
        assert_eq!(
            derive("POST", "/x", Some(&RequestBody::Bytes(Bytes::new()))),
            derive("POST", "/x", None)
        );
    }

    #[test]
    fn test_unreadable_body_falls_back_to_weak_key() {
        let stream = RequestBody::Stream { content_length: Some(12) };
        let key = derive("POST", "/upload", Some(&stream));

        assert!(key.is_weak());
        assert_eq!(key, derive("POST", "/upload", Some(&stream)));
        assert_ne!(key, derive("POST", "/upload", None));
    }
}

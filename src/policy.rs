//! Cache Policy Module
//!
//! Per-operation cache policies, registered once at startup in an explicit
//! table and read-only afterwards.
//!
//! A policy file looks like:
//!
//! ```json
//! {
//!   "operations": [
//!     { "id": "list_users", "method": "GET", "path": "/users",
//!       "max_age_seconds": 300 },
//!     { "id": "get_user", "method": "GET", "path": "/users/{login}",
//!       "max_age_seconds": 60, "max_size_override": 50 },
//!     { "id": "rate_limit", "method": "GET", "path": "/rate_limit", "cache": false }
//!   ]
//! }
//! ```
//!
//! Operations declared with `"cache": false` are known but never cached.
//! Unknown fields are rejected.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;

use crate::error::{CacheError, Result};

/// Max age applied when a declaration leaves it out
pub const DEFAULT_MAX_AGE_SECONDS: u64 = 300;

/// Declared `max_size_override` meaning "use the global cache size"
pub const USE_GLOBAL_MAX_SIZE: i32 = -1;

// == Cache Policy ==
/// How long responses of one operation stay fresh.
///
/// `max_size_override` is carried for reporting only; all operations share
/// the single global capacity of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub max_age_seconds: u64,
    pub max_size_override: Option<u32>,
}

impl CachePolicy {
    pub fn max_age(seconds: u64) -> Self {
        Self {
            max_age_seconds: seconds,
            max_size_override: None,
        }
    }

    pub fn with_max_size_override(mut self, size: u32) -> Self {
        self.max_size_override = Some(size);
        self
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::max_age(DEFAULT_MAX_AGE_SECONDS)
    }
}

// == Policy Declaration ==
/// Wire form of a policy as written in a policy file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyDeclaration {
    #[serde(default = "default_max_age")]
    pub max_age_seconds: u64,
    #[serde(default = "default_max_size_override")]
    pub max_size_override: i32,
}

fn default_max_age() -> u64 {
    DEFAULT_MAX_AGE_SECONDS
}

fn default_max_size_override() -> i32 {
    USE_GLOBAL_MAX_SIZE
}

impl TryFrom<PolicyDeclaration> for CachePolicy {
    type Error = CacheError;

    fn try_from(decl: PolicyDeclaration) -> Result<Self> {
        let max_size_override = match decl.max_size_override {
            USE_GLOBAL_MAX_SIZE => None,
            n if n > 0 => Some(n as u32),
            n => {
                return Err(CacheError::InvalidConfig(format!(
                    "max_size_override must be positive or {}, got {}",
                    USE_GLOBAL_MAX_SIZE, n
                )))
            }
        };
        Ok(Self {
            max_age_seconds: decl.max_age_seconds,
            max_size_override,
        })
    }
}

// == Operation Route ==
/// Maps a method and path template onto an operation id.
#[derive(Debug, Clone)]
pub struct OperationRoute {
    method: String,
    segments: Vec<String>,
    operation: String,
}

impl OperationRoute {
    pub fn new(method: &str, template: &str, operation: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            segments: split_path(template).map(str::to_string).collect(),
            operation: operation.to_string(),
        }
    }

    /// `{name}` template segments match any single path segment.
    pub fn matches(&self, method: &str, path: &str) -> bool {
        if !self.method.eq_ignore_ascii_case(method) {
            return false;
        }
        let mut segments = split_path(path);
        for expected in &self.segments {
            match segments.next() {
                Some(actual) if is_placeholder(expected) || expected == actual => {}
                _ => return false,
            }
        }
        segments.next().is_none()
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn is_placeholder(segment: &str) -> bool {
    segment.len() > 2 && segment.starts_with('{') && segment.ends_with('}')
}

// == Policy File ==
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PolicyFile {
    operations: Vec<OperationDeclaration>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct OperationDeclaration {
    id: String,
    method: String,
    path: String,
    #[serde(default = "default_cache")]
    cache: bool,
    #[serde(default = "default_max_age")]
    max_age_seconds: u64,
    #[serde(default = "default_max_size_override")]
    max_size_override: i32,
}

fn default_cache() -> bool {
    true
}

impl OperationDeclaration {
    /// Policy declared for this operation, None when caching is off.
    fn policy(&self) -> Result<Option<CachePolicy>> {
        if !self.cache {
            return Ok(None);
        }
        let decl = PolicyDeclaration {
            max_age_seconds: self.max_age_seconds,
            max_size_override: self.max_size_override,
        };
        CachePolicy::try_from(decl).map(Some).map_err(|e| match e {
            CacheError::InvalidConfig(msg) => {
                CacheError::InvalidConfig(format!("operation '{}': {}", self.id, msg))
            }
            other => other,
        })
    }
}

// == Policy Registry ==
/// Immutable operation id → policy table.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    policies: HashMap<String, CachePolicy>,
    routes: Vec<OperationRoute>,
}

impl PolicyRegistry {
    pub fn builder() -> PolicyRegistryBuilder {
        PolicyRegistryBuilder::default()
    }

    /// A registry with no policies; every request passes through.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parses a JSON policy file body.
    pub fn from_json(raw: &str) -> Result<Self> {
        let file: PolicyFile = serde_json::from_str(raw)
            .map_err(|e| CacheError::InvalidConfig(format!("policy file: {}", e)))?;

        let mut builder = Self::builder();
        for op in file.operations {
            builder = builder.route(&op.method, &op.path, &op.id);
            if let Some(policy) = op.policy()? {
                builder = builder.register(&op.id, policy);
            }
        }
        builder.build()
    }

    /// Reads and parses a JSON policy file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CacheError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    // == Resolve ==
    /// Policy for `operation`, or None when it must not be cached.
    pub fn resolve(&self, operation: &str) -> Option<CachePolicy> {
        self.policies.get(operation).copied()
    }

    /// Operation id of the first route matching `method` and `path`.
    pub fn match_route(&self, method: &str, path: &str) -> Option<&str> {
        self.routes
            .iter()
            .find(|route| route.matches(method, path))
            .map(OperationRoute::operation)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Registered operations with their policies, sorted by id.
    pub fn operations(&self) -> Vec<(&str, CachePolicy)> {
        let mut ops: Vec<(&str, CachePolicy)> = self
            .policies
            .iter()
            .map(|(id, policy)| (id.as_str(), *policy))
            .collect();
        ops.sort_by(|a, b| a.0.cmp(b.0));
        ops
    }
}

// == Registry Builder ==
#[derive(Debug, Default)]
pub struct PolicyRegistryBuilder {
    policies: Vec<(String, CachePolicy)>,
    routes: Vec<OperationRoute>,
}

impl PolicyRegistryBuilder {
    /// Attaches `policy` to `operation`.
    pub fn register(mut self, operation: &str, policy: CachePolicy) -> Self {
        self.policies.push((operation.to_string(), policy));
        self
    }

    /// Declares that requests matching `method` + `template` belong to `operation`.
    pub fn route(mut self, method: &str, template: &str, operation: &str) -> Self {
        self.routes
            .push(OperationRoute::new(method, template, operation));
        self
    }

    /// Fails on an empty or duplicate operation id.
    pub fn build(self) -> Result<PolicyRegistry> {
        let mut seen = HashSet::new();
        let mut policies = HashMap::with_capacity(self.policies.len());
        for (operation, policy) in self.policies {
            if operation.is_empty() {
                return Err(CacheError::InvalidConfig(
                    "operation id cannot be empty".to_string(),
                ));
            }
            if !seen.insert(operation.clone()) {
                return Err(CacheError::InvalidConfig(format!(
                    "operation '{}' registered twice",
                    operation
                )));
            }
            policies.insert(operation, policy);
        }

        Ok(PolicyRegistry {
            policies,
            routes: self.routes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_registered_operation() {
        let registry = PolicyRegistry::builder()
            .register("list_users", CachePolicy::max_age(300))
            .register("get_user", CachePolicy::max_age(60).with_max_size_override(10))
            .build()
            .unwrap();

        assert_eq!(registry.resolve("list_users"), Some(CachePolicy::max_age(300)));
        assert_eq!(
            registry.resolve("get_user").unwrap().max_size_override,
            Some(10)
        );
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_resolve_unknown_is_none() {
        let registry = PolicyRegistry::empty();
        assert!(registry.is_empty());
        assert_eq!(registry.resolve("anything"), None);
    }

    #[test]
    fn test_duplicate_operation_rejected() {
        let result = PolicyRegistry::builder()
            .register("a", CachePolicy::default())
            .register("a", CachePolicy::max_age(1))
            .build();
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }

    #[test]
    fn test_default_policy() {
        let policy = CachePolicy::default();
        assert_eq!(policy.max_age_seconds, 300);
        assert_eq!(policy.max_size_override, None);
    }

    #[test]
    fn test_declaration_defaults() {
        let decl: PolicyDeclaration = serde_json::from_str("{}").unwrap();
        let policy = CachePolicy::try_from(decl).unwrap();
        assert_eq!(policy, CachePolicy::default());
    }

    #[test]
    fn test_declaration_invalid_override() {
        for bad in [0, -2] {
            let decl = PolicyDeclaration {
                max_age_seconds: 10,
                max_size_override: bad,
            };
            assert!(CachePolicy::try_from(decl).is_err());
        }
    }

    #[test]
    fn test_route_matching() {
        let route = OperationRoute::new("get", "/users/{login}/repos", "list_repos");

        assert!(route.matches("GET", "/users/octocat/repos"));
        assert!(route.matches("GET", "/users/octocat/repos/"));
        assert!(!route.matches("POST", "/users/octocat/repos"));
        assert!(!route.matches("GET", "/users/octocat"));
        assert!(!route.matches("GET", "/users/octocat/repos/extra"));
        assert!(!route.matches("GET", "/orgs/octocat/repos"));
    }

    #[test]
    fn test_from_json() {
        let raw = r#"{
            "operations": [
                { "id": "list_users", "method": "GET", "path": "/users",
                  "max_age_seconds": 120 },
                { "id": "get_user", "method": "GET", "path": "/users/{login}" },
                { "id": "rate_limit", "method": "GET", "path": "/rate_limit", "cache": false }
            ]
        }"#;

        let registry = PolicyRegistry::from_json(raw).unwrap();

        assert_eq!(registry.match_route("GET", "/users"), Some("list_users"));
        assert_eq!(registry.match_route("GET", "/users/octocat"), Some("get_user"));
        assert_eq!(registry.match_route("GET", "/rate_limit"), Some("rate_limit"));
        assert_eq!(registry.match_route("GET", "/emojis"), None);
        assert_eq!(registry.resolve("list_users"), Some(CachePolicy::max_age(120)));
        assert_eq!(registry.resolve("get_user"), Some(CachePolicy::default()));
        assert_eq!(registry.resolve("rate_limit"), None);
        assert_eq!(
            registry.operations().iter().map(|(id, _)| *id).collect::<Vec<_>>(),
            vec!["get_user", "list_users"]
        );
    }

    #[test]
    fn test_from_json_size_override() {
        let raw = r#"{"operations": [
            { "id": "get_user", "method": "GET", "path": "/users/{login}",
              "max_age_seconds": 60, "max_size_override": 50 }
        ]}"#;

        let registry = PolicyRegistry::from_json(raw).unwrap();
        assert_eq!(
            registry.resolve("get_user"),
            Some(CachePolicy::max_age(60).with_max_size_override(50))
        );

        let bad = raw.replace("50", "0");
        assert!(matches!(
            PolicyRegistry::from_json(&bad),
            Err(CacheError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_from_json_rejects_unknown_fields() {
        let nested = r#"{"operations": [
            { "id": "list_users", "method": "GET", "path": "/users",
              "policy": { "max_age_seconds": 120 } }
        ]}"#;
        let typo = r#"{"operations": [
            { "id": "list_users", "method": "GET", "path": "/users", "max_age": 120 }
        ]}"#;

        for raw in [nested, typo] {
            let result = PolicyRegistry::from_json(raw);
            assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_from_json_malformed() {
        let result = PolicyRegistry::from_json("{ not json");
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }
}

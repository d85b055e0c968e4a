//! # Core Data Model
//!
//! Chain identifiers, sessions, permission shapes, and the per-request
//! routing context shared between the middleware pipeline and the method
//! handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// An opaque identifier for one backend wallet endpoint, typically in
/// `namespace:network` form (e.g. `eip155:1`). Used as a map key everywhere.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct ChainId(String);

impl ChainId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChainId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ChainId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The *requested* permission shape used at connect/update time: a map from
/// chain id to the list of method names the caller wants to invoke.
pub type ChainPermissions = BTreeMap<ChainId, Vec<String>>;

/// How a single method grant is resolved when a call arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantPolicy {
    /// Calls proceed without interaction.
    Allow,
    /// The permission manager prompts before each call.
    Ask,
    /// Calls are rejected.
    Deny,
}

/// One approved method grant with a human-readable description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodGrant {
    pub policy: GrantPolicy,
    pub description: String,
}

/// The *approved* permission shape returned by a permission manager:
/// per-method grant records rather than a flat string list.
pub type HumanReadablePermissions = BTreeMap<ChainId, BTreeMap<String, MethodGrant>>;

/// A single named remote invocation with method-specific parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// An authenticated, revocable binding between a requesting origin and a set
/// of requested permissions. Identity is `(origin, id)`; the store key
/// concatenates both so a session can never be reused across origins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub origin: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<ChainPermissions>,
}

/// Builds the store key for a session: `"<origin>_<sessionId>"`.
pub fn session_key(origin: &str, session_id: &str) -> String {
    format!("{origin}_{session_id}")
}

/// Per-request transient state carried through the middleware pipeline.
///
/// `origin` is bound by the transport-context interceptor; `session` is
/// populated if and only if the session interceptor succeeded. The context
/// lives for the duration of one request and is never persisted.
#[derive(Debug, Clone, Default)]
pub struct RouterContext {
    pub origin: Option<String>,
    pub session: Option<Session>,
}

/// Sanitizes a raw permission request into a [`ChainPermissions`] map.
///
/// Non-object input, non-array method lists, and blank method names are
/// dropped; chains left with zero valid methods are dropped entirely. A fully
/// invalid input yields an empty map rather than an error, so callers fail
/// uniformly at the "no chains specified" check instead of a
/// deserialization error.
pub fn sanitize_permissions(raw: &Value) -> ChainPermissions {
    let mut sanitized = ChainPermissions::new();
    let Some(requested) = raw.as_object() else {
        return sanitized;
    };
    for (chain, methods) in requested {
        if chain.trim().is_empty() {
            continue;
        }
        let Some(list) = methods.as_array() else {
            continue;
        };
        let methods: Vec<String> = list
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect();
        if methods.is_empty() {
            continue;
        }
        sanitized.insert(ChainId::new(chain.clone()), methods);
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitize_drops_invalid_shapes() {
        assert!(sanitize_permissions(&json!(null)).is_empty());
        assert!(sanitize_permissions(&json!("not an object")).is_empty());
        assert!(sanitize_permissions(&json!([["x:1", ["m"]]])).is_empty());
        assert!(sanitize_permissions(&json!({"x:1": "not an array"})).is_empty());
        assert!(sanitize_permissions(&json!({"x:1": []})).is_empty());
        assert!(sanitize_permissions(&json!({"x:1": ["", "  "]})).is_empty());
        assert!(sanitize_permissions(&json!({" ": ["m"]})).is_empty());
    }

    #[test]
    fn sanitize_keeps_valid_chains_and_trims_methods() {
        let sanitized = sanitize_permissions(&json!({
            "x:1": ["echo", " sign ", "", 42],
            "x:2": [],
            "x:3": ["transfer"],
        }));
        assert_eq!(sanitized.len(), 2);
        assert_eq!(
            sanitized[&ChainId::new("x:1")],
            vec!["echo".to_string(), "sign".to_string()]
        );
        assert_eq!(sanitized[&ChainId::new("x:3")], vec!["transfer".to_string()]);
    }

    #[test]
    fn session_key_concatenates_origin_and_id() {
        assert_eq!(session_key("https://app.test", "abc"), "https://app.test_abc");
    }
}

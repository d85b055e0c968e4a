//! # Router Error Taxonomy
//!
//! A closed set of named router errors, each with a stable numeric code and
//! optional structured data. Every component of the router reports failures
//! through [`RouterError`]; the wire representation is [`RpcErrorPayload`].

use crate::types::ChainId;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Stable numeric codes for every router error, in a private range adjacent
/// to the JSON-RPC reserved space.
pub mod codes {
    pub const UNKNOWN_CHAIN: i64 = -32010;
    pub const INVALID_SESSION: i64 = -32011;
    pub const INSUFFICIENT_PERMISSIONS: i64 = -32012;
    pub const METHOD_NOT_SUPPORTED: i64 = -32013;
    pub const WALLET_NOT_AVAILABLE: i64 = -32014;
    pub const PARTIAL_FAILURE: i64 = -32015;
    pub const INVALID_REQUEST: i64 = -32016;
    pub const WALLET_ERROR: i64 = -32017;
    pub const DUPLICATE_REQUEST_ID: i64 = -32018;
    pub const UNKNOWN_ERROR: i64 = -32019;
}

/// The wire shape of a router error: code, message, and optional data.
///
/// This is what travels inside the `error` field of an RPC response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorPayload {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// The closed router error taxonomy.
///
/// Middleware interceptors raise these to abort a request before it reaches a
/// method handler; call proxying normalizes every transport-level failure into
/// exactly one of `WalletError` / `WalletNotAvailable`; bulk execution adds
/// `PartialFailure` when progress was made before the first failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RouterError {
    /// The chain id is not registered with the router.
    #[error("Unknown chain: {0}")]
    UnknownChain(ChainId),

    /// The session id is missing, expired, or cannot be resolved.
    #[error("Invalid or expired session")]
    InvalidSession,

    /// The permission callback denied the request or failed.
    #[error("Insufficient permissions for the requested method")]
    InsufficientPermissions,

    /// Reserved for per-chain capability gating.
    #[error("Method not supported: {0}")]
    MethodNotSupported(String),

    /// A transport-level failure or a malformed wallet response.
    #[error("Wallet not available")]
    WalletNotAvailable,

    /// A bulk call failed after at least one sub-call succeeded. Carries the
    /// results accumulated before the failure, in call order.
    #[error("Bulk call failed after {} successful calls", partial_responses.len())]
    PartialFailure {
        partial_responses: Vec<Value>,
        error: RpcErrorPayload,
    },

    /// Malformed top-level parameters (missing origin, no chains specified,
    /// duplicate chain registration).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The wallet returned a structured application-level error.
    #[error("Wallet returned an error: {message}")]
    WalletError {
        message: String,
        data: Option<Value>,
    },

    /// Reserved for concurrent-approval collision guarding.
    #[error("Duplicate request id")]
    DuplicateRequestId,

    /// Catch-all for failures outside the taxonomy.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl RouterError {
    /// The stable numeric code for this error.
    pub fn code(&self) -> i64 {
        match self {
            RouterError::UnknownChain(_) => codes::UNKNOWN_CHAIN,
            RouterError::InvalidSession => codes::INVALID_SESSION,
            RouterError::InsufficientPermissions => codes::INSUFFICIENT_PERMISSIONS,
            RouterError::MethodNotSupported(_) => codes::METHOD_NOT_SUPPORTED,
            RouterError::WalletNotAvailable => codes::WALLET_NOT_AVAILABLE,
            RouterError::PartialFailure { .. } => codes::PARTIAL_FAILURE,
            RouterError::InvalidRequest(_) => codes::INVALID_REQUEST,
            RouterError::WalletError { .. } => codes::WALLET_ERROR,
            RouterError::DuplicateRequestId => codes::DUPLICATE_REQUEST_ID,
            RouterError::Unknown(_) => codes::UNKNOWN_ERROR,
        }
    }

    /// Structured data associated with this error, if any.
    pub fn data(&self) -> Option<Value> {
        match self {
            RouterError::UnknownChain(chain_id) => Some(json!({ "chainId": chain_id })),
            RouterError::MethodNotSupported(method) => Some(json!({ "method": method })),
            RouterError::PartialFailure {
                partial_responses,
                error,
            } => Some(json!({
                "partialResponses": partial_responses,
                "error": error,
            })),
            RouterError::InvalidRequest(reason) => Some(json!({ "reason": reason })),
            RouterError::WalletError { data, .. } => data.clone(),
            RouterError::Unknown(reason) => Some(json!({ "reason": reason })),
            _ => None,
        }
    }

    /// Converts this error into its wire payload.
    pub fn to_payload(&self) -> RpcErrorPayload {
        let message = match self {
            // The wallet's own message crosses the wire unchanged so that it
            // round-trips through `from_payload`.
            RouterError::WalletError { message, .. } => message.clone(),
            other => other.to_string(),
        };
        RpcErrorPayload {
            code: self.code(),
            message,
            data: self.data(),
        }
    }

    /// Reconstructs a typed error from a wire payload.
    ///
    /// Payloads with a code outside the taxonomy map to [`RouterError::Unknown`].
    pub fn from_payload(payload: &RpcErrorPayload) -> Self {
        match payload.code {
            codes::UNKNOWN_CHAIN => {
                let chain = payload
                    .data
                    .as_ref()
                    .and_then(|d| d.get("chainId"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                RouterError::UnknownChain(ChainId::new(chain))
            }
            codes::INVALID_SESSION => RouterError::InvalidSession,
            codes::INSUFFICIENT_PERMISSIONS => RouterError::InsufficientPermissions,
            codes::METHOD_NOT_SUPPORTED => {
                let method = payload
                    .data
                    .as_ref()
                    .and_then(|d| d.get("method"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                RouterError::MethodNotSupported(method.to_string())
            }
            codes::WALLET_NOT_AVAILABLE => RouterError::WalletNotAvailable,
            codes::PARTIAL_FAILURE => {
                let partial_responses = payload
                    .data
                    .as_ref()
                    .and_then(|d| d.get("partialResponses"))
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let error = payload
                    .data
                    .as_ref()
                    .and_then(|d| d.get("error"))
                    .and_then(|e| serde_json::from_value(e.clone()).ok())
                    .unwrap_or_else(|| RpcErrorPayload {
                        code: codes::UNKNOWN_ERROR,
                        message: payload.message.clone(),
                        data: None,
                    });
                RouterError::PartialFailure {
                    partial_responses,
                    error,
                }
            }
            codes::INVALID_REQUEST => {
                let reason = payload
                    .data
                    .as_ref()
                    .and_then(|d| d.get("reason"))
                    .and_then(Value::as_str)
                    .unwrap_or(&payload.message);
                RouterError::InvalidRequest(reason.to_string())
            }
            codes::WALLET_ERROR => RouterError::WalletError {
                message: payload.message.clone(),
                data: payload.data.clone(),
            },
            codes::DUPLICATE_REQUEST_ID => RouterError::DuplicateRequestId,
            _ => RouterError::Unknown(payload.message.clone()),
        }
    }
}

impl From<RpcErrorPayload> for RouterError {
    fn from(payload: RpcErrorPayload) -> Self {
        RouterError::from_payload(&payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_has_a_distinct_code() {
        let variants = [
            RouterError::UnknownChain(ChainId::new("x:1")),
            RouterError::InvalidSession,
            RouterError::InsufficientPermissions,
            RouterError::MethodNotSupported("eth_sign".into()),
            RouterError::WalletNotAvailable,
            RouterError::PartialFailure {
                partial_responses: vec![],
                error: RpcErrorPayload {
                    code: codes::WALLET_ERROR,
                    message: "boom".into(),
                    data: None,
                },
            },
            RouterError::InvalidRequest("No chains specified".into()),
            RouterError::WalletError {
                message: "denied".into(),
                data: None,
            },
            RouterError::DuplicateRequestId,
            RouterError::Unknown("???".into()),
        ];
        let mut codes: Vec<i64> = variants.iter().map(RouterError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), variants.len());
    }

    #[test]
    fn partial_failure_round_trips_through_payload() {
        let err = RouterError::PartialFailure {
            partial_responses: vec![json!("a"), json!({"ok": true})],
            error: RpcErrorPayload {
                code: codes::WALLET_ERROR,
                message: "third call failed".into(),
                data: None,
            },
        };
        let payload = err.to_payload();
        assert_eq!(payload.code, codes::PARTIAL_FAILURE);
        assert_eq!(RouterError::from_payload(&payload), err);
    }

    #[test]
    fn wallet_error_round_trips_message_and_data() {
        let err = RouterError::WalletError {
            message: "user rejected".into(),
            data: Some(json!({"stage": "signing"})),
        };
        let payload = err.to_payload();
        assert_eq!(payload.message, "user rejected");
        assert_eq!(RouterError::from_payload(&payload), err);
    }

    #[test]
    fn unrecognized_code_becomes_unknown() {
        let payload = RpcErrorPayload {
            code: -1,
            message: "who knows".into(),
            data: None,
        };
        assert_eq!(
            RouterError::from_payload(&payload),
            RouterError::Unknown("who knows".into())
        );
    }
}

//! # Router Events
//!
//! Everything the router announces to whoever is listening: wallet
//! availability changes, session terminations, and notifications raised by
//! wallet transports (forwarded under their original method name with the
//! chain id attached).
//!
//! Events reach two audiences the same way the rest of this workspace moves
//! data: in-process subscribers through a broadcast channel, and the served
//! application as notification envelopes over its transport.

use crate::transport::RpcNotification;
use crate::types::ChainId;
use serde_json::{json, Value};

/// Wire method name of the availability notification.
pub const WALLET_AVAILABILITY_CHANGED: &str = "wm_walletAvailabilityChanged";
/// Wire method name of the session termination notification.
pub const SESSION_TERMINATED: &str = "wm_sessionTerminated";

/// A notification emitted by the router.
#[derive(Debug, Clone, PartialEq)]
pub enum RouterEvent {
    /// A wallet endpoint was added to or removed from the registry.
    WalletAvailabilityChanged { chain_id: ChainId, available: bool },
    /// A session ended, either by caller disconnect or wallet-side
    /// revocation.
    SessionTerminated { session_id: String, reason: String },
    /// A wallet transport raised a notification; it is passed through under
    /// its original method name.
    WalletNotification {
        chain_id: ChainId,
        method: String,
        params: Option<Value>,
    },
}

impl RouterEvent {
    /// The wire method name this event is forwarded under.
    pub fn method(&self) -> &str {
        match self {
            RouterEvent::WalletAvailabilityChanged { .. } => WALLET_AVAILABILITY_CHANGED,
            RouterEvent::SessionTerminated { .. } => SESSION_TERMINATED,
            RouterEvent::WalletNotification { method, .. } => method,
        }
    }

    /// The notification envelope this event is forwarded as.
    pub fn to_notification(&self) -> RpcNotification {
        let params = match self {
            RouterEvent::WalletAvailabilityChanged {
                chain_id,
                available,
            } => json!({ "chainId": chain_id, "available": available }),
            RouterEvent::SessionTerminated { session_id, reason } => {
                json!({ "sessionId": session_id, "reason": reason })
            }
            RouterEvent::WalletNotification {
                chain_id, params, ..
            } => json!({ "chainId": chain_id, "payload": params }),
        };
        RpcNotification {
            method: self.method().to_string(),
            params: Some(params),
        }
    }
}

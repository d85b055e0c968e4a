//! # Abstract Transport Layer
//!
//! The router never talks to a socket or a browser port directly. Everything
//! crosses an abstract bidirectional [`Transport`]: the served application
//! connection on one side, each registered wallet endpoint on the other.
//!
//! ## Core Components
//!
//! - [`Message`]: the JSON-RPC style envelope (request / response /
//!   notification) carried over every transport.
//! - [`Transport`]: `send` plus handler registration; implementations decide
//!   how bytes actually move.
//! - [`TransportClient`]: the caller side of a transport. It matches
//!   responses to requests by correlation id, applies per-call timeouts, and
//!   re-broadcasts unsolicited notifications.
//! - [`local`]: an in-process transport pair used to wire a router directly
//!   to a wallet implementation (or a provider) without real I/O.

pub mod local;

use crate::error::{RouterError, RpcErrorPayload};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};

/// A request envelope. `origin` is side-channel context stamped by
/// in-process transports that know who the caller is; it never appears on
/// the wire when unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// A response envelope carrying either a `result` or an `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorPayload>,
}

impl RpcResponse {
    pub fn result(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: u64, error: RpcErrorPayload) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// A fire-and-forget notification envelope (no correlation id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcNotification {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Any envelope that can cross a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Request(RpcRequest),
    Response(RpcResponse),
    Notification(RpcNotification),
}

/// An async callback invoked for every message arriving on a transport.
pub type MessageHandler =
    Arc<dyn Fn(Message) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// An abstract bidirectional message transport.
///
/// Implementations must deliver messages asynchronously (never re-enter the
/// caller synchronously) and must tolerate `on_message` being called before
/// the first message arrives.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Delivers one envelope to the remote peer.
    async fn send(&self, message: Message) -> anyhow::Result<()>;

    /// Registers the handler invoked for every inbound envelope. Registering
    /// again replaces the previous handler.
    fn on_message(&self, handler: MessageHandler);

    /// The transport's notion of the caller's origin, if it has one.
    fn origin(&self) -> Option<String> {
        None
    }

    /// Shuts the transport down. Messages sent after close are rejected.
    async fn close(&self) -> anyhow::Result<()>;
}

/// The requesting side of a transport: correlation-id matching, per-call
/// timeouts, and a broadcast of unsolicited notifications.
///
/// Both the router's per-chain wallet proxies and the client-side provider
/// are built on top of this.
pub struct TransportClient {
    transport: Arc<dyn Transport>,
    pending: Arc<DashMap<u64, oneshot::Sender<RpcResponse>>>,
    next_id: AtomicU64,
    notifications: broadcast::Sender<RpcNotification>,
    default_timeout: Duration,
}

impl TransportClient {
    /// Wraps a transport and starts routing its inbound messages.
    pub fn new(
        transport: Arc<dyn Transport>,
        default_timeout: Duration,
        notification_buffer: usize,
    ) -> Self {
        let pending: Arc<DashMap<u64, oneshot::Sender<RpcResponse>>> = Arc::new(DashMap::new());
        let (notifications, _) = broadcast::channel(notification_buffer);

        let pending_for_handler = pending.clone();
        let notifications_for_handler = notifications.clone();
        transport.on_message(Arc::new(move |message| {
            let pending = pending_for_handler.clone();
            let notifications = notifications_for_handler.clone();
            Box::pin(async move {
                match message {
                    Message::Response(response) => {
                        if let Some((_, waiter)) = pending.remove(&response.id) {
                            let _ = waiter.send(response);
                        } else {
                            // A late response to a timed-out call; the caller
                            // has already given up.
                            tracing::debug!(
                                "Dropping response with no pending request (id {})",
                                response.id
                            );
                        }
                    }
                    Message::Notification(notification) => {
                        let _ = notifications.send(notification);
                    }
                    Message::Request(request) => {
                        tracing::warn!(
                            "Unexpected inbound request '{}' on a client transport",
                            request.method
                        );
                    }
                }
                Ok(())
            })
        }));

        Self {
            transport,
            pending,
            next_id: AtomicU64::new(1),
            notifications,
            default_timeout,
        }
    }

    /// Issues a fresh correlation id.
    pub fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Sends one request and waits for the matching response.
    ///
    /// A send failure or an expired timeout yields
    /// [`RouterError::WalletNotAvailable`]; on timeout the pending entry is
    /// removed so a late response is simply dropped.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        origin: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<RpcResponse, RouterError> {
        let id = self.next_request_id();
        let (waiter_tx, waiter_rx) = oneshot::channel();
        self.pending.insert(id, waiter_tx);

        let request = RpcRequest {
            id,
            method: method.to_string(),
            params,
            origin,
        };
        if let Err(e) = self.transport.send(Message::Request(request)).await {
            self.pending.remove(&id);
            tracing::warn!("Transport send failed for '{}': {:#}", method, e);
            return Err(RouterError::WalletNotAvailable);
        }

        let wait = timeout.unwrap_or(self.default_timeout);
        match tokio::time::timeout(wait, waiter_rx).await {
            Ok(Ok(response)) => Ok(response),
            // The transport was closed while we waited.
            Ok(Err(_)) => Err(RouterError::WalletNotAvailable),
            Err(_) => {
                self.pending.remove(&id);
                tracing::warn!("Call '{}' timed out after {:?}", method, wait);
                Err(RouterError::WalletNotAvailable)
            }
        }
    }

    /// Sends a notification without waiting for any response.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> anyhow::Result<()> {
        self.transport
            .send(Message::Notification(RpcNotification {
                method: method.to_string(),
                params,
            }))
            .await
    }

    /// Subscribes to unsolicited notifications arriving on this transport.
    pub fn subscribe(&self) -> broadcast::Receiver<RpcNotification> {
        self.notifications.subscribe()
    }

    /// Closes the underlying transport and drops all pending waiters.
    pub async fn close(&self) -> anyhow::Result<()> {
        let result = self.transport.close().await;
        self.pending.clear();
        result
    }
}

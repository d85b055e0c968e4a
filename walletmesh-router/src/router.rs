//! # Router
//!
//! The orchestrator. A [`Router`] owns the wallet registry, the session
//! store, the permission manager, and the middleware pipeline; it registers
//! the protocol's method surface, serves one logical application connection,
//! and forwards wallet-bound calls through per-chain proxies.
//!
//! ## Session state machine
//!
//! Per session id: absent → active via `wm_connect`; active → active via
//! `wm_reconnect` (a stale id is a soft `status: false`, not an error);
//! active → absent via `wm_disconnect` or wallet-initiated revocation.

use crate::config::RouterConfig;
use crate::error::RouterError;
use crate::events::RouterEvent;
use crate::middleware::{
    compose, extract_session_id, resolve_session, BoxedHandler, HandlerResult, Middleware,
    PermissionMiddleware, SessionMiddleware, TransportContextMiddleware,
};
use crate::permissions::PermissionManager;
use crate::registry::WalletRegistry;
use crate::session::SessionStore;
use crate::transport::{Message, RpcRequest, RpcResponse, Transport};
use crate::types::{
    sanitize_permissions, session_key, ChainId, MethodCall, RouterContext, Session,
};
use chrono::Utc;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// The router's protocol method surface.
pub mod methods {
    pub const CONNECT: &str = "wm_connect";
    pub const RECONNECT: &str = "wm_reconnect";
    pub const DISCONNECT: &str = "wm_disconnect";
    pub const GET_PERMISSIONS: &str = "wm_getPermissions";
    pub const UPDATE_PERMISSIONS: &str = "wm_updatePermissions";
    pub const CALL: &str = "wm_call";
    pub const BULK_CALL: &str = "wm_bulkCall";
    pub const GET_SUPPORTED_METHODS: &str = "wm_getSupportedMethods";

    pub const ALL: [&str; 8] = [
        CONNECT,
        RECONNECT,
        DISCONNECT,
        GET_PERMISSIONS,
        UPDATE_PERMISSIONS,
        CALL,
        BULK_CALL,
        GET_SUPPORTED_METHODS,
    ];

    /// Reserved capability-discovery key for the router's own surface, as
    /// opposed to any wallet's.
    pub const ROUTER_KEY: &str = "router";
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallParams {
    chain_id: ChainId,
    call: MethodCall,
    /// Per-call wallet timeout in milliseconds; the configured default
    /// applies when absent.
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkCallParams {
    chain_id: ChainId,
    calls: Vec<MethodCall>,
    /// Per-sub-call wallet timeout in milliseconds.
    timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ChainFilterParams {
    chain_ids: Option<Vec<ChainId>>,
}

fn parse_params<T: DeserializeOwned>(request: &RpcRequest) -> Result<T, RouterError> {
    let raw = request.params.clone().unwrap_or_else(|| json!({}));
    serde_json::from_value(raw)
        .map_err(|e| RouterError::InvalidRequest(format!("Malformed parameters: {e}")))
}

fn internal(e: anyhow::Error) -> RouterError {
    tracing::error!("Internal router failure: {:#}", e);
    RouterError::Unknown(e.to_string())
}

fn generate_session_id() -> String {
    use rand::distributions::Alphanumeric;
    use rand::Rng;
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Routes remote-procedure calls from one application connection to the
/// registered wallet endpoints, gated by sessions and permissions.
///
/// Collaborators are injected: the session store and the permission manager
/// are constructed by the application and passed in, never process-wide
/// defaults.
pub struct Router {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    registry: WalletRegistry,
    sessions: Arc<dyn SessionStore>,
    permissions: Arc<dyn PermissionManager>,
    events: broadcast::Sender<RouterEvent>,
}

impl Router {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        permissions: Arc<dyn PermissionManager>,
        config: RouterConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.channels.event_buffer);
        let config = Arc::new(config);
        let registry = WalletRegistry::new(events.clone(), config);
        Self {
            inner: Arc::new(RouterInner {
                registry,
                sessions,
                permissions,
                events,
            }),
        }
    }

    /// Subscribes to router events (availability changes, session
    /// terminations, forwarded wallet notifications).
    pub fn subscribe(&self) -> broadcast::Receiver<RouterEvent> {
        self.inner.events.subscribe()
    }

    /// Registers a wallet endpoint for a chain. Rejects duplicates.
    pub fn add_wallet(
        &self,
        chain_id: ChainId,
        transport: Arc<dyn Transport>,
    ) -> Result<(), RouterError> {
        self.inner.registry.add_wallet(chain_id, transport)
    }

    /// Tears down and removes a wallet endpoint.
    pub async fn remove_wallet(&self, chain_id: &ChainId) -> Result<(), RouterError> {
        self.inner.registry.remove_wallet(chain_id).await
    }

    /// Serves the application connection: every inbound request traverses
    /// the middleware pipeline and is answered on the same transport, and
    /// router events are forwarded to it as notifications.
    pub fn serve(&self, transport: Arc<dyn Transport>) {
        let mut events = self.inner.events.subscribe();
        let notification_transport = transport.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let message = Message::Notification(event.to_notification());
                        if notification_transport.send(message).await.is_err() {
                            tracing::debug!("Application connection gone; stopping event forwarding");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Dropped {} router events for the application", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let inner = self.inner.clone();
        let transport_origin = transport.origin();
        let reply_transport = transport.clone();
        let in_flight: Arc<dashmap::DashSet<u64>> = Arc::new(dashmap::DashSet::new());
        transport.on_message(Arc::new(move |message| {
            let inner = inner.clone();
            let reply_transport = reply_transport.clone();
            let transport_origin = transport_origin.clone();
            let in_flight = in_flight.clone();
            Box::pin(async move {
                let Message::Request(request) = message else {
                    // The router is the serving side; stray responses and
                    // notifications from the application are ignored.
                    return Ok(());
                };
                let request_id = request.id;
                if !in_flight.insert(request_id) {
                    let response =
                        RpcResponse::error(request_id, RouterError::DuplicateRequestId.to_payload());
                    return reply_transport.send(Message::Response(response)).await;
                }
                tokio::spawn(async move {
                    let handler = inner.pipeline(transport_origin);
                    let outcome = handler(RouterContext::default(), request).await;
                    in_flight.remove(&request_id);
                    let response = match outcome {
                        Ok(result) => RpcResponse::result(request_id, result),
                        Err(error) => RpcResponse::error(request_id, error.to_payload()),
                    };
                    if let Err(e) = reply_transport.send(Message::Response(response)).await {
                        tracing::warn!("Failed to deliver response {}: {:#}", request_id, e);
                    }
                });
                Ok(())
            })
        }));
    }

    /// Wallet-initiated revocation of a single session, looked up directly
    /// by id. The store record is deleted even if cleanup or notification
    /// delivery fails.
    pub async fn revoke_session(&self, session_id: &str, reason: &str) -> Result<(), RouterError> {
        let suffix = format!("_{session_id}");
        let all = self.inner.sessions.get_all().await.map_err(internal)?;
        let Some((key, session)) = all.into_iter().find(|(key, _)| key.ends_with(&suffix)) else {
            return Err(RouterError::InvalidSession);
        };
        self.inner.revoke_entry(&key, &session, reason).await;
        Ok(())
    }

    /// Revokes every stored session independently, tolerating and logging
    /// individual failures. Returns how many sessions were revoked.
    pub async fn revoke_all_sessions(&self, reason: &str) -> usize {
        let all = match self.inner.sessions.get_all().await {
            Ok(all) => all,
            Err(e) => {
                tracing::error!("Failed to enumerate sessions for revocation: {:#}", e);
                return 0;
            }
        };
        let mut revoked = 0;
        for (key, session) in all {
            self.inner.revoke_entry(&key, &session, reason).await;
            revoked += 1;
        }
        revoked
    }

    /// Closes every registered wallet proxy, tolerating individual failures,
    /// and clears the registry.
    pub async fn close(&self) {
        self.inner.registry.close_all().await;
    }
}

impl RouterInner {
    fn pipeline(self: &Arc<Self>, transport_origin: Option<String>) -> BoxedHandler {
        let middlewares: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(TransportContextMiddleware::new(transport_origin)),
            Arc::new(SessionMiddleware::new(self.sessions.clone())),
            Arc::new(PermissionMiddleware::new(self.permissions.clone())),
        ];
        let inner = self.clone();
        let terminal: BoxedHandler = Arc::new(move |ctx, request| {
            let inner = inner.clone();
            async move { inner.dispatch(ctx, request).await }.boxed()
        });
        compose(&middlewares, terminal)
    }

    async fn dispatch(&self, ctx: RouterContext, request: RpcRequest) -> HandlerResult {
        match request.method.as_str() {
            methods::CONNECT => self.handle_connect(ctx, &request).await,
            methods::RECONNECT => self.handle_reconnect(ctx, &request).await,
            methods::DISCONNECT => self.handle_disconnect(ctx).await,
            methods::GET_PERMISSIONS => self.handle_get_permissions(ctx, &request).await,
            methods::UPDATE_PERMISSIONS => self.handle_update_permissions(ctx, &request).await,
            methods::CALL => self.handle_call(ctx, &request).await,
            methods::BULK_CALL => self.handle_bulk_call(ctx, &request).await,
            methods::GET_SUPPORTED_METHODS => self.handle_supported_methods(ctx, &request).await,
            other => Err(RouterError::MethodNotSupported(other.to_string())),
        }
    }

    async fn handle_connect(&self, ctx: RouterContext, request: &RpcRequest) -> HandlerResult {
        let Some(origin) = ctx.origin.clone() else {
            return Err(RouterError::InvalidRequest("Origin is required".into()));
        };
        let raw = request
            .params
            .as_ref()
            .and_then(|params| params.get("permissions"))
            .cloned()
            .unwrap_or(Value::Null);
        let requested = sanitize_permissions(&raw);
        if requested.is_empty() {
            return Err(RouterError::InvalidRequest("No chains specified".into()));
        }

        let approved = self
            .permissions
            .approve_permissions(&ctx, &requested)
            .await
            .map_err(|e| {
                tracing::warn!("Permission approval failed for {}: {:#}", origin, e);
                RouterError::InsufficientPermissions
            })?;

        // The record keeps the *requested* permissions so a later reconnect
        // can report what the caller originally asked for.
        let session_id = generate_session_id();
        let session = Session {
            id: session_id.clone(),
            origin: origin.clone(),
            created_at: Utc::now(),
            permissions: Some(requested),
        };
        self.sessions
            .set(&session_key(&origin, &session_id), session)
            .await
            .map_err(internal)?;

        tracing::info!("Session {} connected for origin {}", session_id, origin);
        Ok(json!({ "sessionId": session_id, "permissions": approved }))
    }

    async fn handle_reconnect(&self, ctx: RouterContext, request: &RpcRequest) -> HandlerResult {
        let Some(session_id) = extract_session_id(request) else {
            return Err(RouterError::InvalidSession);
        };
        let origin = ctx.origin.clone().unwrap_or_default();
        match resolve_session(self.sessions.as_ref(), &origin, &session_id).await {
            Ok(Some(session)) => Ok(json!({
                "status": true,
                "permissions": session.permissions.unwrap_or_default(),
            })),
            // A stale session id is a soft failure; callers check `status`.
            Ok(None) => {
                tracing::debug!("Reconnect with unknown session id {}", session_id);
                Ok(json!({ "status": false, "permissions": {} }))
            }
            Err(e) => Err(internal(e)),
        }
    }

    async fn handle_disconnect(&self, ctx: RouterContext) -> HandlerResult {
        let Some(session) = ctx.session.clone() else {
            return Err(RouterError::InvalidSession);
        };
        if let Err(e) = self.permissions.cleanup(&ctx).await {
            tracing::warn!("Permission cleanup failed for session {}: {:#}", session.id, e);
        }
        self.sessions
            .delete(&session_key(&session.origin, &session.id))
            .await
            .map_err(internal)?;
        let _ = self.events.send(RouterEvent::SessionTerminated {
            session_id: session.id.clone(),
            reason: "Session disconnected by the application".into(),
        });
        tracing::info!("Session {} disconnected", session.id);
        Ok(json!(true))
    }

    async fn handle_get_permissions(
        &self,
        ctx: RouterContext,
        request: &RpcRequest,
    ) -> HandlerResult {
        if ctx.session.is_none() {
            return Err(RouterError::InvalidSession);
        }
        let filter: ChainFilterParams = parse_params(request)?;
        let grants = self
            .permissions
            .get_permissions(&ctx, filter.chain_ids.as_deref())
            .await
            .map_err(internal)?;
        serde_json::to_value(grants).map_err(|e| RouterError::Unknown(e.to_string()))
    }

    async fn handle_update_permissions(
        &self,
        ctx: RouterContext,
        request: &RpcRequest,
    ) -> HandlerResult {
        let Some(session) = ctx.session.clone() else {
            return Err(RouterError::InvalidSession);
        };
        let raw = request
            .params
            .as_ref()
            .and_then(|params| params.get("permissions"))
            .cloned()
            .unwrap_or(Value::Null);
        let requested = sanitize_permissions(&raw);
        if requested.is_empty() {
            return Err(RouterError::InvalidRequest("No chains specified".into()));
        }

        let approved = self
            .permissions
            .approve_permissions(&ctx, &requested)
            .await
            .map_err(|e| {
                tracing::warn!("Permission update denied for session {}: {:#}", session.id, e);
                RouterError::InsufficientPermissions
            })?;

        // The stored record is re-persisted unchanged; approved grants live
        // in the permission manager's own state.
        self.sessions
            .set(&session_key(&session.origin, &session.id), session)
            .await
            .map_err(internal)?;
        serde_json::to_value(approved).map_err(|e| RouterError::Unknown(e.to_string()))
    }

    async fn handle_call(&self, ctx: RouterContext, request: &RpcRequest) -> HandlerResult {
        let params: CallParams = parse_params(request)?;
        let proxy = self.registry.validate_chain(&params.chain_id)?;
        let timeout = params.timeout_ms.map(Duration::from_millis);
        proxy.call(&params.call, ctx.origin.clone(), timeout).await
    }

    /// Executes a batch strictly in call order, each call awaited to
    /// completion before the next starts: later calls may depend on side
    /// effects of earlier ones, and partial results must match call order.
    async fn handle_bulk_call(&self, ctx: RouterContext, request: &RpcRequest) -> HandlerResult {
        let params: BulkCallParams = parse_params(request)?;
        let proxy = self.registry.validate_chain(&params.chain_id)?;
        let timeout = params.timeout_ms.map(Duration::from_millis);

        let mut completed = Vec::with_capacity(params.calls.len());
        for call in &params.calls {
            match proxy.call(call, ctx.origin.clone(), timeout).await {
                Ok(result) => completed.push(result),
                Err(error) => {
                    if completed.is_empty() {
                        return Err(RouterError::WalletNotAvailable);
                    }
                    return Err(RouterError::PartialFailure {
                        partial_responses: completed,
                        error: error.to_payload(),
                    });
                }
            }
        }
        Ok(Value::Array(completed))
    }

    async fn handle_supported_methods(
        &self,
        ctx: RouterContext,
        request: &RpcRequest,
    ) -> HandlerResult {
        let filter: ChainFilterParams = parse_params(request)?;
        let Some(chain_ids) = filter.chain_ids else {
            // No chains requested: describe the router's own surface.
            let mut surface = serde_json::Map::new();
            surface.insert(methods::ROUTER_KEY.to_string(), json!(methods::ALL));
            return Ok(Value::Object(surface));
        };

        let mut discovered = serde_json::Map::new();
        for chain_id in chain_ids {
            let proxy = self.registry.validate_chain(&chain_id)?;
            let discovery = MethodCall::new(methods::GET_SUPPORTED_METHODS, None);
            let supported = match proxy.call(&discovery, ctx.origin.clone(), None).await {
                Ok(Value::Array(list)) => list
                    .into_iter()
                    .filter_map(|entry| entry.as_str().map(str::to_string))
                    .collect(),
                // Anything that is not a list of names counts as "does not
                // support discovery".
                Ok(_) => Vec::new(),
                Err(RouterError::WalletError { .. }) => Vec::new(),
                Err(e) => return Err(e),
            };
            discovered.insert(chain_id.to_string(), json!(supported));
        }
        Ok(Value::Object(discovered))
    }

    async fn revoke_entry(&self, key: &str, session: &Session, reason: &str) {
        let ctx = RouterContext {
            origin: Some(session.origin.clone()),
            session: Some(session.clone()),
        };
        if let Err(e) = self.permissions.cleanup(&ctx).await {
            tracing::warn!(
                "Permission cleanup failed while revoking session {}: {:#}",
                session.id,
                e
            );
        }
        // The record goes away regardless of cleanup or delivery outcome.
        if let Err(e) = self.sessions.delete(key).await {
            tracing::error!("Failed to delete revoked session {}: {:#}", session.id, e);
        }
        let _ = self.events.send(RouterEvent::SessionTerminated {
            session_id: session.id.clone(),
            reason: reason.to_string(),
        });
        tracing::info!("Session {} revoked: {}", session.id, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_alphanumeric_and_unique() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn chain_filter_tolerates_absent_params() {
        let request = RpcRequest {
            id: 1,
            method: methods::GET_SUPPORTED_METHODS.into(),
            params: None,
            origin: None,
        };
        let filter: ChainFilterParams = parse_params(&request).unwrap();
        assert!(filter.chain_ids.is_none());
    }
}

//! # Middleware Pipeline
//!
//! Requests traverse an ordered list of interceptors before reaching a
//! method handler. Each interceptor receives the routing context, the
//! request, and the `next` callable, and either short-circuits with a typed
//! router error or calls through (optionally post-processing the result).
//!
//! The chain is built explicitly with [`compose`], reducing the interceptor
//! list right-to-left into a single callable; execution order never depends
//! on registration side effects.
//!
//! Install order is fixed by the router:
//! 1. [`TransportContextMiddleware`] — binds the caller origin.
//! 2. [`SessionMiddleware`] — resolves the session record.
//! 3. [`PermissionMiddleware`] — asks the permission manager.

use crate::error::RouterError;
use crate::permissions::PermissionManager;
use crate::router::methods;
use crate::session::SessionStore;
use crate::transport::RpcRequest;
use crate::types::{session_key, RouterContext, Session};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::sync::Arc;

pub type HandlerResult = Result<Value, RouterError>;

/// One fully-composed request handler: the tail of the middleware chain plus
/// the terminal method dispatch.
pub type BoxedHandler =
    Arc<dyn Fn(RouterContext, RpcRequest) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// A single interceptor in the pipeline.
pub trait Middleware: Send + Sync {
    fn handle(
        &self,
        ctx: RouterContext,
        request: RpcRequest,
        next: BoxedHandler,
    ) -> BoxFuture<'static, HandlerResult>;
}

/// Reduces the interceptor list right-to-left into one callable ending in
/// `terminal`.
pub fn compose(middlewares: &[Arc<dyn Middleware>], terminal: BoxedHandler) -> BoxedHandler {
    middlewares.iter().rev().fold(terminal, |next, middleware| {
        let middleware = middleware.clone();
        let composed: BoxedHandler = Arc::new(move |ctx, request| {
            middleware.handle(ctx, request, next.clone())
        });
        composed
    })
}

/// Binds `ctx.origin` from the transport's notion of the caller's origin.
/// Runs unconditionally for every request.
///
/// The transport is authoritative: the envelope's `origin` field is only
/// consulted when the transport has no notion of origin at all (in-process
/// wallet transports use it as side-channel context). A caller can never
/// override what the transport reports.
pub struct TransportContextMiddleware {
    transport_origin: Option<String>,
}

impl TransportContextMiddleware {
    pub fn new(transport_origin: Option<String>) -> Self {
        Self { transport_origin }
    }
}

impl Middleware for TransportContextMiddleware {
    fn handle(
        &self,
        mut ctx: RouterContext,
        request: RpcRequest,
        next: BoxedHandler,
    ) -> BoxFuture<'static, HandlerResult> {
        ctx.origin = self
            .transport_origin
            .clone()
            .or_else(|| request.origin.clone());
        next(ctx, request)
    }
}

/// The `sessionId` field of a request's params, if present.
pub fn extract_session_id(request: &RpcRequest) -> Option<String> {
    request
        .params
        .as_ref()
        .and_then(|params| params.get("sessionId"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Resolves a session id against the store.
///
/// The direct `origin_sessionId` key is tried first. On a miss, all stored
/// sessions are scanned for a key carrying this id and its stored origin is
/// adopted; origin detection can disagree between the client and the
/// transport, so origin alone is not trusted as a strict partition key.
pub async fn resolve_session(
    store: &dyn SessionStore,
    origin: &str,
    session_id: &str,
) -> anyhow::Result<Option<Session>> {
    let key = session_key(origin, session_id);
    if let Some(session) = store.validate_and_refresh(&key).await? {
        return Ok(Some(session));
    }

    let suffix = format!("_{session_id}");
    for (stored_key, _) in store.get_all().await? {
        if stored_key.ends_with(&suffix) {
            tracing::warn!(
                "Session {} found under a different origin key; adopting stored origin",
                session_id
            );
            return store.validate_and_refresh(&stored_key).await;
        }
    }
    Ok(None)
}

/// Validates the request's session against the store and populates
/// `ctx.session` on success.
///
/// `wm_connect` must arrive without a session id; `wm_reconnect` must carry
/// one but is validated inside its own handler (a stale id there is a soft
/// failure, not an error). Every other method requires a resolvable session.
pub struct SessionMiddleware {
    store: Arc<dyn SessionStore>,
}

impl SessionMiddleware {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }
}

impl Middleware for SessionMiddleware {
    fn handle(
        &self,
        mut ctx: RouterContext,
        request: RpcRequest,
        next: BoxedHandler,
    ) -> BoxFuture<'static, HandlerResult> {
        let store = self.store.clone();
        async move {
            let session_id = extract_session_id(&request);
            match request.method.as_str() {
                methods::CONNECT => {
                    if session_id.is_some() {
                        return Err(RouterError::InvalidRequest(
                            "wm_connect must not carry a session id".into(),
                        ));
                    }
                    next(ctx, request).await
                }
                methods::RECONNECT => {
                    if session_id.is_none() {
                        return Err(RouterError::InvalidSession);
                    }
                    next(ctx, request).await
                }
                _ => {
                    let Some(session_id) = session_id else {
                        return Err(RouterError::InvalidSession);
                    };
                    let origin = ctx.origin.clone().unwrap_or_default();
                    let session = resolve_session(store.as_ref(), &origin, &session_id)
                        .await
                        .map_err(|e| {
                            tracing::error!("Session store lookup failed: {:#}", e);
                            RouterError::Unknown(e.to_string())
                        })?;
                    match session {
                        Some(session) => {
                            ctx.session = Some(session);
                            next(ctx, request).await
                        }
                        None => Err(RouterError::InvalidSession),
                    }
                }
            }
        }
        .boxed()
    }
}

/// Denies the request unless the permission manager approves it. A manager
/// error counts as a denial.
pub struct PermissionMiddleware {
    permissions: Arc<dyn PermissionManager>,
}

impl PermissionMiddleware {
    pub fn new(permissions: Arc<dyn PermissionManager>) -> Self {
        Self { permissions }
    }
}

impl Middleware for PermissionMiddleware {
    fn handle(
        &self,
        ctx: RouterContext,
        request: RpcRequest,
        next: BoxedHandler,
    ) -> BoxFuture<'static, HandlerResult> {
        let permissions = self.permissions.clone();
        async move {
            match permissions.check_permissions(&ctx, &request).await {
                Ok(true) => next(ctx, request).await,
                Ok(false) => Err(RouterError::InsufficientPermissions),
                Err(e) => {
                    tracing::warn!("Permission check failed: {:#}", e);
                    Err(RouterError::InsufficientPermissions)
                }
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessionStore;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Mutex;

    fn request(method: &str, params: Value) -> RpcRequest {
        RpcRequest {
            id: 1,
            method: method.to_string(),
            params: Some(params),
            origin: None,
        }
    }

    fn terminal() -> BoxedHandler {
        Arc::new(|ctx, _request| {
            async move {
                Ok(json!({
                    "origin": ctx.origin,
                    "sessionId": ctx.session.map(|s| s.id),
                }))
            }
            .boxed()
        })
    }

    struct Tag {
        name: &'static str,
        seen: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Middleware for Tag {
        fn handle(
            &self,
            ctx: RouterContext,
            request: RpcRequest,
            next: BoxedHandler,
        ) -> BoxFuture<'static, HandlerResult> {
            self.seen.lock().unwrap().push(self.name);
            next(ctx, request)
        }
    }

    #[tokio::test]
    async fn compose_runs_left_to_right() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let middlewares: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(Tag {
                name: "first",
                seen: seen.clone(),
            }),
            Arc::new(Tag {
                name: "second",
                seen: seen.clone(),
            }),
            Arc::new(Tag {
                name: "third",
                seen: seen.clone(),
            }),
        ];
        let handler = compose(&middlewares, terminal());
        handler(RouterContext::default(), request("anything", json!({})))
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn transport_origin_cannot_be_overridden_by_the_request() {
        let middlewares: Vec<Arc<dyn Middleware>> = vec![Arc::new(
            TransportContextMiddleware::new(Some("https://app.example".into())),
        )];
        let handler = compose(&middlewares, terminal());

        // A caller claiming a different origin in the envelope is ignored.
        let mut spoofed = request("m", json!({}));
        spoofed.origin = Some("https://evil.example".into());
        let result = handler(RouterContext::default(), spoofed).await.unwrap();
        assert_eq!(result["origin"], "https://app.example");

        let result = handler(RouterContext::default(), request("m", json!({})))
            .await
            .unwrap();
        assert_eq!(result["origin"], "https://app.example");
    }

    #[tokio::test]
    async fn envelope_origin_applies_only_without_a_transport_origin() {
        let middlewares: Vec<Arc<dyn Middleware>> =
            vec![Arc::new(TransportContextMiddleware::new(None))];
        let handler = compose(&middlewares, terminal());

        let mut with_origin = request("m", json!({}));
        with_origin.origin = Some("https://app.example".into());
        let result = handler(RouterContext::default(), with_origin).await.unwrap();
        assert_eq!(result["origin"], "https://app.example");
    }

    async fn store_with(origin: &str, id: &str) -> Arc<MemorySessionStore> {
        let store = Arc::new(MemorySessionStore::new());
        store
            .set(
                &session_key(origin, id),
                Session {
                    id: id.to_string(),
                    origin: origin.to_string(),
                    created_at: Utc::now(),
                    permissions: None,
                },
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn session_middleware_resolves_and_populates_context() {
        let store = store_with("https://app.test", "s1").await;
        let middlewares: Vec<Arc<dyn Middleware>> =
            vec![Arc::new(SessionMiddleware::new(store))];
        let handler = compose(&middlewares, terminal());

        let ctx = RouterContext {
            origin: Some("https://app.test".into()),
            session: None,
        };
        let result = handler(ctx, request(methods::CALL, json!({"sessionId": "s1"})))
            .await
            .unwrap();
        assert_eq!(result["sessionId"], "s1");
    }

    #[tokio::test]
    async fn session_middleware_falls_back_to_key_scan_on_origin_mismatch() {
        let store = store_with("https://real-origin.test", "s1").await;
        let middlewares: Vec<Arc<dyn Middleware>> =
            vec![Arc::new(SessionMiddleware::new(store))];
        let handler = compose(&middlewares, terminal());

        let ctx = RouterContext {
            origin: Some("https://detected-differently.test".into()),
            session: None,
        };
        let result = handler(ctx, request(methods::CALL, json!({"sessionId": "s1"})))
            .await
            .unwrap();
        assert_eq!(result["sessionId"], "s1");
    }

    #[tokio::test]
    async fn session_middleware_rejects_missing_and_unknown_sessions() {
        let store = store_with("o", "s1").await;
        let middlewares: Vec<Arc<dyn Middleware>> =
            vec![Arc::new(SessionMiddleware::new(store))];
        let handler = compose(&middlewares, terminal());

        let no_id = handler(RouterContext::default(), request(methods::CALL, json!({}))).await;
        assert_eq!(no_id.unwrap_err(), RouterError::InvalidSession);

        let unknown = handler(
            RouterContext::default(),
            request(methods::CALL, json!({"sessionId": "nope"})),
        )
        .await;
        assert_eq!(unknown.unwrap_err(), RouterError::InvalidSession);
    }

    #[tokio::test]
    async fn connect_must_not_carry_a_session_id() {
        let store = Arc::new(MemorySessionStore::new());
        let middlewares: Vec<Arc<dyn Middleware>> =
            vec![Arc::new(SessionMiddleware::new(store))];
        let handler = compose(&middlewares, terminal());

        let rejected = handler(
            RouterContext::default(),
            request(methods::CONNECT, json!({"sessionId": "stale"})),
        )
        .await;
        assert!(matches!(
            rejected.unwrap_err(),
            RouterError::InvalidRequest(_)
        ));

        let accepted = handler(
            RouterContext::default(),
            request(methods::CONNECT, json!({"permissions": {}})),
        )
        .await;
        assert!(accepted.is_ok());
    }
}

//! # Permission Managers
//!
//! A pluggable authorizer decides, per origin, which chain methods a caller
//! may invoke. The router never inherits from a manager; it owns one behind
//! the [`PermissionManager`] capability interface.
//!
//! Two implementations ship with the crate: [`AllowAllPermissions`], which
//! grants everything it is asked for, and [`PolicyPermissions`], which maps
//! each method to an allow/ask/deny policy and consults an injected async
//! prompt for `Ask`.

use crate::router::methods;
use crate::transport::RpcRequest;
use crate::types::{
    ChainId, ChainPermissions, GrantPolicy, HumanReadablePermissions, MethodGrant, RouterContext,
};
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The capability interface the router consumes for authorization decisions.
#[async_trait]
pub trait PermissionManager: Send + Sync {
    /// Approves (a subset of) the requested permissions for the context's
    /// origin and returns the human-readable grant.
    async fn approve_permissions(
        &self,
        ctx: &RouterContext,
        requested: &ChainPermissions,
    ) -> Result<HumanReadablePermissions>;

    /// Answers whether the request is currently permitted. Returning `false`
    /// or an error both deny the call.
    async fn check_permissions(&self, ctx: &RouterContext, request: &RpcRequest) -> Result<bool>;

    /// Returns the current grant for the context's origin, optionally
    /// filtered to specific chains.
    async fn get_permissions(
        &self,
        ctx: &RouterContext,
        chain_ids: Option<&[ChainId]>,
    ) -> Result<HumanReadablePermissions>;

    /// Invoked when a session ends; failures are logged by the router, never
    /// propagated.
    async fn cleanup(&self, ctx: &RouterContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }
}

/// The chain and wallet methods a `wm_call` / `wm_bulkCall` request targets.
/// Requests for other router methods carry no wallet method to check.
fn wallet_methods_of(request: &RpcRequest) -> Option<(ChainId, Vec<String>)> {
    let params = request.params.as_ref()?;
    let chain_id = params
        .get("chainId")
        .and_then(Value::as_str)
        .map(ChainId::from)?;
    match request.method.as_str() {
        methods::CALL => {
            let method = params
                .get("call")
                .and_then(|c| c.get("method"))
                .and_then(Value::as_str)?;
            Some((chain_id, vec![method.to_string()]))
        }
        methods::BULK_CALL => {
            let calls = params.get("calls").and_then(Value::as_array)?;
            let names = calls
                .iter()
                .filter_map(|c| c.get("method").and_then(Value::as_str))
                .map(str::to_string)
                .collect();
            Some((chain_id, names))
        }
        _ => None,
    }
}

fn filtered(
    grants: HumanReadablePermissions,
    chain_ids: Option<&[ChainId]>,
) -> HumanReadablePermissions {
    match chain_ids {
        None => grants,
        Some(wanted) => grants
            .into_iter()
            .filter(|(chain, _)| wanted.contains(chain))
            .collect(),
    }
}

/// A permissive manager: every requested method is granted with
/// [`GrantPolicy::Allow`] and every call passes. Useful for embedding
/// scenarios where the wallet itself is trusted, and for tests.
#[derive(Debug, Default)]
pub struct AllowAllPermissions {
    granted: DashMap<String, HumanReadablePermissions>,
}

impl AllowAllPermissions {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PermissionManager for AllowAllPermissions {
    async fn approve_permissions(
        &self,
        ctx: &RouterContext,
        requested: &ChainPermissions,
    ) -> Result<HumanReadablePermissions> {
        let mut approved = HumanReadablePermissions::new();
        for (chain, methods) in requested {
            let grants: BTreeMap<String, MethodGrant> = methods
                .iter()
                .map(|method| {
                    (
                        method.clone(),
                        MethodGrant {
                            policy: GrantPolicy::Allow,
                            description: format!("Allow '{method}' on {chain}"),
                        },
                    )
                })
                .collect();
            approved.insert(chain.clone(), grants);
        }

        let origin = ctx.origin.clone().unwrap_or_default();
        let mut stored = self.granted.entry(origin).or_default();
        for (chain, grants) in &approved {
            stored.entry(chain.clone()).or_default().extend(
                grants
                    .iter()
                    .map(|(method, grant)| (method.clone(), grant.clone())),
            );
        }
        Ok(approved)
    }

    async fn check_permissions(&self, _ctx: &RouterContext, _request: &RpcRequest) -> Result<bool> {
        Ok(true)
    }

    async fn get_permissions(
        &self,
        ctx: &RouterContext,
        chain_ids: Option<&[ChainId]>,
    ) -> Result<HumanReadablePermissions> {
        let origin = ctx.origin.clone().unwrap_or_default();
        let grants = self
            .granted
            .get(&origin)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        Ok(filtered(grants, chain_ids))
    }

    async fn cleanup(&self, ctx: &RouterContext) -> Result<()> {
        if let Some(origin) = &ctx.origin {
            self.granted.remove(origin);
        }
        Ok(())
    }
}

/// Decides the policy for one `(chain, method)` pair at approval time.
pub type PolicyFn = Arc<dyn Fn(&ChainId, &str) -> GrantPolicy + Send + Sync>;

/// Asked before each call to an `Ask`-policy method; `true` lets the call
/// proceed. Typically backed by a user-facing approval dialog.
pub type PromptFn = Arc<dyn Fn(ChainId, String) -> BoxFuture<'static, bool> + Send + Sync>;

/// An interactive allow/ask/deny manager.
///
/// Grants are resolved per method through the injected policy; `Ask` grants
/// defer to the prompt on every call. Grants live in the manager's own
/// per-origin state and are dropped on [`PermissionManager::cleanup`].
pub struct PolicyPermissions {
    policy: PolicyFn,
    prompt: Option<PromptFn>,
    granted: DashMap<String, HumanReadablePermissions>,
}

impl PolicyPermissions {
    pub fn new(policy: PolicyFn) -> Self {
        Self {
            policy,
            prompt: None,
            granted: DashMap::new(),
        }
    }

    /// Attaches the prompt consulted for `Ask` grants. Without one, `Ask`
    /// behaves like `Deny`.
    pub fn with_prompt(mut self, prompt: PromptFn) -> Self {
        self.prompt = Some(prompt);
        self
    }

    fn grant_for(&self, origin: &str, chain: &ChainId, method: &str) -> Option<MethodGrant> {
        self.granted
            .get(origin)
            .and_then(|grants| grants.get(chain).and_then(|g| g.get(method)).cloned())
    }
}

#[async_trait]
impl PermissionManager for PolicyPermissions {
    async fn approve_permissions(
        &self,
        ctx: &RouterContext,
        requested: &ChainPermissions,
    ) -> Result<HumanReadablePermissions> {
        let mut approved = HumanReadablePermissions::new();
        for (chain, methods) in requested {
            let mut grants = BTreeMap::new();
            for method in methods {
                let policy = (self.policy)(chain, method);
                let description = match policy {
                    GrantPolicy::Allow => format!("'{method}' on {chain} is allowed"),
                    GrantPolicy::Ask => format!("'{method}' on {chain} requires approval per call"),
                    GrantPolicy::Deny => format!("'{method}' on {chain} is denied"),
                };
                grants.insert(
                    method.clone(),
                    MethodGrant {
                        policy,
                        description,
                    },
                );
            }
            approved.insert(chain.clone(), grants);
        }

        let origin = ctx.origin.clone().unwrap_or_default();
        self.granted.insert(origin, approved.clone());
        Ok(approved)
    }

    async fn check_permissions(&self, ctx: &RouterContext, request: &RpcRequest) -> Result<bool> {
        // Only wallet-facing calls are method-gated; session management is
        // already guarded by the session interceptor.
        let Some((chain_id, wallet_methods)) = wallet_methods_of(request) else {
            return Ok(true);
        };
        let origin = ctx.origin.clone().unwrap_or_default();

        for method in wallet_methods {
            let Some(grant) = self.grant_for(&origin, &chain_id, &method) else {
                tracing::debug!("No grant for '{}' on {} (origin {})", method, chain_id, origin);
                return Ok(false);
            };
            match grant.policy {
                GrantPolicy::Allow => {}
                GrantPolicy::Deny => return Ok(false),
                GrantPolicy::Ask => {
                    let Some(prompt) = &self.prompt else {
                        return Ok(false);
                    };
                    if !prompt(chain_id.clone(), method.clone()).await {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }

    async fn get_permissions(
        &self,
        ctx: &RouterContext,
        chain_ids: Option<&[ChainId]>,
    ) -> Result<HumanReadablePermissions> {
        let origin = ctx.origin.clone().unwrap_or_default();
        let grants = self
            .granted
            .get(&origin)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        Ok(filtered(grants, chain_ids))
    }

    async fn cleanup(&self, ctx: &RouterContext) -> Result<()> {
        if let Some(origin) = &ctx.origin {
            self.granted.remove(origin);
        }
        Ok(())
    }
}

//! # Wallet Provider
//!
//! The application-facing counterpart of the router: it mirrors the `wm_*`
//! method surface from the caller's perspective, tracks the current session
//! id, and runs wallet-bound payloads through the [`SerializerRegistry`].
//!
//! The provider is connectionless until [`WalletProvider::connect`] or a
//! successful [`WalletProvider::reconnect`]; methods that need a session are
//! rejected locally, without a round trip, when none exists.

use crate::error::ProviderError;
use crate::serializer::SerializerRegistry;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use walletmesh_router::router::methods;
use walletmesh_router::transport::RpcNotification;
use walletmesh_router::{
    ChainId, ChainPermissions, MethodCall, RouterError, Transport, TransportClient,
};

/// Provider construction options.
#[derive(Clone)]
pub struct ProviderOptions {
    /// Origin reported with every request; transports that know the caller's
    /// origin themselves may leave this unset.
    pub origin: Option<String>,
    /// Per-call timeout for router round trips.
    pub call_timeout: Duration,
    /// Buffer for the notification broadcast channel.
    pub notification_buffer: usize,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            origin: None,
            call_timeout: Duration::from_secs(30),
            notification_buffer: 128,
        }
    }
}

/// Human-readable grants as the router reports them.
pub type ApprovedPermissions = Value;

/// Outcome of [`WalletProvider::connect`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResult {
    pub session_id: String,
    pub permissions: ApprovedPermissions,
}

/// Outcome of [`WalletProvider::reconnect`]. A stale session id yields
/// `restored: false` rather than an error; callers must check it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectResult {
    #[serde(rename = "status")]
    pub restored: bool,
    pub permissions: ApprovedPermissions,
}

pub struct WalletProvider {
    client: TransportClient,
    serializers: SerializerRegistry,
    session_id: Mutex<Option<String>>,
    origin: Option<String>,
}

impl WalletProvider {
    pub fn new(transport: Arc<dyn Transport>, options: ProviderOptions) -> Self {
        let client = TransportClient::new(
            transport,
            options.call_timeout,
            options.notification_buffer,
        );
        Self {
            client,
            serializers: SerializerRegistry::new(),
            session_id: Mutex::new(None),
            origin: options.origin,
        }
    }

    /// The per-method transform registry applied around `call`/`bulk_call`.
    pub fn serializers(&self) -> &SerializerRegistry {
        &self.serializers
    }

    /// The current session id, if connected.
    pub fn session_id(&self) -> Option<String> {
        self.session_lock().clone()
    }

    /// Subscribes to router notifications (availability changes, session
    /// terminations, forwarded wallet notifications).
    pub fn subscribe(&self) -> broadcast::Receiver<RpcNotification> {
        self.client.subscribe()
    }

    fn session_lock(&self) -> MutexGuard<'_, Option<String>> {
        self.session_id
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        self.request_with_timeout(method, params, None).await
    }

    async fn request_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, ProviderError> {
        let response = self
            .client
            .request(method, Some(params), self.origin.clone(), timeout)
            .await?;
        if let Some(error) = response.error {
            return Err(RouterError::from_payload(&error).into());
        }
        response.result.ok_or_else(|| {
            ProviderError::MalformedResponse("response carries neither result nor error".into())
        })
    }

    fn session_params(&self, mut params: Map<String, Value>) -> Result<Value, ProviderError> {
        let session_id = self
            .session_lock()
            .clone()
            .ok_or(RouterError::InvalidSession)?;
        params.insert("sessionId".into(), json!(session_id));
        Ok(Value::Object(params))
    }

    /// Establishes a new session for the given requested permissions and
    /// remembers its id.
    pub async fn connect(
        &self,
        permissions: &ChainPermissions,
    ) -> Result<ConnectResult, ProviderError> {
        let result = self
            .request(methods::CONNECT, json!({ "permissions": permissions }))
            .await?;
        let connected: ConnectResult = serde_json::from_value(result)
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        *self.session_lock() = Some(connected.session_id.clone());
        Ok(connected)
    }

    /// Attempts to restore a previous session. On a hard failure the local
    /// session id is cleared; on a soft `restored: false` it is left alone.
    pub async fn reconnect(&self, session_id: &str) -> Result<ReconnectResult, ProviderError> {
        let outcome = self
            .request(methods::RECONNECT, json!({ "sessionId": session_id }))
            .await;
        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                self.session_lock().take();
                return Err(e);
            }
        };
        let restored: ReconnectResult = serde_json::from_value(result)
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        if restored.restored {
            *self.session_lock() = Some(session_id.to_string());
        }
        Ok(restored)
    }

    /// Ends the current session. A router that is already gone counts as
    /// disconnected; the local session id is cleared regardless of outcome.
    pub async fn disconnect(&self) -> Result<(), ProviderError> {
        let params = self.session_params(Map::new())?;
        let outcome = self.request(methods::DISCONNECT, params).await;
        self.session_lock().take();
        match outcome {
            Ok(_) => Ok(()),
            Err(ProviderError::Router(RouterError::WalletNotAvailable)) => {
                tracing::debug!("Router unreachable during disconnect; treating as disconnected");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// The current grant for this session, optionally filtered by chain.
    /// Without a session there are no permissions, so this returns an empty
    /// map instead of erroring.
    pub async fn get_permissions(
        &self,
        chain_ids: Option<&[ChainId]>,
    ) -> Result<ApprovedPermissions, ProviderError> {
        if self.session_lock().is_none() {
            return Ok(json!({}));
        }
        let mut params = Map::new();
        if let Some(chain_ids) = chain_ids {
            params.insert("chainIds".into(), json!(chain_ids));
        }
        let params = self.session_params(params)?;
        self.request(methods::GET_PERMISSIONS, params).await
    }

    /// Re-runs approval for a new requested permission set.
    pub async fn update_permissions(
        &self,
        permissions: &ChainPermissions,
    ) -> Result<ApprovedPermissions, ProviderError> {
        let mut params = Map::new();
        params.insert("permissions".into(), json!(permissions));
        let params = self.session_params(params)?;
        self.request(methods::UPDATE_PERMISSIONS, params).await
    }

    /// Capability discovery: the router's own surface when `chain_ids` is
    /// `None`, otherwise each named wallet's supported methods.
    pub async fn get_supported_methods(
        &self,
        chain_ids: Option<&[ChainId]>,
    ) -> Result<Value, ProviderError> {
        let mut params = Map::new();
        if let Some(chain_ids) = chain_ids {
            params.insert("chainIds".into(), json!(chain_ids));
        }
        let params = self.session_params(params)?;
        self.request(methods::GET_SUPPORTED_METHODS, params).await
    }

    /// Executes one wallet method on a chain, applying any registered
    /// serializer around the payload. `timeout` bounds the wallet leg as
    /// well as this round trip; `None` uses the configured defaults.
    pub async fn call(
        &self,
        chain_id: &ChainId,
        call: MethodCall,
        timeout: Option<Duration>,
    ) -> Result<Value, ProviderError> {
        let method = call.method.clone();
        let call = self.serialize(call)?;
        let mut params = Map::new();
        params.insert("chainId".into(), json!(chain_id));
        params.insert("call".into(), json!(call));
        if let Some(timeout) = timeout {
            params.insert("timeoutMs".into(), json!(timeout.as_millis() as u64));
        }
        let params = self.session_params(params)?;
        let result = self
            .request_with_timeout(methods::CALL, params, timeout)
            .await?;
        self.deserialize(&method, result)
    }

    /// Executes an ordered batch on one chain. Results arrive in call order;
    /// mid-batch failures surface as [`RouterError::PartialFailure`].
    /// `timeout` bounds each sub-call's wallet leg.
    pub async fn bulk_call(
        &self,
        chain_id: &ChainId,
        calls: Vec<MethodCall>,
        timeout: Option<Duration>,
    ) -> Result<Vec<Value>, ProviderError> {
        let method_names: Vec<String> = calls.iter().map(|call| call.method.clone()).collect();
        let calls = calls
            .into_iter()
            .map(|call| self.serialize(call))
            .collect::<Result<Vec<_>, _>>()?;
        let mut params = Map::new();
        params.insert("chainId".into(), json!(chain_id));
        params.insert("calls".into(), json!(calls));
        if let Some(timeout) = timeout {
            params.insert("timeoutMs".into(), json!(timeout.as_millis() as u64));
        }
        let params = self.session_params(params)?;
        let result = self.request(methods::BULK_CALL, params).await?;

        let Value::Array(results) = result else {
            return Err(ProviderError::MalformedResponse(
                "bulk call result is not an array".into(),
            ));
        };
        method_names
            .iter()
            .zip(results)
            .map(|(method, result)| self.deserialize(method, result))
            .collect()
    }

    /// Starts a typed call queue against one chain.
    pub fn ops(&self, chain_id: ChainId) -> crate::ops::ChainOps<'_> {
        crate::ops::ChainOps::new(self, chain_id)
    }

    /// Closes the underlying transport.
    pub async fn close(&self) -> Result<(), ProviderError> {
        self.client.close().await?;
        Ok(())
    }

    fn serialize(&self, call: MethodCall) -> Result<MethodCall, ProviderError> {
        let method = call.method.clone();
        self.serializers
            .serialize_call(call)
            .map_err(|source| ProviderError::Serializer { method, source })
    }

    fn deserialize(&self, method: &str, result: Value) -> Result<Value, ProviderError> {
        self.serializers
            .deserialize_result(method, result)
            .map_err(|source| ProviderError::Serializer {
                method: method.to_string(),
                source,
            })
    }
}

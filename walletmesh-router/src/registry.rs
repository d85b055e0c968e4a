//! # Chain Registry & Wallet Proxies
//!
//! The registry maps each chain id to exactly one live wallet endpoint. A
//! [`WalletProxy`] wraps the endpoint's transport, forwards raw RPC
//! envelopes, interprets the raw response into a result or a typed error,
//! and re-emits any wallet-raised notification as a router event with the
//! chain id attached.

use crate::config::RouterConfig;
use crate::error::RouterError;
use crate::events::RouterEvent;
use crate::transport::{Transport, TransportClient};
use crate::types::{ChainId, MethodCall};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// A per-chain forwarding wrapper around a wallet transport.
pub struct WalletProxy {
    chain_id: ChainId,
    client: TransportClient,
}

impl WalletProxy {
    fn new(
        chain_id: ChainId,
        transport: Arc<dyn Transport>,
        events: broadcast::Sender<RouterEvent>,
        config: &RouterConfig,
    ) -> Arc<Self> {
        let client = TransportClient::new(
            transport,
            config.timeouts.call_timeout(),
            config.channels.notification_buffer,
        );
        let proxy = Arc::new(Self {
            chain_id: chain_id.clone(),
            client,
        });

        // Surface wallet-raised notifications as router events.
        let mut wallet_notifications = proxy.client.subscribe();
        tokio::spawn(async move {
            loop {
                match wallet_notifications.recv().await {
                    Ok(notification) => {
                        let _ = events.send(RouterEvent::WalletNotification {
                            chain_id: chain_id.clone(),
                            method: notification.method,
                            params: notification.params,
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            "Dropped {} wallet notifications for chain {}",
                            skipped,
                            chain_id
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        proxy
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    /// Forwards one call to the wallet and interprets the raw response.
    ///
    /// A `result` field yields that value; an `error` field becomes a
    /// [`RouterError::WalletError`]; any other response shape, and any
    /// transport-level failure, becomes [`RouterError::WalletNotAvailable`].
    /// Errors already typed by the transport layer propagate unchanged.
    ///
    /// The caller's origin is attached to the inner request as side-channel
    /// context for in-process transports that need it.
    pub async fn call(
        &self,
        call: &MethodCall,
        origin: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Value, RouterError> {
        let response = self
            .client
            .request(&call.method, call.params.clone(), origin, timeout)
            .await?;

        if let Some(result) = response.result {
            return Ok(result);
        }
        if let Some(error) = response.error {
            return Err(RouterError::WalletError {
                message: error.message,
                data: error.data,
            });
        }
        tracing::warn!(
            "Wallet for chain {} returned a response with neither result nor error",
            self.chain_id
        );
        Err(RouterError::WalletNotAvailable)
    }

    /// Closes the wallet transport and abandons all pending calls.
    pub async fn close(&self) -> anyhow::Result<()> {
        self.client.close().await
    }
}

/// The map of registered wallet endpoints, one per chain id.
pub struct WalletRegistry {
    wallets: DashMap<ChainId, Arc<WalletProxy>>,
    events: broadcast::Sender<RouterEvent>,
    config: Arc<RouterConfig>,
}

impl WalletRegistry {
    pub fn new(events: broadcast::Sender<RouterEvent>, config: Arc<RouterConfig>) -> Self {
        Self {
            wallets: DashMap::new(),
            events,
            config,
        }
    }

    /// Registers a wallet endpoint. A chain id maps to exactly one live
    /// endpoint at a time; re-adding is rejected.
    pub fn add_wallet(
        &self,
        chain_id: ChainId,
        transport: Arc<dyn Transport>,
    ) -> Result<(), RouterError> {
        match self.wallets.entry(chain_id.clone()) {
            Entry::Occupied(_) => Err(RouterError::InvalidRequest(format!(
                "Chain '{chain_id}' is already registered"
            ))),
            Entry::Vacant(slot) => {
                let proxy =
                    WalletProxy::new(chain_id.clone(), transport, self.events.clone(), &self.config);
                slot.insert(proxy);
                tracing::info!("Registered wallet endpoint for chain {}", chain_id);
                let _ = self.events.send(RouterEvent::WalletAvailabilityChanged {
                    chain_id,
                    available: true,
                });
                Ok(())
            }
        }
    }

    /// Tears down and removes a wallet endpoint.
    pub async fn remove_wallet(&self, chain_id: &ChainId) -> Result<(), RouterError> {
        let Some((_, proxy)) = self.wallets.remove(chain_id) else {
            return Err(RouterError::UnknownChain(chain_id.clone()));
        };
        if let Err(e) = proxy.close().await {
            tracing::warn!("Failed to close wallet transport for {}: {:#}", chain_id, e);
        }
        tracing::info!("Removed wallet endpoint for chain {}", chain_id);
        let _ = self.events.send(RouterEvent::WalletAvailabilityChanged {
            chain_id: chain_id.clone(),
            available: false,
        });
        Ok(())
    }

    /// Returns the registered proxy for `chain_id`, or `unknownChain`.
    pub fn validate_chain(&self, chain_id: &ChainId) -> Result<Arc<WalletProxy>, RouterError> {
        self.wallets
            .get(chain_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RouterError::UnknownChain(chain_id.clone()))
    }

    /// The chain ids currently registered.
    pub fn chain_ids(&self) -> Vec<ChainId> {
        self.wallets.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Closes every registered proxy, tolerating individual failures, then
    /// clears the registry.
    pub async fn close_all(&self) {
        let proxies: Vec<Arc<WalletProxy>> = self
            .wallets
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.wallets.clear();
        for proxy in proxies {
            if let Err(e) = proxy.close().await {
                tracing::warn!(
                    "Failed to close wallet transport for {} during shutdown: {:#}",
                    proxy.chain_id(),
                    e
                );
            }
        }
    }
}

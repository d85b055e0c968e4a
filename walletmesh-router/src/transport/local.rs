//! # Local Transport
//!
//! An in-process [`Transport`] that mimics asynchronous message delivery
//! without a real network. Used to connect a router directly to a wallet
//! implementation (or a provider) living in the same process, and as the
//! test harness for everything built on transports.
//!
//! Delivery is always scheduled through the executor, never synchronous, so
//! callers keep the same assumptions they would have against a real wire.

use super::{Message, MessageHandler, Transport};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

/// Options for one side of a local transport.
#[derive(Debug, Clone, Default)]
pub struct LocalTransportOptions {
    /// The caller origin this side reports to whoever serves it.
    pub origin: Option<String>,
    /// When set, a handler error tears down the delivery task instead of
    /// being logged and swallowed. Intended for tests.
    pub strict_errors: bool,
    /// Inbox capacity; `None` uses a small default.
    pub inbox_buffer: Option<usize>,
}

const DEFAULT_INBOX_BUFFER: usize = 64;

struct HandlerSlot {
    handler: Mutex<Option<MessageHandler>>,
    ready: Notify,
}

/// One side of an in-process transport pair.
pub struct LocalTransport {
    to_peer: mpsc::Sender<Message>,
    slot: Arc<HandlerSlot>,
    origin: Option<String>,
    closed: Arc<AtomicBool>,
}

impl LocalTransport {
    /// Creates two cross-wired transports with default options, suitable for
    /// a direct router-to-wallet (or provider-to-router) connection.
    pub fn pair() -> (Self, Self) {
        Self::pair_with(
            LocalTransportOptions::default(),
            LocalTransportOptions::default(),
        )
    }

    /// Creates two cross-wired transports, one per options value.
    pub fn pair_with(
        left_options: LocalTransportOptions,
        right_options: LocalTransportOptions,
    ) -> (Self, Self) {
        let left_buffer = left_options.inbox_buffer.unwrap_or(DEFAULT_INBOX_BUFFER);
        let right_buffer = right_options.inbox_buffer.unwrap_or(DEFAULT_INBOX_BUFFER);
        let (left_tx, left_rx) = mpsc::channel(left_buffer);
        let (right_tx, right_rx) = mpsc::channel(right_buffer);

        let left = Self::build(right_tx, left_rx, left_options);
        let right = Self::build(left_tx, right_rx, right_options);
        (left, right)
    }

    /// Wraps a single pre-existing peer. Everything sent on the returned
    /// transport is delivered to `endpoint`; the peer injects its own
    /// messages through the returned sender.
    pub fn for_endpoint(
        endpoint: Arc<dyn LocalEndpoint>,
        options: LocalTransportOptions,
    ) -> (Self, mpsc::Sender<Message>) {
        let buffer = options.inbox_buffer.unwrap_or(DEFAULT_INBOX_BUFFER);
        let (inbox_tx, inbox_rx) = mpsc::channel(buffer);
        let (outbox_tx, mut outbox_rx) = mpsc::channel::<Message>(buffer);

        let strict = options.strict_errors;
        tokio::spawn(async move {
            while let Some(message) = outbox_rx.recv().await {
                if let Err(e) = endpoint.receive(message).await {
                    if strict {
                        panic!("local endpoint failed: {e:#}");
                    }
                    tracing::warn!("Local endpoint failed to handle a message: {:#}", e);
                }
            }
        });

        (Self::build(outbox_tx, inbox_rx, options), inbox_tx)
    }

    fn build(
        to_peer: mpsc::Sender<Message>,
        mut inbox: mpsc::Receiver<Message>,
        options: LocalTransportOptions,
    ) -> Self {
        let slot = Arc::new(HandlerSlot {
            handler: Mutex::new(None),
            ready: Notify::new(),
        });
        let closed = Arc::new(AtomicBool::new(false));

        let pump_slot = slot.clone();
        let pump_closed = closed.clone();
        let strict = options.strict_errors;
        tokio::spawn(async move {
            while let Some(message) = inbox.recv().await {
                if pump_closed.load(Ordering::Acquire) {
                    break;
                }
                // Wait for a handler before delivering; registration after
                // construction must not drop messages.
                let handler = loop {
                    let current = pump_slot
                        .handler
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .clone();
                    match current {
                        Some(handler) => break handler,
                        None => pump_slot.ready.notified().await,
                    }
                };
                if let Err(e) = handler(message).await {
                    if strict {
                        panic!("local transport handler failed: {e:#}");
                    }
                    tracing::warn!("Local transport handler failed: {:#}", e);
                }
            }
            tracing::debug!("Local transport delivery task finished");
        });

        Self {
            to_peer,
            slot,
            origin: options.origin,
            closed,
        }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&self, message: Message) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(anyhow!("local transport is closed"));
        }
        self.to_peer
            .send(message)
            .await
            .map_err(|_| anyhow!("local transport peer is gone"))
    }

    fn on_message(&self, handler: MessageHandler) {
        *self
            .slot
            .handler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handler);
        self.slot.ready.notify_one();
    }

    fn origin(&self) -> Option<String> {
        self.origin.clone()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// An in-process peer reachable through [`LocalTransport::for_endpoint`].
#[async_trait]
pub trait LocalEndpoint: Send + Sync {
    async fn receive(&self, message: Message) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{RpcNotification, RpcRequest};
    use tokio::sync::mpsc as tokio_mpsc;

    fn request(id: u64, method: &str) -> Message {
        Message::Request(RpcRequest {
            id,
            method: method.into(),
            params: None,
            origin: None,
        })
    }

    #[tokio::test]
    async fn pair_delivers_across_both_directions() {
        let (left, right) = LocalTransport::pair();
        let (seen_tx, mut seen_rx) = tokio_mpsc::channel(8);

        right.on_message(Arc::new(move |message| {
            let seen = seen_tx.clone();
            Box::pin(async move {
                seen.send(message).await?;
                Ok(())
            })
        }));

        left.send(request(1, "echo")).await.unwrap();
        let delivered = seen_rx.recv().await.unwrap();
        assert_eq!(delivered, request(1, "echo"));
    }

    #[tokio::test]
    async fn messages_sent_before_handler_registration_are_not_lost() {
        let (left, right) = LocalTransport::pair();
        left.send(request(1, "early")).await.unwrap();

        let (seen_tx, mut seen_rx) = tokio_mpsc::channel(8);
        right.on_message(Arc::new(move |message| {
            let seen = seen_tx.clone();
            Box::pin(async move {
                seen.send(message).await?;
                Ok(())
            })
        }));

        assert_eq!(seen_rx.recv().await.unwrap(), request(1, "early"));
    }

    #[tokio::test]
    async fn closed_transport_rejects_sends() {
        let (left, _right) = LocalTransport::pair();
        left.close().await.unwrap();
        assert!(left.send(request(1, "echo")).await.is_err());
    }

    #[tokio::test]
    async fn reported_origin_comes_from_options() {
        let (left, right) = LocalTransport::pair_with(
            LocalTransportOptions {
                origin: Some("https://app.test".into()),
                ..Default::default()
            },
            LocalTransportOptions::default(),
        );
        assert_eq!(left.origin().as_deref(), Some("https://app.test"));
        assert_eq!(right.origin(), None);
    }

    #[tokio::test]
    async fn endpoint_wrapper_round_trips() {
        struct Echo {
            replies: tokio_mpsc::Sender<Message>,
        }

        #[async_trait]
        impl LocalEndpoint for Echo {
            async fn receive(&self, message: Message) -> Result<()> {
                self.replies.send(message).await?;
                Ok(())
            }
        }

        let (replies_tx, mut replies_rx) = tokio_mpsc::channel(8);
        let (transport, inject) = LocalTransport::for_endpoint(
            Arc::new(Echo { replies: replies_tx }),
            LocalTransportOptions::default(),
        );

        transport.send(request(3, "ping")).await.unwrap();
        assert_eq!(replies_rx.recv().await.unwrap(), request(3, "ping"));

        let (seen_tx, mut seen_rx) = tokio_mpsc::channel(8);
        transport.on_message(Arc::new(move |message| {
            let seen = seen_tx.clone();
            Box::pin(async move {
                seen.send(message).await?;
                Ok(())
            })
        }));
        inject
            .send(Message::Notification(RpcNotification {
                method: "warmup".into(),
                params: None,
            }))
            .await
            .unwrap();
        assert!(matches!(
            seen_rx.recv().await.unwrap(),
            Message::Notification(_)
        ));
    }
}

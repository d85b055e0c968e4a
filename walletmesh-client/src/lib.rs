//! # WalletMesh Client
//!
//! The application-side companion to `walletmesh-router`: a
//! [`provider::WalletProvider`] that speaks the `wm_*` protocol over any
//! [`walletmesh_router::Transport`], a typed [`ops::ChainOps`] builder for
//! composing multi-call batches, and a [`serializer::SerializerRegistry`]
//! for methods whose payloads need a wire representation.
//!
//! ## Core Components
//!
//! - [`provider::WalletProvider`]: session lifecycle, permissions, and
//!   wallet calls from the caller's perspective.
//! - [`ops::ChainOps`]: fluent accumulation of calls with a statically-typed
//!   result tuple.
//! - [`serializer::SerializerRegistry`]: optional per-method params/result
//!   transforms, applied transparently by the provider.

pub mod error;
pub mod ops;
pub mod provider;
pub mod serializer;

pub use error::ProviderError;
pub use ops::ChainOps;
pub use provider::{ConnectResult, ProviderOptions, ReconnectResult, WalletProvider};
pub use serializer::{MethodSerializer, SerializerRegistry, TransformFn};

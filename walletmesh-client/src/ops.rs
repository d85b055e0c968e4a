//! # Operation Builder
//!
//! A fluent, chain-bound accumulator of wallet calls whose result type grows
//! with every queued call: one call executes via the single-call path and
//! yields a bare value, two or more execute as one bulk call and yield a
//! tuple mirroring the call order.
//!
//! ```ignore
//! let (balance, nonce): (u128, u64) = provider
//!     .ops("eip155:1".into())
//!     .call::<u128>("eth_getBalance", Some(json!([address])))
//!     .call::<u64>("eth_getTransactionCount", Some(json!([address])))
//!     .execute(None)
//!     .await?;
//! ```
//!
//! Builders are persistent: `call` consumes the receiver and returns a new
//! builder, and a cloned builder can be extended independently.

use crate::error::ProviderError;
use crate::provider::WalletProvider;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;
use std::time::Duration;
use walletmesh_router::{ChainId, MethodCall, RouterError};

/// A single queued call's eventual result type.
pub struct Single<R>(PhantomData<fn() -> R>);

/// Computes the accumulated result type after appending one call returning
/// `R`: nothing becomes [`Single<R>`], a single becomes a pair, a tuple grows
/// by one element (up to eight calls).
pub trait Append<R> {
    type Out;
}

impl<R> Append<R> for () {
    type Out = Single<R>;
}

impl<A, R> Append<R> for Single<A> {
    type Out = (A, R);
}

macro_rules! impl_append {
    ($($name:ident),+ => $next:ident) => {
        impl<$($name,)+ $next> Append<$next> for ($($name,)+) {
            type Out = ($($name,)+ $next,);
        }
    };
}

impl_append!(A, B => C);
impl_append!(A, B, C => D);
impl_append!(A, B, C, D => E);
impl_append!(A, B, C, D, E => F);
impl_append!(A, B, C, D, E, F => G);
impl_append!(A, B, C, D, E, F, G => H);

/// Decodes an ordered bulk-call result array into a typed tuple.
pub trait CallResults: Sized {
    const LEN: usize;

    fn from_results(values: Vec<Value>) -> Result<Self, ProviderError>;
}

fn decode<R: DeserializeOwned>(
    values: &mut std::vec::IntoIter<Value>,
) -> Result<R, ProviderError> {
    let value = values
        .next()
        .ok_or_else(|| ProviderError::MalformedResponse("missing bulk call result".into()))?;
    serde_json::from_value(value).map_err(|e| ProviderError::MalformedResponse(e.to_string()))
}

macro_rules! impl_call_results {
    ($len:expr; $($name:ident),+) => {
        impl<$($name: DeserializeOwned),+> CallResults for ($($name,)+) {
            const LEN: usize = $len;

            fn from_results(values: Vec<Value>) -> Result<Self, ProviderError> {
                if values.len() != Self::LEN {
                    return Err(ProviderError::MalformedResponse(format!(
                        "expected {} bulk call results, received {}",
                        Self::LEN,
                        values.len()
                    )));
                }
                let mut values = values.into_iter();
                Ok(($(decode::<$name>(&mut values)?,)+))
            }
        }
    };
}

impl_call_results!(2; A, B);
impl_call_results!(3; A, B, C);
impl_call_results!(4; A, B, C, D);
impl_call_results!(5; A, B, C, D, E);
impl_call_results!(6; A, B, C, D, E, F);
impl_call_results!(7; A, B, C, D, E, F, G);
impl_call_results!(8; A, B, C, D, E, F, G, H);

/// A chain-bound queue of calls. Obtained from [`WalletProvider::ops`].
pub struct ChainOps<'a, Results = ()> {
    provider: &'a WalletProvider,
    chain_id: ChainId,
    calls: Vec<MethodCall>,
    _results: PhantomData<fn() -> Results>,
}

impl<'a> ChainOps<'a, ()> {
    pub(crate) fn new(provider: &'a WalletProvider, chain_id: ChainId) -> Self {
        Self {
            provider,
            chain_id,
            calls: Vec::new(),
            _results: PhantomData,
        }
    }

    /// An empty queue has nothing to execute.
    pub async fn execute(self, _timeout: Option<Duration>) -> Result<(), ProviderError> {
        Err(RouterError::InvalidRequest("No calls queued".into()).into())
    }
}

impl<'a, Results> ChainOps<'a, Results> {
    /// Appends one call whose result will decode as `R`.
    pub fn call<R>(
        mut self,
        method: impl Into<String>,
        params: Option<Value>,
    ) -> ChainOps<'a, Results::Out>
    where
        Results: Append<R>,
    {
        self.calls.push(MethodCall::new(method, params));
        ChainOps {
            provider: self.provider,
            chain_id: self.chain_id,
            calls: self.calls,
            _results: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

impl<'a, Results> Clone for ChainOps<'a, Results> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider,
            chain_id: self.chain_id.clone(),
            calls: self.calls.clone(),
            _results: PhantomData,
        }
    }
}

impl<'a, R: DeserializeOwned> ChainOps<'a, Single<R>> {
    /// Executes the single queued call and returns its bare result.
    /// `timeout` bounds the wallet leg; `None` uses the configured defaults.
    pub async fn execute(self, timeout: Option<Duration>) -> Result<R, ProviderError> {
        let mut calls = self.calls;
        let call = calls
            .pop()
            .ok_or_else(|| ProviderError::MalformedResponse("call queue is empty".into()))?;
        let result = self.provider.call(&self.chain_id, call, timeout).await?;
        serde_json::from_value(result).map_err(|e| ProviderError::MalformedResponse(e.to_string()))
    }
}

impl<'a, Results: CallResults> ChainOps<'a, Results> {
    /// Executes the queued calls as one ordered bulk call and returns the
    /// typed result tuple. `timeout` bounds each sub-call's wallet leg.
    pub async fn execute(self, timeout: Option<Duration>) -> Result<Results, ProviderError> {
        let results = self
            .provider
            .bulk_call(&self.chain_id, self.calls, timeout)
            .await?;
        Results::from_results(results)
    }
}

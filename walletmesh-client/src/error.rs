use thiserror::Error;
use walletmesh_router::RouterError;

/// Everything a provider call can fail with. Router-side failures keep their
/// typed form so callers can branch on [`RouterError::code`].
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Router(#[from] RouterError),

    #[error("Serializer for method '{method}' failed: {source:#}")]
    Serializer {
        method: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Transport failure: {0:#}")]
    Transport(#[from] anyhow::Error),

    #[error("Malformed router response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// The router error, if this failure is one.
    pub fn as_router(&self) -> Option<&RouterError> {
        match self {
            Self::Router(error) => Some(error),
            _ => None,
        }
    }
}

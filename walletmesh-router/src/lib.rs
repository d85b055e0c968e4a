//! # WalletMesh Router
//!
//! A routing layer that lets one application talk to many blockchain wallets
//! over a single JSON-RPC style connection. The application establishes a
//! *session*, is granted *permissions* per chain and method, and then proxies
//! wallet calls through the router, which forwards them to the wallet
//! registered for the requested chain.
//!
//! ## Core Components
//!
//! - [`router::Router`]: the orchestrator. Owns the wallet registry, serves
//!   the application connection, and dispatches the `wm_*` method surface.
//! - [`session::SessionStore`]: pluggable session persistence, with in-memory
//!   and `sled`-backed implementations.
//! - [`permissions::PermissionManager`]: pluggable grant/approval policy,
//!   consulted on connect and on every wallet-bound call.
//! - [`middleware`]: the interceptor pipeline every inbound request traverses
//!   (origin binding, session resolution, permission checks).
//! - [`transport`]: the message-passing seam. [`transport::Transport`] is the
//!   raw duplex endpoint; [`transport::TransportClient`] adds request/response
//!   correlation and timeouts on top of it.
//! - [`registry`]: per-chain wallet proxies and the registry that owns them.
//!
//! ## Typical wiring
//!
//! ```ignore
//! let sessions = Arc::new(MemorySessionStore::new());
//! let permissions = Arc::new(AllowAllPermissions::new());
//! let router = Router::new(sessions, permissions, RouterConfig::default());
//!
//! router.add_wallet("eip155:1".into(), wallet_transport)?;
//! router.serve(app_transport);
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod middleware;
pub mod permissions;
pub mod registry;
pub mod router;
pub mod session;
pub mod transport;
pub mod types;

pub use config::RouterConfig;
pub use error::{RouterError, RpcErrorPayload};
pub use events::RouterEvent;
pub use permissions::{AllowAllPermissions, PermissionManager, PolicyPermissions};
pub use router::Router;
pub use session::{MemorySessionStore, SessionStore, SledSessionStore};
pub use transport::{Message, RpcNotification, RpcRequest, RpcResponse, Transport, TransportClient};
pub use types::{ChainId, ChainPermissions, MethodCall, RouterContext, Session};

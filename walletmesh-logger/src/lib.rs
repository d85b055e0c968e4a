//! Shared `tracing` initialization for WalletMesh binaries and tests.

pub mod logging;

pub use logging::{init, LogConfig, LogFormat, LogOutput};

//! Monitls Core Library
//!
//! TLS transport security for monitoring components: collectors, relays and
//! agents authenticate each other with certificates or pre-shared keys over
//! a plain byte stream.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Domain-specific error types
//! - [`tls`] - Material loading, suite selection, PSK resolution and the
//!   connect/accept handshakes
//! - [`stats`] - Connection counters and the statistics extension hook
//!
//! # Example
//!
//! ```rust,ignore
//! use monitls_core::config::AppConfig;
//! use monitls_core::tls::TlsContext;
//!
//! let config = AppConfig::from_file("monitls.yaml")?;
//! let context = TlsContext::builder(&config.tls, config.role).build()?;
//! let connection = context.accept(stream, config.tls.accept_policy()?.unwrap_or_default())?;
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod stats;
pub mod tls;

/// Test utilities for integration testing.
///
/// This module is only available when compiling tests or when the `testing` feature is enabled.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use config::{AppConfig, ProcessRole, TlsConfig};
pub use error::{ConfigError, ConfigResult, TlsError, TlsResult};
pub use tls::{ConnectRequest, ConnectionAttributes, ConnectionMode, TlsConnection, TlsContext};

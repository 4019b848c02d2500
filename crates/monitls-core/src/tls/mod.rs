//! TLS transport for monitoring components.
//!
//! A [`TlsContext`] is built once per process from [`TlsConfig`]: it loads
//! CA certificates, CRLs, the own certificate and key and the local PSK,
//! validates them against the process role, and derives the certificate,
//! PSK and combined cipher suite sets. Workers then call
//! [`TlsContext::connect`] or [`TlsContext::accept`] on a byte stream.
//!
//! # Usage
//!
//! ```rust,ignore
//! use monitls_core::config::{ProcessRole, TlsConfig};
//! use monitls_core::tls::{ConnectRequest, TlsContext};
//!
//! let context = TlsContext::builder(&config, ProcessRole::ActiveProxy).build()?;
//! let mut connection = context.connect(tcp_stream, ConnectRequest::psk())?;
//! println!("{}", connection.attributes().mode());
//! ```
//!
//! [`TlsConfig`]: crate::config::TlsConfig

pub mod attributes;
pub mod backend;
pub mod connection;
pub mod context;
pub mod material;
pub mod mode;
pub mod psk;
pub mod random;
pub mod secret;
pub mod suites;
pub mod validate;

pub use attributes::ConnectionAttributes;
pub use backend::{DefaultBackend, OpenSslBackend, TlsBackend};
pub use connection::{ConnectRequest, PskOffer, TlsConnection};
pub use context::{init_parent, TlsContext, TlsContextBuilder};
pub use material::MaterialStore;
pub use mode::{AcceptModes, ConnectionMode};
pub use psk::{FilePskStore, InMemoryPskStore, PskLookup, PskResolver};
pub use secret::SecretBytes;
pub use suites::{CipherSuiteSet, SuiteKind};
pub use validate::TlsPolicy;

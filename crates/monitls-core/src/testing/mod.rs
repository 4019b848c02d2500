//! Test utilities.
//!
//! - [`pki`] - throwaway CAs, leaf certificates and material directories
//! - [`RecordingBackend`] - a backend double that records session bindings
//!
//! # Example
//!
//! ```rust,ignore
//! use monitls_core::testing::{pki::MaterialDir, RecordingBackend};
//!
//! let dir = MaterialDir::new();
//! let config = dir.psk_config("agent-1", "000102030405060708090a0b0c0d0e0f");
//! let backend = RecordingBackend::new();
//! let context = TlsContext::builder(&config, ProcessRole::Agent)
//!     .backend(backend.clone())
//!     .build()?;
//! ```

pub mod pki;
pub mod recording;

pub use recording::{
    RecordedPsk, RecordedStart, RecordingBackend, RecordingSession, ScriptedHandshake,
    RECORDING_CATALOG,
};

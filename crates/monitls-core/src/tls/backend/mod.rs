//! The seam between connection logic and the TLS engine.
//!
//! A backend knows its suite catalog, can vouch for its generator, and turns a
//! byte stream plus a [`SessionBinding`] into a session that is stepped until
//! the handshake completes. Exactly one backend is compiled in as
//! [`DefaultBackend`]; tests swap in a recording double.

use std::io::{self, Read, Write};
use std::sync::Arc;

use ::openssl::pkey::{PKey, Private};
use ::openssl::x509::{X509Crl, X509};

use crate::error::{BackendError, CertificateProblems};
use crate::tls::psk::PskResolver;
use crate::tls::secret::SecretBytes;
use crate::tls::suites::{CipherSuiteSet, SuiteInfo};

pub mod openssl;

pub use self::openssl::OpenSslBackend;

/// Backend used by [`crate::tls::TlsContext`] unless another is given.
pub type DefaultBackend = OpenSslBackend;

/// Which end of the handshake a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

/// Own certificate and the trust anchors used to verify the peer.
#[derive(Clone, Copy)]
pub struct CertificateBinding<'a> {
    /// Own certificate first, then chain certificates.
    pub chain: &'a [X509],
    pub key: &'a PKey<Private>,
    pub ca_certificates: &'a [X509],
    pub crls: &'a Arc<Vec<X509Crl>>,
}

/// How a session obtains its PSK.
pub enum PskBinding {
    /// No PSK suites are offered.
    None,
    /// Client side: present this identity and key.
    Offer { identity: Vec<u8>, key: SecretBytes },
    /// Server side: resolve whatever identity the client presents.
    Resolve(Arc<PskResolver>),
}

/// Everything bound to a session before its handshake starts.
pub struct SessionBinding<'a> {
    pub side: Side,
    pub suites: &'a CipherSuiteSet,
    pub certificate: Option<CertificateBinding<'a>>,
    pub psk: PskBinding,
}

/// Outcome of one handshake step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeStep {
    /// Handshake finished.
    Done,
    /// Transport would block on read; step again.
    WantRead,
    /// Transport would block on write; step again.
    WantWrite,
    /// Handshake failed for good.
    Failed(BackendError),
}

/// A session created by [`TlsBackend::start`].
pub trait BackendSession: Read + Write {
    /// Advance the handshake.
    fn step(&mut self) -> HandshakeStep;

    /// Backend name of the negotiated suite.
    fn negotiated_suite(&self) -> Option<String>;

    /// Problems found while verifying the peer certificate.
    fn certificate_problems(&self) -> CertificateProblems;

    /// PSK identity in use: the one offered on the client side, the one
    /// presented by the peer on the server side.
    fn psk_identity(&self) -> Option<Vec<u8>>;

    /// Server side: identity presented by the peer that could not be
    /// resolved to a key.
    fn rejected_psk_identity(&self) -> Option<Vec<u8>>;

    /// DER encoding of the peer's leaf certificate.
    fn peer_certificate_der(&self) -> Option<Vec<u8>>;

    /// Send close notify.
    fn close_notify(&mut self) -> io::Result<()>;
}

/// A TLS engine.
pub trait TlsBackend: Send + Sync {
    type Session<S: Read + Write>: BackendSession;

    fn name(&self) -> &'static str;

    /// Every suite the engine can negotiate, in preference order.
    fn suite_catalog(&self) -> &[SuiteInfo];

    /// Check that the engine's generator is seeded and produces output.
    ///
    /// Seeding itself is the engine's business; this is a health check run
    /// once per process.
    ///
    /// # Errors
    ///
    /// Returns an error if the generator cannot produce output.
    fn check_random(&self) -> Result<(), BackendError>;

    /// Set up a session over `stream`. The handshake has not started yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the binding cannot be applied.
    fn start<S: Read + Write>(
        &self,
        stream: S,
        binding: SessionBinding<'_>,
    ) -> Result<Self::Session<S>, BackendError>;
}

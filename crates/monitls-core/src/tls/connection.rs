//! Established connections and the handshake driver.

use std::fmt;
use std::io::{self, Read, Write};

use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::error::{TlsError, TlsResult};
use crate::tls::attributes::ConnectionAttributes;
use crate::tls::backend::{BackendSession, DefaultBackend, HandshakeStep, SessionBinding, TlsBackend};
use crate::tls::mode::ConnectionMode;
use crate::tls::suites;

/// Identity and hex key given explicitly to [`ConnectRequest::psk_with`].
pub struct PskOffer {
    pub identity: Vec<u8>,
    pub psk_hex: Zeroizing<String>,
}

impl fmt::Debug for PskOffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PskOffer")
            .field("identity", &String::from_utf8_lossy(&self.identity))
            .finish_non_exhaustive()
    }
}

/// What an outgoing connection should negotiate.
#[derive(Debug)]
pub enum ConnectRequest {
    Unencrypted,
    /// Certificate authentication, optionally pinning the server's issuer
    /// and subject.
    Certificate {
        issuer: Option<String>,
        subject: Option<String>,
    },
    /// PSK authentication with the local PSK, or with `offer` when given.
    Psk { offer: Option<PskOffer> },
}

impl ConnectRequest {
    #[must_use]
    pub fn certificate() -> Self {
        Self::Certificate {
            issuer: None,
            subject: None,
        }
    }

    #[must_use]
    pub fn psk() -> Self {
        Self::Psk { offer: None }
    }

    /// PSK authentication with an identity and key fetched elsewhere.
    #[must_use]
    pub fn psk_with(identity: impl Into<Vec<u8>>, psk_hex: impl Into<String>) -> Self {
        Self::Psk {
            offer: Some(PskOffer {
                identity: identity.into(),
                psk_hex: Zeroizing::new(psk_hex.into()),
            }),
        }
    }

    /// Request for a `TLSConnect` value, without pins or explicit keys.
    #[must_use]
    pub fn from_mode(mode: ConnectionMode) -> Self {
        match mode {
            ConnectionMode::Unencrypted => Self::Unencrypted,
            ConnectionMode::Certificate => Self::certificate(),
            ConnectionMode::Psk => Self::psk(),
        }
    }

    /// Expect the server certificate to be issued by `issuer`.
    #[must_use]
    pub fn with_issuer(mut self, expected: impl Into<String>) -> Self {
        if let Self::Certificate { issuer, .. } = &mut self {
            *issuer = Some(expected.into());
        }
        self
    }

    /// Expect the server certificate subject to be `subject`.
    #[must_use]
    pub fn with_subject(mut self, expected: impl Into<String>) -> Self {
        if let Self::Certificate { subject, .. } = &mut self {
            *subject = Some(expected.into());
        }
        self
    }

    pub fn mode(&self) -> ConnectionMode {
        match self {
            Self::Unencrypted => ConnectionMode::Unencrypted,
            Self::Certificate { .. } => ConnectionMode::Certificate,
            Self::Psk { .. } => ConnectionMode::Psk,
        }
    }
}

enum Channel<S, T> {
    Plain(S),
    Tls(T),
}

/// A connection ready for application data.
pub struct TlsConnection<S: Read + Write, B: TlsBackend = DefaultBackend> {
    channel: Channel<S, B::Session<S>>,
    attributes: ConnectionAttributes,
}

impl<S: Read + Write, B: TlsBackend> TlsConnection<S, B> {
    /// Wrap a stream that carries no TLS.
    pub fn unencrypted(stream: S) -> Self {
        Self {
            channel: Channel::Plain(stream),
            attributes: ConnectionAttributes::unencrypted(),
        }
    }

    pub fn attributes(&self) -> &ConnectionAttributes {
        &self.attributes
    }

    pub fn mode(&self) -> ConnectionMode {
        self.attributes.mode()
    }

    /// Send close notify, if encrypted, and drop the stream.
    pub fn close(mut self) {
        if let Channel::Tls(session) = &mut self.channel {
            if let Err(e) = session.close_notify() {
                debug!(error = %e, "cannot send close notify");
            }
        }
    }
}

impl<S: Read + Write, B: TlsBackend> fmt::Debug for TlsConnection<S, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConnection")
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}

impl<S: Read + Write, B: TlsBackend> Read for TlsConnection<S, B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.channel {
            Channel::Plain(stream) => stream.read(buf),
            Channel::Tls(session) => session.read(buf),
        }
    }
}

impl<S: Read + Write, B: TlsBackend> Write for TlsConnection<S, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.channel {
            Channel::Plain(stream) => stream.write(buf),
            Channel::Tls(session) => session.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.channel {
            Channel::Plain(stream) => stream.flush(),
            Channel::Tls(session) => session.flush(),
        }
    }
}

/// Run a handshake over `stream` and classify the result.
///
/// The mode comes from the negotiated suite, not from what was asked for.
/// A certificate connection with any verification problem is closed and
/// reported as [`TlsError::PeerTrust`]. A handshake that failed because the
/// peer's PSK identity could not be resolved is reported as
/// [`TlsError::UnknownPskIdentity`].
///
/// Would-block steps are retried without a bound. On a non-blocking stream
/// the loop only ends when the handshake completes or the socket layer's
/// own timeout turns the stall into an error.
pub(crate) fn establish<S: Read + Write, B: TlsBackend>(
    backend: &B,
    stream: S,
    binding: SessionBinding<'_>,
) -> TlsResult<TlsConnection<S, B>> {
    let mut session = backend.start(stream, binding).map_err(TlsError::Setup)?;

    loop {
        match session.step() {
            HandshakeStep::Done => break,
            HandshakeStep::WantRead | HandshakeStep::WantWrite => {
                trace!("handshake would block, retrying");
                std::thread::yield_now();
            }
            HandshakeStep::Failed(e) => {
                return Err(match session.rejected_psk_identity() {
                    Some(identity) => TlsError::UnknownPskIdentity(identity),
                    None => TlsError::Handshake(e),
                });
            }
        }
    }

    let suite = session
        .negotiated_suite()
        .ok_or_else(|| TlsError::UnknownSuite(String::new()))?;
    let info = suites::find(backend.suite_catalog(), &suite)
        .ok_or_else(|| TlsError::UnknownSuite(suite.clone()))?;

    let attributes = if info.key_exchange.is_psk() {
        ConnectionAttributes::psk(session.psk_identity().unwrap_or_default())
    } else {
        let problems = session.certificate_problems();
        if !problems.is_empty() {
            let _ = session.close_notify();
            return Err(TlsError::PeerTrust(problems));
        }
        let der = session
            .peer_certificate_der()
            .ok_or_else(|| TlsError::PeerCertificate("peer sent no certificate".to_string()))?;
        ConnectionAttributes::certificate(&der)?
    };

    debug!(suite = %suite, mode = %attributes.mode(), "TLS handshake completed");

    Ok(TlsConnection {
        channel: Channel::Tls(session),
        attributes,
    })
}

/// Compare the peer certificate against expected issuer and subject.
pub(crate) fn check_peer_names(
    attributes: &ConnectionAttributes,
    issuer: Option<&str>,
    subject: Option<&str>,
) -> TlsResult<()> {
    let checks = [
        ("issuer", attributes.issuer(), issuer),
        ("subject", attributes.subject(), subject),
    ];
    for (field, actual, expected) in checks {
        let Some(expected) = expected else { continue };
        let actual = actual.unwrap_or_default();
        if actual != expected {
            return Err(TlsError::PeerIdentityMismatch {
                field,
                actual: actual.to_string(),
                expected: expected.to_string(),
            });
        }
    }
    Ok(())
}

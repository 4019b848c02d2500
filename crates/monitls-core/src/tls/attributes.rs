//! Identity facts of an established connection, for upstream authorization.

use x509_parser::parse_x509_certificate;

use crate::error::{TlsError, TlsResult};
use crate::tls::mode::ConnectionMode;

/// Read-only snapshot of how a connection was authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionAttributes {
    mode: ConnectionMode,
    psk_identity: Option<Vec<u8>>,
    issuer: Option<String>,
    subject: Option<String>,
}

impl ConnectionAttributes {
    #[must_use]
    pub fn unencrypted() -> Self {
        Self {
            mode: ConnectionMode::Unencrypted,
            psk_identity: None,
            issuer: None,
            subject: None,
        }
    }

    /// Attributes of a PSK connection negotiated with `identity`.
    #[must_use]
    pub fn psk(identity: Vec<u8>) -> Self {
        Self {
            mode: ConnectionMode::Psk,
            psk_identity: Some(identity),
            issuer: None,
            subject: None,
        }
    }

    /// Attributes of a certificate connection, from the peer's DER leaf.
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::PeerCertificate`] if the certificate does not parse.
    pub fn certificate(peer_der: &[u8]) -> TlsResult<Self> {
        let (_, cert) = parse_x509_certificate(peer_der)
            .map_err(|e| TlsError::PeerCertificate(e.to_string()))?;

        Ok(Self {
            mode: ConnectionMode::Certificate,
            psk_identity: None,
            issuer: Some(cert.issuer().to_string()),
            subject: Some(cert.subject().to_string()),
        })
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    /// Negotiated PSK identity, exactly as presented. Not NUL terminated.
    pub fn psk_identity(&self) -> Option<&[u8]> {
        self.psk_identity.as_deref()
    }

    /// PSK identity for logging.
    #[must_use]
    pub fn psk_identity_lossy(&self) -> Option<String> {
        self.psk_identity
            .as_deref()
            .map(|identity| String::from_utf8_lossy(identity).into_owned())
    }

    /// Issuer of the peer certificate.
    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    /// Subject of the peer certificate.
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::pki::TestPki;

    #[test]
    fn test_psk_attributes() {
        let attributes = ConnectionAttributes::psk(b"agent-0123456789".to_vec());
        assert_eq!(attributes.mode(), ConnectionMode::Psk);
        assert_eq!(attributes.psk_identity(), Some(&b"agent-0123456789"[..]));
        assert_eq!(
            attributes.psk_identity_lossy().as_deref(),
            Some("agent-0123456789")
        );
        assert!(attributes.issuer().is_none());
    }

    #[test]
    fn test_unencrypted_has_no_identity() {
        let attributes = ConnectionAttributes::unencrypted();
        assert_eq!(attributes.mode(), ConnectionMode::Unencrypted);
        assert!(attributes.psk_identity().is_none());
        assert!(attributes.subject().is_none());
    }

    #[test]
    fn test_certificate_names() {
        let pki = TestPki::new("Attributes CA");
        let leaf = pki.issue("collector.example");
        let der = leaf.certificate().to_der().unwrap();

        let attributes = ConnectionAttributes::certificate(&der).unwrap();
        assert_eq!(attributes.mode(), ConnectionMode::Certificate);
        assert!(attributes.issuer().unwrap().contains("CN=Attributes CA"));
        assert!(attributes.subject().unwrap().contains("CN=collector.example"));
    }

    #[test]
    fn test_garbage_certificate() {
        let err = ConnectionAttributes::certificate(b"not a certificate").unwrap_err();
        assert!(matches!(err, TlsError::PeerCertificate(_)));
    }
}

//! Domain error types for the TLS transport layer.
//!
//! Uses `thiserror` for ergonomic error definitions with proper context.
//!
//! Three families exist:
//!
//! - [`ConfigError`] is fatal. It is raised while a process prepares its TLS
//!   material and always names the parameter or file at fault.
//! - [`TlsError`] is per connection. A failed handshake only loses that one
//!   connection.
//! - [`BackendError`] carries the TLS engine's own diagnostic.

use std::fmt;

use thiserror::Error;

/// Errors raised while loading and cross-checking TLS configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Two parameters contradict each other.
    #[error("configuration parameter \"{defined}\" is defined but \"{missing}\" is not defined")]
    MissingCounterpart {
        defined: &'static str,
        missing: &'static str,
    },

    /// Own certificate configured without any CA material.
    #[error("configuration parameter \"TLSCertFile\" is defined but neither \"TLSCAFile\" nor \"TLSCAPath\" is defined")]
    CertificateWithoutCa,

    /// CA material configured without an own certificate and key.
    #[error("configuration parameter \"{0}\" is defined but \"TLSCertFile\" and \"TLSKeyFile\" are not defined")]
    CaWithoutCertificate(&'static str),

    /// CRL configured without an own certificate and key.
    #[error("configuration parameter \"TLSCRLFile\" is defined but \"TLSCertFile\" and \"TLSKeyFile\" are not defined")]
    CrlWithoutCertificate,

    /// Material is loaded but the process does not say how to use it.
    #[error("certificate or pre-shared key (PSK) is configured but parameter \"{0}\" is not defined")]
    PolicyMissing(&'static str),

    /// The policy asks for material that was not configured.
    #[error("parameter \"{parameter}\" value requires a {material} but it is not configured")]
    PolicyRequiresMaterial {
        parameter: &'static str,
        material: &'static str,
    },

    /// Unknown token in a `TLSConnect`/`TLSAccept` value.
    #[error("invalid value of \"{parameter}\" parameter: \"{value}\"")]
    InvalidPolicyValue {
        parameter: &'static str,
        value: String,
    },

    /// A material file could not be read.
    #[error("cannot read file \"{path}\": {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A material file was read but its content was rejected.
    #[error("cannot load {what} from \"{path}\": {message}")]
    MaterialLoad {
        what: &'static str,
        path: String,
        message: String,
    },

    /// Own certificate and private key do not belong together.
    #[error("private key in file \"{key_path}\" does not match certificate in file \"{cert_path}\"")]
    KeyMismatch { cert_path: String, key_path: String },

    /// PSK file holds no key.
    #[error("file \"{0}\" is empty")]
    EmptyPskFile(String),

    /// PSK file holds more hex digits than the maximum key allows.
    #[error("PSK in file \"{0}\" is too large")]
    PskTooLarge(String),

    /// PSK file holds something other than an even count of hex digits.
    #[error("invalid PSK in file \"{0}\"")]
    InvalidPsk(String),

    /// PSK identity is empty or longer than allowed.
    #[error("invalid \"TLSPSKIdentity\" value: {0}")]
    InvalidPskIdentity(String),

    /// PSK store file could not be parsed.
    #[error("invalid PSK store file \"{path}\" at line {line}: {message}")]
    PskStore {
        path: String,
        line: usize,
        message: String,
    },

    /// Failed to read configuration file.
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Invalid address format.
    #[error("invalid address format: {0} (expected 'host:port')")]
    InvalidAddress(String),

    /// Connection counters could not be registered.
    #[error("cannot register TLS statistics: {0}")]
    Metrics(#[from] prometheus::Error),

    /// The TLS engine refused to initialize.
    #[error("cannot initialize TLS backend: {0}")]
    Backend(#[from] BackendError),
}

/// Verification problems found on a peer certificate.
///
/// Collected as a set so that every problem is reported at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CertificateProblems(u8);

impl CertificateProblems {
    pub const EXPIRED: Self = Self(0x01);
    pub const REVOKED: Self = Self(0x02);
    pub const CN_MISMATCH: Self = Self(0x04);
    pub const NOT_TRUSTED: Self = Self(0x08);

    const LABELS: [(Self, &'static str); 4] = [
        (Self::EXPIRED, "expired"),
        (Self::REVOKED, "revoked"),
        (Self::CN_MISMATCH, "Common Name mismatch"),
        (Self::NOT_TRUSTED, "not trusted"),
    ];

    /// No problems.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0x0f)
    }
}

impl std::ops::BitOr for CertificateProblems {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for CertificateProblems {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (flag, label) in Self::LABELS {
            if self.contains(flag) {
                if !first {
                    f.write_str(", ")?;
                }
                f.write_str(label)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Errors that end a single connection attempt.
#[derive(Error, Debug)]
pub enum TlsError {
    /// Suite set or key for the requested mode was never prepared.
    ///
    /// `operation` reads as a prefix, e.g. "connect with TLS and".
    #[error("cannot {operation} {material}: no valid {material} loaded")]
    NotReady {
        operation: &'static str,
        material: &'static str,
    },

    /// Nothing in the accept mask can be served with TLS.
    #[error("cannot accept TLS connection: no TLS connection type is allowed")]
    NoTlsModeAllowed,

    /// Caller supplied a PSK that does not decode.
    #[error("invalid pre-shared key")]
    InvalidPsk,

    /// Backend refused to set up the session.
    #[error("cannot set up TLS session: {0}")]
    Setup(BackendError),

    /// Handshake failed before completion.
    #[error("TLS handshake failed: {0}")]
    Handshake(BackendError),

    /// Handshake completed but the peer certificate failed verification.
    #[error("invalid peer certificate: {0}")]
    PeerTrust(CertificateProblems),

    /// Peer presented a PSK identity that no source could resolve.
    #[error("unknown PSK identity \"{}\"", String::from_utf8_lossy(.0))]
    UnknownPskIdentity(Vec<u8>),

    /// Peer certificate issuer or subject differs from the expected value.
    #[error("peer certificate {field} \"{actual}\" does not match \"{expected}\"")]
    PeerIdentityMismatch {
        field: &'static str,
        actual: String,
        expected: String,
    },

    /// Peer certificate could not be inspected.
    #[error("cannot inspect peer certificate: {0}")]
    PeerCertificate(String),

    /// Negotiated suite does not map to a connection mode.
    #[error("negotiated cipher suite \"{0}\" is not recognized")]
    UnknownSuite(String),

    /// Transport failure after the handshake.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),
}

impl TlsError {
    /// Whether the peer could not be authenticated, as opposed to the
    /// negotiation itself failing.
    #[must_use]
    pub fn is_peer_trust_failure(&self) -> bool {
        matches!(
            self,
            Self::PeerTrust(_)
                | Self::UnknownPskIdentity(_)
                | Self::PeerIdentityMismatch { .. }
                | Self::PeerCertificate(_)
        )
    }
}

/// Diagnostic reported by the TLS engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendError {
    message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for connection operations.
pub type TlsResult<T> = std::result::Result<T, TlsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_counterpart_display() {
        let err = ConfigError::MissingCounterpart {
            defined: "TLSCertFile",
            missing: "TLSKeyFile",
        };
        assert_eq!(
            err.to_string(),
            "configuration parameter \"TLSCertFile\" is defined but \"TLSKeyFile\" is not defined"
        );
    }

    #[test]
    fn test_problems_keep_fixed_order() {
        let problems = CertificateProblems::NOT_TRUSTED
            | CertificateProblems::EXPIRED
            | CertificateProblems::CN_MISMATCH;
        assert_eq!(
            problems.to_string(),
            "expired, Common Name mismatch, not trusted"
        );
    }

    #[test]
    fn test_all_problems() {
        let problems = CertificateProblems::from_bits(0xff);
        assert_eq!(
            TlsError::PeerTrust(problems).to_string(),
            "invalid peer certificate: expired, revoked, Common Name mismatch, not trusted"
        );
    }

    #[test]
    fn test_empty_problems() {
        let problems = CertificateProblems::empty();
        assert!(problems.is_empty());
        assert_eq!(problems.to_string(), "");
    }

    #[test]
    fn test_not_ready_display() {
        let err = TlsError::NotReady {
            operation: "connect with TLS and",
            material: "PSK",
        };
        assert_eq!(
            err.to_string(),
            "cannot connect with TLS and PSK: no valid PSK loaded"
        );
    }

    #[test]
    fn test_unknown_identity_display() {
        let err = TlsError::UnknownPskIdentity(b"agent-9".to_vec());
        assert_eq!(err.to_string(), "unknown PSK identity \"agent-9\"");
    }

    #[test]
    fn test_trust_failure_classification() {
        assert!(TlsError::PeerTrust(CertificateProblems::REVOKED).is_peer_trust_failure());
        assert!(TlsError::UnknownPskIdentity(b"agent-9".to_vec()).is_peer_trust_failure());
        assert!(!TlsError::InvalidPsk.is_peer_trust_failure());
        let alert = BackendError::new("alert");
        assert_eq!(alert.message(), "alert");
        assert!(!TlsError::Handshake(alert).is_peer_trust_failure());
    }
}

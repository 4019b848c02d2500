//! Cipher suite catalog types and the policy that derives the three suite sets.
//!
//! A suite is kept when it matches the set's authentication kind, does not
//! use RC4, is not flagged weak, and can be negotiated with TLS 1.2.

use std::fmt;

use tracing::debug;

use crate::config::ProcessRole;

/// Protocol versions a catalog entry may span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolVersion {
    Ssl3,
    Tls10,
    Tls11,
    Tls12,
    Tls13,
}

/// The only protocol version negotiated.
pub const FIXED_VERSION: ProtocolVersion = ProtocolVersion::Tls12;

/// Key exchange of a suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyExchange {
    Rsa,
    Dhe,
    Ecdhe,
    Psk,
    DhePsk,
    EcdhePsk,
    RsaPsk,
}

impl KeyExchange {
    /// Whether the exchange authenticates with a pre-shared key.
    #[must_use]
    pub const fn is_psk(self) -> bool {
        matches!(
            self,
            Self::Psk | Self::DhePsk | Self::EcdhePsk | Self::RsaPsk
        )
    }
}

/// Bulk encryption of a suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BulkCipher {
    Null,
    Rc4,
    Des,
    TripleDes,
    Aes128,
    Aes256,
    Camellia128,
    Camellia256,
    Aria128,
    Aria256,
    Chacha20,
}

/// One entry of a backend's suite catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuiteInfo {
    /// Name the backend understands.
    pub name: &'static str,
    pub key_exchange: KeyExchange,
    pub cipher: BulkCipher,
    /// Export grade, single DES, NULL encryption or otherwise below the
    /// minimum strength.
    pub weak: bool,
    pub min_version: ProtocolVersion,
    pub max_version: ProtocolVersion,
}

impl SuiteInfo {
    #[must_use]
    pub fn supports(&self, version: ProtocolVersion) -> bool {
        self.min_version <= version && version <= self.max_version
    }
}

/// Which authentication a suite set admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuiteKind {
    /// Certificate key exchanges only.
    Certificate,
    /// PSK key exchanges only.
    Psk,
    /// Either.
    Combined,
}

impl SuiteKind {
    fn admits(self, key_exchange: KeyExchange) -> bool {
        match self {
            Self::Certificate => !key_exchange.is_psk(),
            Self::Psk => key_exchange.is_psk(),
            Self::Combined => true,
        }
    }
}

impl fmt::Display for SuiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Certificate => "certificate",
            Self::Psk => "PSK",
            Self::Combined => "certificate and PSK",
        })
    }
}

/// Ordered, deduplicated suite names for one [`SuiteKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherSuiteSet {
    kind: SuiteKind,
    names: Vec<&'static str>,
}

impl CipherSuiteSet {
    /// Filter `catalog` down to the suites acceptable for `kind`.
    ///
    /// Catalog order is kept.
    #[must_use]
    pub fn select(catalog: &[SuiteInfo], kind: SuiteKind) -> Self {
        let mut names: Vec<&'static str> = Vec::new();
        for suite in catalog {
            let acceptable = kind.admits(suite.key_exchange)
                && suite.cipher != BulkCipher::Rc4
                && !suite.weak
                && suite.supports(FIXED_VERSION);
            if acceptable && !names.contains(&suite.name) {
                names.push(suite.name);
            }
        }
        Self { kind, names }
    }

    pub fn kind(&self) -> SuiteKind {
        self.kind
    }

    pub fn names(&self) -> &[&'static str] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| *n == name)
    }

    /// Whether the set can negotiate PSK suites.
    #[must_use]
    pub fn admits_psk(&self) -> bool {
        self.kind != SuiteKind::Certificate
    }

    /// Whether the set can negotiate certificate suites.
    #[must_use]
    pub fn admits_certificate(&self) -> bool {
        self.kind != SuiteKind::Psk
    }
}

/// The three suite sets of a process, each built at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuiteSets {
    certificate: Option<CipherSuiteSet>,
    psk: Option<CipherSuiteSet>,
    combined: Option<CipherSuiteSet>,
}

impl SuiteSets {
    /// Build the sets this process can use.
    ///
    /// Certificate and combined sets need an own certificate. PSK and
    /// combined sets need a local PSK or a role that resolves PSKs
    /// externally.
    #[must_use]
    pub fn build(
        catalog: &[SuiteInfo],
        has_certificate: bool,
        has_psk: bool,
        role: ProcessRole,
    ) -> Self {
        let psk_capable = has_psk || role.resolves_psk_externally();

        let make = |wanted: bool, kind: SuiteKind| {
            wanted.then(|| CipherSuiteSet::select(catalog, kind))
        };

        let sets = Self {
            certificate: make(has_certificate, SuiteKind::Certificate),
            psk: make(psk_capable, SuiteKind::Psk),
            combined: make(has_certificate && psk_capable, SuiteKind::Combined),
        };

        debug!(
            certificate = sets.certificate.as_ref().map_or(0, CipherSuiteSet::len),
            psk = sets.psk.as_ref().map_or(0, CipherSuiteSet::len),
            combined = sets.combined.as_ref().map_or(0, CipherSuiteSet::len),
            "built cipher suite sets"
        );
        sets
    }

    pub fn get(&self, kind: SuiteKind) -> Option<&CipherSuiteSet> {
        match kind {
            SuiteKind::Certificate => self.certificate.as_ref(),
            SuiteKind::Psk => self.psk.as_ref(),
            SuiteKind::Combined => self.combined.as_ref(),
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Look up a negotiated suite by name.
pub fn find<'a>(catalog: &'a [SuiteInfo], name: &str) -> Option<&'a SuiteInfo> {
    catalog.iter().find(|suite| suite.name == name)
}

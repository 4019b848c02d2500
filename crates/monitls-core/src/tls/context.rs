//! Process-wide TLS state and the connect/accept entry points.

use std::io::{Read, Write};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::{ProcessRole, TlsConfig};
use crate::error::{ConfigResult, TlsError, TlsResult};
use crate::stats::{StatsBuilder, TlsStats, TlsStatsSnapshot};
use crate::tls::backend::{
    CertificateBinding, DefaultBackend, PskBinding, SessionBinding, Side, TlsBackend,
};
use crate::tls::connection::{check_peer_names, establish, ConnectRequest, TlsConnection};
use crate::tls::material::MaterialStore;
use crate::tls::mode::{AcceptModes, ConnectionMode};
use crate::tls::psk::{PskLookup, PskResolver};
use crate::tls::random::RandomSource;
use crate::tls::secret::{SecretBytes, MAX_PSK_IDENTITY_LEN, MAX_PSK_LEN};
use crate::tls::suites::{CipherSuiteSet, SuiteKind, SuiteSets};
use crate::tls::validate::{validate, TlsPolicy};

const CONNECT: &str = "connect with TLS and";
const ACCEPT: &str = "accept TLS connection with";
const CERTIFICATE: &str = "certificate";
const PSK: &str = "PSK";

/// Per-process initialization before any child is started.
///
/// Nothing needs to happen before the children load their own material.
pub fn init_parent() {
    debug!("TLS parent initialization: nothing to do");
}

/// Builds a [`TlsContext`]; see [`TlsContext::builder`].
pub struct TlsContextBuilder<'a, B: TlsBackend> {
    config: &'a TlsConfig,
    role: ProcessRole,
    lookup: Option<Arc<dyn PskLookup>>,
    backend: B,
}

impl<'a, B: TlsBackend> TlsContextBuilder<'a, B> {
    /// Bind the external PSK store. Only roles that resolve PSKs of other
    /// hosts use it, and only the first binding counts.
    #[must_use]
    pub fn psk_lookup(mut self, lookup: Arc<dyn PskLookup>) -> Self {
        if !self.role.resolves_psk_externally() {
            warn!(role = %self.role, "external PSK lookup is not used by this role, ignoring");
        } else if self.lookup.is_some() {
            warn!("external PSK lookup is already bound, ignoring");
        } else {
            self.lookup = Some(lookup);
        }
        self
    }

    /// Use another TLS engine.
    pub fn backend<C: TlsBackend>(self, backend: C) -> TlsContextBuilder<'a, C> {
        TlsContextBuilder {
            config: self.config,
            role: self.role,
            lookup: self.lookup,
            backend,
        }
    }

    /// Load and validate material, build the suite sets and check the
    /// generator.
    ///
    /// # Errors
    ///
    /// Any error is fatal for the process; see
    /// [`TlsContext::init_child_or_exit`].
    pub fn build(self) -> ConfigResult<TlsContext<B>> {
        let material = MaterialStore::load(self.config)?;
        let policy = validate(self.config, &material, self.role)?;

        let suites = SuiteSets::build(
            self.backend.suite_catalog(),
            material.has_certificate(),
            material.has_psk(),
            self.role,
        );

        let local = material
            .local_psk()
            .map(|(identity, key)| (identity.to_vec(), key.clone()));
        let resolver = Arc::new(PskResolver::new(local, self.lookup));

        let random = RandomSource::check(&self.backend, self.role.name())?;

        info!(
            role = %self.role,
            backend = self.backend.name(),
            certificate = material.has_certificate(),
            psk = material.has_psk(),
            external_psk = resolver.has_external(),
            "TLS initialized"
        );

        Ok(TlsContext {
            role: self.role,
            policy,
            material,
            suites,
            resolver,
            random,
            stats: TlsStats::new()?,
            backend: self.backend,
        })
    }
}

/// Material, suite sets and PSK resolution of one process.
///
/// Built once, then shared read-only by every worker.
pub struct TlsContext<B: TlsBackend = DefaultBackend> {
    role: ProcessRole,
    policy: TlsPolicy,
    material: MaterialStore,
    suites: SuiteSets,
    resolver: Arc<PskResolver>,
    random: RandomSource,
    stats: TlsStats,
    backend: B,
}

impl TlsContext<DefaultBackend> {
    /// Start building the context of a `role` process from `config`.
    pub fn builder(config: &TlsConfig, role: ProcessRole) -> TlsContextBuilder<'_, DefaultBackend> {
        TlsContextBuilder {
            config,
            role,
            lookup: None,
            backend: DefaultBackend::default(),
        }
    }
}

impl<B: TlsBackend> TlsContext<B> {
    /// Build the context or terminate the process.
    pub fn init_child_or_exit(builder: TlsContextBuilder<'_, B>) -> Self {
        match builder.build() {
            Ok(context) => context,
            Err(e) => {
                error!(error = %e, "cannot initialize TLS");
                std::process::exit(1);
            }
        }
    }

    /// Release all material. Keys are wiped before they are freed.
    pub fn teardown(self) {
        debug!(role = %self.role, "TLS teardown");
    }

    pub fn role(&self) -> ProcessRole {
        self.role
    }

    pub fn policy(&self) -> TlsPolicy {
        self.policy
    }

    pub fn random(&self) -> &RandomSource {
        &self.random
    }

    /// Suite set of `kind`, if this process can use it.
    pub fn suites(&self, kind: SuiteKind) -> Option<&CipherSuiteSet> {
        self.suites.get(kind)
    }

    pub fn stats(&self) -> TlsStatsSnapshot {
        self.stats.snapshot()
    }

    /// Append connection counters to a statistics document.
    pub fn append_stats(&self, builder: &mut dyn StatsBuilder) {
        self.stats.append_to(builder);
    }

    /// Open a connection over `stream` as requested.
    ///
    /// # Errors
    ///
    /// Fails when the needed suite set or key was never loaded, when the
    /// handshake fails, or when the server is not trusted.
    pub fn connect<S: Read + Write>(
        &self,
        stream: S,
        request: ConnectRequest,
    ) -> TlsResult<TlsConnection<S, B>> {
        let result = self.try_connect(stream, request);
        self.record(&result, "connect");
        result
    }

    fn try_connect<S: Read + Write>(
        &self,
        stream: S,
        request: ConnectRequest,
    ) -> TlsResult<TlsConnection<S, B>> {
        let (suites, certificate, psk, pins) = match request {
            ConnectRequest::Unencrypted => return Ok(TlsConnection::unencrypted(stream)),
            ConnectRequest::Certificate { issuer, subject } => {
                let suites = self.suite_set(SuiteKind::Certificate, CONNECT, CERTIFICATE)?;
                let certificate = self.certificate_binding();
                (suites, certificate, PskBinding::None, (issuer, subject))
            }
            ConnectRequest::Psk { offer } => {
                let suites = self.suite_set(SuiteKind::Psk, CONNECT, PSK)?;
                let psk = match offer {
                    Some(offer) => {
                        if offer.identity.is_empty() || offer.identity.len() > MAX_PSK_IDENTITY_LEN
                        {
                            return Err(TlsError::InvalidPsk);
                        }
                        let key = SecretBytes::from_hex(&offer.psk_hex, MAX_PSK_LEN)
                            .map_err(|_| TlsError::InvalidPsk)?;
                        PskBinding::Offer {
                            identity: offer.identity,
                            key,
                        }
                    }
                    None => {
                        let (identity, key) =
                            self.material.local_psk().ok_or(TlsError::NotReady {
                                operation: CONNECT,
                                material: PSK,
                            })?;
                        PskBinding::Offer {
                            identity: identity.to_vec(),
                            key: key.clone(),
                        }
                    }
                };
                (suites, None, psk, (None, None))
            }
        };

        let binding = SessionBinding {
            side: Side::Client,
            suites,
            certificate,
            psk,
        };
        let connection = establish(&self.backend, stream, binding)?;

        if let Err(e) = check_peer_names(connection.attributes(), pins.0.as_deref(), pins.1.as_deref()) {
            connection.close();
            return Err(e);
        }
        Ok(connection)
    }

    /// Accept a connection over `stream`, ready for any TLS mode in `modes`.
    ///
    /// With both modes admitted and an own certificate loaded the peer may
    /// choose either; otherwise only PSK suites are offered.
    ///
    /// # Errors
    ///
    /// Fails when no TLS mode is admitted, when the needed suite set was
    /// never built, when the handshake fails, or when the client is not
    /// trusted.
    pub fn accept<S: Read + Write>(
        &self,
        stream: S,
        modes: AcceptModes,
    ) -> TlsResult<TlsConnection<S, B>> {
        let result = self.try_accept(stream, modes);
        self.record(&result, "accept");
        result
    }

    fn try_accept<S: Read + Write>(
        &self,
        stream: S,
        modes: AcceptModes,
    ) -> TlsResult<TlsConnection<S, B>> {
        let certificate = modes.contains(ConnectionMode::Certificate);
        let psk = modes.contains(ConnectionMode::Psk);

        let suites = match (certificate, psk) {
            (true, true) => match self.suites.get(SuiteKind::Combined) {
                Some(combined) => combined,
                None => self.suite_set(SuiteKind::Psk, ACCEPT, PSK)?,
            },
            (false, true) => self.suite_set(SuiteKind::Psk, ACCEPT, PSK)?,
            (true, false) => self.suite_set(SuiteKind::Certificate, ACCEPT, CERTIFICATE)?,
            (false, false) => return Err(TlsError::NoTlsModeAllowed),
        };

        let binding = SessionBinding {
            side: Side::Server,
            suites,
            certificate: if suites.admits_certificate() {
                self.certificate_binding()
            } else {
                None
            },
            psk: if suites.admits_psk() {
                PskBinding::Resolve(Arc::clone(&self.resolver))
            } else {
                PskBinding::None
            },
        };
        establish(&self.backend, stream, binding)
    }

    fn suite_set(
        &self,
        kind: SuiteKind,
        operation: &'static str,
        material: &'static str,
    ) -> TlsResult<&CipherSuiteSet> {
        self.suites
            .get(kind)
            .ok_or(TlsError::NotReady { operation, material })
    }

    fn certificate_binding(&self) -> Option<CertificateBinding<'_>> {
        let key = self.material.private_key()?;
        Some(CertificateBinding {
            chain: self.material.certificate_chain(),
            key,
            ca_certificates: self.material.ca_certificates(),
            crls: self.material.crls(),
        })
    }

    fn record<S: Read + Write>(&self, result: &TlsResult<TlsConnection<S, B>>, operation: &str) {
        match result {
            Ok(connection) => {
                let attributes = connection.attributes();
                self.stats.record_established(attributes.mode());
                debug!(
                    operation,
                    mode = %attributes.mode(),
                    psk_identity = attributes.psk_identity_lossy().as_deref(),
                    subject = attributes.subject(),
                    "connection established"
                );
            }
            Err(e) => {
                self.stats.record_failure(e);
                if e.is_peer_trust_failure() {
                    warn!(operation, error = %e, "peer rejected");
                } else {
                    debug!(operation, error = %e, "TLS connection failed");
                }
            }
        }
    }
}

impl<B: TlsBackend> Drop for TlsContext<B> {
    fn drop(&mut self) {
        self.suites.clear();
        self.material.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::pki::{MaterialDir, TestPki};
    use crate::testing::{RecordingBackend, ScriptedHandshake};

    const PSK_HEX: &str = "000102030405060708090a0b0c0d0e0f";

    fn psk_config(dir: &MaterialDir) -> TlsConfig {
        let mut config = dir.psk_config("agent-0001", PSK_HEX);
        config.tls_connect = Some("psk".to_string());
        config.tls_accept = Some("psk".to_string());
        config
    }

    #[test]
    fn test_build_with_psk() {
        let dir = MaterialDir::new();
        let config = psk_config(&dir);
        let backend = RecordingBackend::new();

        let context = TlsContext::builder(&config, ProcessRole::AgentDaemon)
            .backend(backend.clone())
            .build()
            .unwrap();

        assert!(context.suites(SuiteKind::Psk).is_some());
        assert!(context.suites(SuiteKind::Certificate).is_none());
        assert_eq!(context.policy().connect, Some(ConnectionMode::Psk));
        assert_eq!(backend.random_checks(), 1);
        assert_eq!(context.random().backend(), "recording");
        context.teardown();
    }

    #[test]
    fn test_lookup_ignored_for_leaf_role() {
        let dir = MaterialDir::new();
        let config = psk_config(&dir);
        let context = TlsContext::builder(&config, ProcessRole::AgentDaemon)
            .psk_lookup(Arc::new(crate::tls::psk::InMemoryPskStore::new()))
            .backend(RecordingBackend::new())
            .build()
            .unwrap();
        assert!(!context.resolver.has_external());
    }

    #[test]
    fn test_first_lookup_wins() {
        let mut first = crate::tls::psk::InMemoryPskStore::new();
        first.insert("host", "0a0b");
        let mut second = crate::tls::psk::InMemoryPskStore::new();
        second.insert("host", "0c0d");

        let context = TlsContext::builder(&TlsConfig::default(), ProcessRole::Server)
            .psk_lookup(Arc::new(first))
            .psk_lookup(Arc::new(second))
            .backend(RecordingBackend::new())
            .build()
            .unwrap();
        assert_eq!(context.resolver.resolve(b"host").unwrap().expose(), &[0x0a, 0x0b]);
    }

    #[test]
    fn test_build_fails_on_bad_material() {
        let dir = MaterialDir::new();
        let pki = TestPki::new("Context CA");
        let leaf = pki.issue("agent");
        let mut config = dir.certificate_config(&pki, &leaf);
        config.tls_key_file = None;

        let result = TlsContext::builder(&config, ProcessRole::Agent)
            .backend(RecordingBackend::new())
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_connect_without_certificate_is_not_ready() {
        let dir = MaterialDir::new();
        let config = psk_config(&dir);
        let context = TlsContext::builder(&config, ProcessRole::AgentDaemon)
            .backend(RecordingBackend::new())
            .build()
            .unwrap();

        let err = context
            .connect(std::io::Cursor::new(Vec::new()), ConnectRequest::certificate())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot connect with TLS and certificate: no valid certificate loaded"
        );
        assert_eq!(context.stats().handshake_failures, 1);
    }

    #[test]
    fn test_accept_without_tls_modes() {
        let context = TlsContext::builder(&TlsConfig::default(), ProcessRole::Server)
            .backend(RecordingBackend::new())
            .build()
            .unwrap();
        let err = context
            .accept(
                std::io::Cursor::new(Vec::new()),
                AcceptModes::only(ConnectionMode::Unencrypted),
            )
            .unwrap_err();
        assert!(matches!(err, TlsError::NoTlsModeAllowed));
    }

    #[test]
    fn test_unresolved_identity_is_trust_failure() {
        let dir = MaterialDir::new();
        let config = psk_config(&dir);
        let backend = RecordingBackend::new();
        let context = TlsContext::builder(&config, ProcessRole::AgentDaemon)
            .backend(backend.clone())
            .build()
            .unwrap();

        backend.script(ScriptedHandshake {
            rejected_psk_identity: Some(b"agent-0002".to_vec()),
            failure: Some("psk identity not found".to_string()),
            ..ScriptedHandshake::default()
        });
        let err = context
            .accept(
                std::io::Cursor::new(Vec::new()),
                AcceptModes::only(ConnectionMode::Psk),
            )
            .unwrap_err();

        assert_eq!(err.to_string(), "unknown PSK identity \"agent-0002\"");
        assert_eq!(context.stats().trust_failures, 1);
        assert_eq!(context.stats().handshake_failures, 0);
    }

    #[test]
    fn test_would_block_steps_are_retried() {
        let dir = MaterialDir::new();
        let config = psk_config(&dir);
        let backend = RecordingBackend::new();
        let context = TlsContext::builder(&config, ProcessRole::AgentDaemon)
            .backend(backend.clone())
            .build()
            .unwrap();

        backend.script(ScriptedHandshake {
            would_block: 3,
            ..ScriptedHandshake::default()
        });
        let connection = context
            .connect(std::io::Cursor::new(Vec::new()), ConnectRequest::psk())
            .unwrap();
        assert_eq!(connection.mode(), ConnectionMode::Psk);
    }

    #[test]
    fn test_explicit_psk_must_be_hex() {
        let context = TlsContext::builder(&TlsConfig::default(), ProcessRole::Server)
            .backend(RecordingBackend::new())
            .build()
            .unwrap();
        let err = context
            .connect(
                std::io::Cursor::new(Vec::new()),
                ConnectRequest::psk_with("host-1", "not hex"),
            )
            .unwrap_err();
        assert!(matches!(err, TlsError::InvalidPsk));
    }

    #[test]
    fn test_unencrypted_connect_counts() {
        let context = TlsContext::builder(&TlsConfig::default(), ProcessRole::Utility)
            .backend(RecordingBackend::new())
            .build()
            .unwrap();
        let connection = context
            .connect(std::io::Cursor::new(Vec::new()), ConnectRequest::Unencrypted)
            .unwrap();
        assert_eq!(connection.mode(), ConnectionMode::Unencrypted);
        assert_eq!(context.stats().unencrypted, 1);
    }
}

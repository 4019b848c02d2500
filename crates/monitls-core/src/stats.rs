//! Statistics reporting.
//!
//! The host process owns the statistics document; this crate only appends
//! key/value pairs to it through [`StatsBuilder`]. One extension callback
//! may be registered to contribute extra values.

use std::fmt;

use prometheus::{IntCounterVec, Opts, Registry};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::config::TlsConfig;
use crate::error::TlsError;
use crate::tls::mode::ConnectionMode;

/// Opaque sink for statistics values.
pub trait StatsBuilder {
    fn add_u64(&mut self, key: &str, value: u64);
    fn add_str(&mut self, key: &str, value: &str);
}

impl StatsBuilder for Map<String, Value> {
    fn add_u64(&mut self, key: &str, value: u64) {
        self.insert(key.to_string(), Value::from(value));
    }

    fn add_str(&mut self, key: &str, value: &str) {
        self.insert(key.to_string(), Value::from(value));
    }
}

/// Callback appending values for a connection configuration.
pub type StatsExtension = Box<dyn Fn(&mut dyn StatsBuilder, &TlsConfig) + Send + Sync>;

/// Holds the statistics extension, registered at most once.
#[derive(Default)]
pub struct StatsRegistry {
    extension: Option<StatsExtension>,
}

impl StatsRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the extension. A second registration is ignored.
    ///
    /// Returns whether `extension` was installed.
    pub fn register(&mut self, extension: StatsExtension) -> bool {
        if self.extension.is_some() {
            warn!("statistics extension is already registered, ignoring");
            return false;
        }
        self.extension = Some(extension);
        true
    }

    pub fn is_registered(&self) -> bool {
        self.extension.is_some()
    }

    /// Let the extension append its values, if one is registered.
    pub fn collect(&self, builder: &mut dyn StatsBuilder, config: &TlsConfig) {
        if let Some(extension) = &self.extension {
            extension(builder, config);
        }
    }
}

/// Connection counters of a TLS context.
///
/// Backed by a Prometheus registry so a host can export the same counters
/// that [`TlsStats::append_to`] reports.
pub struct TlsStats {
    /// The Prometheus registry.
    registry: Registry,

    /// Established connections by mode.
    connections: IntCounterVec,

    /// Failed connection attempts by reason.
    failures: IntCounterVec,
}

/// Point-in-time copy of [`TlsStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TlsStatsSnapshot {
    pub unencrypted: u64,
    pub certificate: u64,
    pub psk: u64,
    pub handshake_failures: u64,
    pub trust_failures: u64,
}

const HANDSHAKE: &str = "handshake";
const TRUST: &str = "trust";

impl TlsStats {
    /// Create the counters and register them.
    ///
    /// # Errors
    ///
    /// Returns an error if a counter cannot be created or registered.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let connections = IntCounterVec::new(
            Opts::new(
                "monitls_tls_connections_total",
                "Total number of established connections by mode",
            ),
            &["mode"],
        )?;

        let failures = IntCounterVec::new(
            Opts::new(
                "monitls_tls_failures_total",
                "Total number of failed connection attempts by reason",
            ),
            &["reason"],
        )?;

        registry.register(Box::new(connections.clone()))?;
        registry.register(Box::new(failures.clone()))?;

        Ok(Self {
            registry,
            connections,
            failures,
        })
    }

    /// Registry holding the counters.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_established(&self, mode: ConnectionMode) {
        self.connections.with_label_values(&[mode.token()]).inc();
    }

    pub fn record_failure(&self, error: &TlsError) {
        let reason = if error.is_peer_trust_failure() {
            TRUST
        } else {
            HANDSHAKE
        };
        self.failures.with_label_values(&[reason]).inc();
    }

    #[must_use]
    pub fn snapshot(&self) -> TlsStatsSnapshot {
        let connections = |mode: ConnectionMode| {
            self.connections
                .with_label_values(&[mode.token()])
                .get()
        };
        let failures = |reason: &str| self.failures.with_label_values(&[reason]).get();

        TlsStatsSnapshot {
            unencrypted: connections(ConnectionMode::Unencrypted),
            certificate: connections(ConnectionMode::Certificate),
            psk: connections(ConnectionMode::Psk),
            handshake_failures: failures(HANDSHAKE),
            trust_failures: failures(TRUST),
        }
    }

    pub fn append_to(&self, builder: &mut dyn StatsBuilder) {
        let snapshot = self.snapshot();
        builder.add_u64("tls_connections_unencrypted", snapshot.unencrypted);
        builder.add_u64("tls_connections_cert", snapshot.certificate);
        builder.add_u64("tls_connections_psk", snapshot.psk);
        builder.add_u64("tls_handshake_failures", snapshot.handshake_failures);
        builder.add_u64("tls_trust_failures", snapshot.trust_failures);
    }
}

impl fmt::Debug for TlsStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TlsStats").field(&self.snapshot()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CertificateProblems;

    #[test]
    fn test_counters() {
        let stats = TlsStats::new().unwrap();
        stats.record_established(ConnectionMode::Psk);
        stats.record_established(ConnectionMode::Psk);
        stats.record_established(ConnectionMode::Certificate);
        stats.record_failure(&TlsError::PeerTrust(CertificateProblems::EXPIRED));
        stats.record_failure(&TlsError::InvalidPsk);
        stats.record_failure(&TlsError::UnknownPskIdentity(b"agent-9".to_vec()));

        assert_eq!(
            stats.snapshot(),
            TlsStatsSnapshot {
                unencrypted: 0,
                certificate: 1,
                psk: 2,
                handshake_failures: 1,
                trust_failures: 2,
            }
        );
    }

    #[test]
    fn test_counters_are_registered() {
        let stats = TlsStats::new().unwrap();
        stats.record_established(ConnectionMode::Certificate);
        stats.record_failure(&TlsError::InvalidPsk);

        let families = stats.registry().gather();
        let names: Vec<&str> = families.iter().map(|family| family.get_name()).collect();
        assert_eq!(
            names,
            vec!["monitls_tls_connections_total", "monitls_tls_failures_total"]
        );

        let connections = &families[0].get_metric()[0];
        assert_eq!(connections.get_label()[0].get_value(), "cert");
        assert_eq!(connections.get_counter().get_value(), 1.0);
    }

    #[test]
    fn test_append_to_json() {
        let stats = TlsStats::new().unwrap();
        stats.record_established(ConnectionMode::Unencrypted);

        let mut document = Map::new();
        stats.append_to(&mut document);
        assert_eq!(document["tls_connections_unencrypted"], Value::from(1u64));
        assert_eq!(document["tls_trust_failures"], Value::from(0u64));
    }

    #[test]
    fn test_registry_keeps_first_extension() {
        let mut registry = StatsRegistry::new();
        assert!(registry.register(Box::new(
            |builder: &mut dyn StatsBuilder, _: &TlsConfig| builder.add_str("source", "first")
        )));
        assert!(!registry.register(Box::new(
            |builder: &mut dyn StatsBuilder, _: &TlsConfig| builder.add_str("source", "second")
        )));

        let mut document = Map::new();
        registry.collect(&mut document, &TlsConfig::default());
        assert_eq!(document["source"], Value::from("first"));
    }

    #[test]
    fn test_registry_without_extension() {
        let registry = StatsRegistry::default();
        let mut document = Map::new();
        registry.collect(&mut document, &TlsConfig::default());
        assert!(document.is_empty());
        assert!(!registry.is_registered());
    }
}

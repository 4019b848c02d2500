//! Configuration types for TLS-secured monitoring components.
//!
//! Configuration is loaded from YAML files and validated before use. The
//! TLS parameters accept both the snake_case keys used in YAML and the
//! historical `TLSConnect`-style names.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::tls::mode::{AcceptModes, ConnectionMode};

/// Role a process plays in the monitoring topology.
///
/// The role decides which policy parameters are checked and whether PSKs
/// may come from an external store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessRole {
    /// Central collector. Policies come from per-host settings.
    Server,
    /// Relay that connects out to the collector.
    ActiveProxy,
    /// Relay that is polled by the collector.
    PassiveProxy,
    /// Long running endpoint agent.
    #[default]
    AgentDaemon,
    /// Endpoint agent started per connection by a super-server.
    Agent,
    /// Command line sender or getter.
    Utility,
}

impl ProcessRole {
    /// Whether `TLSConnect` is consulted for this role.
    #[must_use]
    pub const fn checks_connect_policy(self) -> bool {
        matches!(self, Self::ActiveProxy | Self::AgentDaemon | Self::Utility)
    }

    /// Whether `TLSAccept` is consulted for this role.
    #[must_use]
    pub const fn checks_accept_policy(self) -> bool {
        matches!(self, Self::PassiveProxy | Self::AgentDaemon | Self::Agent)
    }

    /// Whether PSKs for unknown identities may be fetched from an external
    /// store, which also means a PSK suite set is needed without a local PSK.
    #[must_use]
    pub const fn resolves_psk_externally(self) -> bool {
        matches!(
            self,
            Self::Server | Self::ActiveProxy | Self::PassiveProxy
        )
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::ActiveProxy => "active proxy",
            Self::PassiveProxy => "passive proxy",
            Self::AgentDaemon => "agent daemon",
            Self::Agent => "agent",
            Self::Utility => "utility",
        }
    }
}

impl std::fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// TLS parameters of one process.
///
/// Empty strings are treated as unset, matching how the parameters behave
/// in flat configuration files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TlsConfig {
    /// How to connect out: `unencrypted`, `cert` or `psk`.
    #[serde(default, alias = "TLSConnect")]
    pub tls_connect: Option<String>,

    /// Comma separated modes admitted on incoming connections.
    #[serde(default, alias = "TLSAccept")]
    pub tls_accept: Option<String>,

    /// File with trusted CA certificates.
    #[serde(default, alias = "TLSCAFile")]
    pub tls_ca_file: Option<PathBuf>,

    /// Directory with trusted CA certificates. Takes precedence over
    /// `tls_ca_file`.
    #[serde(default, alias = "TLSCAPath")]
    pub tls_ca_path: Option<PathBuf>,

    /// File with certificate revocation lists.
    #[serde(default, alias = "TLSCRLFile")]
    pub tls_crl_file: Option<PathBuf>,

    /// Own certificate, optionally followed by its chain.
    #[serde(default, alias = "TLSCertFile")]
    pub tls_cert_file: Option<PathBuf>,

    /// Unencrypted private key for `tls_cert_file`.
    #[serde(default, alias = "TLSKeyFile")]
    pub tls_key_file: Option<PathBuf>,

    /// File holding the PSK as one line of hex digits.
    #[serde(default, alias = "TLSPSKFile")]
    pub tls_psk_file: Option<PathBuf>,

    /// Identity sent with the PSK.
    #[serde(default, alias = "TLSPSKIdentity")]
    pub tls_psk_identity: Option<String>,
}

impl TlsConfig {
    pub fn ca_file(&self) -> Option<&Path> {
        non_empty_path(self.tls_ca_file.as_deref())
    }

    pub fn ca_path(&self) -> Option<&Path> {
        non_empty_path(self.tls_ca_path.as_deref())
    }

    pub fn crl_file(&self) -> Option<&Path> {
        non_empty_path(self.tls_crl_file.as_deref())
    }

    pub fn cert_file(&self) -> Option<&Path> {
        non_empty_path(self.tls_cert_file.as_deref())
    }

    pub fn key_file(&self) -> Option<&Path> {
        non_empty_path(self.tls_key_file.as_deref())
    }

    pub fn psk_file(&self) -> Option<&Path> {
        non_empty_path(self.tls_psk_file.as_deref())
    }

    /// PSK identity exactly as configured.
    #[must_use]
    pub fn psk_identity(&self) -> Option<&str> {
        self.tls_psk_identity.as_deref().filter(|s| !s.is_empty())
    }

    /// Whether any certificate or PSK material is configured.
    #[must_use]
    pub fn has_material(&self) -> bool {
        self.cert_file().is_some() || self.psk_file().is_some()
    }

    /// Parsed `TLSConnect` value, `None` when unset.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a known mode.
    pub fn connect_policy(&self) -> ConfigResult<Option<ConnectionMode>> {
        match self.tls_connect.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => ConnectionMode::parse_connect(value).map(Some),
        }
    }

    /// Parsed `TLSAccept` value, `None` when unset.
    ///
    /// # Errors
    ///
    /// Returns an error if the list contains an unknown mode.
    pub fn accept_policy(&self) -> ConfigResult<Option<AcceptModes>> {
        match self.tls_accept.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => AcceptModes::parse(value).map(Some),
        }
    }
}

fn non_empty_path(path: Option<&Path>) -> Option<&Path> {
    path.filter(|p| !p.as_os_str().is_empty())
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output logs in JSON format (for production).
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_listen_address() -> String {
    "0.0.0.0:10050".to_string()
}

fn default_connect_address() -> String {
    "127.0.0.1:10050".to_string()
}

/// Root configuration of a standalone endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Role of this process.
    #[serde(default)]
    pub role: ProcessRole,

    /// TLS parameters.
    #[serde(default)]
    pub tls: TlsConfig,

    /// Address to listen on.
    #[serde(default = "default_listen_address")]
    pub listen: String,

    /// Address to connect to.
    #[serde(default = "default_connect_address")]
    pub connect: String,

    /// Optional `identity:hexkey` file used to resolve PSKs of peers other
    /// than the local identity.
    #[serde(default)]
    pub psk_store: Option<PathBuf>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Only checks what can be checked without touching the material files;
    /// material cross-checks happen when the TLS context is built.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation check fails.
    pub fn validate(&self) -> ConfigResult<()> {
        self.tls.connect_policy()?;
        self.tls.accept_policy()?;
        parse_address(&self.listen)?;
        parse_address(&self.connect)?;
        Ok(())
    }
}

/// Parse a `host:port` socket address.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidAddress`] if the address cannot be parsed.
pub fn parse_address(address: &str) -> ConfigResult<SocketAddr> {
    address
        .parse()
        .map_err(|_| ConfigError::InvalidAddress(address.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_yaml_string() {
        let yaml = r#"
role: passive_proxy
listen: "127.0.0.1:10051"
tls:
  tls_accept: "cert,psk"
  tls_cert_file: /etc/monitls/proxy.crt
  tls_key_file: /etc/monitls/proxy.key
  tls_ca_file: /etc/monitls/ca.crt
"#;
        let config = AppConfig::from_str(yaml).unwrap();
        assert_eq!(config.role, ProcessRole::PassiveProxy);
        assert_eq!(config.listen, "127.0.0.1:10051");
        assert_eq!(
            config.tls.cert_file(),
            Some(Path::new("/etc/monitls/proxy.crt"))
        );
        let accept = config.tls.accept_policy().unwrap().unwrap();
        assert!(accept.contains(ConnectionMode::Certificate));
        assert!(accept.contains(ConnectionMode::Psk));
        assert!(!accept.contains(ConnectionMode::Unencrypted));
    }

    #[test]
    fn test_upstream_parameter_names() {
        let yaml = r#"
tls:
  TLSConnect: psk
  TLSPSKFile: /etc/monitls/agent.psk
  TLSPSKIdentity: "agent 01"
"#;
        let config = AppConfig::from_str(yaml).unwrap();
        assert_eq!(
            config.tls.connect_policy().unwrap(),
            Some(ConnectionMode::Psk)
        );
        assert_eq!(config.tls.psk_identity(), Some("agent 01"));
    }

    #[test]
    fn test_default_values_applied() {
        let config = AppConfig::from_str("{}").unwrap();
        assert_eq!(config.role, ProcessRole::AgentDaemon);
        assert_eq!(config.listen, "0.0.0.0:10050");
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
        assert!(!config.tls.has_material());
    }

    #[test]
    fn test_empty_values_are_unset() {
        let tls = TlsConfig {
            tls_connect: Some(String::new()),
            tls_cert_file: Some(PathBuf::new()),
            tls_psk_identity: Some(String::new()),
            ..TlsConfig::default()
        };
        assert_eq!(tls.connect_policy().unwrap(), None);
        assert!(tls.cert_file().is_none());
        assert!(tls.psk_identity().is_none());
    }

    #[test]
    fn test_invalid_accept_value_rejected() {
        let yaml = r#"
tls:
  tls_accept: "cert,tls"
"#;
        let err = AppConfig::from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("TLSAccept"));
    }

    #[test]
    fn test_invalid_address_rejected() {
        let err = AppConfig::from_str("listen: localhost").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddress(_)));
    }

    #[test]
    fn test_identity_is_taken_literally() {
        let tls = TlsConfig {
            tls_psk_identity: Some("psk-${MONITLS_TEST_HOST}".to_string()),
            ..TlsConfig::default()
        };
        assert_eq!(tls.psk_identity(), Some("psk-${MONITLS_TEST_HOST}"));
    }

    #[test]
    fn test_role_capabilities() {
        assert!(!ProcessRole::Server.checks_connect_policy());
        assert!(!ProcessRole::Server.checks_accept_policy());
        assert!(ProcessRole::Server.resolves_psk_externally());

        assert!(ProcessRole::ActiveProxy.checks_connect_policy());
        assert!(!ProcessRole::ActiveProxy.checks_accept_policy());

        assert!(ProcessRole::PassiveProxy.checks_accept_policy());
        assert!(ProcessRole::PassiveProxy.resolves_psk_externally());

        assert!(ProcessRole::AgentDaemon.checks_connect_policy());
        assert!(ProcessRole::AgentDaemon.checks_accept_policy());
        assert!(!ProcessRole::AgentDaemon.resolves_psk_externally());

        assert!(ProcessRole::Agent.checks_accept_policy());
        assert!(ProcessRole::Utility.checks_connect_policy());
    }
}

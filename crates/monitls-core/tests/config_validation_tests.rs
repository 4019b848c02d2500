//! Configuration validation tests.
//!
//! Every test writes real material files and builds a context, so loading
//! and validation run exactly as they do at process start.

use monitls_core::config::{AppConfig, ProcessRole, TlsConfig};
use monitls_core::error::ConfigError;
use monitls_core::testing::pki::{fixtures, MaterialDir, TestPki};
use monitls_core::testing::RecordingBackend;
use monitls_core::tls::TlsContext;

const PSK_HEX: &str = "1f2e3d4c5b6a79880f1e2d3c4b5a6978";

fn build(config: &TlsConfig, role: ProcessRole) -> Result<(), ConfigError> {
    TlsContext::builder(config, role)
        .backend(RecordingBackend::new())
        .build()
        .map(TlsContext::teardown)
}

fn certificate_config(dir: &MaterialDir) -> TlsConfig {
    let pki = TestPki::new("Validation CA");
    let leaf = pki.issue("agent.example");
    let mut config = dir.certificate_config(&pki, &leaf);
    config.tls_connect = Some("cert".to_string());
    config.tls_accept = Some("cert".to_string());
    config
}

// =============================================================================
// Counterpart rules
// =============================================================================

#[test]
fn test_certificate_without_key() {
    let dir = MaterialDir::new();
    let mut config = certificate_config(&dir);
    config.tls_key_file = None;

    let err = build(&config, ProcessRole::AgentDaemon).unwrap_err();
    assert_eq!(
        err.to_string(),
        "configuration parameter \"TLSCertFile\" is defined but \"TLSKeyFile\" is not defined"
    );
}

#[test]
fn test_key_without_certificate() {
    let dir = MaterialDir::new();
    let mut config = certificate_config(&dir);
    config.tls_cert_file = None;
    config.tls_ca_file = None;

    let err = build(&config, ProcessRole::AgentDaemon).unwrap_err();
    assert_eq!(
        err.to_string(),
        "configuration parameter \"TLSKeyFile\" is defined but \"TLSCertFile\" is not defined"
    );
}

#[test]
fn test_ca_without_certificate() {
    let dir = MaterialDir::new();
    let mut config = certificate_config(&dir);
    config.tls_cert_file = None;
    config.tls_key_file = None;

    let err = build(&config, ProcessRole::Server).unwrap_err();
    assert!(matches!(err, ConfigError::CaWithoutCertificate("TLSCAFile")));
}

#[test]
fn test_certificate_without_ca() {
    let dir = MaterialDir::new();
    let mut config = certificate_config(&dir);
    config.tls_ca_file = None;

    let err = build(&config, ProcessRole::Server).unwrap_err();
    assert!(matches!(err, ConfigError::CertificateWithoutCa));
}

#[test]
fn test_crl_without_certificate() {
    let dir = MaterialDir::new();
    let config = TlsConfig {
        tls_crl_file: Some(dir.write("revoked.crl", fixtures::CRL_PEM)),
        ..TlsConfig::default()
    };

    let err = build(&config, ProcessRole::Server).unwrap_err();
    assert!(matches!(err, ConfigError::CrlWithoutCertificate));
}

#[test]
fn test_psk_without_identity() {
    let dir = MaterialDir::new();
    let mut config = dir.psk_config("agent-1", PSK_HEX);
    config.tls_psk_identity = None;

    let err = build(&config, ProcessRole::Agent).unwrap_err();
    assert_eq!(
        err.to_string(),
        "configuration parameter \"TLSPSKFile\" is defined but \"TLSPSKIdentity\" is not defined"
    );
}

#[test]
fn test_identity_without_psk() {
    let config = TlsConfig {
        tls_psk_identity: Some("agent-1".to_string()),
        ..TlsConfig::default()
    };

    let err = build(&config, ProcessRole::Agent).unwrap_err();
    assert_eq!(
        err.to_string(),
        "configuration parameter \"TLSPSKIdentity\" is defined but \"TLSPSKFile\" is not defined"
    );
}

// =============================================================================
// Role rules
// =============================================================================

#[test]
fn test_connecting_role_needs_connect_policy() {
    let dir = MaterialDir::new();
    let mut config = dir.psk_config("proxy-1", PSK_HEX);
    config.tls_accept = Some("psk".to_string());

    let err = build(&config, ProcessRole::ActiveProxy).unwrap_err();
    assert!(err.to_string().contains("\"TLSConnect\" is not defined"));
}

#[test]
fn test_listening_role_needs_accept_policy() {
    let dir = MaterialDir::new();
    let mut config = dir.psk_config("agent-1", PSK_HEX);
    config.tls_connect = Some("psk".to_string());

    let err = build(&config, ProcessRole::PassiveProxy).unwrap_err();
    assert!(err.to_string().contains("\"TLSAccept\" is not defined"));
}

#[test]
fn test_connect_policy_requires_certificate() {
    let dir = MaterialDir::new();
    let mut config = dir.psk_config("agent-1", PSK_HEX);
    config.tls_connect = Some("cert".to_string());
    config.tls_accept = Some("psk".to_string());

    let err = build(&config, ProcessRole::AgentDaemon).unwrap_err();
    assert_eq!(
        err.to_string(),
        "parameter \"TLSConnect\" value requires a certificate but it is not configured"
    );
}

#[test]
fn test_accept_policy_requires_psk() {
    let dir = MaterialDir::new();
    let mut config = certificate_config(&dir);
    config.tls_accept = Some("cert,psk".to_string());

    let err = build(&config, ProcessRole::Agent).unwrap_err();
    assert_eq!(
        err.to_string(),
        "parameter \"TLSAccept\" value requires a PSK but it is not configured"
    );
}

#[test]
fn test_server_ignores_policies() {
    let dir = MaterialDir::new();
    let mut config = certificate_config(&dir);
    config.tls_connect = None;
    config.tls_accept = None;

    assert!(build(&config, ProcessRole::Server).is_ok());
}

#[test]
fn test_unknown_accept_token() {
    let dir = MaterialDir::new();
    let mut config = certificate_config(&dir);
    config.tls_accept = Some("cert,tls13".to_string());

    let err = build(&config, ProcessRole::Agent).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::InvalidPolicyValue {
            parameter: "TLSAccept",
            ..
        }
    ));
}

#[test]
fn test_valid_combined_configuration() {
    let dir = MaterialDir::new();
    let pki = TestPki::new("Validation CA");
    let leaf = pki.issue("agent.example");
    let mut config = dir.certificate_config(&pki, &leaf);
    config.tls_psk_file = Some(dir.write("agent.psk", PSK_HEX));
    config.tls_psk_identity = Some("agent-1".to_string());
    config.tls_connect = Some("psk".to_string());
    config.tls_accept = Some("unencrypted,cert,psk".to_string());

    assert!(build(&config, ProcessRole::AgentDaemon).is_ok());
}

// =============================================================================
// Loading failures
// =============================================================================

#[test]
fn test_key_from_another_certificate() {
    let dir = MaterialDir::new();
    let pki = TestPki::new("Validation CA");
    let leaf = pki.issue("agent.example");
    let other = pki.issue("other.example");
    let mut config = dir.certificate_config(&pki, &leaf);
    config.tls_key_file = Some(dir.write("other.key", &other.key_pem));

    let err = build(&config, ProcessRole::Server).unwrap_err();
    assert!(matches!(err, ConfigError::KeyMismatch { .. }));
}

#[test]
fn test_bad_psk_file() {
    let dir = MaterialDir::new();
    for (content, expected) in [
        ("", "is empty"),
        ("abc", "invalid PSK"),
        ("zz11", "invalid PSK"),
    ] {
        let config = TlsConfig {
            tls_psk_file: Some(dir.write("bad.psk", content)),
            tls_psk_identity: Some("agent-1".to_string()),
            ..TlsConfig::default()
        };
        let err = build(&config, ProcessRole::Server).unwrap_err();
        assert!(
            err.to_string().contains(expected),
            "{content:?}: unexpected error {err}"
        );
    }
}

#[test]
fn test_missing_file_names_path() {
    let dir = MaterialDir::new();
    let missing = dir.path().join("absent.pem");
    let config = TlsConfig {
        tls_ca_file: Some(missing.clone()),
        ..TlsConfig::default()
    };

    let err = build(&config, ProcessRole::Server).unwrap_err();
    assert!(err.to_string().contains(&missing.display().to_string()));
}

// =============================================================================
// Application configuration
// =============================================================================

#[test]
fn test_app_config_from_yaml() {
    let yaml = r#"
role: passive_proxy
listen: "127.0.0.1:10051"
tls:
  TLSAccept: "cert,psk"
  TLSPSKIdentity: "proxy-1"
logging:
  level: debug
"#;
    let config = AppConfig::from_str(yaml).unwrap();
    assert_eq!(config.role, ProcessRole::PassiveProxy);
    assert_eq!(config.tls.tls_accept.as_deref(), Some("cert,psk"));
    assert_eq!(config.tls.psk_identity(), Some("proxy-1"));
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_app_config_rejects_bad_connect_value() {
    let yaml = r#"
tls:
  TLSConnect: "tls"
"#;
    let err = AppConfig::from_str(yaml).unwrap_err();
    assert!(err.to_string().contains("TLSConnect"));
}

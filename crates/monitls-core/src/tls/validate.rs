//! Cross-checks of loaded material against the process role and policy.

use tracing::debug;

use crate::config::{ProcessRole, TlsConfig};
use crate::error::{ConfigError, ConfigResult};
use crate::tls::material::MaterialStore;
use crate::tls::mode::{AcceptModes, ConnectionMode};

/// Connect and accept policy of a validated process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TlsPolicy {
    /// `TLSConnect`, when the role consults it.
    pub connect: Option<ConnectionMode>,
    /// `TLSAccept`, when the role consults it.
    pub accept: Option<AcceptModes>,
}

/// Check that material and policy agree.
///
/// Rules, in order: certificate and key come together; CA material and own
/// certificate come together; a CRL needs an own certificate; PSK and
/// identity come together; then the connect and accept policy of the role
/// must be present when material is loaded and must not ask for material
/// that is missing.
///
/// # Errors
///
/// Returns the first violated rule.
pub fn validate(
    config: &TlsConfig,
    material: &MaterialStore,
    role: ProcessRole,
) -> ConfigResult<TlsPolicy> {
    let has_cert = !material.certificate_chain().is_empty();
    let has_key = material.private_key().is_some();
    let has_psk = material.psk().is_some();
    let has_identity = material.psk_identity().is_some();

    if has_cert && !has_key {
        return Err(missing("TLSCertFile", "TLSKeyFile"));
    }
    if has_key && !has_cert {
        return Err(missing("TLSKeyFile", "TLSCertFile"));
    }

    match material.ca_source() {
        None if has_cert => return Err(ConfigError::CertificateWithoutCa),
        Some(source) if !has_cert => {
            return Err(ConfigError::CaWithoutCertificate(source.parameter()))
        }
        _ => {}
    }

    if !material.crls().is_empty() && !has_cert {
        return Err(ConfigError::CrlWithoutCertificate);
    }

    if has_psk && !has_identity {
        return Err(missing("TLSPSKFile", "TLSPSKIdentity"));
    }
    if has_identity && !has_psk {
        return Err(missing("TLSPSKIdentity", "TLSPSKFile"));
    }

    let has_material = has_cert || has_psk;
    let mut policy = TlsPolicy::default();

    if role.checks_connect_policy() {
        policy.connect = config.connect_policy()?;
        match policy.connect {
            None if has_material => return Err(ConfigError::PolicyMissing("TLSConnect")),
            Some(ConnectionMode::Certificate) if !has_cert => {
                return Err(requires("TLSConnect", "certificate"))
            }
            Some(ConnectionMode::Psk) if !has_psk => return Err(requires("TLSConnect", "PSK")),
            _ => {}
        }
    }

    if role.checks_accept_policy() {
        policy.accept = config.accept_policy()?;
        match policy.accept {
            None if has_material => return Err(ConfigError::PolicyMissing("TLSAccept")),
            Some(modes) if modes.contains(ConnectionMode::Certificate) && !has_cert => {
                return Err(requires("TLSAccept", "certificate"))
            }
            Some(modes) if modes.contains(ConnectionMode::Psk) && !has_psk => {
                return Err(requires("TLSAccept", "PSK"))
            }
            _ => {}
        }
    }

    debug!(
        role = %role,
        connect = ?policy.connect,
        accept = ?policy.accept.map(|modes| modes.to_string()),
        "TLS configuration is consistent"
    );
    Ok(policy)
}

fn missing(defined: &'static str, missing: &'static str) -> ConfigError {
    ConfigError::MissingCounterpart { defined, missing }
}

fn requires(parameter: &'static str, material: &'static str) -> ConfigError {
    ConfigError::PolicyRequiresMaterial {
        parameter,
        material,
    }
}

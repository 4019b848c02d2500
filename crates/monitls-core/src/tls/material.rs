//! Loading of CA certificates, CRLs, own certificate and key, and the local PSK.
//!
//! Every failure here is fatal for the process: the error names the file and
//! carries the engine's diagnostic.

use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use openssl::error::ErrorStack;
use openssl::pkey::{PKey, Private};
use openssl::x509::{X509Crl, X509};
use tracing::debug;

use crate::config::TlsConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::tls::secret::{HexError, SecretBytes, MAX_PSK_HEX_LEN, MAX_PSK_IDENTITY_LEN, MAX_PSK_LEN};

/// Where trusted CA certificates came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaSource {
    /// `TLSCAPath`: every file in a directory.
    Directory(PathBuf),
    /// `TLSCAFile`: a single PEM bundle.
    File(PathBuf),
}

impl CaSource {
    /// Name of the parameter that configured this source.
    #[must_use]
    pub fn parameter(&self) -> &'static str {
        match self {
            Self::Directory(_) => "TLSCAPath",
            Self::File(_) => "TLSCAFile",
        }
    }
}

/// All TLS material of a process. Read-only once loaded.
#[derive(Default)]
pub struct MaterialStore {
    ca_source: Option<CaSource>,
    ca_certificates: Vec<X509>,
    crls: Arc<Vec<X509Crl>>,
    certificate_chain: Vec<X509>,
    private_key: Option<PKey<Private>>,
    psk: Option<SecretBytes>,
    psk_identity: Option<Vec<u8>>,
}

impl MaterialStore {
    /// Load everything `config` names.
    ///
    /// `TLSCAPath` wins over `TLSCAFile` when both are set.
    ///
    /// # Errors
    ///
    /// Returns the first load failure. Anything loaded before it is dropped.
    pub fn load(config: &TlsConfig) -> ConfigResult<Self> {
        let mut store = Self::default();

        if let Some(dir) = config.ca_path() {
            store.ca_certificates = load_ca_directory(dir)?;
            store.ca_source = Some(CaSource::Directory(dir.to_path_buf()));
        } else if let Some(file) = config.ca_file() {
            store.ca_certificates = load_certificates(file, "CA certificates")?;
            store.ca_source = Some(CaSource::File(file.to_path_buf()));
        }

        if let Some(file) = config.crl_file() {
            store.crls = Arc::new(load_crls(file)?);
        }

        if let Some(file) = config.cert_file() {
            store.certificate_chain = load_certificates(file, "certificate")?;
        }

        if let Some(file) = config.key_file() {
            let key = load_private_key(file)?;
            if let (Some(cert), Some(cert_file)) = (store.certificate_chain.first(), config.cert_file()) {
                if !key_matches(cert, &key) {
                    return Err(ConfigError::KeyMismatch {
                        cert_path: cert_file.display().to_string(),
                        key_path: file.display().to_string(),
                    });
                }
            }
            store.private_key = Some(key);
        }

        if let Some(file) = config.psk_file() {
            store.psk = Some(load_psk(file)?);
        }

        if let Some(identity) = config.psk_identity() {
            store.psk_identity = Some(check_psk_identity(identity)?);
        }

        Ok(store)
    }

    /// Build a store from already parsed parts.
    #[must_use]
    pub fn from_parts(parts: MaterialParts) -> Self {
        Self {
            ca_source: parts.ca_source,
            ca_certificates: parts.ca_certificates,
            crls: Arc::new(parts.crls),
            certificate_chain: parts.certificate_chain,
            private_key: parts.private_key,
            psk: parts.psk,
            psk_identity: parts.psk_identity,
        }
    }

    pub fn ca_source(&self) -> Option<&CaSource> {
        self.ca_source.as_ref()
    }

    pub fn ca_certificates(&self) -> &[X509] {
        &self.ca_certificates
    }

    /// Revocation lists, shared with sessions that verify peers.
    pub fn crls(&self) -> &Arc<Vec<X509Crl>> {
        &self.crls
    }

    /// Own certificate first, followed by any chain certificates.
    pub fn certificate_chain(&self) -> &[X509] {
        &self.certificate_chain
    }

    pub fn private_key(&self) -> Option<&PKey<Private>> {
        self.private_key.as_ref()
    }

    pub fn psk(&self) -> Option<&SecretBytes> {
        self.psk.as_ref()
    }

    pub fn psk_identity(&self) -> Option<&[u8]> {
        self.psk_identity.as_deref()
    }

    /// Own certificate and key are both loaded.
    #[must_use]
    pub fn has_certificate(&self) -> bool {
        !self.certificate_chain.is_empty() && self.private_key.is_some()
    }

    /// PSK and identity are both loaded.
    #[must_use]
    pub fn has_psk(&self) -> bool {
        self.psk.is_some() && self.psk_identity.is_some()
    }

    /// Local identity and key, if both are loaded.
    pub fn local_psk(&self) -> Option<(&[u8], &SecretBytes)> {
        match (&self.psk_identity, &self.psk) {
            (Some(identity), Some(key)) => Some((identity, key)),
            _ => None,
        }
    }

    /// Drop everything, wiping the PSK.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Pre-parsed material for [`MaterialStore::from_parts`].
#[derive(Default)]
pub struct MaterialParts {
    pub ca_source: Option<CaSource>,
    pub ca_certificates: Vec<X509>,
    pub crls: Vec<X509Crl>,
    pub certificate_chain: Vec<X509>,
    pub private_key: Option<PKey<Private>>,
    pub psk: Option<SecretBytes>,
    pub psk_identity: Option<Vec<u8>>,
}

fn read_file(path: &Path) -> ConfigResult<Vec<u8>> {
    fs::read(path).map_err(|e| ConfigError::FileRead {
        path: path.display().to_string(),
        source: e,
    })
}

fn load_error(what: &'static str, path: &Path, message: impl ToString) -> ConfigError {
    ConfigError::MaterialLoad {
        what,
        path: path.display().to_string(),
        message: message.to_string(),
    }
}

/// Load every certificate of a PEM file.
fn load_certificates(path: &Path, what: &'static str) -> ConfigResult<Vec<X509>> {
    let pem = read_file(path)?;
    let certs = X509::stack_from_pem(&pem).map_err(|e| load_error(what, path, e))?;

    if certs.is_empty() {
        return Err(load_error(what, path, "no certificates found"));
    }

    debug!(count = certs.len(), path = %path.display(), "loaded {what}");
    Ok(certs)
}

/// Load every file of a CA directory. Any unparsable file is fatal.
fn load_ca_directory(dir: &Path) -> ConfigResult<Vec<X509>> {
    let entries = fs::read_dir(dir).map_err(|e| ConfigError::FileRead {
        path: dir.display().to_string(),
        source: e,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    let mut certs = Vec::new();
    let mut failed = 0usize;
    let mut last_error = String::new();
    for file in &files {
        match fs::read(file)
            .map_err(|e| e.to_string())
            .and_then(|pem| X509::stack_from_pem(&pem).map_err(|e| e.to_string()))
        {
            Ok(parsed) if !parsed.is_empty() => certs.extend(parsed),
            Ok(_) => {
                failed += 1;
                last_error = format!("no certificates in \"{}\"", file.display());
            }
            Err(e) => {
                failed += 1;
                last_error = format!("\"{}\": {e}", file.display());
            }
        }
    }

    if failed > 0 {
        return Err(load_error(
            "CA certificates",
            dir,
            format!("{failed} file(s) could not be parsed, last: {last_error}"),
        ));
    }
    if certs.is_empty() {
        return Err(load_error("CA certificates", dir, "no certificates found"));
    }

    debug!(count = certs.len(), files = files.len(), path = %dir.display(), "loaded CA certificates");
    Ok(certs)
}

/// Load the CRLs of a PEM file, or a single DER encoded CRL.
fn load_crls(path: &Path) -> ConfigResult<Vec<X509Crl>> {
    const WHAT: &str = "certificate revocation lists";

    let data = read_file(path)?;
    let blocks = rustls_pemfile::crls(&mut BufReader::new(data.as_slice()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| load_error(WHAT, path, e))?;

    let crls = if !blocks.is_empty() {
        blocks
            .iter()
            .map(|der| X509Crl::from_der(der.as_ref()))
            .collect::<Result<Vec<_>, ErrorStack>>()
            .map_err(|e| load_error(WHAT, path, e))?
    } else if data.is_empty() || data.starts_with(b"-----BEGIN") {
        return Err(load_error(WHAT, path, "no CRLs found"));
    } else {
        vec![X509Crl::from_der(&data).map_err(|e| load_error(WHAT, path, e))?]
    };

    debug!(count = crls.len(), path = %path.display(), "loaded {WHAT}");
    Ok(crls)
}

/// Load an unencrypted private key. Encrypted keys are refused rather than
/// prompting for a passphrase.
fn load_private_key(path: &Path) -> ConfigResult<PKey<Private>> {
    let pem = read_file(path)?;
    let key = PKey::private_key_from_pem_callback(&pem, |_passphrase| Ok(0))
        .map_err(|e| load_error("private key", path, e))?;

    debug!(path = %path.display(), bits = key.bits(), "loaded private key");
    Ok(key)
}

fn key_matches(cert: &X509, key: &PKey<Private>) -> bool {
    cert.public_key()
        .map(|public| public.public_eq(key))
        .unwrap_or(false)
}

/// Load a PSK file: one line of hex digits, trailing newline optional.
fn load_psk(path: &Path) -> ConfigResult<SecretBytes> {
    let display = || path.display().to_string();
    let raw = SecretBytes::new(read_file(path)?);

    let line = raw
        .expose()
        .split(|b| *b == b'\n')
        .next()
        .unwrap_or_default();
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let digits = std::str::from_utf8(line).map_err(|_| ConfigError::InvalidPsk(display()))?;

    if digits.len() > MAX_PSK_HEX_LEN {
        return Err(ConfigError::PskTooLarge(display()));
    }

    let psk = SecretBytes::from_hex(digits, MAX_PSK_LEN).map_err(|e| match e {
        HexError::Empty => ConfigError::EmptyPskFile(display()),
        HexError::TooLong => ConfigError::PskTooLarge(display()),
        HexError::Invalid => ConfigError::InvalidPsk(display()),
    })?;

    debug!(path = %path.display(), bytes = psk.len(), "loaded PSK");
    Ok(psk)
}

fn check_psk_identity(identity: &str) -> ConfigResult<Vec<u8>> {
    if identity.is_empty() {
        return Err(ConfigError::InvalidPskIdentity("empty".to_string()));
    }
    if identity.len() > MAX_PSK_IDENTITY_LEN {
        return Err(ConfigError::InvalidPskIdentity(format!(
            "longer than {MAX_PSK_IDENTITY_LEN} bytes"
        )));
    }
    Ok(identity.as_bytes().to_vec())
}

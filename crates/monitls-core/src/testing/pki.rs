//! Throwaway certificate authorities and material directories for tests.
//!
//! Certificates are generated with P-256 keys. The engine has no CRL
//! builder, so revocation tests use the fixed [`fixtures`] set.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectKeyIdentifier,
};
use openssl::x509::{X509Builder, X509Name, X509NameBuilder, X509};
use tempfile::TempDir;

use crate::config::TlsConfig;

/// Pre-generated CA with a CRL, for revocation tests.
///
/// `revoked.pem` is listed in `crl-ca.crl`; `valid.pem` is not. Both are
/// issued by `crl-ca.pem` and valid for a century.
pub mod fixtures {
    use openssl::x509::X509Crl;

    pub const CA_PEM: &[u8] =
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/crl-ca.pem"));
    pub const CRL_PEM: &[u8] =
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/crl-ca.crl"));
    pub const REVOKED_CERT_PEM: &[u8] =
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/revoked.pem"));
    pub const REVOKED_KEY_PEM: &[u8] =
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/revoked.key"));
    pub const VALID_CERT_PEM: &[u8] =
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/valid.pem"));
    pub const VALID_KEY_PEM: &[u8] =
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/valid.key"));

    /// The fixture CRL, parsed.
    pub fn crl() -> X509Crl {
        X509Crl::from_pem(CRL_PEM).expect("fixture CRL parses")
    }
}

/// A certificate authority that signs leaf certificates on demand.
pub struct TestPki {
    ca_cert: X509,
    ca_key: PKey<Private>,
}

/// Leaf certificate and key issued by a [`TestPki`].
pub struct IssuedCert {
    pub cert: X509,
    pub key: PKey<Private>,
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

impl IssuedCert {
    pub fn certificate(&self) -> X509 {
        self.cert.clone()
    }

    pub fn private_key(&self) -> PKey<Private> {
        self.key.clone()
    }
}

impl TestPki {
    /// Create a self-signed CA with the given Common Name.
    pub fn new(common_name: &str) -> Self {
        let ca_key = generate_key();
        let name = build_name(common_name);

        let mut builder = X509Builder::new().expect("x509 builder");
        builder.set_version(2).expect("version");
        builder
            .set_serial_number(&random_serial())
            .expect("serial");
        builder.set_subject_name(&name).expect("subject");
        builder.set_issuer_name(&name).expect("issuer");
        builder.set_pubkey(&ca_key).expect("pubkey");
        builder
            .set_not_before(&Asn1Time::days_from_now(0).expect("time"))
            .expect("not before");
        builder
            .set_not_after(&Asn1Time::days_from_now(365).expect("time"))
            .expect("not after");
        builder
            .append_extension(
                BasicConstraints::new()
                    .critical()
                    .ca()
                    .build()
                    .expect("basic constraints"),
            )
            .expect("append");
        builder
            .append_extension(
                KeyUsage::new()
                    .critical()
                    .key_cert_sign()
                    .crl_sign()
                    .build()
                    .expect("key usage"),
            )
            .expect("append");
        let ski = SubjectKeyIdentifier::new()
            .build(&builder.x509v3_context(None, None))
            .expect("subject key identifier");
        builder.append_extension(ski).expect("append");
        builder
            .sign(&ca_key, MessageDigest::sha256())
            .expect("sign");

        Self {
            ca_cert: builder.build(),
            ca_key,
        }
    }

    pub fn ca_certificate(&self) -> X509 {
        self.ca_cert.clone()
    }

    pub fn ca_pem(&self) -> Vec<u8> {
        self.ca_cert.to_pem().expect("ca pem")
    }

    /// Issue a leaf valid from now for a year.
    pub fn issue(&self, common_name: &str) -> IssuedCert {
        let not_before = Asn1Time::days_from_now(0).expect("time");
        let not_after = Asn1Time::days_from_now(365).expect("time");
        self.issue_with_validity(common_name, &not_before, &not_after)
    }

    /// Issue a leaf whose validity ended yesterday.
    pub fn issue_expired(&self, common_name: &str) -> IssuedCert {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock after epoch")
            .as_secs() as i64;
        let not_before = Asn1Time::from_unix(now - 3 * 86_400).expect("time");
        let not_after = Asn1Time::from_unix(now - 86_400).expect("time");
        self.issue_with_validity(common_name, &not_before, &not_after)
    }

    fn issue_with_validity(
        &self,
        common_name: &str,
        not_before: &Asn1Time,
        not_after: &Asn1Time,
    ) -> IssuedCert {
        let key = generate_key();

        let mut builder = X509Builder::new().expect("x509 builder");
        builder.set_version(2).expect("version");
        builder
            .set_serial_number(&random_serial())
            .expect("serial");
        builder
            .set_subject_name(&build_name(common_name))
            .expect("subject");
        builder
            .set_issuer_name(self.ca_cert.subject_name())
            .expect("issuer");
        builder.set_pubkey(&key).expect("pubkey");
        builder.set_not_before(not_before).expect("not before");
        builder.set_not_after(not_after).expect("not after");
        builder
            .append_extension(BasicConstraints::new().build().expect("basic constraints"))
            .expect("append");
        builder
            .append_extension(
                KeyUsage::new()
                    .critical()
                    .digital_signature()
                    .key_encipherment()
                    .build()
                    .expect("key usage"),
            )
            .expect("append");
        builder
            .append_extension(
                ExtendedKeyUsage::new()
                    .server_auth()
                    .client_auth()
                    .build()
                    .expect("extended key usage"),
            )
            .expect("append");
        let aki = AuthorityKeyIdentifier::new()
            .keyid(false)
            .build(&builder.x509v3_context(Some(&*self.ca_cert), None))
            .expect("authority key identifier");
        builder.append_extension(aki).expect("append");
        builder
            .sign(&self.ca_key, MessageDigest::sha256())
            .expect("sign");

        let cert = builder.build();
        IssuedCert {
            cert_pem: cert.to_pem().expect("cert pem"),
            key_pem: key.private_key_to_pem_pkcs8().expect("key pem"),
            cert,
            key,
        }
    }
}

fn generate_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).expect("curve");
    let ec_key = EcKey::generate(&group).expect("ec key");
    PKey::from_ec_key(ec_key).expect("pkey")
}

fn build_name(common_name: &str) -> X509Name {
    let mut name = X509NameBuilder::new().expect("name builder");
    name.append_entry_by_nid(Nid::ORGANIZATIONNAME, "Monitls Test")
        .expect("organization");
    name.append_entry_by_nid(Nid::COMMONNAME, common_name)
        .expect("common name");
    name.build()
}

fn random_serial() -> Asn1Integer {
    let mut serial = BigNum::new().expect("bignum");
    serial
        .rand(64, MsbOption::MAYBE_ZERO, false)
        .expect("random serial");
    serial.to_asn1_integer().expect("asn1 integer")
}

/// Temporary directory holding material files for one test.
pub struct MaterialDir {
    dir: TempDir,
}

impl MaterialDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `content` to `name` inside the directory.
    pub fn write(&self, name: &str, content: impl AsRef<[u8]>) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).expect("write material file");
        path
    }

    /// Config with own certificate, key and the CA of `pki`.
    pub fn certificate_config(&self, pki: &TestPki, leaf: &IssuedCert) -> TlsConfig {
        TlsConfig {
            tls_ca_file: Some(self.write("ca.pem", pki.ca_pem())),
            tls_cert_file: Some(self.write("own.crt", &leaf.cert_pem)),
            tls_key_file: Some(self.write("own.key", &leaf.key_pem)),
            ..TlsConfig::default()
        }
    }

    /// Config with a PSK given as hex digits.
    pub fn psk_config(&self, identity: &str, psk_hex: &str) -> TlsConfig {
        TlsConfig {
            tls_psk_file: Some(self.write("own.psk", format!("{psk_hex}\n"))),
            tls_psk_identity: Some(identity.to_string()),
            ..TlsConfig::default()
        }
    }
}

impl Default for MaterialDir {
    fn default() -> Self {
        Self::new()
    }
}

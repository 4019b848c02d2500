//! OpenSSL backend.
//!
//! Each session gets its own context pinned to TLS 1.2 with the bound suite
//! list. Certificate verification never aborts the handshake: every problem
//! is collected by the verify callback and judged once the handshake is
//! complete, so the caller can report all of them together.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use openssl::error::ErrorStack;
use openssl::rand::rand_bytes;
use openssl::ssl::{
    ErrorCode, Ssl, SslContext, SslMethod, SslStream, SslVerifyMode, SslVersion,
};
use openssl::x509::{CrlStatus, X509Crl, X509Ref, X509StoreContextRef};
use openssl_sys::{
    X509_V_ERR_CERT_HAS_EXPIRED, X509_V_ERR_CERT_NOT_YET_VALID, X509_V_ERR_CERT_REVOKED,
    X509_V_ERR_HOSTNAME_MISMATCH, X509_V_ERR_UNABLE_TO_GET_CRL,
};
use tracing::trace;

use super::{BackendSession, HandshakeStep, PskBinding, SessionBinding, Side, TlsBackend};
use crate::error::{BackendError, CertificateProblems};
use crate::tls::suites::BulkCipher::{
    Aes128, Aes256, Aria128, Aria256, Camellia128, Camellia256, Chacha20, Des, Null, Rc4,
    TripleDes,
};
use crate::tls::suites::KeyExchange::{Dhe, DhePsk, Ecdhe, EcdhePsk, Psk, Rsa, RsaPsk};
use crate::tls::suites::ProtocolVersion::{Ssl3, Tls10, Tls11, Tls12, Tls13};
use crate::tls::suites::{BulkCipher, KeyExchange, ProtocolVersion, SuiteInfo};

/// The OpenSSL engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenSslBackend;

impl OpenSslBackend {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TlsBackend for OpenSslBackend {
    type Session<S: Read + Write> = OpenSslSession<S>;

    fn name(&self) -> &'static str {
        "OpenSSL"
    }

    fn suite_catalog(&self) -> &[SuiteInfo] {
        CATALOG
    }

    /// OpenSSL seeds and reseeds its DRBG from the OS itself, including
    /// after fork. A draw proves the generator is usable.
    fn check_random(&self) -> Result<(), BackendError> {
        let mut sample = [0u8; 32];
        rand_bytes(&mut sample).map_err(engine_error)
    }

    fn start<S: Read + Write>(
        &self,
        stream: S,
        binding: SessionBinding<'_>,
    ) -> Result<OpenSslSession<S>, BackendError> {
        let problems = Arc::new(AtomicU8::new(0));
        let psk_identity = Arc::new(Mutex::new(None));
        let rejected_identity = Arc::new(Mutex::new(None));

        let context = build_context(&binding, &problems, &psk_identity, &rejected_identity)
            .map_err(engine_error)?;
        let ssl = Ssl::new(&context).map_err(engine_error)?;
        let stream = SslStream::new(ssl, stream).map_err(engine_error)?;

        if let PskBinding::Offer { identity, .. } = &binding.psk {
            set_identity(&psk_identity, identity);
        }

        Ok(OpenSslSession {
            stream,
            side: binding.side,
            problems,
            psk_identity,
            rejected_identity,
        })
    }
}

fn engine_error(error: ErrorStack) -> BackendError {
    BackendError::new(error.to_string())
}

fn set_identity(slot: &Mutex<Option<Vec<u8>>>, identity: &[u8]) {
    if let Ok(mut guard) = slot.lock() {
        *guard = Some(identity.to_vec());
    }
}

fn build_context(
    binding: &SessionBinding<'_>,
    problems: &Arc<AtomicU8>,
    psk_identity: &Arc<Mutex<Option<Vec<u8>>>>,
    rejected_identity: &Arc<Mutex<Option<Vec<u8>>>>,
) -> Result<SslContext, ErrorStack> {
    let mut builder = SslContext::builder(SslMethod::tls())?;
    builder.set_min_proto_version(Some(SslVersion::TLS1_2))?;
    builder.set_max_proto_version(Some(SslVersion::TLS1_2))?;
    builder.set_cipher_list(&binding.suites.names().join(":"))?;

    if let Some(certificate) = binding.certificate {
        if let Some((leaf, chain)) = certificate.chain.split_first() {
            builder.set_certificate(leaf)?;
            for extra in chain {
                builder.add_extra_chain_cert(extra.clone())?;
            }
        }
        builder.set_private_key(certificate.key)?;
        builder.check_private_key()?;

        for ca in certificate.ca_certificates {
            builder.cert_store_mut().add_cert(ca.clone())?;
        }

        let problems = Arc::clone(problems);
        let crls = Arc::clone(certificate.crls);
        builder.set_verify_callback(
            SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT,
            move |preverify_ok, ctx| {
                record_verification(preverify_ok, ctx, &crls, &problems);
                true
            },
        );
    }

    match &binding.psk {
        PskBinding::None => {}
        PskBinding::Offer { identity, key } => {
            let identity = identity.clone();
            let key = key.clone();
            builder.set_psk_client_callback(move |_ssl, _hint, identity_out, psk_out| {
                // identity is written NUL terminated
                if identity.len() >= identity_out.len() || key.len() > psk_out.len() {
                    return Ok(0);
                }
                identity_out[..identity.len()].copy_from_slice(&identity);
                identity_out[identity.len()] = 0;
                psk_out[..key.len()].copy_from_slice(key.expose());
                Ok(key.len())
            });
        }
        PskBinding::Resolve(resolver) => {
            let resolver = Arc::clone(resolver);
            let slot = Arc::clone(psk_identity);
            let rejected = Arc::clone(rejected_identity);
            builder.set_psk_server_callback(move |_ssl, identity, psk_out| {
                let Some(identity) = identity else {
                    return Ok(0);
                };
                match resolver.resolve(identity) {
                    Some(key) if key.len() <= psk_out.len() => {
                        psk_out[..key.len()].copy_from_slice(key.expose());
                        set_identity(&slot, identity);
                        Ok(key.len())
                    }
                    Some(_) => Ok(0),
                    None => {
                        set_identity(&rejected, identity);
                        Ok(0)
                    }
                }
            });
        }
    }

    Ok(builder.build())
}

/// Translate one verify callback invocation into problem flags.
///
/// No expected host name is set on the verify parameters, so
/// `X509_V_ERR_HOSTNAME_MISMATCH` never occurs and
/// [`CertificateProblems::CN_MISMATCH`] is not reported by this backend.
fn record_verification(
    preverify_ok: bool,
    ctx: &mut X509StoreContextRef,
    crls: &[X509Crl],
    problems: &AtomicU8,
) {
    let mut found = CertificateProblems::empty();

    if !preverify_ok {
        let code = ctx.error().as_raw();
        trace!(code, depth = ctx.error_depth(), "peer certificate verification error");
        match code {
            X509_V_ERR_CERT_HAS_EXPIRED | X509_V_ERR_CERT_NOT_YET_VALID => {
                found.insert(CertificateProblems::EXPIRED);
            }
            X509_V_ERR_CERT_REVOKED => found.insert(CertificateProblems::REVOKED),
            X509_V_ERR_HOSTNAME_MISMATCH => found.insert(CertificateProblems::CN_MISMATCH),
            X509_V_ERR_UNABLE_TO_GET_CRL => {}
            _ => found.insert(CertificateProblems::NOT_TRUSTED),
        }
    }

    if let Some(cert) = ctx.current_cert() {
        if is_revoked(cert, crls) {
            found.insert(CertificateProblems::REVOKED);
        }
    }

    if !found.is_empty() {
        problems.fetch_or(found.bits(), Ordering::SeqCst);
    }
}

fn is_revoked(cert: &X509Ref, crls: &[X509Crl]) -> bool {
    let cert = cert.to_owned();
    crls.iter()
        .any(|crl| matches!(crl.get_by_cert(&cert), CrlStatus::Revoked(_)))
}

/// An OpenSSL session over `S`.
pub struct OpenSslSession<S> {
    stream: SslStream<S>,
    side: Side,
    problems: Arc<AtomicU8>,
    psk_identity: Arc<Mutex<Option<Vec<u8>>>>,
    rejected_identity: Arc<Mutex<Option<Vec<u8>>>>,
}

impl<S: Read + Write> BackendSession for OpenSslSession<S> {
    fn step(&mut self) -> HandshakeStep {
        let result = match self.side {
            Side::Client => self.stream.connect(),
            Side::Server => self.stream.accept(),
        };

        match result {
            Ok(()) => HandshakeStep::Done,
            Err(e) if e.code() == ErrorCode::WANT_READ => HandshakeStep::WantRead,
            Err(e) if e.code() == ErrorCode::WANT_WRITE => HandshakeStep::WantWrite,
            Err(e) => HandshakeStep::Failed(BackendError::new(e.to_string())),
        }
    }

    fn negotiated_suite(&self) -> Option<String> {
        self.stream
            .ssl()
            .current_cipher()
            .map(|cipher| cipher.name().to_string())
    }

    fn certificate_problems(&self) -> CertificateProblems {
        CertificateProblems::from_bits(self.problems.load(Ordering::SeqCst))
    }

    fn psk_identity(&self) -> Option<Vec<u8>> {
        self.psk_identity.lock().ok().and_then(|guard| guard.clone())
    }

    fn rejected_psk_identity(&self) -> Option<Vec<u8>> {
        self.rejected_identity.lock().ok().and_then(|guard| guard.clone())
    }

    fn peer_certificate_der(&self) -> Option<Vec<u8>> {
        self.stream
            .ssl()
            .peer_certificate()
            .and_then(|cert| cert.to_der().ok())
    }

    fn close_notify(&mut self) -> io::Result<()> {
        self.stream.shutdown().map(|_| ()).map_err(|e| {
            e.into_io_error()
                .unwrap_or_else(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
        })
    }
}

impl<S: Read + Write> Read for OpenSslSession<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl<S: Read + Write> Write for OpenSslSession<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

const fn suite(
    name: &'static str,
    key_exchange: KeyExchange,
    cipher: BulkCipher,
    weak: bool,
    min_version: ProtocolVersion,
    max_version: ProtocolVersion,
) -> SuiteInfo {
    SuiteInfo {
        name,
        key_exchange,
        cipher,
        weak,
        min_version,
        max_version,
    }
}

/// Suites known to OpenSSL, strongest first. Entries that fail the policy
/// are listed too so that the filter, not the table, decides.
static CATALOG: &[SuiteInfo] = &[
    // TLS 1.3 only
    suite("TLS_AES_256_GCM_SHA384", Ecdhe, Aes256, false, Tls13, Tls13),
    suite("TLS_CHACHA20_POLY1305_SHA256", Ecdhe, Chacha20, false, Tls13, Tls13),
    suite("TLS_AES_128_GCM_SHA256", Ecdhe, Aes128, false, Tls13, Tls13),
    // certificate
    suite("ECDHE-ECDSA-AES256-GCM-SHA384", Ecdhe, Aes256, false, Tls12, Tls12),
    suite("ECDHE-RSA-AES256-GCM-SHA384", Ecdhe, Aes256, false, Tls12, Tls12),
    suite("ECDHE-ECDSA-CHACHA20-POLY1305", Ecdhe, Chacha20, false, Tls12, Tls12),
    suite("ECDHE-RSA-CHACHA20-POLY1305", Ecdhe, Chacha20, false, Tls12, Tls12),
    suite("ECDHE-ECDSA-AES128-GCM-SHA256", Ecdhe, Aes128, false, Tls12, Tls12),
    suite("ECDHE-RSA-AES128-GCM-SHA256", Ecdhe, Aes128, false, Tls12, Tls12),
    suite("DHE-RSA-AES256-GCM-SHA384", Dhe, Aes256, false, Tls12, Tls12),
    suite("DHE-RSA-AES128-GCM-SHA256", Dhe, Aes128, false, Tls12, Tls12),
    suite("ECDHE-ECDSA-AES256-SHA384", Ecdhe, Aes256, false, Tls12, Tls12),
    suite("ECDHE-RSA-AES256-SHA384", Ecdhe, Aes256, false, Tls12, Tls12),
    suite("ECDHE-ECDSA-AES128-SHA256", Ecdhe, Aes128, false, Tls12, Tls12),
    suite("ECDHE-RSA-AES128-SHA256", Ecdhe, Aes128, false, Tls12, Tls12),
    suite("ECDHE-ECDSA-ARIA256-GCM-SHA384", Ecdhe, Aria256, false, Tls12, Tls12),
    suite("ECDHE-ARIA128-GCM-SHA256", Ecdhe, Aria128, false, Tls12, Tls12),
    suite("ECDHE-ECDSA-CAMELLIA256-SHA384", Ecdhe, Camellia256, false, Tls12, Tls12),
    suite("ECDHE-RSA-CAMELLIA128-SHA256", Ecdhe, Camellia128, false, Tls12, Tls12),
    suite("ECDHE-ECDSA-AES256-SHA", Ecdhe, Aes256, false, Tls10, Tls12),
    suite("ECDHE-RSA-AES256-SHA", Ecdhe, Aes256, false, Tls10, Tls12),
    suite("ECDHE-ECDSA-AES128-SHA", Ecdhe, Aes128, false, Tls10, Tls12),
    suite("ECDHE-RSA-AES128-SHA", Ecdhe, Aes128, false, Tls10, Tls12),
    suite("AES256-GCM-SHA384", Rsa, Aes256, false, Tls12, Tls12),
    suite("AES128-GCM-SHA256", Rsa, Aes128, false, Tls12, Tls12),
    suite("AES256-SHA256", Rsa, Aes256, false, Tls12, Tls12),
    suite("AES128-SHA256", Rsa, Aes128, false, Tls12, Tls12),
    suite("AES256-SHA", Rsa, Aes256, false, Ssl3, Tls12),
    suite("AES128-SHA", Rsa, Aes128, false, Ssl3, Tls12),
    suite("CAMELLIA256-SHA", Rsa, Camellia256, false, Ssl3, Tls12),
    suite("CAMELLIA128-SHA", Rsa, Camellia128, false, Ssl3, Tls12),
    // PSK
    suite("ECDHE-PSK-CHACHA20-POLY1305", EcdhePsk, Chacha20, false, Tls12, Tls12),
    suite("DHE-PSK-AES256-GCM-SHA384", DhePsk, Aes256, false, Tls12, Tls12),
    suite("DHE-PSK-AES128-GCM-SHA256", DhePsk, Aes128, false, Tls12, Tls12),
    suite("PSK-AES256-GCM-SHA384", Psk, Aes256, false, Tls12, Tls12),
    suite("PSK-AES128-GCM-SHA256", Psk, Aes128, false, Tls12, Tls12),
    suite("PSK-CHACHA20-POLY1305", Psk, Chacha20, false, Tls12, Tls12),
    suite("ECDHE-PSK-AES256-CBC-SHA384", EcdhePsk, Aes256, false, Tls10, Tls12),
    suite("ECDHE-PSK-AES128-CBC-SHA256", EcdhePsk, Aes128, false, Tls10, Tls12),
    suite("DHE-PSK-AES256-CBC-SHA384", DhePsk, Aes256, false, Tls10, Tls12),
    suite("DHE-PSK-AES128-CBC-SHA256", DhePsk, Aes128, false, Tls10, Tls12),
    suite("RSA-PSK-AES256-GCM-SHA384", RsaPsk, Aes256, false, Tls12, Tls12),
    suite("RSA-PSK-AES128-GCM-SHA256", RsaPsk, Aes128, false, Tls12, Tls12),
    suite("PSK-AES256-CBC-SHA384", Psk, Aes256, false, Tls10, Tls12),
    suite("PSK-AES128-CBC-SHA256", Psk, Aes128, false, Tls10, Tls12),
    suite("ECDHE-PSK-AES256-CBC-SHA", EcdhePsk, Aes256, false, Tls10, Tls12),
    suite("ECDHE-PSK-AES128-CBC-SHA", EcdhePsk, Aes128, false, Tls10, Tls12),
    suite("PSK-AES256-CBC-SHA", Psk, Aes256, false, Ssl3, Tls12),
    suite("PSK-AES128-CBC-SHA", Psk, Aes128, false, Ssl3, Tls12),
    suite("PSK-CAMELLIA128-SHA256", Psk, Camellia128, false, Tls10, Tls12),
    // excluded by policy
    suite("ECDHE-RSA-DES-CBC3-SHA", Ecdhe, TripleDes, true, Tls10, Tls12),
    suite("DES-CBC3-SHA", Rsa, TripleDes, true, Ssl3, Tls12),
    suite("PSK-3DES-EDE-CBC-SHA", Psk, TripleDes, true, Ssl3, Tls12),
    suite("ECDHE-RSA-RC4-SHA", Ecdhe, Rc4, false, Tls10, Tls12),
    suite("RC4-SHA", Rsa, Rc4, false, Ssl3, Tls12),
    suite("RC4-MD5", Rsa, Rc4, false, Ssl3, Tls12),
    suite("PSK-RC4-SHA", Psk, Rc4, false, Ssl3, Tls12),
    suite("DES-CBC-SHA", Rsa, Des, true, Ssl3, Tls11),
    suite("EXP-RC4-MD5", Rsa, Rc4, true, Ssl3, Tls10),
    suite("EXP-DES-CBC-SHA", Rsa, Des, true, Ssl3, Tls10),
    suite("NULL-SHA256", Rsa, Null, true, Tls12, Tls12),
    suite("ECDHE-ECDSA-NULL-SHA", Ecdhe, Null, true, Tls10, Tls12),
    suite("PSK-NULL-SHA256", Psk, Null, true, Tls10, Tls12),
];

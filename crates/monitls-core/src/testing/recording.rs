//! Backend double that records what a context binds to each session.
//!
//! Sessions complete immediately. The negotiated suite is the first suite of
//! the bound set unless a [`ScriptedHandshake`] says otherwise.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use crate::error::{BackendError, CertificateProblems};
use crate::tls::backend::{
    BackendSession, HandshakeStep, PskBinding, SessionBinding, Side, TlsBackend,
};
use crate::tls::psk::PskResolver;
use crate::tls::suites::{
    BulkCipher, KeyExchange, ProtocolVersion, SuiteInfo, SuiteKind,
};

/// Suites known to the recording backend.
pub const RECORDING_CATALOG: &[SuiteInfo] = &[
    SuiteInfo {
        name: "TEST-ECDHE-AES128",
        key_exchange: KeyExchange::Ecdhe,
        cipher: BulkCipher::Aes128,
        weak: false,
        min_version: ProtocolVersion::Tls12,
        max_version: ProtocolVersion::Tls12,
    },
    SuiteInfo {
        name: "TEST-PSK-AES128",
        key_exchange: KeyExchange::Psk,
        cipher: BulkCipher::Aes128,
        weak: false,
        min_version: ProtocolVersion::Tls12,
        max_version: ProtocolVersion::Tls12,
    },
    SuiteInfo {
        name: "TEST-RC4",
        key_exchange: KeyExchange::Rsa,
        cipher: BulkCipher::Rc4,
        weak: false,
        min_version: ProtocolVersion::Ssl3,
        max_version: ProtocolVersion::Tls12,
    },
    SuiteInfo {
        name: "TEST-PSK-NULL",
        key_exchange: KeyExchange::Psk,
        cipher: BulkCipher::Null,
        weak: true,
        min_version: ProtocolVersion::Tls10,
        max_version: ProtocolVersion::Tls12,
    },
];

/// How the PSK was bound to a recorded session.
#[derive(Debug, Clone)]
pub enum RecordedPsk {
    None,
    Offer { identity: Vec<u8>, key: Vec<u8> },
    Resolve(Arc<PskResolver>),
}

/// One call to [`TlsBackend::start`].
#[derive(Debug, Clone)]
pub struct RecordedStart {
    pub side: Side,
    pub suite_kind: SuiteKind,
    pub suites: Vec<&'static str>,
    pub certificate_bound: bool,
    pub psk: RecordedPsk,
}

/// Outcome the next session should report.
#[derive(Debug, Clone, Default)]
pub struct ScriptedHandshake {
    /// Negotiated suite; defaults to the first bound suite.
    pub suite: Option<String>,
    pub problems: CertificateProblems,
    /// Identity the peer presented, for server sessions.
    pub psk_identity: Option<Vec<u8>>,
    /// Identity the server could not resolve; pair with `failure`.
    pub rejected_psk_identity: Option<Vec<u8>>,
    pub peer_certificate_der: Option<Vec<u8>>,
    /// Number of would-block steps before the result.
    pub would_block: usize,
    /// Fail the handshake with this message.
    pub failure: Option<String>,
}

/// Records every generator check and session start.
#[derive(Debug, Clone, Default)]
pub struct RecordingBackend {
    random_checks: Arc<Mutex<usize>>,
    starts: Arc<Mutex<Vec<RecordedStart>>>,
    script: Arc<Mutex<VecDeque<ScriptedHandshake>>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next session.
    pub fn script(&self, handshake: ScriptedHandshake) {
        self.script.lock().expect("script lock").push_back(handshake);
    }

    /// How often the generator was checked.
    pub fn random_checks(&self) -> usize {
        *self.random_checks.lock().expect("random checks lock")
    }

    pub fn starts(&self) -> Vec<RecordedStart> {
        self.starts.lock().expect("starts lock").clone()
    }

    /// The most recent session start.
    pub fn last_start(&self) -> RecordedStart {
        self.starts()
            .pop()
            .expect("no session was started")
    }
}

impl TlsBackend for RecordingBackend {
    type Session<S: Read + Write> = RecordingSession<S>;

    fn name(&self) -> &'static str {
        "recording"
    }

    fn suite_catalog(&self) -> &[SuiteInfo] {
        RECORDING_CATALOG
    }

    fn check_random(&self) -> Result<(), BackendError> {
        *self.random_checks.lock().expect("random checks lock") += 1;
        Ok(())
    }

    fn start<S: Read + Write>(
        &self,
        stream: S,
        binding: SessionBinding<'_>,
    ) -> Result<RecordingSession<S>, BackendError> {
        let psk = match &binding.psk {
            PskBinding::None => RecordedPsk::None,
            PskBinding::Offer { identity, key } => RecordedPsk::Offer {
                identity: identity.clone(),
                key: key.expose().to_vec(),
            },
            PskBinding::Resolve(resolver) => RecordedPsk::Resolve(Arc::clone(resolver)),
        };

        let script = self
            .script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_default();

        let psk_identity = match &psk {
            RecordedPsk::Offer { identity, .. } => Some(identity.clone()),
            _ => script.psk_identity.clone(),
        };

        self.starts.lock().expect("starts lock").push(RecordedStart {
            side: binding.side,
            suite_kind: binding.suites.kind(),
            suites: binding.suites.names().to_vec(),
            certificate_bound: binding.certificate.is_some(),
            psk,
        });

        let suite = script
            .suite
            .clone()
            .or_else(|| binding.suites.names().first().map(|name| (*name).to_string()));

        Ok(RecordingSession {
            stream,
            suite,
            psk_identity,
            script,
        })
    }
}

/// Session that passes bytes straight through to the stream.
pub struct RecordingSession<S> {
    stream: S,
    suite: Option<String>,
    psk_identity: Option<Vec<u8>>,
    script: ScriptedHandshake,
}

impl<S: Read + Write> BackendSession for RecordingSession<S> {
    fn step(&mut self) -> HandshakeStep {
        if self.script.would_block > 0 {
            self.script.would_block -= 1;
            return HandshakeStep::WantRead;
        }
        match &self.script.failure {
            Some(message) => HandshakeStep::Failed(BackendError::new(message.clone())),
            None => HandshakeStep::Done,
        }
    }

    fn negotiated_suite(&self) -> Option<String> {
        self.suite.clone()
    }

    fn certificate_problems(&self) -> CertificateProblems {
        self.script.problems
    }

    fn psk_identity(&self) -> Option<Vec<u8>> {
        self.psk_identity.clone()
    }

    fn rejected_psk_identity(&self) -> Option<Vec<u8>> {
        self.script.rejected_psk_identity.clone()
    }

    fn peer_certificate_der(&self) -> Option<Vec<u8>> {
        self.script.peer_certificate_der.clone()
    }

    fn close_notify(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl<S: Read + Write> Read for RecordingSession<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl<S: Read + Write> Write for RecordingSession<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

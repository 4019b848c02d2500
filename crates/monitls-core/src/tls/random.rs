//! Readiness of the backend's random generator.
//!
//! The engine seeds its own generator from the operating system, separately
//! in every process, so no personalization is supplied here. A process only
//! confirms once, at child init, that the generator produces output.

use tracing::debug;

use crate::error::ConfigResult;
use crate::tls::backend::TlsBackend;

/// Proof that the backend generator was checked for this process.
#[derive(Debug, Clone)]
pub struct RandomSource {
    backend: &'static str,
}

impl RandomSource {
    /// Run the backend's generator health check.
    ///
    /// # Errors
    ///
    /// Returns an error if the generator cannot produce output.
    pub fn check<B: TlsBackend>(backend: &B, label: &str) -> ConfigResult<Self> {
        backend.check_random()?;
        debug!(backend = backend.name(), role = label, "random number generator ready");
        Ok(Self {
            backend: backend.name(),
        })
    }

    /// Name of the backend whose generator was checked.
    #[must_use]
    pub fn backend(&self) -> &'static str {
        self.backend
    }
}

//! PSK resolution: the local identity first, then an optional external store.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::error::{ConfigError, ConfigResult};
use crate::tls::secret::{SecretBytes, MAX_PSK_HEX_LEN, MAX_PSK_IDENTITY_LEN, MAX_PSK_LEN};

/// External source of PSKs, keyed by identity.
///
/// Returns the key as hex digits. Implementations must be fast; they are
/// consulted from inside the handshake.
pub trait PskLookup: Send + Sync + fmt::Debug {
    fn lookup(&self, identity: &[u8]) -> Option<Zeroizing<String>>;
}

/// In-memory PSK store.
#[derive(Default)]
pub struct InMemoryPskStore {
    keys: HashMap<Vec<u8>, Zeroizing<String>>,
}

impl InMemoryPskStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the key of `identity`.
    pub fn insert(&mut self, identity: impl Into<Vec<u8>>, psk_hex: impl Into<String>) {
        self.keys
            .insert(identity.into(), Zeroizing::new(psk_hex.into()));
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl fmt::Debug for InMemoryPskStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryPskStore")
            .field("identities", &self.keys.len())
            .finish()
    }
}

impl PskLookup for InMemoryPskStore {
    fn lookup(&self, identity: &[u8]) -> Option<Zeroizing<String>> {
        self.keys.get(identity).cloned()
    }
}

/// File-based PSK store.
///
/// Loads keys from a file in the format:
/// ```text
/// identity1:0123456789abcdef
/// identity2:fedcba9876543210
/// ```
/// The identity is everything before the last `:`.
#[derive(Debug)]
pub struct FilePskStore {
    inner: InMemoryPskStore,
}

impl FilePskStore {
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a line is malformed.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let contents = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
            ConfigError::FileRead {
                path: path.display().to_string(),
                source: e,
            }
        })?);

        let malformed = |line: usize, message: &str| ConfigError::PskStore {
            path: path.display().to_string(),
            line,
            message: message.to_string(),
        };

        let mut inner = InMemoryPskStore::new();
        for (index, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (identity, psk_hex) = line
                .rsplit_once(':')
                .ok_or_else(|| malformed(index + 1, "expected 'identity:hexkey'"))?;
            if identity.is_empty() || identity.len() > MAX_PSK_IDENTITY_LEN {
                return Err(malformed(index + 1, "identity is empty or too long"));
            }
            if psk_hex.is_empty() || psk_hex.len() > MAX_PSK_HEX_LEN {
                return Err(malformed(index + 1, "key is empty or too long"));
            }
            inner.insert(identity.as_bytes(), psk_hex);
        }

        debug!(path = %path.display(), identities = inner.len(), "loaded PSK store");
        Ok(Self { inner })
    }
}

impl PskLookup for FilePskStore {
    fn lookup(&self, identity: &[u8]) -> Option<Zeroizing<String>> {
        self.inner.lookup(identity)
    }
}

/// Maps a presented identity to key bytes.
///
/// The local identity always wins, even when the external store knows the
/// same identity with another key.
#[derive(Default)]
pub struct PskResolver {
    local: Option<(Vec<u8>, SecretBytes)>,
    external: Option<Arc<dyn PskLookup>>,
}

impl PskResolver {
    #[must_use]
    pub fn new(
        local: Option<(Vec<u8>, SecretBytes)>,
        external: Option<Arc<dyn PskLookup>>,
    ) -> Self {
        Self { local, external }
    }

    /// Resolver that only knows the local identity.
    #[must_use]
    pub fn local_only(identity: Vec<u8>, key: SecretBytes) -> Self {
        Self::new(Some((identity, key)), None)
    }

    pub fn has_external(&self) -> bool {
        self.external.is_some()
    }

    pub fn has_local(&self) -> bool {
        self.local.is_some()
    }

    /// Key for `identity`, or `None` if no source knows it.
    ///
    /// A key from the external store that is not valid hex is logged and
    /// treated as unknown.
    pub fn resolve(&self, identity: &[u8]) -> Option<SecretBytes> {
        if let Some((local_identity, key)) = &self.local {
            if local_identity.len() == identity.len() && local_identity.as_slice() == identity {
                return Some(key.clone());
            }
        }

        let external = self.external.as_ref()?;

        if identity.len() > MAX_PSK_IDENTITY_LEN {
            warn!(
                length = identity.len(),
                "PSK identity is too long, ignoring"
            );
            return None;
        }

        let Some(psk_hex) = external.lookup(identity) else {
            debug!(
                identity = %String::from_utf8_lossy(identity),
                "cannot find requested PSK identity"
            );
            return None;
        };

        match SecretBytes::from_hex(&psk_hex, MAX_PSK_LEN) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(
                    identity = %String::from_utf8_lossy(identity),
                    error = ?e,
                    "cannot convert PSK to binary form for PSK identity"
                );
                None
            }
        }
    }
}

impl fmt::Debug for PskResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PskResolver")
            .field(
                "local_identity",
                &self
                    .local
                    .as_ref()
                    .map(|(identity, _)| String::from_utf8_lossy(identity).into_owned()),
            )
            .field("external", &self.external.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn store_with(identity: &str, psk_hex: &str) -> Arc<dyn PskLookup> {
        let mut store = InMemoryPskStore::new();
        store.insert(identity, psk_hex);
        Arc::new(store)
    }

    #[test]
    fn test_local_identity_wins() {
        let resolver = PskResolver::new(
            Some((b"edge".to_vec(), SecretBytes::new(vec![1, 2, 3, 4]))),
            Some(store_with("edge", "ffffffff")),
        );
        assert!(resolver.has_local());
        assert_eq!(resolver.resolve(b"edge").unwrap().expose(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_external_lookup() {
        let resolver = PskResolver::new(
            Some((b"edge".to_vec(), SecretBytes::new(vec![1]))),
            Some(store_with("host-42", "a0b1")),
        );
        assert_eq!(resolver.resolve(b"host-42").unwrap().expose(), &[0xa0, 0xb1]);
        assert!(resolver.resolve(b"host-43").is_none());
    }

    #[test]
    fn test_prefix_of_local_identity_is_not_a_match() {
        let resolver = PskResolver::local_only(b"edge-1".to_vec(), SecretBytes::new(vec![9]));
        assert!(resolver.resolve(b"edge").is_none());
        assert!(resolver.resolve(b"edge-10").is_none());
    }

    #[test]
    fn test_bad_hex_is_not_found() {
        let resolver = PskResolver::new(None, Some(store_with("host", "xyz1")));
        assert!(resolver.resolve(b"host").is_none());
    }

    #[test]
    fn test_overlong_identity_rejected() {
        let identity = "i".repeat(MAX_PSK_IDENTITY_LEN + 1);
        let resolver = PskResolver::new(None, Some(store_with(&identity, "0102")));
        assert!(resolver.resolve(identity.as_bytes()).is_none());
    }

    #[test]
    fn test_file_store() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# agents").unwrap();
        writeln!(file, "agent:01:0a0b").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "proxy:ffff").unwrap();
        file.flush().unwrap();

        let store = FilePskStore::load(file.path()).unwrap();
        assert_eq!(store.lookup(b"agent:01").unwrap().as_str(), "0a0b");
        assert_eq!(store.lookup(b"proxy").unwrap().as_str(), "ffff");
        assert!(store.lookup(b"agent").is_none());
    }

    #[test]
    fn test_file_store_rejects_malformed_line() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "no-separator").unwrap();
        file.flush().unwrap();

        let err = FilePskStore::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_debug_hides_keys() {
        let resolver = PskResolver::local_only(b"edge".to_vec(), SecretBytes::new(vec![0xaa]));
        let shown = format!("{resolver:?}");
        assert!(shown.contains("edge"));
        assert!(!shown.contains("aa"));
    }
}

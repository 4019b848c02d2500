//! Owned key material that is wiped when dropped.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Longest PSK accepted, in bytes.
pub const MAX_PSK_LEN: usize = 256;

/// Longest PSK in its hex form.
pub const MAX_PSK_HEX_LEN: usize = 2 * MAX_PSK_LEN;

/// Longest PSK identity accepted, in bytes.
pub const MAX_PSK_IDENTITY_LEN: usize = 128;

/// Why a hex string could not be turned into key bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HexError {
    /// No digits at all.
    Empty,
    /// Decoded key would exceed the limit.
    TooLong,
    /// Odd number of digits or a non-hex character.
    Invalid,
}

/// Secret byte string, zeroed on drop.
///
/// `Debug` never prints the content.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Decode a hex string into at most `max_len` bytes.
    ///
    /// Nothing usable is returned on failure; any partially decoded buffer
    /// is wiped.
    ///
    /// # Errors
    ///
    /// See [`HexError`].
    pub fn from_hex(hex_digits: &str, max_len: usize) -> Result<Self, HexError> {
        if hex_digits.is_empty() {
            return Err(HexError::Empty);
        }
        if hex_digits.len() > 2 * max_len {
            return Err(HexError::TooLong);
        }
        if hex_digits.len() % 2 != 0 {
            return Err(HexError::Invalid);
        }

        let mut decoded = vec![0u8; hex_digits.len() / 2];
        match hex::decode_to_slice(hex_digits, &mut decoded) {
            Ok(()) => Ok(Self(decoded)),
            Err(_) => {
                decoded.zeroize();
                Err(HexError::Invalid)
            }
        }
    }

    /// Lowercase hex form. The returned string is not wiped; use only for
    /// tests and diagnostics that are not logged.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    #[must_use]
    pub fn expose(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes(<{} bytes>)", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_mixed_case() {
        let key = SecretBytes::from_hex("00aBcDeF", MAX_PSK_LEN).unwrap();
        assert_eq!(key.expose(), &[0x00, 0xab, 0xcd, 0xef]);
        assert_eq!(key.to_hex(), "00abcdef");
    }

    #[test]
    fn test_decode_rejects_odd_length() {
        assert_eq!(
            SecretBytes::from_hex("abc", MAX_PSK_LEN),
            Err(HexError::Invalid)
        );
    }

    #[test]
    fn test_decode_rejects_non_hex() {
        assert_eq!(
            SecretBytes::from_hex("0g", MAX_PSK_LEN),
            Err(HexError::Invalid)
        );
    }

    #[test]
    fn test_decode_rejects_overflow() {
        let digits = "ab".repeat(MAX_PSK_LEN + 1);
        assert_eq!(
            SecretBytes::from_hex(&digits, MAX_PSK_LEN),
            Err(HexError::TooLong)
        );
        let exact = "ab".repeat(MAX_PSK_LEN);
        assert_eq!(
            SecretBytes::from_hex(&exact, MAX_PSK_LEN).unwrap().len(),
            MAX_PSK_LEN
        );
    }

    #[test]
    fn test_decode_rejects_empty() {
        assert_eq!(SecretBytes::from_hex("", 4), Err(HexError::Empty));
    }

    #[test]
    fn test_debug_hides_content() {
        let key = SecretBytes::new(vec![0x41; 8]);
        let shown = format!("{key:?}");
        assert_eq!(shown, "SecretBytes(<8 bytes>)");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn decode_then_encode_is_lowercase_input(digits in "([0-9a-fA-F]{2}){1,256}") {
                let key = SecretBytes::from_hex(&digits, MAX_PSK_LEN).unwrap();
                prop_assert_eq!(key.len(), digits.len() / 2);
                prop_assert_eq!(key.to_hex(), digits.to_ascii_lowercase());
            }

            #[test]
            fn odd_length_never_decodes(digits in "[0-9a-f]{1,511}") {
                prop_assume!(digits.len() % 2 == 1);
                prop_assert_eq!(SecretBytes::from_hex(&digits, MAX_PSK_LEN), Err(HexError::Invalid));
            }

            #[test]
            fn non_hex_character_never_decodes(
                prefix in "([0-9a-f]{2}){0,20}",
                bad in "[g-zG-Z!@# ]",
                suffix in "[0-9a-f]",
            ) {
                let digits = format!("{prefix}{bad}{suffix}");
                prop_assert_eq!(SecretBytes::from_hex(&digits, MAX_PSK_LEN), Err(HexError::Invalid));
            }
        }
    }
}

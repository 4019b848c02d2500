//! Connection modes and the policy values built from them.

use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// How a connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// Plain byte stream.
    Unencrypted,
    /// TLS authenticated with certificates.
    Certificate,
    /// TLS authenticated with a pre-shared key.
    Psk,
}

impl ConnectionMode {
    pub const ALL: [Self; 3] = [Self::Unencrypted, Self::Certificate, Self::Psk];

    /// Human readable name used in log lines and error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unencrypted => "unencrypted",
            Self::Certificate => "TLS with certificate",
            Self::Psk => "TLS with PSK",
        }
    }

    /// Token used in `TLSConnect` and `TLSAccept` values.
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::Unencrypted => "unencrypted",
            Self::Certificate => "cert",
            Self::Psk => "psk",
        }
    }

    /// Parse a single `TLSConnect` value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPolicyValue`] for unknown tokens.
    pub fn parse_connect(value: &str) -> ConfigResult<Self> {
        Self::from_token(value.trim()).ok_or_else(|| ConfigError::InvalidPolicyValue {
            parameter: "TLSConnect",
            value: value.to_string(),
        })
    }

    fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.token() == token)
    }

    const fn bit(self) -> u8 {
        match self {
            Self::Unencrypted => 0x01,
            Self::Certificate => 0x02,
            Self::Psk => 0x04,
        }
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of connection modes a listener admits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AcceptModes(u8);

impl AcceptModes {
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn only(mode: ConnectionMode) -> Self {
        Self(mode.bit())
    }

    #[must_use]
    pub const fn with(self, mode: ConnectionMode) -> Self {
        Self(self.0 | mode.bit())
    }

    #[must_use]
    pub const fn contains(self, mode: ConnectionMode) -> bool {
        self.0 & mode.bit() != 0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether any TLS mode is admitted.
    #[must_use]
    pub const fn admits_tls(self) -> bool {
        self.contains(ConnectionMode::Certificate) || self.contains(ConnectionMode::Psk)
    }

    pub fn iter(self) -> impl Iterator<Item = ConnectionMode> {
        ConnectionMode::ALL
            .into_iter()
            .filter(move |mode| self.contains(*mode))
    }

    /// Parse a comma separated `TLSAccept` value such as `"cert, psk"`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPolicyValue`] if any token is unknown
    /// or the list is empty.
    pub fn parse(value: &str) -> ConfigResult<Self> {
        let invalid = || ConfigError::InvalidPolicyValue {
            parameter: "TLSAccept",
            value: value.to_string(),
        };

        let mut modes = Self::empty();
        for token in value.split(',').map(str::trim) {
            let mode = ConnectionMode::from_token(token).ok_or_else(invalid)?;
            modes = modes.with(mode);
        }

        if modes.is_empty() {
            return Err(invalid());
        }
        Ok(modes)
    }
}

impl From<ConnectionMode> for AcceptModes {
    fn from(mode: ConnectionMode) -> Self {
        Self::only(mode)
    }
}

impl BitOr<ConnectionMode> for ConnectionMode {
    type Output = AcceptModes;

    fn bitor(self, rhs: ConnectionMode) -> AcceptModes {
        AcceptModes::only(self).with(rhs)
    }
}

impl BitOr<ConnectionMode> for AcceptModes {
    type Output = AcceptModes;

    fn bitor(self, rhs: ConnectionMode) -> AcceptModes {
        self.with(rhs)
    }
}

impl fmt::Display for AcceptModes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tokens: Vec<&str> = self.iter().map(ConnectionMode::token).collect();
        f.write_str(&tokens.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_names() {
        assert_eq!(ConnectionMode::Unencrypted.name(), "unencrypted");
        assert_eq!(ConnectionMode::Certificate.name(), "TLS with certificate");
        assert_eq!(ConnectionMode::Psk.name(), "TLS with PSK");
        assert_eq!(ConnectionMode::Psk.to_string(), "TLS with PSK");
    }

    #[test]
    fn test_parse_connect() {
        assert_eq!(
            ConnectionMode::parse_connect("cert").unwrap(),
            ConnectionMode::Certificate
        );
        assert_eq!(
            ConnectionMode::parse_connect(" psk ").unwrap(),
            ConnectionMode::Psk
        );
        let err = ConnectionMode::parse_connect("cert,psk").unwrap_err();
        assert!(err.to_string().contains("invalid value of \"TLSConnect\""));
    }

    #[test]
    fn test_parse_accept_list() {
        let modes = AcceptModes::parse("unencrypted, cert,psk").unwrap();
        assert!(modes.contains(ConnectionMode::Unencrypted));
        assert!(modes.contains(ConnectionMode::Certificate));
        assert!(modes.contains(ConnectionMode::Psk));
        assert_eq!(modes.to_string(), "unencrypted,cert,psk");
    }

    #[test]
    fn test_parse_accept_rejects_unknown() {
        assert!(AcceptModes::parse("cert,tls").is_err());
        assert!(AcceptModes::parse("").is_err());
        assert!(AcceptModes::parse("cert,,psk").is_err());
    }

    #[test]
    fn test_admits_tls() {
        assert!(!AcceptModes::only(ConnectionMode::Unencrypted).admits_tls());
        assert!((ConnectionMode::Unencrypted | ConnectionMode::Psk).admits_tls());
    }
}

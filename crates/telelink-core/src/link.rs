//! Transport link value types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Network interface the link manager drives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkInterface {
    /// Wireless station joining an access point.
    #[default]
    Station,
    /// Wired interface; no association step.
    Ethernet,
}

/// Link manager settings passed to [`TransportLink::init`](crate::TransportLink::init).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Interface to bring up.
    pub interface: LinkInterface,
}

/// Access point security mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkSecurity {
    /// No authentication.
    Open,
    /// WPA2 personal.
    #[default]
    Wpa2Personal,
    /// WPA3 personal.
    Wpa3Personal,
    /// WPA2/WPA3 transition mode.
    Wpa2Wpa3Personal,
}

impl LinkSecurity {
    /// Whether this mode needs a passphrase.
    pub fn requires_password(&self) -> bool {
        !matches!(self, LinkSecurity::Open)
    }
}

/// Credentials for joining a network.
///
/// The password is never printed by `Debug`.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    /// Network name.
    pub ssid: String,
    /// Passphrase.
    pub password: String,
    /// Security mode.
    pub security: LinkSecurity,
}

impl Credentials {
    /// Create credentials for a secured network.
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
            security: LinkSecurity::default(),
        }
    }

    /// Create credentials for an open network.
    pub fn open(ssid: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: String::new(),
            security: LinkSecurity::Open,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("password", &redacted(&self.password))
            .field("security", &self.security)
            .finish()
    }
}

pub(crate) fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() { "" } else { "<redacted>" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_password() {
        let credentials = Credentials::new("lab", "hunter22");
        let debug = format!("{:?}", credentials);
        assert!(debug.contains("lab"));
        assert!(!debug.contains("hunter22"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_open_network() {
        let credentials = Credentials::open("cafe");
        assert!(!credentials.security.requires_password());
        assert!(credentials.password.is_empty());
    }

    #[test]
    fn test_security_serde() {
        let json = serde_json::to_string(&LinkSecurity::Wpa2Wpa3Personal).unwrap();
        assert_eq!(json, "\"wpa2_wpa3_personal\"");
    }
}

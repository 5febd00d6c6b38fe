//! POP3 server configuration

use std::time::Duration;

/// Default TCP connect timeout
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 60;

/// Default read/write timeout on the established connection
const DEFAULT_IO_TIMEOUT_SECS: u64 = 120;

/// How the connection is secured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Security {
    /// Cleartext for the whole session
    Plain,
    /// Cleartext greeting, then upgrade with STLS (RFC 2595)
    StartTls,
    /// TLS from the first byte (POP3S)
    Tls,
}

/// POP3 server configuration
///
/// Contains all the information needed to connect to a POP3 server.
///
/// # Example
///
/// ```
/// use pop3_engine::{Security, ServerConfig};
///
/// // Recommended: use the constructor methods
/// let config = ServerConfig::tls("pop.example.com", "user", "pass");
/// assert_eq!(config.port, 995);
///
/// // Or adjust fields afterwards
/// let mut config = ServerConfig::starttls("pop.example.com", "user", "pass");
/// config.disable_extensions = true;
/// assert_eq!(config.security, Security::StartTls);
/// ```
#[must_use]
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServerConfig {
    /// Server hostname (e.g., "pop.example.com")
    pub host: String,

    /// Server port (typically 110 for plain/STLS, 995 for TLS)
    pub port: u16,

    /// Connection security
    #[cfg_attr(feature = "serde", serde(default = "default_security"))]
    pub security: Security,

    /// Allow insecure TLS connections (self-signed certificates, expired certificates)
    ///
    /// **Security Warning:** Setting this to `true` disables certificate validation,
    /// making your connection vulnerable to man-in-the-middle attacks. Only use this
    /// for testing or with servers you trust on a secure network.
    ///
    /// Default: `false` (secure certificate validation enabled)
    #[cfg_attr(feature = "serde", serde(default))]
    pub allow_insecure_tls: bool,

    /// Username for authentication
    pub username: String,

    /// Password for authentication
    pub password: String,

    /// Skip the `CAPA` probe (for servers that misbehave on it)
    #[cfg_attr(feature = "serde", serde(default))]
    pub disable_extensions: bool,

    /// TCP connect timeout
    #[cfg_attr(feature = "serde", serde(default = "default_connect_timeout"))]
    pub connect_timeout: Duration,

    /// Read/write timeout; a stalled server surfaces as [`Pop3Error::Io`](crate::Pop3Error::Io)
    #[cfg_attr(feature = "serde", serde(default = "default_io_timeout"))]
    pub io_timeout: Duration,

    /// Trace the protocol exchange (credentials masked)
    #[cfg_attr(feature = "serde", serde(default))]
    pub log_wire: bool,
}

#[cfg(feature = "serde")]
fn default_security() -> Security {
    Security::Tls
}

#[cfg(feature = "serde")]
fn default_connect_timeout() -> Duration {
    Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS)
}

#[cfg(feature = "serde")]
fn default_io_timeout() -> Duration {
    Duration::from_secs(DEFAULT_IO_TIMEOUT_SECS)
}

impl ServerConfig {
    /// Create a new server configuration
    ///
    /// # Arguments
    ///
    /// * `host` - Server hostname
    /// * `port` - Server port
    /// * `security` - Plain, STLS or implicit TLS
    /// * `username` - Authentication username
    /// * `password` - Authentication password
    pub fn new(
        host: impl Into<String>,
        port: u16,
        security: Security,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            security,
            allow_insecure_tls: false,
            username: username.into(),
            password: password.into(),
            disable_extensions: false,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            io_timeout: Duration::from_secs(DEFAULT_IO_TIMEOUT_SECS),
            log_wire: false,
        }
    }

    /// Create a configuration for implicit TLS on the standard secure port (995)
    pub fn tls(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::new(host, 995, Security::Tls, username, password)
    }

    /// Create a configuration that upgrades with STLS on the standard port (110)
    pub fn starttls(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::new(host, 110, Security::StartTls, username, password)
    }

    /// Create a configuration for a plain connection on the standard port (110)
    ///
    /// **Warning:** Plain connections transmit credentials in clear text.
    /// Use TLS connections whenever possible.
    pub fn plain(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::new(host, 110, Security::Plain, username, password)
    }

    /// Create a TLS configuration that accepts self-signed certificates
    ///
    /// **Security Warning:** This configuration disables certificate validation,
    /// making your connection vulnerable to man-in-the-middle attacks. Only use
    /// this for testing or with servers you trust on a secure network.
    ///
    /// # Example
    ///
    /// ```
    /// use pop3_engine::ServerConfig;
    ///
    /// // For a local POP3 server with a self-signed certificate
    /// let config = ServerConfig::tls_insecure("localhost", "user", "pass");
    /// assert!(config.allow_insecure_tls);
    /// ```
    pub fn tls_insecure(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let mut config = Self::tls(host, username, password);
        config.allow_insecure_tls = true;
        config
    }

    /// Whether the session will be encrypted before authentication
    pub fn is_encrypted(&self) -> bool {
        self.security != Security::Plain
    }
}

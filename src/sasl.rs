//! SASL (Simple Authentication and Security Layer) support for POP3
//!
//! This module implements the client side of RFC 5034 `AUTH`.
//!
//! # SASL Mechanisms
//!
//! - PLAIN: username/password in one initial response (requires TLS)
//! - LOGIN: username and password sent in answer to two challenges (requires TLS)
//! - CRAM-MD5: HMAC-MD5 keyed digest of a server challenge
//!
//! Others can be added by implementing [`SaslMechanism`]. The mechanism names
//! this crate knows are listed by [`authtype`], which `CAPA` parsing uses to
//! decide which advertised mechanisms are usable.
//!
//! # Example
//!
//! ```no_run
//! # use pop3_engine::{Pop3Client, SaslPlain, ServerConfig};
//! # use std::sync::Arc;
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! # let config = ServerConfig::tls("pop.example.com", "user", "pass");
//! let mut client = Pop3Client::connect(Arc::new(config))?;
//!
//! // Authenticate using SASL PLAIN
//! let mechanism = SaslPlain::new("username", "password");
//! client.authenticate_sasl(mechanism)?;
//! # Ok(())
//! # }
//! ```

use crate::apop::to_hex;
use crate::{Pop3Error, Result};
use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use md5::Md5;

type HmacMd5 = Hmac<Md5>;

/// Mechanisms this crate can run, by canonical name
const KNOWN_MECHANISMS: &[&str] = &["PLAIN", "LOGIN", "CRAM-MD5"];

/// Look up a SASL mechanism advertised by the server
///
/// Returns the canonical name when the mechanism is supported, so the result
/// can be stored in [`AuthType::Sasl`](crate::AuthType::Sasl).
pub fn authtype(name: &str) -> Option<&'static str> {
    KNOWN_MECHANISMS
        .iter()
        .copied()
        .find(|known| known.eq_ignore_ascii_case(name))
}

/// Trait for SASL authentication mechanisms
///
/// Implement this trait to add support for additional SASL mechanisms.
pub trait SaslMechanism {
    /// Returns the name of the SASL mechanism (e.g., "PLAIN", "CRAM-MD5")
    fn mechanism_name(&self) -> &str;

    /// Generate the initial client response
    ///
    /// Returns `None` if the mechanism doesn't support initial responses.
    /// Returns `Some(data)` where data will be base64-encoded by the framework.
    fn initial_response(&self) -> Result<Option<Vec<u8>>>;

    /// Process a server challenge and generate a client response
    ///
    /// # Arguments
    ///
    /// * `challenge` - Base64-decoded challenge data from a `+ ` continuation line
    fn process_challenge(&mut self, challenge: &[u8]) -> Result<Vec<u8>>;

    /// Check if the mechanism requires TLS/encryption
    fn requires_tls(&self) -> bool {
        false
    }
}

/// Base64-encode data for SASL exchange
///
/// Empty data is encoded as "=" per RFC 5034.
pub fn encode_sasl_data(data: &[u8]) -> String {
    if data.is_empty() {
        "=".to_string()
    } else {
        STANDARD.encode(data)
    }
}

/// Base64-decode data from SASL exchange
///
/// "=" and the empty string decode as empty data.
pub fn decode_sasl_data(encoded: &str) -> Result<Vec<u8>> {
    let encoded = encoded.trim();
    if encoded.is_empty() || encoded == "=" {
        return Ok(Vec::new());
    }

    STANDARD
        .decode(encoded)
        .map_err(|e| Pop3Error::InvalidResponse(format!("Invalid base64 in SASL challenge: {}", e)))
}

/// SASL PLAIN mechanism implementation
///
/// Sends `\0username\0password` as the initial response. Credentials travel
/// in cleartext (base64 is not encryption), so `requires_tls()` is true.
#[derive(Debug, Clone)]
pub struct SaslPlain {
    username: String,
    password: String,
}

impl SaslPlain {
    /// Create a new SASL PLAIN mechanism with the given credentials
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl SaslMechanism for SaslPlain {
    fn mechanism_name(&self) -> &str {
        "PLAIN"
    }

    fn initial_response(&self) -> Result<Option<Vec<u8>>> {
        let mut response = Vec::with_capacity(self.username.len() + self.password.len() + 2);
        response.push(0);
        response.extend_from_slice(self.username.as_bytes());
        response.push(0);
        response.extend_from_slice(self.password.as_bytes());
        Ok(Some(response))
    }

    fn process_challenge(&mut self, _challenge: &[u8]) -> Result<Vec<u8>> {
        Err(Pop3Error::AuthFailed(
            "PLAIN mechanism does not support challenge-response".to_string(),
        ))
    }

    fn requires_tls(&self) -> bool {
        true
    }
}

/// SASL LOGIN mechanism
///
/// Answers the first challenge with the username and the second with the
/// password, whatever the challenge text says.
#[derive(Debug, Clone)]
pub struct SaslLogin {
    username: String,
    password: String,
    step: u8,
}

impl SaslLogin {
    /// Create a new SASL LOGIN mechanism with the given credentials
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            step: 0,
        }
    }
}

impl SaslMechanism for SaslLogin {
    fn mechanism_name(&self) -> &str {
        "LOGIN"
    }

    fn initial_response(&self) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn process_challenge(&mut self, _challenge: &[u8]) -> Result<Vec<u8>> {
        self.step += 1;
        match self.step {
            1 => Ok(self.username.as_bytes().to_vec()),
            2 => Ok(self.password.as_bytes().to_vec()),
            _ => Err(Pop3Error::AuthFailed(
                "unexpected extra LOGIN challenge".to_string(),
            )),
        }
    }

    fn requires_tls(&self) -> bool {
        true
    }
}

/// SASL CRAM-MD5 mechanism (RFC 2195)
///
/// Responds with `username SP hex(HMAC-MD5(password, challenge))`.
#[derive(Debug, Clone)]
pub struct SaslCramMd5 {
    username: String,
    password: String,
}

impl SaslCramMd5 {
    /// Create a new SASL CRAM-MD5 mechanism with the given credentials
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl SaslMechanism for SaslCramMd5 {
    fn mechanism_name(&self) -> &str {
        "CRAM-MD5"
    }

    fn initial_response(&self) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn process_challenge(&mut self, challenge: &[u8]) -> Result<Vec<u8>> {
        let mut mac = HmacMd5::new_from_slice(self.password.as_bytes())
            .map_err(|e| Pop3Error::AuthFailed(format!("CRAM-MD5 key rejected: {}", e)))?;
        mac.update(challenge);
        let digest = mac.finalize().into_bytes();
        Ok(format!("{} {}", self.username, to_hex(&digest)).into_bytes())
    }
}

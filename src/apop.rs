//! APOP digest (RFC 1939 Section 7)

use md5::{Digest, Md5};

/// Compute the APOP digest for a greeting challenge
///
/// The digest is the lowercase hex MD5 of the challenge (angle brackets
/// included) immediately followed by the shared secret.
///
/// # Example
/// ```
/// use pop3_engine::apop_digest;
///
/// let digest = apop_digest("<1896.697170952@dbc.mtview.ca.us>", "tanstaaf");
/// assert_eq!(digest, "c4c9334bac560ecc979e58001b3e22fb");
/// ```
pub fn apop_digest(challenge: &str, secret: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(challenge.as_bytes());
    hasher.update(secret.as_bytes());
    to_hex(&hasher.finalize())
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

//! POP3 capabilities (RFC 2449) and authentication types
//!
//! Capabilities come from two places: the server greeting, which may carry an
//! APOP challenge token, and the lines of a `CAPA` response.

use crate::sasl;
use bitflags::bitflags;

bitflags! {
    /// Capability bits discovered from the greeting and `CAPA`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CapabilityFlags: u32 {
        /// Greeting carried an APOP challenge (or `APOP` was listed)
        const APOP = 1 << 0;
        /// `UIDL` is supported
        const UIDL = 1 << 1;
        /// At least one recognized SASL mechanism was advertised
        const SASL = 1 << 2;
        /// `TOP` is supported
        const TOP = 1 << 3;
        /// Commands may be pipelined
        const PIPE = 1 << 4;
        /// `STLS` upgrade is available
        const STLS = 1 << 5;
    }
}

/// CAPA tags that map directly onto a capability bit
const CAPA_TAGS: &[(&str, CapabilityFlags)] = &[
    ("APOP", CapabilityFlags::APOP),
    ("TOP", CapabilityFlags::TOP),
    ("UIDL", CapabilityFlags::UIDL),
    ("PIPELINING", CapabilityFlags::PIPE),
    ("STLS", CapabilityFlags::STLS),
];

/// An authentication method the server can be asked to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthType {
    /// USER/PASS (always available)
    Password,
    /// APOP digest against the greeting challenge
    Apop,
    /// A SASL mechanism from the registry, by canonical name
    Sasl(&'static str),
}

/// Capability state held by the engine
#[must_use]
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    flags: CapabilityFlags,
    auth_types: Vec<AuthType>,
    apop: Option<String>,
}

impl Capabilities {
    /// Create an empty Capabilities instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a server greeting
    ///
    /// Returns `None` unless the line starts with `+OK`. A `<...>` token after
    /// the status becomes the APOP challenge.
    ///
    /// # Example
    /// ```
    /// use pop3_engine::{AuthType, Capabilities, CapabilityFlags};
    ///
    /// let caps = Capabilities::from_greeting(b"+OK POP3 ready <1896.6971@mail>").unwrap();
    /// assert!(caps.has(CapabilityFlags::APOP));
    /// assert_eq!(caps.apop_challenge(), Some("<1896.6971@mail>"));
    /// assert!(caps.auth_types().contains(&AuthType::Apop));
    /// ```
    pub fn from_greeting(line: &[u8]) -> Option<Self> {
        let rest = line.strip_prefix(b"+OK")?;

        let mut caps = Self {
            flags: CapabilityFlags::empty(),
            auth_types: vec![AuthType::Password],
            apop: None,
        };

        if let Some(open) = rest.iter().position(|&c| c == b'<') {
            if let Some(close) = rest[open..].iter().position(|&c| c == b'>') {
                let token = &rest[open..open + close + 1];
                caps.apop = Some(String::from_utf8_lossy(token).into_owned());
                caps.flags = CapabilityFlags::APOP;
                caps.auth_types.push(AuthType::Apop);
            }
        }

        Some(caps)
    }

    /// Apply one line of a `CAPA` response
    ///
    /// Tags are matched case-insensitively on the first token. `SASL m1 m2 ...`
    /// records every mechanism the SASL registry recognizes; unknown ones are
    /// skipped.
    pub fn apply_capa_line(&mut self, line: &[u8]) {
        let line = String::from_utf8_lossy(line);
        let mut tokens = line.split_whitespace();
        let Some(tag) = tokens.next() else {
            return;
        };

        if tag.eq_ignore_ascii_case("SASL") {
            for name in tokens {
                match sasl::authtype(name) {
                    Some(mechanism) => {
                        let auth = AuthType::Sasl(mechanism);
                        if !self.auth_types.contains(&auth) {
                            self.auth_types.push(auth);
                        }
                        self.flags |= CapabilityFlags::SASL;
                    }
                    None => tracing::debug!("Unsupported SASL mechanism: {}", name),
                }
            }
            return;
        }

        for (name, flag) in CAPA_TAGS {
            if tag.eq_ignore_ascii_case(name) {
                self.flags |= *flag;
            }
        }
    }

    /// Drop everything learned from `CAPA`, keeping what the greeting gave
    pub(crate) fn reset_to_greeting(&mut self) {
        self.flags &= CapabilityFlags::APOP;
        if self.apop.is_none() {
            self.flags.remove(CapabilityFlags::APOP);
        }
        self.auth_types
            .retain(|auth| matches!(auth, AuthType::Password | AuthType::Apop));
    }

    pub(crate) fn insert(&mut self, flags: CapabilityFlags) {
        self.flags |= flags;
    }

    /// Check whether all of `flags` are set
    #[must_use]
    pub fn has(&self, flags: CapabilityFlags) -> bool {
        self.flags.contains(flags)
    }

    /// The raw capability bitmask
    pub fn flags(&self) -> CapabilityFlags {
        self.flags
    }

    /// Authentication types usable against this server
    pub fn auth_types(&self) -> &[AuthType] {
        &self.auth_types
    }

    /// APOP challenge token from the greeting, including the angle brackets
    #[must_use]
    pub fn apop_challenge(&self) -> Option<&str> {
        self.apop.as_deref()
    }

    /// Whether a SASL mechanism (by any case) was advertised
    #[must_use]
    pub fn has_sasl(&self, mechanism: &str) -> bool {
        self.auth_types.iter().any(
            |auth| matches!(auth, AuthType::Sasl(name) if name.eq_ignore_ascii_case(mechanism)),
        )
    }
}

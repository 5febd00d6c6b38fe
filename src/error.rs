//! POP3 error types

use thiserror::Error;

/// POP3 protocol and connection errors
#[derive(Error, Debug)]
pub enum Pop3Error {
    /// IO error during network operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS error during secure connection or STLS upgrade
    #[error("TLS error: {0}")]
    Tls(String),

    /// Connection timeout
    #[error("Connection timeout")]
    Timeout,

    /// Server greeting was missing or did not start with `+OK`
    #[error("Invalid server greeting: {0}")]
    Greeting(String),

    /// Invalid response from server
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Server answered a command with `-ERR`
    #[error("POP3 error: {0}")]
    Command(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Server does not advertise a capability the operation depends on
    #[error("Capability not supported: {0}")]
    Unsupported(&'static str),

    /// Mechanism must only run over an encrypted transport
    #[error("Encryption required: {0}")]
    EncryptionRequired(String),

    /// Command text is not a single CRLF-terminated line
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Command handle is unknown to the engine (already freed)
    #[error("Unknown command handle {0}")]
    UnknownCommand(u64),

    /// Connection closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Result type alias using Pop3Error
pub type Result<T> = std::result::Result<T, Pop3Error>;

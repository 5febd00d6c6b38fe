#![doc = include_str!("../README.md")]

/// APOP digest computation (RFC 1939)
pub mod apop;
mod capabilities;
mod client;
/// POP3 command builders and response parsers
pub mod commands;
mod config;
/// Pipelining command engine
pub mod engine;
mod error;
/// SASL authentication framework (RFC 5034)
pub mod sasl;
/// Dot-stuffed byte stream (RFC 1939 Section 3)
pub mod stream;

pub use apop::apop_digest;
pub use capabilities::{AuthType, Capabilities, CapabilityFlags};
pub use client::{Connection, Pop3Client};
pub use commands::{ListEntry, StatInfo, UidlEntry};
pub use config::{Security, ServerConfig};
pub use engine::{
    Command, CommandId, CommandKind, CommandState, DataHandler, EngineFlags, EngineOptions,
    EngineState, Pop3Engine, Progress, SEND_LIMIT, collect_body, collect_lines,
};
pub use error::{Pop3Error, Result};
pub use sasl::{
    SaslCramMd5, SaslLogin, SaslMechanism, SaslPlain, decode_sasl_data, encode_sasl_data,
};
pub use stream::{Chunk, Pop3Stream, StreamMode, Transport, dot_stuff};

//! POP3 client implementation with TLS and pipelining support

mod auth;
mod connection;
mod mailbox;

pub use connection::Connection;

use crate::capabilities::{Capabilities, CapabilityFlags};
use crate::commands;
use crate::config::{Security, ServerConfig};
use crate::engine::{
    CommandKind, CommandState, DataHandler, EngineFlags, EngineOptions, EngineState, Pop3Engine,
};
use crate::error::{Pop3Error, Result};
use crate::stream::Transport;
use std::sync::Arc;
use tracing::debug;

/// Blocking POP3 client driving a [`Pop3Engine`]
///
/// The transport defaults to [`Connection`]; any `Read + Write` can be used
/// through [`from_transport`](Self::from_transport).
///
/// # Example
///
/// ```no_run
/// use pop3_engine::{Pop3Client, ServerConfig};
/// use std::sync::Arc;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ServerConfig::tls("pop.example.com", "user", "pass");
/// let mut client = Pop3Client::connect(Arc::new(config))?;
/// client.authenticate()?;
///
/// let stat = client.stat()?;
/// println!("{} messages, {} octets", stat.count, stat.size);
///
/// for message in client.fetch_pipelined(&[1, 2, 3])? {
///     println!("{} bytes", message?.len());
/// }
/// client.quit()?;
/// # Ok(())
/// # }
/// ```
#[must_use]
pub struct Pop3Client<T: Transport = Connection> {
    engine: Pop3Engine<T>,
    /// Server configuration
    config: Arc<ServerConfig>,
    /// Whether the channel is encrypted (implicit TLS or after STLS)
    encrypted: bool,
    /// Whether this connection failed and should be discarded
    is_broken: bool,
}

impl Pop3Client<Connection> {
    /// Connect to the POP3 server described by `config`
    ///
    /// Performs the TLS handshake for [`Security::Tls`](crate::Security::Tls)
    /// and the STLS upgrade for [`Security::StartTls`](crate::Security::StartTls).
    /// Does not authenticate; call [`authenticate`](Self::authenticate) next.
    ///
    /// # Errors
    ///
    /// - [`Pop3Error::Io`] - TCP connection fails
    /// - [`Pop3Error::Tls`] - TLS handshake fails
    /// - [`Pop3Error::Timeout`] - connection or handshake times out
    /// - [`Pop3Error::Greeting`] - server did not greet with `+OK`
    /// - [`Pop3Error::Unsupported`] - STLS requested but not offered
    pub fn connect(config: Arc<ServerConfig>) -> Result<Self> {
        let connection = Connection::open(&config)?;
        let encrypted = connection.is_tls();
        let mut client = Self::from_transport(connection, config)?;
        client.encrypted = encrypted;

        if client.config.security == Security::StartTls {
            client.starttls()?;
        }
        Ok(client)
    }

    /// Upgrade the session with STLS (RFC 2595) and re-read capabilities
    ///
    /// # Errors
    ///
    /// - [`Pop3Error::Unsupported`] - server does not advertise STLS
    /// - [`Pop3Error::Command`] - server refused STLS
    /// - [`Pop3Error::Tls`] - handshake failed
    pub fn starttls(&mut self) -> Result<()> {
        if self.encrypted {
            return Err(Pop3Error::Tls("connection is already encrypted".to_string()));
        }
        if !self.engine.capabilities().has(CapabilityFlags::STLS) {
            return Err(Pop3Error::Unsupported("STLS"));
        }

        let (state, response) = self.simple(commands::stls())?;
        if state != CommandState::Ok {
            return Err(Pop3Error::Command(response));
        }

        // Anything read past the +OK would have been sent in the clear
        if self.engine.stream().buffered() > 0 {
            self.mark_broken();
            return Err(Pop3Error::Tls("unexpected data after STLS response".to_string()));
        }

        let config = Arc::clone(&self.config);
        if let Err(e) = self.engine.transport_mut().upgrade(&config) {
            self.mark_broken();
            return Err(e);
        }
        self.encrypted = true;
        debug!("STLS complete, re-reading capabilities");

        self.engine.reget_capabilities()
    }
}

impl<T: Transport> Pop3Client<T> {
    /// Run the greeting and capability negotiation over an existing transport
    ///
    /// The transport is treated as unencrypted.
    pub fn from_transport(transport: T, config: Arc<ServerConfig>) -> Result<Self> {
        let mut flags = EngineFlags::empty();
        if config.disable_extensions {
            flags |= EngineFlags::DISABLE_EXTENSIONS;
        }
        let engine = Pop3Engine::with_options(
            transport,
            EngineOptions {
                flags,
                log_wire: config.log_wire,
            },
        )?;

        Ok(Self {
            engine,
            config,
            encrypted: false,
            is_broken: false,
        })
    }

    /// Check if this connection is broken and should be discarded
    pub fn is_broken(&self) -> bool {
        self.is_broken
    }

    fn mark_broken(&mut self) {
        self.is_broken = true;
    }

    /// Check if the client is logged in (TRANSACTION state)
    pub fn is_authenticated(&self) -> bool {
        self.engine.state() == EngineState::Transaction
    }

    /// Whether the channel is encrypted
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Capabilities negotiated with the server
    pub fn capabilities(&self) -> &Capabilities {
        self.engine.capabilities()
    }

    /// Borrow the underlying engine
    pub fn engine(&self) -> &Pop3Engine<T> {
        &self.engine
    }

    /// Mutably borrow the underlying engine, for custom commands
    pub fn engine_mut(&mut self) -> &mut Pop3Engine<T> {
        &mut self.engine
    }

    /// Run one command to completion and release it
    ///
    /// Returns the final state and the status line.
    fn run(
        &mut self,
        kind: CommandKind,
        handler: Option<DataHandler<T>>,
        text: impl Into<String>,
    ) -> Result<(CommandState, String)> {
        self.run_masked(kind, handler, text.into(), false)
    }

    fn run_masked(
        &mut self,
        kind: CommandKind,
        handler: Option<DataHandler<T>>,
        text: String,
        sensitive: bool,
    ) -> Result<(CommandState, String)> {
        let result = self.run_inner(kind, handler, text, sensitive);
        if matches!(result, Err(Pop3Error::Io(_) | Pop3Error::ConnectionClosed)) {
            self.mark_broken();
        }
        result
    }

    fn run_inner(
        &mut self,
        kind: CommandKind,
        handler: Option<DataHandler<T>>,
        text: String,
        sensitive: bool,
    ) -> Result<(CommandState, String)> {
        let id = if sensitive {
            self.engine.command_new_sensitive(kind, handler, text)?
        } else {
            self.engine.command_new(kind, handler, text)?
        };
        let state = self.engine.run_to_completion(id)?;
        let response = self
            .engine
            .command_response(id)
            .unwrap_or_default()
            .to_string();
        self.engine.command_free(id);
        Ok((state, response))
    }

    fn simple(&mut self, text: impl Into<String>) -> Result<(CommandState, String)> {
        self.run(CommandKind::Simple, None, text)
    }

    /// Single-line command whose text is masked in wire traces
    fn simple_sensitive(&mut self, text: String) -> Result<(CommandState, String)> {
        self.run_masked(CommandKind::Simple, None, text, true)
    }

    /// Run a single-line command, mapping `-ERR` to [`Pop3Error::Command`]
    fn expect_ok(&mut self, text: impl Into<String>) -> Result<String> {
        match self.simple(text)? {
            (CommandState::Ok, response) => Ok(response),
            (_, response) => Err(Pop3Error::Command(response)),
        }
    }

    fn require_transaction(&self) -> Result<()> {
        if self.is_authenticated() {
            Ok(())
        } else {
            Err(Pop3Error::Command("not authenticated".to_string()))
        }
    }
}

impl<T: Transport> std::fmt::Debug for Pop3Client<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pop3Client")
            .field("host", &self.config.host)
            .field("engine", &self.engine)
            .field("encrypted", &self.encrypted)
            .field("is_broken", &self.is_broken)
            .finish()
    }
}

impl<T: Transport> Drop for Pop3Client<T> {
    fn drop(&mut self) {
        debug!("Pop3Client dropped");
    }
}

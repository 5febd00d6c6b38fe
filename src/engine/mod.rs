//! Pipelining POP3 command engine
//!
//! The engine owns a [`Pop3Stream`] and a set of command queues:
//!
//! - `queue`: created but not yet written (pipelining budget exhausted)
//! - `active`: written, waiting behind `current`
//! - `current`: the one command whose response is being read
//! - `done`: finished, kept until the caller frees them
//!
//! Responses are matched to commands strictly in dispatch order. Pipelining
//! only changes how many commands are on the wire at once, bounded by
//! [`SEND_LIMIT`] outstanding bytes.
//!
//! # Example
//!
//! ```no_run
//! use pop3_engine::{CommandKind, EngineFlags, Pop3Engine, commands};
//! use std::net::TcpStream;
//!
//! # fn example() -> pop3_engine::Result<()> {
//! let tcp = TcpStream::connect("pop.example.com:110")?;
//! let mut engine = Pop3Engine::new(tcp, EngineFlags::empty())?;
//!
//! let stat = engine.command_new(CommandKind::Simple, None, commands::stat())?;
//! engine.run_to_completion(stat)?;
//! println!("{:?}", engine.command_response(stat));
//! engine.command_free(stat);
//! # Ok(())
//! # }
//! ```

mod command;

pub use command::{
    Command, CommandId, CommandKind, CommandState, DataHandler, collect_body, collect_lines,
};

use crate::capabilities::{AuthType, Capabilities, CapabilityFlags};
use crate::commands;
use crate::error::{Pop3Error, Result};
use crate::stream::{Pop3Stream, StreamMode, Transport};
use bitflags::bitflags;
use std::collections::VecDeque;
use std::io::{self, Write};
use tracing::{debug, trace, warn};

/// Maximum unacknowledged bytes on the wire while pipelining
pub const SEND_LIMIT: usize = 1024;

bitflags! {
    /// Engine construction flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EngineFlags: u32 {
        /// Skip the `CAPA` probe; only greeting-derived capabilities are known
        const DISABLE_EXTENSIONS = 1 << 0;
    }
}

/// Engine construction options
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    /// Construction flags
    pub flags: EngineFlags,
    /// Trace every line sent and received
    ///
    /// PASS and APOP arguments, the AUTH initial response and every line of
    /// a SASL exchange are masked.
    pub log_wire: bool,
}

/// POP3 session state (RFC 1939 Section 3)
///
/// Driven by the caller; the engine only reads it to decide whether the UIDL
/// probe is possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No session
    Disconnect,
    /// Greeting received, not yet logged in
    Auth,
    /// Logged in, maildrop locked
    Transaction,
    /// QUIT sent, server applying deletions
    Update,
}

/// Outcome of one [`Pop3Engine::iterate`] step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Nothing in flight, or the awaited command has finished
    Idle,
    /// More responses are outstanding
    MoreWork,
}

/// Pipelining POP3 command engine over a blocking transport
pub struct Pop3Engine<T: Transport> {
    stream: Pop3Stream<T>,
    capabilities: Capabilities,
    state: EngineState,
    flags: EngineFlags,
    log_wire: bool,
    queue: VecDeque<Command<T>>,
    active: VecDeque<Command<T>>,
    current: Option<Command<T>>,
    done: Vec<Command<T>>,
    /// Bytes written for commands whose responses are still outstanding
    sent_len: usize,
    next_id: u64,
}

impl<T: Transport> Pop3Engine<T> {
    /// Wrap a connected transport and negotiate capabilities
    ///
    /// Reads the greeting, then (unless [`EngineFlags::DISABLE_EXTENSIONS`])
    /// issues `CAPA` and waits for it.
    ///
    /// # Errors
    ///
    /// - [`Pop3Error::Greeting`] - greeting missing or not `+OK`
    /// - [`Pop3Error::Io`] - transport failure
    pub fn new(transport: T, flags: EngineFlags) -> Result<Self> {
        Self::with_options(
            transport,
            EngineOptions {
                flags,
                ..EngineOptions::default()
            },
        )
    }

    /// Like [`new`](Self::new) with explicit [`EngineOptions`]
    pub fn with_options(transport: T, options: EngineOptions) -> Result<Self> {
        let mut stream = Pop3Stream::new(transport);

        let greeting = stream
            .line()?
            .map(|line| line.to_vec())
            .ok_or_else(|| Pop3Error::Greeting(String::new()))?;
        let greeting_text = String::from_utf8_lossy(&greeting).into_owned();
        if options.log_wire {
            trace!("S: {}", greeting_text);
        }

        let capabilities = Capabilities::from_greeting(&greeting)
            .ok_or_else(|| Pop3Error::Greeting(greeting_text.chars().take(100).collect()))?;
        debug!("Server greeting: {}", greeting_text);

        let mut engine = Self {
            stream,
            capabilities,
            state: EngineState::Auth,
            flags: options.flags,
            log_wire: options.log_wire,
            queue: VecDeque::new(),
            active: VecDeque::new(),
            current: None,
            done: Vec::new(),
            sent_len: 0,
            next_id: 1,
        };

        engine.probe_capabilities()?;
        Ok(engine)
    }

    /// Forget `CAPA`-derived capabilities and probe again
    ///
    /// Used after STLS, since a server may advertise different capabilities
    /// once the channel is encrypted.
    pub fn reget_capabilities(&mut self) -> Result<()> {
        self.capabilities.reset_to_greeting();
        self.probe_capabilities()
    }

    fn probe_capabilities(&mut self) -> Result<()> {
        if self.flags.contains(EngineFlags::DISABLE_EXTENSIONS) {
            return Ok(());
        }

        let (handler, lines) = collect_lines();
        let id = self.command_new(CommandKind::Multi, Some(handler), commands::capa())?;
        let state = self.run_to_completion(id)?;
        self.command_free(id);

        for line in lines.take() {
            self.capabilities.apply_capa_line(line.as_bytes());
        }
        debug!("CAPA {:?}: {:?}", state, self.capabilities.flags());

        if self.state == EngineState::Transaction
            && !self.capabilities.has(CapabilityFlags::UIDL)
        {
            let id = self.command_new(CommandKind::Simple, None, commands::uidl_one(1))?;
            let state = self.run_to_completion(id)?;
            self.command_free(id);
            if state == CommandState::Ok {
                debug!("UIDL supported (probed)");
                self.capabilities.insert(CapabilityFlags::UIDL);
            }
        }

        Ok(())
    }

    /// Create a command and send it, or queue it if it cannot be sent yet
    ///
    /// `text` must be the full wire form including CRLF (see [`commands`]).
    /// The command goes out immediately when nothing is in flight, or when
    /// the server pipelines and the outstanding bytes stay within
    /// [`SEND_LIMIT`]. Commands never overtake ones already queued.
    ///
    /// # Errors
    ///
    /// - [`Pop3Error::InvalidCommand`] - `text` is not exactly one line ending
    ///   in CRLF; nothing is written and no handle is allocated
    /// - [`Pop3Error::Io`] - a write failure is fatal: every outstanding
    ///   command is failed
    pub fn command_new(
        &mut self,
        kind: CommandKind,
        handler: Option<DataHandler<T>>,
        text: impl Into<String>,
    ) -> Result<CommandId> {
        self.submit(kind, handler, text.into(), false)
    }

    /// Like [`command_new`](Self::command_new) for lines carrying credentials
    ///
    /// The line is masked in wire traces (SASL responses have no keyword for
    /// [`command_new`](Self::command_new) to recognise).
    pub fn command_new_sensitive(
        &mut self,
        kind: CommandKind,
        handler: Option<DataHandler<T>>,
        text: impl Into<String>,
    ) -> Result<CommandId> {
        self.submit(kind, handler, text.into(), true)
    }

    fn submit(
        &mut self,
        kind: CommandKind,
        handler: Option<DataHandler<T>>,
        text: String,
        sensitive: bool,
    ) -> Result<CommandId> {
        commands::validate_line(&text)?;

        let id = CommandId(self.next_id);
        self.next_id += 1;

        let mut command = Command::new(id, kind, handler, text);
        command.sensitive = sensitive;
        if self.queue.is_empty() && self.can_send(command.wire_len()) {
            self.dispatch(command, false)?;
        } else {
            trace!("Queueing {} (outstanding {} bytes)", command.verb(), self.sent_len);
            self.queue.push_back(command);
        }
        Ok(id)
    }

    fn can_send(&self, len: usize) -> bool {
        self.current.is_none()
            || (self.capabilities.has(CapabilityFlags::PIPE) && self.sent_len + len <= SEND_LIMIT)
    }

    /// Write a command and move it in flight
    ///
    /// `queued` commands already have a handle out, so on failure they are
    /// kept in `done` for the caller to inspect; a fresh command is dropped.
    fn dispatch(&mut self, mut command: Command<T>, queued: bool) -> Result<()> {
        if let Err(e) = self.write_command(&command.text, command.sensitive) {
            warn!("Failed to send {}: {}", command.verb(), e);
            command.state = CommandState::Err;
            if queued && !command.freed {
                self.done.push(command);
            }
            self.fail_pending();
            return Err(e.into());
        }

        self.sent_len += command.wire_len();
        command.state = CommandState::Dispatched;

        if self.current.is_none() {
            self.current = Some(command);
        } else {
            self.active.push_back(command);
        }
        Ok(())
    }

    fn write_command(&mut self, text: &str, sensitive: bool) -> io::Result<()> {
        if self.log_wire {
            trace!("C: {}", mask_secret(text.trim_end(), sensitive));
        }
        self.stream.write_all(text.as_bytes())?;
        self.stream.flush()
    }

    /// Read and dispatch one response
    ///
    /// Returns [`Progress::Idle`] when nothing is in flight or when `wait` has
    /// reached a terminal state, [`Progress::MoreWork`] otherwise. Drive it in
    /// a loop until it returns `Idle`.
    ///
    /// A response not starting with `+` or `-` marks its command
    /// [`CommandState::Err`] and the session continues.
    ///
    /// # Errors
    ///
    /// A transport failure (including one raised by a data handler) fails
    /// every outstanding command and is returned.
    pub fn iterate(&mut self, wait: Option<CommandId>) -> Result<Progress> {
        if self.wait_satisfied(wait) {
            return Ok(Progress::Idle);
        }

        let Some(mut command) = self.current.take() else {
            return Ok(Progress::Idle);
        };

        if let Err(e) = self.read_response(&mut command) {
            warn!("Connection failed during {}: {}", command.verb(), e);
            self.stream.set_mode(StreamMode::Line);
            command.state = CommandState::Err;
            self.done.push(command);
            self.fail_pending();
            return Err(e);
        }

        self.sent_len -= command.wire_len();
        if command.freed {
            trace!("Discarding released {}", command.verb());
        } else {
            self.done.push(command);
        }

        self.current = self.active.pop_front();
        self.promote_queued()?;

        if self.wait_satisfied(wait) || self.current.is_none() {
            Ok(Progress::Idle)
        } else {
            Ok(Progress::MoreWork)
        }
    }

    fn wait_satisfied(&self, wait: Option<CommandId>) -> bool {
        wait.and_then(|id| self.command_state(id))
            .is_some_and(CommandState::is_finished)
    }

    fn read_response(&mut self, command: &mut Command<T>) -> Result<()> {
        let line = self
            .stream
            .line()?
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .ok_or(Pop3Error::ConnectionClosed)?;
        if self.log_wire {
            trace!("S: {}", line);
        }

        match line.as_bytes().first() {
            Some(b'+') if command.kind == CommandKind::Multi => {
                command.state = CommandState::Data;
                self.stream.set_mode(StreamMode::Data);
                if let Some(handler) = command.handler.as_mut() {
                    handler(&mut self.stream)?;
                }
                while self.stream.getd()?.more {}
                self.stream.set_mode(StreamMode::Line);
            }
            Some(b'+') => command.state = CommandState::Ok,
            Some(b'-') => command.state = CommandState::Err,
            _ => {
                warn!("Bad server response to {}: {}", command.verb(), line);
                command.state = CommandState::Err;
            }
        }

        command.response = Some(line);
        Ok(())
    }

    fn promote_queued(&mut self) -> Result<()> {
        loop {
            let fits = self
                .queue
                .front()
                .is_some_and(|next| self.can_send(next.wire_len()));
            if !fits {
                return Ok(());
            }
            if let Some(command) = self.queue.pop_front() {
                self.dispatch(command, true)?;
            }
        }
    }

    /// Fail every command that has not received a response
    fn fail_pending(&mut self) {
        for mut command in self
            .current
            .take()
            .into_iter()
            .chain(self.active.drain(..))
            .chain(self.queue.drain(..))
        {
            command.state = CommandState::Err;
            if !command.freed {
                self.done.push(command);
            }
        }
        self.sent_len = 0;
    }

    /// Drive [`iterate`](Self::iterate) until `id` has finished
    ///
    /// Returns the command's final state.
    pub fn run_to_completion(&mut self, id: CommandId) -> Result<CommandState> {
        while self.iterate(Some(id))? == Progress::MoreWork {}
        self.command_state(id).ok_or(Pop3Error::UnknownCommand(id.get()))
    }

    /// Release a command
    ///
    /// Finished and still-queued commands are removed at once. A command in
    /// `active` has already been written, so it is only marked and is dropped
    /// when its response arrives. The `current` command is left alone and
    /// `false` is returned, as is the case for an unknown handle.
    pub fn command_free(&mut self, id: CommandId) -> bool {
        if self.current.as_ref().is_some_and(|c| c.id == id) {
            return false;
        }
        if let Some(pos) = self.done.iter().position(|c| c.id == id) {
            self.done.remove(pos);
            return true;
        }
        if let Some(pos) = self.queue.iter().position(|c| c.id == id) {
            self.queue.remove(pos);
            return true;
        }
        if let Some(command) = self.active.iter_mut().find(|c| c.id == id) {
            command.freed = true;
            return true;
        }
        false
    }

    /// Look up a command by handle
    pub fn command(&self, id: CommandId) -> Option<&Command<T>> {
        self.current
            .iter()
            .chain(self.active.iter())
            .chain(self.queue.iter())
            .chain(self.done.iter())
            .find(|c| c.id == id)
    }

    /// State of a command, `None` once it has been freed
    pub fn command_state(&self, id: CommandId) -> Option<CommandState> {
        self.command(id).map(Command::state)
    }

    /// Status line the server answered a command with
    pub fn command_response(&self, id: CommandId) -> Option<&str> {
        self.command(id).and_then(Command::response)
    }

    /// Session state
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Set the session state (the caller drives AUTH -> TRANSACTION -> UPDATE)
    pub fn set_state(&mut self, state: EngineState) {
        debug!("Session state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Negotiated capabilities
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// APOP challenge from the greeting
    pub fn apop_challenge(&self) -> Option<&str> {
        self.capabilities.apop_challenge()
    }

    /// Usable authentication types
    pub fn auth_types(&self) -> &[AuthType] {
        self.capabilities.auth_types()
    }

    /// Construction flags
    pub fn flags(&self) -> EngineFlags {
        self.flags
    }

    /// Bytes written whose responses have not been read yet
    pub fn outstanding_bytes(&self) -> usize {
        self.sent_len
    }

    /// Number of commands written and awaiting a response
    pub fn in_flight(&self) -> usize {
        self.current.iter().count() + self.active.len()
    }

    /// Number of commands waiting to be written
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Borrow the stream
    pub fn stream(&self) -> &Pop3Stream<T> {
        &self.stream
    }

    /// Mutably borrow the stream (e.g. to upgrade its transport after STLS)
    pub fn stream_mut(&mut self) -> &mut Pop3Stream<T> {
        &mut self.stream
    }

    /// Mutably borrow the transport under the stream
    pub fn transport_mut(&mut self) -> &mut T {
        self.stream.get_mut()
    }
}

impl<T: Transport> std::fmt::Debug for Pop3Engine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pop3Engine")
            .field("state", &self.state)
            .field("capabilities", &self.capabilities.flags())
            .field("in_flight", &self.in_flight())
            .field("queued", &self.queue.len())
            .field("done", &self.done.len())
            .field("sent_len", &self.sent_len)
            .finish_non_exhaustive()
    }
}

/// Mask credentials in a command line for wire traces
///
/// PASS loses its argument, APOP its digest and AUTH its initial response.
/// Any other `sensitive` line is masked whole.
fn mask_secret(line: &str, sensitive: bool) -> String {
    let mut parts = line.splitn(3, ' ');
    let verb = parts.next().unwrap_or("");
    if verb.eq_ignore_ascii_case("PASS") {
        "PASS ****".to_string()
    } else if verb.eq_ignore_ascii_case("APOP") || verb.eq_ignore_ascii_case("AUTH") {
        match (parts.next(), parts.next()) {
            (Some(arg), Some(_)) => format!("{} {} ****", verb, arg),
            _ => line.to_string(),
        }
    } else if sensitive {
        "****".to_string()
    } else {
        line.to_string()
    }
}

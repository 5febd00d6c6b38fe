//! Maildrop operations (RFC 1939 TRANSACTION and UPDATE states)

use super::Pop3Client;
use crate::capabilities::CapabilityFlags;
use crate::commands::{self, ListEntry, StatInfo, UidlEntry};
use crate::engine::{
    CommandId, CommandKind, CommandState, EngineState, Progress, collect_body, collect_lines,
};
use crate::error::{Pop3Error, Result};
use crate::stream::Transport;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, warn};

impl<T: Transport> Pop3Client<T> {
    /// Message count and maildrop size (`STAT`)
    pub fn stat(&mut self) -> Result<StatInfo> {
        self.require_transaction()?;
        let response = self.expect_ok(commands::stat())?;
        commands::parse_stat(&response)
    }

    /// Sizes of all messages (`LIST`)
    ///
    /// Malformed entries are skipped with a warning.
    pub fn list(&mut self) -> Result<Vec<ListEntry>> {
        self.require_transaction()?;
        let lines = self.multi_lines(commands::list())?;
        Ok(lines
            .iter()
            .filter_map(|line| match commands::parse_list_line(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping LIST entry: {}", e);
                    None
                }
            })
            .collect())
    }

    /// Unique ids of all messages (`UIDL`)
    ///
    /// # Errors
    ///
    /// [`Pop3Error::Unsupported`] when the server has not shown UIDL support.
    pub fn uidl(&mut self) -> Result<Vec<UidlEntry>> {
        self.require_transaction()?;
        if !self.capabilities().has(CapabilityFlags::UIDL) {
            return Err(Pop3Error::Unsupported("UIDL"));
        }
        let lines = self.multi_lines(commands::uidl())?;
        Ok(lines
            .iter()
            .filter_map(|line| match commands::parse_uidl_line(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping UIDL entry: {}", e);
                    None
                }
            })
            .collect())
    }

    /// Retrieve a whole message (`RETR`), dot-unstuffed with CRLF line ends
    pub fn retr(&mut self, msg: u32) -> Result<Vec<u8>> {
        self.require_transaction()?;
        self.multi_body(commands::retr(msg))
    }

    /// Retrieve the headers and the first `lines` body lines (`TOP`)
    ///
    /// TOP is optional in RFC 1939; a server that lacks it answers `-ERR`,
    /// reported as [`Pop3Error::Command`].
    pub fn top(&mut self, msg: u32, lines: u32) -> Result<Vec<u8>> {
        self.require_transaction()?;
        self.multi_body(commands::top(msg, lines))
    }

    /// Mark a message deleted (`DELE`)
    pub fn dele(&mut self, msg: u32) -> Result<()> {
        self.require_transaction()?;
        self.expect_ok(commands::dele(msg)).map(drop)
    }

    /// Unmark all deleted messages (`RSET`)
    pub fn rset(&mut self) -> Result<()> {
        self.require_transaction()?;
        self.expect_ok(commands::rset()).map(drop)
    }

    /// Keep the connection alive (`NOOP`)
    pub fn noop(&mut self) -> Result<()> {
        self.expect_ok(commands::noop()).map(drop)
    }

    /// End the session (`QUIT`)
    ///
    /// From TRANSACTION state this commits deletions; the engine moves to
    /// UPDATE and then DISCONNECT once the server has answered.
    pub fn quit(&mut self) -> Result<()> {
        if self.engine.state() == EngineState::Transaction {
            self.engine.set_state(EngineState::Update);
        }
        let result = self.expect_ok(commands::quit());
        self.engine.set_state(EngineState::Disconnect);
        result.map(drop)
    }

    /// Retrieve several messages with as much pipelining as the server allows
    ///
    /// All `RETR` commands are handed to the engine up front; it keeps as many
    /// on the wire as [`SEND_LIMIT`](crate::SEND_LIMIT) permits (one at a
    /// time without `PIPELINING`). Each message gets its own result, so a
    /// `-ERR` for one does not affect the others.
    ///
    /// # Errors
    ///
    /// The outer error is a connection failure, which aborts the batch.
    pub fn fetch_pipelined(&mut self, msgs: &[u32]) -> Result<Vec<Result<Vec<u8>>>> {
        self.require_transaction()?;
        debug!("Fetching {} messages pipelined", msgs.len());

        let mut pending: Vec<(CommandId, Rc<RefCell<Vec<u8>>>)> = Vec::with_capacity(msgs.len());
        for &msg in msgs {
            let (handler, body) = collect_body();
            match self
                .engine
                .command_new(CommandKind::Multi, Some(handler), commands::retr(msg))
            {
                Ok(id) => pending.push((id, body)),
                Err(e) => {
                    self.mark_broken();
                    return Err(e);
                }
            }
        }

        loop {
            match self.engine.iterate(None) {
                Ok(Progress::Idle) => break,
                Ok(Progress::MoreWork) => {}
                Err(e) => {
                    self.mark_broken();
                    for (id, _) in &pending {
                        self.engine.command_free(*id);
                    }
                    return Err(e);
                }
            }
        }

        let mut results = Vec::with_capacity(pending.len());
        for (id, body) in pending {
            let result = match self.engine.command_state(id) {
                Some(CommandState::Data) => Ok(body.take()),
                Some(_) => Err(Pop3Error::Command(
                    self.engine.command_response(id).unwrap_or_default().to_string(),
                )),
                None => Err(Pop3Error::UnknownCommand(id.get())),
            };
            self.engine.command_free(id);
            results.push(result);
        }
        Ok(results)
    }

    fn multi_lines(&mut self, text: impl Into<String>) -> Result<Vec<String>> {
        let (handler, lines) = collect_lines();
        match self.run(CommandKind::Multi, Some(handler), text)? {
            (CommandState::Data, _) => Ok(lines.take()),
            (_, response) => Err(Pop3Error::Command(response)),
        }
    }

    fn multi_body(&mut self, text: impl Into<String>) -> Result<Vec<u8>> {
        let (handler, body) = collect_body();
        match self.run(CommandKind::Multi, Some(handler), text)? {
            (CommandState::Data, _) => Ok(body.take()),
            (_, response) => Err(Pop3Error::Command(response)),
        }
    }
}

//! Queued and in-flight POP3 commands

use crate::stream::{Pop3Stream, Transport};
use std::cell::RefCell;
use std::io;
use std::rc::Rc;

/// Handle to a command owned by a [`Pop3Engine`](super::Pop3Engine)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(pub(crate) u64);

impl CommandId {
    /// Raw numeric value, unique per engine
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Shape of the response a command expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// A single `+OK` / `-ERR` line
    Simple,
    /// `+OK` followed by a dot-terminated body
    Multi,
}

/// Lifecycle of a command
///
/// `Idle -> Dispatched -> {Ok | Data | Err}`. The last three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CommandState {
    /// Created, waiting in the send queue
    Idle,
    /// Written to the server, response outstanding
    Dispatched,
    /// Single-line `+OK` received
    Ok,
    /// Multi-line `+OK` received and its body consumed
    Data,
    /// `-ERR`, malformed response, or connection failure
    Err,
}

impl CommandState {
    /// Whether the command has received its response
    pub fn is_finished(self) -> bool {
        self >= CommandState::Ok
    }

    /// Whether the server accepted the command
    pub fn is_success(self) -> bool {
        matches!(self, CommandState::Ok | CommandState::Data)
    }
}

/// Callback run when a multi-line command gets `+OK`
///
/// The stream is in data mode; the callback pulls the body with
/// [`Pop3Stream::line`], [`Pop3Stream::getd`] or `Read`. Whatever it leaves
/// unread is drained by the engine. An error is fatal for the session.
pub type DataHandler<T> = Box<dyn FnMut(&mut Pop3Stream<T>) -> io::Result<()>>;

/// One POP3 request and its outcome
pub struct Command<T> {
    pub(crate) id: CommandId,
    pub(crate) kind: CommandKind,
    pub(crate) state: CommandState,
    pub(crate) text: String,
    pub(crate) handler: Option<DataHandler<T>>,
    pub(crate) response: Option<String>,
    /// Released by the caller while still awaiting its response
    pub(crate) freed: bool,
    /// Carries credentials; traced as `****`
    pub(crate) sensitive: bool,
}

impl<T> Command<T> {
    pub(crate) fn new(
        id: CommandId,
        kind: CommandKind,
        handler: Option<DataHandler<T>>,
        text: String,
    ) -> Self {
        Self {
            id,
            kind,
            state: CommandState::Idle,
            text,
            handler,
            response: None,
            freed: false,
            sensitive: false,
        }
    }

    /// Handle of this command
    pub fn id(&self) -> CommandId {
        self.id
    }

    /// Expected response shape
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Current lifecycle state
    pub fn state(&self) -> CommandState {
        self.state
    }

    /// The status line the server answered with, once received
    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    /// Whether the wire trace hides this command's text
    pub fn is_sensitive(&self) -> bool {
        self.sensitive
    }

    /// Command keyword, for logging without leaking arguments
    ///
    /// A sensitive SASL response has no keyword and shows as `****`.
    pub(crate) fn verb(&self) -> &str {
        let verb = self.text.split_whitespace().next().unwrap_or("");
        if self.sensitive && !verb.eq_ignore_ascii_case("AUTH") {
            "****"
        } else {
            verb
        }
    }

    /// Bytes this command occupies on the wire
    pub(crate) fn wire_len(&self) -> usize {
        self.text.len()
    }
}

impl<T> std::fmt::Debug for Command<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.id)
            .field("verb", &self.verb())
            .field("kind", &self.kind)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Handler that collects each body line (unstuffed, CRLF removed)
///
/// Lines are decoded lossily as UTF-8.
pub fn collect_lines<T: Transport>() -> (DataHandler<T>, Rc<RefCell<Vec<String>>>) {
    let lines = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&lines);
    let handler: DataHandler<T> = Box::new(move |stream: &mut Pop3Stream<T>| -> io::Result<()> {
        while let Some(line) = stream.line()? {
            sink.borrow_mut()
                .push(String::from_utf8_lossy(line).into_owned());
        }
        Ok(())
    });
    (handler, lines)
}

/// Handler that collects the raw unstuffed body bytes (CRLF preserved)
pub fn collect_body<T: Transport>() -> (DataHandler<T>, Rc<RefCell<Vec<u8>>>) {
    let body = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&body);
    let handler: DataHandler<T> = Box::new(move |stream: &mut Pop3Stream<T>| -> io::Result<()> {
        loop {
            let chunk = stream.getd()?;
            sink.borrow_mut().extend_from_slice(chunk.data);
            if !chunk.more {
                return Ok(());
            }
        }
    });
    (handler, body)
}

//! POP3 command builders and response parsers
//!
//! Every builder returns the complete wire text including the trailing CRLF,
//! ready to hand to [`Pop3Engine::command_new`](crate::Pop3Engine::command_new).

use crate::error::{Pop3Error, Result};

// Authorization state commands (RFC 1939 Section 7, RFC 2449, RFC 2595, RFC 5034)

/// Build CAPA command (RFC 2449)
pub fn capa() -> &'static str {
    "CAPA\r\n"
}

/// Build STLS command (RFC 2595)
pub fn stls() -> &'static str {
    "STLS\r\n"
}

/// Build USER command
pub fn user(username: &str) -> Result<String> {
    Ok(format!("USER {}\r\n", argument("USER", username)?))
}

/// Build PASS command
pub fn pass(password: &str) -> Result<String> {
    Ok(format!("PASS {}\r\n", argument("PASS", password)?))
}

/// Build APOP command from a precomputed digest
pub fn apop(username: &str, digest: &str) -> Result<String> {
    Ok(format!(
        "APOP {} {}\r\n",
        argument("APOP", username)?,
        argument("APOP", digest)?
    ))
}

/// Build AUTH command, with an optional already-encoded initial response
pub fn auth(mechanism: &str, initial_response: Option<&str>) -> Result<String> {
    let mechanism = argument("AUTH", mechanism)?;
    match initial_response {
        Some(ir) => Ok(format!("AUTH {} {}\r\n", mechanism, argument("AUTH", ir)?)),
        None => Ok(format!("AUTH {}\r\n", mechanism)),
    }
}

/// Build a SASL continuation line (base64 data or `*` to cancel)
pub fn auth_continue(response: &str) -> Result<String> {
    Ok(format!("{}\r\n", argument("SASL response", response)?))
}

/// Reject an argument that would end the command line early
fn argument<'a>(verb: &str, arg: &'a str) -> Result<&'a str> {
    if arg.contains(['\r', '\n']) {
        return Err(Pop3Error::InvalidCommand(format!(
            "{} argument contains a line break",
            verb
        )));
    }
    Ok(arg)
}

/// Check that `text` is exactly one command line terminated by CRLF
///
/// The error names only the command keyword, never its arguments.
pub fn validate_line(text: &str) -> Result<()> {
    let verb = text
        .split_whitespace()
        .next()
        .filter(|word| (3..=4).contains(&word.len()) && word.bytes().all(|b| b.is_ascii_uppercase()))
        .unwrap_or("Command");
    match text.strip_suffix("\r\n") {
        Some(body) if !body.contains(['\r', '\n']) => Ok(()),
        Some(_) => Err(Pop3Error::InvalidCommand(format!(
            "{} contains an embedded line break",
            verb
        ))),
        None => Err(Pop3Error::InvalidCommand(format!(
            "{} is not terminated by CRLF",
            verb
        ))),
    }
}

// Transaction state commands

/// Build STAT command
pub fn stat() -> &'static str {
    "STAT\r\n"
}

/// Build LIST command (multi-line, all messages)
pub fn list() -> &'static str {
    "LIST\r\n"
}

/// Build UIDL command (multi-line, all messages)
pub fn uidl() -> &'static str {
    "UIDL\r\n"
}

/// Build UIDL command for a single message (single-line response)
pub fn uidl_one(msg: u32) -> String {
    format!("UIDL {}\r\n", msg)
}

/// Build RETR command
pub fn retr(msg: u32) -> String {
    format!("RETR {}\r\n", msg)
}

/// Build TOP command (headers plus `lines` body lines)
pub fn top(msg: u32, lines: u32) -> String {
    format!("TOP {} {}\r\n", msg, lines)
}

/// Build DELE command
pub fn dele(msg: u32) -> String {
    format!("DELE {}\r\n", msg)
}

/// Build RSET command
pub fn rset() -> &'static str {
    "RSET\r\n"
}

/// Build NOOP command
pub fn noop() -> &'static str {
    "NOOP\r\n"
}

/// Build QUIT command
pub fn quit() -> &'static str {
    "QUIT\r\n"
}

/// Maildrop size reported by STAT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatInfo {
    /// Number of messages in the maildrop
    pub count: u32,
    /// Total size in octets
    pub size: u64,
}

/// One entry of a LIST response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListEntry {
    /// Message number
    pub msg: u32,
    /// Size in octets
    pub size: u64,
}

/// One entry of a UIDL response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UidlEntry {
    /// Message number
    pub msg: u32,
    /// Server-assigned unique id
    pub uid: String,
}

/// Strip the `+OK` / `-ERR` status token from a response line
///
/// Returns the remaining text with leading whitespace removed.
pub fn response_text(line: &str) -> &str {
    line.strip_prefix("+OK")
        .or_else(|| line.strip_prefix("-ERR"))
        .unwrap_or(line)
        .trim_start()
}

/// Parse the `+OK count size` line of a STAT response
pub fn parse_stat(line: &str) -> Result<StatInfo> {
    let mut parts = response_text(line).split_whitespace();
    let count = parts.next().and_then(|s| s.parse().ok());
    let size = parts.next().and_then(|s| s.parse().ok());
    match (count, size) {
        (Some(count), Some(size)) => Ok(StatInfo { count, size }),
        _ => Err(Pop3Error::InvalidResponse(line.chars().take(100).collect())),
    }
}

/// Parse one `msg size` line of a LIST body
pub fn parse_list_line(line: &str) -> Result<ListEntry> {
    let mut parts = line.split_whitespace();
    let msg = parts.next().and_then(|s| s.parse().ok());
    let size = parts.next().and_then(|s| s.parse().ok());
    match (msg, size) {
        (Some(msg), Some(size)) => Ok(ListEntry { msg, size }),
        _ => Err(Pop3Error::InvalidResponse(line.chars().take(100).collect())),
    }
}

/// Parse one `msg uid` line of a UIDL body (or of a single-message `+OK msg uid`)
pub fn parse_uidl_line(line: &str) -> Result<UidlEntry> {
    let mut parts = response_text(line).split_whitespace();
    let msg = parts.next().and_then(|s| s.parse().ok());
    let uid = parts.next();
    match (msg, uid) {
        (Some(msg), Some(uid)) if uid.len() <= 70 => Ok(UidlEntry {
            msg,
            uid: uid.to_string(),
        }),
        _ => Err(Pop3Error::InvalidResponse(line.chars().take(100).collect())),
    }
}

/// Check whether a response line is a SASL continuation (`+ ` or bare `+`)
///
/// Returns the base64 payload when it is.
pub fn sasl_continuation(line: &str) -> Option<&str> {
    if line == "+" {
        return Some("");
    }
    line.strip_prefix("+ ")
}

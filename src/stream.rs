//! Buffered POP3 byte stream
//!
//! [`Pop3Stream`] sits between the engine and the raw transport. It offers three
//! kinds of reads over one fixed-size buffer:
//!
//! - [`line`](Pop3Stream::line): CRLF-terminated status lines
//! - [`gets`](Pop3Stream::gets): raw chunks up to the next LF, for bulk forwarding
//! - [`getd`](Pop3Stream::getd): RFC 1939 multi-line bodies with dot-stuffing removed
//!
//! Writes pass straight through to the transport.
//!
//! # Dot-stuffing
//!
//! In [`StreamMode::Data`] a line starting with `.` is either stuffed (the dot
//! is dropped and the rest of the line is data) or is the lone `.` CRLF that
//! ends the body, after which the stream sits in [`StreamMode::Eod`] until the
//! engine switches it back to [`StreamMode::Line`].

use std::io::{self, Read, Write};
use tracing::warn;

/// Size of the fixed read buffer
pub const STREAM_BUFFER_SIZE: usize = 4096;

/// Initial capacity of the line buffer (grows by 1.5x)
pub const LINE_BUFFER_INITIAL: usize = 1024;

/// Bytes needed to tell a stuffed dot from the `.\r\n` terminator
const LOOKAHEAD: usize = 3;

const TERMINATOR: &[u8] = b".\r\n";

/// Blocking byte transport the stream reads from and writes to
///
/// Implemented for every `Read + Write` type, so a `TcpStream`, a TLS stream,
/// or an in-memory test double can all be handed to the engine. Transports
/// are owned, since data handlers are boxed `'static` closures over them.
pub trait Transport: Read + Write + 'static {}

impl<T: Read + Write + 'static + ?Sized> Transport for T {}

/// Read mode of a [`Pop3Stream`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Status/response lines
    Line,
    /// Inside a dot-stuffed multi-line body
    Data,
    /// Terminator seen; no more body data until the mode is reset
    Eod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// At the beginning of a body line, a leading dot must be examined
    LineStart,
    /// Somewhere inside a body line, scanning for LF
    InLine,
}

/// A slice handed out by [`Pop3Stream::gets`] or [`Pop3Stream::getd`]
///
/// The slice borrows the stream's internal buffer and is valid until the next
/// read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    /// Bytes returned by this call (may be empty)
    pub data: &'a [u8],
    /// Whether further calls can return more data
    pub more: bool,
}

impl<'a> Chunk<'a> {
    fn partial(data: &'a [u8]) -> Self {
        Self { data, more: true }
    }

    fn last(data: &'a [u8]) -> Self {
        Self { data, more: false }
    }
}

/// Buffered reader/writer over a POP3 transport
pub struct Pop3Stream<T> {
    source: T,
    buf: Box<[u8]>,
    /// Next unread byte in `buf`
    ptr: usize,
    /// One past the last valid byte in `buf`
    end: usize,
    linebuf: Vec<u8>,
    mode: StreamMode,
    state: ScanState,
}

impl<T: Transport> Pop3Stream<T> {
    /// Wrap a transport, starting in [`StreamMode::Line`]
    pub fn new(source: T) -> Self {
        Self {
            source,
            buf: vec![0u8; STREAM_BUFFER_SIZE].into_boxed_slice(),
            ptr: 0,
            end: 0,
            linebuf: Vec::with_capacity(LINE_BUFFER_INITIAL),
            mode: StreamMode::Line,
            state: ScanState::LineStart,
        }
    }

    /// Current read mode
    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    /// Switch read mode
    ///
    /// Switching resets the body scanner to the start of a line, which is also
    /// how an [`StreamMode::Eod`] stream is re-armed for the next command.
    pub fn set_mode(&mut self, mode: StreamMode) {
        self.mode = mode;
        self.state = ScanState::LineStart;
    }

    /// Number of bytes read from the transport but not yet consumed
    pub fn buffered(&self) -> usize {
        self.end - self.ptr
    }

    /// Borrow the underlying transport
    pub fn get_ref(&self) -> &T {
        &self.source
    }

    /// Mutably borrow the underlying transport
    ///
    /// Reading from the transport directly bypasses the buffer; only do this
    /// when [`buffered`](Self::buffered) is zero (e.g. to run a TLS handshake
    /// after STLS).
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.source
    }

    /// Unwrap the transport, discarding any buffered bytes
    pub fn into_inner(self) -> T {
        self.source
    }

    /// Read more bytes from the transport, keeping the unconsumed tail
    ///
    /// A zero-length read means the peer closed the connection and is reported
    /// as `UnexpectedEof`.
    fn fill(&mut self) -> io::Result<usize> {
        let left = self.end - self.ptr;
        self.buf.copy_within(self.ptr..self.end, 0);
        self.ptr = 0;
        self.end = left;

        if self.end == self.buf.len() {
            return Ok(left);
        }

        loop {
            match self.source.read(&mut self.buf[self.end..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed by server",
                    ));
                }
                Ok(n) => {
                    self.end += n;
                    return Ok(self.end);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn fill_to(&mut self, wanted: usize) -> io::Result<()> {
        while self.end - self.ptr < wanted {
            self.fill()?;
        }
        Ok(())
    }

    fn at_terminator(&self) -> bool {
        self.buf[self.ptr..self.end].starts_with(TERMINATOR)
    }

    /// Read the next line with its CRLF stripped
    ///
    /// Returns `Ok(None)` once the stream is in [`StreamMode::Eod`]. In
    /// [`StreamMode::Data`] a leading stuffed dot is removed and the lone `.`
    /// terminator moves the stream to `Eod`, so a command callback can consume
    /// a multi-line body line by line.
    pub fn line(&mut self) -> io::Result<Option<&[u8]>> {
        if self.mode == StreamMode::Eod {
            return Ok(None);
        }

        self.linebuf.clear();

        if self.mode == StreamMode::Data {
            self.fill_to(LOOKAHEAD)?;
            if self.buf[self.ptr] == b'.' {
                if self.at_terminator() {
                    self.ptr += TERMINATOR.len();
                    self.mode = StreamMode::Eod;
                    self.state = ScanState::LineStart;
                    return Ok(None);
                }
                self.ptr += 1;
            }
        }

        loop {
            let avail = &self.buf[self.ptr..self.end];
            match find_lf(avail) {
                Some(i) => {
                    append_line(&mut self.linebuf, &avail[..i]);
                    self.ptr += i + 1;
                    break;
                }
                None => {
                    append_line(&mut self.linebuf, avail);
                    self.ptr = self.end;
                    self.fill()?;
                }
            }
        }

        if self.linebuf.last() == Some(&b'\r') {
            self.linebuf.pop();
        }
        Ok(Some(self.linebuf.as_slice()))
    }

    /// Read raw bytes up to and including the next LF
    ///
    /// No dot handling is done. `more` is true when the current fill ran out
    /// before an LF was found.
    pub fn gets(&mut self) -> io::Result<Chunk<'_>> {
        if self.ptr == self.end {
            self.fill()?;
        }

        let start = self.ptr;
        let avail = &self.buf[start..self.end];
        let (len, more) = match find_lf(avail) {
            Some(i) => (i + 1, false),
            None => (avail.len(), true),
        };
        self.ptr += len;
        Ok(Chunk {
            data: &self.buf[start..start + len],
            more,
        })
    }

    /// Read the next piece of a dot-stuffed body
    ///
    /// Data is passed through verbatim (CRLF included) except that a stuffed
    /// leading dot is dropped. When the lone `.` CRLF terminator is reached
    /// the stream moves to [`StreamMode::Eod`] and the returned chunk has
    /// `more == false`; it may still carry data that preceded the terminator.
    pub fn getd(&mut self) -> io::Result<Chunk<'_>> {
        match self.mode {
            StreamMode::Eod => return Ok(Chunk::last(&[])),
            StreamMode::Line => {
                warn!("pop3 stream: body read attempted in line mode");
                return Ok(Chunk::last(&[]));
            }
            StreamMode::Data => {}
        }

        self.fill_to(LOOKAHEAD)?;

        let end = self.end;
        let mut p = self.ptr;
        let mut s = p;
        let mut state = self.state;

        loop {
            if state == ScanState::LineStart && self.buf[p] == b'.' {
                if self.buf[p..end].starts_with(TERMINATOR) {
                    self.ptr = p + TERMINATOR.len();
                    self.mode = StreamMode::Eod;
                    self.state = ScanState::LineStart;
                    return Ok(Chunk::last(&self.buf[s..p]));
                }

                if p == s {
                    s += 1;
                    p += 1;
                } else {
                    // Hand back what precedes the stuffed dot, skip the dot itself
                    self.ptr = p + 1;
                    self.state = ScanState::InLine;
                    return Ok(Chunk::partial(&self.buf[s..p]));
                }
            }

            match find_lf(&self.buf[p..end]) {
                Some(i) => {
                    p += i + 1;
                    state = ScanState::LineStart;
                }
                None => {
                    p = end;
                    state = ScanState::InLine;
                }
            }

            if end - p < LOOKAHEAD {
                break;
            }
        }

        self.ptr = p;
        self.state = state;
        Ok(Chunk::partial(&self.buf[s..p]))
    }
}

/// Byte reader over a multi-line body
///
/// Only returns data in [`StreamMode::Data`]; stuffed dots are removed, CRLF
/// is normalised to LF, and the terminator reads as end of file. A CR not
/// followed by LF is part of the body and is kept.
impl<T: Transport> Read for Pop3Stream<T> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.mode != StreamMode::Data || out.is_empty() {
            return Ok(0);
        }

        let mut o = 0;
        while o < out.len() {
            if self.state == ScanState::LineStart {
                if o > 0 && self.end - self.ptr < LOOKAHEAD {
                    break;
                }
                self.fill_to(LOOKAHEAD)?;
                if self.buf[self.ptr] == b'.' {
                    if self.at_terminator() {
                        self.ptr += TERMINATOR.len();
                        self.mode = StreamMode::Eod;
                        break;
                    }
                    self.ptr += 1;
                }
                self.state = ScanState::InLine;
            }

            if self.ptr == self.end {
                if o > 0 {
                    break;
                }
                self.fill()?;
            }

            let c = self.buf[self.ptr];
            if c == b'\r' {
                if self.end - self.ptr < 2 {
                    if o > 0 {
                        break;
                    }
                    self.fill_to(2)?;
                }
                if self.buf[self.ptr + 1] == b'\n' {
                    self.ptr += 1;
                    continue;
                }
            }

            self.ptr += 1;
            match c {
                b'\n' => {
                    out[o] = b'\n';
                    o += 1;
                    self.state = ScanState::LineStart;
                }
                _ => {
                    out[o] = c;
                    o += 1;
                }
            }
        }

        Ok(o)
    }
}

impl<T: Transport> Write for Pop3Stream<T> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.source.write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.source.flush()
    }
}

impl<T> std::fmt::Debug for Pop3Stream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pop3Stream")
            .field("mode", &self.mode)
            .field("buffered", &(self.end - self.ptr))
            .finish_non_exhaustive()
    }
}

fn find_lf(bytes: &[u8]) -> Option<usize> {
    bytes.iter().position(|&c| c == b'\n')
}

fn append_line(linebuf: &mut Vec<u8>, bytes: &[u8]) {
    let needed = linebuf.len() + bytes.len();
    if needed > linebuf.capacity() {
        let mut cap = linebuf.capacity().max(LINE_BUFFER_INITIAL);
        while cap < needed {
            cap = cap * 3 / 2;
        }
        linebuf.reserve_exact(cap - linebuf.len());
    }
    linebuf.extend_from_slice(bytes);
}

/// Dot-stuff a body for transmission (RFC 1939 Section 3)
///
/// Every line that starts with `.` gets a second `.`. The terminator is not
/// appended; callers add `.\r\n` after a body that ends in CRLF.
pub fn dot_stuff(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + body.len() / 64 + 1);
    let mut at_line_start = true;
    for &c in body {
        if at_line_start && c == b'.' {
            out.push(b'.');
        }
        out.push(c);
        at_line_start = c == b'\n';
    }
    out
}

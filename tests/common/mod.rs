//! In-memory POP3 server transport shared by the integration tests

#![allow(dead_code)]

use pop3_engine::{EngineFlags, Pop3Client, Pop3Engine, ServerConfig};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Arc;

/// Replays scripted server output and records what the client writes
///
/// Each `read` returns at most one scripted chunk, so tests control exactly
/// where reads split the byte stream.
#[derive(Debug, Default)]
pub struct MockServer {
    chunks: VecDeque<Vec<u8>>,
    pub written: Vec<u8>,
    /// Number of further writes that succeed; `None` means unlimited
    pub writes_allowed: Option<usize>,
    pub reads: usize,
}

impl MockServer {
    /// One chunk per script entry
    pub fn new<S: AsRef<[u8]>>(script: &[S]) -> Self {
        Self {
            chunks: script.iter().map(|s| s.as_ref().to_vec()).collect(),
            ..Self::default()
        }
    }

    /// The whole script, cut into reads of the given sizes (cycled)
    pub fn split(data: &[u8], sizes: &[usize]) -> Self {
        let mut chunks = VecDeque::new();
        let mut rest = data;
        let mut sizes = sizes.iter().copied().filter(|&n| n > 0).cycle();
        while !rest.is_empty() {
            let n = sizes.next().unwrap_or(rest.len()).min(rest.len());
            let (head, tail) = rest.split_at(n);
            chunks.push_back(head.to_vec());
            rest = tail;
        }
        Self {
            chunks,
            ..Self::default()
        }
    }

    /// Append more server output
    pub fn push(&mut self, chunk: impl AsRef<[u8]>) {
        self.chunks.push_back(chunk.as_ref().to_vec());
    }

    pub fn written_str(&self) -> String {
        String::from_utf8_lossy(&self.written).into_owned()
    }

    pub fn remaining(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }
}

impl Read for MockServer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reads += 1;
        let Some(mut chunk) = self.chunks.pop_front() else {
            return Ok(0);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.chunks.push_front(chunk.split_off(n));
        }
        Ok(n)
    }
}

impl Write for MockServer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.writes_allowed {
            Some(0) => return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer went away")),
            Some(ref mut n) => *n -= 1,
            None => {}
        }
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Engine over a scripted server
pub fn engine<S: AsRef<[u8]>>(script: &[S], flags: EngineFlags) -> Pop3Engine<MockServer> {
    init_tracing();
    Pop3Engine::new(MockServer::new(script), flags).expect("engine setup")
}

pub fn written(engine: &Pop3Engine<MockServer>) -> String {
    engine.stream().get_ref().written_str()
}

/// Client over a scripted server, `CAPA` disabled unless the script answers it
pub fn client<S: AsRef<[u8]>>(script: &[S], probe_capa: bool) -> Pop3Client<MockServer> {
    init_tracing();
    let mut config = ServerConfig::plain("pop.example.com", "mrose", "tanstaaf");
    config.disable_extensions = !probe_capa;
    config.log_wire = true;
    Pop3Client::from_transport(MockServer::new(script), Arc::new(config)).expect("client setup")
}

pub fn client_written(client: &Pop3Client<MockServer>) -> String {
    written(client.engine())
}

//! RFC 1939 Section 3 - Multi-line responses and byte-stuffing
//!
//! - A multi-line block is terminated by ".\r\n"
//! - Lines starting with "." are sent with an extra leading "."
//! - The terminator must be recognised however reads split it

use crate::common::{MockServer, engine, init_tracing};
use pop3_engine::{
    CommandKind, CommandState, EngineFlags, Pop3Engine, Pop3Stream, StreamMode, collect_body,
    collect_lines, commands, dot_stuff,
};
use proptest::prelude::*;
use std::cell::RefCell;
use std::io::Read;
use std::rc::Rc;

fn data_stream(chunks: &[&str]) -> Pop3Stream<MockServer> {
    let mut stream = Pop3Stream::new(MockServer::new(chunks));
    stream.set_mode(StreamMode::Data);
    stream
}

#[test]
fn test_line_unstuffs_and_stops_at_terminator() {
    let mut stream = data_stream(&["first\r\n..second\r\n...\r\n.\r\n+OK next\r\n"]);

    assert_eq!(stream.line().unwrap(), Some(&b"first"[..]));
    assert_eq!(stream.line().unwrap(), Some(&b".second"[..]));
    assert_eq!(stream.line().unwrap(), Some(&b".."[..]));
    assert_eq!(stream.line().unwrap(), None);
    assert_eq!(stream.mode(), StreamMode::Eod);
    assert_eq!(stream.line().unwrap(), None);

    stream.set_mode(StreamMode::Line);
    assert_eq!(stream.line().unwrap(), Some(&b"+OK next"[..]));
}

#[test]
fn test_dot_followed_by_text_is_not_terminator() {
    let mut stream = data_stream(&[".x\r\n.\r\n"]);
    assert_eq!(stream.line().unwrap(), Some(&b"x"[..]));
    assert_eq!(stream.line().unwrap(), None);
}

#[test]
fn test_terminator_split_across_fills() {
    let mut stream = data_stream(&["hello\r\n.", "\r", "\n"]);

    let mut body = Vec::new();
    loop {
        let chunk = stream.getd().unwrap();
        body.extend_from_slice(chunk.data);
        if !chunk.more {
            break;
        }
    }

    assert_eq!(body, b"hello\r\n");
    assert_eq!(stream.mode(), StreamMode::Eod);
    assert_eq!(stream.buffered(), 0);
}

#[test]
fn test_stuffed_dot_split_from_its_line() {
    let mut stream = data_stream(&["a\r\n", ".", ".b\r\n.\r\n"]);

    let mut body = Vec::new();
    loop {
        let chunk = stream.getd().unwrap();
        body.extend_from_slice(chunk.data);
        if !chunk.more {
            break;
        }
    }
    assert_eq!(body, b"a\r\n.b\r\n");
}

#[test]
fn test_gets_passes_bytes_through() {
    let mut stream = Pop3Stream::new(MockServer::new(&["+OK partial", " line\r\n..raw\r\n"]));

    let first = stream.gets().unwrap();
    assert_eq!(first.data, b"+OK partial");
    assert!(first.more);

    let rest = stream.gets().unwrap();
    assert_eq!(rest.data, b" line\r\n");
    assert!(!rest.more);

    let raw = stream.gets().unwrap();
    assert_eq!(raw.data, b"..raw\r\n");
}

#[test]
fn test_read_normalises_line_endings() {
    let mut stream = data_stream(&["Subject: hi\r\n\r\n..body\r\n.\r\n"]);

    let mut text = String::new();
    stream.read_to_string(&mut text).unwrap();
    assert_eq!(text, "Subject: hi\n\n.body\n");
    assert_eq!(stream.mode(), StreamMode::Eod);
}

#[test]
fn test_read_keeps_lone_carriage_return() {
    let mut stream = data_stream(&["a\rb\r\n.\r\n"]);

    let mut body = Vec::new();
    stream.read_to_end(&mut body).unwrap();
    assert_eq!(body, b"a\rb\n");
}

#[test]
fn test_read_carriage_return_split_from_next_byte() {
    let mut stream = data_stream(&["x\r", "y\r", "\n..z\r", "\n", ".\r\n"]);

    let mut body = Vec::new();
    stream.read_to_end(&mut body).unwrap();
    assert_eq!(body, b"x\ry\n.z\n");
    assert_eq!(stream.mode(), StreamMode::Eod);
}

#[test]
fn test_read_outside_data_mode_is_eof() {
    let mut stream = Pop3Stream::new(MockServer::new(&["+OK\r\n"]));
    let mut buf = [0u8; 16];
    assert_eq!(stream.read(&mut buf).unwrap(), 0);
}

#[test]
fn test_eof_inside_body_is_an_error() {
    let mut stream = data_stream(&["truncated body\r\n"]);
    assert!(stream.line().unwrap().is_some());
    assert!(stream.line().is_err());
}

#[test]
fn test_long_line_grows_line_buffer() {
    let long = "x".repeat(10_000);
    let script = format!("{}\r\n.\r\n", long);
    let mut stream = data_stream(&[script.as_str()]);

    assert_eq!(stream.line().unwrap().map(<[u8]>::len), Some(10_000));
    assert_eq!(stream.line().unwrap(), None);
}

#[test]
fn test_callback_getd_receives_unstuffed_body() {
    let mut engine = engine(
        &[
            "+OK ready\r\n",
            "+OK 44 octets\r\n",
            "From: a@b\r\n\r\n..leading dot\r\n",
            "...\r\n.",
            "\r\n",
        ],
        EngineFlags::DISABLE_EXTENSIONS,
    );

    let body = Rc::new(RefCell::new(Vec::new()));
    let final_mode = Rc::new(RefCell::new(None));
    let (sink, mode) = (Rc::clone(&body), Rc::clone(&final_mode));

    let id = engine
        .command_new(
            CommandKind::Multi,
            Some(Box::new(move |stream: &mut Pop3Stream<MockServer>| -> std::io::Result<()> {
                loop {
                    let chunk = stream.getd()?;
                    sink.borrow_mut().extend_from_slice(chunk.data);
                    if !chunk.more {
                        break;
                    }
                }
                *mode.borrow_mut() = Some(stream.mode());
                Ok(())
            })),
            commands::retr(1),
        )
        .unwrap();

    assert_eq!(engine.run_to_completion(id).unwrap(), CommandState::Data);
    assert_eq!(
        body.borrow().as_slice(),
        b"From: a@b\r\n\r\n.leading dot\r\n..\r\n"
    );
    assert_eq!(*final_mode.borrow(), Some(StreamMode::Eod));
    assert_eq!(engine.stream().mode(), StreamMode::Line);
}

#[test]
fn test_list_lines_collected() {
    let mut engine = engine(
        &["+OK\r\n", "+OK 2 messages (320 octets)\r\n1 120\r\n2 200\r\n.\r\n"],
        EngineFlags::DISABLE_EXTENSIONS,
    );

    let (handler, lines) = collect_lines();
    let id = engine
        .command_new(CommandKind::Multi, Some(handler), commands::list())
        .unwrap();
    engine.run_to_completion(id).unwrap();

    assert_eq!(*lines.borrow(), vec!["1 120".to_string(), "2 200".to_string()]);
    assert_eq!(engine.command_response(id), Some("+OK 2 messages (320 octets)"));
}

#[test]
fn test_negative_multi_line_response_has_no_body() {
    let mut engine = engine(
        &["+OK\r\n", "-ERR no such message\r\n+OK\r\n"],
        EngineFlags::DISABLE_EXTENSIONS,
    );

    let (handler, body) = collect_body();
    let retr = engine
        .command_new(CommandKind::Multi, Some(handler), commands::retr(9))
        .unwrap();
    assert_eq!(engine.run_to_completion(retr).unwrap(), CommandState::Err);
    assert!(body.borrow().is_empty());

    let noop = engine.command_new(CommandKind::Simple, None, commands::noop()).unwrap();
    assert_eq!(engine.run_to_completion(noop).unwrap(), CommandState::Ok);
}

fn fetch_through_engine(wire: &[u8], sizes: &[usize]) -> Vec<u8> {
    init_tracing();
    let mut script = b"+OK\r\n+OK\r\n".to_vec();
    script.extend_from_slice(wire);

    let mut engine =
        Pop3Engine::new(MockServer::split(&script, sizes), EngineFlags::DISABLE_EXTENSIONS)
            .unwrap();
    let (handler, body) = collect_body();
    let id = engine
        .command_new(CommandKind::Multi, Some(handler), commands::retr(1))
        .unwrap();
    assert_eq!(engine.run_to_completion(id).unwrap(), CommandState::Data);
    assert_eq!(engine.stream().get_ref().remaining(), 0);
    body.take()
}

fn read_through_stream(wire: &[u8], sizes: &[usize]) -> Vec<u8> {
    let mut stream = Pop3Stream::new(MockServer::split(wire, sizes));
    stream.set_mode(StreamMode::Data);

    let mut body = Vec::new();
    let mut buf = [0u8; 5];
    loop {
        let n = stream.read(&mut buf).unwrap();
        if n == 0 {
            return body;
        }
        body.extend_from_slice(&buf[..n]);
    }
}

fn fold_crlf(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i..].starts_with(b"\r\n") {
            out.push(b'\n');
            i += 2;
        } else {
            out.push(data[i]);
            i += 1;
        }
    }
    out
}

proptest! {
    #[test]
    fn prop_read_folds_only_crlf(
        lines in prop::collection::vec("[.a-z\r ]{0,12}", 0..12),
        sizes in prop::collection::vec(1usize..9, 1..8),
    ) {
        let body: Vec<u8> = lines
            .iter()
            .flat_map(|line| line.bytes().chain(*b"\r\n"))
            .collect();

        let mut wire = dot_stuff(&body);
        wire.extend_from_slice(b".\r\n");

        prop_assert_eq!(read_through_stream(&wire, &sizes), fold_crlf(&body));
    }

    #[test]
    fn prop_unstuff_recovers_body(
        lines in prop::collection::vec("[.a-z ]{0,12}", 0..12),
        sizes in prop::collection::vec(1usize..9, 1..8),
    ) {
        let body: Vec<u8> = lines
            .iter()
            .flat_map(|line| line.bytes().chain(*b"\r\n"))
            .collect();

        let mut wire = dot_stuff(&body);
        wire.extend_from_slice(b".\r\n");

        prop_assert_eq!(fetch_through_engine(&wire, &sizes), body);
    }

    #[test]
    fn prop_stuffing_is_stable(lines in prop::collection::vec("[.a-z]{0,8}", 0..10)) {
        let body: Vec<u8> = lines
            .iter()
            .flat_map(|line| line.bytes().chain(*b"\r\n"))
            .collect();
        let stuffed = dot_stuff(&body);

        let mut wire = stuffed.clone();
        wire.extend_from_slice(b".\r\n");
        let unstuffed = fetch_through_engine(&wire, &[3]);
        prop_assert_eq!(dot_stuff(&unstuffed), stuffed);
    }
}

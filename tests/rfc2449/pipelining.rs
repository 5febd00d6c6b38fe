//! RFC 2449 Section 6.6 - PIPELINING
//!
//! Commands may be sent ahead of their responses, bounded by the engine's
//! outstanding-byte budget. Responses are always consumed in send order.

use crate::common::{engine, written};
use pop3_engine::{
    CommandKind, CommandState, EngineFlags, Pop3Error, Progress, SEND_LIMIT, collect_body,
    commands,
};

const PIPELINED: [&str; 2] = ["+OK POP3 ready\r\n", "+OK\r\nPIPELINING\r\n.\r\n"];

fn padded(tag: usize, width: usize) -> String {
    format!("NOOP {:0width$}\r\n", tag, width = width)
}

#[test]
fn test_budget_defers_without_reordering() {
    let mut script: Vec<&str> = PIPELINED.to_vec();
    script.extend(["+OK one\r\n", "+OK two\r\n", "+OK three\r\n", "+OK four\r\n"]);
    let mut engine = engine(&script, EngineFlags::empty());

    // 407 bytes each: two fit under the budget, the third does not
    let ids = [
        engine.command_new(CommandKind::Simple, None, padded(1, 400)).unwrap(),
        engine.command_new(CommandKind::Simple, None, padded(2, 400)).unwrap(),
        engine.command_new(CommandKind::Simple, None, padded(3, 400)).unwrap(),
        engine.command_new(CommandKind::Simple, None, commands::noop()).unwrap(),
    ];
    assert_eq!(engine.in_flight(), 2);
    assert_eq!(engine.queued(), 2);
    assert_eq!(engine.outstanding_bytes(), 814);

    let mut steps = 0;
    loop {
        assert!(engine.outstanding_bytes() <= SEND_LIMIT);
        steps += 1;
        if engine.iterate(None).unwrap() == Progress::Idle {
            break;
        }
    }
    assert_eq!(steps, 4);

    let responses: Vec<_> = ids
        .iter()
        .map(|id| engine.command_response(*id).unwrap().to_string())
        .collect();
    assert_eq!(responses, ["+OK one", "+OK two", "+OK three", "+OK four"]);

    let sent = written(&engine);
    let order: Vec<_> = sent.lines().map(|l| &l[..l.len().min(6)]).collect();
    assert_eq!(order, ["CAPA", "NOOP 0", "NOOP 0", "NOOP 0", "NOOP"]);
    assert!(sent.ends_with("3\r\nNOOP\r\n"));
}

#[test]
fn test_queue_promoted_as_budget_frees() {
    let mut script: Vec<&str> = PIPELINED.to_vec();
    script.extend(["+OK a\r\n", "+OK b\r\n", "+OK c\r\n"]);
    let mut engine = engine(&script, EngineFlags::empty());

    let a = engine.command_new(CommandKind::Simple, None, padded(1, 600)).unwrap();
    let b = engine.command_new(CommandKind::Simple, None, padded(2, 600)).unwrap();
    let c = engine.command_new(CommandKind::Simple, None, commands::noop()).unwrap();
    assert_eq!((engine.in_flight(), engine.queued()), (1, 2));

    assert_eq!(engine.iterate(None).unwrap(), Progress::MoreWork);
    assert_eq!(engine.command_state(a), Some(CommandState::Ok));
    assert_eq!((engine.in_flight(), engine.queued()), (2, 0));

    assert_eq!(engine.run_to_completion(c).unwrap(), CommandState::Ok);
    assert_eq!(engine.command_response(b), Some("+OK b"));
    assert_eq!(engine.outstanding_bytes(), 0);
}

#[test]
fn test_without_pipelining_one_command_dispatched() {
    let mut engine = engine(
        &["+OK\r\n", "+OK\r\nUIDL\r\n.\r\n", "+OK 1\r\n", "+OK 2\r\n", "+OK 3\r\n"],
        EngineFlags::empty(),
    );

    let ids: Vec<_> = (1..=3)
        .map(|n| engine.command_new(CommandKind::Simple, None, commands::dele(n)).unwrap())
        .collect();

    let dispatched = |engine: &pop3_engine::Pop3Engine<_>| {
        ids.iter()
            .filter(|id| engine.command_state(**id) == Some(CommandState::Dispatched))
            .count()
    };

    assert_eq!(dispatched(&engine), 1);
    assert_eq!(written(&engine), "CAPA\r\nDELE 1\r\n");

    while engine.iterate(None).unwrap() == Progress::MoreWork {
        assert!(dispatched(&engine) <= 1);
    }
    assert_eq!(written(&engine), "CAPA\r\nDELE 1\r\nDELE 2\r\nDELE 3\r\n");
    assert_eq!(dispatched(&engine), 0);
}

#[test]
fn test_wait_returns_once_target_finishes() {
    let mut script: Vec<&str> = PIPELINED.to_vec();
    script.extend(["+OK a\r\n+OK b\r\n+OK c\r\n"]);
    let mut engine = engine(&script, EngineFlags::empty());

    let a = engine.command_new(CommandKind::Simple, None, commands::noop()).unwrap();
    let b = engine.command_new(CommandKind::Simple, None, commands::noop()).unwrap();
    let c = engine.command_new(CommandKind::Simple, None, commands::noop()).unwrap();

    assert_eq!(engine.iterate(Some(a)).unwrap(), Progress::Idle);
    assert_eq!(engine.command_state(b), Some(CommandState::Dispatched));
    assert_eq!(engine.iterate(Some(a)).unwrap(), Progress::Idle);
    assert_eq!(engine.command_state(b), Some(CommandState::Dispatched));

    assert_eq!(engine.iterate(None).unwrap(), Progress::MoreWork);
    assert_eq!(engine.iterate(None).unwrap(), Progress::Idle);
    assert_eq!(engine.command_state(c), Some(CommandState::Ok));
}

#[test]
fn test_freed_active_command_is_discarded() {
    let mut script: Vec<&str> = PIPELINED.to_vec();
    script.extend(["+OK\r\nbody a\r\n.\r\n+OK\r\nbody b\r\n.\r\n+OK\r\n"]);
    let mut engine = engine(&script, EngineFlags::empty());

    let (handler_a, body_a) = collect_body();
    let (handler_b, body_b) = collect_body();
    let a = engine
        .command_new(CommandKind::Multi, Some(handler_a), commands::retr(1))
        .unwrap();
    let b = engine
        .command_new(CommandKind::Multi, Some(handler_b), commands::retr(2))
        .unwrap();
    let c = engine.command_new(CommandKind::Simple, None, commands::noop()).unwrap();

    assert!(!engine.command_free(a));
    assert!(engine.command_free(b));

    assert_eq!(engine.run_to_completion(c).unwrap(), CommandState::Ok);
    assert_eq!(engine.command_state(b), None);
    assert_eq!(body_a.borrow().as_slice(), b"body a\r\n");
    assert_eq!(body_b.borrow().as_slice(), b"body b\r\n");
}

#[test]
fn test_write_failure_fails_outstanding_commands() {
    let mut engine = engine(&["+OK\r\n", "+OK first\r\n"], EngineFlags::DISABLE_EXTENSIONS);
    engine.transport_mut().writes_allowed = Some(1);

    let a = engine.command_new(CommandKind::Simple, None, commands::noop()).unwrap();
    let b = engine.command_new(CommandKind::Simple, None, commands::stat()).unwrap();
    assert_eq!(engine.queued(), 1);

    assert!(matches!(engine.iterate(None), Err(Pop3Error::Io(_))));
    assert_eq!(engine.command_state(a), Some(CommandState::Ok));
    assert_eq!(engine.command_state(b), Some(CommandState::Err));
    assert_eq!((engine.in_flight(), engine.queued()), (0, 0));

    assert!(matches!(
        engine.command_new(CommandKind::Simple, None, commands::noop()),
        Err(Pop3Error::Io(_))
    ));
}

#[test]
fn test_smuggled_command_cannot_shift_responses() {
    let mut script: Vec<&str> = PIPELINED.to_vec();
    script.extend(["+OK 3 1200\r\n", "-ERR injected dele\r\n"]);
    let mut engine = engine(&script, EngineFlags::empty());

    let smuggled = commands::user("bob\r\nDELE 1")
        .and_then(|text| engine.command_new(CommandKind::Simple, None, text));
    assert!(matches!(smuggled, Err(Pop3Error::InvalidCommand(_))));

    let raw = engine.command_new(CommandKind::Simple, None, "USER bob\r\nDELE 1\r\n");
    assert!(matches!(raw, Err(Pop3Error::InvalidCommand(_))));
    assert_eq!(engine.in_flight(), 0);

    let stat = engine.command_new(CommandKind::Simple, None, commands::stat()).unwrap();
    assert_eq!(engine.run_to_completion(stat).unwrap(), CommandState::Ok);
    assert_eq!(engine.command_response(stat), Some("+OK 3 1200"));
    assert_eq!(written(&engine), "CAPA\r\nSTAT\r\n");
}

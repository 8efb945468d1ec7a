//! Command mailbox over the simulated stack: dispatch, clearing and the
//! blink action on a recording pin.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use envsense::adapters::sim_stack::StackCall;
use envsense::app::ports::StackError;
use envsense::config::SystemConfig;
use envsense::gatt::command::{CommandChannel, CommandOutcome, Token};
use envsense::gatt::server::COMMAND_SENTINEL;

use super::mock_hw::{blink_channel, boot};

fn token(s: &str) -> Token {
    Token::try_from(s).unwrap()
}

#[test]
fn blink_runs_three_pulses_then_clears() {
    let server = boot();
    let config = SystemConfig::default();
    let (mut channel, pin, delay) = blink_channel(&config);

    server
        .stack()
        .peer_write(server.handles().command, b"blink")
        .unwrap();
    let outcome = channel.process_pending_command(&server);

    assert_eq!(outcome, CommandOutcome::Executed(token("blink")));
    assert_eq!(pin.pulses(), 3);
    assert_eq!(pin.history(), [true, false, true, false, true, false]);
    assert_eq!(delay.elapsed_ms(), 3 * 2 * 500);
    assert_eq!(
        server.stack().value(server.handles().command).unwrap(),
        COMMAND_SENTINEL
    );
}

#[test]
fn unrecognised_text_is_ignored_but_cleared() {
    let server = boot();
    let (mut channel, pin, _) = blink_channel(&SystemConfig::default());

    server
        .stack()
        .peer_write(server.handles().command, b"hello")
        .unwrap();
    assert_eq!(channel.process_pending_command(&server), CommandOutcome::Ignored);
    assert_eq!(pin.pulses(), 0);
    assert_eq!(
        server.stack().value(server.handles().command).unwrap(),
        COMMAND_SENTINEL
    );
}

#[test]
fn never_written_mailbox_is_empty_and_gets_sentinel() {
    let server = boot();
    let (mut channel, pin, _) = blink_channel(&SystemConfig::default());

    assert_eq!(channel.process_pending_command(&server), CommandOutcome::Empty);
    assert_eq!(pin.pulses(), 0);
    assert_eq!(
        server.stack().value(server.handles().command).unwrap(),
        COMMAND_SENTINEL
    );
}

#[test]
fn action_completes_before_the_clear() {
    let server = boot();
    let cmd = server.handles().command;
    let observed = Arc::new(std::sync::Mutex::new(Vec::new()));

    let mut channel = CommandChannel::new();
    let srv = Arc::clone(&server);
    let seen = Arc::clone(&observed);
    channel
        .register("probe", move || {
            // Mailbox still holds the token while the action runs.
            seen.lock().unwrap().push(srv.stack().value(cmd).unwrap());
        })
        .unwrap();

    server.stack().peer_write(cmd, b"probe").unwrap();
    server.stack().clear_calls();
    channel.process_pending_command(&server);

    assert_eq!(observed.lock().unwrap().as_slice(), &[b"probe".to_vec()]);
    let calls = server.stack().calls();
    assert_eq!(calls.first(), Some(&StackCall::Read { attr: cmd }));
    assert_eq!(
        calls.last(),
        Some(&StackCall::Write {
            attr: cmd,
            value: COMMAND_SENTINEL.to_vec()
        })
    );
}

#[test]
fn each_write_triggers_at_most_one_action() {
    let server = boot();
    let hits = Arc::new(AtomicU32::new(0));
    let h = Arc::clone(&hits);
    let mut channel = CommandChannel::new();
    channel
        .register("go", move || {
            h.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    server.stack().peer_write(server.handles().command, b"go").unwrap();
    channel.process_pending_command(&server);
    channel.process_pending_command(&server);
    channel.process_pending_command(&server);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn read_failure_counts_as_empty_and_still_clears() {
    let server = boot();
    let (mut channel, pin, _) = blink_channel(&SystemConfig::default());
    server
        .stack()
        .peer_write(server.handles().command, b"blink")
        .unwrap();
    server.stack().fail_reads(Some(StackError::Platform(-1)));

    assert_eq!(channel.process_pending_command(&server), CommandOutcome::Empty);
    assert_eq!(pin.pulses(), 0);
    assert_eq!(
        server.stack().value(server.handles().command).unwrap(),
        COMMAND_SENTINEL
    );
}

#[test]
fn clear_failure_is_absorbed() {
    let server = boot();
    let (mut channel, pin, _) = blink_channel(&SystemConfig::default());
    server
        .stack()
        .peer_write(server.handles().command, b"blink")
        .unwrap();
    server.stack().fail_writes(Some(StackError::Platform(-1)));

    assert_eq!(
        channel.process_pending_command(&server),
        CommandOutcome::Executed(token("blink"))
    );
    assert_eq!(pin.pulses(), 3);
}

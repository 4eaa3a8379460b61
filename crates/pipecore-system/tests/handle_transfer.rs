use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pipecore_system::{
    Core, CoreConfig, CoreError, CreateDataPipeOptions, CreateMessagePipeOptions, Deadline,
    HandleSignals, ReadDataFlags, ReadMessageFlags, ResultCode, WriteDataFlags, WriteMessageFlags,
};

#[test]
fn attached_handles_move_to_the_reader() {
    let core = Core::with_default_config();
    let (h0, h1) = core
        .create_message_pipe(&CreateMessagePipeOptions::default())
        .unwrap();
    let (hp, hc) = core
        .create_data_pipe(&CreateDataPipeOptions::default())
        .unwrap();

    core.write_message(h0, b"take these", &[hp, hc], WriteMessageFlags::NONE)
        .unwrap();
    assert!(matches!(
        core.write_data(hp, b"x", WriteDataFlags::empty()),
        Err(CoreError::InvalidHandle(_))
    ));

    let message = core.read_message(h1, ReadMessageFlags::empty()).unwrap();
    assert_eq!(message.bytes.as_ref(), b"take these");
    let [producer, consumer] = message.handles[..] else {
        panic!("expected two handles, got {:?}", message.handles);
    };
    assert_ne!(producer, hp);
    assert_ne!(consumer, hc);

    // Same pipe, reachable through the new values.
    core.write_data(producer, b"moved", WriteDataFlags::empty())
        .unwrap();
    assert_eq!(
        core.read_data(consumer, ReadDataFlags::empty())
            .unwrap()
            .as_ref(),
        b"moved"
    );
}

#[test]
fn failed_write_restores_attached_handles() {
    let core = Core::with_default_config();
    let (h0, h1) = core
        .create_message_pipe(&CreateMessagePipeOptions::default())
        .unwrap();
    let (x0, x1) = core
        .create_message_pipe(&CreateMessagePipeOptions::default())
        .unwrap();
    core.close(h1).unwrap();

    assert_eq!(
        core.write_message(h0, b"lost", &[x0], WriteMessageFlags::NONE),
        Err(CoreError::PeerClosed)
    );
    // x0 is still live under the same value.
    core.write_message(x0, b"still here", &[], WriteMessageFlags::NONE)
        .unwrap();
    assert_eq!(
        core.read_message(x1, ReadMessageFlags::empty())
            .unwrap()
            .bytes
            .as_ref(),
        b"still here"
    );
}

#[test]
fn invalid_or_duplicate_attachments_are_rejected() {
    let core = Core::with_default_config();
    let (h0, h1) = core
        .create_message_pipe(&CreateMessagePipeOptions::default())
        .unwrap();
    let (x0, x1) = core
        .create_message_pipe(&CreateMessagePipeOptions::default())
        .unwrap();
    core.close(x1).unwrap();

    for attached in [vec![x0, x0], vec![x0, x1]] {
        let err = core
            .write_message(h0, b"", &attached, WriteMessageFlags::NONE)
            .unwrap_err();
        assert_eq!(err.code(), ResultCode::InvalidArgument);
    }
    assert!(core.signals_state(x0).is_ok());
    assert!(matches!(
        core.read_message(h1, ReadMessageFlags::empty()),
        Err(CoreError::ShouldWait(_))
    ));
}

#[test]
fn unread_attachments_are_closed_with_the_queue() {
    let core = Core::with_default_config();
    let (h0, h1) = core
        .create_message_pipe(&CreateMessagePipeOptions::default())
        .unwrap();
    let (x0, x1) = core
        .create_message_pipe(&CreateMessagePipeOptions::default())
        .unwrap();

    core.write_message(h0, b"", &[x0], WriteMessageFlags::NONE)
        .unwrap();
    // Closing the receiver destroys the queued message and the endpoint in it.
    core.close(h1).unwrap();

    let state = core
        .wait(x1, HandleSignals::PEER_CLOSED, Deadline::INDEFINITE)
        .unwrap();
    assert!(state.satisfies(HandleSignals::PEER_CLOSED));
    assert_eq!(core.handle_count(), 2);
}

#[test]
fn dropping_core_closes_everything() {
    let core = Core::new(CoreConfig::default()).unwrap();
    let (h0, _h1) = core
        .create_message_pipe(&CreateMessagePipeOptions::default())
        .unwrap();
    let (x0, _x1) = core
        .create_message_pipe(&CreateMessagePipeOptions::default())
        .unwrap();
    core.write_message(h0, b"", &[x0], WriteMessageFlags::NONE)
        .unwrap();
    assert_eq!(core.handle_count(), 3);
    drop(core);
}

#[test]
fn sending_a_handle_ends_waits_on_it() {
    let core = Arc::new(Core::with_default_config());
    let (h0, h1) = core
        .create_message_pipe(&CreateMessagePipeOptions::default())
        .unwrap();
    let (c0, c1) = core
        .create_message_pipe(&CreateMessagePipeOptions::default())
        .unwrap();

    let waiter = {
        let core = Arc::clone(&core);
        thread::spawn(move || {
            let started = Instant::now();
            let result = core.wait(c0, HandleSignals::READABLE, Duration::from_secs(5));
            (result, started.elapsed())
        })
    };
    thread::sleep(Duration::from_millis(20));
    core.write_message(h0, b"moving", &[c0], WriteMessageFlags::NONE)
        .unwrap();

    let (result, elapsed) = waiter.join().unwrap();
    let err = result.unwrap_err();
    assert!(
        matches!(err, CoreError::Cancelled | CoreError::InvalidHandle(_)),
        "unexpected {err:?}"
    );
    assert!(elapsed < Duration::from_secs(4), "wait hung for {elapsed:?}");

    // The receiver's handle waits normally.
    let message = core.read_message(h1, ReadMessageFlags::empty()).unwrap();
    let [moved] = message.handles[..] else {
        panic!("expected one handle, got {:?}", message.handles);
    };
    core.write_message(c1, b"ping", &[], WriteMessageFlags::NONE)
        .unwrap();
    let state = core
        .wait(moved, HandleSignals::READABLE, Duration::from_secs(1))
        .unwrap();
    assert!(state.satisfies(HandleSignals::READABLE));
    assert_eq!(
        core.read_message(moved, ReadMessageFlags::empty())
            .unwrap()
            .bytes
            .as_ref(),
        b"ping"
    );
}

#[test]
fn restored_handles_accept_new_waits() {
    let core = Core::with_default_config();
    let (h0, h1) = core
        .create_message_pipe(&CreateMessagePipeOptions::default())
        .unwrap();
    let (hp, hc) = core
        .create_data_pipe(&CreateDataPipeOptions::default())
        .unwrap();
    core.close(h1).unwrap();

    let err = core
        .write_message(h0, b"", &[hp], WriteMessageFlags::NONE)
        .unwrap_err();
    assert_eq!(err, CoreError::PeerClosed);

    // The restored handle still drives the same pipe and can be waited on.
    core.write_data(hp, b"ok", WriteDataFlags::empty()).unwrap();
    core.wait(hc, HandleSignals::READABLE, Deadline::POLL).unwrap();
    core.wait(hp, HandleSignals::WRITABLE, Deadline::POLL).unwrap();
}

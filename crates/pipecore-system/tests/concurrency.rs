use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pipecore_system::{
    Core, CoreError, CreateDataPipeOptions, CreateMessagePipeOptions, Deadline, HandleSignals,
    ReadDataFlags, ReadMessageFlags, ResultCode, WriteDataFlags, WriteMessageFlags,
};

#[test]
fn waiter_is_woken_by_writer_thread() {
    let core = Arc::new(Core::with_default_config());
    let (h0, h1) = core
        .create_message_pipe(&CreateMessagePipeOptions::default())
        .unwrap();

    let writer = {
        let core = Arc::clone(&core);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            core.write_message(h1, b"wake", &[], WriteMessageFlags::NONE)
                .unwrap();
        })
    };

    let state = core
        .wait(h0, HandleSignals::READABLE, Deadline::INDEFINITE)
        .unwrap();
    assert!(state.satisfies(HandleSignals::READABLE));
    writer.join().unwrap();
}

#[test]
fn close_on_other_thread_fails_pending_wait() {
    let core = Arc::new(Core::with_default_config());
    let (h0, h1) = core
        .create_message_pipe(&CreateMessagePipeOptions::default())
        .unwrap();

    let closer = {
        let core = Arc::clone(&core);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            core.close(h1).unwrap();
        })
    };

    let start = Instant::now();
    let err = core
        .wait(h0, HandleSignals::READABLE, Duration::from_secs(10))
        .unwrap_err();
    assert_eq!(err, CoreError::Unsatisfiable);
    assert!(start.elapsed() < Duration::from_secs(5));
    closer.join().unwrap();
}

#[test]
fn wait_times_out() {
    let core = Core::with_default_config();
    let (h0, _h1) = core
        .create_message_pipe(&CreateMessagePipeOptions::default())
        .unwrap();

    let start = Instant::now();
    assert_eq!(
        core.wait(h0, HandleSignals::READABLE, Duration::from_millis(30)),
        Err(CoreError::DeadlineExceeded)
    );
    assert!(start.elapsed() >= Duration::from_millis(30));
}

#[test]
fn wait_many_reports_ready_index() {
    let core = Arc::new(Core::with_default_config());
    let (a0, _a1) = core
        .create_message_pipe(&CreateMessagePipeOptions::default())
        .unwrap();
    let (b0, b1) = core
        .create_message_pipe(&CreateMessagePipeOptions::default())
        .unwrap();
    let (_p, c) = core
        .create_data_pipe(&CreateDataPipeOptions::default())
        .unwrap();

    let writer = {
        let core = Arc::clone(&core);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            core.write_message(b1, b"second", &[], WriteMessageFlags::NONE)
                .unwrap();
        })
    };

    let index = core
        .wait_many(
            &[a0, b0, c],
            &[HandleSignals::READABLE; 3],
            Deadline::INDEFINITE,
        )
        .unwrap();
    assert_eq!(index, 1);
    writer.join().unwrap();

    // Already satisfied: resolves without blocking.
    assert_eq!(
        core.wait_many(&[a0, b0], &[HandleSignals::READABLE; 2], Deadline::POLL),
        Ok(1)
    );
}

#[test]
fn wait_many_failure_carries_index() {
    let core = Core::with_default_config();
    let (a0, _a1) = core
        .create_message_pipe(&CreateMessagePipeOptions::default())
        .unwrap();
    let (b0, b1) = core
        .create_message_pipe(&CreateMessagePipeOptions::default())
        .unwrap();
    core.close(b1).unwrap();

    let err = core
        .wait_many(
            &[a0, b0],
            &[HandleSignals::READABLE, HandleSignals::WRITABLE],
            Deadline::INDEFINITE,
        )
        .unwrap_err();
    assert_eq!(err.index, Some(1));
    assert_eq!(err.code(), ResultCode::FailedPrecondition);

    let err = core
        .wait_many(&[a0], &[HandleSignals::READABLE], 1000u64)
        .unwrap_err();
    assert_eq!(err.index, None);
    assert_eq!(err.code(), ResultCode::DeadlineExceeded);
}

#[test]
fn concurrent_writers_keep_per_writer_order() {
    const WRITERS: u8 = 4;
    const PER_WRITER: u32 = 200;

    let core = Arc::new(Core::with_default_config());
    let (h0, h1) = core
        .create_message_pipe(&CreateMessagePipeOptions::default())
        .unwrap();

    let writers: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let core = Arc::clone(&core);
            thread::spawn(move || {
                for seq in 0..PER_WRITER {
                    let mut payload = vec![writer];
                    payload.extend_from_slice(&seq.to_le_bytes());
                    core.write_message(h0, &payload, &[], WriteMessageFlags::NONE)
                        .unwrap();
                }
            })
        })
        .collect();

    let mut next = vec![0u32; usize::from(WRITERS)];
    let mut received = 0;
    while received < u32::from(WRITERS) * PER_WRITER {
        match core.read_message(h1, ReadMessageFlags::empty()) {
            Ok(message) => {
                let writer = usize::from(message.bytes[0]);
                let seq = u32::from_le_bytes([
                    message.bytes[1],
                    message.bytes[2],
                    message.bytes[3],
                    message.bytes[4],
                ]);
                assert_eq!(seq, next[writer], "writer {writer} out of order");
                next[writer] += 1;
                received += 1;
            }
            Err(CoreError::ShouldWait(_)) => {
                core.wait(h1, HandleSignals::READABLE, Deadline::INDEFINITE)
                    .unwrap();
            }
            Err(err) => panic!("unexpected read error: {err}"),
        }
    }

    for writer in writers {
        writer.join().unwrap();
    }
}

#[test]
fn data_pipe_streams_across_threads() {
    const TOTAL: usize = 256 * 1024;

    let core = Arc::new(Core::with_default_config());
    let (hp, hc) = core
        .create_data_pipe(&CreateDataPipeOptions {
            element_num_bytes: 1,
            capacity_num_bytes: Some(4096),
        })
        .unwrap();

    let producer = {
        let core = Arc::clone(&core);
        thread::spawn(move || {
            let data: Vec<u8> = (0..TOTAL).map(|i| (i % 251) as u8).collect();
            let mut offset = 0;
            while offset < data.len() {
                match core.write_data(hp, &data[offset..], WriteDataFlags::empty()) {
                    Ok(written) => offset += written,
                    Err(CoreError::ShouldWait(_)) => {
                        core.wait(hp, HandleSignals::WRITABLE, Deadline::INDEFINITE)
                            .unwrap();
                    }
                    Err(err) => panic!("unexpected write error: {err}"),
                }
            }
            core.close(hp).unwrap();
        })
    };

    let mut received = Vec::with_capacity(TOTAL);
    loop {
        match core.read_data(hc, ReadDataFlags::empty()) {
            Ok(chunk) => received.extend_from_slice(&chunk),
            Err(CoreError::ShouldWait(_)) => {
                let _ = core.wait(hc, HandleSignals::READABLE, Deadline::INDEFINITE);
            }
            Err(CoreError::PeerClosed) => break,
            Err(err) => panic!("unexpected read error: {err}"),
        }
    }
    producer.join().unwrap();

    assert_eq!(received.len(), TOTAL);
    assert!(received
        .iter()
        .enumerate()
        .all(|(i, &byte)| byte == (i % 251) as u8));
}

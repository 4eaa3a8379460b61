//! Copy bytes from one data pipe into another through a relay thread.
//!
//! The relay blocks on both pipes with `wait_many` and forwards each chunk,
//! so a small downstream capacity throttles the upstream writer.
//!
//! Run with:
//!   cargo run --example stream-copy

use std::thread;
use std::time::Duration;

use pipecore::system::{
    core, CoreError, CreateDataPipeOptions, Deadline, Handle, HandleSignals, ReadDataFlags,
    WriteDataFlags,
};

const TOTAL: usize = 64 * 1024;
const CHUNK: usize = 4096;

fn write_all(producer: Handle, mut data: &[u8]) -> Result<(), CoreError> {
    let core = core();
    while !data.is_empty() {
        match core.write_data(producer, data, WriteDataFlags::empty()) {
            Ok(n) => data = &data[n..],
            Err(CoreError::ShouldWait(_)) => {
                core.wait(producer, HandleSignals::WRITABLE, Deadline::INDEFINITE)?;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Move bytes from `upstream` to `downstream` until `upstream` is drained
/// and closed, or the reader of `downstream` goes away. Closes both handles.
fn relay(upstream: Handle, downstream: Handle) -> Result<usize, CoreError> {
    let core = core();
    let mut moved = 0;
    loop {
        let ready = core.wait_many(
            &[upstream, downstream],
            &[HandleSignals::READABLE, HandleSignals::PEER_CLOSED],
            Deadline::INDEFINITE,
        );
        match ready {
            Ok(0) => {}
            // Nobody is reading any more.
            Ok(_) => break,
            // Upstream closed with nothing buffered.
            Err(e) if e.index == Some(0) && matches!(e.source, CoreError::Unsatisfiable) => break,
            Err(e) => return Err(e.source),
        }

        match core.read_data_up_to(upstream, CHUNK, ReadDataFlags::empty()) {
            Ok(chunk) => {
                write_all(downstream, &chunk)?;
                moved += chunk.len();
            }
            Err(CoreError::ShouldWait(_)) => {}
            Err(CoreError::PeerClosed) => break,
            Err(e) => return Err(e),
        }
    }
    core.close(upstream)?;
    core.close(downstream)?;
    Ok(moved)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let core = core();
    let (source, upstream) = core.create_data_pipe(&CreateDataPipeOptions::default())?;
    let (downstream, sink) = core.create_data_pipe(&CreateDataPipeOptions {
        element_num_bytes: 1,
        capacity_num_bytes: Some(1024),
    })?;

    let relay = thread::spawn(move || relay(upstream, downstream));
    let writer = thread::spawn(move || -> Result<(), CoreError> {
        let data: Vec<u8> = (0..TOTAL).map(|i| (i % 251) as u8).collect();
        write_all(source, &data)?;
        core.close(source)
    });

    let mut received = Vec::with_capacity(TOTAL);
    loop {
        match core.read_data(sink, ReadDataFlags::empty()) {
            Ok(chunk) => received.extend_from_slice(&chunk),
            Err(CoreError::ShouldWait(_)) => {
                match core.wait(sink, HandleSignals::READABLE, Duration::from_secs(5)) {
                    Ok(_) | Err(CoreError::Unsatisfiable) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Err(CoreError::PeerClosed) => break,
            Err(e) => return Err(e.into()),
        }
    }
    core.close(sink)?;

    writer.join().map_err(|_| "writer panicked")??;
    let moved = relay.join().map_err(|_| "relay panicked")??;
    let intact = received.iter().enumerate().all(|(i, b)| *b == (i % 251) as u8);
    eprintln!("relayed {moved} bytes, received {}, intact: {intact}", received.len());
    Ok(())
}

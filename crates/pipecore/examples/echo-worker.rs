//! Hand one end of a message pipe to a worker thread and echo through it.
//!
//! The worker receives its endpoint as a handle attached to a bootstrap
//! message, so the main thread never shares the raw handle value.
//!
//! Run with:
//!   cargo run --example echo-worker

use std::thread;
use std::time::Duration;

use pipecore::system::{
    core, CoreError, CreateMessagePipeOptions, Deadline, HandleSignals, ReadMessageFlags,
    WriteMessageFlags,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let core = core();
    let options = CreateMessagePipeOptions::default();
    let (bootstrap_local, bootstrap_remote) = core.create_message_pipe(&options)?;
    let (client, served) = core.create_message_pipe(&options)?;

    let worker = thread::spawn(move || -> Result<u32, CoreError> {
        core.wait(bootstrap_remote, HandleSignals::READABLE, Deadline::INDEFINITE)?;
        let hello = core.read_message(bootstrap_remote, ReadMessageFlags::empty())?;
        core.close(bootstrap_remote)?;
        let Some(&endpoint) = hello.handles.first() else {
            return Err(CoreError::InvalidArgument("bootstrap carried no handle".into()));
        };
        eprintln!("worker received endpoint {endpoint}");

        let mut echoed = 0;
        loop {
            match core.wait(endpoint, HandleSignals::READABLE, Deadline::INDEFINITE) {
                Ok(_) => {}
                Err(CoreError::Unsatisfiable) => break,
                Err(e) => return Err(e),
            }
            let message = core.read_message(endpoint, ReadMessageFlags::empty())?;
            core.write_message(endpoint, &message.bytes, &[], WriteMessageFlags::NONE)?;
            echoed += 1;
        }
        core.close(endpoint)?;
        Ok(echoed)
    });

    // `served` is invalid in this thread once the write succeeds.
    core.write_message(bootstrap_local, b"serve", &[served], WriteMessageFlags::NONE)?;
    core.close(bootstrap_local)?;

    for word in ["alpha", "beta", "gamma"] {
        core.write_message(client, word.as_bytes(), &[], WriteMessageFlags::NONE)?;
        core.wait(client, HandleSignals::READABLE, Duration::from_secs(5))?;
        let reply = core.read_message(client, ReadMessageFlags::empty())?;
        eprintln!("echo: {}", String::from_utf8_lossy(&reply.bytes));
    }

    core.close(client)?;
    let echoed = worker.join().map_err(|_| "worker panicked")??;
    eprintln!("worker echoed {echoed} messages");
    Ok(())
}

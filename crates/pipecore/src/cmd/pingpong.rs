use std::sync::Arc;
use std::thread;

use pipecore::system::{
    Core, CoreConfig, CoreError, CreateMessagePipeOptions, Deadline, Handle, HandleSignals,
    ReadMessageFlags, WriteMessageFlags,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::cmd::{parse_duration, PingpongArgs};
use crate::exit::{core_error, io_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS};
use crate::output::{format_micros, print_report, OutputFormat};

#[derive(Debug, Serialize)]
struct PingpongOutput {
    round_trips: u64,
    payload_bytes: usize,
    min_us: u64,
    p50_us: u64,
    p99_us: u64,
    max_us: u64,
    mean_us: f64,
}

pub fn run(args: PingpongArgs, format: OutputFormat, config: CoreConfig) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let core = Arc::new(Core::new(config).map_err(|err| core_error("create core", err))?);
    let (local, remote) = core
        .create_message_pipe(&CreateMessagePipeOptions::default())
        .map_err(|err| core_error("create message pipe", err))?;

    let echo = {
        let core = Arc::clone(&core);
        thread::Builder::new()
            .name("pingpong-echo".to_string())
            .spawn(move || echo_until_closed(&core, remote))
            .map_err(|err| io_error("spawn echo thread", err))?
    };

    let payload = vec![0xA5u8; args.size];
    let mut latencies = Vec::with_capacity(args.count as usize);
    let outcome = (0..args.count).try_for_each(|_| {
        let start = core.time_ticks_now();
        core.write_message(local, &payload, &[], WriteMessageFlags::NONE)
            .map_err(|err| core_error("send ping", err))?;
        core.wait(local, HandleSignals::READABLE, timeout)
            .map_err(|err| core_error("wait for pong", err))?;
        let pong = core
            .read_message(local, ReadMessageFlags::empty())
            .map_err(|err| core_error("read pong", err))?;
        if pong.bytes != payload[..] {
            return Err(CliError::new(FAILURE, "echoed payload does not match"));
        }
        latencies.push(core.time_ticks_now().saturating_sub(start));
        Ok(())
    });

    // Closing our end stops the echo thread whatever happened above.
    let _ = core.close(local);
    let echoed = echo
        .join()
        .map_err(|_| CliError::new(INTERNAL, "echo thread panicked"))?
        .map_err(|err| core_error("echo", err))?;
    outcome?;
    debug!(echoed, "echo thread finished");

    let output = summarize(&latencies, args.size);
    info!(
        round_trips = output.round_trips,
        p50_us = output.p50_us,
        "pingpong complete"
    );

    let rows = [
        ("round trips", output.round_trips.to_string()),
        ("payload", format!("{} bytes", output.payload_bytes)),
        ("min", format_micros(output.min_us as f64)),
        ("p50", format_micros(output.p50_us as f64)),
        ("p99", format_micros(output.p99_us as f64)),
        ("max", format_micros(output.max_us as f64)),
        ("mean", format_micros(output.mean_us)),
    ];
    print_report(
        &output,
        "pipecore pingpong",
        &rows,
        &output.p50_us.to_string(),
        format,
    );
    Ok(SUCCESS)
}

/// Echo every message back until the other end closes. Returns how many
/// messages were echoed.
fn echo_until_closed(core: &Core, handle: Handle) -> Result<u64, CoreError> {
    let mut echoed = 0;
    let result = loop {
        match core.read_message(handle, ReadMessageFlags::empty()) {
            Ok(message) => {
                match core.write_message(handle, &message.bytes, &[], WriteMessageFlags::NONE) {
                    Ok(()) => echoed += 1,
                    Err(CoreError::PeerClosed) => break Ok(echoed),
                    Err(err) => break Err(err),
                }
            }
            Err(CoreError::ShouldWait(_)) => {
                match core.wait(handle, HandleSignals::READABLE, Deadline::INDEFINITE) {
                    Ok(_) => {}
                    // Peer closed with nothing left to read.
                    Err(CoreError::Unsatisfiable) => break Ok(echoed),
                    Err(err) => break Err(err),
                }
            }
            Err(CoreError::PeerClosed) => break Ok(echoed),
            Err(err) => break Err(err),
        }
    };
    let _ = core.close(handle);
    result
}

fn summarize(latencies: &[u64], payload_bytes: usize) -> PingpongOutput {
    let mut sorted = latencies.to_vec();
    sorted.sort_unstable();
    let percentile = |p: usize| {
        if sorted.is_empty() {
            0
        } else {
            sorted[((sorted.len() - 1) * p) / 100]
        }
    };
    let mean_us = if sorted.is_empty() {
        0.0
    } else {
        sorted.iter().sum::<u64>() as f64 / sorted.len() as f64
    };

    PingpongOutput {
        round_trips: sorted.len() as u64,
        payload_bytes,
        min_us: sorted.first().copied().unwrap_or_default(),
        p50_us: percentile(50),
        p99_us: percentile(99),
        max_us: sorted.last().copied().unwrap_or_default(),
        mean_us,
    }
}

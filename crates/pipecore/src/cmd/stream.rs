use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pipecore::system::{
    Core, CoreConfig, CoreError, CreateDataPipeOptions, Handle, HandleSignals, ReadDataFlags,
    WriteDataFlags,
};
use serde::Serialize;
use tracing::info;

use crate::cmd::{parse_duration, StreamArgs};
use crate::exit::{core_error, io_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS};
use crate::output::{format_micros, print_report, OutputFormat};

#[derive(Debug, Serialize)]
struct StreamOutput {
    bytes: u64,
    capacity: usize,
    chunk: u64,
    elapsed_us: u64,
    mib_per_sec: f64,
    checksum: u32,
}

pub fn run(args: StreamArgs, format: OutputFormat, config: CoreConfig) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let capacity = args
        .capacity
        .unwrap_or(config.default_data_pipe_capacity_bytes);
    let core = Arc::new(Core::new(config).map_err(|err| core_error("create core", err))?);
    let (producer, consumer) = core
        .create_data_pipe(&CreateDataPipeOptions {
            element_num_bytes: 1,
            capacity_num_bytes: Some(capacity),
        })
        .map_err(|err| core_error("create data pipe", err))?;

    let start = core.time_ticks_now();
    let writer = {
        let core = Arc::clone(&core);
        let (total, chunk) = (args.bytes, args.chunk as usize);
        thread::Builder::new()
            .name("stream-producer".to_string())
            .spawn(move || produce(&core, producer, total, chunk, timeout))
            .map_err(|err| io_error("spawn producer thread", err))?
    };

    let consumed = consume(&core, consumer, timeout);
    let _ = core.close(consumer);
    let sent_checksum = writer
        .join()
        .map_err(|_| CliError::new(INTERNAL, "producer thread panicked"))?
        .map_err(|err| core_error("produce", err))?;
    let (received, checksum) = consumed.map_err(|err| core_error("consume", err))?;
    let elapsed_us = core.time_ticks_now().saturating_sub(start).max(1);

    if received != args.bytes || checksum != sent_checksum {
        return Err(CliError::new(
            FAILURE,
            format!(
                "stream mismatch: sent {} bytes (checksum {sent_checksum:#010x}), received {received} (checksum {checksum:#010x})",
                args.bytes
            ),
        ));
    }

    let output = StreamOutput {
        bytes: received,
        capacity,
        chunk: args.chunk,
        elapsed_us,
        mib_per_sec: (received as f64 / (1024.0 * 1024.0)) / (elapsed_us as f64 / 1_000_000.0),
        checksum,
    };
    info!(
        bytes = output.bytes,
        mib_per_sec = output.mib_per_sec,
        "stream complete"
    );

    let rows = [
        ("bytes", output.bytes.to_string()),
        ("capacity", output.capacity.to_string()),
        ("chunk", output.chunk.to_string()),
        ("elapsed", format_micros(output.elapsed_us as f64)),
        ("throughput", format!("{:.1} MiB/s", output.mib_per_sec)),
        ("checksum", format!("{:#010x}", output.checksum)),
    ];
    print_report(
        &output,
        "pipecore stream",
        &rows,
        &format!("{:.1}", output.mib_per_sec),
        format,
    );
    Ok(SUCCESS)
}

/// Write `total` bytes of a repeating pattern, then close the producer.
/// Returns the checksum of everything written.
fn produce(
    core: &Core,
    producer: Handle,
    total: u64,
    chunk: usize,
    timeout: Duration,
) -> Result<u32, CoreError> {
    let pattern: Vec<u8> = (0..=u8::MAX).cycle().take(chunk.max(1)).collect();
    let mut checksum = crc32fast::Hasher::new();
    let mut remaining = total;

    let result = loop {
        if remaining == 0 {
            break Ok(());
        }
        let len = pattern.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        match core.write_data(producer, &pattern[..len], WriteDataFlags::empty()) {
            Ok(written) => {
                checksum.update(&pattern[..written]);
                remaining -= written as u64;
            }
            Err(CoreError::ShouldWait(_)) => {
                if let Err(err) = core.wait(producer, HandleSignals::WRITABLE, timeout) {
                    break Err(err);
                }
            }
            Err(err) => break Err(err),
        }
    };
    let _ = core.close(producer);
    result.map(|()| checksum.finalize())
}

/// Read until the producer closes. Returns the byte count and checksum.
fn consume(core: &Core, consumer: Handle, timeout: Duration) -> Result<(u64, u32), CoreError> {
    let mut checksum = crc32fast::Hasher::new();
    let mut received = 0u64;
    loop {
        match core.read_data(consumer, ReadDataFlags::empty()) {
            Ok(data) => {
                checksum.update(&data);
                received += data.len() as u64;
            }
            Err(CoreError::ShouldWait(_)) => {
                match core.wait(consumer, HandleSignals::READABLE, timeout) {
                    Ok(_) | Err(CoreError::Unsatisfiable) => {}
                    Err(err) => return Err(err),
                }
            }
            Err(CoreError::PeerClosed) => return Ok((received, checksum.finalize())),
            Err(err) => return Err(err),
        }
    }
}

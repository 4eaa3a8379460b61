use serde::Serialize;

use crate::cmd::{parse_duration, TicksArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_report, OutputFormat};

#[derive(Debug, Serialize)]
struct TicksOutput {
    samples: Vec<u64>,
    monotonic: bool,
}

pub fn run(args: TicksArgs, format: OutputFormat) -> CliResult<i32> {
    let interval = parse_duration(&args.interval)?;

    let mut samples = Vec::with_capacity(args.samples as usize);
    for i in 0..args.samples {
        if i > 0 {
            std::thread::sleep(interval);
        }
        samples.push(pipecore::sync::time_ticks_now());
    }

    let output = TicksOutput {
        monotonic: samples.windows(2).all(|pair| pair[0] < pair[1]),
        samples,
    };

    let rows: Vec<(&str, String)> = output
        .samples
        .iter()
        .map(|ticks| ("ticks", ticks.to_string()))
        .chain(std::iter::once(("monotonic", output.monotonic.to_string())))
        .collect();
    let last = output.samples.last().copied().unwrap_or_default();
    print_report(&output, "pipecore ticks", &rows, &last.to_string(), format);

    Ok(SUCCESS)
}

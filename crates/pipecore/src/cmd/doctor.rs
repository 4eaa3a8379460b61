use std::time::Duration;

use pipecore::system::{
    Core, CoreConfig, CoreError, CreateDataPipeOptions, CreateMessagePipeOptions, Deadline,
    Handle, HandleSignals, ReadDataFlags, ReadMessageFlags, ResultCode, WriteDataFlags,
    WriteMessageFlags,
};
use serde::Serialize;

use crate::cmd::DoctorArgs;
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::{to_json, OutputFormat};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Info,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: &'static str,
    status: CheckStatus,
    detail: String,
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    checks: Vec<CheckResult>,
    overall: &'static str,
}

type CheckOutcome = Result<String, String>;

pub fn run(_args: DoctorArgs, format: OutputFormat, config: CoreConfig) -> CliResult<i32> {
    let mut checks = vec![config_check(&config)];

    match Core::new(config) {
        Ok(core) => {
            checks.push(check("clock", clock_check(&core)));
            checks.push(check("message_pipe", message_pipe_check(&core)));
            checks.push(check("data_pipe", data_pipe_check(&core)));
            checks.push(check("wait_many", wait_many_check(&core)));
            checks.push(check("handle_reuse", handle_reuse_check(&core)));
            checks.push(check("leaks", leak_check(&core)));
        }
        Err(err) => checks.push(check("core", Err(err.to_string()))),
    }

    let has_fail = checks.iter().any(|c| c.status == CheckStatus::Fail);
    let output = DoctorOutput {
        checks,
        overall: if has_fail { "fail" } else { "pass" },
    };
    print_doctor(&output, format);

    Ok(if has_fail { HEALTH_CHECK_FAILED } else { SUCCESS })
}

fn check(name: &'static str, outcome: CheckOutcome) -> CheckResult {
    let (status, detail) = match outcome {
        Ok(detail) => (CheckStatus::Pass, detail),
        Err(detail) => (CheckStatus::Fail, detail),
    };
    CheckResult {
        name,
        status,
        detail,
    }
}

fn config_check(config: &CoreConfig) -> CheckResult {
    CheckResult {
        name: "config",
        status: CheckStatus::Info,
        detail: format!(
            "max_handles={} default_data_pipe_capacity={}",
            config.max_handle_table_size, config.default_data_pipe_capacity_bytes
        ),
    }
}

/// Turn a core error into a check failure naming the step.
fn step<T>(what: &str, result: Result<T, CoreError>) -> Result<T, String> {
    result.map_err(|err| format!("{what}: {err}"))
}

fn expect_code<T>(what: &str, result: Result<T, CoreError>, code: ResultCode) -> Result<(), String> {
    match result {
        Err(err) if err.code() == code => Ok(()),
        Err(err) => Err(format!("{what}: expected {code}, got {}", err.code())),
        Ok(_) => Err(format!("{what}: expected {code}, got OK")),
    }
}

/// Close whatever a check left open; handles it already closed are skipped.
fn release(core: &Core, handles: &[Handle]) {
    for &handle in handles {
        let _ = core.close(handle);
    }
}

fn clock_check(core: &Core) -> CheckOutcome {
    let first = core.time_ticks_now();
    std::thread::sleep(Duration::from_millis(1));
    let second = core.time_ticks_now();
    if first <= 10 {
        return Err(format!("ticks {first} too small after start"));
    }
    if second <= first {
        return Err(format!("ticks went from {first} to {second}"));
    }
    Ok(format!("advanced {}us over 1ms", second - first))
}

fn message_pipe_check(core: &Core) -> CheckOutcome {
    let (h0, h1) = step(
        "create",
        core.create_message_pipe(&CreateMessagePipeOptions::default()),
    )?;

    let result = (|| {
        expect_code(
            "poll empty endpoint",
            core.wait(h0, HandleSignals::READABLE, Deadline::POLL),
            ResultCode::DeadlineExceeded,
        )?;
        step(
            "write",
            core.write_message(h1, b"hello", &[], WriteMessageFlags::NONE),
        )?;
        step(
            "wait readable",
            core.wait(h0, HandleSignals::READABLE, Deadline::INDEFINITE),
        )?;
        let message = step("read", core.read_message(h0, ReadMessageFlags::empty()))?;
        if message.bytes != "hello" {
            return Err(format!("read returned {:?}", message.bytes));
        }
        step("close", core.close(h0))?;
        expect_code(
            "wait after peer close",
            core.wait(
                h1,
                HandleSignals::READABLE | HandleSignals::WRITABLE,
                Duration::from_micros(100),
            ),
            ResultCode::FailedPrecondition,
        )?;
        step("close peer", core.close(h1))?;
        Ok("round trip and peer-closed propagation".to_string())
    })();

    release(core, &[h0, h1]);
    result
}

fn data_pipe_check(core: &Core) -> CheckOutcome {
    let (hp, hc) = step(
        "create",
        core.create_data_pipe(&CreateDataPipeOptions::default()),
    )?;

    let result = (|| {
        let written = step(
            "write",
            core.write_data(hp, b"hello", WriteDataFlags::empty()),
        )?;
        if written != 5 {
            return Err(format!("wrote {written} of 5 bytes"));
        }
        step(
            "wait readable",
            core.wait(hc, HandleSignals::READABLE, Duration::from_millis(1)),
        )?;
        let data = step("read", core.read_data(hc, ReadDataFlags::empty()))?;
        if data != "hello" {
            return Err(format!("read returned {data:?}"));
        }
        step("close producer", core.close(hp))?;
        expect_code(
            "wait after producer close",
            core.wait(hc, HandleSignals::READABLE, Duration::from_micros(100)),
            ResultCode::FailedPrecondition,
        )?;
        step("close consumer", core.close(hc))?;
        Ok("stream and producer-closed propagation".to_string())
    })();

    release(core, &[hp, hc]);
    result
}

fn wait_many_check(core: &Core) -> CheckOutcome {
    let options = CreateMessagePipeOptions::default();
    let (a0, a1) = step("create", core.create_message_pipe(&options))?;
    let (b0, b1) = step("create", core.create_message_pipe(&options))?;
    let handles = [a0, b0];
    let signals = [HandleSignals::READABLE; 2];

    let result = (|| {
        step(
            "write",
            core.write_message(b1, b"x", &[], WriteMessageFlags::NONE),
        )?;
        let index = core
            .wait_many(&handles, &signals, Deadline::POLL)
            .map_err(|err| format!("wait_many: {err}"))?;
        if index != 1 {
            return Err(format!("wait_many woke on #{index}, expected #1"));
        }
        step("close", core.close(a1))?;
        match core.wait_many(&handles[..1], &signals[..1], Deadline::POLL) {
            Err(err) if err.index == Some(0) && err.source.code() == ResultCode::FailedPrecondition => {
                Ok("first ready handle wins and failures carry their index".to_string())
            }
            Err(err) => Err(format!("wait_many after peer close: {err}")),
            Ok(index) => Err(format!("wait_many after peer close woke on #{index}")),
        }
    })();

    release(core, &[a0, a1, b0, b1]);
    result
}

fn handle_reuse_check(core: &Core) -> CheckOutcome {
    let (a, b) = step(
        "create",
        core.create_message_pipe(&CreateMessagePipeOptions::default()),
    )?;
    step("close", core.close(a))?;
    step("close", core.close(b))?;
    expect_code("double close", core.close(a), ResultCode::InvalidArgument)?;

    let (c, d) = step(
        "recreate",
        core.create_message_pipe(&CreateMessagePipeOptions::default()),
    )?;
    let reused = [c, d].iter().any(|h| *h == a || *h == b);
    step("close", core.close(c))?;
    step("close", core.close(d))?;
    if reused {
        return Err("closed handle value was handed out again".to_string());
    }
    Ok("closed handles stay invalid".to_string())
}

fn leak_check(core: &Core) -> CheckOutcome {
    match core.handle_count() {
        0 => Ok("no handles left open".to_string()),
        n => Err(format!("{n} handles left open")),
    }
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", to_json(output)),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("pipecore doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<14} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => println!("{}", output.overall),
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Info => "INFO",
    }
}

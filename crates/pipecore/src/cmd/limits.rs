use pipecore::system::CoreConfig;

use crate::cmd::LimitsArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_report, OutputFormat};

pub fn run(_args: LimitsArgs, format: OutputFormat, config: CoreConfig) -> CliResult<i32> {
    let rows = [
        ("max_handle_table_size", config.max_handle_table_size),
        ("max_wait_many_num_handles", config.max_wait_many_num_handles),
        ("max_message_num_bytes", config.max_message_num_bytes),
        ("max_message_num_handles", config.max_message_num_handles),
        (
            "max_data_pipe_capacity_bytes",
            config.max_data_pipe_capacity_bytes,
        ),
        (
            "default_data_pipe_capacity_bytes",
            config.default_data_pipe_capacity_bytes,
        ),
    ]
    .map(|(label, value)| (label, value.to_string()));

    print_report(
        &config,
        "pipecore limits",
        &rows,
        &config.max_handle_table_size.to_string(),
        format,
    );
    Ok(SUCCESS)
}

use crate::cli::StatusFilter;
use crate::commands::common::{format_change_lines, format_status_lines, open_engine, Context};
use crate::error::CliError;

pub async fn run_queue(
    context: &Context,
    status: Option<StatusFilter>,
    as_json: bool,
) -> Result<(), CliError> {
    let engine = open_engine(context, false)?;
    let changes = engine.list(status.map(Into::into)).await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&changes)?);
    } else if changes.is_empty() {
        println!("Queue is empty");
    } else {
        for line in format_change_lines(&changes) {
            println!("{line}");
        }
    }

    Ok(())
}

pub async fn run_status(context: &Context, as_json: bool) -> Result<(), CliError> {
    let engine = open_engine(context, false)?;
    let metadata = engine.refresh_status().await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&metadata)?);
    } else {
        for line in format_status_lines(&metadata) {
            println!("{line}");
        }
    }

    Ok(())
}

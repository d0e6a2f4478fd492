use std::fmt::Write;

use floorsync_core::SyncRun;

use crate::commands::common::{open_engine, Context};
use crate::error::CliError;

pub async fn run_sync(context: &Context) -> Result<(), CliError> {
    let engine = open_engine(context, true)?;
    let run = engine.force_sync().await?;
    println!("{}", describe_run(&run));
    Ok(())
}

pub async fn run_retry(context: &Context) -> Result<(), CliError> {
    let engine = open_engine(context, true)?;
    let run = engine.retry_failed().await?;
    println!("{}", describe_run(&run));
    Ok(())
}

pub fn describe_run(run: &SyncRun) -> String {
    match run {
        SyncRun::Completed(report) => {
            let mut summary = format!(
                "Sync completed: {} synced, {} failed, {} conflicts",
                report.synced, report.failed, report.conflicts
            );
            if report.retried > 0 {
                let _ = write!(summary, ", {} will retry", report.retried);
            }
            if report.aborted {
                summary.push_str(" (connection lost, remaining changes kept)");
            }
            summary
        }
        SyncRun::Idle => "Nothing to sync".to_string(),
        SyncRun::AlreadySyncing => "A sync is already running".to_string(),
        SyncRun::Offline => "Offline; changes stay queued".to_string(),
    }
}

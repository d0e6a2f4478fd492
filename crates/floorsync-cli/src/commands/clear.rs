use crate::cli::ClearTarget;
use crate::commands::common::{open_engine, Context};
use crate::error::CliError;

pub async fn run_clear(context: &Context, target: ClearTarget) -> Result<(), CliError> {
    let engine = open_engine(context, false)?;
    let removed = match target {
        ClearTarget::Failed => engine.clear_failed().await?,
        ClearTarget::Conflicts => engine.clear_conflicts().await?,
        ClearTarget::All => engine.clear_all().await?,
    };

    println!("Removed {removed} change(s)");
    Ok(())
}

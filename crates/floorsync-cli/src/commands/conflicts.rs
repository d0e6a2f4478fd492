use floorsync_core::{ChangeStatus, ConflictDecision, ResolutionStrategy, ResolveOutcome};

use crate::cli::StrategyArg;
use crate::commands::common::{
    format_conflict_lines, format_history_lines, open_engine, resolve_change_id, Context,
};
use crate::error::CliError;

pub async fn run_conflicts(context: &Context, as_json: bool) -> Result<(), CliError> {
    let engine = open_engine(context, false)?;
    let items = engine.conflict_items().await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if items.is_empty() {
        println!("No conflicts");
    } else {
        for line in format_conflict_lines(&items) {
            println!("{line}");
        }
    }

    Ok(())
}

pub async fn run_resolve(
    context: &Context,
    ids: &[String],
    all: bool,
    strategy: StrategyArg,
) -> Result<(), CliError> {
    let strategy = ResolutionStrategy::from(strategy);
    let engine = open_engine(context, false)?;
    let conflicted = engine.list(Some(ChangeStatus::Conflict)).await;

    let decision = if all {
        conflicted
            .iter()
            .map(|change| (change.id.to_string(), strategy))
            .collect::<ConflictDecision>()
    } else {
        if ids.is_empty() {
            return Err(CliError::NothingToResolve);
        }
        let mut decision = ConflictDecision::new();
        for query in ids {
            let id = resolve_change_id(query, &conflicted)?;
            decision.insert(id.to_string(), strategy);
        }
        decision
    };

    if decision.is_empty() {
        println!("No conflicts");
        return Ok(());
    }

    let outcome = engine.resolve_conflicts(decision).await?;
    println!("{}", describe_outcome(&outcome));
    Ok(())
}

pub async fn run_auto_resolve(context: &Context, fallback: StrategyArg) -> Result<(), CliError> {
    let engine = open_engine(context, false)?;
    let outcome = engine.auto_resolve(fallback.into()).await?;
    println!("{}", describe_outcome(&outcome));
    Ok(())
}

pub async fn run_history(context: &Context, limit: usize, as_json: bool) -> Result<(), CliError> {
    let engine = open_engine(context, false)?;
    let mut entries = engine.conflict_history().await;
    entries.reverse();
    entries.truncate(limit);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if entries.is_empty() {
        println!("No resolutions recorded");
    } else {
        for line in format_history_lines(&entries) {
            println!("{line}");
        }
    }

    Ok(())
}

pub fn describe_outcome(outcome: &ResolveOutcome) -> String {
    if outcome.resolved == 0 {
        return "No conflicts resolved".to_string();
    }
    format!(
        "Resolved {} conflict(s): {} settled, {} queued for sync",
        outcome.resolved, outcome.finished, outcome.requeued
    )
}

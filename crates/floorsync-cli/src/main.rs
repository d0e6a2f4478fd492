//! floorsync CLI - queue and sync shop-floor changes from the terminal

mod cli;
mod commands;
mod error;


use clap::Parser;

use crate::cli::{CacheCommands, Cli, Commands};
use crate::commands::cache::{run_cache_get, run_cache_purge, run_cache_set};
use crate::commands::clear::run_clear;
use crate::commands::common::Context;
use crate::commands::completions::run_completions;
use crate::commands::conflicts::{run_auto_resolve, run_conflicts, run_history, run_resolve};
use crate::commands::enqueue::run_enqueue;
use crate::commands::queue::{run_queue, run_status};
use crate::commands::sync::{run_retry, run_sync};
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "floorsync=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let context = Context::from_cli(&cli)?;

    match cli.command {
        Commands::Enqueue {
            kind,
            entity,
            id,
            data,
        } => {
            run_enqueue(&context, kind, &entity, id.as_deref(), data.as_deref()).await?;
        }
        Commands::Queue { status, json } => run_queue(&context, status, json).await?,
        Commands::Status { json } => run_status(&context, json).await?,
        Commands::Sync => run_sync(&context).await?,
        Commands::Retry => run_retry(&context).await?,
        Commands::Watch { strategy } => run_watch(&context, strategy).await?,
        Commands::Conflicts { json } => run_conflicts(&context, json).await?,
        Commands::Resolve { ids, all, strategy } => {
            run_resolve(&context, &ids, all, strategy).await?;
        }
        Commands::AutoResolve { fallback } => run_auto_resolve(&context, fallback).await?,
        Commands::History { limit, json } => run_history(&context, limit, json).await?,
        Commands::Clear { target } => run_clear(&context, target).await?,
        Commands::Cache { command } => match command {
            CacheCommands::Get { key } => run_cache_get(&context, &key)?,
            CacheCommands::Set { key, value, ttl_ms } => {
                run_cache_set(&context, &key, &value, ttl_ms)?;
            }
            CacheCommands::Purge { all } => run_cache_purge(&context, all)?,
        },
        Commands::Completions { .. } => {}
    }

    Ok(())
}

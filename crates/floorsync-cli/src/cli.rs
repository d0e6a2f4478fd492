use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use floorsync_core::{ChangeStatus, ChangeType, ResolutionStrategy};

#[derive(Parser)]
#[command(name = "floorsync")]
#[command(about = "Queue shop-floor changes offline and sync them when the plant server is reachable")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the local queue store
    #[arg(long, global = true, value_name = "PATH")]
    pub store: Option<PathBuf>,

    /// Path to the settings JSON file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Plant server base URL (overrides settings)
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<String>,

    /// Treat the server as unreachable
    #[arg(long, global = true)]
    pub offline: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue a local change
    #[command(alias = "add")]
    Enqueue {
        /// Change type
        #[arg(value_enum)]
        kind: ChangeKind,
        /// Entity type, e.g. machine_status or oee_data
        entity: String,
        /// Target record id (defaults to the payload's `id`)
        #[arg(long, value_name = "ID")]
        id: Option<String>,
        /// JSON object payload; read from stdin when omitted and piped
        #[arg(long, value_name = "JSON")]
        data: Option<String>,
    },
    /// List queued changes
    #[command(alias = "ls")]
    Queue {
        /// Only show changes with this status
        #[arg(long, value_enum)]
        status: Option<StatusFilter>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show queue counts and the last sync
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drain pending changes to the server
    Sync,
    /// Give failed changes a fresh retry budget and drain
    Retry,
    /// Stay running: drain on reconnect and on a timer, answer conflicts
    Watch {
        /// Settle incoming conflicts with this strategy (left queued when omitted)
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,
    },
    /// Show outstanding conflicts
    Conflicts {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve conflicts with a strategy
    Resolve {
        /// Change ids (or unique prefixes) to resolve
        ids: Vec<String>,
        /// Resolve every outstanding conflict
        #[arg(long, conflicts_with = "ids")]
        all: bool,
        /// Strategy to apply
        #[arg(long, value_enum)]
        strategy: StrategyArg,
    },
    /// Resolve conflicts by replaying past decisions
    AutoResolve {
        /// Strategy for entities with no past decision
        #[arg(long, value_enum, default_value_t = StrategyArg::KeepServer)]
        fallback: StrategyArg,
    },
    /// List recent conflict resolutions
    History {
        /// Number of entries to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop queued changes
    Clear {
        #[arg(value_enum)]
        target: ClearTarget,
    },
    /// Inspect or manage the read cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Print a cached value
    Get { key: String },
    /// Cache a JSON value
    Set {
        key: String,
        /// JSON value
        value: String,
        /// Lifetime in milliseconds (settings default when omitted)
        #[arg(long, value_name = "MS")]
        ttl_ms: Option<i64>,
    },
    /// Remove expired entries, or everything with --all
    Purge {
        #[arg(long)]
        all: bool,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl From<ChangeKind> for ChangeType {
    fn from(kind: ChangeKind) -> Self {
        match kind {
            ChangeKind::Create => Self::Create,
            ChangeKind::Update => Self::Update,
            ChangeKind::Delete => Self::Delete,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StatusFilter {
    Pending,
    Syncing,
    Conflict,
    Failed,
}

impl From<StatusFilter> for ChangeStatus {
    fn from(filter: StatusFilter) -> Self {
        match filter {
            StatusFilter::Pending => Self::Pending,
            StatusFilter::Syncing => Self::Syncing,
            StatusFilter::Conflict => Self::Conflict,
            StatusFilter::Failed => Self::Failed,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StrategyArg {
    KeepLocal,
    KeepServer,
    Merge,
}

impl From<StrategyArg> for ResolutionStrategy {
    fn from(strategy: StrategyArg) -> Self {
        match strategy {
            StrategyArg::KeepLocal => Self::KeepLocal,
            StrategyArg::KeepServer => Self::KeepServer,
            StrategyArg::Merge => Self::Merge,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ClearTarget {
    Failed,
    Conflicts,
    All,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

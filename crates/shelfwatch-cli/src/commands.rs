use clap::{Parser, Subcommand, ValueEnum};
use shelfwatch_core::storage::models::{QueueStatus, RuleType};

#[derive(Debug, Parser)]
#[command(name = "shelfwatch")]
#[command(about = "Keeps a catalog of watched library folders in sync", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage watched root directories
    #[command(subcommand)]
    Roots(RootCommand),
    /// Scan one root, or every enabled root, into the catalog
    Scan {
        /// Only scan this root
        #[arg(long)]
        root: Option<i64>,
        /// Fingerprint every file even if size and mtime are unchanged
        #[arg(long)]
        force: bool,
    },
    /// Cancel a running scan job
    Cancel { job_id: i64 },
    /// Show the running scan job, or the latest one
    Status,
    /// List recent scan jobs
    History {
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
    /// Inspect and resolve duplicate files
    #[command(subcommand)]
    Dupes(DupesCommand),
    /// Manage exclusion rules
    #[command(subcommand)]
    Rules(RulesCommand),
    /// Inspect and manage the processing queue
    #[command(subcommand)]
    Queue(QueueCommand),
    /// Run the processing worker until interrupted
    Worker {
        /// Process a single batch and exit
        #[arg(long)]
        once: bool,
    },
    /// Print configuration values
    PrintConfig,
}

#[derive(Debug, Subcommand)]
pub enum RootCommand {
    List,
    Add {
        path: String,
        #[arg(long, default_value = "")]
        label: String,
    },
    /// Remove a root; its catalog entries are kept, detached from any root
    Remove { id: i64 },
    Enable { id: i64 },
    Disable { id: i64 },
    /// Make a root the source of truth for duplicate resolution
    SourceOfTruth { id: i64 },
    ClearSourceOfTruth,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ResolveArg {
    /// Leave the duplicate as it is
    Keep,
    /// Drop the catalog record and remember the path so it is not re-added
    Remove,
    /// Drop the catalog record and delete the file
    Delete,
    /// Make this copy the canonical one
    Canonical,
}

#[derive(Debug, Subcommand)]
pub enum DupesCommand {
    /// List duplicate groups, largest waste first
    Groups {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    Stats,
    Resolve {
        entry_id: i64,
        #[arg(value_enum)]
        action: ResolveArg,
    },
    /// Remove several entries at once
    BulkDelete {
        #[arg(required = true)]
        entry_ids: Vec<i64>,
        #[arg(long)]
        delete_files: bool,
    },
    /// Show what source-of-truth resolution would do
    SotPreview,
    /// Apply source-of-truth resolution
    SotExecute {
        #[arg(long)]
        delete_files: bool,
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum RulesCommand {
    List,
    Add {
        #[arg(long = "type")]
        rule_type: RuleType,
        #[arg(long)]
        pattern: String,
        #[arg(long, default_value_t = 50)]
        priority: i64,
        #[arg(long, default_value = "")]
        description: String,
    },
    Update {
        id: i64,
        #[arg(long = "type")]
        rule_type: RuleType,
        #[arg(long)]
        pattern: String,
        #[arg(long, default_value_t = 50)]
        priority: i64,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        disabled: bool,
    },
    Remove { id: i64 },
    Enable { id: i64 },
    Disable { id: i64 },
    /// Count the files a candidate rule would exclude, without saving it
    Test {
        #[arg(long = "type")]
        rule_type: RuleType,
        #[arg(long)]
        pattern: String,
    },
    /// Add any missing default rules
    Seed,
    /// Re-evaluate rules against the existing catalog
    Apply,
    /// Always include an entry regardless of rules, or undo that with --clear
    Override {
        entry_id: i64,
        #[arg(long)]
        clear: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum QueueCommand {
    Stats,
    List {
        #[arg(long)]
        status: Option<QueueStatus>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Cancel a pending item
    Cancel { id: i64 },
    /// Delete completed or failed items
    Clear { status: QueueStatus },
    /// Give failed items a fresh set of attempts
    RetryFailed,
    /// Return items stuck in processing to pending
    Sweep,
}

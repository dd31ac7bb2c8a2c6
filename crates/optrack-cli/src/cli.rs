use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "optrack")]
#[command(about = "Track hackathons, grants, prospects, Telegram channels and tasks")]
#[command(version)]
pub struct Cli {
    /// Directory holding the JSON stores (overrides config and OPTRACK_DATA_DIR).
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// YAML config file; defaults to <data-dir>/optrack.yaml when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Hackathons, grants and jobs.
    #[command(subcommand)]
    Opportunity(OpportunityAction),
    /// Outreach CRM.
    #[command(subcommand)]
    Prospect(ProspectAction),
    /// Telegram channel watchlist.
    #[command(subcommand)]
    Channel(ChannelAction),
    /// ROI-ranked task queue.
    #[command(subcommand)]
    Task(TaskAction),
    /// Upsert every draft in a collaborator's JSON bundle.
    Ingest {
        path: PathBuf,
        #[arg(long)]
        no_follow_up_tasks: bool,
    },
    /// Markdown brief across all stores.
    Digest {
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

/// Actions every record kind supports.
#[derive(Debug, Subcommand)]
pub enum CommonAction {
    List(ListArgs),
    Show {
        id: u64,
    },
    /// Set one mutable field; `-`, `none` or an empty value clears optional fields.
    Update {
        id: u64,
        field: String,
        value: String,
    },
    Status {
        id: u64,
        status: String,
    },
    Delete {
        id: u64,
    },
    Summary,
    Export(ExportArgs),
    /// Move a corrupt store file aside so the next write starts empty.
    Repair,
}

#[derive(Debug, Clone, Default, Args)]
pub struct ListArgs {
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long)]
    pub category: Option<String>,
    #[arg(long)]
    pub priority: Option<String>,
    #[arg(long)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct ExportArgs {
    #[command(flatten)]
    pub filter: ListArgs,
    /// table, tsv, json or parquet.
    #[arg(long, default_value = "table")]
    pub format: String,
    /// Write atomically to this file instead of stdout (required for parquet).
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum OpportunityAction {
    Add(AddOpportunity),
    #[command(flatten)]
    Common(CommonAction),
}

#[derive(Debug, Args)]
pub struct AddOpportunity {
    pub name: String,
    #[arg(long)]
    pub url: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub category: Option<String>,
    #[arg(long)]
    pub priority: Option<String>,
    #[arg(long)]
    pub source: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum ProspectAction {
    Add(AddProspect),
    #[command(flatten)]
    Common(CommonAction),
}

#[derive(Debug, Args)]
pub struct AddProspect {
    pub name: String,
    #[arg(long, alias = "telegram")]
    pub handle: Option<String>,
    #[arg(long)]
    pub role: Option<String>,
    #[arg(long)]
    pub company: Option<String>,
    #[arg(long)]
    pub email: Option<String>,
    #[arg(long)]
    pub source: Option<String>,
    #[arg(long)]
    pub notes: Option<String>,
    #[arg(long)]
    pub priority: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum ChannelAction {
    Add(AddChannel),
    /// Stamp `last_scraped_at` with the current time.
    Scraped {
        id: u64,
    },
    #[command(flatten)]
    Common(CommonAction),
}

#[derive(Debug, Args)]
pub struct AddChannel {
    /// `@name`, `t.me/name` or a full link.
    pub handle: String,
    #[arg(long)]
    pub category: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum TaskAction {
    Add(AddTask),
    /// Show the open task with the best ROI.
    Next,
    #[command(flatten)]
    Common(CommonAction),
}

#[derive(Debug, Args)]
pub struct AddTask {
    pub title: String,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub priority: Option<String>,
    /// RFC 3339 timestamp or YYYY-MM-DD.
    #[arg(long)]
    pub due: Option<String>,
    #[arg(long)]
    pub impact: Option<u8>,
    #[arg(long)]
    pub urgency: Option<u8>,
    #[arg(long)]
    pub effort: Option<u8>,
}

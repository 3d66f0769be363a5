use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tandem_core::{ConflictStrategy, MessageRole};

#[derive(Parser)]
#[command(name = "tandem")]
#[command(about = "Keep conversations in sync across your devices")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// CLI profile name for sync configuration
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage conversations
    #[command(alias = "chats")]
    Chat {
        #[command(subcommand)]
        command: ChatCommands,
    },
    /// Manage messages inside a conversation
    #[command(alias = "msg")]
    Message {
        #[command(subcommand)]
        command: MessageCommands,
    },
    /// Reconcile the local replica with the shared store
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
    /// Show this device's identity and sync backend
    Device {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
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
pub enum ChatCommands {
    /// Start a new conversation
    #[command(alias = "new")]
    Create {
        /// Conversation title
        title: Vec<String>,
    },
    /// List conversations, most recent first
    List {
        /// Number of conversations to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a conversation with its messages
    Show {
        /// Conversation ID or unique ID prefix
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rename a conversation
    Rename {
        /// Conversation ID or unique ID prefix
        id: String,
        /// New title
        title: Vec<String>,
    },
    /// Delete a conversation and its messages
    Delete {
        /// Conversation ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
pub enum MessageCommands {
    /// Append a message (reads stdin when no content is given)
    Add {
        /// Conversation ID or unique ID prefix
        chat: String,
        /// Author role
        #[arg(long, value_enum, default_value_t = RoleArg::User)]
        role: RoleArg,
        /// Message content
        content: Vec<String>,
    },
    /// Delete a single message
    Delete {
        /// Message ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Run one reconciliation cycle (default)
    Run {
        /// Output cycle statistics as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show sync metadata for this device
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Include resolved conflicts
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve an open conflict explicitly
    Resolve {
        /// Conflict ID or unique ID prefix
        id: String,
        /// Resolution strategy
        #[arg(long, value_enum)]
        strategy: StrategyArg,
    },
    /// Keep syncing in the background until interrupted
    Watch {
        /// Seconds between periodic cycles
        #[arg(long, default_value = "60")]
        interval: u64,
        /// Seconds between change list polls (0 disables polling)
        #[arg(long, default_value = "5")]
        poll: u64,
    },
    /// Ask other devices to sync soon
    Request,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update profile config
    Init {
        /// Profile name to initialize
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
        /// Key namespace shared by every device of this dataset
        #[arg(long, value_name = "NAME")]
        namespace: Option<String>,
        /// Conflict resolution strategy
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,
        /// Flag equal-version content divergence as a conflict
        #[arg(long)]
        strict: Option<bool>,
        /// Redis REST endpoint (e.g. <https://eu1-example.upstash.io>)
        #[arg(long, value_name = "URL")]
        redis_url: Option<String>,
        /// Redis REST bearer token
        #[arg(long, value_name = "TOKEN")]
        redis_token: Option<String>,
        /// Local database path for this profile
        #[arg(long, value_name = "PATH")]
        db_path: Option<PathBuf>,
        /// Do not switch active profile to this profile
        #[arg(long)]
        no_activate: bool,
    },
    /// Show the effective configuration
    Show {
        /// Profile name to show (defaults to active profile)
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Switch active profile
    Use {
        /// Profile name
        profile: String,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    #[value(name = "powershell")]
    PowerShell,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StrategyArg {
    LocalWins,
    RemoteWins,
    Merge,
    Manual,
}

impl From<StrategyArg> for ConflictStrategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::LocalWins => Self::LocalWins,
            StrategyArg::RemoteWins => Self::RemoteWins,
            StrategyArg::Merge => Self::Merge,
            StrategyArg::Manual => Self::Manual,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum RoleArg {
    User,
    Assistant,
    System,
}

impl From<RoleArg> for MessageRole {
    fn from(value: RoleArg) -> Self {
        match value {
            RoleArg::User => Self::User,
            RoleArg::Assistant => Self::Assistant,
            RoleArg::System => Self::System,
        }
    }
}

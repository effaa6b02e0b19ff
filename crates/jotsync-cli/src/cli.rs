use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use jotsync_core::config::FailurePolicy;

#[derive(Parser)]
#[command(name = "jot")]
#[command(about = "Manage synced notes from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// CLI profile name for backend and session configuration
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List notes
    #[command(alias = "ls")]
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create a new note
    #[command(alias = "new")]
    Add {
        /// Note name
        name: String,
        /// Optional description
        #[arg(short, long)]
        description: Option<String>,
        /// Image file to attach
        #[arg(long, value_name = "PATH")]
        image: Option<PathBuf>,
    },
    /// Edit an existing note
    Edit {
        /// Note ID or unique ID prefix
        id: String,
        /// New name
        #[arg(long)]
        name: Option<String>,
        /// New description
        #[arg(short, long, conflicts_with = "clear_description")]
        description: Option<String>,
        /// Remove the description
        #[arg(long)]
        clear_description: bool,
    },
    /// Delete a note and its image
    #[command(alias = "rm")]
    Delete {
        /// Note ID or unique ID prefix
        id: String,
    },
    /// Download a note's image
    Image {
        /// Note ID or unique ID prefix
        id: String,
        /// Where to write the image; stdout when omitted
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Authenticate a CLI profile
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum FailurePolicyArg {
    Revert,
    MarkDesynced,
}

impl From<FailurePolicyArg> for FailurePolicy {
    fn from(value: FailurePolicyArg) -> Self {
        match value {
            FailurePolicyArg::Revert => Self::Revert,
            FailurePolicyArg::MarkDesynced => Self::MarkDesynced,
        }
    }
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update profile config
    Init(ConfigInitArgs),
    /// Print the resolved profile config
    Show {
        /// Profile name to show
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
    },
}

#[derive(clap::Args, Debug, Default)]
pub struct ConfigInitArgs {
    /// Profile name to initialize
    #[arg(long, value_name = "NAME")]
    pub profile: Option<String>,
    /// Backend manifest URL (e.g. <https://api.example.com/v1/backend>)
    #[arg(long, value_name = "URL")]
    pub manifest_url: Option<String>,
    /// Identity provider URL
    #[arg(long, value_name = "URL")]
    pub auth_url: Option<String>,
    /// Public API key
    #[arg(long, value_name = "KEY")]
    pub api_key: Option<String>,
    /// GraphQL endpoint
    #[arg(long, value_name = "URL")]
    pub graphql_url: Option<String>,
    /// Media API base URL
    #[arg(long, value_name = "URL")]
    pub storage_url: Option<String>,
    /// What to do with local changes whose remote mutation fails
    #[arg(long, value_enum)]
    pub failure_policy: Option<FailurePolicyArg>,
    /// Maximum concurrent image downloads
    #[arg(long, value_name = "N")]
    pub image_workers: Option<usize>,
    /// Object key prefix for images
    #[arg(long, value_name = "PREFIX")]
    pub storage_prefix: Option<String>,
    /// Keep current active profile instead of activating this one
    #[arg(long)]
    pub no_activate: bool,
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Sign in with email/password and store the session
    Login {
        /// Optional profile override
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
        /// Account email
        #[arg(long, value_name = "EMAIL")]
        email: String,
        /// Account password
        #[arg(long, value_name = "PASSWORD")]
        password: String,
    },
    /// Show auth status for profile
    Status {
        /// Optional profile override
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
    },
    /// Sign out and clear the stored session
    Logout {
        /// Optional profile override
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
    },
}

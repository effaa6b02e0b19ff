//! jot - manage synced notes from the command line
//!
//! Each invocation restores the profile's session, loads the note collection
//! and waits for its remote mutations to settle before exiting.

mod cli;
mod commands;
mod config_profiles;
mod error;
mod session_store;


use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::{add, auth_cmd, config, delete, edit, image, list};
use crate::error::CliError;

const DEFAULT_LOG_FILTER: &str = "jotsync_core=info,jot=info";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let profile = cli.profile.as_deref();

    match cli.command {
        Commands::List { json } => list::run_list(json, profile).await?,
        Commands::Add {
            name,
            description,
            image,
        } => add::run_add(&name, description.as_deref(), image.as_deref(), profile).await?,
        Commands::Edit {
            id,
            name,
            description,
            clear_description,
        } => edit::run_edit(&id, name, description, clear_description, profile).await?,
        Commands::Delete { id } => delete::run_delete(&id, profile).await?,
        Commands::Image { id, output } => image::run_image(&id, output.as_deref(), profile).await?,
        Commands::Config { command } => config::run_config(command, profile).await?,
        Commands::Auth { command } => auth_cmd::run_auth(command, profile).await?,
    }

    Ok(())
}

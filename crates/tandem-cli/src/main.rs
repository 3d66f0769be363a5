//! Tandem CLI - conversations that follow you across devices
//!
//! Works against the local replica and reconciles it with the shared
//! Redis REST store configured for the active profile.

mod cli;
mod commands;
mod config_profiles;
mod error;


use clap::{CommandFactory, Parser};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::chat::run_chat;
use crate::commands::common::open_context;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::device::run_device;
use crate::commands::message::run_message;
use crate::commands::sync::run_sync;
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

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "tandem=info".parse::<Directive>() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let profile = cli.profile.as_deref();

    match cli.command {
        None => {
            Cli::command().print_help()?;
            println!();
        }
        Some(Commands::Config { command }) => run_config(command, profile)?,
        Some(Commands::Completions { shell, output }) => {
            run_completions(shell, output.as_deref())?;
        }
        Some(Commands::Chat { command }) => {
            let ctx = open_context(cli.db_path, profile).await?;
            run_chat(command, &ctx).await?;
        }
        Some(Commands::Message { command }) => {
            let ctx = open_context(cli.db_path, profile).await?;
            run_message(command, &ctx).await?;
        }
        Some(Commands::Sync { command }) => {
            let ctx = open_context(cli.db_path, profile).await?;
            run_sync(command, &ctx).await?;
        }
        Some(Commands::Device { json }) => {
            let ctx = open_context(cli.db_path, profile).await?;
            run_device(json, &ctx)?;
        }
    }

    Ok(())
}

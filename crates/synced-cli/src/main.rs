//! synced CLI - Keep a local SQLite store in step with a remote API
//!
//! Reconciles configured models from a JSON file or an HTTP endpoint and
//! inspects the resulting records and watermarks.

mod cli;
mod commands;
mod error;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, TimestampsCommand};
use crate::commands::common::{parse_scope, resolve_config_path, resolve_db_path};
use crate::commands::records::run_records;
use crate::commands::sync::{run_sync, SyncArgs};
use crate::commands::timestamps::{run_timestamps_reset, run_timestamps_show};
use crate::error::CliError;

fn main() {
    if let Err(error) = run() {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);
    let config_path = resolve_config_path(cli.config);

    match cli.command {
        Commands::Sync {
            model,
            input,
            api_url,
            token,
            scope,
            remove,
            full,
            json,
        } => {
            let args = SyncArgs {
                model,
                input,
                api_url,
                token,
                scope: parse_scope(&scope),
                remove,
                full,
                json,
            };
            run_sync(&args, &db_path, &config_path)?;
        }
        Commands::Records { model, scope, json } => {
            run_records(&model, parse_scope(&scope).as_ref(), json, &db_path, &config_path)?;
        }
        Commands::Timestamps { action } => match action {
            TimestampsCommand::Show { model, scope, json } => {
                run_timestamps_show(&model, parse_scope(&scope).as_ref(), json, &db_path)?;
            }
            TimestampsCommand::Reset { model, scope } => {
                run_timestamps_reset(&model, parse_scope(&scope).as_ref(), &db_path)?;
            }
        },
    }

    Ok(())
}

fn init_tracing() {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "synced=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

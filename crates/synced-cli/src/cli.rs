use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use synced_core::RemovePolicy;

#[derive(Parser)]
#[command(name = "synced")]
#[command(about = "Keep local records in step with a remote API")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the model configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// Parent record a command is confined to
#[derive(Args, Debug, Clone, Default)]
pub struct ScopeArgs {
    /// Model of the parent record
    #[arg(long, value_name = "MODEL", requires = "scope_id")]
    pub scope_model: Option<String>,
    /// Local ID of the parent record
    #[arg(long, value_name = "ID", requires = "scope_model")]
    pub scope_id: Option<i64>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Synchronize a model from a JSON file or the remote API
    Sync {
        /// Configured model name
        model: String,
        /// Read the remote collection from a JSON file instead of the API
        #[arg(long, value_name = "PATH")]
        input: Option<PathBuf>,
        /// Base URL of the remote API
        #[arg(long, value_name = "URL")]
        api_url: Option<String>,
        /// Bearer token for the remote API
        #[arg(long, value_name = "TOKEN")]
        token: Option<String>,
        #[command(flatten)]
        scope: ScopeArgs,
        /// Removal policy: off, destroy, mark-as-missing or auto
        #[arg(long, value_name = "POLICY")]
        remove: Option<RemovePolicy>,
        /// Ignore the watermark and reconcile the full collection
        #[arg(long)]
        full: bool,
        /// Output the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// List local records of a model
    Records {
        /// Configured model name
        model: String,
        #[command(flatten)]
        scope: ScopeArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect or reset sync watermarks
    Timestamps {
        #[command(subcommand)]
        action: TimestampsCommand,
    },
}

#[derive(Subcommand)]
pub enum TimestampsCommand {
    /// Show recorded watermarks, newest first
    Show {
        model: String,
        #[command(flatten)]
        scope: ScopeArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete watermarks so the next sync fetches everything
    Reset {
        model: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },
}

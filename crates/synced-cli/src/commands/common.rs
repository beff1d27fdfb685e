use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use synced_core::config::DEFAULT_ID_KEY;
use synced_core::db::{Database, SqliteRecordStore};
use synced_core::remote::parse_collection;
use synced_core::util::normalize_text_option;
use synced_core::{
    LocalRecord, RecordId, RemoteCollection, Scope, SyncResult, SyncTimestamp, SyncedConfig,
};

use crate::cli::ScopeArgs;
use crate::error::CliError;

const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Serialize)]
pub struct RecordItem {
    pub id: i64,
    pub remote_id: Option<String>,
    pub scope: Option<String>,
    pub attributes: serde_json::Value,
    pub updated_at: i64,
}

#[derive(Debug, Serialize)]
pub struct TimestampItem {
    pub id: i64,
    pub scope: Option<String>,
    pub synced_at: String,
    pub created_at: String,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("SYNCED_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("synced")
        .join("synced.db")
}

pub fn resolve_config_path(cli_config: Option<PathBuf>) -> PathBuf {
    cli_config
        .or_else(|| env::var_os("SYNCED_CONFIG").map(PathBuf::from))
        .unwrap_or_else(default_config_path)
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("synced")
        .join(CONFIG_FILE_NAME)
}

/// Explicit flag, then `SYNCED_API_URL`, then the config file
pub fn resolve_api_url(explicit: Option<String>, config: &SyncedConfig) -> Option<String> {
    normalize_text_option(explicit)
        .or_else(|| normalize_text_option(env::var("SYNCED_API_URL").ok()))
        .or_else(|| config.api_url.clone())
}

pub fn resolve_api_token(explicit: Option<String>) -> Option<String> {
    normalize_text_option(explicit).or_else(|| normalize_text_option(env::var("SYNCED_API_TOKEN").ok()))
}

/// Load the config file and check that it declares `model`
pub fn load_config(path: &Path, model: &str) -> Result<SyncedConfig, CliError> {
    let config = SyncedConfig::load_from_path(path)?;
    if !config.models.contains_key(model) {
        return Err(CliError::UnknownModel(
            model.to_string(),
            path.display().to_string(),
        ));
    }
    Ok(config)
}

/// Column holding remote IDs for a configured model
pub fn id_key(config: &SyncedConfig, model: &str) -> String {
    config
        .models
        .get(model)
        .and_then(|model| model.id_key.clone())
        .unwrap_or_else(|| DEFAULT_ID_KEY.to_string())
}

pub fn open_database(path: &Path) -> Result<Database, CliError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(Database::open(path)?)
}

pub fn record_store<'a>(db: &'a Database, config: &SyncedConfig) -> SqliteRecordStore<'a> {
    SqliteRecordStore::new(db.connection()).with_models(config.schemas())
}

pub fn parse_scope(args: &ScopeArgs) -> Option<Scope> {
    let model = normalize_text_option(args.scope_model.clone())?;
    args.scope_id.map(|id| Scope::new(model, RecordId::new(id)))
}

/// Read a remote collection from a JSON file shaped like an API response
pub fn read_collection(path: &Path, key: &str) -> Result<RemoteCollection, CliError> {
    let body = fs::read_to_string(path)?;
    Ok(parse_collection(&body, key)?)
}

pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn record_to_item(record: &LocalRecord, id_key: &str) -> RecordItem {
    RecordItem {
        id: record.id.get(),
        remote_id: record.remote_id(id_key).map(|id| id.to_string()),
        scope: record.scope.as_ref().map(ToString::to_string),
        attributes: serde_json::Value::Object(record.attributes.clone()),
        updated_at: record.updated_at,
    }
}

pub fn format_record_lines(records: &[LocalRecord], id_key: &str) -> Vec<String> {
    if records.is_empty() {
        return vec!["No records.".to_string()];
    }

    records
        .iter()
        .map(|record| {
            let mut attributes = record.attributes.clone();
            attributes.remove(id_key);
            format!(
                "#{:<5} {:<12} {:<16} {}",
                record.id.get(),
                record
                    .remote_id(id_key)
                    .map_or_else(|| "-".to_string(), |id| id.to_string()),
                record
                    .scope
                    .as_ref()
                    .map_or_else(|| "-".to_string(), ToString::to_string),
                serde_json::Value::Object(attributes)
            )
        })
        .collect()
}

pub fn timestamp_to_item(timestamp: &SyncTimestamp) -> TimestampItem {
    TimestampItem {
        id: timestamp.id,
        scope: timestamp.scope.as_ref().map(ToString::to_string),
        synced_at: format_timestamp(timestamp.synced_at),
        created_at: format_timestamp(timestamp.created_at),
    }
}

pub fn format_timestamp_lines(timestamps: &[SyncTimestamp]) -> Vec<String> {
    if timestamps.is_empty() {
        return vec!["No watermarks recorded.".to_string()];
    }

    timestamps
        .iter()
        .map(|timestamp| {
            format!(
                "{}  {:<16} recorded {}",
                format_timestamp(timestamp.synced_at),
                timestamp
                    .scope
                    .as_ref()
                    .map_or_else(|| "(global)".to_string(), ToString::to_string),
                format_timestamp(timestamp.created_at)
            )
        })
        .collect()
}

/// Summary line per model, indented by association depth, then failures
pub fn format_result_lines(result: &SyncResult) -> Vec<String> {
    let mut lines = Vec::new();
    push_result_lines(result, 0, &mut lines);
    for error in result.all_errors() {
        lines.push(format!("  failed: {error}"));
    }
    lines
}

fn push_result_lines(result: &SyncResult, depth: usize, lines: &mut Vec<String>) {
    lines.push(format!("{}{result}", "  ".repeat(depth)));
    for nested in result.associations.values() {
        push_result_lines(nested, depth + 1, lines);
    }
}

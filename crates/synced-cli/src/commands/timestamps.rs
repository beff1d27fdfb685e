use std::path::Path;

use synced_core::db::{SqliteTimestampRepository, TimestampKey, TimestampRepository};
use synced_core::sync::timestamp_strategy;
use synced_core::{Scope, SyncTimestamp};

use crate::commands::common::{
    format_timestamp_lines, open_database, timestamp_to_item, TimestampItem,
};
use crate::error::CliError;

pub fn list_timestamps(
    model: &str,
    scope: Option<&Scope>,
    db_path: &Path,
) -> Result<Vec<SyncTimestamp>, CliError> {
    let db = open_database(db_path)?;
    let repo = SqliteTimestampRepository::new(db.connection());
    let key = match scope {
        Some(scope) => TimestampKey::Scoped { scope, model },
        None => TimestampKey::Model { model },
    };
    Ok(repo.list(&key)?)
}

pub fn run_timestamps_show(
    model: &str,
    scope: Option<&Scope>,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let timestamps = list_timestamps(model, scope, db_path)?;

    if as_json {
        let json_items = timestamps
            .iter()
            .map(timestamp_to_item)
            .collect::<Vec<TimestampItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_timestamp_lines(&timestamps) {
            println!("{line}");
        }
    }

    Ok(())
}

pub fn reset_timestamps(
    model: &str,
    scope: Option<&Scope>,
    db_path: &Path,
) -> Result<usize, CliError> {
    let db = open_database(db_path)?;
    let repo = SqliteTimestampRepository::new(db.connection());
    let removed = timestamp_strategy(&repo, scope, model).reset()?;
    Ok(removed)
}

pub fn run_timestamps_reset(
    model: &str,
    scope: Option<&Scope>,
    db_path: &Path,
) -> Result<(), CliError> {
    let removed = reset_timestamps(model, scope, db_path)?;
    println!("Removed {removed} watermark row(s) for {model}");
    Ok(())
}

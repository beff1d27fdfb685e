use std::path::Path;

use synced_core::Scope;

use crate::commands::common::{
    format_record_lines, id_key, load_config, open_database, record_store, record_to_item,
    RecordItem,
};
use crate::error::CliError;

pub fn run_records(
    model: &str,
    scope: Option<&Scope>,
    as_json: bool,
    db_path: &Path,
    config_path: &Path,
) -> Result<(), CliError> {
    let config = load_config(config_path, model)?;
    let db = open_database(db_path)?;
    let records = record_store(&db, &config).list(scope, model)?;
    let id_key = id_key(&config, model);

    if as_json {
        let json_items = records
            .iter()
            .map(|record| record_to_item(record, &id_key))
            .collect::<Vec<RecordItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_record_lines(&records, &id_key) {
            println!("{line}");
        }
    }

    Ok(())
}

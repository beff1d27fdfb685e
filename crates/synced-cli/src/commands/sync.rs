use std::path::{Path, PathBuf};

use synced_core::db::SqliteTimestampRepository;
use synced_core::remote::HttpSource;
use synced_core::{RemovePolicy, Scope, SyncOverrides, SyncRequest, SyncResult, Synchronizer};

use crate::commands::common::{
    format_result_lines, load_config, open_database, read_collection, record_store,
    resolve_api_token, resolve_api_url,
};
use crate::error::CliError;

/// Options of one `synced sync` invocation
#[derive(Debug, Clone, Default)]
pub struct SyncArgs {
    pub model: String,
    pub input: Option<PathBuf>,
    pub api_url: Option<String>,
    pub token: Option<String>,
    pub scope: Option<Scope>,
    pub remove: Option<RemovePolicy>,
    pub full: bool,
    pub json: bool,
}

impl SyncArgs {
    fn overrides(&self) -> SyncOverrides {
        let mut overrides = SyncOverrides::new();
        overrides.remove = self.remove;
        if self.full {
            overrides = overrides.only_updated(false);
        }
        overrides
    }
}

pub fn run_sync(args: &SyncArgs, db_path: &Path, config_path: &Path) -> Result<(), CliError> {
    let result = sync_model(args, db_path, config_path)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for line in format_result_lines(&result) {
            println!("{line}");
        }
    }

    match result.error_count() {
        0 => Ok(()),
        failed => Err(CliError::PartialSync(failed)),
    }
}

pub fn sync_model(
    args: &SyncArgs,
    db_path: &Path,
    config_path: &Path,
) -> Result<SyncResult, CliError> {
    let config = load_config(config_path, &args.model)?;
    let db = open_database(db_path)?;
    let store = record_store(&db, &config);
    let timestamps = SqliteTimestampRepository::new(db.connection());
    let registry = config.registry();

    let mut request = SyncRequest::new(args.model.as_str()).with_overrides(args.overrides());
    if let Some(scope) = &args.scope {
        request = request.with_scope(scope.clone());
    }

    let source = match &args.input {
        Some(input) => {
            let key = config.models[&args.model]
                .endpoint
                .clone()
                .unwrap_or_else(|| args.model.clone());
            request = request.with_remote(read_collection(input, &key)?);
            None
        }
        None => {
            let api_url = resolve_api_url(args.api_url.clone(), &config)
                .ok_or(CliError::RemoteNotConfigured)?;
            Some(HttpSource::new(api_url)?.with_token(resolve_api_token(args.token.clone())))
        }
    };

    let mut synchronizer = Synchronizer::new(&store, &timestamps, &registry);
    if let Some(source) = &source {
        synchronizer = synchronizer.with_source(source);
    }

    Ok(synchronizer.synchronize(request)?)
}

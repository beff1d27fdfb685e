//! Reconciliation of a remote collection with the local record store

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use super::result::{RecordError, RecordErrorKind, SyncResult};
use super::timestamp::timestamp_strategy;
use crate::config::{ModelRegistry, Removal, ResolvedOptions, SyncOverrides};
use crate::db::{RecordStore, TimestampRepository};
use crate::error::{Error, Result};
use crate::models::{Attributes, LocalRecord, RemoteCollection, RemoteId, RemoteRecord, Scope};
use crate::remote::{FetchRequest, RemoteSource};

/// One synchronization call
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub model: String,
    /// Local parent the run is confined to; `None` covers the whole model
    pub scope: Option<Scope>,
    /// Records to reconcile; fetched through the remote source when `None`
    pub remote: Option<RemoteCollection>,
    pub overrides: SyncOverrides,
}

impl SyncRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            scope: None,
            remote: None,
            overrides: SyncOverrides::default(),
        }
    }

    #[must_use]
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    #[must_use]
    pub fn with_remote(mut self, remote: impl Into<RemoteCollection>) -> Self {
        self.remote = Some(remote.into());
        self
    }

    #[must_use]
    pub fn with_overrides(mut self, overrides: SyncOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// State shared by the nested runs of one call
struct Run {
    synced_at: DateTime<Utc>,
}

/// Drives remote → local reconciliation for registered models
pub struct Synchronizer<'a> {
    store: &'a dyn RecordStore,
    timestamps: &'a dyn TimestampRepository,
    registry: &'a ModelRegistry,
    source: Option<&'a dyn RemoteSource>,
    clock: Box<dyn Fn() -> DateTime<Utc> + 'a>,
}

impl<'a> Synchronizer<'a> {
    pub fn new(
        store: &'a dyn RecordStore,
        timestamps: &'a dyn TimestampRepository,
        registry: &'a ModelRegistry,
    ) -> Self {
        Self {
            store,
            timestamps,
            registry,
            source: None,
            clock: Box::new(Utc::now),
        }
    }

    /// Fetch through `source` when a request carries no remote collection
    #[must_use]
    pub fn with_source(mut self, source: &'a dyn RemoteSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Replace the clock used for run start times
    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + 'a) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Reconcile one model within one scope.
    ///
    /// Configuration problems and fetch failures return `Err` before any
    /// record is touched. Per-record failures are collected in the result
    /// unless configured as fatal, in which case the run stops with `Err`
    /// and the records already written stay written. The watermark advances
    /// only when the call returns `Ok`.
    pub fn synchronize(&self, request: SyncRequest) -> Result<SyncResult> {
        let SyncRequest {
            model,
            scope,
            remote,
            overrides,
        } = request;

        let options = self.registry.resolve(&model, &overrides, self.store)?;
        let strategy = timestamp_strategy(self.timestamps, scope.as_ref(), &options.model);
        let started_at = (self.clock)();

        let watermark = if options.only_updated {
            strategy.last_synced_at()?
        } else {
            None
        };

        tracing::info!(
            model = %options.model,
            scope = ?scope.as_ref().map(ToString::to_string),
            updated_since = ?watermark,
            "Starting synchronization"
        );

        let collection = match remote {
            Some(collection) => collection,
            None => self.fetch(&options, scope.as_ref(), watermark)?,
        };

        let run = Run {
            synced_at: collection.synced_at.unwrap_or(started_at),
        };
        let result = self.reconcile(&run, &options, scope.as_ref(), collection, watermark.is_some())?;

        if strategy.update(run.synced_at)? {
            tracing::debug!(model = %options.model, synced_at = %run.synced_at, "Advanced watermark");
        }

        if result.error_count() > 0 {
            tracing::warn!("{result} ({} record errors in total)", result.error_count());
        } else {
            tracing::info!("{result}");
        }
        Ok(result)
    }

    /// Latest watermark recorded for a model within a scope
    pub fn last_synced_at(&self, model: &str, scope: Option<&Scope>) -> Result<Option<DateTime<Utc>>> {
        timestamp_strategy(self.timestamps, scope, model).last_synced_at()
    }

    /// Forget a model's watermark so the next run fetches everything
    pub fn reset_watermark(&self, model: &str, scope: Option<&Scope>) -> Result<usize> {
        let removed = timestamp_strategy(self.timestamps, scope, model).reset()?;
        tracing::info!(model, removed, "Reset watermark");
        Ok(removed)
    }

    fn fetch(
        &self,
        options: &ResolvedOptions,
        scope: Option<&Scope>,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<RemoteCollection> {
        let source = self.source.ok_or_else(|| {
            Error::Config(format!(
                "no remote collection given for `{}` and no remote source configured",
                options.model
            ))
        })?;

        let request = FetchRequest {
            model: &options.model,
            endpoint: &options.endpoint,
            scope,
            updated_since,
        };

        let collection = source.fetch(&request).map_err(|error| match error {
            Error::Fetch(_) => error,
            other => Error::Fetch(other.to_string()),
        })?;
        tracing::debug!(model = %options.model, records = collection.len(), "Fetched remote collection");
        Ok(collection)
    }

    /// Upsert, remove and recurse for one model within one scope.
    ///
    /// `delta` means the collection only holds changes since the watermark,
    /// so local records absent from it are not evidence of remote deletion.
    fn reconcile(
        &self,
        run: &Run,
        options: &ResolvedOptions,
        scope: Option<&Scope>,
        collection: RemoteCollection,
        delta: bool,
    ) -> Result<SyncResult> {
        let mut result = SyncResult::new(&options.model);
        let RemoteCollection {
            records,
            deleted_ids,
            ..
        } = collection;

        let mut upserts = Vec::with_capacity(records.len());
        let mut signalled = Vec::new();
        for record in records {
            if options.only_updated && record.is_deleted() {
                signalled.push(record.id);
            } else {
                upserts.push(record);
            }
        }

        let explicit = if options.only_updated && (deleted_ids.is_some() || !signalled.is_empty()) {
            let mut ids = deleted_ids.unwrap_or_default();
            ids.extend(signalled);
            Some(ids)
        } else {
            None
        };

        let locals = if delta || explicit.is_some() {
            let mut ids: Vec<RemoteId> = upserts.iter().map(|record| record.id.clone()).collect();
            ids.extend(explicit.iter().flatten().cloned());
            ids.sort();
            ids.dedup();
            self.store
                .find_by_ids(scope, &options.model, &options.id_key, &ids)?
        } else {
            self.store
                .find_all_in_scope(scope, &options.model, &options.id_key)?
        };

        let mut by_remote_id: HashMap<RemoteId, LocalRecord> = HashMap::with_capacity(locals.len());
        for local in locals {
            if let Some(id) = local.remote_id(&options.id_key) {
                by_remote_id.entry(id).or_insert(local);
            }
        }

        let stamp = options
            .all_at_key
            .as_ref()
            .filter(|_| options.only_updated)
            .map(|key| {
                (
                    key.clone(),
                    Value::String(run.synced_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
                )
            });

        let mut seen = HashSet::with_capacity(upserts.len());
        for remote in &upserts {
            seen.insert(remote.id.clone());
            let Some(local) = self.upsert(options, scope, remote, &by_remote_id, stamp.as_ref(), &mut result)? else {
                continue;
            };
            self.sync_associations(run, options, remote, &local, &mut result)?;
            by_remote_id.insert(remote.id.clone(), local);
        }

        let mut missing: Vec<LocalRecord> = match explicit {
            Some(ids) => ids
                .iter()
                .filter_map(|id| by_remote_id.get(id))
                .cloned()
                .collect(),
            None if delta => {
                if options.remove != Removal::Off {
                    tracing::warn!(
                        model = %options.model,
                        "Delta response carried no deleted ids; skipping removal"
                    );
                }
                Vec::new()
            }
            None => by_remote_id
                .iter()
                .filter(|(id, _)| !seen.contains(*id))
                .map(|(_, local)| local.clone())
                .collect(),
        };
        missing.sort_by_key(|local| local.id);
        missing.dedup_by_key(|local| local.id);

        self.remove_missing(options, missing, &mut result)?;
        Ok(result)
    }

    /// Create or update the local counterpart of one remote record.
    ///
    /// Returns the local record to recurse into, or `None` when the record
    /// failed and was reported.
    fn upsert(
        &self,
        options: &ResolvedOptions,
        scope: Option<&Scope>,
        remote: &RemoteRecord,
        by_remote_id: &HashMap<RemoteId, LocalRecord>,
        stamp: Option<&(String, Value)>,
        result: &mut SyncResult,
    ) -> Result<Option<LocalRecord>> {
        let mut attributes = match options.mapper.map(remote, &options.local_attributes) {
            Ok(attributes) => attributes,
            Err(error) => {
                if options.fatal_mapping_errors {
                    return Err(error);
                }
                record_failure(result, options, remote, RecordErrorKind::Mapping, &error);
                return Ok(None);
            }
        };
        attributes.insert(options.id_key.clone(), remote.id.to_value());
        if let Some(data_key) = &options.data_key {
            attributes.insert(data_key.clone(), remote.to_json());
        }

        let written = match by_remote_id.get(&remote.id) {
            None => self
                .store
                .create(scope, &options.model, with_stamp(attributes, stamp))
                .map(|local| {
                    result.created += 1;
                    local
                }),
            Some(local) if local.differs_from(&attributes) => self
                .store
                .update(local, with_stamp(attributes, stamp))
                .map(|local| {
                    result.updated += 1;
                    local
                }),
            Some(local) => {
                result.unchanged += 1;
                Ok(local.clone())
            }
        };

        match written {
            Ok(local) => Ok(Some(local)),
            Err(error) if options.fatal_store_errors => Err(error),
            Err(error) => {
                record_failure(result, options, remote, RecordErrorKind::Persistence, &error);
                Ok(None)
            }
        }
    }

    fn sync_associations(
        &self,
        run: &Run,
        options: &ResolvedOptions,
        remote: &RemoteRecord,
        local: &LocalRecord,
        result: &mut SyncResult,
    ) -> Result<()> {
        for child in &options.associations {
            let records = match remote.association(&child.model) {
                Ok(Some(records)) => records,
                Ok(None) => continue,
                Err(error) => {
                    if child.fatal_mapping_errors {
                        return Err(error);
                    }
                    record_failure(result, options, remote, RecordErrorKind::Mapping, &error);
                    continue;
                }
            };

            let scope = Scope::of(local);
            let nested = self.reconcile(run, child, Some(&scope), RemoteCollection::new(records), false)?;
            result.merge_association(&child.model, nested);
        }
        Ok(())
    }

    fn remove_missing(
        &self,
        options: &ResolvedOptions,
        missing: Vec<LocalRecord>,
        result: &mut SyncResult,
    ) -> Result<()> {
        for local in missing {
            let removed = match &options.remove {
                Removal::Off => continue,
                Removal::MarkAsMissing { marker } if local.is_marked_missing(marker) => {
                    result.unchanged += 1;
                    continue;
                }
                Removal::MarkAsMissing { .. } => self.store.mark_missing(&local).map(|_| ()),
                Removal::Destroy => self.store.delete(&local),
            };

            match removed {
                Ok(()) => {
                    tracing::debug!(model = %options.model, id = %local.id, "Removed missing record");
                    result.removed += 1;
                }
                Err(error) if options.fatal_store_errors => return Err(error),
                Err(error) => {
                    tracing::warn!(model = %options.model, id = %local.id, "Failed to remove record: {error}");
                    result.errors.push(RecordError {
                        model: options.model.clone(),
                        remote_id: local.remote_id(&options.id_key),
                        kind: RecordErrorKind::Persistence,
                        message: error.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn with_stamp(mut attributes: Attributes, stamp: Option<&(String, Value)>) -> Attributes {
    if let Some((key, value)) = stamp {
        attributes.insert(key.clone(), value.clone());
    }
    attributes
}

fn record_failure(
    result: &mut SyncResult,
    options: &ResolvedOptions,
    remote: &RemoteRecord,
    kind: RecordErrorKind,
    error: &Error,
) {
    tracing::warn!(model = %options.model, remote_id = %remote.id, "Skipping record: {error}");
    result.errors.push(RecordError {
        model: options.model.clone(),
        remote_id: Some(remote.id.clone()),
        kind,
        message: error.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::config::{RemovePolicy, SyncOptions};
    use crate::db::{Database, SqliteRecordStore, SqliteTimestampRepository, TimestampKey};
    use crate::models::{ModelSchema, RecordId};
    use crate::sync::mapper::FnMapper;
    use crate::sync::result::SyncOutcome;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 30, 0).unwrap()
    }

    fn store(db: &Database) -> SqliteRecordStore<'_> {
        SqliteRecordStore::new(db.connection()).with_models([
            ModelSchema::new("account").with_columns(["name"]),
            ModelSchema::new("location").with_columns(["synced_id", "name"]),
            ModelSchema::new("photo").with_columns(["synced_id", "filename"]),
            ModelSchema::new("rental")
                .with_columns(["synced_id", "name"])
                .with_missing_marker("canceled_at"),
            ModelSchema::new("booking").with_columns([
                "synced_id",
                "synced_data",
                "synced_all_at",
                "name",
            ]),
        ])
    }

    fn registry() -> ModelRegistry {
        ModelRegistry::new()
            .with_model(
                "location",
                SyncOptions::new()
                    .local_attributes(["name"])
                    .associations(["photo"]),
            )
            .with_model("photo", SyncOptions::new().local_attributes(["filename"]))
            .with_model("rental", SyncOptions::new().local_attributes(["name"]))
            .with_model("booking", SyncOptions::new().local_attributes(["name"]))
    }

    fn attrs(value: Value) -> Attributes {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    fn seed(store: &SqliteRecordStore<'_>, model: &str, scope: Option<&Scope>, rows: &[(i64, &str)]) {
        for (id, name) in rows {
            store
                .create(
                    scope,
                    model,
                    attrs(json!({ "synced_id": id.to_string(), "name": name })),
                )
                .unwrap();
        }
    }

    fn names(store: &SqliteRecordStore<'_>, model: &str, scope: Option<&Scope>) -> Vec<(String, Value)> {
        store
            .list(scope, model)
            .unwrap()
            .into_iter()
            .map(|record| {
                (
                    record.remote_id("synced_id").unwrap().to_string(),
                    record.attribute("name").cloned().unwrap_or(Value::Null),
                )
            })
            .collect()
    }

    fn named(id: i64, name: &str) -> RemoteRecord {
        RemoteRecord::new(id).with_attribute("name", name)
    }

    /// Source returning a canned collection and remembering each request
    #[derive(Default)]
    struct StubSource {
        collection: RemoteCollection,
        requests: RefCell<Vec<(String, Option<DateTime<Utc>>)>>,
    }

    impl RemoteSource for StubSource {
        fn fetch(&self, request: &FetchRequest<'_>) -> Result<RemoteCollection> {
            self.requests
                .borrow_mut()
                .push((request.endpoint.to_string(), request.updated_since));
            Ok(self.collection.clone())
        }
    }

    struct FailingSource;

    impl RemoteSource for FailingSource {
        fn fetch(&self, _request: &FetchRequest<'_>) -> Result<RemoteCollection> {
            Err(Error::InvalidInput("connection refused".to_string()))
        }
    }

    #[test]
    fn destroy_reconciles_create_update_and_remove() {
        let db = Database::open_in_memory().unwrap();
        let store = store(&db);
        let timestamps = SqliteTimestampRepository::new(db.connection());
        let registry = registry();
        seed(&store, "rental", None, &[(1, "A"), (2, "B"), (3, "C")]);

        let synchronizer = Synchronizer::new(&store, &timestamps, &registry).with_clock(now);
        let result = synchronizer
            .synchronize(
                SyncRequest::new("rental")
                    .with_remote(vec![named(2, "X"), named(4, "Y")])
                    .with_overrides(SyncOverrides::new().remove(RemovePolicy::Destroy)),
            )
            .unwrap();

        assert_eq!((result.created, result.updated, result.removed), (1, 1, 2));
        assert_eq!(result.unchanged, 0);
        assert_eq!(result.outcome(), SyncOutcome::Succeeded);
        assert_eq!(
            names(&store, "rental", None),
            vec![
                ("2".to_string(), json!("X")),
                ("4".to_string(), json!("Y"))
            ]
        );
        assert_eq!(synchronizer.last_synced_at("rental", None).unwrap(), Some(now()));
    }

    #[test]
    fn second_run_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let store = store(&db);
        let timestamps = SqliteTimestampRepository::new(db.connection());
        let registry = registry();
        let synchronizer = Synchronizer::new(&store, &timestamps, &registry);
        let request = SyncRequest::new("location")
            .with_remote(vec![named(1, "Harbor"), named(2, "Hill")])
            .with_overrides(SyncOverrides::new().remove(RemovePolicy::Destroy));

        let first = synchronizer.synchronize(request.clone()).unwrap();
        assert_eq!(first.created, 2);

        let before = store.list(None, "location").unwrap();
        let second = synchronizer.synchronize(request).unwrap();

        assert_eq!((second.created, second.updated, second.removed), (0, 0, 0));
        assert_eq!(second.unchanged, 2);
        assert_eq!(store.list(None, "location").unwrap(), before);
    }

    #[test]
    fn remove_off_leaves_missing_records() {
        let db = Database::open_in_memory().unwrap();
        let store = store(&db);
        let timestamps = SqliteTimestampRepository::new(db.connection());
        let registry = registry();
        seed(&store, "location", None, &[(1, "A"), (2, "B")]);

        let result = Synchronizer::new(&store, &timestamps, &registry)
            .synchronize(SyncRequest::new("location").with_remote(vec![named(2, "B")]))
            .unwrap();

        assert_eq!((result.removed, result.unchanged), (0, 1));
        assert_eq!(store.list(None, "location").unwrap().len(), 2);
    }

    #[test]
    fn mark_as_missing_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let store = store(&db);
        let timestamps = SqliteTimestampRepository::new(db.connection());
        let registry = registry();
        seed(&store, "rental", None, &[(1, "A"), (2, "B")]);

        let synchronizer = Synchronizer::new(&store, &timestamps, &registry);
        let request = SyncRequest::new("rental")
            .with_remote(vec![named(2, "B")])
            .with_overrides(SyncOverrides::new().remove(RemovePolicy::MarkAsMissing));

        let first = synchronizer.synchronize(request.clone()).unwrap();
        assert_eq!((first.removed, first.unchanged), (1, 1));

        let marked = store.list(None, "rental").unwrap();
        assert!(marked[0].is_marked_missing("canceled_at"));
        assert!(!marked[1].is_marked_missing("canceled_at"));

        let second = synchronizer.synchronize(request).unwrap();
        assert_eq!((second.removed, second.unchanged), (0, 2));
        assert_eq!(store.list(None, "rental").unwrap(), marked);
    }

    #[test]
    fn auto_removal_follows_marker_support() {
        let db = Database::open_in_memory().unwrap();
        let store = store(&db);
        let timestamps = SqliteTimestampRepository::new(db.connection());
        let registry = registry();
        seed(&store, "rental", None, &[(1, "A")]);
        seed(&store, "location", None, &[(1, "A")]);

        let synchronizer = Synchronizer::new(&store, &timestamps, &registry);
        let auto = SyncOverrides::new().remove(RemovePolicy::Auto);

        let rentals = synchronizer
            .synchronize(
                SyncRequest::new("rental")
                    .with_remote(RemoteCollection::default())
                    .with_overrides(auto.clone()),
            )
            .unwrap();
        assert_eq!(rentals.removed, 1);
        assert!(store.list(None, "rental").unwrap()[0].is_marked_missing("canceled_at"));

        let locations = synchronizer
            .synchronize(
                SyncRequest::new("location")
                    .with_remote(RemoteCollection::default())
                    .with_overrides(auto),
            )
            .unwrap();
        assert_eq!(locations.removed, 1);
        assert!(store.list(None, "location").unwrap().is_empty());
    }

    #[test]
    fn scope_limits_reconciliation() {
        let db = Database::open_in_memory().unwrap();
        let store = store(&db);
        let timestamps = SqliteTimestampRepository::new(db.connection());
        let registry = registry();
        let first = store
            .create(None, "account", attrs(json!({ "name": "first" })))
            .unwrap();
        let second = store
            .create(None, "account", attrs(json!({ "name": "second" })))
            .unwrap();
        let first = Scope::of(&first);
        let second = Scope::of(&second);
        seed(&store, "rental", Some(&first), &[(1, "A")]);
        seed(&store, "rental", Some(&second), &[(1, "A"), (2, "B")]);

        let synchronizer = Synchronizer::new(&store, &timestamps, &registry).with_clock(now);
        let result = synchronizer
            .synchronize(
                SyncRequest::new("rental")
                    .with_scope(first.clone())
                    .with_remote(vec![named(3, "C")])
                    .with_overrides(SyncOverrides::new().remove(RemovePolicy::Destroy)),
            )
            .unwrap();

        assert_eq!((result.created, result.removed), (1, 1));
        assert_eq!(
            names(&store, "rental", Some(&first)),
            vec![("3".to_string(), json!("C"))]
        );
        assert_eq!(names(&store, "rental", Some(&second)).len(), 2);
        assert_eq!(
            synchronizer.last_synced_at("rental", Some(&first)).unwrap(),
            Some(now())
        );
        assert_eq!(
            synchronizer.last_synced_at("rental", Some(&second)).unwrap(),
            None
        );
    }

    #[test]
    fn snapshot_and_sync_stamp_are_written() {
        let db = Database::open_in_memory().unwrap();
        let store = store(&db);
        let timestamps = SqliteTimestampRepository::new(db.connection());
        let registry = registry();

        Synchronizer::new(&store, &timestamps, &registry)
            .with_clock(now)
            .synchronize(
                SyncRequest::new("booking")
                    .with_remote(vec![named(1, "Stay").with_attribute("nights", 3)]),
            )
            .unwrap();

        let booking = &store.list(None, "booking").unwrap()[0];
        assert_eq!(
            booking.attribute("synced_data"),
            Some(&json!({ "id": "1", "name": "Stay", "nights": 3 }))
        );
        assert_eq!(
            booking.attribute("synced_all_at"),
            Some(&json!("2024-06-01T09:30:00.000Z"))
        );
        assert_eq!(booking.attribute("nights"), None);
    }

    #[test]
    fn delta_removes_only_explicit_deleted_ids() {
        let db = Database::open_in_memory().unwrap();
        let store = store(&db);
        let timestamps = SqliteTimestampRepository::new(db.connection());
        let registry = registry();
        seed(&store, "booking", None, &[(1, "A"), (2, "B"), (3, "C")]);
        timestamps
            .insert(None, "booking", now() - Duration::days(1))
            .unwrap();

        let source = StubSource {
            collection: RemoteCollection::new(vec![named(2, "B2")])
                .with_deleted_ids([RemoteId::new("3")]),
            ..StubSource::default()
        };
        let result = Synchronizer::new(&store, &timestamps, &registry)
            .with_source(&source)
            .with_clock(now)
            .synchronize(
                SyncRequest::new("booking")
                    .with_overrides(SyncOverrides::new().remove(RemovePolicy::Destroy)),
            )
            .unwrap();

        assert_eq!(
            source.requests.borrow().as_slice(),
            &[("booking".to_string(), Some(now() - Duration::days(1)))]
        );
        assert_eq!((result.updated, result.removed), (1, 1));
        assert_eq!(
            names(&store, "booking", None),
            vec![
                ("1".to_string(), json!("A")),
                ("2".to_string(), json!("B2"))
            ]
        );
        let booking = &store.list(None, "booking").unwrap()[1];
        assert_eq!(
            booking.attribute("synced_all_at"),
            Some(&json!("2024-06-01T09:30:00.000Z"))
        );
    }

    #[test]
    fn delta_deleted_ids_mark_records_as_missing() {
        let db = Database::open_in_memory().unwrap();
        let store = store(&db);
        let timestamps = SqliteTimestampRepository::new(db.connection());
        let registry = registry();
        seed(&store, "rental", None, &[(1, "A"), (2, "B"), (3, "C")]);
        let already_marked = store
            .mark_missing(&store.list(None, "rental").unwrap()[2])
            .unwrap();
        timestamps
            .insert(None, "rental", now() - Duration::days(1))
            .unwrap();

        let result = Synchronizer::new(&store, &timestamps, &registry)
            .with_clock(now)
            .synchronize(
                SyncRequest::new("rental")
                    .with_remote(
                        RemoteCollection::new(vec![named(1, "A1")]).with_deleted_ids([
                            RemoteId::new("2"),
                            RemoteId::new("3"),
                            RemoteId::new("99"),
                        ]),
                    )
                    .with_overrides(
                        SyncOverrides::new()
                            .only_updated(true)
                            .remove(RemovePolicy::MarkAsMissing),
                    ),
            )
            .unwrap();

        assert_eq!((result.updated, result.removed, result.unchanged), (1, 1, 1));
        let rentals = store.list(None, "rental").unwrap();
        assert_eq!(rentals.len(), 3);
        assert!(!rentals[0].is_marked_missing("canceled_at"));
        assert!(rentals[1].is_marked_missing("canceled_at"));
        assert_eq!(rentals[2], already_marked);
    }

    #[test]
    fn delta_with_many_ids_still_reconciles() {
        let db = Database::open_in_memory().unwrap();
        let store = store(&db);
        let timestamps = SqliteTimestampRepository::new(db.connection());
        let registry = registry();
        seed(&store, "booking", None, &[(1, "A"), (2, "B")]);
        timestamps
            .insert(None, "booking", now() - Duration::days(1))
            .unwrap();

        let deleted = std::iter::once(1)
            .chain(3..40_000)
            .map(|id: i64| RemoteId::new(id.to_string()));
        let synchronizer = Synchronizer::new(&store, &timestamps, &registry).with_clock(now);
        let result = synchronizer
            .synchronize(
                SyncRequest::new("booking")
                    .with_remote(RemoteCollection::new(vec![named(2, "B2")]).with_deleted_ids(deleted))
                    .with_overrides(SyncOverrides::new().remove(RemovePolicy::Destroy)),
            )
            .unwrap();

        assert_eq!((result.updated, result.removed), (1, 1));
        assert_eq!(
            names(&store, "booking", None),
            vec![("2".to_string(), json!("B2"))]
        );
        assert_eq!(synchronizer.last_synced_at("booking", None).unwrap(), Some(now()));
    }

    #[test]
    fn delta_without_deleted_ids_removes_nothing() {
        let db = Database::open_in_memory().unwrap();
        let store = store(&db);
        let timestamps = SqliteTimestampRepository::new(db.connection());
        let registry = registry();
        seed(&store, "booking", None, &[(1, "A"), (2, "B")]);
        timestamps
            .insert(None, "booking", now() - Duration::hours(2))
            .unwrap();

        let result = Synchronizer::new(&store, &timestamps, &registry)
            .with_clock(now)
            .synchronize(
                SyncRequest::new("booking")
                    .with_remote(vec![named(3, "C")])
                    .with_overrides(SyncOverrides::new().remove(RemovePolicy::Destroy)),
            )
            .unwrap();

        assert_eq!((result.created, result.removed), (1, 0));
        assert_eq!(store.list(None, "booking").unwrap().len(), 3);
    }

    #[test]
    fn first_delta_run_reconciles_full_collection() {
        let db = Database::open_in_memory().unwrap();
        let store = store(&db);
        let timestamps = SqliteTimestampRepository::new(db.connection());
        let registry = registry();
        seed(&store, "booking", None, &[(1, "A"), (2, "B")]);

        let source = StubSource {
            collection: RemoteCollection::new(vec![named(2, "B")]),
            ..StubSource::default()
        };
        let result = Synchronizer::new(&store, &timestamps, &registry)
            .with_source(&source)
            .synchronize(
                SyncRequest::new("booking")
                    .with_overrides(SyncOverrides::new().remove(RemovePolicy::Destroy)),
            )
            .unwrap();

        assert_eq!(source.requests.borrow()[0].1, None);
        assert_eq!(result.removed, 1);
        assert_eq!(names(&store, "booking", None).len(), 1);
    }

    #[test]
    fn deleted_at_markers_signal_deletion() {
        let db = Database::open_in_memory().unwrap();
        let store = store(&db);
        let timestamps = SqliteTimestampRepository::new(db.connection());
        let registry = registry();
        seed(&store, "booking", None, &[(1, "A"), (2, "B")]);
        timestamps.insert(None, "booking", now()).unwrap();

        let result = Synchronizer::new(&store, &timestamps, &registry)
            .with_clock(now)
            .synchronize(
                SyncRequest::new("booking")
                    .with_remote(vec![named(1, "A").with_deleted_at(now())])
                    .with_overrides(SyncOverrides::new().remove(RemovePolicy::Destroy)),
            )
            .unwrap();

        assert_eq!((result.created, result.updated, result.removed), (0, 0, 1));
        assert_eq!(
            names(&store, "booking", None),
            vec![("2".to_string(), json!("B"))]
        );
    }

    #[test]
    fn deleted_at_is_plain_data_in_full_mode() {
        let db = Database::open_in_memory().unwrap();
        let store = store(&db);
        let timestamps = SqliteTimestampRepository::new(db.connection());
        let registry = registry();

        let result = Synchronizer::new(&store, &timestamps, &registry)
            .synchronize(
                SyncRequest::new("location")
                    .with_remote(vec![named(1, "A").with_deleted_at(now())])
                    .with_overrides(SyncOverrides::new().remove(RemovePolicy::Destroy)),
            )
            .unwrap();

        assert_eq!((result.created, result.removed), (1, 0));
    }

    #[test]
    fn associations_sync_within_parent_scope() {
        let db = Database::open_in_memory().unwrap();
        let store = store(&db);
        let timestamps = SqliteTimestampRepository::new(db.connection());
        let registry = registry();
        let synchronizer = Synchronizer::new(&store, &timestamps, &registry).with_clock(now);

        let remote = vec![
            named(1, "Harbor").with_association(
                "photo",
                vec![
                    RemoteRecord::new(10).with_attribute("filename", "a.jpg"),
                    RemoteRecord::new(11).with_attribute("filename", "b.jpg"),
                ],
            ),
            named(2, "Hill").with_attribute("photo", json!([{ "id": 12, "filename": "c.jpg" }])),
            named(3, "Lake"),
        ];
        let destroy = SyncOverrides::new().remove(RemovePolicy::Destroy);
        let result = synchronizer
            .synchronize(
                SyncRequest::new("location")
                    .with_remote(remote)
                    .with_overrides(destroy.clone()),
            )
            .unwrap();

        assert_eq!(result.created, 3);
        assert_eq!(result.associations["photo"].created, 3);

        let harbor = Scope::of(&store.list(None, "location").unwrap()[0]);
        assert_eq!(store.list(Some(&harbor), "photo").unwrap().len(), 2);

        let result = synchronizer
            .synchronize(
                SyncRequest::new("location")
                    .with_remote(vec![named(1, "Harbor").with_association(
                        "photo",
                        vec![RemoteRecord::new(11).with_attribute("filename", "b2.jpg")],
                    )])
                    .with_overrides(destroy),
            )
            .unwrap();

        let photos = &result.associations["photo"];
        assert_eq!((photos.updated, photos.removed), (1, 1));
        assert_eq!(result.removed, 2);
        let remaining = store.list(Some(&harbor), "photo").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].attribute("filename"), Some(&json!("b2.jpg")));
        assert!(timestamps
            .list(&TimestampKey::Model { model: "photo" })
            .unwrap()
            .is_empty());
    }

    #[test]
    fn mapping_failures_are_reported_per_record() {
        let db = Database::open_in_memory().unwrap();
        let store = store(&db);
        let timestamps = SqliteTimestampRepository::new(db.connection());
        let registry = registry();
        let strict = FnMapper::new("strict", |remote: &RemoteRecord, _: &[String]| {
            let name = remote
                .attribute("name")
                .cloned()
                .ok_or_else(|| Error::Mapping(format!("{} has no name", remote.id)))?;
            Ok(attrs(json!({ "name": name })))
        });

        let synchronizer = Synchronizer::new(&store, &timestamps, &registry).with_clock(now);
        let result = synchronizer
            .synchronize(
                SyncRequest::new("location")
                    .with_remote(vec![named(1, "A"), RemoteRecord::new(2), named(3, "C")])
                    .with_overrides(SyncOverrides::new().mapper(strict)),
            )
            .unwrap();

        assert_eq!(result.created, 2);
        assert_eq!(result.outcome(), SyncOutcome::PartiallySucceeded);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].remote_id, Some(RemoteId::new("2")));
        assert_eq!(result.errors[0].kind, RecordErrorKind::Mapping);
        assert_eq!(synchronizer.last_synced_at("location", None).unwrap(), Some(now()));
    }

    #[test]
    fn fatal_mapping_errors_abort_without_watermark() {
        let db = Database::open_in_memory().unwrap();
        let store = store(&db);
        let timestamps = SqliteTimestampRepository::new(db.connection());
        let registry = registry();
        let failing = FnMapper::new("failing", |remote: &RemoteRecord, _: &[String]| {
            if remote.id.as_str() == "2" {
                Err(Error::Mapping("unsupported".to_string()))
            } else {
                Ok(Attributes::new())
            }
        });

        let synchronizer = Synchronizer::new(&store, &timestamps, &registry);
        let result = synchronizer.synchronize(
            SyncRequest::new("location")
                .with_remote(vec![named(1, "A"), named(2, "B"), named(3, "C")])
                .with_overrides(
                    SyncOverrides::new()
                        .mapper(failing)
                        .fatal_mapping_errors(true),
                ),
        );

        assert!(matches!(result, Err(Error::Mapping(_))));
        assert_eq!(store.list(None, "location").unwrap().len(), 1);
        assert_eq!(synchronizer.last_synced_at("location", None).unwrap(), None);
    }

    #[test]
    fn store_failures_are_reported_or_fatal() {
        let db = Database::open_in_memory().unwrap();
        let store = store(&db);
        let timestamps = SqliteTimestampRepository::new(db.connection());
        let registry = registry();
        let synchronizer = Synchronizer::new(&store, &timestamps, &registry);
        let remote = vec![named(1, "A"), named(2, "B").with_attribute("color", "red")];
        let overrides = SyncOverrides::new().local_attributes(["name", "color"]);

        let result = synchronizer
            .synchronize(
                SyncRequest::new("location")
                    .with_remote(remote.clone())
                    .with_overrides(overrides.clone()),
            )
            .unwrap();
        assert_eq!(result.created, 1);
        assert_eq!(result.errors[0].kind, RecordErrorKind::Persistence);
        assert_eq!(result.errors[0].remote_id, Some(RemoteId::new("2")));

        let result = synchronizer.synchronize(
            SyncRequest::new("location")
                .with_remote(remote)
                .with_overrides(overrides.fatal_store_errors(true)),
        );
        assert!(matches!(result, Err(Error::Validation { .. })));
    }

    #[test]
    fn failed_records_are_not_removed() {
        let db = Database::open_in_memory().unwrap();
        let store = store(&db);
        let timestamps = SqliteTimestampRepository::new(db.connection());
        let registry = registry();
        seed(&store, "location", None, &[(1, "A"), (2, "B"), (3, "C")]);

        let result = Synchronizer::new(&store, &timestamps, &registry)
            .synchronize(
                SyncRequest::new("location")
                    .with_remote(vec![named(1, "A"), named(2, "B").with_attribute("color", "red")])
                    .with_overrides(
                        SyncOverrides::new()
                            .local_attributes(["name", "color"])
                            .remove(RemovePolicy::Destroy),
                    ),
            )
            .unwrap();

        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].remote_id, Some(RemoteId::new("2")));
        assert_eq!((result.unchanged, result.removed), (1, 1));
        assert_eq!(
            names(&store, "location", None),
            vec![
                ("1".to_string(), json!("A")),
                ("2".to_string(), json!("B"))
            ]
        );
    }

    #[test]
    fn fetch_failure_touches_nothing() {
        let db = Database::open_in_memory().unwrap();
        let store = store(&db);
        let timestamps = SqliteTimestampRepository::new(db.connection());
        let registry = registry();
        seed(&store, "location", None, &[(1, "A")]);

        let synchronizer = Synchronizer::new(&store, &timestamps, &registry).with_source(&FailingSource);
        let result = synchronizer.synchronize(
            SyncRequest::new("location")
                .with_overrides(SyncOverrides::new().remove(RemovePolicy::Destroy)),
        );

        assert!(matches!(result, Err(Error::Fetch(message)) if message.contains("connection refused")));
        assert_eq!(store.list(None, "location").unwrap().len(), 1);
        assert_eq!(synchronizer.last_synced_at("location", None).unwrap(), None);
    }

    #[test]
    fn missing_source_is_a_configuration_error() {
        let db = Database::open_in_memory().unwrap();
        let store = store(&db);
        let timestamps = SqliteTimestampRepository::new(db.connection());
        let registry = registry();

        let result = Synchronizer::new(&store, &timestamps, &registry)
            .synchronize(SyncRequest::new("location"));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn server_synced_at_becomes_watermark() {
        let db = Database::open_in_memory().unwrap();
        let store = store(&db);
        let timestamps = SqliteTimestampRepository::new(db.connection());
        let registry = registry();
        let server_time = now() - Duration::minutes(5);

        let synchronizer = Synchronizer::new(&store, &timestamps, &registry).with_clock(now);
        synchronizer
            .synchronize(
                SyncRequest::new("location")
                    .with_remote(RemoteCollection::new(vec![named(1, "A")]).with_synced_at(server_time)),
            )
            .unwrap();
        assert_eq!(
            synchronizer.last_synced_at("location", None).unwrap(),
            Some(server_time)
        );

        synchronizer
            .synchronize(
                SyncRequest::new("location").with_remote(
                    RemoteCollection::new(Vec::new()).with_synced_at(server_time - Duration::hours(1)),
                ),
            )
            .unwrap();
        assert_eq!(
            synchronizer.last_synced_at("location", None).unwrap(),
            Some(server_time)
        );
    }

    #[test]
    fn reset_watermark_forces_full_fetch() {
        let db = Database::open_in_memory().unwrap();
        let store = store(&db);
        let timestamps = SqliteTimestampRepository::new(db.connection());
        let registry = registry();
        let source = StubSource::default();
        let synchronizer = Synchronizer::new(&store, &timestamps, &registry)
            .with_source(&source)
            .with_clock(now);

        synchronizer.synchronize(SyncRequest::new("booking")).unwrap();
        synchronizer.synchronize(SyncRequest::new("booking")).unwrap();
        assert_eq!(synchronizer.reset_watermark("booking", None).unwrap(), 1);
        synchronizer.synchronize(SyncRequest::new("booking")).unwrap();

        let since: Vec<_> = source.requests.borrow().iter().map(|(_, since)| *since).collect();
        assert_eq!(since, vec![None, Some(now()), None]);
    }

    #[test]
    fn configuration_errors_fail_before_writes() {
        let db = Database::open_in_memory().unwrap();
        let store = store(&db);
        let timestamps = SqliteTimestampRepository::new(db.connection());
        let registry = registry()
            .with_model("photo", SyncOptions::new().associations(["location"]));
        let synchronizer = Synchronizer::new(&store, &timestamps, &registry);

        let cyclic = synchronizer.synchronize(
            SyncRequest::new("location").with_remote(vec![named(1, "A")]),
        );
        assert!(matches!(cyclic, Err(Error::Config(_))));

        let undeclared = synchronizer.synchronize(
            SyncRequest::new("rental")
                .with_remote(vec![named(1, "A")])
                .with_overrides(SyncOverrides::new().associations(["review"])),
        );
        assert!(matches!(undeclared, Err(Error::Config(_))));

        let unmarked = synchronizer.synchronize(
            SyncRequest::new("rental")
                .with_remote(vec![named(1, "A")])
                .with_overrides(SyncOverrides::new().remove(RemovePolicy::MarkAsMissing)),
        );
        assert!(unmarked.is_ok());

        let no_marker = synchronizer.synchronize(
            SyncRequest::new("booking")
                .with_remote(vec![named(2, "B")])
                .with_overrides(SyncOverrides::new().remove(RemovePolicy::MarkAsMissing)),
        );
        assert!(matches!(no_marker, Err(Error::Config(_))));

        assert_eq!(store.list(None, "location").unwrap().len(), 0);
        assert_eq!(store.list(None, "booking").unwrap().len(), 0);
        assert_eq!(
            timestamps
                .list(&TimestampKey::Model { model: "location" })
                .unwrap()
                .len(),
            0
        );
    }

    #[test]
    fn record_ids_sort_missing_removals() {
        let db = Database::open_in_memory().unwrap();
        let store = store(&db);
        let timestamps = SqliteTimestampRepository::new(db.connection());
        let registry = registry();
        seed(&store, "rental", None, &[(5, "E"), (3, "C"), (4, "D")]);

        let result = Synchronizer::new(&store, &timestamps, &registry)
            .synchronize(
                SyncRequest::new("rental")
                    .with_remote(RemoteCollection::default())
                    .with_overrides(SyncOverrides::new().remove(RemovePolicy::MarkAsMissing)),
            )
            .unwrap();

        assert_eq!(result.removed, 3);
        let ids: Vec<RecordId> = store
            .list(None, "rental")
            .unwrap()
            .iter()
            .filter(|record| record.is_marked_missing("canceled_at"))
            .map(|record| record.id)
            .collect();
        assert_eq!(ids.len(), 3);
    }
}

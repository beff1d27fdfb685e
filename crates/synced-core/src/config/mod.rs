//! Synchronization options.
//!
//! Each model registers a `SyncOptions` bundle in a `ModelRegistry`. A call
//! may override parts of it with `SyncOverrides`; `ModelRegistry::resolve`
//! merges both, consults the record store's schema once, and yields the
//! `ResolvedOptions` the synchronizer runs with.

mod file;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::db::RecordStore;
use crate::error::{Error, Result};
use crate::sync::mapper::{DefaultMapper, Mapper};

pub use file::{ModelConfig, SyncedConfig};

/// Default column holding the remote ID
pub const DEFAULT_ID_KEY: &str = "synced_id";
/// Column holding the raw remote payload, used when the model has it
pub const DEFAULT_DATA_KEY: &str = "synced_data";
/// Column stamped with the sync time in delta mode, used when the model has it
pub const DEFAULT_ALL_AT_KEY: &str = "synced_all_at";

/// What happens to local records that disappeared remotely
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemovePolicy {
    /// Leave them untouched
    #[default]
    Off,
    /// Delete them from the store
    Destroy,
    /// Set the model's missing marker
    MarkAsMissing,
    /// Mark as missing when the model has a marker column, destroy otherwise
    Auto,
}

impl fmt::Display for RemovePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Off => "off",
            Self::Destroy => "destroy",
            Self::MarkAsMissing => "mark-as-missing",
            Self::Auto => "auto",
        };
        f.write_str(name)
    }
}

impl FromStr for RemovePolicy {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" | "false" | "none" => Ok(Self::Off),
            "destroy" | "true" => Ok(Self::Destroy),
            "mark-as-missing" | "mark_as_missing" => Ok(Self::MarkAsMissing),
            "auto" => Ok(Self::Auto),
            other => Err(Error::InvalidInput(format!(
                "unknown remove policy `{other}`"
            ))),
        }
    }
}

/// Removal policy after schema resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    Off,
    Destroy,
    MarkAsMissing { marker: String },
}

/// Model-level synchronization defaults
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Column holding the remote ID (`synced_id` when unset)
    pub id_key: Option<String>,
    /// Column stamped with the sync time in delta mode
    pub all_at_key: Option<String>,
    /// Column holding the raw remote payload
    pub data_key: Option<String>,
    /// Remote attributes copied verbatim into same-named local columns
    pub local_attributes: Vec<String>,
    /// Nested associations to recurse into, by registered model name
    pub associations: Vec<String>,
    /// Fetch only records changed since the watermark
    pub only_updated: Option<bool>,
    pub remove: RemovePolicy,
    /// Mapping override; the default mapper copies `local_attributes`
    pub mapper: Option<Arc<dyn Mapper>>,
    /// API endpoint for fetches (the model name when unset); may hold
    /// `{scope_model}` and `{scope_id}` placeholders
    pub endpoint: Option<String>,
    /// Abort the run on the first mapping failure
    pub fatal_mapping_errors: bool,
    /// Abort the run on the first store failure
    pub fatal_store_errors: bool,
}

impl SyncOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn id_key(mut self, key: impl Into<String>) -> Self {
        self.id_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn all_at_key(mut self, key: impl Into<String>) -> Self {
        self.all_at_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn data_key(mut self, key: impl Into<String>) -> Self {
        self.data_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn local_attributes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.local_attributes = names.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn associations<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.associations = names.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub const fn only_updated(mut self, enabled: bool) -> Self {
        self.only_updated = Some(enabled);
        self
    }

    #[must_use]
    pub const fn remove(mut self, policy: RemovePolicy) -> Self {
        self.remove = policy;
        self
    }

    #[must_use]
    pub fn mapper(mut self, mapper: impl Mapper + 'static) -> Self {
        self.mapper = Some(Arc::new(mapper));
        self
    }

    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub const fn fatal_mapping_errors(mut self, fatal: bool) -> Self {
        self.fatal_mapping_errors = fatal;
        self
    }

    #[must_use]
    pub const fn fatal_store_errors(mut self, fatal: bool) -> Self {
        self.fatal_store_errors = fatal;
        self
    }
}

/// Per-call overrides of a model's `SyncOptions`.
///
/// `remove` and the fatal flags carry into association syncs; the others only
/// apply to the model being synchronized. Association syncs always reconcile
/// the full nested collection.
#[derive(Debug, Clone, Default)]
pub struct SyncOverrides {
    pub remove: Option<RemovePolicy>,
    pub only_updated: Option<bool>,
    pub local_attributes: Option<Vec<String>>,
    pub associations: Option<Vec<String>>,
    pub mapper: Option<Arc<dyn Mapper>>,
    pub fatal_mapping_errors: Option<bool>,
    pub fatal_store_errors: Option<bool>,
}

impl SyncOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn remove(mut self, policy: RemovePolicy) -> Self {
        self.remove = Some(policy);
        self
    }

    #[must_use]
    pub const fn only_updated(mut self, enabled: bool) -> Self {
        self.only_updated = Some(enabled);
        self
    }

    #[must_use]
    pub fn local_attributes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.local_attributes = Some(names.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn associations<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.associations = Some(names.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn mapper(mut self, mapper: impl Mapper + 'static) -> Self {
        self.mapper = Some(Arc::new(mapper));
        self
    }

    #[must_use]
    pub const fn fatal_mapping_errors(mut self, fatal: bool) -> Self {
        self.fatal_mapping_errors = Some(fatal);
        self
    }

    #[must_use]
    pub const fn fatal_store_errors(mut self, fatal: bool) -> Self {
        self.fatal_store_errors = Some(fatal);
        self
    }

    /// The part of these overrides that association syncs inherit
    fn inherited(&self) -> Self {
        Self {
            remove: self.remove,
            only_updated: Some(false),
            fatal_mapping_errors: self.fatal_mapping_errors,
            fatal_store_errors: self.fatal_store_errors,
            ..Self::default()
        }
    }
}

/// Fully resolved options for one model within one run
#[derive(Debug, Clone)]
pub struct ResolvedOptions {
    pub model: String,
    pub id_key: String,
    pub all_at_key: Option<String>,
    pub data_key: Option<String>,
    pub local_attributes: Vec<String>,
    pub only_updated: bool,
    pub remove: Removal,
    pub mapper: Arc<dyn Mapper>,
    pub endpoint: String,
    pub fatal_mapping_errors: bool,
    pub fatal_store_errors: bool,
    /// Resolved options of each association, in declaration order
    pub associations: Vec<ResolvedOptions>,
}

/// Registered models and their synchronization defaults
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, SyncOptions>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a model's defaults
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>, options: SyncOptions) -> Self {
        self.register(model, options);
        self
    }

    /// Register (or replace) a model's defaults
    pub fn register(&mut self, model: impl Into<String>, options: SyncOptions) {
        self.models.insert(model.into(), options);
    }

    /// Defaults registered for a model
    pub fn get(&self, model: &str) -> Option<&SyncOptions> {
        self.models.get(model)
    }

    /// Registered model names
    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// Merge a model's defaults with call overrides and the store's schema.
    ///
    /// Every configuration problem in the association tree surfaces here,
    /// before a single record is read or written.
    pub fn resolve(
        &self,
        model: &str,
        overrides: &SyncOverrides,
        store: &dyn RecordStore,
    ) -> Result<ResolvedOptions> {
        let mut path = Vec::new();
        self.resolve_model(model, overrides, store, &mut path)
    }

    fn resolve_model(
        &self,
        model: &str,
        overrides: &SyncOverrides,
        store: &dyn RecordStore,
        path: &mut Vec<String>,
    ) -> Result<ResolvedOptions> {
        if path.iter().any(|visited| visited == model) {
            path.push(model.to_string());
            return Err(Error::Config(format!(
                "association cycle is not supported: {}",
                path.join(" -> ")
            )));
        }

        let options = self
            .models
            .get(model)
            .ok_or_else(|| Error::Config(format!("model `{model}` is not registered")))?;

        let id_key = options
            .id_key
            .clone()
            .unwrap_or_else(|| DEFAULT_ID_KEY.to_string());
        if id_key.contains('"') {
            return Err(Error::Config(format!(
                "id key `{id_key}` of `{model}` must not contain `\"`"
            )));
        }
        if !store.has_column(model, &id_key) {
            return Err(Error::Config(format!(
                "model `{model}` has no `{id_key}` column to hold remote ids"
            )));
        }

        let data_key = column_or_default(store, model, options.data_key.as_ref(), DEFAULT_DATA_KEY);
        let all_at_key =
            column_or_default(store, model, options.all_at_key.as_ref(), DEFAULT_ALL_AT_KEY);
        let only_updated = overrides
            .only_updated
            .or(options.only_updated)
            .unwrap_or_else(|| {
                all_at_key
                    .as_deref()
                    .is_some_and(|key| store.has_column(model, key))
            });

        let remove = match overrides.remove.unwrap_or(options.remove) {
            RemovePolicy::Off => Removal::Off,
            RemovePolicy::Destroy => Removal::Destroy,
            RemovePolicy::MarkAsMissing => {
                let marker = store.missing_marker(model).ok_or_else(|| {
                    Error::Config(format!(
                        "model `{model}` cannot be marked as missing: no marker column"
                    ))
                })?;
                Removal::MarkAsMissing { marker }
            }
            RemovePolicy::Auto => store
                .missing_marker(model)
                .map_or(Removal::Destroy, |marker| Removal::MarkAsMissing { marker }),
        };

        let association_names = overrides
            .associations
            .clone()
            .unwrap_or_else(|| options.associations.clone());

        path.push(model.to_string());
        let inherited = overrides.inherited();
        let mut associations = Vec::with_capacity(association_names.len());
        for name in &association_names {
            if !self.models.contains_key(name) {
                return Err(Error::Config(format!(
                    "association `{name}` of `{model}` is not a registered model"
                )));
            }
            associations.push(self.resolve_model(name, &inherited, store, path)?);
        }
        path.pop();

        Ok(ResolvedOptions {
            model: model.to_string(),
            id_key,
            all_at_key,
            data_key,
            local_attributes: overrides
                .local_attributes
                .clone()
                .unwrap_or_else(|| options.local_attributes.clone()),
            only_updated,
            remove,
            mapper: overrides
                .mapper
                .clone()
                .or_else(|| options.mapper.clone())
                .unwrap_or_else(|| Arc::new(DefaultMapper)),
            endpoint: options
                .endpoint
                .clone()
                .unwrap_or_else(|| model.to_string()),
            fatal_mapping_errors: overrides
                .fatal_mapping_errors
                .unwrap_or(options.fatal_mapping_errors),
            fatal_store_errors: overrides
                .fatal_store_errors
                .unwrap_or(options.fatal_store_errors),
            associations,
        })
    }
}

/// Explicit key, else `default` when the model has that column
fn column_or_default(
    store: &dyn RecordStore,
    model: &str,
    explicit: Option<&String>,
    default: &str,
) -> Option<String> {
    explicit
        .cloned()
        .or_else(|| store.has_column(model, default).then(|| default.to_string()))
}

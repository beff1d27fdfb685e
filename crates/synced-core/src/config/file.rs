//! JSON configuration file describing the synchronized models

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{ModelRegistry, RemovePolicy, SyncOptions};
use crate::error::{Error, Result};
use crate::models::ModelSchema;
use crate::sync::mapper::RenameMapper;
use crate::util::{is_http_url, normalize_text_option};

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncedConfig {
    /// Base URL of the remote API
    pub api_url: Option<String>,
    /// Models by name
    pub models: BTreeMap<String, ModelConfig>,
}

/// One model: its local columns plus its synchronization defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    pub columns: Vec<String>,
    /// Soft-delete column, added to `columns` implicitly
    pub missing_marker: Option<String>,
    pub id_key: Option<String>,
    pub all_at_key: Option<String>,
    pub data_key: Option<String>,
    pub local_attributes: Vec<String>,
    pub associations: Vec<String>,
    pub only_updated: Option<bool>,
    pub remove: RemovePolicy,
    pub endpoint: Option<String>,
    /// Remote field name → local column name
    pub rename: BTreeMap<String, String>,
    pub fatal_mapping_errors: bool,
    pub fatal_store_errors: bool,
}

impl SyncedConfig {
    /// Load and validate a configuration file
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|error| {
            Error::Config(format!("cannot read {}: {error}", path.display()))
        })?;
        Self::parse(&raw)
    }

    /// Parse and validate configuration JSON
    pub fn parse(raw: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(raw)
            .map_err(|error| Error::Config(format!("invalid configuration: {error}")))?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    fn normalize(&mut self) {
        self.api_url = normalize_text_option(self.api_url.take())
            .map(|url| url.trim_end_matches('/').to_string());

        for model in self.models.values_mut() {
            model.missing_marker = normalize_text_option(model.missing_marker.take());
            model.id_key = normalize_text_option(model.id_key.take());
            model.all_at_key = normalize_text_option(model.all_at_key.take());
            model.data_key = normalize_text_option(model.data_key.take());
            model.endpoint = normalize_text_option(model.endpoint.take());
        }
    }

    fn validate(&self) -> Result<()> {
        if let Some(url) = &self.api_url {
            if !is_http_url(url) {
                return Err(Error::Config(
                    "api_url must include http:// or https://".to_string(),
                ));
            }
        }

        for (name, model) in &self.models {
            if let Some(missing) = model
                .associations
                .iter()
                .find(|association| !self.models.contains_key(*association))
            {
                return Err(Error::Config(format!(
                    "association `{missing}` of `{name}` is not a configured model"
                )));
            }
        }

        Ok(())
    }

    /// Store schemas for every configured model
    pub fn schemas(&self) -> Vec<ModelSchema> {
        self.models
            .iter()
            .map(|(name, model)| {
                let schema = ModelSchema::new(name.as_str()).with_columns(model.columns.iter().cloned());
                match &model.missing_marker {
                    Some(marker) => schema.with_missing_marker(marker.as_str()),
                    None => schema,
                }
            })
            .collect()
    }

    /// Synchronization defaults for every configured model
    pub fn registry(&self) -> ModelRegistry {
        self.models
            .iter()
            .fold(ModelRegistry::new(), |registry, (name, model)| {
                registry.with_model(name.as_str(), model.options())
            })
    }
}

impl ModelConfig {
    fn options(&self) -> SyncOptions {
        let mut options = SyncOptions::new()
            .local_attributes(self.local_attributes.iter().cloned())
            .associations(self.associations.iter().cloned())
            .remove(self.remove)
            .fatal_mapping_errors(self.fatal_mapping_errors)
            .fatal_store_errors(self.fatal_store_errors);

        options.id_key.clone_from(&self.id_key);
        options.all_at_key.clone_from(&self.all_at_key);
        options.data_key.clone_from(&self.data_key);
        options.endpoint.clone_from(&self.endpoint);
        options.only_updated = self.only_updated;

        if !self.rename.is_empty() {
            options = options.mapper(RenameMapper::new(self.rename.clone()));
        }
        options
    }
}

//! HTTP remote source backed by a blocking reqwest client

use std::time::Duration;

use chrono::SecondsFormat;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use super::{FetchRequest, RemoteSource};
use crate::error::{Error, Result};
use crate::models::{RemoteCollection, RemoteId, RemoteRecord};
use crate::util::{compact_text, is_http_url, normalize_text_option, parse_timestamp};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches `GET {base_url}/{endpoint}` as JSON.
///
/// A scoped fetch fills `{scope_model}` and `{scope_id}` placeholders in the
/// endpoint (`accounts/{scope_id}/rentals`). An endpoint without placeholders
/// receives the scope as `scope_model` and `scope_id` query parameters.
#[derive(Clone)]
pub struct HttpSource {
    base_url: String,
    token: Option<String>,
    client: Client,
}

impl std::fmt::Debug for HttpSource {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpSource")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        Ok(Self {
            base_url,
            token: None,
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
        })
    }

    /// Send `Authorization: Bearer <token>` with every request
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = normalize_text_option(token);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    /// URL and query parameters for one fetch
    fn target(&self, request: &FetchRequest<'_>) -> Result<(String, Vec<(&'static str, String)>)> {
        let templated = request.endpoint.contains(SCOPE_MODEL_PLACEHOLDER)
            || request.endpoint.contains(SCOPE_ID_PLACEHOLDER);
        let mut query = Vec::new();

        let endpoint = match request.scope {
            Some(scope) if templated => request
                .endpoint
                .replace(SCOPE_MODEL_PLACEHOLDER, &scope.model)
                .replace(SCOPE_ID_PLACEHOLDER, &scope.id.to_string()),
            Some(scope) => {
                query.push(("scope_model", scope.model.clone()));
                query.push(("scope_id", scope.id.to_string()));
                request.endpoint.to_string()
            }
            None if templated => {
                return Err(Error::Config(format!(
                    "endpoint `{}` of `{}` needs a scope",
                    request.endpoint, request.model
                )))
            }
            None => request.endpoint.to_string(),
        };

        if let Some(since) = request.updated_since {
            query.push((
                "updated_since",
                since.to_rfc3339_opts(SecondsFormat::Millis, true),
            ));
        }

        Ok((self.url(&endpoint), query))
    }
}

const SCOPE_MODEL_PLACEHOLDER: &str = "{scope_model}";
const SCOPE_ID_PLACEHOLDER: &str = "{scope_id}";

impl RemoteSource for HttpSource {
    fn fetch(&self, request: &FetchRequest<'_>) -> Result<RemoteCollection> {
        let (url, query) = self.target(request)?;
        let mut builder = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .query(&query);

        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        tracing::debug!(%url, ?query, model = request.model, "Fetching remote collection");
        let response = builder.send()?;
        let status = response.status();
        let body = response.text()?;

        if !status.is_success() {
            return Err(Error::Fetch(describe_failure(status, &body)));
        }

        parse_collection(&body, request.endpoint)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ResponseMeta {
    deleted_ids: Option<Vec<Value>>,
    synced_at: Option<String>,
}

/// Parse a response body into a collection.
///
/// Accepts a bare array of records, or an object holding the records under
/// `key` (the endpoint's last path segment) next to an optional `meta`
/// object with `deleted_ids` and `synced_at`.
pub fn parse_collection(body: &str, key: &str) -> Result<RemoteCollection> {
    let payload: Value = serde_json::from_str(body)
        .map_err(|error| Error::Fetch(format!("response is not JSON: {error}")))?;

    let (items, meta) = match payload {
        Value::Array(items) => (items, ResponseMeta::default()),
        Value::Object(mut fields) => {
            let key = key.rsplit('/').next().unwrap_or(key);
            let items = match fields.remove(key) {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(Error::Fetch(format!(
                        "response has no `{key}` array"
                    )))
                }
            };
            let meta = match fields.remove("meta") {
                Some(meta) => serde_json::from_value(meta)
                    .map_err(|error| Error::Fetch(format!("invalid response meta: {error}")))?,
                None => ResponseMeta::default(),
            };
            (items, meta)
        }
        _ => {
            return Err(Error::Fetch(
                "response must be a JSON array or object".to_string(),
            ))
        }
    };

    let records = items
        .into_iter()
        .map(RemoteRecord::from_json)
        .collect::<Result<Vec<_>>>()
        .map_err(|error| Error::Fetch(error.to_string()))?;

    let mut collection = RemoteCollection::new(records);
    if let Some(ids) = meta.deleted_ids {
        collection = collection.with_deleted_ids(ids.iter().filter_map(RemoteId::from_value));
    }
    if let Some(synced_at) = meta.synced_at.as_deref().and_then(parse_timestamp) {
        collection = collection.with_synced_at(synced_at);
    }
    Ok(collection)
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn describe_failure(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", compact_text(&message), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{trimmed} ({})", status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> Result<String> {
    let url = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::Config("API URL must not be empty".to_string()))?;
    if is_http_url(&url) {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(Error::Config(
            "API URL must include http:// or https://".to_string(),
        ))
    }
}

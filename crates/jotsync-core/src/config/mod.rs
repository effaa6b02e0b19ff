//! Backend and client configuration.
//!
//! `BackendConfig` is the unified set of public endpoints/keys a client needs
//! to reach the identity provider, the GraphQL data API and the media storage
//! API. It can be assembled from environment variables, a CLI profile, or a
//! versioned backend manifest fetched at runtime.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::{compact_text, normalize_http_url, normalize_text_option};

const MANIFEST_SCHEMA_VERSION: u32 = 1;
const MANIFEST_HTTP_TIMEOUT_SECS: u64 = 4;
const DEFAULT_IMAGE_WORKERS: usize = 4;
const DEFAULT_STORAGE_PREFIX: &str = "public";

pub const ENV_MANIFEST_URL: &str = "JOTSYNC_MANIFEST_URL";
pub const ENV_AUTH_URL: &str = "JOTSYNC_AUTH_URL";
pub const ENV_API_KEY: &str = "JOTSYNC_API_KEY";
pub const ENV_GRAPHQL_URL: &str = "JOTSYNC_GRAPHQL_URL";
pub const ENV_STORAGE_URL: &str = "JOTSYNC_STORAGE_URL";

/// Client-side backend configuration, any field of which may be missing.
///
/// Secret credentials must never be stored here; `api_key` is the public
/// (anon) key shipped with every client.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    #[serde(default)]
    pub manifest_url: Option<String>,
    #[serde(default)]
    pub auth_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub graphql_url: Option<String>,
    #[serde(default)]
    pub storage_url: Option<String>,
}

/// Fully validated backend endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEndpoints {
    pub auth_url: String,
    pub api_key: String,
    pub graphql_url: String,
    pub storage_url: String,
}

impl BackendConfig {
    /// Load configuration from `JOTSYNC_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            manifest_url: normalize_text_option(lookup(ENV_MANIFEST_URL)),
            auth_url: normalize_text_option(lookup(ENV_AUTH_URL)),
            api_key: normalize_text_option(lookup(ENV_API_KEY)),
            graphql_url: normalize_text_option(lookup(ENV_GRAPHQL_URL)),
            storage_url: normalize_text_option(lookup(ENV_STORAGE_URL)),
        }
    }

    /// Fill fields missing here from `other`.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self {
            manifest_url: self.manifest_url.or(other.manifest_url),
            auth_url: self.auth_url.or(other.auth_url),
            api_key: self.api_key.or(other.api_key),
            graphql_url: self.graphql_url.or(other.graphql_url),
            storage_url: self.storage_url.or(other.storage_url),
        }
    }

    /// Validate into concrete endpoints.
    ///
    /// Returns `Ok(None)` when nothing is configured and an error when only a
    /// partial configuration is present.
    pub fn resolve(&self) -> Result<Option<BackendEndpoints>, String> {
        let auth_url = normalize_text_option(self.auth_url.clone());
        let api_key = normalize_text_option(self.api_key.clone());
        let graphql_url = normalize_text_option(self.graphql_url.clone());
        let storage_url = normalize_text_option(self.storage_url.clone());

        match (auth_url, api_key, graphql_url, storage_url) {
            (None, None, None, None) => Ok(None),
            (Some(auth_url), Some(api_key), Some(graphql_url), Some(storage_url)) => {
                Ok(Some(BackendEndpoints {
                    auth_url: normalize_http_url(&auth_url, "auth_url")?,
                    api_key,
                    graphql_url: normalize_http_url(&graphql_url, "graphql_url")?,
                    storage_url: normalize_http_url(&storage_url, "storage_url")?,
                }))
            }
            (auth_url, api_key, graphql_url, storage_url) => {
                let missing = [
                    ("auth_url", auth_url.is_none()),
                    ("api_key", api_key.is_none()),
                    ("graphql_url", graphql_url.is_none()),
                    ("storage_url", storage_url.is_none()),
                ]
                .into_iter()
                .filter_map(|(field, is_missing)| is_missing.then_some(field))
                .collect::<Vec<_>>()
                .join(", ");
                Err(format!("backend configuration is incomplete; missing {missing}"))
            }
        }
    }
}

/// What to do with an optimistic local change whose remote mutation failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Undo the local change.
    Revert,
    /// Keep the local change and flag the record as out of sync.
    #[default]
    MarkDesynced,
}

/// Runtime knobs for `NotesClient`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientOptions {
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Maximum concurrent image downloads.
    #[serde(default = "default_image_workers")]
    pub image_workers: usize,
    /// Object key prefix for image blobs.
    #[serde(default = "default_storage_prefix")]
    pub storage_prefix: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            image_workers: DEFAULT_IMAGE_WORKERS,
            storage_prefix: DEFAULT_STORAGE_PREFIX.to_string(),
        }
    }
}

const fn default_image_workers() -> usize {
    DEFAULT_IMAGE_WORKERS
}

fn default_storage_prefix() -> String {
    DEFAULT_STORAGE_PREFIX.to_string()
}

/// Resolve runtime config by fetching the manifest URL, if one is set.
///
/// Fetch/parse/validation failures are returned as errors instead of falling
/// back to the local values.
pub async fn resolve_backend_config(fallback: BackendConfig) -> Result<BackendConfig, String> {
    let Some(manifest_url) = normalize_text_option(fallback.manifest_url.clone()) else {
        return Ok(fallback);
    };

    fetch_backend_manifest(&manifest_url).await
}

/// Parse a backend manifest from a raw JSON payload.
pub fn parse_backend_manifest(payload: &str, manifest_url: &str) -> Result<BackendConfig, String> {
    let manifest: BackendManifest = serde_json::from_str(payload)
        .map_err(|error| format!("invalid backend manifest JSON: {error}"))?;
    manifest.into_config(manifest_url)
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
struct BackendManifest {
    schema_version: u32,
    auth_url: String,
    api_key: String,
    graphql_url: String,
    storage_url: String,
}

impl BackendManifest {
    fn into_config(self, manifest_url: &str) -> Result<BackendConfig, String> {
        if self.schema_version != MANIFEST_SCHEMA_VERSION {
            return Err(format!(
                "unsupported manifest schema_version {} (expected {})",
                self.schema_version, MANIFEST_SCHEMA_VERSION
            ));
        }

        let config = BackendConfig {
            manifest_url: Some(manifest_url.to_string()),
            auth_url: Some(self.auth_url),
            api_key: Some(self.api_key),
            graphql_url: Some(self.graphql_url),
            storage_url: Some(self.storage_url),
        };
        let endpoints = config
            .resolve()?
            .ok_or_else(|| "backend manifest is empty".to_string())?;

        Ok(BackendConfig {
            manifest_url: config.manifest_url,
            auth_url: Some(endpoints.auth_url),
            api_key: Some(endpoints.api_key),
            graphql_url: Some(endpoints.graphql_url),
            storage_url: Some(endpoints.storage_url),
        })
    }
}

async fn fetch_backend_manifest(url: &str) -> Result<BackendConfig, String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(MANIFEST_HTTP_TIMEOUT_SECS))
        .build()
        .map_err(|error| format!("failed to build manifest HTTP client: {error}"))?;

    let response = client
        .get(url)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(|error| format!("manifest request failed: {error}"))?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(format!(
            "manifest endpoint returned HTTP {status}: {}",
            compact_text(&body)
        ));
    }

    let body = response
        .text()
        .await
        .map_err(|error| format!("failed to read manifest response body: {error}"))?;
    parse_backend_manifest(&body, url)
}

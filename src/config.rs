use std::fs;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::arango::ArangoSettings;
use crate::citation::DEFAULT_DETAIL_URL;
use crate::error::BelError;
use crate::normalize::DEFAULT_MAX_DEPTH;
use crate::persist::RetryPolicy;
use crate::reactome::DEFAULT_CONTENT_SERVICE;

pub const CONFIG_FILE: &str = "reactome-bel.json";
pub const DEFAULT_SPECIES: &str = "9606";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub content_service: Option<String>,
    #[serde(default)]
    pub species: Option<String>,
    #[serde(default)]
    pub citation_base_url: Option<String>,
    #[serde(default)]
    pub store: Option<StoreEntry>,
    #[serde(default)]
    pub cache_capacity: Option<usize>,
    #[serde(default)]
    pub max_depth: Option<usize>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub retry: Option<RetryEntry>,
}

/// `"store": "file"` or `"store": {"kind": "arango", ...}`.
#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum StoreEntry {
    Shorthand(String),
    Detailed(StoreEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StoreEntryObject {
    pub kind: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub terms_collection: Option<String>,
    #[serde(default)]
    pub nanopubs_collection: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RetryEntry {
    #[serde(default)]
    pub attempts: Option<usize>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    File,
    Arango(ArangoSettings),
}

impl StoreKind {
    pub fn parse_shorthand(value: &str) -> Result<Self, BelError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreKind::Memory),
            "file" => Ok(StoreKind::File),
            "arango" | "arangodb" => Ok(StoreKind::Arango(ArangoSettings::default())),
            other => Err(BelError::ConfigParse(format!("unknown store kind {other:?}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub content_service: String,
    pub species: String,
    pub citation_base_url: String,
    pub store: StoreKind,
    pub cache_capacity: Option<NonZeroUsize>,
    pub max_depth: usize,
    pub workers: usize,
    pub retry: RetryPolicy,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            content_service: DEFAULT_CONTENT_SERVICE.to_string(),
            species: DEFAULT_SPECIES.to_string(),
            citation_base_url: DEFAULT_DETAIL_URL.to_string(),
            store: StoreKind::File,
            cache_capacity: None,
            max_depth: DEFAULT_MAX_DEPTH,
            workers: 1,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `reactome-bel.json` in the working directory. An
    /// explicit path must exist; the default file may be absent.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, BelError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(BelError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| BelError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| BelError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    /// Like [`ConfigLoader::resolve`], but a missing default file yields defaults.
    pub fn resolve_or_default(path: Option<&str>) -> Result<ResolvedConfig, BelError> {
        match Self::resolve(path) {
            Err(BelError::MissingConfig) => Ok(ResolvedConfig::default()),
            other => other,
        }
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, BelError> {
        let defaults = ResolvedConfig::default();

        let store = match config.store {
            None => defaults.store,
            Some(StoreEntry::Shorthand(value)) => StoreKind::parse_shorthand(&value)?,
            Some(StoreEntry::Detailed(obj)) => match StoreKind::parse_shorthand(&obj.kind)? {
                StoreKind::Arango(base) => StoreKind::Arango(ArangoSettings {
                    url: obj.url.unwrap_or(base.url),
                    database: obj.database.unwrap_or(base.database),
                    terms_collection: obj.terms_collection.unwrap_or(base.terms_collection),
                    nanopubs_collection: obj
                        .nanopubs_collection
                        .unwrap_or(base.nanopubs_collection),
                    username: obj.username,
                    password: obj.password,
                }),
                other => other,
            },
        };

        let retry = match config.retry {
            None => defaults.retry,
            Some(entry) => RetryPolicy {
                max_retries: entry.attempts.unwrap_or(defaults.retry.max_retries),
                base_delay: entry
                    .base_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.base_delay),
            },
        };

        let max_depth = match config.max_depth {
            Some(0) => {
                return Err(BelError::ConfigParse(
                    "max_depth must be at least 1".to_string(),
                ));
            }
            Some(depth) => depth,
            None => defaults.max_depth,
        };

        Ok(ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(defaults.schema_version),
            content_service: config.content_service.unwrap_or(defaults.content_service),
            species: config.species.unwrap_or(defaults.species),
            citation_base_url: config
                .citation_base_url
                .unwrap_or(defaults.citation_base_url),
            store,
            cache_capacity: config.cache_capacity.and_then(NonZeroUsize::new),
            max_depth,
            workers: config.workers.unwrap_or(defaults.workers).max(1),
            retry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config_shorthand() {
        let config = Config {
            store: Some(StoreEntry::Shorthand("memory".to_string())),
            ..Config::default()
        };

        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.store, StoreKind::Memory);
        assert_eq!(resolved.species, DEFAULT_SPECIES);
        assert_eq!(resolved.max_depth, DEFAULT_MAX_DEPTH);
        assert_eq!(resolved.retry, RetryPolicy::default());
    }
}

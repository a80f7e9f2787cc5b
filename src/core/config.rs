use crate::core::client::MAX_EXPIRY;
use crate::core::error::StoreError;
use crate::core::policy::Cacheability;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::{fs, path::PathBuf};
use tracing::debug;

/// Credentials and client options, passed through to the store client untouched.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct ConnectionOptions {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Query service address when it differs from the management endpoint.
    pub query_endpoint: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StoreConfig {
    pub connection_string: String,
    #[serde(default)]
    pub connection_options: ConnectionOptions,
    pub bucket: String,
    pub scope: Option<String>,
    pub collection: Option<String>,
    /// Default time-to-live in minutes; zero stores entries without expiry.
    #[serde(default)]
    pub ttl: u64,
    #[serde(skip)]
    pub cacheability: Cacheability,
}

impl StoreConfig {
    pub fn new(connection_string: &str, bucket: &str) -> Self {
        Self {
            connection_string: connection_string.to_string(),
            connection_options: ConnectionOptions::default(),
            bucket: bucket.to_string(),
            scope: None,
            collection: None,
            ttl: 0,
            cacheability: Cacheability::default(),
        }
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.connection_options.username = Some(username.to_string());
        self.connection_options.password = Some(password.to_string());
        self
    }

    pub fn with_collection(mut self, scope: &str, collection: &str) -> Self {
        self.scope = Some(scope.to_string());
        self.collection = Some(collection.to_string());
        self
    }

    pub fn with_ttl(mut self, minutes: u64) -> Self {
        self.ttl = minutes;
        self
    }

    pub fn with_cacheability(mut self, cacheability: Cacheability) -> Self {
        self.cacheability = cacheability;
        self
    }

    /// Scope and collection must be given together, names must be plain identifiers.
    pub fn validate(&self) -> std::result::Result<(), StoreError> {
        if self.bucket.trim().is_empty() {
            return Err(StoreError::InvalidConfig("bucket is required".to_string()));
        }

        match (&self.scope, &self.collection) {
            (Some(_), None) => {
                return Err(StoreError::InvalidConfig(
                    "scope is set but collection is missing".to_string(),
                ));
            }
            (None, Some(_)) => {
                return Err(StoreError::InvalidConfig(
                    "collection is set but scope is missing".to_string(),
                ));
            }
            _ => {}
        }

        for (label, name) in [
            ("bucket", Some(&self.bucket)),
            ("scope", self.scope.as_ref()),
            ("collection", self.collection.as_ref()),
        ] {
            if let Some(name) = name
                && (name.is_empty() || name.contains('`'))
            {
                return Err(StoreError::InvalidConfig(format!(
                    "invalid {label} name: '{name}'"
                )));
            }
        }

        if self
            .ttl
            .checked_mul(60)
            .is_none_or(|seconds| seconds > MAX_EXPIRY)
        {
            return Err(StoreError::InvalidTtl(self.ttl));
        }

        Ok(())
    }

    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("io", "cbstore", "cbstore")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }
}

pub mod adapter;
pub mod connection;
pub mod core;
pub mod providers;
pub mod setup;

pub use adapter::{CouchbaseStore, SetOptions, Ttl};
pub use connection::{Connection, ConnectionResolver};
pub use crate::core::{Cacheability, ClientError, Result, StoreConfig, StoreError};

use anyhow::Context;
use serde_json::Value;
use tracing::{debug, info};

/// Commands the `cbstore` binary runs against the configured bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    Get { key: String },
    Set {
        key: String,
        value: String,
        ttl: Option<u64>,
    },
    Del { key: String },
    Keys { pattern: Option<String> },
    Ttl { key: String },
    Flush,
}

/// Parses a command line value as JSON, falling back to a plain string.
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = match config_path {
        Some(path) => StoreConfig::load_from_path(path)?,
        None => StoreConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let store = CouchbaseStore::with_http(config)?;
    let result = execute(&store, command).await;
    store.close().await?;

    for line in result? {
        println!("{line}");
    }
    Ok(())
}

/// Runs one command and returns the lines to print.
pub async fn execute(store: &CouchbaseStore, command: AppCommand) -> anyhow::Result<Vec<String>> {
    info!("Running {:?} against bucket {}", command, store.config().bucket);

    let lines = match command {
        AppCommand::Get { key } => match store.get(&key).await? {
            Some(value) => vec![value.to_string()],
            None => vec!["(nil)".to_string()],
        },
        AppCommand::Set { key, value, ttl } => {
            let result = store
                .set(&key, parse_value(&value), Some(SetOptions { ttl }))
                .await
                .with_context(|| format!("Failed to set key: {key}"))?;
            vec![format!("OK cas={}", result.cas)]
        }
        AppCommand::Del { key } => {
            let result = store
                .del(&key)
                .await
                .with_context(|| format!("Failed to delete key: {key}"))?;
            vec![format!("OK cas={}", result.cas)]
        }
        AppCommand::Keys { pattern } => store.keys(pattern.as_deref()).await?,
        AppCommand::Ttl { key } => match store.ttl(&key).await? {
            Some(ttl) => vec![ttl.to_string()],
            None => vec!["(nil)".to_string()],
        },
        AppCommand::Flush => {
            store.reset().await?;
            vec!["OK".to_string()]
        }
    };
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MemoryConnector;
    use std::sync::Arc;

    fn store() -> CouchbaseStore {
        CouchbaseStore::new(
            StoreConfig::new("memory://local", "cache"),
            Arc::new(MemoryConnector::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("42"), serde_json::json!(42));
        assert_eq!(parse_value(r#"{"id":1}"#), serde_json::json!({"id": 1}));
        assert_eq!(parse_value("bar"), serde_json::json!("bar"));
    }

    #[tokio::test]
    async fn test_execute_commands() {
        let store = store();

        let lines = execute(
            &store,
            AppCommand::Set {
                key: "foo".into(),
                value: "bar".into(),
                ttl: Some(0),
            },
        )
        .await
        .unwrap();
        assert!(lines[0].starts_with("OK cas="));

        let lines = execute(&store, AppCommand::Get { key: "foo".into() })
            .await
            .unwrap();
        assert_eq!(lines, vec!["\"bar\"".to_string()]);

        let lines = execute(&store, AppCommand::Ttl { key: "foo".into() })
            .await
            .unwrap();
        assert_eq!(lines, vec!["no expiry".to_string()]);

        let lines = execute(
            &store,
            AppCommand::Keys {
                pattern: Some("f*".into()),
            },
        )
        .await
        .unwrap();
        assert_eq!(lines, vec!["foo".to_string()]);

        execute(&store, AppCommand::Flush).await.unwrap();
        let lines = execute(&store, AppCommand::Get { key: "foo".into() })
            .await
            .unwrap();
        assert_eq!(lines, vec!["(nil)".to_string()]);
    }

    #[tokio::test]
    async fn test_execute_delete_missing_key_fails() {
        let err = execute(&store(), AppCommand::Del { key: "nope".into() })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed to delete key: nope");
    }
}

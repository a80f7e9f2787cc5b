use crate::connection::{Connection, ConnectionResolver};
use crate::core::client::{Connector, MAX_EXPIRY, MutationResult, UpsertOptions};
use crate::core::config::StoreConfig;
use crate::core::error::{ClientError, Result, StoreError};
use crate::core::invoke::{Continuation, Dispatch, dispatch};
use crate::core::pattern::PatternQuery;
use crate::core::policy::describe;
use crate::providers::http::HttpConnector;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Per-call options for [`CouchbaseStore::set`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Time-to-live in minutes. `Some(0)` stores without expiry, `None` uses
    /// the configured default.
    pub ttl: Option<u64>,
}

impl SetOptions {
    pub fn ttl(minutes: u64) -> Self {
        Self { ttl: Some(minutes) }
    }
}

/// Remaining lifetime of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    Remaining(i64),
    /// The store reports the entry as never expiring.
    NoExpiry,
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ttl::Remaining(seconds) => write!(f, "{seconds}s"),
            Ttl::NoExpiry => write!(f, "no expiry"),
        }
    }
}

struct Inner {
    config: Arc<StoreConfig>,
    resolver: ConnectionResolver,
}

/// Cache store backed by a bucket/scope/collection of a document database.
///
/// Cloning is cheap and every clone shares the same lazily opened connection.
#[derive(Clone)]
pub struct CouchbaseStore {
    inner: Arc<Inner>,
}

impl CouchbaseStore {
    pub const NAME: &'static str = "couchbase";

    pub fn new(config: StoreConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        Ok(Self {
            inner: Arc::new(Inner {
                resolver: ConnectionResolver::new(connector, Arc::clone(&config)),
                config,
            }),
        })
    }

    /// Store talking to the cluster's HTTP services.
    pub fn with_http(config: StoreConfig) -> Result<Self> {
        Self::new(config, Arc::new(HttpConnector::new()))
    }

    pub fn name(&self) -> &'static str {
        Self::NAME
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn is_cacheable_value(&self, value: Option<&Value>) -> bool {
        self.inner.config.cacheability.is_cacheable(value)
    }

    /// The shared connection, opened on first use.
    pub async fn connection(&self) -> Result<Arc<Connection>> {
        self.inner.resolver.resolve().await
    }

    /// Closes the connection. A later operation opens a new one.
    pub async fn close(&self) -> Result<()> {
        self.inner.resolver.close().await
    }

    fn effective_ttl(&self, options: Option<SetOptions>) -> u64 {
        options
            .and_then(|o| o.ttl)
            .unwrap_or(self.inner.config.ttl)
    }

    #[instrument(skip(self, value))]
    pub async fn set(
        &self,
        key: &str,
        value: impl Into<Option<Value>>,
        options: Option<SetOptions>,
    ) -> Result<MutationResult> {
        let value = value.into();
        if !self.is_cacheable_value(value.as_ref()) {
            return Err(StoreError::NotCacheable(describe(value.as_ref())));
        }
        // The default policy has already rejected absent values
        let value = value.unwrap_or(Value::Null);
        ensure_key(key)?;

        let expiry = expiry_seconds(self.effective_ttl(options), chrono::Utc::now().timestamp())?;
        let connection = self.connection().await?;
        let result = connection
            .collection
            .upsert(key, &value, UpsertOptions { expiry })
            .await
            .map_err(StoreError::Operation)?;
        debug!("Cache PUT for key: {} (expiry {}s)", key, expiry);
        Ok(result)
    }

    /// Returns `Ok(None)` when the key does not exist.
    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        ensure_key(key)?;
        let connection = self.connection().await?;
        match connection.collection.get(key).await {
            Ok(doc) => {
                debug!("Cache HIT for key: {}", key);
                Ok(Some(doc.content))
            }
            Err(e) if e.is_not_found() => {
                debug!("Cache MISS for key: {}", key);
                Ok(None)
            }
            Err(e) => Err(StoreError::Operation(e)),
        }
    }

    /// Deleting an absent key surfaces the store's not-found error.
    #[instrument(skip(self))]
    pub async fn del(&self, key: &str) -> Result<MutationResult> {
        ensure_key(key)?;
        let connection = self.connection().await?;
        let result = connection
            .collection
            .remove(key)
            .await
            .map_err(StoreError::Operation)?;
        debug!("Cache REMOVE for key: {}", key);
        Ok(result)
    }

    /// Flushes the whole bucket, including keys not written through this store.
    #[instrument(skip(self))]
    pub async fn reset(&self) -> Result<()> {
        let connection = self.connection().await?;
        connection
            .manager
            .flush_bucket(&self.inner.config.bucket)
            .await
            .map_err(StoreError::Operation)?;
        debug!("Cache FLUSH for bucket: {}", self.inner.config.bucket);
        Ok(())
    }

    /// Keys matching a glob pattern, all keys when `pattern` is `None`.
    #[instrument(skip(self))]
    pub async fn keys(&self, pattern: Option<&str>) -> Result<Vec<String>> {
        let config = &self.inner.config;
        let query = PatternQuery::new(
            &config.bucket,
            config.scope.as_deref(),
            config.collection.as_deref(),
            pattern,
        );
        let connection = self.connection().await?;
        let result = connection
            .cluster
            .query(&query.statement(), query.options())
            .await
            .map_err(StoreError::Operation)?;

        result
            .rows
            .into_iter()
            .map(|row| match row {
                Value::String(id) => Ok(id),
                other => Err(StoreError::Operation(ClientError::Decode(format!(
                    "expected a document id, got {other}"
                )))),
            })
            .collect()
    }

    /// Seconds until the entry expires, `Ok(None)` when the key does not exist.
    #[instrument(skip(self))]
    pub async fn ttl(&self, key: &str) -> Result<Option<Ttl>> {
        ensure_key(key)?;
        let connection = self.connection().await?;
        match connection.collection.get(key).await {
            Ok(doc) => Ok(Some(match doc.expiry_time {
                Some(expiry_time) => Ttl::Remaining(expiry_time - chrono::Utc::now().timestamp()),
                None => Ttl::NoExpiry,
            })),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(StoreError::Operation(e)),
        }
    }

    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: Option<SetOptions>,
    ) -> Result<MutationResult> {
        let value =
            serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.set(key, value, options).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get(key)
            .await?
            .map(|value| {
                serde_json::from_value(value)
                    .map_err(|e| StoreError::Operation(ClientError::from(e)))
            })
            .transpose()
    }

    // Continuation entry points. Each one delivers the outcome of the matching
    // async operation either to `done` or to the returned handle.

    pub fn set_with(
        &self,
        key: &str,
        value: impl Into<Option<Value>>,
        options: Option<SetOptions>,
        done: Option<Continuation<MutationResult>>,
    ) -> Dispatch<MutationResult> {
        let store = self.clone();
        let key = key.to_string();
        let value: Option<Value> = value.into();
        dispatch(async move { store.set(&key, value, options).await }, done)
    }

    pub fn get_with(
        &self,
        key: &str,
        done: Option<Continuation<Option<Value>>>,
    ) -> Dispatch<Option<Value>> {
        let store = self.clone();
        let key = key.to_string();
        dispatch(async move { store.get(&key).await }, done)
    }

    pub fn del_with(
        &self,
        key: &str,
        done: Option<Continuation<MutationResult>>,
    ) -> Dispatch<MutationResult> {
        let store = self.clone();
        let key = key.to_string();
        dispatch(async move { store.del(&key).await }, done)
    }

    pub fn reset_with(&self, done: Option<Continuation<()>>) -> Dispatch<()> {
        let store = self.clone();
        dispatch(async move { store.reset().await }, done)
    }

    pub fn keys_with(
        &self,
        pattern: Option<&str>,
        done: Option<Continuation<Vec<String>>>,
    ) -> Dispatch<Vec<String>> {
        let store = self.clone();
        let pattern = pattern.map(str::to_string);
        dispatch(async move { store.keys(pattern.as_deref()).await }, done)
    }

    pub fn ttl_with(&self, key: &str, done: Option<Continuation<Option<Ttl>>>) -> Dispatch<Option<Ttl>> {
        let store = self.clone();
        let key = key.to_string();
        dispatch(async move { store.ttl(&key).await }, done)
    }
}

/// Converts a ttl in minutes to the relative expiry in seconds sent to the store.
///
/// The entry must expire no later than [`MAX_EXPIRY`] counted from `now`.
fn expiry_seconds(minutes: u64, now: i64) -> Result<u64> {
    let limit = MAX_EXPIRY.saturating_sub(u64::try_from(now).unwrap_or(0));
    match minutes.checked_mul(60) {
        Some(seconds) if seconds <= limit => Ok(seconds),
        _ => Err(StoreError::InvalidTtl(minutes)),
    }
}

fn ensure_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(StoreError::EmptyKey);
    }
    Ok(())
}

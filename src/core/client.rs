//! Document store abstractions consumed by the adapter

use crate::core::config::ConnectionOptions;
use crate::core::error::ClientError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Latest absolute expiry, in unix seconds, a document can carry.
pub const MAX_EXPIRY: u64 = u32::MAX as u64;

/// Acknowledgement returned by a successful mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationResult {
    pub cas: u64,
}

/// A document read back from a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetResult {
    pub content: Value,
    pub cas: u64,
    /// Absolute expiry in unix seconds, `None` when the document never expires.
    pub expiry_time: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOptions {
    /// Relative expiry in seconds, zero stores the document without expiry.
    pub expiry: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// Named parameters, keyed without the leading `$`.
    pub parameters: HashMap<String, Value>,
}

impl QueryOptions {
    pub fn with_parameter(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<Value>,
}

/// Opens cluster connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        connection_string: &str,
        options: &ConnectionOptions,
    ) -> ClientResult<Arc<dyn Cluster>>;
}

#[async_trait]
pub trait Cluster: Send + Sync {
    async fn bucket(&self, name: &str) -> ClientResult<Arc<dyn Bucket>>;
    fn buckets(&self) -> Arc<dyn BucketManager>;
    async fn query(&self, statement: &str, options: QueryOptions) -> ClientResult<QueryResult>;
    async fn close(&self) -> ClientResult<()>;
}

pub trait Bucket: Send + Sync {
    fn name(&self) -> &str;
    fn collection(&self, scope: &str, collection: &str) -> Arc<dyn Collection>;
    fn default_collection(&self) -> Arc<dyn Collection>;
}

#[async_trait]
pub trait Collection: Send + Sync {
    async fn upsert(
        &self,
        key: &str,
        value: &Value,
        options: UpsertOptions,
    ) -> ClientResult<MutationResult>;
    /// Fails with [`ClientError::DocumentNotFound`] when the key is absent.
    async fn get(&self, key: &str) -> ClientResult<GetResult>;
    async fn remove(&self, key: &str) -> ClientResult<MutationResult>;
}

#[async_trait]
pub trait BucketManager: Send + Sync {
    async fn flush_bucket(&self, name: &str) -> ClientResult<()>;
}

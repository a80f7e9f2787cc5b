//! Store client speaking to the cluster's management and query services over HTTP.
//!
//! Document reads and writes are issued as parameterised statements against
//! the query service, so every request carries its inputs as named
//! parameters rather than inlined literals.

use crate::core::client::{
    Bucket, BucketManager, ClientResult, Cluster, Collection, Connector, GetResult, MAX_EXPIRY,
    MutationResult, QueryOptions, QueryResult, UpsertOptions,
};
use crate::core::config::ConnectionOptions;
use crate::core::error::ClientError;
use crate::core::pattern::{DEFAULT_COLLECTION, DEFAULT_SCOPE, keyspace};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, instrument};

const MANAGEMENT_PORT: u16 = 8091;
const QUERY_PORT: u16 = 8093;
const SECURE_MANAGEMENT_PORT: u16 = 18091;
const SECURE_QUERY_PORT: u16 = 18093;

/// Relative expiries longer than this are read by the server as unix timestamps.
pub const RELATIVE_EXPIRY_LIMIT: u64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub management: String,
    pub query: String,
}

impl Endpoints {
    /// Accepts `couchbase://`, `couchbases://`, `http://` and `https://`
    /// connection strings. Only the first host of a list is used.
    pub fn parse(connection_string: &str, options: &ConnectionOptions) -> ClientResult<Self> {
        let (scheme, rest) = connection_string.split_once("://").ok_or_else(|| {
            ClientError::Transport(format!("invalid connection string: {connection_string}"))
        })?;
        let host = rest
            .split([',', '/', '?'])
            .next()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| {
                ClientError::Transport(format!("no host in connection string: {connection_string}"))
            })?;

        let management = match scheme {
            "http" | "https" => format!("{scheme}://{host}"),
            "couchbase" => format!("http://{}:{MANAGEMENT_PORT}", strip_port(host)),
            "couchbases" => format!("https://{}:{SECURE_MANAGEMENT_PORT}", strip_port(host)),
            other => {
                return Err(ClientError::Transport(format!(
                    "unsupported scheme: {other}"
                )));
            }
        };

        let query = match &options.query_endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => match scheme {
                "https" | "couchbases" => {
                    format!("https://{}:{SECURE_QUERY_PORT}", strip_port(host))
                }
                _ => format!("http://{}:{QUERY_PORT}", strip_port(host)),
            },
        };

        Ok(Self { management, query })
    }
}

fn strip_port(host: &str) -> &str {
    // Leave bracketed IPv6 literals intact
    if host.starts_with('[') {
        return host.split_inclusive(']').next().unwrap_or(host);
    }
    host.split(':').next().unwrap_or(host)
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    errors: Vec<QueryServiceError>,
}

#[derive(Debug, Deserialize)]
struct QueryServiceError {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct DocumentRow {
    content: Value,
    cas: u64,
    #[serde(default)]
    expiration: i64,
}

/// Opens HTTP-backed clusters.
#[derive(Debug, Default, Clone)]
pub struct HttpConnector;

impl HttpConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for HttpConnector {
    #[instrument(skip(self, options))]
    async fn connect(
        &self,
        connection_string: &str,
        options: &ConnectionOptions,
    ) -> ClientResult<Arc<dyn Cluster>> {
        let endpoints = Endpoints::parse(connection_string, options)?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("cbstore/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let inner = Arc::new(HttpInner {
            client,
            endpoints,
            username: options.username.clone(),
            password: options.password.clone(),
            closed: AtomicBool::new(false),
        });

        // Confirms the node is reachable and the credentials are accepted
        let url = inner.management_url(&["pools", "default"])?;
        debug!("Checking cluster at {}", url);
        let response = inner.send(inner.client.get(url)).await?;
        expect_success(response).await?;

        Ok(Arc::new(HttpCluster { inner }))
    }
}

struct HttpInner {
    client: reqwest::Client,
    endpoints: Endpoints,
    username: Option<String>,
    password: Option<String>,
    closed: AtomicBool,
}

impl HttpInner {
    /// Management URL with each segment percent-encoded.
    fn management_url(&self, segments: &[&str]) -> ClientResult<Url> {
        let mut url = Url::parse(&self.endpoints.management)
            .map_err(|e| ClientError::Transport(format!("{}: {e}", self.endpoints.management)))?;
        url.path_segments_mut()
            .map_err(|_| {
                ClientError::Transport(format!(
                    "{} cannot carry a path",
                    self.endpoints.management
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> ClientResult<Response> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Transport(
                "cluster connection is closed".to_string(),
            ));
        }
        let request = match &self.username {
            Some(username) => request.basic_auth(username, self.password.as_deref()),
            None => request,
        };
        let response = request.send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Authentication(format!(
                "{} rejected the credentials",
                response.url()
            )));
        }
        Ok(response)
    }

    async fn query(&self, statement: &str, options: QueryOptions) -> ClientResult<Vec<Value>> {
        let mut body = Map::new();
        body.insert("statement".to_string(), Value::String(statement.to_string()));
        for (name, value) in options.parameters {
            body.insert(format!("${name}"), value);
        }

        let url = format!("{}/query/service", self.endpoints.query);
        debug!("Posting statement to {}", url);
        let response = self.send(self.client.post(&url).json(&body)).await?;
        let status = response.status();
        let text = response.text().await?;

        let parsed: QueryResponse = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(ClientError::Service {
                    code: i64::from(status.as_u16()),
                    message: text,
                });
            }
            Err(e) => {
                return Err(ClientError::Decode(format!(
                    "{e}. Response: '{text}'"
                )));
            }
        };

        if let Some(err) = parsed.errors.into_iter().next() {
            return Err(ClientError::Service {
                code: err.code,
                message: err.msg,
            });
        }
        if !status.is_success() {
            return Err(ClientError::Service {
                code: i64::from(status.as_u16()),
                message: text,
            });
        }
        Ok(parsed.results)
    }
}

async fn expect_success(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(ClientError::Service {
        code: i64::from(status.as_u16()),
        message: if message.is_empty() {
            status.to_string()
        } else {
            message
        },
    })
}

struct HttpCluster {
    inner: Arc<HttpInner>,
}

#[async_trait]
impl Cluster for HttpCluster {
    async fn bucket(&self, name: &str) -> ClientResult<Arc<dyn Bucket>> {
        let url = self
            .inner
            .management_url(&["pools", "default", "buckets", name])?;
        let response = self.inner.send(self.inner.client.get(url)).await?;
        expect_success(response).await?;

        Ok(Arc::new(HttpBucket {
            name: name.to_string(),
            inner: Arc::clone(&self.inner),
        }))
    }

    fn buckets(&self) -> Arc<dyn BucketManager> {
        Arc::new(HttpBucketManager {
            inner: Arc::clone(&self.inner),
        })
    }

    async fn query(&self, statement: &str, options: QueryOptions) -> ClientResult<QueryResult> {
        let rows = self.inner.query(statement, options).await?;
        Ok(QueryResult { rows })
    }

    async fn close(&self) -> ClientResult<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct HttpBucket {
    name: String,
    inner: Arc<HttpInner>,
}

impl Bucket for HttpBucket {
    fn name(&self) -> &str {
        &self.name
    }

    fn collection(&self, scope: &str, collection: &str) -> Arc<dyn Collection> {
        Arc::new(HttpCollection {
            keyspace: keyspace(&self.name, scope, collection),
            inner: Arc::clone(&self.inner),
        })
    }

    fn default_collection(&self) -> Arc<dyn Collection> {
        self.collection(DEFAULT_SCOPE, DEFAULT_COLLECTION)
    }
}

struct HttpCollection {
    keyspace: String,
    inner: Arc<HttpInner>,
}

/// Converts a relative expiry into what the server expects.
///
/// Fails when the absolute expiry would pass [`MAX_EXPIRY`].
pub fn wire_expiry(expiry: u64, now: i64) -> ClientResult<u64> {
    if expiry <= RELATIVE_EXPIRY_LIMIT {
        return Ok(expiry);
    }
    u64::try_from(now)
        .ok()
        .and_then(|now| now.checked_add(expiry))
        .filter(|at| *at <= MAX_EXPIRY)
        .ok_or_else(|| ClientError::Unsupported(format!("expiry of {expiry}s is out of range")))
}

fn first_cas(rows: Vec<Value>, key: &str) -> ClientResult<MutationResult> {
    let row = rows
        .into_iter()
        .next()
        .ok_or_else(|| ClientError::DocumentNotFound(key.to_string()))?;
    let cas = row
        .as_u64()
        .ok_or_else(|| ClientError::Decode(format!("unexpected cas value: {row}")))?;
    Ok(MutationResult { cas })
}

#[async_trait]
impl Collection for HttpCollection {
    #[instrument(skip(self, value))]
    async fn upsert(
        &self,
        key: &str,
        value: &Value,
        options: UpsertOptions,
    ) -> ClientResult<MutationResult> {
        let statement = format!(
            "UPSERT INTO {} (KEY, VALUE, OPTIONS) VALUES ($key, $value, {{\"expiration\": $expiration}}) RETURNING RAW META().cas",
            self.keyspace
        );
        let expiration = wire_expiry(options.expiry, chrono::Utc::now().timestamp())?;
        let options = QueryOptions::default()
            .with_parameter("key", key)
            .with_parameter("value", value.clone())
            .with_parameter("expiration", expiration);

        let rows = self.inner.query(&statement, options).await?;
        first_cas(rows, key)
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> ClientResult<GetResult> {
        let statement = format!(
            "SELECT RAW {{\"content\": d, \"cas\": META(d).cas, \"expiration\": META(d).expiration}} FROM {} AS d USE KEYS $key",
            self.keyspace
        );
        let rows = self
            .inner
            .query(&statement, QueryOptions::default().with_parameter("key", key))
            .await?;

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::DocumentNotFound(key.to_string()))?;
        let row: DocumentRow = serde_json::from_value(row)?;
        Ok(GetResult {
            content: row.content,
            cas: row.cas,
            expiry_time: (row.expiration > 0).then_some(row.expiration),
        })
    }

    #[instrument(skip(self))]
    async fn remove(&self, key: &str) -> ClientResult<MutationResult> {
        let statement = format!(
            "DELETE FROM {} AS d USE KEYS $key RETURNING RAW META(d).cas",
            self.keyspace
        );
        let rows = self
            .inner
            .query(&statement, QueryOptions::default().with_parameter("key", key))
            .await?;
        first_cas(rows, key)
    }
}

struct HttpBucketManager {
    inner: Arc<HttpInner>,
}

#[async_trait]
impl BucketManager for HttpBucketManager {
    async fn flush_bucket(&self, name: &str) -> ClientResult<()> {
        let url = self.inner.management_url(&[
            "pools",
            "default",
            "buckets",
            name,
            "controller",
            "doFlush",
        ])?;
        debug!("Flushing bucket {}", name);
        let response = self.inner.send(self.inner.client.post(url)).await?;
        expect_success(response).await?;
        Ok(())
    }
}

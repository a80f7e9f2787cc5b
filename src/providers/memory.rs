use crate::core::client::{
    Bucket, BucketManager, ClientResult, Cluster, Collection, Connector, GetResult,
    MutationResult, QueryOptions, QueryResult, UpsertOptions,
};
use crate::core::config::ConnectionOptions;
use crate::core::error::ClientError;
use crate::core::pattern::{DEFAULT_COLLECTION, DEFAULT_SCOPE};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

static ENUMERATE_STATEMENT: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(
        r"^\s*SELECT RAW META\(\)\.id FROM `([^`]+)`\.`([^`]+)`\.`([^`]+)` WHERE REGEXP_CONTAINS\(META\(\)\.id, \$(\w+)\)\s*$",
    )
});

type Keyspace = (String, String, String);

struct Document {
    content: Value,
    cas: u64,
    expires_at: Option<i64>,
}

impl Document {
    fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct State {
    documents: Mutex<HashMap<Keyspace, HashMap<String, Document>>>,
    cas: AtomicU64,
    fault: Mutex<Option<ClientError>>,
}

impl State {
    fn next_cas(&self) -> u64 {
        self.cas.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn take_fault(&self) -> ClientResult<()> {
        match lock(&self.fault).take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// In-process document store.
///
/// Documents outlive individual connections, so closing and reconnecting sees
/// the same data. Expired documents are dropped when next touched.
pub struct MemoryConnector {
    state: Arc<State>,
    credentials: Option<(String, String)>,
    connect_delay: Duration,
    connects: AtomicUsize,
    connect_fault: Mutex<Option<ClientError>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self {
            state: Arc::new(State::default()),
            credentials: None,
            connect_delay: Duration::ZERO,
            connects: AtomicUsize::new(0),
            connect_fault: Mutex::new(None),
        }
    }

    /// Rejects connections whose username/password differ.
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some((username.to_string(), password.to_string()));
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Number of clusters opened so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn fail_next_connect(&self, err: ClientError) {
        *lock(&self.connect_fault) = Some(err);
    }

    /// Fails the next collection, query or flush request.
    pub fn fail_next_operation(&self, err: ClientError) {
        *lock(&self.state.fault) = Some(err);
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        connection_string: &str,
        options: &ConnectionOptions,
    ) -> ClientResult<Arc<dyn Cluster>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        if let Some(err) = lock(&self.connect_fault).take() {
            return Err(err);
        }
        if let Some((username, password)) = &self.credentials
            && (options.username.as_ref() != Some(username)
                || options.password.as_ref() != Some(password))
        {
            return Err(ClientError::Authentication(format!(
                "invalid credentials for {connection_string}"
            )));
        }

        debug!("Memory cluster opened for {}", connection_string);
        Ok(Arc::new(MemoryCluster {
            state: Arc::clone(&self.state),
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

struct MemoryCluster {
    state: Arc<State>,
    closed: Arc<AtomicBool>,
}

fn ensure_open(closed: &AtomicBool) -> ClientResult<()> {
    if closed.load(Ordering::SeqCst) {
        return Err(ClientError::Transport("cluster connection is closed".to_string()));
    }
    Ok(())
}

#[async_trait]
impl Cluster for MemoryCluster {
    async fn bucket(&self, name: &str) -> ClientResult<Arc<dyn Bucket>> {
        ensure_open(&self.closed)?;
        Ok(Arc::new(MemoryBucket {
            name: name.to_string(),
            state: Arc::clone(&self.state),
            closed: Arc::clone(&self.closed),
        }))
    }

    fn buckets(&self) -> Arc<dyn BucketManager> {
        Arc::new(MemoryBucketManager {
            state: Arc::clone(&self.state),
            closed: Arc::clone(&self.closed),
        })
    }

    async fn query(&self, statement: &str, options: QueryOptions) -> ClientResult<QueryResult> {
        ensure_open(&self.closed)?;
        self.state.take_fault()?;

        // Only the key enumeration shape is understood
        let shape = ENUMERATE_STATEMENT
            .as_ref()
            .map_err(|e| ClientError::Unsupported(e.to_string()))?;
        let captures = shape
            .captures(statement)
            .ok_or_else(|| ClientError::Unsupported(statement.trim().to_string()))?;
        let keyspace = (
            captures[1].to_string(),
            captures[2].to_string(),
            captures[3].to_string(),
        );
        let param = &captures[4];
        let pattern = options
            .parameters
            .get(param)
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::Service {
                code: 4040,
                message: format!("no value for named parameter ${param}"),
            })?;
        let regex = Regex::new(pattern).map_err(|e| ClientError::Service {
            code: 5010,
            message: e.to_string(),
        })?;

        let now = now();
        let documents = lock(&self.state.documents);
        let mut ids: Vec<String> = documents
            .get(&keyspace)
            .map(|docs| {
                docs.iter()
                    .filter(|(id, doc)| !doc.is_expired(now) && regex.is_match(id))
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default();
        ids.sort();

        Ok(QueryResult {
            rows: ids.into_iter().map(Value::String).collect(),
        })
    }

    async fn close(&self) -> ClientResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryBucket {
    name: String,
    state: Arc<State>,
    closed: Arc<AtomicBool>,
}

impl Bucket for MemoryBucket {
    fn name(&self) -> &str {
        &self.name
    }

    fn collection(&self, scope: &str, collection: &str) -> Arc<dyn Collection> {
        Arc::new(MemoryCollection {
            keyspace: (self.name.clone(), scope.to_string(), collection.to_string()),
            state: Arc::clone(&self.state),
            closed: Arc::clone(&self.closed),
        })
    }

    fn default_collection(&self) -> Arc<dyn Collection> {
        self.collection(DEFAULT_SCOPE, DEFAULT_COLLECTION)
    }
}

struct MemoryCollection {
    keyspace: Keyspace,
    state: Arc<State>,
    closed: Arc<AtomicBool>,
}

impl MemoryCollection {
    fn check(&self) -> ClientResult<()> {
        ensure_open(&self.closed)?;
        self.state.take_fault()
    }
}

#[async_trait]
impl Collection for MemoryCollection {
    async fn upsert(
        &self,
        key: &str,
        value: &Value,
        options: UpsertOptions,
    ) -> ClientResult<MutationResult> {
        self.check()?;
        let expires_at = match options.expiry {
            0 => None,
            expiry => Some(
                i64::try_from(expiry)
                    .ok()
                    .and_then(|expiry| now().checked_add(expiry))
                    .ok_or_else(|| {
                        ClientError::Unsupported(format!("expiry of {expiry}s is out of range"))
                    })?,
            ),
        };
        let cas = self.state.next_cas();

        lock(&self.state.documents)
            .entry(self.keyspace.clone())
            .or_default()
            .insert(
                key.to_string(),
                Document {
                    content: value.clone(),
                    cas,
                    expires_at,
                },
            );
        Ok(MutationResult { cas })
    }

    async fn get(&self, key: &str) -> ClientResult<GetResult> {
        self.check()?;
        let mut documents = lock(&self.state.documents);
        let docs = documents
            .get_mut(&self.keyspace)
            .ok_or_else(|| ClientError::DocumentNotFound(key.to_string()))?;

        if docs.get(key).is_some_and(|doc| doc.is_expired(now())) {
            docs.remove(key);
        }
        docs.get(key)
            .map(|doc| GetResult {
                content: doc.content.clone(),
                cas: doc.cas,
                expiry_time: doc.expires_at,
            })
            .ok_or_else(|| ClientError::DocumentNotFound(key.to_string()))
    }

    async fn remove(&self, key: &str) -> ClientResult<MutationResult> {
        self.check()?;
        let mut documents = lock(&self.state.documents);
        let removed = documents
            .get_mut(&self.keyspace)
            .and_then(|docs| docs.remove(key))
            .filter(|doc| !doc.is_expired(now()));

        match removed {
            Some(_) => Ok(MutationResult {
                cas: self.state.next_cas(),
            }),
            None => Err(ClientError::DocumentNotFound(key.to_string())),
        }
    }
}

struct MemoryBucketManager {
    state: Arc<State>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl BucketManager for MemoryBucketManager {
    async fn flush_bucket(&self, name: &str) -> ClientResult<()> {
        ensure_open(&self.closed)?;
        self.state.take_fault()?;
        lock(&self.state.documents).retain(|(bucket, _, _), _| bucket != name);
        Ok(())
    }
}

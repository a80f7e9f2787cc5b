use crate::core::client::{Bucket, BucketManager, Cluster, Collection, Connector};
use crate::core::config::StoreConfig;
use crate::core::error::{Result, StoreError};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Handles shared by every operation of one store instance.
pub struct Connection {
    pub cluster: Arc<dyn Cluster>,
    pub bucket: Arc<dyn Bucket>,
    pub collection: Arc<dyn Collection>,
    pub manager: Arc<dyn BucketManager>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("bucket", &self.bucket.name())
            .finish_non_exhaustive()
    }
}

/// Builds the [`Connection`] lazily, at most once.
///
/// The slot stays locked while a connection is being built so concurrent
/// first callers wait for the same construction. A failed build leaves the
/// slot empty and the next caller tries again.
pub struct ConnectionResolver {
    connector: Arc<dyn Connector>,
    config: Arc<StoreConfig>,
    slot: Mutex<Option<Arc<Connection>>>,
}

impl ConnectionResolver {
    pub fn new(connector: Arc<dyn Connector>, config: Arc<StoreConfig>) -> Self {
        Self {
            connector,
            config,
            slot: Mutex::new(None),
        }
    }

    pub async fn resolve(&self) -> Result<Arc<Connection>> {
        let mut slot = self.slot.lock().await;
        if let Some(connection) = slot.as_ref() {
            debug!("Using already open connection");
            return Ok(Arc::clone(connection));
        }

        let connection = Arc::new(self.build().await?);
        *slot = Some(Arc::clone(&connection));
        Ok(connection)
    }

    pub async fn is_connected(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Closes the cluster and forgets the connection.
    pub async fn close(&self) -> Result<()> {
        let connection = self.slot.lock().await.take();
        match connection {
            Some(connection) => {
                info!("Closing connection to bucket {}", self.config.bucket);
                connection
                    .cluster
                    .close()
                    .await
                    .map_err(StoreError::Operation)
            }
            None => Ok(()),
        }
    }

    async fn build(&self) -> Result<Connection> {
        info!(
            "Opening connection to {} (bucket {})",
            self.config.connection_string, self.config.bucket
        );
        let cluster = self
            .connector
            .connect(
                &self.config.connection_string,
                &self.config.connection_options,
            )
            .await
            .map_err(StoreError::Connection)?;
        let bucket = cluster
            .bucket(&self.config.bucket)
            .await
            .map_err(StoreError::Connection)?;

        let collection = match (&self.config.scope, &self.config.collection) {
            (Some(scope), Some(collection)) => {
                debug!("Resolving collection {}.{}", scope, collection);
                bucket.collection(scope, collection)
            }
            (None, None) => {
                debug!("Resolving default collection");
                bucket.default_collection()
            }
            _ => {
                return Err(StoreError::InvalidConfig(
                    "scope and collection must be set together".to_string(),
                ));
            }
        };

        let manager = cluster.buckets();
        Ok(Connection {
            cluster,
            bucket,
            collection,
            manager,
        })
    }
}

//! Core adapter abstractions

pub mod client;
pub mod config;
pub mod error;
pub mod invoke;
pub mod log;
pub mod pattern;
pub mod policy;

// Re-export main types for cleaner imports
pub use client::{Bucket, BucketManager, Cluster, Collection, Connector, GetResult, MutationResult};
pub use config::{ConnectionOptions, StoreConfig};
pub use error::{ClientError, Result, StoreError};
pub use invoke::{Continuation, Dispatch, continuation};
pub use policy::Cacheability;

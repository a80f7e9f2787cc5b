//! Store clients implementing the [`crate::core::client`] interface

pub mod http;
pub mod memory;

pub use http::HttpConnector;
pub use memory::MemoryConnector;

#![doc = include_str!("../README.md")]

pub mod envelope;
pub mod error;
pub mod models;
pub mod types;

#[cfg(feature = "client")]
pub mod client;
#[cfg(feature = "proxy")]
pub mod proxy;

// Re-exports for convenient access
pub use envelope::{ErrorBody, ProxyResponse};
pub use error::Error;
pub use types::{CacheKey, OwnerId, PropertyId, SessionToken};

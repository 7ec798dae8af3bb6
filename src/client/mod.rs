//! Client side of the Pioloop frontend core.
//!
//! - [`ResourceCache`]: stale-while-revalidate cache with per-key request
//!   deduplication and last-issued-wins ordering.
//! - [`LoadingCoordinator`]: reference-counted global loading indicator.
//! - [`PioloopClient`]: typed calls to the proxy routes over a [`Transport`]
//!   wrapped in an explicit [`Interceptor`] chain.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use pioloop_web::client::{ClientConfig, PioloopClient, redirect_target};
//!
//! let client = PioloopClient::connect(&ClientConfig::from_env()?)?;
//! let mut me = client.use_current_user();
//! let state = me.settled().await;
//! if let Some(target) = redirect_target(&state) {
//!     // navigate to `target`
//! }
//! ```

mod api;
mod cache;
mod error;
mod loader;
mod transport;

pub use api::{
    ClientConfig, LATEST, LOGIN_REDIRECT, ME, MY_PROPERTIES, OWNER_PREFIX, PioloopClient, ROLES,
    SEARCH, latest_key, owner_key, property_key, redirect_target, search_key,
};
pub use cache::{CacheOptions, Resource, ResourceCache, ResourceState, Snapshot};
pub use error::FetchError;
pub use loader::{CallId, DEFAULT_BYPASS, LoaderGuard, LoaderState, LoadingCoordinator};
pub use transport::{
    ApiRequest, ApiResponse, InterceptGuard, InterceptedTransport, Interceptor, LoaderInterceptor,
    ReqwestTransport, Transport,
};

//! Backend proxy routes for Axum.
//!
//! Every route forwards one request to the external Pioloop backend and
//! normalizes the answer: `{success, data, status}` (auth and mutations) or the
//! raw resource (reads) on success, `{error}` with the mirrored status on
//! failure. The session token lives in the HttpOnly `auth_token` cookie and is
//! relayed to the backend as a bearer token or cookie.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use pioloop_web::proxy::{BackendClient, ProxyConfig, proxy_routes};
//!
//! let config = ProxyConfig::from_env()?;
//! let backend = BackendClient::new(&config);
//! let app = axum::Router::new().merge(proxy_routes(config, backend));
//! ```

mod backend;
mod config;
mod cookies;
mod error;
mod extractor;
mod routes;
mod state;
mod traits;
mod types;

#[cfg(test)]
mod tests;

pub use backend::BackendClient;
pub use config::ProxyConfig;
pub use cookies::{SESSION_COOKIE_NAME, attach_auth};
pub use error::ProxyError;
pub use extractor::SessionAuth;
pub use routes::proxy_routes;
pub use traits::Backend;
pub use types::{BackendReply, Credential, CredentialStyle, ProxyRequest};

//! Client HTTP transport and its interceptor chain.
//!
//! Every client call goes through a [`Transport`]. Cross-cutting behavior such
//! as the loading indicator is added by wrapping a transport in
//! [`InterceptedTransport`] with explicit [`Interceptor`]s; nothing patches the
//! underlying HTTP client.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use reqwest::Method;
use serde_json::Value;
use url::Url;

use super::error::FetchError;
use super::loader::LoadingCoordinator;
use crate::error::Error;

/// One call to a proxy route, relative to the frontend origin.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
        }
    }

    #[must_use]
    pub fn send(method: Method, path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            path: path.into(),
            body,
        }
    }
}

/// HTTP status plus decoded JSON body (`Null` for empty bodies).
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait Transport: Send + Sync + 'static {
    fn execute(
        &self,
        request: ApiRequest,
    ) -> impl Future<Output = Result<ApiResponse, FetchError>> + Send;
}

/// Held for the duration of one call; dropped when the call settles.
pub type InterceptGuard = Box<dyn Any + Send>;

/// Hook run around every call of an [`InterceptedTransport`].
pub trait Interceptor: Send + Sync + 'static {
    /// Called before the request is sent. The returned guard is dropped once
    /// the call has settled, on success or failure.
    fn begin(&self, request: &ApiRequest) -> Option<InterceptGuard>;
}

/// Drives the [`LoadingCoordinator`] for every non allow-listed call.
pub struct LoaderInterceptor {
    coordinator: Arc<LoadingCoordinator>,
}

impl LoaderInterceptor {
    #[must_use]
    pub fn new(coordinator: Arc<LoadingCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Interceptor bound to the process-wide coordinator.
    #[must_use]
    pub fn global() -> Self {
        Self::new(LoadingCoordinator::global())
    }
}

impl Interceptor for LoaderInterceptor {
    fn begin(&self, request: &ApiRequest) -> Option<InterceptGuard> {
        self.coordinator
            .track(&request.path)
            .map(|guard| Box::new(guard) as InterceptGuard)
    }
}

/// A transport wrapped in an ordered interceptor chain.
pub struct InterceptedTransport<T> {
    inner: T,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl<T: Transport> InterceptedTransport<T> {
    #[must_use]
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            interceptors: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_interceptor(mut self, interceptor: impl Interceptor) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }
}

impl<T: Transport> Transport for InterceptedTransport<T> {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, FetchError> {
        let guards: Vec<InterceptGuard> = self
            .interceptors
            .iter()
            .filter_map(|i| i.begin(&request))
            .collect();

        let result = self.inner.execute(request).await;

        // Release in reverse acquisition order.
        for guard in guards.into_iter().rev() {
            drop(guard);
        }
        result
    }
}

/// [`Transport`] over `reqwest`, keeping the session cookie between calls.
pub struct ReqwestTransport {
    origin: Url,
    http: reqwest::Client,
}

impl ReqwestTransport {
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be built.
    pub fn new(origin: Url) -> Result<Self, Error> {
        let http = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Self { origin, http })
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    fn url_for(&self, path: &str) -> Result<Url, FetchError> {
        self.origin
            .join(path)
            .map_err(|e| FetchError::Transport(format!("invalid path {path}: {e}")))
    }
}

impl Transport for ReqwestTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, FetchError> {
        let url = self.url_for(&request.path)?;
        let mut builder = self.http.request(request.method, url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        let body = decode_body(status, &bytes)?;

        Ok(ApiResponse { status, body })
    }
}

/// JSON body of an answer. A non-JSON error page decodes to `Null` so the
/// caller still sees the status.
fn decode_body(status: u16, bytes: &[u8]) -> Result<Value, FetchError> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    match serde_json::from_slice(bytes) {
        Ok(body) => Ok(body),
        Err(e) if (200..300).contains(&status) => Err(e.into()),
        Err(e) => {
            tracing::debug!(status, error = %e, "Ignoring non-JSON error body");
            Ok(Value::Null)
        }
    }
}

use std::future::Future;

use super::error::ProxyError;
use super::types::{BackendReply, ProxyRequest};

/// Transport to the external backend.
///
/// Implementations issue exactly one HTTP call per [`send`](Backend::send) and
/// never retry. Non-2xx answers are returned as a [`BackendReply`]; only local
/// failures (network, missing configuration) are errors.
///
/// # Example
///
/// ```rust,ignore
/// impl Backend for RecordingBackend {
///     async fn send(&self, request: ProxyRequest) -> Result<BackendReply, ProxyError> {
///         self.calls.lock().push(request);
///         Ok(BackendReply::new(StatusCode::OK, "[]"))
///     }
/// }
/// ```
pub trait Backend: Send + Sync + 'static {
    fn send(
        &self,
        request: ProxyRequest,
    ) -> impl Future<Output = Result<BackendReply, ProxyError>> + Send;
}

use axum::http::header::COOKIE;
use url::Url;

use super::config::ProxyConfig;
use super::cookies::SESSION_COOKIE_NAME;
use super::error::ProxyError;
use super::traits::Backend;
use super::types::{BackendReply, CredentialStyle, ProxyRequest};

/// [`Backend`] over `reqwest`.
pub struct BackendClient {
    api_url: Option<Url>,
    http: reqwest::Client,
}

impl BackendClient {
    #[must_use]
    pub fn new(config: &ProxyConfig) -> Self {
        Self {
            api_url: config.api_url().cloned(),
            http: reqwest::Client::new(),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    fn url_for(&self, request: &ProxyRequest) -> Result<Url, ProxyError> {
        let base = self.api_url.as_ref().ok_or_else(|| {
            ProxyError::Internal("PIOLOOP_API_URL is not configured".into())
        })?;

        let raw = format!("{}{}", base.as_str().trim_end_matches('/'), request.path);
        let mut url: Url = raw
            .parse()
            .map_err(|e| ProxyError::Internal(format!("invalid backend URL {raw}: {e}")))?;

        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }
        Ok(url)
    }
}

impl BackendClient {
    /// Build the outgoing request: URL, relayed credential and JSON body.
    fn build_request(&self, request: &ProxyRequest) -> Result<reqwest::Request, ProxyError> {
        let url = self.url_for(request)?;

        let mut builder = self.http.request(request.method.clone(), url);
        if let Some(credential) = &request.credential {
            builder = match credential.style {
                CredentialStyle::Bearer => builder.bearer_auth(credential.token.expose()),
                CredentialStyle::Cookie => builder.header(
                    COOKIE,
                    format!("{SESSION_COOKIE_NAME}={}", credential.token.expose()),
                ),
            };
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        builder
            .build()
            .map_err(|e| ProxyError::Internal(format!("building backend request failed: {e}")))
    }
}

impl Backend for BackendClient {
    async fn send(&self, request: ProxyRequest) -> Result<BackendReply, ProxyError> {
        let outgoing = self.build_request(&request)?;

        tracing::debug!(method = %request.method, path = %request.path, "Forwarding to backend");

        let response = self.http.execute(outgoing).await.map_err(|e| {
            ProxyError::Internal(format!("backend request to {} failed: {e}", request.path))
        })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ProxyError::Internal(format!("reading backend body failed: {e}")))?;

        Ok(BackendReply { status, body })
    }
}

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::cookies;
use crate::envelope::ErrorBody;

pub(crate) const MSG_UNAUTHENTICATED: &str = "Non authentifié";
pub(crate) const MSG_PROPERTY_NOT_FOUND: &str = "Propriété non trouvée";
pub(crate) const MSG_NOT_FOUND: &str = "Ressource non trouvée";
pub(crate) const MSG_INTERNAL: &str = "Erreur interne du serveur";
pub(crate) const MSG_UPSTREAM: &str = "Erreur du serveur distant";

/// Failure taxonomy of the proxy routes.
///
/// Every variant maps to exactly one status code and renders as
/// `{"error": "..."}`. `Unauthenticated` also clears the session cookie.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Missing or malformed request fields.
    #[error("{0}")]
    InvalidInput(String),

    /// No session cookie, or the backend rejected it.
    #[error("Non authentifié")]
    Unauthenticated,

    /// Backend answered 404.
    #[error("{0}")]
    NotFound(&'static str),

    /// Any other non-2xx backend answer; status passed through.
    #[error("{message}")]
    Upstream { status: StatusCode, message: String },

    /// Local failure: network error, unparsable body, missing configuration.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream { status, .. } => *status,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn missing_fields(fields: &[&str]) -> Self {
        Self::InvalidInput(format!("Champs requis manquants: {}", fields.join(", ")))
    }

    /// Message shown to the browser. Internal details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            Self::Unauthenticated => MSG_UNAUTHENTICATED.to_string(),
            Self::Internal(_) => MSG_INTERNAL.to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ErrorBody {
            error: self.public_message(),
        });

        match self {
            Self::Unauthenticated => {
                let jar = CookieJar::new().add(cookies::clear_session_cookie());
                (status, jar, body).into_response()
            }
            Self::Internal(ref detail) => {
                tracing::error!(error = %detail, "Proxy internal error");
                (status, body).into_response()
            }
            Self::Upstream { status: upstream, ref message } => {
                tracing::warn!(status = upstream.as_u16(), message = %message, "Upstream error");
                (status, body).into_response()
            }
            _ => (status, body).into_response(),
        }
    }
}

/// Fields the backend is known to put error text in.
///
/// Covers plain `{message}` / `{error}` bodies and RFC 7807 problem details
/// with an optional validation `errors` map.
#[derive(Debug, Default, Deserialize)]
struct BackendErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    errors: Option<Map<String, Value>>,
}

impl BackendErrorBody {
    fn first_message(self) -> Option<String> {
        self.message
            .or(self.error)
            .or(self.detail)
            .or(self.title)
            .or_else(|| self.errors.and_then(first_validation_error))
            .filter(|m| !m.trim().is_empty())
    }
}

fn first_validation_error(errors: Map<String, Value>) -> Option<String> {
    errors.into_iter().find_map(|(_, v)| match v {
        Value::String(s) => Some(s),
        Value::Array(items) => items.into_iter().find_map(|i| match i {
            Value::String(s) => Some(s),
            _ => None,
        }),
        _ => None,
    })
}

/// Translate a non-success backend reply into a [`ProxyError`].
///
/// `not_found` is the message used for 404 so each route can name its resource.
pub(crate) fn normalize_backend_error(
    status: StatusCode,
    body: &[u8],
    not_found: &'static str,
) -> ProxyError {
    match status {
        StatusCode::UNAUTHORIZED => ProxyError::Unauthenticated,
        StatusCode::NOT_FOUND => ProxyError::NotFound(not_found),
        _ => {
            let message = serde_json::from_slice::<BackendErrorBody>(body)
                .ok()
                .and_then(BackendErrorBody::first_message)
                .unwrap_or_else(|| MSG_UPSTREAM.to_string());
            // Non-error upstream codes are reported as a bad gateway.
            let status = if status.is_client_error() || status.is_server_error() {
                status
            } else {
                StatusCode::BAD_GATEWAY
            };
            ProxyError::Upstream { status, message }
        }
    }
}

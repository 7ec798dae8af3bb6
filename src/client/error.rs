/// Client-side fetch failure.
///
/// `Clone` so one failed fetch can be handed to every subscriber of a key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum FetchError {
    /// Missing or expired session (HTTP 401).
    #[error("Non authentifié")]
    Unauthenticated,

    /// Resource does not exist (HTTP 404).
    #[error("{0}")]
    NotFound(String),

    /// Any other non-2xx proxy answer.
    #[error("HTTP {status}: {message}")]
    Api { status: u16, message: String },

    /// The request never produced an HTTP answer.
    #[error("Network error: {0}")]
    Transport(String),

    /// The answer was not the expected JSON shape.
    #[error("Decode error: {0}")]
    Decode(String),
}

impl FetchError {
    /// Build from a non-success status and the `{error}` message of the proxy body.
    #[must_use]
    pub fn from_status(status: u16, message: Option<String>) -> Self {
        match status {
            401 => Self::Unauthenticated,
            404 => Self::NotFound(message.unwrap_or_else(|| "Ressource non trouvée".into())),
            _ => Self::Api {
                status,
                message: message.unwrap_or_else(|| format!("HTTP {status}")),
            },
        }
    }

    #[must_use]
    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, Self::Unauthenticated)
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(FetchError::from_status(401, None), FetchError::Unauthenticated);
        assert_eq!(
            FetchError::from_status(404, Some("Propriété non trouvée".into())),
            FetchError::NotFound("Propriété non trouvée".into())
        );
        assert_eq!(
            FetchError::from_status(503, None),
            FetchError::Api { status: 503, message: "HTTP 503".into() }
        );
    }
}

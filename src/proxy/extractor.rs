use std::convert::Infallible;

use axum::extract::{FromRequestParts, OptionalFromRequestParts};
use axum::http::request::Parts;
use axum_extra::extract::CookieJar;

use super::cookies;
use super::error::ProxyError;
use crate::types::SessionToken;

/// Session token read from the `auth_token` cookie.
///
/// Use as an Axum extractor on routes that need the backend session. Rejects
/// with [`ProxyError::Unauthenticated`] before the handler runs, so no backend
/// call is made without a session.
///
/// ```rust,ignore
/// async fn me(SessionAuth(token): SessionAuth) -> impl IntoResponse { ... }
///
/// // Optional: routes that forward the session only when present
/// async fn logout(session: Option<SessionAuth>) -> impl IntoResponse { ... }
/// ```
#[derive(Debug, Clone)]
pub struct SessionAuth(pub SessionToken);

impl<S: Send + Sync> FromRequestParts<S> for SessionAuth {
    type Rejection = ProxyError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let jar = <CookieJar as FromRequestParts<S>>::from_request_parts(parts, state)
            .await
            .map_err(|_| ProxyError::Unauthenticated)?;

        cookies::get_session_token(&jar)
            .map(SessionAuth)
            .ok_or(ProxyError::Unauthenticated)
    }
}

impl<S: Send + Sync> OptionalFromRequestParts<S> for SessionAuth {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        let jar = <CookieJar as FromRequestParts<S>>::from_request_parts(parts, state).await?;
        Ok(cookies::get_session_token(&jar).map(SessionAuth))
    }
}

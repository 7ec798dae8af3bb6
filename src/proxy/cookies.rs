use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use serde_json::Value;
use time::Duration;

use super::config::ProxySettings;
use super::types::{Credential, CredentialStyle, ProxyRequest};
use crate::types::SessionToken;

pub const SESSION_COOKIE_NAME: &str = "auth_token";

/// Create session cookie.
pub(super) fn session_cookie(token: &SessionToken, ttl_days: i64, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, token.expose().to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(Duration::days(ttl_days))
        .build()
}

/// Create removal cookie for session.
pub(crate) fn clear_session_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, ""))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(Duration::ZERO)
        .build()
}

/// Get the session token from cookies. Empty values count as absent.
pub(super) fn get_session_token(jar: &CookieJar) -> Option<SessionToken> {
    jar.get(SESSION_COOKIE_NAME)
        .map(|c| c.value())
        .filter(|v| !v.is_empty())
        .map(SessionToken::new)
}

/// Copy the session token onto an outgoing backend call.
#[must_use]
pub fn attach_auth(
    request: ProxyRequest,
    token: SessionToken,
    style: CredentialStyle,
) -> ProxyRequest {
    ProxyRequest {
        credential: Some(Credential { token, style }),
        ..request
    }
}

/// Take the session token out of a backend login/registration body.
///
/// Looks at `token` then `data.token`. The field is removed so the raw token
/// is never forwarded to the browser.
pub(super) fn take_token(body: &mut Value) -> Option<SessionToken> {
    let top = body.as_object_mut().and_then(|o| o.remove("token"));
    let token = match top {
        Some(v) => Some(v),
        None => body
            .get_mut("data")
            .and_then(Value::as_object_mut)
            .and_then(|o| o.remove("token")),
    };

    token
        .and_then(|v| v.as_str().map(str::to_owned))
        .filter(|t| !t.is_empty())
        .map(SessionToken::new)
}

/// Build the cookie-set instruction for a backend login body, if it holds a token.
pub(super) fn issue_session(body: &mut Value, settings: &ProxySettings) -> Option<Cookie<'static>> {
    take_token(body).map(|token| {
        session_cookie(&token, settings.session_ttl_days, settings.secure_cookies)
    })
}

/// Build the cookie-delete instruction.
pub(super) fn revoke_session() -> Cookie<'static> {
    clear_session_cookie()
}

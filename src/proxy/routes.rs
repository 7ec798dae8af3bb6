use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post, put};
use axum_extra::extract::CookieJar;
use serde_json::{Value, json};

use super::config::ProxyConfig;
use super::cookies;
use super::error::{
    MSG_NOT_FOUND, MSG_PROPERTY_NOT_FOUND, ProxyError, normalize_backend_error,
};
use super::extractor::SessionAuth;
use super::state::ProxyState;
use super::traits::Backend;
use super::types::ProxyRequest;
use crate::envelope::ProxyResponse;
use crate::types::SessionToken;

const SEARCH_PARAMS: [&str; 6] = ["location", "checkIn", "checkOut", "guests", "page", "pageSize"];
const NUMERIC_SEARCH_PARAMS: [&str; 3] = ["guests", "page", "pageSize"];

/// Create the Pioloop proxy router.
pub fn proxy_routes<B: Backend>(config: ProxyConfig, backend: B) -> Router {
    let state = ProxyState {
        backend: Arc::new(backend),
        settings: config.settings,
    };

    Router::new()
        .route("/api/auth/login", post(login::<B>))
        .route("/api/auth/logout", post(logout::<B>))
        .route("/api/auth/me", get(me::<B>))
        .route(
            "/api/auth/initiate-registration",
            post(initiate_registration::<B>),
        )
        .route(
            "/api/auth/complete-registration",
            post(complete_registration::<B>),
        )
        .route("/api/properties/latest", get(latest_properties::<B>))
        .route("/api/properties/search", get(search_properties::<B>))
        .route("/api/properties/my-properties", get(my_properties::<B>))
        .route("/api/properties/create", post(create_property::<B>))
        .route("/api/properties/update/{id}", put(update_property::<B>))
        .route("/api/properties/delete/{id}", delete(delete_property::<B>))
        .route("/api/properties/owner/{owner_id}", get(owner_properties::<B>))
        .route("/api/properties/{id}", get(get_property::<B>))
        .route("/api/roles", get(roles::<B>))
        .with_state(state)
}

impl<B: Backend> ProxyState<B> {
    fn authorize(&self, request: ProxyRequest, token: SessionToken) -> ProxyRequest {
        cookies::attach_auth(request, token, self.settings.credential_style)
    }

    /// Issue exactly one backend call and decode its JSON body.
    async fn forward(
        &self,
        request: ProxyRequest,
        not_found: &'static str,
    ) -> Result<(StatusCode, Value), ProxyError> {
        let path = request.path.clone();
        let reply = self.backend.send(request).await?;

        if !reply.status.is_success() {
            return Err(normalize_backend_error(reply.status, &reply.body, not_found));
        }
        if reply.body.is_empty() {
            return Ok((reply.status, Value::Null));
        }

        let data = serde_json::from_slice(&reply.body).map_err(|e| {
            ProxyError::Internal(format!("backend returned non-JSON body for {path}: {e}"))
        })?;
        Ok((reply.status, data))
    }
}

// ── Auth ───────────────────────────────────────────────────────────

async fn login<B: Backend>(
    State(state): State<ProxyState<B>>,
    jar: CookieJar,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let body = parse_body(&body)?;
    require_fields(&body, &["email", "password"])?;

    let request = ProxyRequest::post("/api/auth/login").with_body(body);
    let (status, mut data) = state.forward(request, MSG_NOT_FOUND).await?;

    let jar = match cookies::issue_session(&mut data, &state.settings) {
        Some(cookie) => {
            tracing::info!("Login successful, session issued");
            jar.add(cookie)
        }
        None => {
            tracing::warn!("Backend login response carried no token; no session issued");
            jar
        }
    };

    Ok((jar, envelope(status, data)).into_response())
}

async fn logout<B: Backend>(
    State(state): State<ProxyState<B>>,
    session: Option<SessionAuth>,
    jar: CookieJar,
) -> Response {
    // Best-effort: the local session is revoked whatever the backend says.
    if let Some(SessionAuth(token)) = session {
        let request = state.authorize(ProxyRequest::post("/api/auth/logout"), token);
        match state.backend.send(request).await {
            Ok(reply) if reply.status.is_success() => {}
            Ok(reply) => {
                tracing::warn!(status = reply.status.as_u16(), "Backend logout rejected");
            }
            Err(e) => tracing::warn!(error = %e, "Backend logout failed"),
        }
    }

    tracing::info!("Session revoked");
    let jar = jar.add(cookies::revoke_session());
    (jar, envelope(StatusCode::OK, json!({ "message": "Déconnexion réussie" }))).into_response()
}

async fn me<B: Backend>(
    State(state): State<ProxyState<B>>,
    SessionAuth(token): SessionAuth,
) -> Result<Response, ProxyError> {
    let request = state.authorize(ProxyRequest::get("/api/auth/me"), token);
    let (status, data) = state.forward(request, MSG_NOT_FOUND).await?;
    Ok(envelope(status, data).into_response())
}

async fn initiate_registration<B: Backend>(
    State(state): State<ProxyState<B>>,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let body = parse_body(&body)?;
    require_fields(&body, &["email", "password", "firstName", "lastName"])?;

    let request = ProxyRequest::post("/api/auth/initiate-registration").with_body(body);
    let (status, data) = state.forward(request, MSG_NOT_FOUND).await?;
    Ok(envelope(status, data).into_response())
}

async fn complete_registration<B: Backend>(
    State(state): State<ProxyState<B>>,
    jar: CookieJar,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let body = parse_body(&body)?;
    require_fields(&body, &["email", "verificationCode"])?;

    let request = ProxyRequest::post("/api/auth/complete-registration").with_body(body);
    let (status, mut data) = state.forward(request, MSG_NOT_FOUND).await?;

    let jar = match cookies::issue_session(&mut data, &state.settings) {
        Some(cookie) => {
            tracing::info!("Registration completed, session issued");
            jar.add(cookie)
        }
        None => jar,
    };

    Ok((jar, envelope(status, data)).into_response())
}

// ── Properties ─────────────────────────────────────────────────────

async fn latest_properties<B: Backend>(
    State(state): State<ProxyState<B>>,
    RawQuery(query): RawQuery,
) -> Result<Response, ProxyError> {
    let params = query_pairs(query.as_deref());
    let mut request = ProxyRequest::get("/api/property/latest");

    if let Some((_, limit)) = params.iter().find(|(k, v)| k == "limit" && !v.is_empty()) {
        require_number("limit", limit)?;
        request = request.with_query([("limit", limit.clone())]);
    }

    let (status, data) = state.forward(request, MSG_NOT_FOUND).await?;
    Ok(raw(status, data))
}

async fn search_properties<B: Backend>(
    State(state): State<ProxyState<B>>,
    RawQuery(query): RawQuery,
) -> Result<Response, ProxyError> {
    let forwarded: Vec<(String, String)> = query_pairs(query.as_deref())
        .into_iter()
        .filter(|(k, v)| SEARCH_PARAMS.contains(&k.as_str()) && !v.is_empty())
        .collect();

    for (k, v) in &forwarded {
        if NUMERIC_SEARCH_PARAMS.contains(&k.as_str()) {
            require_number(k, v)?;
        }
    }

    let request = ProxyRequest::get("/api/property/search").with_query(forwarded);
    let (status, data) = state.forward(request, MSG_NOT_FOUND).await?;
    Ok(raw(status, data))
}

async fn get_property<B: Backend>(
    State(state): State<ProxyState<B>>,
    Path(id): Path<String>,
) -> Result<Response, ProxyError> {
    let id = require_id(&id)?;
    let request = ProxyRequest::get(format!("/api/property/{id}"));
    let (status, data) = state.forward(request, MSG_PROPERTY_NOT_FOUND).await?;
    Ok(raw(status, data))
}

async fn create_property<B: Backend>(
    State(state): State<ProxyState<B>>,
    SessionAuth(token): SessionAuth,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let body = parse_body(&body)?;
    require_fields(&body, &["title", "address", "city", "pricePerNight"])?;

    let request = state.authorize(ProxyRequest::post("/api/property/create").with_body(body), token);
    let (status, data) = state.forward(request, MSG_NOT_FOUND).await?;
    Ok(envelope(status, data).into_response())
}

async fn update_property<B: Backend>(
    State(state): State<ProxyState<B>>,
    SessionAuth(token): SessionAuth,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let id = require_id(&id)?;
    let body = parse_body(&body)?;
    if body.as_object().is_none_or(|o| o.is_empty()) {
        return Err(ProxyError::InvalidInput(
            "Aucune donnée de mise à jour fournie".into(),
        ));
    }

    let request = ProxyRequest::new(axum::http::Method::PUT, format!("/api/property/{id}"))
        .with_body(body);
    let request = state.authorize(request, token);
    let (status, data) = state.forward(request, MSG_PROPERTY_NOT_FOUND).await?;
    Ok(envelope(status, data).into_response())
}

async fn delete_property<B: Backend>(
    State(state): State<ProxyState<B>>,
    SessionAuth(token): SessionAuth,
    Path(id): Path<String>,
) -> Result<Response, ProxyError> {
    let id = require_id(&id)?;
    let request = ProxyRequest::new(axum::http::Method::DELETE, format!("/api/property/{id}"));
    let request = state.authorize(request, token);
    let (status, data) = state.forward(request, MSG_PROPERTY_NOT_FOUND).await?;
    Ok(envelope(status, data).into_response())
}

async fn my_properties<B: Backend>(
    State(state): State<ProxyState<B>>,
    SessionAuth(token): SessionAuth,
) -> Result<Response, ProxyError> {
    let request = state.authorize(ProxyRequest::get("/api/property/my-properties"), token);
    let (status, data) = state.forward(request, MSG_NOT_FOUND).await?;
    Ok(raw(status, data))
}

async fn owner_properties<B: Backend>(
    State(state): State<ProxyState<B>>,
    Path(owner_id): Path<String>,
) -> Result<Response, ProxyError> {
    let owner_id = require_id(&owner_id)?;
    let request = ProxyRequest::get(format!("/api/property/owner/{owner_id}"));
    let (status, data) = state.forward(request, MSG_NOT_FOUND).await?;
    Ok(raw(status, data))
}

// ── Roles ──────────────────────────────────────────────────────────

async fn roles<B: Backend>(State(state): State<ProxyState<B>>) -> Result<Response, ProxyError> {
    let (status, data) = state
        .forward(ProxyRequest::get("/api/roles"), MSG_NOT_FOUND)
        .await?;
    Ok(raw(status, data))
}

// ── Helpers ────────────────────────────────────────────────────────

fn envelope(status: StatusCode, data: Value) -> (StatusCode, Json<ProxyResponse<Value>>) {
    (
        status,
        Json(ProxyResponse::ok(data).with_status(status.as_u16())),
    )
}

fn raw(status: StatusCode, data: Value) -> Response {
    (status, Json(data)).into_response()
}

fn parse_body(body: &Bytes) -> Result<Value, ProxyError> {
    if body.is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_slice(body)
        .map_err(|_| ProxyError::InvalidInput("Corps de requête JSON invalide".into()))
}

/// Fail with the list of fields that are absent, null or blank.
fn require_fields(body: &Value, fields: &[&str]) -> Result<(), ProxyError> {
    let missing: Vec<&str> = fields
        .iter()
        .copied()
        .filter(|f| match body.get(f) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        })
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ProxyError::missing_fields(&missing))
    }
}

/// Validate a path identifier and percent-encode it for the backend path.
fn require_id(id: &str) -> Result<String, ProxyError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(ProxyError::InvalidInput("Identifiant requis".into()));
    }
    Ok(urlencoding::encode(id).into_owned())
}

fn require_number(name: &str, value: &str) -> Result<(), ProxyError> {
    value
        .parse::<u32>()
        .map(|_| ())
        .map_err(|_| ProxyError::InvalidInput(format!("Paramètre '{name}' invalide")))
}

fn query_pairs(query: Option<&str>) -> Vec<(String, String)> {
    query
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect()
        })
        .unwrap_or_default()
}

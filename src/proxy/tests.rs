use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tower::ServiceExt;

use super::*;

type Reply = Box<dyn Fn(&ProxyRequest) -> Result<BackendReply, ProxyError> + Send + Sync>;

/// In-memory backend that records every call and answers from a script.
struct RecordingBackend {
    calls: Arc<Mutex<Vec<ProxyRequest>>>,
    reply: Reply,
}

impl Backend for RecordingBackend {
    async fn send(&self, request: ProxyRequest) -> Result<BackendReply, ProxyError> {
        let reply = (self.reply)(&request);
        self.calls.lock().push(request);
        reply
    }
}

fn json_reply(status: StatusCode, body: Value) -> Result<BackendReply, ProxyError> {
    Ok(BackendReply::new(status, body.to_string()))
}

fn app_with(
    config: ProxyConfig,
    reply: impl Fn(&ProxyRequest) -> Result<BackendReply, ProxyError> + Send + Sync + 'static,
) -> (Router, Arc<Mutex<Vec<ProxyRequest>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let backend = RecordingBackend {
        calls: calls.clone(),
        reply: Box::new(reply),
    };
    (proxy_routes(config, backend), calls)
}

fn app(
    reply: impl Fn(&ProxyRequest) -> Result<BackendReply, ProxyError> + Send + Sync + 'static,
) -> (Router, Arc<Mutex<Vec<ProxyRequest>>>) {
    let config = ProxyConfig::new("http://backend.test".parse().unwrap()).with_secure_cookies(false);
    app_with(config, reply)
}

fn request(method: Method, uri: &str, cookie: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = cookie {
        builder = builder.header(COOKIE, format!("auth_token={token}"));
    }
    match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok().map(str::to_owned))
        .collect()
}

fn session_cleared(response: &Response) -> bool {
    set_cookies(response)
        .iter()
        .any(|c| c.starts_with("auth_token=;") && c.contains("Max-Age=0"))
}

// ── Properties ─────────────────────────────────────────────────────

#[tokio::test]
async fn latest_forwards_limit_and_returns_raw_array() {
    let (app, calls) = app(|_| {
        json_reply(
            StatusCode::OK,
            json!([{"id": "1"}, {"id": "2"}, {"id": "3"}, {"id": "4"}, {"id": "5"}]),
        )
    });

    let response = app
        .oneshot(request(Method::GET, "/api/properties/latest?limit=5", None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body.as_array().map(Vec::len), Some(5));

    let calls = calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].path, "/api/property/latest");
    assert_eq!(calls[0].query, vec![("limit".to_string(), "5".to_string())]);
    assert!(calls[0].credential.is_none());
}

#[tokio::test]
async fn latest_rejects_non_numeric_limit() {
    let (app, calls) = app(|_| json_reply(StatusCode::OK, json!([])));

    let response = app
        .oneshot(request(Method::GET, "/api/properties/latest?limit=abc", None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(calls.lock().is_empty());
}

#[tokio::test]
async fn delete_without_cookie_is_unauthenticated_and_skips_backend() {
    let (app, calls) = app(|_| json_reply(StatusCode::OK, json!({})));

    let response = app
        .oneshot(request(Method::DELETE, "/api/properties/delete/abc", None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(session_cleared(&response));
    assert_eq!(body_json(response).await, json!({"error": "Non authentifié"}));
    assert!(calls.lock().is_empty());
}

#[tokio::test]
async fn delete_with_cookie_forwards_credential() {
    let (app, calls) = app(|_| Ok(BackendReply::new(StatusCode::NO_CONTENT, "")));

    let response = app
        .oneshot(request(Method::DELETE, "/api/properties/delete/abc", Some("tok"), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let calls = calls.lock();
    assert_eq!(calls[0].method, Method::DELETE);
    assert_eq!(calls[0].path, "/api/property/abc");
    let credential = calls[0].credential.as_ref().unwrap();
    assert_eq!(credential.token.expose(), "tok");
    assert_eq!(credential.style, CredentialStyle::Bearer);
}

#[tokio::test]
async fn property_not_found_is_mapped() {
    let (app, _) = app(|_| json_reply(StatusCode::NOT_FOUND, json!({"title": "Not Found"})));

    let response = app
        .oneshot(request(Method::GET, "/api/properties/missing-id", None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await, json!({"error": "Propriété non trouvée"}));
}

#[tokio::test]
async fn static_segments_win_over_property_id() {
    let (app, calls) = app(|_| json_reply(StatusCode::OK, json!([])));

    let response = app
        .oneshot(request(Method::GET, "/api/properties/my-properties", Some("tok"), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(calls.lock()[0].path, "/api/property/my-properties");
}

#[tokio::test]
async fn search_forwards_only_known_params() {
    let (app, calls) = app(|_| json_reply(StatusCode::OK, json!({"properties": []})));

    let uri = "/api/properties/search?location=Lyon&checkIn=&guests=3&debug=1&pageSize=10";
    let response = app
        .oneshot(request(Method::GET, uri, None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let calls = calls.lock();
    assert_eq!(calls[0].path, "/api/property/search");
    assert_eq!(
        calls[0].query,
        vec![
            ("location".to_string(), "Lyon".to_string()),
            ("guests".to_string(), "3".to_string()),
            ("pageSize".to_string(), "10".to_string()),
        ]
    );
}

#[tokio::test]
async fn search_rejects_bad_guest_count() {
    let (app, calls) = app(|_| json_reply(StatusCode::OK, json!({})));

    let response = app
        .oneshot(request(Method::GET, "/api/properties/search?guests=many", None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await,
        json!({"error": "Paramètre 'guests' invalide"})
    );
    assert!(calls.lock().is_empty());
}

#[tokio::test]
async fn create_property_returns_envelope_with_upstream_status() {
    let (app, calls) = app(|_| json_reply(StatusCode::CREATED, json!({"id": "p9"})));

    let draft = json!({
        "title": "Maison",
        "address": "1 rue des Lilas",
        "city": "Nantes",
        "pricePerNight": 80
    });
    let response = app
        .oneshot(request(Method::POST, "/api/properties/create", Some("tok"), Some(draft.clone())))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        body_json(response).await,
        json!({"success": true, "data": {"id": "p9"}, "status": 201})
    );
    assert_eq!(calls.lock()[0].body.as_ref(), Some(&draft));
}

#[tokio::test]
async fn create_property_requires_fields() {
    let (app, calls) = app(|_| json_reply(StatusCode::CREATED, json!({})));

    let response = app
        .oneshot(request(
            Method::POST,
            "/api/properties/create",
            Some("tok"),
            Some(json!({"title": "Maison"})),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await,
        json!({"error": "Champs requis manquants: address, city, pricePerNight"})
    );
    assert!(calls.lock().is_empty());
}

#[tokio::test]
async fn update_requires_non_empty_body() {
    let (app, calls) = app(|_| json_reply(StatusCode::OK, json!({})));

    let response = app
        .oneshot(request(Method::PUT, "/api/properties/update/p1", Some("tok"), Some(json!({}))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(calls.lock().is_empty());
}

#[tokio::test]
async fn update_uses_put_on_backend() {
    let (app, calls) = app(|_| json_reply(StatusCode::OK, json!({"id": "p1", "title": "Neuf"})));

    let response = app
        .oneshot(request(
            Method::PUT,
            "/api/properties/update/p1",
            Some("tok"),
            Some(json!({"title": "Neuf"})),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let calls = calls.lock();
    assert_eq!(calls[0].method, Method::PUT);
    assert_eq!(calls[0].path, "/api/property/p1");
}

#[tokio::test]
async fn owner_and_roles_are_public() {
    let (app, calls) = app(|_| json_reply(StatusCode::OK, json!([])));

    let response = app
        .clone()
        .oneshot(request(Method::GET, "/api/properties/owner/o-1", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(request(Method::GET, "/api/roles", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let calls = calls.lock();
    assert_eq!(calls[0].path, "/api/property/owner/o-1");
    assert_eq!(calls[1].path, "/api/roles");
}

// ── Error normalization ────────────────────────────────────────────

#[tokio::test]
async fn upstream_error_status_and_message_pass_through() {
    let (app, _) = app(|_| {
        json_reply(
            StatusCode::SERVICE_UNAVAILABLE,
            json!({"message": "Maintenance en cours"}),
        )
    });

    let response = app
        .oneshot(request(Method::GET, "/api/roles", None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await, json!({"error": "Maintenance en cours"}));
}

#[tokio::test]
async fn non_json_success_body_is_internal_error() {
    let (app, _) = app(|_| Ok(BackendReply::new(StatusCode::OK, "<html>oops</html>")));

    let response = app
        .oneshot(request(Method::GET, "/api/roles", None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await, json!({"error": "Erreur interne du serveur"}));
}

#[tokio::test]
async fn network_failure_is_internal_error() {
    let (app, calls) = app(|_| Err(ProxyError::Internal("connection refused".into())));

    let response = app
        .oneshot(request(Method::GET, "/api/properties/p1", None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(calls.lock().len(), 1);
}

#[tokio::test]
async fn missing_backend_url_is_internal_error() {
    let config = ProxyConfig::unconfigured();
    let app = proxy_routes(config.clone(), BackendClient::new(&config));

    let response = app
        .oneshot(request(Method::GET, "/api/roles", None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await, json!({"error": "Erreur interne du serveur"}));
}

// ── Auth ───────────────────────────────────────────────────────────

#[tokio::test]
async fn login_with_token_sets_cookie_and_hides_token() {
    let (app, calls) = app(|_| {
        json_reply(
            StatusCode::OK,
            json!({"token": "secret", "user": {"id": "u1", "email": "a@b.c"}}),
        )
    });

    let response = app
        .oneshot(request(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({"email": "a@b.c", "password": "pw"})),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let cookies = set_cookies(&response);
    let session = cookies
        .iter()
        .find(|c| c.starts_with("auth_token=secret"))
        .expect("session cookie");
    assert!(session.contains("HttpOnly"));
    assert!(session.contains("SameSite=Lax"));
    assert!(session.contains("Path=/"));
    assert!(session.contains("Max-Age=604800"));

    let body = body_json(response).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"], json!({"user": {"id": "u1", "email": "a@b.c"}}));
    assert!(!body.to_string().contains("secret"));
    assert!(calls.lock()[0].credential.is_none());
}

#[tokio::test]
async fn login_without_token_sets_no_cookie() {
    let (app, _) = app(|_| json_reply(StatusCode::OK, json!({"user": {"id": "u1"}})));

    let response = app
        .oneshot(request(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({"email": "a@b.c", "password": "pw"})),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookies(&response).is_empty());
}

#[tokio::test]
async fn login_requires_credentials() {
    let (app, calls) = app(|_| json_reply(StatusCode::OK, json!({"token": "t"})));

    let response = app
        .oneshot(request(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({"email": "a@b.c"})),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await,
        json!({"error": "Champs requis manquants: password"})
    );
    assert!(calls.lock().is_empty());
}

#[tokio::test]
async fn login_rejects_malformed_json() {
    let (app, calls) = app(|_| json_reply(StatusCode::OK, json!({})));

    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/auth/login")
        .header("content-type", "application/json")
        .body(Body::from("{email:"))
        .unwrap();
    let response = app.oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(calls.lock().is_empty());
}

#[tokio::test]
async fn logout_clears_cookie_even_if_backend_fails() {
    let (app, calls) = app(|_| Err(ProxyError::Internal("connection reset".into())));

    let response = app
        .oneshot(request(Method::POST, "/api/auth/logout", Some("tok"), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(session_cleared(&response));
    assert_eq!(calls.lock().len(), 1);
    assert_eq!(body_json(response).await["success"], json!(true));
}

#[tokio::test]
async fn logout_clears_cookie_when_backend_rejects() {
    let (app, _) = app(|_| json_reply(StatusCode::UNAUTHORIZED, json!({})));

    let response = app
        .oneshot(request(Method::POST, "/api/auth/logout", Some("tok"), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(session_cleared(&response));
}

#[tokio::test]
async fn logout_without_session_skips_backend() {
    let (app, calls) = app(|_| json_reply(StatusCode::OK, json!({})));

    let response = app
        .oneshot(request(Method::POST, "/api/auth/logout", None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(session_cleared(&response));
    assert!(calls.lock().is_empty());
}

#[tokio::test]
async fn me_relays_cookie_style_credential() {
    let config = ProxyConfig::new("http://backend.test".parse().unwrap())
        .with_credential_style(CredentialStyle::Cookie);
    let (app, calls) = app_with(config, |_| {
        json_reply(StatusCode::OK, json!({"id": "u1", "email": "a@b.c"}))
    });

    let response = app
        .oneshot(request(Method::GET, "/api/auth/me", Some("tok"), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({"success": true, "data": {"id": "u1", "email": "a@b.c"}, "status": 200})
    );
    let calls = calls.lock();
    assert_eq!(calls[0].credential.as_ref().unwrap().style, CredentialStyle::Cookie);
}

#[tokio::test]
async fn me_with_expired_session_clears_cookie() {
    let (app, _) = app(|_| json_reply(StatusCode::UNAUTHORIZED, json!({"message": "expired"})));

    let response = app
        .oneshot(request(Method::GET, "/api/auth/me", Some("stale"), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(session_cleared(&response));
    assert_eq!(body_json(response).await, json!({"error": "Non authentifié"}));
}

#[tokio::test]
async fn complete_registration_issues_session() {
    let (app, calls) = app(|_| {
        json_reply(StatusCode::OK, json!({"data": {"token": "fresh", "userId": "u2"}}))
    });

    let response = app
        .oneshot(request(
            Method::POST,
            "/api/auth/complete-registration",
            None,
            Some(json!({"email": "a@b.c", "verificationCode": "123456"})),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookies(&response).iter().any(|c| c.starts_with("auth_token=fresh")));
    assert_eq!(body_json(response).await["data"], json!({"data": {"userId": "u2"}}));
    assert_eq!(calls.lock()[0].path, "/api/auth/complete-registration");
}

#[tokio::test]
async fn initiate_registration_validates_and_forwards() {
    let (app, calls) = app(|_| json_reply(StatusCode::OK, json!({"message": "Code envoyé"})));

    let body = json!({
        "email": "a@b.c",
        "password": "pw",
        "firstName": "Ana",
        "lastName": "Roy"
    });
    let response = app
        .oneshot(request(Method::POST, "/api/auth/initiate-registration", None, Some(body)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(set_cookies(&response).is_empty());
    assert_eq!(calls.lock().len(), 1);
}

use std::sync::Arc;

use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use super::cache::{CacheOptions, Resource, ResourceCache, ResourceState};
use super::error::FetchError;
use super::loader::LoadingCoordinator;
use super::transport::{
    ApiRequest, InterceptedTransport, LoaderInterceptor, ReqwestTransport, Transport,
};
use crate::envelope::ProxyResponse;
use crate::error::Error;
use crate::models::{
    CompleteRegistrationRequest, InitiateRegistrationRequest, LoginRequest, Property,
    PropertyDraft, Role, SearchPage, SearchQuery, User,
};
use crate::types::{CacheKey, OwnerId, PropertyId};

/// Where the UI sends the user once the session is gone.
pub const LOGIN_REDIRECT: &str = "/auth/login";

pub const ME: &str = "/api/auth/me";
pub const LATEST: &str = "/api/properties/latest";
pub const SEARCH: &str = "/api/properties/search";
pub const MY_PROPERTIES: &str = "/api/properties/my-properties";
pub const OWNER_PREFIX: &str = "/api/properties/owner/";
pub const ROLES: &str = "/api/roles";

/// Cache key of a property detail.
#[must_use]
pub fn property_key(id: &PropertyId) -> CacheKey {
    CacheKey::from(format!("/api/properties/{}", urlencoding::encode(&id.0)).as_str())
}

#[must_use]
pub fn latest_key(limit: Option<u32>) -> CacheKey {
    CacheKey::new(LATEST, limit.map(|l| ("limit", l.to_string())))
}

#[must_use]
pub fn search_key(query: &SearchQuery) -> CacheKey {
    CacheKey::new(SEARCH, query.pairs())
}

#[must_use]
pub fn owner_key(owner: &OwnerId) -> CacheKey {
    CacheKey::from(format!("{OWNER_PREFIX}{}", urlencoding::encode(&owner.0)).as_str())
}

/// Login page target when `state` failed for lack of a session.
#[must_use]
pub fn redirect_target<T>(state: &ResourceState<T>) -> Option<&'static str> {
    state.requires_login().then_some(LOGIN_REDIRECT)
}

/// Client configuration.
///
/// ```rust,ignore
/// let config = ClientConfig::new("https://pioloop.example".parse()?)
///     .with_loader(LoadingCoordinator::new(["/api/auth/me".to_string()]));
/// ```
#[derive(Clone)]
#[non_exhaustive]
pub struct ClientConfig {
    pub(crate) origin: Url,
    pub(crate) loader: Arc<LoadingCoordinator>,
}

impl ClientConfig {
    /// Configuration for the frontend served at `origin`, driving the global loader.
    #[must_use]
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            loader: LoadingCoordinator::global(),
        }
    }

    /// Read `PIOLOOP_ORIGIN`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the variable is unset and [`Error::Url`] if
    /// it is not a valid URL.
    pub fn from_env() -> Result<Self, Error> {
        let origin = std::env::var("PIOLOOP_ORIGIN")
            .map_err(|_| Error::Config("PIOLOOP_ORIGIN is not set".into()))?;
        Ok(Self::new(origin.parse()?))
    }

    #[must_use]
    pub fn with_loader(mut self, loader: Arc<LoadingCoordinator>) -> Self {
        self.loader = loader;
        self
    }

    #[must_use]
    pub fn origin(&self) -> &Url {
        &self.origin
    }
}

/// How a route wraps its payload.
#[derive(Debug, Clone, Copy)]
enum Shape {
    /// `{success, data, status}`
    Envelope,
    Raw,
}

struct ClientInner<T> {
    transport: T,
    cache: ResourceCache,
}

impl<T: Transport> ClientInner<T> {
    async fn call(&self, request: ApiRequest, shape: Shape) -> Result<Value, FetchError> {
        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            let message = response
                .body
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_owned);
            return Err(FetchError::from_status(response.status, message));
        }
        match shape {
            Shape::Raw => Ok(response.body),
            Shape::Envelope => {
                let envelope: ProxyResponse<Value> = serde_json::from_value(response.body)?;
                Ok(envelope.data.unwrap_or(Value::Null))
            }
        }
    }
}

/// Typed client for the proxy routes, backed by a shared [`ResourceCache`].
///
/// Plain methods always hit the network. `use_*` hooks go through the cache.
/// Mutations invalidate the keys whose data they change.
pub struct PioloopClient<T> {
    inner: Arc<ClientInner<T>>,
}

impl<T> Clone for PioloopClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl PioloopClient<InterceptedTransport<ReqwestTransport>> {
    /// HTTP client with the loading indicator wired in.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be built.
    pub fn connect(config: &ClientConfig) -> Result<Self, Error> {
        let transport = InterceptedTransport::new(ReqwestTransport::new(config.origin.clone())?)
            .with_interceptor(LoaderInterceptor::new(config.loader.clone()));
        Ok(Self::new(transport))
    }
}

impl<T: Transport> PioloopClient<T> {
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self::with_cache(transport, ResourceCache::new())
    }

    #[must_use]
    pub fn with_cache(transport: T, cache: ResourceCache) -> Self {
        Self {
            inner: Arc::new(ClientInner { transport, cache }),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &ResourceCache {
        &self.inner.cache
    }

    // ── Auth ───────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// Any [`FetchError`] from the login route.
    pub async fn login(&self, email: &str, password: &str) -> Result<Value, FetchError> {
        let body = LoginRequest {
            email: email.to_owned(),
            password: password.to_owned(),
        };
        let data = self.send(Method::POST, "/api/auth/login", &body).await?;
        tracing::info!("Logged in");
        self.inner.cache.invalidate(&CacheKey::from(ME));
        Ok(data)
    }

    /// # Errors
    ///
    /// Any [`FetchError`] from the logout route. The session cookie is cleared
    /// by the proxy regardless, and the cached user is dropped either way.
    pub async fn logout(&self) -> Result<(), FetchError> {
        let result = self
            .inner
            .call(
                ApiRequest::send(Method::POST, "/api/auth/logout", None),
                Shape::Envelope,
            )
            .await;
        self.inner.cache.clear(&CacheKey::from(ME));
        result.map(|_| ())
    }

    /// # Errors
    ///
    /// [`FetchError::Unauthenticated`] without a valid session.
    pub async fn current_user(&self) -> Result<User, FetchError> {
        let data = self.inner.call(ApiRequest::get(ME), Shape::Envelope).await?;
        decode(data)
    }

    /// # Errors
    ///
    /// Any [`FetchError`] from the registration route.
    pub async fn initiate_registration(
        &self,
        request: &InitiateRegistrationRequest,
    ) -> Result<Value, FetchError> {
        self.send(Method::POST, "/api/auth/initiate-registration", request)
            .await
    }

    /// # Errors
    ///
    /// Any [`FetchError`] from the registration route.
    pub async fn complete_registration(
        &self,
        request: &CompleteRegistrationRequest,
    ) -> Result<Value, FetchError> {
        let data = self
            .send(Method::POST, "/api/auth/complete-registration", request)
            .await?;
        self.inner.cache.invalidate(&CacheKey::from(ME));
        Ok(data)
    }

    // ── Properties ─────────────────────────────────────────────────────

    /// # Errors
    ///
    /// Any [`FetchError`] from the route.
    pub async fn latest_properties(&self, limit: Option<u32>) -> Result<Vec<Property>, FetchError> {
        self.get_raw(latest_key(limit)).await
    }

    /// # Errors
    ///
    /// Any [`FetchError`] from the route.
    pub async fn search_properties(&self, query: &SearchQuery) -> Result<SearchPage, FetchError> {
        self.get_raw(search_key(query)).await
    }

    /// # Errors
    ///
    /// [`FetchError::NotFound`] for an unknown id.
    pub async fn property(&self, id: &PropertyId) -> Result<Property, FetchError> {
        self.get_raw(property_key(id)).await
    }

    /// # Errors
    ///
    /// [`FetchError::Unauthenticated`] without a session, or any backend rejection.
    pub async fn create_property(&self, draft: &PropertyDraft) -> Result<Value, FetchError> {
        let data = self
            .send(Method::POST, "/api/properties/create", draft)
            .await?;
        self.invalidate_properties(None);
        Ok(data)
    }

    /// Partial update; `changes` holds only the fields to change.
    ///
    /// # Errors
    ///
    /// [`FetchError::Unauthenticated`] without a session, or any backend rejection.
    pub async fn update_property(
        &self,
        id: &PropertyId,
        changes: &Value,
    ) -> Result<Value, FetchError> {
        let path = format!("/api/properties/update/{}", urlencoding::encode(&id.0));
        let data = self.send(Method::PUT, &path, changes).await?;
        self.invalidate_properties(Some(id));
        Ok(data)
    }

    /// # Errors
    ///
    /// [`FetchError::Unauthenticated`] without a session, or any backend rejection.
    pub async fn delete_property(&self, id: &PropertyId) -> Result<(), FetchError> {
        let path = format!("/api/properties/delete/{}", urlencoding::encode(&id.0));
        self.inner
            .call(ApiRequest::send(Method::DELETE, path, None), Shape::Envelope)
            .await?;
        self.invalidate_properties(Some(id));
        Ok(())
    }

    /// # Errors
    ///
    /// [`FetchError::Unauthenticated`] without a session.
    pub async fn my_properties(&self) -> Result<Vec<Property>, FetchError> {
        self.get_raw(CacheKey::from(MY_PROPERTIES)).await
    }

    /// # Errors
    ///
    /// Any [`FetchError`] from the route.
    pub async fn owner_properties(&self, owner: &OwnerId) -> Result<Vec<Property>, FetchError> {
        self.get_raw(owner_key(owner)).await
    }

    /// # Errors
    ///
    /// Any [`FetchError`] from the route.
    pub async fn roles(&self) -> Result<Vec<Role>, FetchError> {
        self.get_raw(CacheKey::from(ROLES)).await
    }

    // ── Cached hooks ───────────────────────────────────────────────────

    /// Current user. A [`FetchError::Unauthenticated`] error maps to
    /// [`LOGIN_REDIRECT`] through [`redirect_target`].
    pub fn use_current_user(&self) -> Resource {
        self.hook(CacheKey::from(ME), Shape::Envelope, CacheOptions::default())
    }

    pub fn use_property(&self, id: &PropertyId) -> Resource {
        self.hook(property_key(id), Shape::Raw, CacheOptions::default())
    }

    pub fn use_latest(&self, limit: Option<u32>) -> Resource {
        self.hook(latest_key(limit), Shape::Raw, CacheOptions::default())
    }

    pub fn use_search(&self, query: &SearchQuery) -> Resource {
        self.hook(search_key(query), Shape::Raw, CacheOptions::default())
    }

    pub fn use_my_properties(&self) -> Resource {
        self.hook(CacheKey::from(MY_PROPERTIES), Shape::Raw, CacheOptions::default())
    }

    pub fn use_owner_properties(&self, owner: &OwnerId) -> Resource {
        self.hook(owner_key(owner), Shape::Raw, CacheOptions::default())
    }

    pub fn use_roles(&self) -> Resource {
        self.hook(CacheKey::from(ROLES), Shape::Raw, CacheOptions::default())
    }

    /// Subscribe to any proxy GET route through the cache.
    pub fn use_path(&self, key: impl Into<CacheKey>, options: CacheOptions) -> Resource {
        self.hook(key.into(), Shape::Raw, options)
    }

    fn hook(&self, key: CacheKey, shape: Shape, options: CacheOptions) -> Resource {
        let inner = self.inner.clone();
        let path = key.as_str().to_owned();
        self.inner.cache.use_resource(
            key,
            move || {
                let inner = inner.clone();
                let request = ApiRequest::get(path.clone());
                async move { inner.call(request, shape).await }
            },
            options,
        )
    }

    async fn get_raw<R: DeserializeOwned>(&self, key: CacheKey) -> Result<R, FetchError> {
        let data = self
            .inner
            .call(ApiRequest::get(key.as_str()), Shape::Raw)
            .await?;
        decode(data)
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<Value, FetchError> {
        let body = serde_json::to_value(body)?;
        self.inner
            .call(ApiRequest::send(method, path, Some(body)), Shape::Envelope)
            .await
    }

    fn invalidate_properties(&self, id: Option<&PropertyId>) {
        let cache = &self.inner.cache;
        if let Some(id) = id {
            cache.invalidate(&property_key(id));
        }
        cache.invalidate(&CacheKey::from(MY_PROPERTIES));
        let stale = cache.invalidate_prefix(LATEST)
            + cache.invalidate_prefix(SEARCH)
            + cache.invalidate_prefix(OWNER_PREFIX);
        tracing::debug!(stale, "Invalidated property listings");
    }
}

fn decode<R: DeserializeOwned>(data: Value) -> Result<R, FetchError> {
    Ok(serde_json::from_value(data)?)
}

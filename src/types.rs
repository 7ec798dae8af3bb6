use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

/// Backend property identifier (opaque string, GUID on the backend side).
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into,
)]
#[serde(transparent)]
pub struct PropertyId(pub String);

impl From<&str> for PropertyId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Backend user identifier of a property owner.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into,
)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Opaque session token issued by the backend at login.
///
/// Only the proxy and the backend ever see the raw value. `Debug` is redacted
/// so the token never ends up in logs.
#[derive(Clone, PartialEq, Eq, From, Into)]
pub struct SessionToken(String);

impl SessionToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken(***)")
    }
}

/// Canonical cache key: request path plus query parameters sorted by name.
///
/// Two requests for the same resource with differently ordered query strings
/// map to the same key. Empty parameter values are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub struct CacheKey(String);

impl CacheKey {
    #[must_use]
    pub fn new<K, V>(path: &str, query: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut pairs: Vec<(String, String)> = query
            .into_iter()
            .filter(|(_, v)| !v.as_ref().is_empty())
            .map(|(k, v)| (k.as_ref().to_owned(), v.as_ref().to_owned()))
            .collect();
        pairs.sort();

        if pairs.is_empty() {
            return Self(path.to_owned());
        }

        let mut url = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &pairs {
            url.append_pair(k, v);
        }
        Self(format!("{path}?{}", url.finish()))
    }

    /// Parse an already-formed `path?query` string into its canonical form.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.split_once('?') {
            Some((path, query)) => Self::new(
                path,
                url::form_urlencoded::parse(query.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned())),
            ),
            None => Self(raw.to_owned()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path component without the query string.
    #[must_use]
    pub fn path(&self) -> &str {
        self.0.split_once('?').map_or(self.0.as_str(), |(p, _)| p)
    }
}

impl From<&str> for CacheKey {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

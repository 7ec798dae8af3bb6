use url::Url;

use super::types::CredentialStyle;
use crate::error::Error;

/// Shared proxy settings used by both config and runtime state.
#[derive(Debug, Clone)]
pub(crate) struct ProxySettings {
    pub(crate) api_url: Option<Url>,
    pub(crate) credential_style: CredentialStyle,
    pub(crate) session_ttl_days: i64,
    pub(crate) secure_cookies: bool,
}

impl ProxySettings {
    fn defaults() -> Self {
        Self {
            api_url: None,
            credential_style: CredentialStyle::Bearer,
            session_ttl_days: 7,
            secure_cookies: true,
        }
    }
}

/// Proxy configuration.
///
/// There is no fallback backend URL. A proxy built without one still serves
/// requests, but every route that needs the backend answers with an internal
/// error naming the missing variable.
///
/// Use [`from_env()`](ProxyConfig::from_env) for convention-based setup,
/// or [`new()`](ProxyConfig::new) with `with_*` methods for full control.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub(crate) settings: ProxySettings,
}

impl ProxyConfig {
    /// Create config with the backend base URL.
    #[must_use]
    pub fn new(api_url: Url) -> Self {
        Self::unconfigured().with_api_url(api_url)
    }

    /// Create config without a backend URL.
    #[must_use]
    pub fn unconfigured() -> Self {
        Self {
            settings: ProxySettings::defaults(),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Env vars
    /// - `PIOLOOP_API_URL`: backend base URL (must be a valid URL when set)
    /// - `PIOLOOP_AUTH_STYLE`: `bearer` (default) or `cookie`
    /// - `PIOLOOP_SESSION_TTL_DAYS`: session cookie lifetime, default 7
    /// - `PIOLOOP_SECURE_COOKIES`: `true`/`1` or `false`/`0`, default true
    /// - `DEV_AUTH`: set to `"1"` or `"true"` to disable secure cookies when
    ///   `PIOLOOP_SECURE_COOKIES` is unset
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is set but invalid.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Self::unconfigured();

        match var("PIOLOOP_API_URL") {
            Some(url_str) => {
                let url: Url = url_str
                    .parse()
                    .map_err(|e| Error::Config(format!("PIOLOOP_API_URL: {e}")))?;
                config = config.with_api_url(url);
            }
            None => {
                tracing::warn!("PIOLOOP_API_URL is not set; backend routes will fail");
            }
        }

        if let Some(style) = var("PIOLOOP_AUTH_STYLE") {
            let style = style
                .parse()
                .map_err(|e| Error::Config(format!("PIOLOOP_AUTH_STYLE: {e}")))?;
            config = config.with_credential_style(style);
        }

        if let Some(days) = var("PIOLOOP_SESSION_TTL_DAYS") {
            let days: i64 = days
                .parse()
                .map_err(|e| Error::Config(format!("PIOLOOP_SESSION_TTL_DAYS: {e}")))?;
            config = config.with_session_ttl_days(days);
        }

        let secure = match var("PIOLOOP_SECURE_COOKIES") {
            Some(value) => parse_flag(&value).ok_or_else(|| {
                Error::Config(format!("PIOLOOP_SECURE_COOKIES: invalid flag {value:?}"))
            })?,
            None => !var("DEV_AUTH").as_deref().and_then(parse_flag).unwrap_or(false),
        };

        Ok(config.with_secure_cookies(secure))
    }

    #[must_use]
    pub fn with_api_url(mut self, url: Url) -> Self {
        self.settings.api_url = Some(url);
        self
    }

    #[must_use]
    pub fn with_credential_style(mut self, style: CredentialStyle) -> Self {
        self.settings.credential_style = style;
        self
    }

    #[must_use]
    pub fn with_session_ttl_days(mut self, days: i64) -> Self {
        self.settings.session_ttl_days = days;
        self
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.settings.secure_cookies = secure;
        self
    }

    /// Backend base URL, if configured.
    #[must_use]
    pub fn api_url(&self) -> Option<&Url> {
        self.settings.api_url.as_ref()
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

//! Registration defaults, per-call options and the merge between them.
//!
//! Settings are resolved in three tiers: the module defaults, then the
//! [`ClientDefaults`] given at registration, then the [`RequestOptions`] of a single
//! call. Scalars take the last value set. Headers merge key by key, except that
//! registration defaults cannot replace a protected header such as `user-agent`;
//! only a per-call header can.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::SelfRequestError;

pub const DEFAULT_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_MAX_REDIRECTS: usize = 10;
pub const DEFAULT_USER_AGENT: &str = concat!("selfreq/", env!("CARGO_PKG_VERSION"));

fn is_protected(name: &HeaderName) -> bool {
    *name == USER_AGENT
}

/// Representation of the response body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    #[default]
    Text,
    Bytes,
    Json,
}

/// Defaults applied to every request of one registration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientDefaults {
    pub retries: Option<u32>,
    pub follow_redirect: Option<bool>,
    pub throw_http_errors: Option<bool>,
    pub timeout_ms: Option<u64>,
    pub max_redirects: Option<usize>,
    pub response_type: Option<ResponseType>,
    /// Skip certificate verification for HTTPS apps.
    pub accept_invalid_certs: Option<bool>,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RegisterOptions {
    /// Path prefix for every request. Defaults to the app's own base path.
    pub base_path: Option<String>,
    pub defaults: ClientDefaults,
}

/// Options for a single request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    pub url: Option<String>,
    #[serde(deserialize_with = "deserialize_method")]
    pub method: Option<Method>,
    pub retries: Option<u32>,
    pub follow_redirect: Option<bool>,
    pub throw_http_errors: Option<bool>,
    pub timeout_ms: Option<u64>,
    pub response_type: Option<ResponseType>,
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub body: Option<String>,
    pub json: Option<serde_json::Value>,
}

fn deserialize_method<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Method>, D::Error> {
    Option::<String>::deserialize(d)?
        .map(|m| Method::from_bytes(m.to_ascii_uppercase().as_bytes()))
        .transpose()
        .map_err(serde::de::Error::custom)
}

impl RequestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    #[must_use]
    pub fn follow_redirect(mut self, follow: bool) -> Self {
        self.follow_redirect = Some(follow);
        self
    }

    #[must_use]
    pub fn throw_http_errors(mut self, throw: bool) -> Self {
        self.throw_http_errors = Some(throw);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    #[must_use]
    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = Some(response_type);
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn json(mut self, json: serde_json::Value) -> Self {
        self.json = Some(json);
        self
    }
}

/// What to request: a path relative to the app, or full options carrying a `url`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RequestTarget {
    Path(String),
    Options(RequestOptions),
}

impl RequestTarget {
    /// Split into the path to request and the remaining options.
    ///
    /// # Errors
    ///
    /// Returns [`SelfRequestError::InvalidArgument`] if options carry no `url`.
    pub fn into_parts(self) -> Result<(String, RequestOptions), SelfRequestError> {
        match self {
            Self::Path(path) => Ok((path, RequestOptions::default())),
            Self::Options(mut options) => {
                let url = options
                    .url
                    .take()
                    .ok_or_else(|| SelfRequestError::missing_url("options without `url`"))?;
                Ok((url, options))
            }
        }
    }
}

impl From<&str> for RequestTarget {
    fn from(path: &str) -> Self {
        Self::Path(path.to_owned())
    }
}

impl From<String> for RequestTarget {
    fn from(path: String) -> Self {
        Self::Path(path)
    }
}

impl From<&String> for RequestTarget {
    fn from(path: &String) -> Self {
        Self::Path(path.clone())
    }
}

impl From<RequestOptions> for RequestTarget {
    fn from(options: RequestOptions) -> Self {
        Self::Options(options)
    }
}

impl TryFrom<serde_json::Value> for RequestTarget {
    type Error = SelfRequestError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value;

        match value {
            Value::String(path) => Ok(Self::Path(path)),
            Value::Object(_) => serde_json::from_value::<RequestOptions>(value)
                .map(Self::Options)
                .map_err(|e| SelfRequestError::InvalidArgument(format!("invalid request options: {e}"))),
            Value::Null => Err(SelfRequestError::missing_url("null")),
            Value::Bool(_) => Err(SelfRequestError::missing_url("a boolean")),
            Value::Number(_) => Err(SelfRequestError::missing_url("a number")),
            Value::Array(_) => Err(SelfRequestError::missing_url("an array")),
        }
    }
}

/// Fully resolved settings for one tier.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub retries: u32,
    pub follow_redirect: bool,
    pub throw_http_errors: bool,
    pub timeout: Duration,
    pub max_redirects: usize,
    pub response_type: ResponseType,
    pub accept_invalid_certs: bool,
    pub headers: HeaderMap,
}

impl Default for Settings {
    fn default() -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        Self {
            retries: 0,
            follow_redirect: false,
            throw_http_errors: false,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            response_type: ResponseType::Text,
            accept_invalid_certs: false,
            headers,
        }
    }
}

impl Settings {
    /// Module defaults overlaid with registration defaults.
    pub(crate) fn with_defaults(defaults: &ClientDefaults) -> Result<Self, SelfRequestError> {
        let mut settings = Self::default();
        if let Some(retries) = defaults.retries {
            settings.retries = retries;
        }
        if let Some(follow) = defaults.follow_redirect {
            settings.follow_redirect = follow;
        }
        if let Some(throw) = defaults.throw_http_errors {
            settings.throw_http_errors = throw;
        }
        if let Some(ms) = defaults.timeout_ms {
            settings.timeout = Duration::from_millis(ms);
        }
        if let Some(max) = defaults.max_redirects {
            settings.max_redirects = max;
        }
        if let Some(response_type) = defaults.response_type {
            settings.response_type = response_type;
        }
        if let Some(accept) = defaults.accept_invalid_certs {
            settings.accept_invalid_certs = accept;
        }
        for (name, value) in &defaults.headers {
            let (name, value) = parse_header(name, value)?;
            if is_protected(&name) {
                tracing::warn!("ignoring default header `{name}`: it can only be overridden per request");
                continue;
            }
            settings.headers.insert(name, value);
        }
        Ok(settings)
    }

    /// These settings overlaid with the options of one call.
    pub(crate) fn for_call(&self, options: &RequestOptions) -> Result<Self, SelfRequestError> {
        let mut settings = self.clone();
        if let Some(retries) = options.retries {
            settings.retries = retries;
        }
        if let Some(follow) = options.follow_redirect {
            settings.follow_redirect = follow;
        }
        if let Some(throw) = options.throw_http_errors {
            settings.throw_http_errors = throw;
        }
        if let Some(ms) = options.timeout_ms {
            settings.timeout = Duration::from_millis(ms);
        }
        if let Some(response_type) = options.response_type {
            settings.response_type = response_type;
        }
        for (name, value) in &options.headers {
            let (name, value) = parse_header(name, value)?;
            settings.headers.insert(name, value);
        }
        Ok(settings)
    }

    pub(crate) fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), SelfRequestError> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| SelfRequestError::InvalidArgument(format!("invalid header name `{name}`: {e}")))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|e| SelfRequestError::InvalidArgument(format!("invalid value for header `{name}`: {e}")))?;
    Ok((header_name, header_value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header<'a>(settings: &'a Settings, name: &str) -> Option<&'a str> {
        settings.headers.get(name).and_then(|v| v.to_str().ok())
    }

    #[test]
    fn module_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.retries, 0);
        assert!(!settings.follow_redirect);
        assert!(!settings.throw_http_errors);
        assert_eq!(settings.timeout, Duration::from_millis(2_000));
        assert_eq!(settings.response_type, ResponseType::Text);
        assert_eq!(header(&settings, "user-agent"), Some(DEFAULT_USER_AGENT));
    }

    #[test]
    fn registration_defaults_override_scalars() {
        let defaults = ClientDefaults {
            follow_redirect: Some(true),
            response_type: Some(ResponseType::Bytes),
            timeout_ms: Some(500),
            ..ClientDefaults::default()
        };
        let settings = Settings::with_defaults(&defaults).unwrap();
        assert!(settings.follow_redirect);
        assert_eq!(settings.response_type, ResponseType::Bytes);
        assert_eq!(settings.timeout_ms(), 500);
        assert_eq!(settings.retries, 0);
    }

    #[test]
    fn registration_headers_merge_without_replacing_user_agent() {
        let defaults = ClientDefaults {
            headers: BTreeMap::from([
                ("x-custom-header".to_owned(), "test".to_owned()),
                ("User-Agent".to_owned(), "impostor".to_owned()),
            ]),
            ..ClientDefaults::default()
        };
        let settings = Settings::with_defaults(&defaults).unwrap();
        assert_eq!(header(&settings, "x-custom-header"), Some("test"));
        assert_eq!(header(&settings, "user-agent"), Some(DEFAULT_USER_AGENT));
    }

    #[test]
    fn call_headers_override_everything() {
        let base = Settings::with_defaults(&ClientDefaults {
            headers: BTreeMap::from([("x-custom-header".to_owned(), "test".to_owned())]),
            ..ClientDefaults::default()
        })
        .unwrap();
        let call = RequestOptions::new()
            .header("user-agent", "probe/1.0")
            .header("x-custom-header", "call");
        let settings = base.for_call(&call).unwrap();
        assert_eq!(header(&settings, "user-agent"), Some("probe/1.0"));
        assert_eq!(header(&settings, "x-custom-header"), Some("call"));
        assert_eq!(header(&base, "user-agent"), Some(DEFAULT_USER_AGENT));
    }

    #[test]
    fn call_options_take_precedence() {
        let base = Settings::with_defaults(&ClientDefaults {
            follow_redirect: Some(true),
            retries: Some(2),
            ..ClientDefaults::default()
        })
        .unwrap();
        let call = RequestOptions::new()
            .follow_redirect(false)
            .timeout(Duration::from_millis(150))
            .response_type(ResponseType::Json);
        let settings = base.for_call(&call).unwrap();
        assert!(!settings.follow_redirect);
        assert_eq!(settings.retries, 2);
        assert_eq!(settings.timeout_ms(), 150);
        assert_eq!(settings.response_type, ResponseType::Json);
    }

    #[test]
    fn invalid_header_is_invalid_argument() {
        let defaults = ClientDefaults {
            headers: BTreeMap::from([("bad header".to_owned(), "x".to_owned())]),
            ..ClientDefaults::default()
        };
        let err = Settings::with_defaults(&defaults).unwrap_err();
        assert!(matches!(err, SelfRequestError::InvalidArgument(msg) if msg.contains("bad header")));

        let call = RequestOptions::new().header("x-ok", "line\nbreak");
        assert!(Settings::default().for_call(&call).is_err());
    }

    #[test]
    fn target_from_path() {
        let (path, options) = RequestTarget::from("/health").into_parts().unwrap();
        assert_eq!(path, "/health");
        assert!(options.url.is_none());
    }

    #[test]
    fn target_from_options_moves_url_out() {
        let target = RequestTarget::from(RequestOptions::new().url("/").retries(1));
        let (path, options) = target.into_parts().unwrap();
        assert_eq!(path, "/");
        assert!(options.url.is_none());
        assert_eq!(options.retries, Some(1));
    }

    #[test]
    fn options_without_url_are_rejected() {
        let err = RequestTarget::from(RequestOptions::new())
            .into_parts()
            .unwrap_err();
        assert_eq!(err.code(), "ERR_INVALID_ARG_TYPE");
        assert!(err.to_string().contains("`url`"));
    }

    #[test]
    fn target_from_json_values() {
        let target = RequestTarget::try_from(serde_json::json!("/ready")).unwrap();
        assert!(matches!(target, RequestTarget::Path(p) if p == "/ready"));

        let target = RequestTarget::try_from(serde_json::json!({
            "url": "/items",
            "method": "post",
            "json": {"name": "a"},
            "response_type": "json"
        }))
        .unwrap();
        let RequestTarget::Options(options) = target else {
            panic!("expected options");
        };
        assert_eq!(options.url.as_deref(), Some("/items"));
        assert_eq!(options.method, Some(Method::POST));
        assert_eq!(options.response_type, Some(ResponseType::Json));

        for value in [serde_json::Value::Null, serde_json::json!(42), serde_json::json!([])] {
            let err = RequestTarget::try_from(value).unwrap_err();
            assert!(err.to_string().contains("`url`"));
        }
    }

    #[test]
    fn target_deserializes_untagged() {
        #[derive(Deserialize)]
        struct Targets {
            targets: Vec<RequestTarget>,
        }

        let parsed: Targets = serde_json::from_str(
            r#"{"targets": ["/health", {"url": "/ready", "timeout_ms": 100}]}"#,
        )
        .unwrap();
        assert!(matches!(&parsed.targets[0], RequestTarget::Path(p) if p == "/health"));
        assert!(matches!(&parsed.targets[1], RequestTarget::Options(o) if o.timeout_ms == Some(100)));
    }
}

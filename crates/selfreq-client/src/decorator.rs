use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use reqwest::Method;
use selfreq_server::{App, ServerError, WeakApp};
use tokio::sync::OnceCell;
use url::Url;

use crate::client::LoopbackClient;
use crate::error::SelfRequestError;
use crate::join::join_url;
use crate::options::{RegisterOptions, RequestOptions, RequestTarget, Settings};
use crate::response::SelfResponse;
use crate::retry::send_with_retry;

const LOOPBACK_HOST: &str = "localhost";

/// Host part of the base URL. `localhost` may resolve to IPv4 only, so a server bound
/// to a specific IPv6 address is addressed by that address.
fn url_host(addr: SocketAddr) -> String {
    match addr.ip() {
        IpAddr::V6(ip) if !ip.is_unspecified() => format!("[{ip}]"),
        IpAddr::V4(_) | IpAddr::V6(_) => LOOPBACK_HOST.to_owned(),
    }
}

struct Ready {
    base_url: String,
    client: LoopbackClient,
}

enum Payload {
    Text(String),
    Json(serde_json::Value),
}

impl Payload {
    fn from_options(options: &RequestOptions) -> Result<Option<Self>, SelfRequestError> {
        match (&options.body, &options.json) {
            (Some(_), Some(_)) => Err(SelfRequestError::InvalidArgument(
                "`body` and `json` are mutually exclusive".into(),
            )),
            (Some(body), None) => Ok(Some(Self::Text(body.clone()))),
            (None, Some(json)) => Ok(Some(Self::Json(json.clone()))),
            (None, None) => Ok(None),
        }
    }
}

/// Sends requests to the app it is registered on.
///
/// Nothing happens at registration beyond validating the defaults. The first request
/// makes sure the app is listening, then resolves the base URL and builds the client
/// exactly once; concurrent first requests wait for that single construction.
pub struct SelfRequest {
    app: WeakApp,
    base_path: Option<String>,
    settings: Settings,
    ready: OnceCell<Ready>,
}

impl SelfRequest {
    /// Attach a `SelfRequest` to `app`.
    ///
    /// # Errors
    ///
    /// Returns [`SelfRequestError::InvalidArgument`] for invalid default headers and
    /// [`SelfRequestError::Server`] if the app already has a `SelfRequest`.
    pub fn register(app: &App, options: RegisterOptions) -> Result<Arc<Self>, SelfRequestError> {
        let settings = Settings::with_defaults(&options.defaults)?;
        let decorator = Self {
            app: app.downgrade(),
            base_path: options.base_path,
            settings,
            ready: OnceCell::new(),
        };
        Ok(app.decorate(decorator)?)
    }

    /// Base URL requests are joined onto, once the first request resolved it.
    #[must_use]
    pub fn base_url(&self) -> Option<&str> {
        self.ready.get().map(|ready| ready.base_url.as_str())
    }

    /// Request a path, or options carrying a `url`, from the app.
    ///
    /// # Errors
    ///
    /// Returns [`SelfRequestError::InvalidArgument`] before any network activity if
    /// no usable `url` is given, [`SelfRequestError::Timeout`] when the request
    /// times out, and client errors as [`SelfRequestError::Http`]. Non-2xx responses
    /// are returned as `Ok` unless `throw_http_errors` is set.
    pub async fn request(
        &self,
        target: impl Into<RequestTarget>,
    ) -> Result<SelfResponse, SelfRequestError> {
        let (path, options) = target.into().into_parts()?;
        self.send(&path, &options).await
    }

    /// Request `path` with per-call options; `options.url` is ignored.
    ///
    /// # Errors
    ///
    /// See [`SelfRequest::request`].
    pub async fn request_with(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<SelfResponse, SelfRequestError> {
        self.send(path, &options).await
    }

    async fn send(
        &self,
        path: &str,
        options: &RequestOptions,
    ) -> Result<SelfResponse, SelfRequestError> {
        let call = self.settings.for_call(options)?;
        let payload = Payload::from_options(options)?;
        let method = options.method.clone().unwrap_or(Method::GET);

        let ready = self.ready().await?;
        let mut url = Url::parse(&join_url(&ready.base_url, path))
            .map_err(|e| SelfRequestError::InvalidArgument(format!("invalid `url` {path:?}: {e}")))?;
        if !options.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&options.query);
        }

        tracing::debug!("self-request {method} {url}");
        let client = ready.client.pick(call.follow_redirect);
        let started_at = Instant::now();
        let (response, retry_count) = send_with_retry(&method, call.retries, || {
            let mut req = client
                .request(method.clone(), url.clone())
                .headers(call.headers.clone())
                .timeout(call.timeout);
            req = match &payload {
                Some(Payload::Text(body)) => req.body(body.clone()),
                Some(Payload::Json(json)) => req.json(json),
                None => req,
            };
            req.send()
        })
        .await
        .map_err(|e| transport_error(e, &url, call.timeout_ms()))?;

        let response = SelfResponse::read(response, call.response_type, started_at, retry_count)
            .await
            .map_err(|e| transport_error(e, &url, call.timeout_ms()))?;

        if call.throw_http_errors
            && (response.status.is_client_error() || response.status.is_server_error())
        {
            return Err(SelfRequestError::HttpStatus {
                status: response.status,
                url: response.url.to_string(),
            });
        }
        Ok(response)
    }

    async fn ready(&self) -> Result<&Ready, SelfRequestError> {
        if let Some(ready) = self.ready.get() {
            return Ok(ready);
        }
        let app = self.app.upgrade().ok_or(SelfRequestError::AppDropped)?;
        if !app.is_listening() {
            app.listen(0, LOOPBACK_HOST)
                .await
                .map_err(SelfRequestError::Listen)?;
        }
        self.ready.get_or_try_init(|| self.initialize(&app)).await
    }

    async fn initialize(&self, app: &App) -> Result<Ready, SelfRequestError> {
        app.unref();

        let addr = app
            .local_addr()
            .ok_or_else(|| ServerError::Server("app is not listening".into()))?;
        let transport = app.transport();
        let base_path = self.base_path.as_deref().unwrap_or_else(|| app.base_path());
        let base_url = format!(
            "{}//{}:{}{base_path}",
            transport.protocol(),
            url_host(addr),
            addr.port()
        );

        let certificate = match transport.tls() {
            Some(tls) if !self.settings.accept_invalid_certs => {
                Some(tls.certificate_pem().await.map_err(ServerError::Tls)?)
            }
            _ => None,
        };
        let client = LoopbackClient::build(&self.settings, transport, certificate.as_deref())?;

        tracing::info!("self-request bound to {base_url}");
        Ok(Ready { base_url, client })
    }
}

fn transport_error(e: reqwest::Error, url: &Url, timeout_ms: u64) -> SelfRequestError {
    if e.is_timeout() {
        SelfRequestError::Timeout {
            url: url.to_string(),
            timeout_ms,
            source: e,
        }
    } else {
        SelfRequestError::Http(e)
    }
}

/// `request` on the app itself, through its registered [`SelfRequest`].
pub trait AppRequestExt {
    fn request<T>(&self, target: T) -> impl Future<Output = Result<SelfResponse, SelfRequestError>> + Send
    where
        T: Into<RequestTarget> + Send;

    fn request_with(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> impl Future<Output = Result<SelfResponse, SelfRequestError>> + Send;
}

impl AppRequestExt for App {
    fn request<T>(&self, target: T) -> impl Future<Output = Result<SelfResponse, SelfRequestError>> + Send
    where
        T: Into<RequestTarget> + Send,
    {
        let decorator = self.decoration::<SelfRequest>();
        let target = target.into();
        async move {
            decorator
                .ok_or(SelfRequestError::NotRegistered)?
                .request(target)
                .await
        }
    }

    fn request_with(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> impl Future<Output = Result<SelfResponse, SelfRequestError>> + Send {
        let decorator = self.decoration::<SelfRequest>();
        let path = path.to_owned();
        async move {
            decorator
                .ok_or(SelfRequestError::NotRegistered)?
                .request_with(&path, options)
                .await
        }
    }
}

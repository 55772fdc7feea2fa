use std::sync::Arc;

use reqwest::StatusCode;
use selfreq_server::ServerError;

#[derive(Debug, thiserror::Error)]
pub enum SelfRequestError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("timeout awaiting response from {url} after {timeout_ms}ms")]
    Timeout {
        url: String,
        timeout_ms: u64,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("response code {status} from {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("failed to start listening: {0}")]
    Listen(Arc<ServerError>),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("self-request is not registered on this app")]
    NotRegistered,

    #[error("the app this self-request was registered on has been dropped")]
    AppDropped,
}

impl SelfRequestError {
    pub(crate) fn missing_url(found: &str) -> Self {
        Self::InvalidArgument(format!(
            "expected `url` to be a string or an options object with a `url` string, got {found}"
        ))
    }

    /// Stable machine-readable code for the failure kind.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "ERR_INVALID_ARG_TYPE",
            Self::Timeout { .. } => "ETIMEDOUT",
            Self::Http(e) if e.is_connect() => "ECONNREFUSED",
            Self::Http(_) => "ERR_HTTP_CLIENT",
            Self::HttpStatus { .. } => "ERR_NON_2XX_3XX_RESPONSE",
            Self::Listen(_) => "ERR_SERVER_LISTEN",
            Self::Server(_) => "ERR_SERVER",
            Self::NotRegistered => "ERR_NOT_REGISTERED",
            Self::AppDropped => "ERR_APP_DROPPED",
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

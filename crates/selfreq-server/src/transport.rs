use std::fmt;
use std::path::PathBuf;

use axum_server::tls_rustls::RustlsConfig;

use crate::error::ServerError;

/// PEM-encoded certificate chain and private key for a TLS listener.
#[derive(Clone)]
pub enum TlsConfig {
    Inline {
        certificate: Vec<u8>,
        private_key: Vec<u8>,
    },
    File {
        certificate_file: PathBuf,
        private_key_file: PathBuf,
    },
}

impl TlsConfig {
    #[must_use]
    pub fn inline(certificate: impl Into<Vec<u8>>, private_key: impl Into<Vec<u8>>) -> Self {
        Self::Inline {
            certificate: certificate.into(),
            private_key: private_key.into(),
        }
    }

    #[must_use]
    pub fn files(certificate_file: impl Into<PathBuf>, private_key_file: impl Into<PathBuf>) -> Self {
        Self::File {
            certificate_file: certificate_file.into(),
            private_key_file: private_key_file.into(),
        }
    }

    /// Return the PEM certificate chain served by this listener.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the certificate file cannot be read.
    pub async fn certificate_pem(&self) -> std::io::Result<Vec<u8>> {
        match self {
            Self::Inline { certificate, .. } => Ok(certificate.clone()),
            Self::File {
                certificate_file, ..
            } => tokio::fs::read(certificate_file).await,
        }
    }

    pub(crate) async fn rustls_config(&self) -> Result<RustlsConfig, ServerError> {
        match self {
            Self::Inline {
                certificate,
                private_key,
            } => RustlsConfig::from_pem(certificate.clone(), private_key.clone()).await,
            Self::File {
                certificate_file,
                private_key_file,
            } => RustlsConfig::from_pem_file(certificate_file, private_key_file).await,
        }
        .map_err(ServerError::Tls)
    }
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline { certificate, .. } => f
                .debug_struct("Inline")
                .field("certificate_len", &certificate.len())
                .field("private_key", &"[REDACTED]")
                .finish(),
            Self::File {
                certificate_file,
                private_key_file,
            } => f
                .debug_struct("File")
                .field("certificate_file", certificate_file)
                .field("private_key_file", private_key_file)
                .finish(),
        }
    }
}

/// How the app's server accepts connections.
///
/// The server always auto-detects HTTP/1.1 and HTTP/2 on the wire; `Http2` tells
/// clients they may speak HTTP/2 directly, with prior knowledge when no TLS is
/// involved.
#[derive(Debug, Clone, Default)]
pub enum Transport {
    #[default]
    Plain,
    Tls(TlsConfig),
    Http2 {
        tls: Option<TlsConfig>,
    },
}

impl Transport {
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.tls().is_some()
    }

    #[must_use]
    pub fn is_http2(&self) -> bool {
        matches!(self, Self::Http2 { .. })
    }

    /// URL scheme including the trailing colon, e.g. `https:`.
    #[must_use]
    pub fn protocol(&self) -> &'static str {
        if self.is_secure() { "https:" } else { "http:" }
    }

    #[must_use]
    pub fn tls(&self) -> Option<&TlsConfig> {
        match self {
            Self::Plain | Self::Http2 { tls: None } => None,
            Self::Tls(tls) | Self::Http2 { tls: Some(tls) } => Some(tls),
        }
    }
}

//! Construction of the loopback HTTP client.

use reqwest::redirect::Policy;
use selfreq_server::Transport;

use crate::error::SelfRequestError;
use crate::options::Settings;

/// The client a registration sends every request through.
///
/// `reqwest` fixes the redirect policy per client, so both policies are built up
/// front from the same settings and each call picks one.
pub(crate) struct LoopbackClient {
    direct: reqwest::Client,
    following: reqwest::Client,
}

impl LoopbackClient {
    /// Build the client for an app served over `transport`.
    ///
    /// `trusted_certificate` is the PEM certificate the app serves, if any; it is
    /// added as a trust root so the app's own self-signed certificate verifies.
    pub(crate) fn build(
        settings: &Settings,
        transport: &Transport,
        trusted_certificate: Option<&[u8]>,
    ) -> Result<Self, SelfRequestError> {
        let certificate = trusted_certificate
            .filter(|_| !settings.accept_invalid_certs)
            .map(reqwest::Certificate::from_pem)
            .transpose()?;

        if settings.accept_invalid_certs && transport.is_secure() {
            tracing::warn!("TLS certificate verification is disabled for self-requests");
        }

        let builder = || {
            let mut builder = reqwest::Client::builder()
                .connect_timeout(settings.timeout)
                .no_proxy();
            if transport.is_http2() && !transport.is_secure() {
                builder = builder.http2_prior_knowledge();
            }
            if let Some(certificate) = &certificate {
                builder = builder.add_root_certificate(certificate.clone());
            }
            if settings.accept_invalid_certs {
                builder = builder.danger_accept_invalid_certs(true);
            }
            builder
        };

        Ok(Self {
            direct: builder().redirect(Policy::none()).build()?,
            following: builder()
                .redirect(Policy::limited(settings.max_redirects))
                .build()?,
        })
    }

    pub(crate) fn pick(&self, follow_redirect: bool) -> &reqwest::Client {
        if follow_redirect {
            &self.following
        } else {
            &self.direct
        }
    }
}

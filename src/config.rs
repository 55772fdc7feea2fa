use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use selfreq_client::{RegisterOptions, RequestTarget};
use selfreq_server::{TlsConfig, Transport};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub self_request: RegisterOptions,
    pub warmup: WarmupConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub base_path: String,
    pub http2: bool,
    pub tls: Option<TlsPaths>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
            base_path: String::new(),
            http2: false,
            tls: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsPaths {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WarmupConfig {
    pub targets: Vec<RequestTarget>,
    pub fail_fast: bool,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            targets: vec![RequestTarget::from("/health")],
            fail_fast: false,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn transport(&self) -> Transport {
        let tls = self
            .tls
            .as_ref()
            .map(|paths| TlsConfig::files(&paths.cert_path, &paths.key_path));
        match (self.http2, tls) {
            (true, tls) => Transport::Http2 { tls },
            (false, Some(tls)) => Transport::Tls(tls),
            (false, None) => Transport::Plain,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to sensible defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SELFREQ_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = std::env::var("SELFREQ_PORT") {
            if let Ok(port) = v.parse::<u16>() {
                self.server.port = port;
            } else {
                tracing::warn!("ignoring invalid SELFREQ_PORT value: {v}");
            }
        }
        if let Ok(v) = std::env::var("SELFREQ_BASE_PATH") {
            self.server.base_path = v;
        }
        if let Ok(v) = std::env::var("SELFREQ_TIMEOUT_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                self.self_request.defaults.timeout_ms = Some(ms);
            } else {
                tracing::warn!("ignoring invalid SELFREQ_TIMEOUT_MS value: {v}");
            }
        }
        if let Ok(v) = std::env::var("SELFREQ_HTTP2")
            && let Ok(enabled) = v.parse::<bool>()
        {
            self.server.http2 = enabled;
        }
    }

    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        let base_path = &self.server.base_path;
        if !base_path.is_empty() && !base_path.starts_with('/') {
            bail!("server.base_path must be empty or start with '/', got {base_path:?}");
        }
        if let Some(base_path) = &self.self_request.base_path
            && !base_path.is_empty()
            && !base_path.starts_with('/')
        {
            bail!("self_request.base_path must be empty or start with '/', got {base_path:?}");
        }
        if self.self_request.defaults.timeout_ms == Some(0) {
            bail!("self_request.defaults.timeout_ms must be greater than zero");
        }
        if let Some(tls) = &self.server.tls {
            for path in [&tls.cert_path, &tls.key_path] {
                if !path.is_file() {
                    bail!("TLS file not found: {}", path.display());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use selfreq_client::ResponseType;
    use serial_test::serial;

    use super::*;

    const ENV_KEYS: [&str; 5] = [
        "SELFREQ_HOST",
        "SELFREQ_PORT",
        "SELFREQ_BASE_PATH",
        "SELFREQ_TIMEOUT_MS",
        "SELFREQ_HTTP2",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert!(config.server.base_path.is_empty());
        assert!(matches!(config.server.transport(), Transport::Plain));
        assert!(config.self_request.base_path.is_none());
        assert_eq!(config.warmup.targets.len(), 1);
        assert!(!config.warmup.fail_fast);
        config.validate().unwrap();
    }

    #[test]
    #[serial]
    fn missing_file_uses_defaults() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    #[serial]
    fn parse_valid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("selfreq.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            r#"
[server]
host = "localhost"
port = 0
base_path = "/api"
http2 = true

[self_request]
base_path = "/api/v1"

[self_request.defaults]
follow_redirect = true
response_type = "bytes"
timeout_ms = 500

[self_request.defaults.headers]
x-custom-header = "test"

[warmup]
fail_fast = true
targets = ["/health", {{ url = "/ready", retries = 2 }}]
"#
        )
        .unwrap();

        clear_env();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.server.port, 0);
        assert_eq!(config.server.base_path, "/api");
        assert!(matches!(
            config.server.transport(),
            Transport::Http2 { tls: None }
        ));
        assert_eq!(config.self_request.base_path.as_deref(), Some("/api/v1"));
        let defaults = &config.self_request.defaults;
        assert_eq!(defaults.follow_redirect, Some(true));
        assert_eq!(defaults.response_type, Some(ResponseType::Bytes));
        assert_eq!(defaults.timeout_ms, Some(500));
        assert_eq!(defaults.headers["x-custom-header"], "test");
        assert!(config.warmup.fail_fast);
        assert!(matches!(&config.warmup.targets[0], RequestTarget::Path(p) if p == "/health"));
        assert!(matches!(
            &config.warmup.targets[1],
            RequestTarget::Options(o) if o.url.as_deref() == Some("/ready") && o.retries == Some(2)
        ));
        config.validate().unwrap();
    }

    #[test]
    #[serial]
    fn invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        clear_env();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    #[serial]
    fn env_overrides() {
        clear_env();
        unsafe {
            std::env::set_var("SELFREQ_HOST", "0.0.0.0");
            std::env::set_var("SELFREQ_PORT", "8443");
            std::env::set_var("SELFREQ_BASE_PATH", "/sub");
            std::env::set_var("SELFREQ_TIMEOUT_MS", "750");
            std::env::set_var("SELFREQ_HTTP2", "true");
        }

        let mut config = Config::default();
        config.apply_env_overrides();
        clear_env();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8443);
        assert_eq!(config.server.base_path, "/sub");
        assert_eq!(config.self_request.defaults.timeout_ms, Some(750));
        assert!(config.server.http2);
    }

    #[test]
    #[serial]
    fn invalid_env_values_are_ignored() {
        clear_env();
        unsafe {
            std::env::set_var("SELFREQ_PORT", "not-a-port");
            std::env::set_var("SELFREQ_TIMEOUT_MS", "-1");
            std::env::set_var("SELFREQ_HTTP2", "maybe");
        }

        let mut config = Config::default();
        config.apply_env_overrides();
        clear_env();

        assert_eq!(config.server.port, 3000);
        assert!(config.self_request.defaults.timeout_ms.is_none());
        assert!(!config.server.http2);
    }

    #[test]
    fn validate_rejects_relative_base_path() {
        let mut config = Config::default();
        config.server.base_path = "api".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.self_request.base_path = Some("v1".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut config = Config::default();
        config.self_request.defaults.timeout_ms = Some(0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("timeout_ms"));
    }

    #[test]
    fn validate_checks_tls_files() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        std::fs::write(&cert_path, "cert").unwrap();

        let mut config = Config::default();
        config.server.tls = Some(TlsPaths {
            cert_path: cert_path.clone(),
            key_path: key_path.clone(),
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("key.pem"));

        std::fs::write(&key_path, "key").unwrap();
        config.validate().unwrap();
        assert!(matches!(config.server.transport(), Transport::Tls(_)));
    }
}

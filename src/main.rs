mod config;
mod handlers;
mod warmup;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, bail};
use clap::Parser;
use selfreq_client::{RequestTarget, SelfRequest};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "selfreq")]
#[command(about = "Serve a health app and warm it up by requesting itself")]
#[command(version)]
struct Cli {
    /// Config file (falls back to $SELFREQ_CONFIG, then config/selfreq.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen host, overrides [server].host
    #[arg(long)]
    host: Option<String>,

    /// Listen port, overrides [server].port
    #[arg(long)]
    port: Option<u16>,

    /// Extra warm-up path (can be repeated)
    #[arg(long = "warmup", value_name = "PATH")]
    warmup: Vec<String>,

    /// Exit after warm-up instead of serving
    #[arg(long)]
    once: bool,
}

impl Cli {
    fn config_path(&self) -> PathBuf {
        if let Some(path) = &self.config {
            return path.clone();
        }
        if let Ok(path) = std::env::var("SELFREQ_CONFIG") {
            return PathBuf::from(path);
        }
        PathBuf::from("config/selfreq.toml")
    }

    fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        config
            .warmup
            .targets
            .extend(self.warmup.iter().map(RequestTarget::from));
    }
}

fn init_subscriber() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();
    let cli = Cli::parse();

    let config_path = cli.config_path();
    let mut config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    cli.apply(&mut config);
    config.validate().context("invalid configuration")?;

    let ready = Arc::new(AtomicBool::new(false));
    let app = handlers::build_app(&config.server, Arc::clone(&ready));
    let addr = app
        .listen(config.server.port, &config.server.host)
        .await
        .context("failed to start server")?;
    tracing::info!("serving on {}{}", addr, app.base_path());

    SelfRequest::register(&app, config.self_request.clone())
        .context("failed to register self-request")?;

    let report = warmup::run(&app, &config.warmup.targets, config.warmup.fail_fast).await;
    for outcome in &report.outcomes {
        if let Some(error) = &outcome.error {
            tracing::debug!("{} failed after {:?}: {error}", outcome.target, outcome.elapsed);
        }
    }
    tracing::info!(
        "warm-up finished: {} of {} targets failed, {} skipped",
        report.failed(),
        report.outcomes.len(),
        report.skipped
    );

    if cli.once {
        app.shutdown();
        if !report.is_success() {
            bail!("warm-up failed");
        }
        return Ok(());
    }

    ready.store(true, Ordering::Release);
    // The first self-request unrefs the app.
    app.keep_alive();
    tokio::select! {
        result = app.wait() => result.context("server stopped")?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl-C");
            app.shutdown();
        }
    }
    Ok(())
}

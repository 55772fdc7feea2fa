use std::time::{Duration, Instant};

use axum::http::{Method, StatusCode};
use selfreq_client::{AppRequestExt, RequestTarget};
use selfreq_server::App;

#[derive(Debug)]
pub(crate) struct WarmupOutcome {
    pub target: String,
    pub status: Option<StatusCode>,
    pub elapsed: Duration,
    pub error: Option<String>,
}

impl WarmupOutcome {
    pub(crate) fn is_success(&self) -> bool {
        self.error.is_none() && self.status.is_some_and(|s| s.is_success())
    }
}

#[derive(Debug, Default)]
pub(crate) struct WarmupReport {
    pub outcomes: Vec<WarmupOutcome>,
    /// Targets not attempted because an earlier one failed with `fail_fast` set.
    pub skipped: usize,
}

impl WarmupReport {
    pub(crate) fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_success()).count()
    }

    pub(crate) fn is_success(&self) -> bool {
        self.failed() == 0 && self.skipped == 0
    }
}

fn describe(target: &RequestTarget) -> String {
    match target {
        RequestTarget::Path(path) => format!("GET {path}"),
        RequestTarget::Options(options) => format!(
            "{} {}",
            options.method.as_ref().map_or("GET", Method::as_str),
            options.url.as_deref().unwrap_or("<missing url>")
        ),
    }
}

/// Issue each target through the app's registered self-request.
pub(crate) async fn run(app: &App, targets: &[RequestTarget], fail_fast: bool) -> WarmupReport {
    let mut report = WarmupReport::default();
    for (i, target) in targets.iter().enumerate() {
        let label = describe(target);
        let started_at = Instant::now();
        let outcome = match app.request(target.clone()).await {
            Ok(resp) => {
                tracing::info!(
                    "warm-up {label}: {} in {}ms (retries: {})",
                    resp.status,
                    resp.timings.total.as_millis(),
                    resp.retry_count
                );
                WarmupOutcome {
                    target: label,
                    status: Some(resp.status),
                    elapsed: resp.timings.total,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!("warm-up {label} failed [{}]: {e}", e.code());
                WarmupOutcome {
                    target: label,
                    status: None,
                    elapsed: started_at.elapsed(),
                    error: Some(e.to_string()),
                }
            }
        };

        let failed = !outcome.is_success();
        report.outcomes.push(outcome);
        if failed && fail_fast {
            report.skipped = targets.len() - i - 1;
            break;
        }
    }
    report
}

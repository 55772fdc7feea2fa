use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use selfreq_server::App;

use crate::config::ServerConfig;

#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
}

#[derive(serde::Serialize)]
struct ReadyResponse {
    status: &'static str,
}

async fn health_handler(started_at: Instant) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: started_at.elapsed().as_secs(),
    })
}

/// Ready once warm-up has finished.
async fn ready_handler(ready: Arc<AtomicBool>) -> impl IntoResponse {
    if ready.load(Ordering::Acquire) {
        (StatusCode::OK, Json(ReadyResponse { status: "ready" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                status: "warming up",
            }),
        )
    }
}

pub(crate) fn build_app(config: &ServerConfig, ready: Arc<AtomicBool>) -> App {
    let started_at = Instant::now();
    App::builder()
        .base_path(config.base_path.clone())
        .transport(config.transport())
        .route("/health", get(move || health_handler(started_at)))
        .route("/ready", get(move || ready_handler(Arc::clone(&ready))))
        .build()
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;

    #[test]
    fn health_response_serializes() {
        let resp = HealthResponse {
            status: "ok",
            uptime_secs: 42,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"status":"ok","uptime_secs":42}"#);
    }

    async fn get_json(app: &App, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .router()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn health_reports_uptime() {
        let app = build_app(&ServerConfig::default(), Arc::new(AtomicBool::new(false)));
        let (status, body) = get_json(&app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["uptime_secs"], 0);
    }

    #[tokio::test]
    async fn ready_follows_flag() {
        let ready = Arc::new(AtomicBool::new(false));
        let app = build_app(&ServerConfig::default(), Arc::clone(&ready));

        let (status, body) = get_json(&app, "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "warming up");

        ready.store(true, Ordering::Release);
        let (status, body) = get_json(&app, "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
    }

    #[tokio::test]
    async fn routes_live_under_base_path() {
        let config = ServerConfig {
            base_path: "/internal".into(),
            ..ServerConfig::default()
        };
        let app = build_app(&config, Arc::new(AtomicBool::new(true)));
        let (status, _) = get_json(&app, "/internal/health").await;
        assert_eq!(status, StatusCode::OK);

        let resp = app
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}

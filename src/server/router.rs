use crate::config::Config;
use crate::metrics::{MetricsRegistry, OperationalState, SeriesSummary};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Non-secret facts about this exporter, echoed by `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct ExporterInfo {
    pub version: &'static str,
    pub sonar_url: String,
    pub project_key_regex: String,
    pub pull_interval_seconds: u64,
    pub verify_tls: bool,
    pub started_at: DateTime<Utc>,
}

impl ExporterInfo {
    pub fn from_config(config: &Config) -> Self {
        Self {
            version: crate::VERSION,
            sonar_url: config.sonar.base_url().to_string(),
            project_key_regex: config.exporter.project_key_regex.clone(),
            pull_interval_seconds: config.exporter.poll_interval_seconds,
            verify_tls: config.sonar.verify_tls,
            started_at: Utc::now(),
        }
    }
}

pub struct AppState {
    pub registry: Arc<MetricsRegistry>,
    pub info: ExporterInfo,
}

#[derive(Debug, Serialize)]
struct HealthResponse<'a> {
    status: &'static str,
    uptime_seconds: i64,
    #[serde(flatten)]
    exporter: &'a ExporterInfo,
    refresh: OperationalState,
    series: SeriesSummary,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.registry.render() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {:#}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response()
        }
    }
}

/// Process liveness. Always 200 while the process runs, whatever the upstream
/// state; upstream reachability is `sonar_exporter_up`.
async fn health(State(state): State<Arc<AppState>>) -> Response {
    let uptime = Utc::now() - state.info.started_at;
    let body = HealthResponse {
        status: "ok",
        uptime_seconds: uptime.num_seconds(),
        exporter: &state.info,
        refresh: state.registry.state(),
        series: state.registry.series_summary(),
    };

    (StatusCode::OK, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::CycleSuccess;
    use crate::upstream::{Project, ProjectMeasures, TrackedMetric};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn state() -> Arc<AppState> {
        let mut config = Config::default();
        config.sonar.token = Some("squ_secret".to_string());
        Arc::new(AppState {
            registry: Arc::new(MetricsRegistry::new(&TrackedMetric::ALL).unwrap()),
            info: ExporterInfo::from_config(&config),
        })
    }

    async fn get(state: Arc<AppState>, uri: &str) -> (StatusCode, String) {
        let response = build_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health_is_ok_before_any_refresh() {
        let (status, body) = get(state(), "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["refresh"]["up"], false);
        assert_eq!(json["series"]["count"], 0);
        assert!(json["series"]["oldest_confirmed_at"].is_null());
        assert_eq!(json["sonar_url"], "http://localhost:9000");
        assert!(!body.contains("squ_secret"));
    }

    #[tokio::test]
    async fn test_health_stays_ok_when_upstream_fails() {
        let state = state();
        state.registry.record_failure(Duration::from_secs(1), "connection refused");

        let (status, body) = get(state, "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["refresh"]["last_error"], "connection refused");
    }

    #[tokio::test]
    async fn test_metrics_renders_series() {
        let state = state();
        state.registry.commit_success(
            &[ProjectMeasures {
                project: Project::new("app-a", "App A"),
                values: [(TrackedMetric::Ncloc, 120.0)].into_iter().collect(),
            }],
            &CycleSuccess {
                finished_at: Utc::now(),
                duration: Duration::from_millis(5),
                fetch_failures: 0,
            },
        );

        let (_, health) = get(Arc::clone(&state), "/health").await;
        let json: serde_json::Value = serde_json::from_str(&health).unwrap();
        assert_eq!(json["series"]["count"], 1);
        assert!(json["series"]["oldest_confirmed_at"].is_string());

        let (status, body) = get(state, "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(r#"sonar_project_ncloc{project_key="app-a",project_name="App A"} 120"#));
        assert!(body.contains("sonar_exporter_up 1"));
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (status, _) = get(state(), "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

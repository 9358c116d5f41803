use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::{services::ServeDir, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    format,
    scanner::ScanEngine,
    traffic::TrafficEngine,
    types::{ScanState, TrafficState},
};
use ::time::{format_description::well_known, OffsetDateTime};

#[derive(Clone)]
pub struct AppState {
    scan: Arc<Mutex<ScanEngine>>, // start_scan needs &mut to swap its ticker
    traffic: Arc<TrafficEngine>,
}

impl AppState {
    pub fn new(scan: ScanEngine, traffic: TrafficEngine) -> Self {
        Self {
            scan: Arc::new(Mutex::new(scan)),
            traffic: Arc::new(traffic),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanView {
    #[serde(flatten)]
    pub state: ScanState,
    pub open_count: usize,
    pub connected: bool,
    pub progress_label: String,
    pub captured_at: String,
}

impl From<ScanState> for ScanView {
    fn from(state: ScanState) -> Self {
        Self {
            open_count: state.open_count(),
            connected: state.is_connected(),
            progress_label: format::format_percent(state.progress_percent),
            captured_at: now_iso_like(),
            state,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrafficView {
    #[serde(flatten)]
    pub state: TrafficState,
    pub routed_count: usize,
    pub upload_gauge: f64,
    pub download_gauge: f64,
    pub routed_gauge: f64,
    pub captured_at: String,
}

impl From<TrafficState> for TrafficView {
    fn from(state: TrafficState) -> Self {
        let routed = state.routed_count();
        Self {
            routed_count: routed,
            upload_gauge: format::upload_gauge(state.total_upload_bytes),
            download_gauge: format::download_gauge(state.total_download_bytes),
            routed_gauge: format::routed_gauge(routed, state.entries.len()),
            captured_at: now_iso_like(),
            state,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    /// Position in the current `discovered` list, oldest first.
    pub index: usize,
}

/// Build the relay router. API routes live under `/api`; everything else
/// is served from `ui_dir`.
pub fn router(state: AppState, ui_dir: impl AsRef<Path>) -> Router {
    let api = Router::new()
        .route("/scan", get(get_scan).post(post_scan))
        .route("/connect", post(post_connect))
        .route("/disconnect", post(post_disconnect))
        .route("/traffic", get(get_traffic))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state);

    let static_svc = ServeDir::new(ui_dir.as_ref()).append_index_html_on_directories(true);

    Router::new()
        .nest("/api", api)
        .fallback_service(static_svc)
        .layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(bind: &str, state: AppState, ui_dir: impl AsRef<Path>) -> Result<()> {
    let app = router(state, ui_dir);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!("serving UI on http://{}", bind);
    axum::serve(listener, app).await.context("HTTP server failed")?;
    Ok(())
}

pub async fn get_scan(State(app): State<AppState>) -> Json<ScanView> {
    let snap = app.scan.lock().await.snapshot();
    Json(snap.into())
}

pub async fn post_scan(State(app): State<AppState>) -> impl IntoResponse {
    let mut scan = app.scan.lock().await;
    scan.start_scan();
    (StatusCode::ACCEPTED, Json(ScanView::from(scan.snapshot())))
}

pub async fn post_connect(
    State(app): State<AppState>,
    Json(req): Json<ConnectRequest>,
) -> impl IntoResponse {
    let scan = app.scan.lock().await;
    let snap = scan.snapshot();
    let Some(record) = snap.discovered.get(req.index) else {
        return (
            StatusCode::NOT_FOUND,
            format!("no endpoint at index {}", req.index),
        )
            .into_response();
    };
    // Non-open records are ignored, not rejected.
    scan.select_endpoint(record);
    (StatusCode::OK, Json(ScanView::from(scan.snapshot()))).into_response()
}

pub async fn post_disconnect(State(app): State<AppState>) -> Json<ScanView> {
    let scan = app.scan.lock().await;
    scan.disconnect();
    Json(scan.snapshot().into())
}

pub async fn get_traffic(State(app): State<AppState>) -> Json<TrafficView> {
    Json(app.traffic.snapshot().into())
}

fn now_iso_like() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::random::ScriptedRandom;
    use crate::types::EndpointState;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state(scan_script: Vec<f64>) -> AppState {
        let cfg = SimConfig::default();
        AppState::new(
            ScanEngine::with_random(&cfg, ScriptedRandom::new(scan_script)),
            TrafficEngine::with_random(&cfg, ScriptedRandom::new(vec![0.5])),
        )
    }

    #[tokio::test]
    async fn scan_route_accepts_post() {
        let app = router(state(vec![0.0]), "ui");
        let res = app
            .oneshot(Request::post("/api/scan").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::ACCEPTED);
        assert_eq!(
            res.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-store"
        );
    }

    #[tokio::test]
    async fn traffic_route_is_get_only() {
        let app = router(state(vec![0.0]), "ui");
        let res = app
            .oneshot(Request::post("/api/traffic").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn connect_out_of_range_is_not_found() {
        let app = state(vec![0.0]);
        let res = post_connect(State(app), Json(ConnectRequest { index: 3 }))
            .await
            .into_response();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_and_disconnect_through_handlers() {
        // one tick: small progress, discovery of an open endpoint
        let app = state(vec![0.1, 0.9, 0.1, 0.1, 0.1, 0.9, 0.1, 0.1]);
        let _ = post_scan(State(app.clone())).await;
        tokio::time::sleep(std::time::Duration::from_millis(310)).await;

        let view = get_scan(State(app.clone())).await.0;
        assert_eq!(view.state.discovered.len(), 1);
        assert_eq!(view.state.discovered[0].state, EndpointState::Open);
        assert!(view.state.is_active);

        let res = post_connect(State(app.clone()), Json(ConnectRequest { index: 0 }))
            .await
            .into_response();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(get_scan(State(app.clone())).await.0.connected);

        let view = post_disconnect(State(app.clone())).await.0;
        assert!(!view.connected);
        assert!(view.state.selected_endpoint.is_none());
    }

    #[tokio::test]
    async fn traffic_view_has_gauges() {
        let view = get_traffic(State(state(vec![0.0]))).await.0;
        assert_eq!(view.state.entries.len(), 8);
        assert_eq!(view.routed_count, 8);
        assert_eq!(view.routed_gauge, 100.0);
        assert_eq!(view.upload_gauge, 0.0);
    }
}

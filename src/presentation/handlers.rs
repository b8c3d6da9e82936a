// Diagnostics HTTP handlers
use crate::application::fetch_scheduler::FetchStats;
use crate::domain::data_point::DataPoint;
use crate::presentation::app_state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Debug, Serialize)]
pub struct PipelineStatus {
    pub ready: bool,
    pub version: u64,
    pub keys: usize,
    pub in_flight: bool,
    pub fetch: FetchStats,
}

pub fn diagnostics_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/status", get(status))
        .route("/snapshot", get(snapshot))
        .route("/value/:key", get(value))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<PipelineStatus> {
    let store = state.pipeline.store();
    Json(PipelineStatus {
        ready: state.pipeline.accessor().is_ready(),
        version: store.version(),
        keys: store.len(),
        in_flight: state.fetcher.is_in_flight(),
        fetch: state.fetcher.stats(),
    })
}

/// Sorted copy of the whole store. NaN values render as `null`.
pub async fn snapshot(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, DataPoint>> {
    let entries = state
        .pipeline
        .store()
        .snapshot()
        .into_iter()
        .map(|(key, point)| (key, DataPoint::clone(&point)))
        .collect();
    Json(entries)
}

pub async fn value(Path(key): Path<String>, State(state): State<Arc<AppState>>) -> Response {
    match state.pipeline.accessor().get_raw(&key) {
        Some(point) => Json(DataPoint::clone(&point)).into_response(),
        None => (StatusCode::NOT_FOUND, format!("unknown key: {}", key)).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::pipeline::Pipeline;
    use crate::application::snapshot_source::{FetchError, SnapshotSource};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;

    struct Offline;

    #[async_trait]
    impl SnapshotSource for Offline {
        async fn fetch(&self) -> Result<String, FetchError> {
            Err(FetchError::Status(503))
        }

        fn describe(&self) -> String {
            "offline".to_string()
        }
    }

    async fn serve_diagnostics(pipeline: Pipeline) -> String {
        let fetcher = Arc::new(pipeline.fetch_scheduler(
            Arc::new(Offline),
            Duration::from_secs(60),
            Duration::from_secs(1),
        ));
        let state = Arc::new(AppState { pipeline, fetcher });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, diagnostics_router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn get_json(url: String) -> (u16, Value) {
        let response = reqwest::get(url).await.unwrap();
        let status = response.status().as_u16();
        let text = response.text().await.unwrap();
        (status, serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    #[tokio::test]
    async fn test_status_before_and_after_snapshot() {
        let pipeline = Pipeline::default();
        let base = serve_diagnostics(pipeline.clone()).await;

        let (code, body) = get_json(format!("{}/status", base)).await;
        assert_eq!(code, 200);
        assert_eq!(body["ready"], json!(false));
        assert_eq!(body["version"], json!(0));

        pipeline.store().apply_snapshot_text(r#"{"a": 1, "b": 2}"#).unwrap();
        let (_, body) = get_json(format!("{}/status", base)).await;
        assert_eq!(body["ready"], json!(true));
        assert_eq!(body["keys"], json!(2));
        assert_eq!(body["fetch"]["ok"], json!(0));
    }

    #[tokio::test]
    async fn test_snapshot_and_value() {
        let pipeline = Pipeline::default();
        pipeline
            .store()
            .apply_snapshot_text(r#"{"rpm": {"v": 1200, "ts": 5}, "mode": {"v": "x", "ts": 6, "type": "text", "status": "AUTO"}}"#)
            .unwrap();
        let base = serve_diagnostics(pipeline).await;

        let (_, body) = get_json(format!("{}/snapshot", base)).await;
        assert_eq!(
            body,
            json!({
                "mode": {"value": null, "timestamp": 6, "kind": "text", "status": "AUTO"},
                "rpm": {"value": 1200.0, "timestamp": 5}
            })
        );

        let (code, body) = get_json(format!("{}/value/rpm", base)).await;
        assert_eq!(code, 200);
        assert_eq!(body["value"], json!(1200.0));

        let (code, _) = get_json(format!("{}/value/nope", base)).await;
        assert_eq!(code, 404);
    }

    #[tokio::test]
    async fn test_health_check() {
        assert_eq!(health_check().await, "ok");
    }
}

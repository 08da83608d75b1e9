use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use unsbridge_store::{StateStore, TableKind};

use crate::counters::Counters;

#[derive(Clone)]
pub struct AppState {
    pub connected: Arc<AtomicBool>,
    pub counters: Arc<Counters>,
    pub store: Arc<dyn StateStore>,
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/status", get(status))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Ready means the broker session is up; 503 otherwise.
async fn readyz(State(state): State<AppState>) -> StatusCode {
    if state.connected.load(Ordering::SeqCst) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn status(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let assets: Vec<Value> = state
        .store
        .list_lifecycles()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .into_iter()
        .map(|(uri, row)| {
            json!({
                "asset_uri": uri,
                "state": row.state,
                "last_seen": row.last_seen,
                "last_transition": row.last_transition,
            })
        })
        .collect();
    let evictions: Value = TableKind::ALL
        .iter()
        .map(|t| (t.name().to_string(), json!(state.store.evictions(*t))))
        .collect::<serde_json::Map<String, Value>>()
        .into();
    Ok(Json(json!({
        "connected": state.connected.load(Ordering::SeqCst),
        "counters": state.counters.snapshot(),
        "assets": assets,
        "evictions": evictions,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;
    use unsbridge_store::InMemoryStore;

    fn test_state() -> AppState {
        AppState {
            connected: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            store: Arc::new(InMemoryStore::new()),
        }
    }

    #[tokio::test]
    async fn healthz_is_always_ok() {
        let app = build_app(test_state());
        let resp = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readyz_tracks_broker_connection() {
        let state = test_state();
        let app = build_app(state.clone());
        let resp = app
            .clone()
            .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.connected.store(true, Ordering::SeqCst);
        let resp = app
            .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_returns_counters_and_assets() {
        let app = build_app(test_state());
        let resp = app
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}

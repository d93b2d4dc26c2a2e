use crate::error::{ApiError, ApiResult};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use kit_controller::Manager;
use kit_core::{ControlPlane, ControlPlaneSpec, Resource, DEFAULT_NAMESPACE};
use kit_storage::StateStore;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state of the HTTP handlers
pub struct AppState {
    pub store: StateStore,
    pub manager: Arc<Manager>,
}

/// Namespace selector accepted by every ControlPlane route
#[derive(Debug, Deserialize)]
pub struct NamespaceParams {
    namespace: Option<String>,
}

impl NamespaceParams {
    fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/controlplanes",
            get(list_control_planes).post(apply_control_plane),
        )
        .route(
            "/controlplanes/{name}",
            get(get_control_plane).delete(delete_control_plane),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API until the listener fails
pub async fn serve(listen_addr: SocketAddr, state: Arc<AppState>) -> Result<(), std::io::Error> {
    let app = build_router(state);

    info!("Starting HTTP server on {}", listen_addr);

    let listener = TcpListener::bind(listen_addr).await?;

    axum::serve(listener, app).await
}

async fn healthz() -> &'static str {
    "ok"
}

/// Ready once the manager's workers are running
async fn readyz(State(state): State<Arc<AppState>>) -> Response {
    if state.manager.is_ready() {
        "ok".into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "manager not started").into_response()
    }
}

/// GET /controlplanes
async fn list_control_planes(
    State(state): State<Arc<AppState>>,
    Query(params): Query<NamespaceParams>,
) -> ApiResult<Response> {
    let items = state
        .store
        .list::<ControlPlaneSpec>(params.namespace.as_deref())?;
    Ok(Json(json!({ "kind": "ControlPlaneList", "items": items })).into_response())
}

/// POST /controlplanes
///
/// Creates the record, or updates the spec of an existing one.
async fn apply_control_plane(
    State(state): State<Arc<AppState>>,
    Query(params): Query<NamespaceParams>,
    Json(mut cp): Json<ControlPlane>,
) -> ApiResult<Response> {
    cp.validate()
        .map_err(|e| ApiError::ValidationFailed(e.to_string()))?;
    if cp.metadata.namespace.is_none() {
        cp.metadata.namespace = Some(params.namespace().to_string());
    }

    let existed = state.store.get_raw(&cp.key())?.is_some();
    // Rebuild so the record carries its cluster label
    let (namespace, name) = (cp.namespace().to_string(), cp.name().to_string());
    let record = ControlPlane::new(namespace, name, cp.spec);
    let stored = state.store.apply(record)?;
    info!("Applied ControlPlane {}", stored.key());

    let status = if existed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(stored)).into_response())
}

/// GET /controlplanes/{name}
async fn get_control_plane(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<NamespaceParams>,
) -> ApiResult<Response> {
    state
        .store
        .get::<ControlPlaneSpec>(params.namespace(), &name)?
        .map(|cp| Json(cp).into_response())
        .ok_or_else(|| ApiError::NotFound(format!("ControlPlane {} not found", name)))
}

/// DELETE /controlplanes/{name}
///
/// Sets the deletion timestamp; the record goes once teardown finishes.
async fn delete_control_plane(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<NamespaceParams>,
) -> ApiResult<Response> {
    let key = ControlPlane::key_for(params.namespace(), &name);
    if !state.store.mark_deleted(&key)? {
        return Err(ApiError::NotFound(format!("ControlPlane {} not found", name)));
    }
    info!("Deletion requested for ControlPlane {}", key);

    Ok(Json(json!({
        "kind": "Status",
        "status": "Success",
        "message": format!("ControlPlane {} deleting", name),
        "code": 200
    }))
    .into_response())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use kit_bootstrap::MockClusterApi;
    use kit_cloud::{CloudClients, MockCloud};
    use kit_controller::ManagerConfig;
    use kit_storage::RedbBackend;
    use serde_json::Value;
    use tower::ServiceExt;

    pub(crate) fn make_state() -> Arc<AppState> {
        let store = StateStore::new(Arc::new(RedbBackend::in_memory().unwrap()), 64);
        let manager = Manager::new(
            store.clone(),
            CloudClients::mock(Arc::new(MockCloud::new())),
            Arc::new(MockClusterApi::ready()),
            ManagerConfig::default(),
        );
        Arc::new(AppState {
            store,
            manager: Arc::new(manager),
        })
    }

    async fn send(state: &Arc<AppState>, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = build_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn demo() -> Value {
        json!({
            "apiVersion": "kit.k8s.amazonaws.com/v1alpha1",
            "kind": "ControlPlane",
            "metadata": { "name": "demo" },
            "spec": { "master": { "instances": { "instanceCount": 3 } } }
        })
    }

    #[tokio::test]
    async fn test_healthz_and_readyz() {
        let state = make_state();
        let (status, _) = send(&state, Method::GET, "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);

        // Manager not started
        let (status, _) = send(&state, Method::GET, "/readyz", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_apply_creates_then_updates() {
        let state = make_state();

        let (status, body) = send(&state, Method::POST, "/controlplanes", Some(demo())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["metadata"]["namespace"], "default");
        assert_eq!(
            body["metadata"]["labels"]["kit.k8s.amazonaws.com/cluster-name"],
            "demo"
        );

        let mut changed = demo();
        changed["spec"]["vpcCidr"] = json!("10.1.0.0/16");
        let (status, body) = send(&state, Method::POST, "/controlplanes", Some(changed)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["spec"]["vpcCidr"], "10.1.0.0/16");
        assert_eq!(body["metadata"]["generation"], 2);
    }

    #[tokio::test]
    async fn test_apply_rejects_invalid_name() {
        let state = make_state();
        let mut bad = demo();
        bad["metadata"]["name"] = json!("Not_Valid");

        let (status, body) = send(&state, Method::POST, "/controlplanes", Some(bad)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["status"], "Failure");
    }

    #[tokio::test]
    async fn test_get_and_list() {
        let state = make_state();
        send(&state, Method::POST, "/controlplanes", Some(demo())).await;

        let (status, body) = send(&state, Method::GET, "/controlplanes/demo", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["spec"]["master"]["instances"]["instanceCount"], 3);

        let (status, body) = send(&state, Method::GET, "/controlplanes", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"].as_array().unwrap().len(), 1);

        let (status, _) = send(&state, Method::GET, "/controlplanes/absent", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete() {
        let state = make_state();
        send(&state, Method::POST, "/controlplanes", Some(demo())).await;

        let (status, _) = send(&state, Method::DELETE, "/controlplanes/demo", None).await;
        assert_eq!(status, StatusCode::OK);
        // No finalizer was ever added, so the record goes at once
        let (status, _) = send(&state, Method::GET, "/controlplanes/demo", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&state, Method::DELETE, "/controlplanes/demo", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

//! # REST API
//!
//! Builds the axum router over an in-process cluster. All endpoints share
//! application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path             | Description                              |
//! |--------|------------------|------------------------------------------|
//! | GET    | `/health`        | Liveness probe                           |
//! | GET    | `/status`        | Nodes, pinned notary, commit counts      |
//! | POST   | `/transitions`   | Run a start flow from the source's host  |
//! | GET    | `/records/:node` | Records in one node's vault              |
//! | GET    | `/metrics`       | Prometheus metrics                       |

use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use concord_protocol::identity::NodeName;
use concord_protocol::storage::{RecordStore, StoredRecord};
use concord_protocol::{Cluster, FlowError};

use crate::metrics::{self, SharedMetrics};
use crate::simulation;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub version: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub cluster: Arc<Cluster>,
    pub metrics: SharedMetrics,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/transitions", post(transition_handler))
        .route("/records/:node", get(records_handler))
        .route("/metrics", get(metrics_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeStatus {
    pub name: String,
    pub accounts: Vec<String>,
    pub transactions: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub started_at: String,
    pub notary: String,
    pub committed: usize,
    pub session_messages: u64,
    pub nodes: Vec<NodeStatus>,
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub source: String,
    pub target: String,
    /// Observer node for the compliance copy. Defaults to the regulator;
    /// an empty string skips reporting.
    pub observer: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub error: String,
}

fn error_response(status: StatusCode, kind: &str, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorBody {
            kind: kind.to_string(),
            error: error.to_string(),
        }),
    )
        .into_response()
}

/// HTTP status for a failed flow.
fn flow_status(e: &FlowError) -> StatusCode {
    match e {
        FlowError::NotFound(_) => StatusCode::NOT_FOUND,
        FlowError::Conflict { .. } => StatusCode::CONFLICT,
        FlowError::Verification(_) => StatusCode::UNPROCESSABLE_ENTITY,
        FlowError::Rejected { .. }
        | FlowError::ConsensusRejected { .. }
        | FlowError::Delivery { .. }
        | FlowError::Transport(_)
        | FlowError::Timeout { .. }
        | FlowError::Notary(_)
        | FlowError::Protocol(_) => StatusCode::BAD_GATEWAY,
        FlowError::IncompleteSignatures { .. }
        | FlowError::Storage(_)
        | FlowError::KeyManagement(_)
        | FlowError::Signatures(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let cluster = &state.cluster;
    let nodes = cluster
        .node_names()
        .into_iter()
        .map(|name| NodeStatus {
            accounts: cluster
                .directory()
                .hosted_on(&name)
                .into_iter()
                .map(|a| a.name)
                .collect(),
            transactions: cluster
                .vault(name.as_str())
                .map(|v| v.transaction_count())
                .unwrap_or(0),
            name: name.to_string(),
        })
        .collect();

    Json(StatusResponse {
        version: state.version.clone(),
        started_at: state.started_at.to_rfc3339(),
        notary: cluster.notary_name().to_string(),
        committed: cluster.notary().committed_count(),
        session_messages: cluster.network().messages_sent(),
        nodes,
    })
}

async fn transition_handler(
    State(state): State<AppState>,
    Json(request): Json<TransitionRequest>,
) -> Response {
    let observer = match request.observer.as_deref() {
        None => Some(simulation::regulator()),
        Some("") => None,
        Some(name) => Some(NodeName::from(name)),
    };

    let result = simulation::start_transition(
        &state.cluster,
        &state.metrics,
        &request.source,
        &request.target,
        observer,
    )
    .await;

    match result {
        Ok(outcome) => (StatusCode::CREATED, Json(outcome)).into_response(),
        Err(e) => error_response(flow_status(&e), e.kind(), e),
    }
}

async fn records_handler(State(state): State<AppState>, Path(node): Path<String>) -> Response {
    let Some(vault) = state.cluster.vault(&node) else {
        return error_response(StatusCode::NOT_FOUND, "not_found", format!("unknown node {node}"));
    };
    match vault.all_records() {
        Ok(records) => Json::<Vec<StoredRecord>>(records).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "storage", e),
    }
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    state
        .metrics
        .sync_session_messages(state.cluster.network().messages_sent());
    metrics::render(&state.metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use concord_protocol::config::FlowConfig;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let config = FlowConfig::with_notary("O=Notary,L=London,C=GB");
        AppState {
            version: "0.1.0-test".into(),
            started_at: chrono::Utc::now(),
            cluster: Arc::new(simulation::build_cluster(&config, None).unwrap()),
            metrics: Arc::new(crate::metrics::NodeMetrics::new().unwrap()),
        }
    }

    async fn get(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, body)
    }

    async fn post_json(router: &Router, path: &str, body: serde_json::Value) -> (StatusCode, Vec<u8>) {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, body)
    }

    fn json(body: &[u8]) -> serde_json::Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let router = create_router(test_state());
        let (status, body) = get(&router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["status"], "ok");
    }

    #[tokio::test]
    async fn status_lists_nodes_and_notary() {
        let router = create_router(test_state());
        let (status, body) = get(&router, "/status").await;
        assert_eq!(status, StatusCode::OK);

        let status: StatusResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(status.notary, "O=Notary,L=London,C=GB");
        assert_eq!(status.committed, 0);
        assert_eq!(status.nodes.len(), 4);
        let party_a = status
            .nodes
            .iter()
            .find(|n| n.name == simulation::PARTY_A)
            .unwrap();
        assert_eq!(party_a.accounts, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn transition_is_created_then_conflicts() {
        let router = create_router(test_state());

        let (status, body) = post_json(
            &router,
            "/transitions",
            serde_json::json!({ "source": "alice", "target": "bob" }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let outcome = json(&body);
        assert!(outcome["exceptions"].as_array().unwrap().is_empty());
        assert!(outcome["linear_id"].is_string());

        let (status, body) = post_json(
            &router,
            "/transitions",
            serde_json::json!({ "source": "alice", "target": "carol" }),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json(&body)["kind"], "conflict");

        let (status, body) = get(&router, &format!("/records/{}", simulation::REGULATOR)).await;
        assert_eq!(status, StatusCode::OK);
        let records = json(&body);
        assert_eq!(records.as_array().unwrap().len(), 1);
        assert_eq!(records[0]["role"], "Observer");
    }

    #[tokio::test]
    async fn self_transition_is_unprocessable() {
        let router = create_router(test_state());
        let (status, body) = post_json(
            &router,
            "/transitions",
            serde_json::json!({ "source": "alice", "target": "alice", "observer": "" }),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json(&body)["kind"], "verification");
    }

    #[tokio::test]
    async fn unknown_account_and_node_are_404() {
        let router = create_router(test_state());
        let (status, _) = post_json(
            &router,
            "/transitions",
            serde_json::json!({ "source": "nobody", "target": "bob" }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = get(&router, "/records/O=Nowhere").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_reflect_flows() {
        let state = test_state();
        let router = create_router(state.clone());
        post_json(
            &router,
            "/transitions",
            serde_json::json!({ "source": "alice", "target": "bob" }),
        )
        .await;

        let (status, body) = get(&router, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("concord_flows_started_total 1"));
        assert!(text.contains("concord_flows_finalized_total 1"));
        assert!(!text.contains("concord_session_messages_total 0"));
    }
}

//! Integration tests against thin fake GCE servers
//!
//! A fake metadata server and a fake Compute Engine API are started on
//! ephemeral ports so the real HTTP clients, and the reconciler on top of
//! them, can be exercised end to end.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use node_policy_controller::client::{
    ComputeClient, ComputeError, MetadataClient, MetadataSource, PolicyEndpoint, PolicyRequest,
    StaticToken, TokenSource,
};
use node_policy_controller::cluster::{
    FetchError, NodeProvider, NodeSnapshot, Outcome, PolicyApplier, ReconcileScope, Reconciler,
    GKE_ZONE_LABEL,
};
use node_policy_controller::selector;

/// Serve `app` on an ephemeral local port and return its base URL
async fn spawn_server(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to address");
    let addr = listener.local_addr().expect("Failed to get local address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

// ============================================================================
// Fake metadata server
// ============================================================================

#[derive(Clone, Default)]
struct MetadataState {
    token_requests: Arc<AtomicUsize>,
    expires_in: i64,
}

fn has_flavor(headers: &HeaderMap) -> bool {
    headers
        .get("Metadata-Flavor")
        .and_then(|v| v.to_str().ok())
        == Some("Google")
}

async fn project_handler(headers: HeaderMap) -> impl IntoResponse {
    if !has_flavor(&headers) {
        return (StatusCode::FORBIDDEN, String::new());
    }
    (StatusCode::OK, "my-project-id".to_string())
}

async fn zone_handler(headers: HeaderMap) -> impl IntoResponse {
    if !has_flavor(&headers) {
        return (StatusCode::FORBIDDEN, String::new());
    }
    (
        StatusCode::OK,
        "projects/123456789/zones/us-central1-a".to_string(),
    )
}

async fn token_handler(
    State(state): State<MetadataState>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    if !has_flavor(&headers) {
        return (StatusCode::FORBIDDEN, Json(Value::Null));
    }
    let n = state.token_requests.fetch_add(1, Ordering::SeqCst) + 1;
    (
        StatusCode::OK,
        Json(json!({
            "access_token": format!("token-{}", n),
            "expires_in": state.expires_in,
            "token_type": "Bearer"
        })),
    )
}

async fn spawn_metadata_server(expires_in: i64) -> (String, MetadataState) {
    let state = MetadataState {
        token_requests: Arc::new(AtomicUsize::new(0)),
        expires_in,
    };
    let app = Router::new()
        .route("/computeMetadata/v1/project/project-id", get(project_handler))
        .route("/computeMetadata/v1/instance/zone", get(zone_handler))
        .route(
            "/computeMetadata/v1/instance/service-accounts/default/token",
            get(token_handler),
        )
        .with_state(state.clone());
    let base = spawn_server(app).await;
    (format!("{}/computeMetadata/v1", base), state)
}

// ============================================================================
// Fake Compute Engine API
// ============================================================================

#[derive(Debug, Clone)]
struct RecordedCall {
    project: String,
    zone: String,
    instance: String,
    authorization: Option<String>,
    body: Value,
}

#[derive(Clone, Default)]
struct ComputeState {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    reject_with: Option<(StatusCode, Value)>,
}

impl ComputeState {
    fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

async fn set_security_policy_handler(
    State(state): State<ComputeState>,
    Path((project, zone, instance)): Path<(String, String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.calls.lock().unwrap().push(RecordedCall {
        project: project.clone(),
        zone: zone.clone(),
        instance: instance.clone(),
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        body,
    });

    if let Some((status, error)) = &state.reject_with {
        return (*status, Json(error.clone()));
    }

    (
        StatusCode::OK,
        Json(json!({
            "kind": "compute#operation",
            "name": "operation-1234",
            "operationType": "setSecurityPolicy",
            "status": "RUNNING",
            "targetLink": format!(
                "https://www.googleapis.com/compute/v1/projects/{}/zones/{}/instances/{}",
                project, zone, instance
            )
        })),
    )
}

async fn spawn_compute_server(reject_with: Option<(StatusCode, Value)>) -> (String, ComputeState) {
    let state = ComputeState {
        calls: Arc::new(Mutex::new(Vec::new())),
        reject_with,
    };
    let app = Router::new()
        .route(
            "/compute/v1/projects/{project}/zones/{zone}/instances/{instance}/setSecurityPolicy",
            post(set_security_policy_handler),
        )
        .with_state(state.clone());
    let base = spawn_server(app).await;
    (format!("{}/compute/v1", base), state)
}

// ============================================================================
// In-memory node provider
// ============================================================================

#[derive(Default)]
struct StaticNodes {
    nodes: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
}

impl StaticNodes {
    fn with_node(self, name: &str, labels: &[(&str, &str)]) -> Self {
        let labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.nodes.lock().unwrap().insert(name.to_string(), labels);
        self
    }
}

#[async_trait]
impl NodeProvider for StaticNodes {
    async fn fetch(&self, name: &str) -> Result<NodeSnapshot, FetchError> {
        self.nodes
            .lock()
            .unwrap()
            .get(name)
            .map(|labels| NodeSnapshot::new(name, labels.clone()))
            .ok_or_else(|| FetchError::NotFound(name.to_string()))
    }
}

const POLICY_URL: &str =
    "https://www.googleapis.com/compute/v1/projects/my-project-id/regions/us-central1/securityPolicies/armor";

fn compute_client(base_url: &str, tokens: Arc<dyn TokenSource>) -> ComputeClient {
    ComputeClient::new(base_url, tokens, Duration::from_secs(5)).unwrap()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_metadata_discovery() {
    let (base_url, _) = spawn_metadata_server(3600).await;
    let metadata = MetadataClient::new(base_url).unwrap();

    assert_eq!(metadata.project_id().await.unwrap(), "my-project-id");
    assert_eq!(metadata.zone().await.unwrap(), "us-central1-a");
}

#[tokio::test]
async fn test_metadata_token_is_cached() {
    let (base_url, state) = spawn_metadata_server(3600).await;
    let metadata = MetadataClient::new(base_url).unwrap();

    assert_eq!(metadata.access_token().await.unwrap(), "token-1");
    assert_eq!(metadata.access_token().await.unwrap(), "token-1");
    assert_eq!(state.token_requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_metadata_token_near_expiry_is_refreshed() {
    // Within the refresh skew, so every call mints a new token
    let (base_url, state) = spawn_metadata_server(30).await;
    let metadata = MetadataClient::new(base_url).unwrap();

    assert_eq!(metadata.access_token().await.unwrap(), "token-1");
    assert_eq!(metadata.access_token().await.unwrap(), "token-2");
    assert_eq!(state.token_requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_metadata_unknown_path_is_error() {
    let (base_url, _) = spawn_metadata_server(3600).await;
    // Point at a prefix the fake server does not serve
    let metadata = MetadataClient::new(format!("{}/missing", base_url)).unwrap();

    assert!(metadata.project_id().await.is_err());
}

#[tokio::test]
async fn test_compute_set_security_policy() {
    let (base_url, state) = spawn_compute_server(None).await;
    let client = compute_client(&base_url, Arc::new(StaticToken::new("ya29.test")));

    let request = PolicyRequest::new("my-project-id", "us-central1-a", "my-node-name", POLICY_URL);
    let operation = client.set_security_policy(&request).await.unwrap();

    assert_eq!(operation.name, "operation-1234");
    assert_eq!(operation.status.as_deref(), Some("RUNNING"));

    let calls = state.calls();
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!(call.project, "my-project-id");
    assert_eq!(call.zone, "us-central1-a");
    assert_eq!(call.instance, "my-node-name");
    assert_eq!(call.authorization.as_deref(), Some("Bearer ya29.test"));
    assert_eq!(
        call.body,
        json!({"securityPolicy": POLICY_URL, "networkInterfaces": ["nic0"]})
    );
}

#[tokio::test]
async fn test_compute_error_envelope() {
    let error = json!({
        "error": {
            "code": 403,
            "message": "Required 'compute.instances.setSecurityPolicy' permission",
            "errors": [{"reason": "forbidden"}]
        }
    });
    let (base_url, _) = spawn_compute_server(Some((StatusCode::FORBIDDEN, error))).await;
    let client = compute_client(&base_url, Arc::new(StaticToken::new("t")));

    let request = PolicyRequest::new("p", "us-central1-a", "n", POLICY_URL);
    let err = client.set_security_policy(&request).await.unwrap_err();

    match err {
        ComputeError::Api { status, message } => {
            assert_eq!(status, 403);
            assert!(message.contains("compute.instances.setSecurityPolicy"));
        }
        other => panic!("expected API error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_compute_uses_metadata_token() {
    let (metadata_url, _) = spawn_metadata_server(3600).await;
    let (compute_url, state) = spawn_compute_server(None).await;
    let tokens = Arc::new(MetadataClient::new(metadata_url).unwrap());
    let client = compute_client(&compute_url, tokens);

    let request = PolicyRequest::new("p", "us-central1-a", "n", "");
    client.set_security_policy(&request).await.unwrap();

    let calls = state.calls();
    assert_eq!(calls[0].authorization.as_deref(), Some("Bearer token-1"));
    assert_eq!(calls[0].body["securityPolicy"], "");
}

#[tokio::test]
async fn test_reconciler_end_to_end() {
    let (compute_url, state) = spawn_compute_server(None).await;
    let client = compute_client(&compute_url, Arc::new(StaticToken::new("t")));
    let applier = PolicyApplier::new(Arc::new(client), "my-project-id", POLICY_URL);

    let nodes = StaticNodes::default()
        .with_node(
            "my-node-name",
            &[
                ("cloud.google.com/gke-nodepool", "default-pool"),
                (GKE_ZONE_LABEL, "us-central1-a"),
            ],
        )
        .with_node(
            "spot-node",
            &[
                ("cloud.google.com/gke-nodepool", "spot-pool"),
                (GKE_ZONE_LABEL, "us-central1-b"),
            ],
        );
    let reconciler = Reconciler::new(
        Arc::new(nodes),
        applier,
        selector::parse("cloud.google.com/gke-nodepool=default-pool").unwrap(),
    );
    let scope = ReconcileScope::default();

    for _ in 0..10 {
        reconciler.reconcile("my-node-name", &scope).await.unwrap();
    }
    let outcome = reconciler.reconcile("spot-node", &scope).await.unwrap();
    assert_eq!(outcome, Outcome::NoMatch);
    let outcome = reconciler.reconcile("deleted-node", &scope).await.unwrap();
    assert_eq!(outcome, Outcome::NotFound);

    let calls = state.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].instance, "my-node-name");
    assert_eq!(calls[0].zone, "us-central1-a");
    assert!(reconciler.processed().is_processed("my-node-name"));
    assert!(!reconciler.processed().is_processed("spot-node"));
}

#[tokio::test]
async fn test_reconciler_retries_after_api_failure() {
    let error = json!({"error": {"code": 500, "message": "backend error"}});
    let (compute_url, state) =
        spawn_compute_server(Some((StatusCode::INTERNAL_SERVER_ERROR, error))).await;
    let client = compute_client(&compute_url, Arc::new(StaticToken::new("t")));
    let applier = PolicyApplier::new(Arc::new(client), "my-project-id", POLICY_URL);

    let nodes = StaticNodes::default()
        .with_node("my-node-name", &[(GKE_ZONE_LABEL, "us-central1-a")]);
    let reconciler = Reconciler::new(
        Arc::new(nodes),
        applier,
        selector::Selector::everything(),
    );
    let scope = ReconcileScope::default();

    assert!(reconciler.reconcile("my-node-name", &scope).await.is_err());
    assert!(reconciler.reconcile("my-node-name", &scope).await.is_err());

    assert_eq!(state.calls().len(), 2);
    assert!(!reconciler.processed().is_processed("my-node-name"));
}

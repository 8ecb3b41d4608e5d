//! In-process fake Ollama server and model registry for integration tests

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct FakeState {
    pub tags: RwLock<Vec<(String, String)>>,
    pub models: RwLock<Vec<String>>,
    /// Raw manifest body per `name:tag`.
    pub manifests: RwLock<HashMap<String, String>>,
    /// NDJSON pull frames per model name.
    pub frames: RwLock<HashMap<String, Vec<String>>>,
    /// Pause between streamed pull frames.
    pub frame_delay: RwLock<Duration>,
    /// Bytes served for installer downloads.
    pub installer: RwLock<Vec<u8>>,
}

pub struct FakeOllama {
    pub state: Arc<FakeState>,
    pub base_url: String,
}

impl FakeOllama {
    pub async fn start() -> Self {
        let state = Arc::new(FakeState::default());

        let app = Router::new()
            .route("/api/tags", get(tags))
            .route("/v1/models", get(models))
            .route("/api/pull", post(pull))
            .route("/v2/{org}/{name}/manifests/{tag}", get(manifest))
            .route("/installer.bin", get(installer))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake server");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve fake server");
        });

        Self {
            state,
            base_url: format!("http://{addr}"),
        }
    }

    pub async fn add_tag(&self, name: &str, digest: &str) {
        self.state
            .tags
            .write()
            .await
            .push((name.to_string(), digest.to_string()));
    }

    /// Register a manifest body for `name` (e.g. `granite3.1-dense:2b`)
    /// and return its registry digest, as the server would report it.
    pub async fn add_manifest(&self, name: &str, config_size: u64, layer_sizes: &[u64]) -> String {
        let layers: Vec<String> = layer_sizes
            .iter()
            .map(|size| format!(r#"{{"mediaType":"application/vnd.ollama.image.model","size":{size}}}"#))
            .collect();
        let body = format!(
            r#"{{"schemaVersion":2,"config":{{"size":{config_size}}},"layers":[{}]}}"#,
            layers.join(",")
        );
        use sha2::Digest;
        let digest = format!("{:x}", sha2::Sha256::digest(body.as_bytes()));
        self.state
            .manifests
            .write()
            .await
            .insert(name.to_string(), body);
        digest
    }

    pub async fn set_frames(&self, name: &str, frames: &[(u64, u64)]) {
        let lines = frames
            .iter()
            .map(|(total, completed)| {
                format!(r#"{{"status":"pulling","total":{total},"completed":{completed}}}"#)
            })
            .collect();
        self.state
            .frames
            .write()
            .await
            .insert(name.to_string(), lines);
    }

    pub async fn set_frame_delay(&self, delay: Duration) {
        *self.state.frame_delay.write().await = delay;
    }

    pub async fn set_installer(&self, bytes: Vec<u8>) {
        *self.state.installer.write().await = bytes;
    }
}

async fn tags(State(state): State<Arc<FakeState>>) -> Json<serde_json::Value> {
    let tags = state.tags.read().await;
    let models: Vec<_> = tags
        .iter()
        .map(|(name, digest)| serde_json::json!({"name": name, "digest": digest}))
        .collect();
    Json(serde_json::json!({ "models": models }))
}

async fn models(State(state): State<Arc<FakeState>>) -> Json<serde_json::Value> {
    let models = state.models.read().await;
    let data: Vec<_> = models
        .iter()
        .map(|id| serde_json::json!({"id": id}))
        .collect();
    Json(serde_json::json!({ "data": data }))
}

async fn manifest(
    Path((org, name, tag)): Path<(String, String, String)>,
    State(state): State<Arc<FakeState>>,
) -> impl IntoResponse {
    let key = if org == "library" {
        format!("{name}:{tag}")
    } else {
        format!("{org}/{name}:{tag}")
    };
    match state.manifests.read().await.get(&key) {
        Some(body) => (StatusCode::OK, body.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, "manifest unknown").into_response(),
    }
}

async fn pull(
    State(state): State<Arc<FakeState>>,
    Json(request): Json<serde_json::Value>,
) -> impl IntoResponse {
    let name = request
        .get("name")
        .and_then(|n| n.as_str())
        .unwrap_or_default()
        .to_string();
    let frames = state
        .frames
        .read()
        .await
        .get(&name)
        .cloned()
        .unwrap_or_default();
    let delay = *state.frame_delay.read().await;

    let stream = async_stream::stream! {
        for line in frames {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            yield Ok::<_, std::convert::Infallible>(format!("{line}\n"));
        }
    };
    Body::from_stream(stream).into_response()
}

async fn installer(State(state): State<Arc<FakeState>>) -> Vec<u8> {
    state.installer.read().await.clone()
}

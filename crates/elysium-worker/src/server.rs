use std::future::Future;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::handler::JobHandler;
use crate::queue::job_result;

/// Local stand-in for the platform's sync API.
pub fn worker_router(handler: Arc<JobHandler>) -> Router {
    Router::new()
        .route("/runsync", post(runsync))
        .route("/health", get(health))
        .with_state(handler)
}

async fn runsync(State(handler): State<Arc<JobHandler>>, Json(job): Json<Value>) -> Json<Value> {
    let id = job
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("local-{}", uuid::Uuid::new_v4()));

    let resp = handler.handle(&job).await;
    let mut body = job_result(&resp);
    body["id"] = json!(id);
    body["status"] = json!(if resp.is_success() { "COMPLETED" } else { "FAILED" });
    Json(body)
}

async fn health(State(handler): State<Arc<JobHandler>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "engine": handler.engine_type(),
        "initialized": handler.is_initialized(),
    }))
}

pub async fn serve(
    handler: Arc<JobHandler>,
    listen_addr: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(addr=%listener.local_addr()?, "local worker api listening");
    axum::serve(listener, worker_router(handler))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

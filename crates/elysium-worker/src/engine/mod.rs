pub mod echo;
pub mod tgi;
pub mod vllm;

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Child;

use elysium_common::{SamplingDefaults, SamplingParams};

/// Knobs shared by every engine that runs as a local server process.
#[derive(Debug, Clone, clap::Args)]
pub struct EngineRuntime {
    /// Port the local model server listens on.
    #[arg(long, env = "ENGINE_PORT", default_value_t = 8000)]
    pub engine_port: u16,

    /// How long to wait for the model server to report healthy. Covers the weight download.
    #[arg(long, env = "ENGINE_READY_TIMEOUT_SECS", default_value_t = 1800)]
    pub ready_timeout_secs: u64,

    /// Upper bound for one generation request.
    #[arg(long, env = "ENGINE_REQUEST_TIMEOUT_SECS", default_value_t = 300)]
    pub request_timeout_secs: u64,
}

impl EngineRuntime {
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.engine_port)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// One generation call, already reduced to what engines understand.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub prompt: String,
    /// Base64 image payload, or a full `data:` URL.
    pub image: Option<String>,
    pub sampling: SamplingParams,
}

/// Handle to a started engine instance.
#[derive(Debug)]
pub struct EngineHandle {
    pub base_url: String,
    pub engine_model: String,
    pub process: EngineProcess,
}

/// How the engine process is managed.
#[derive(Debug)]
pub enum EngineProcess {
    /// A locally spawned model server, killed when the handle is dropped.
    Child(Child),
    /// Nothing to manage (stub engines, externally started servers).
    External,
}

impl EngineProcess {
    pub fn pid(&self) -> Option<u32> {
        match self {
            EngineProcess::Child(child) => child.id(),
            EngineProcess::External => None,
        }
    }
}

#[async_trait]
pub trait Engine: Send + Sync {
    /// Engine type identifier, e.g. "vllm", "tgi".
    fn engine_type(&self) -> &str;

    /// Defaults applied to controls a job leaves unset.
    fn sampling_defaults(&self) -> SamplingDefaults {
        SamplingDefaults::default()
    }

    /// Whether the worker should start this engine before taking jobs
    /// instead of on the first job.
    fn starts_eagerly(&self) -> bool {
        false
    }

    /// Start the engine and wait until it can serve requests.
    async fn start(&self) -> anyhow::Result<EngineHandle>;

    /// Run one generation and return the produced text.
    async fn generate(&self, handle: &EngineHandle, req: &GenerateRequest)
        -> anyhow::Result<String>;
}

/// Create the Engine implementation named by `engine_type`.
/// Unknown names fall back to "vllm".
pub fn create_engine(
    engine_type: &str,
    vllm: &vllm::VllmConfig,
    tgi: &tgi::TgiConfig,
    runtime: &EngineRuntime,
) -> anyhow::Result<Box<dyn Engine>> {
    let engine: Box<dyn Engine> = match engine_type {
        "vllm" => Box::new(vllm::VllmEngine::new(vllm.clone(), runtime.clone())?),
        "tgi" => Box::new(tgi::TgiEngine::new(tgi.clone(), runtime.clone())?),
        "echo" => Box::new(echo::EchoEngine::default()),
        other => {
            tracing::warn!(engine_type=%other, "unknown engine type, falling back to vllm");
            Box::new(vllm::VllmEngine::new(vllm.clone(), runtime.clone())?)
        }
    };
    Ok(engine)
}

const READY_POLL_INITIAL: Duration = Duration::from_millis(250);
const READY_POLL_MAX: Duration = Duration::from_secs(5);

/// Poll `{base_url}/health` until it answers 2xx, backing off between
/// attempts, and give up once `timeout` has elapsed.
pub async fn wait_engine_ready(base_url: &str, timeout: Duration) -> anyhow::Result<()> {
    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(3))
        .timeout(Duration::from_secs(5))
        .build()?;

    let deadline = tokio::time::Instant::now() + timeout;
    let health_url = format!("{}/health", base_url.trim_end_matches('/'));
    let mut delay = READY_POLL_INITIAL;
    loop {
        match http.get(&health_url).send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) => tracing::debug!(status=%resp.status(), %health_url, "engine not ready yet"),
            Err(e) => tracing::debug!(error=%e, %health_url, "engine not reachable yet"),
        }

        let now = tokio::time::Instant::now();
        if now >= deadline {
            anyhow::bail!("engine not ready within {}s", timeout.as_secs());
        }
        tokio::time::sleep(delay.min(deadline - now)).await;
        delay = (delay * 2).min(READY_POLL_MAX);
    }
}

/// Wait for readiness, failing early if the server process exits first.
pub(crate) async fn wait_child_ready(
    child: &mut Child,
    engine_type: &str,
    base_url: &str,
    timeout: Duration,
) -> anyhow::Result<()> {
    tokio::select! {
        r = wait_engine_ready(base_url, timeout) => r,
        status = child.wait() => {
            let status = status?;
            anyhow::bail!("{engine_type} exited early: {status}");
        }
    }
}

/// Pull a human-readable message out of an engine error body.
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(|m| m.as_str().map(str::to_string))
                .or_else(|| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_error_message() {
        assert_eq!(error_message(r#"{"error": "Input validation error"}"#), "Input validation error");
        assert_eq!(
            error_message(r#"{"error": {"message": "model not found", "type": "x"}}"#),
            "model not found"
        );
        assert_eq!(error_message(r#"{"message": "bad"}"#), "bad");
        assert_eq!(error_message(" plain text \n"), "plain text");
    }

    #[tokio::test]
    async fn test_wait_engine_ready_after_warmup() {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/health",
            get(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        StatusCode::SERVICE_UNAVAILABLE
                    } else {
                        StatusCode::OK
                    }
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        wait_engine_ready(&format!("http://{addr}"), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_engine_ready_deadline() {
        // Nothing listens on this port once the listener is dropped.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = wait_engine_ready(&format!("http://{addr}"), Duration::from_millis(600))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not ready"));
    }
}

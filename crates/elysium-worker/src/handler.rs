use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::OnceCell;

use elysium_common::{HandlerResponse, Job, SamplingDefaults, SamplingParams};

use crate::engine::{Engine, EngineHandle, GenerateRequest};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("model_init_failed: {0}")]
    ModelInitFailed(String),
    #[error("invalid job: {0}")]
    InvalidJob(#[from] serde_json::Error),
    #[error("{0:#}")]
    Generate(anyhow::Error),
}

/// Runs jobs against one engine instance.
///
/// The engine is started at most once per process, by whichever caller gets
/// there first. A failed start is kept, and every later job reports it
/// instead of trying again.
pub struct JobHandler {
    engine: Box<dyn Engine>,
    defaults: SamplingDefaults,
    state: OnceCell<Result<EngineHandle, String>>,
}

impl JobHandler {
    pub fn new(engine: Box<dyn Engine>) -> Self {
        let defaults = engine.sampling_defaults();
        Self {
            engine,
            defaults,
            state: OnceCell::new(),
        }
    }

    pub fn engine_type(&self) -> &str {
        self.engine.engine_type()
    }

    pub fn starts_eagerly(&self) -> bool {
        self.engine.starts_eagerly()
    }

    pub fn sampling_defaults(&self) -> &SamplingDefaults {
        &self.defaults
    }

    pub fn is_initialized(&self) -> bool {
        self.state.initialized()
    }

    pub async fn initialize(&self) -> Result<&EngineHandle, HandlerError> {
        let state = self
            .state
            .get_or_init(|| async {
                let started = std::time::Instant::now();
                let result = match AssertUnwindSafe(self.engine.start()).catch_unwind().await {
                    Ok(Ok(handle)) => Ok(handle),
                    Ok(Err(e)) => Err(format!("{e:#}")),
                    Err(panic) => Err(panic_message(&*panic)),
                };
                match &result {
                    Ok(handle) => tracing::info!(
                        engine_type=%self.engine.engine_type(),
                        model=%handle.engine_model,
                        pid=?handle.process.pid(),
                        elapsed_ms=started.elapsed().as_millis() as u64,
                        "engine initialized"
                    ),
                    Err(e) => tracing::error!(
                        engine_type=%self.engine.engine_type(),
                        error=%e,
                        "engine initialization failed"
                    ),
                }
                result
            })
            .await;
        state
            .as_ref()
            .map_err(|e| HandlerError::ModelInitFailed(e.clone()))
    }

    /// Start the engine ahead of the first job.
    pub async fn warm_up(&self) -> Result<(), HandlerError> {
        self.initialize().await.map(|_| ())
    }

    /// Handle one raw job payload. Every failure, including a panic inside the
    /// engine, comes back as an error response.
    pub async fn handle(&self, raw: &Value) -> HandlerResponse {
        match AssertUnwindSafe(self.run(raw)).catch_unwind().await {
            Ok(Ok(output)) => HandlerResponse::success(output),
            Ok(Err(e)) => {
                tracing::warn!(error=%e, "job failed");
                HandlerResponse::error(e.to_string())
            }
            Err(panic) => {
                let msg = panic_message(&*panic);
                tracing::error!(error=%msg, "job panicked");
                HandlerResponse::error(msg)
            }
        }
    }

    pub async fn handle_job(&self, job: &Job) -> HandlerResponse {
        match serde_json::to_value(job) {
            Ok(raw) => self.handle(&raw).await,
            Err(e) => HandlerResponse::error(HandlerError::InvalidJob(e).to_string()),
        }
    }

    async fn run(&self, raw: &Value) -> Result<String, HandlerError> {
        let handle = self.initialize().await?;
        let job: Job = serde_json::from_value(raw.clone())?;

        let req = GenerateRequest {
            sampling: SamplingParams::from_input(&job.input, &self.defaults),
            prompt: job.input.prompt,
            image: job.input.image,
        };
        tracing::debug!(
            job_id=?job.id,
            max_tokens=req.sampling.max_tokens,
            temperature=req.sampling.temperature,
            has_image=req.image.is_some(),
            "running job"
        );

        self.engine
            .generate(handle, &req)
            .await
            .map_err(HandlerError::Generate)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic: unknown".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::echo::EchoEngine;
    use crate::engine::EngineProcess;
    use async_trait::async_trait;
    use elysium_common::ResponseStatus;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct Calls {
        starts: AtomicUsize,
        requests: Mutex<Vec<GenerateRequest>>,
    }

    enum Mode {
        Ok,
        FailStart,
        PanicGenerate,
        FailGenerate,
    }

    struct ScriptedEngine {
        calls: Arc<Calls>,
        mode: Mode,
    }

    #[async_trait]
    impl Engine for ScriptedEngine {
        fn engine_type(&self) -> &str {
            "scripted"
        }

        async fn start(&self) -> anyhow::Result<EngineHandle> {
            self.calls.starts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if let Mode::FailStart = self.mode {
                anyhow::bail!("CUDA out of memory");
            }
            Ok(EngineHandle {
                base_url: String::new(),
                engine_model: "scripted".into(),
                process: EngineProcess::External,
            })
        }

        async fn generate(
            &self,
            _handle: &EngineHandle,
            req: &GenerateRequest,
        ) -> anyhow::Result<String> {
            self.calls.requests.lock().unwrap().push(req.clone());
            match self.mode {
                Mode::PanicGenerate => panic!("engine blew up"),
                Mode::FailGenerate => anyhow::bail!("sampling failed"),
                _ => Ok("4".into()),
            }
        }
    }

    fn handler(mode: Mode) -> (JobHandler, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        let engine = ScriptedEngine {
            calls: calls.clone(),
            mode,
        };
        (JobHandler::new(Box::new(engine)), calls)
    }

    #[tokio::test]
    async fn test_two_plus_two_succeeds() {
        let handler = JobHandler::new(Box::new(EchoEngine));
        let resp = handler
            .handle(&json!({"input": {"prompt": "2+2?", "max_new_tokens": 16, "temperature": 0.1}}))
            .await;
        assert_eq!(resp, HandlerResponse::success("echo: 2+2?"));
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"output": "echo: 2+2?", "status": "success"})
        );
    }

    #[tokio::test]
    async fn test_defaults_and_token_precedence() {
        let (handler, calls) = handler(Mode::Ok);
        handler.handle(&json!({"input": {"prompt": "a"}})).await;
        handler
            .handle(&json!({"input": {"prompt": "b", "max_tokens": 64}}))
            .await;
        handler
            .handle(&json!({"input": {"prompt": "c", "max_tokens": 64, "max_new_tokens": 16}}))
            .await;
        handler.handle(&json!({})).await;
        handler
            .handle(&json!({"input": {"prompt": "2+2?", "max_new_tokens": 16, "temperature": 0.1, "top_p": 0.9}}))
            .await;

        let reqs = calls.requests.lock().unwrap();
        assert_eq!(reqs[0].sampling.max_tokens, 256);
        assert_eq!(reqs[0].sampling.temperature, 0.5);
        assert_eq!(reqs[0].sampling.top_p, 0.95);
        assert_eq!(reqs[1].sampling.max_tokens, 64);
        assert_eq!(reqs[2].sampling.max_tokens, 16);
        assert_eq!(reqs[3].prompt, "");
        assert_eq!(reqs[4].sampling.temperature, 0.1);
        assert_eq!(reqs[4].sampling.top_p, 0.9);
    }

    #[tokio::test]
    async fn test_concurrent_first_jobs_initialize_once() {
        let (handler, calls) = handler(Mode::Ok);
        let job = json!({"input": {"prompt": "x"}});
        let (a, b, c) = tokio::join!(handler.handle(&job), handler.handle(&job), handler.handle(&job));

        assert!(a.is_success() && b.is_success() && c.is_success());
        assert_eq!(calls.starts.load(Ordering::SeqCst), 1);
        assert_eq!(calls.requests.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_init_is_cached() {
        let (handler, calls) = handler(Mode::FailStart);
        let job = json!({"input": {"prompt": "x"}});

        let first = handler.handle(&job).await;
        let second = handler.handle(&job).await;

        assert_eq!(first.status, ResponseStatus::Error);
        assert_eq!(
            first.error.as_deref(),
            Some("model_init_failed: CUDA out of memory")
        );
        assert_eq!(first, second);
        assert_eq!(calls.starts.load(Ordering::SeqCst), 1);
        assert!(calls.requests.lock().unwrap().is_empty());
        assert!(matches!(
            handler.warm_up().await,
            Err(HandlerError::ModelInitFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_engine_panic_becomes_error_response() {
        let (handler, _calls) = handler(Mode::PanicGenerate);
        let resp = handler.handle(&json!({"input": {"prompt": "x"}})).await;
        assert_eq!(resp.status, ResponseStatus::Error);
        assert!(resp.error.unwrap().contains("engine blew up"));

        // The engine handle survives a panicking job.
        assert!(handler.is_initialized());
    }

    #[tokio::test]
    async fn test_engine_error_and_bad_input() {
        let (handler, _calls) = handler(Mode::FailGenerate);
        let resp = handler.handle(&json!({"input": {"prompt": "x"}})).await;
        assert_eq!(resp, HandlerResponse::error("sampling failed"));

        let resp = handler
            .handle(&json!({"input": {"prompt": 42}}))
            .await;
        assert_eq!(resp.status, ResponseStatus::Error);
        assert!(resp.error.unwrap().starts_with("invalid job"));
    }

    #[tokio::test]
    async fn test_handle_job_typed() {
        let (handler, calls) = handler(Mode::Ok);
        let mut job = Job::default();
        job.input.prompt = "typed".into();
        job.input.image = Some("AAAA".into());

        assert!(handler.handle_job(&job).await.is_success());
        let reqs = calls.requests.lock().unwrap();
        assert_eq!(reqs[0].image.as_deref(), Some("AAAA"));
    }
}

use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::handler::JobHandler;

pub const GET_JOB_ENV: &str = "RUNPOD_WEBHOOK_GET_JOB";
pub const POST_OUTPUT_ENV: &str = "RUNPOD_WEBHOOK_POST_OUTPUT";

const IDLE_DELAY: Duration = Duration::from_millis(500);
const ERROR_BACKOFF: Duration = Duration::from_secs(2);

/// Where the platform hands out jobs and takes results back.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Job-take URL template; `$ID` is the worker id.
    pub get_job_url: String,
    /// Job-done URL template; `$ID` is the job id, `$RUNPOD_POD_ID` the worker id.
    pub post_output_url: String,
    pub api_key: Option<String>,
    pub worker_id: String,
    pub idle_delay: Duration,
    pub error_backoff: Duration,
}

impl QueueConfig {
    /// `Ok(None)` when the worker is not running under the platform queue.
    pub fn from_env(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Option<Self>> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let Some(get_job_url) = non_empty(GET_JOB_ENV) else {
            return Ok(None);
        };
        let post_output_url = non_empty(POST_OUTPUT_ENV)
            .with_context(|| format!("{GET_JOB_ENV} is set but {POST_OUTPUT_ENV} is not"))?;
        let worker_id = non_empty("RUNPOD_POD_ID").unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(Some(Self {
            get_job_url,
            post_output_url,
            api_key: non_empty("RUNPOD_AI_API_KEY"),
            worker_id,
            idle_delay: IDLE_DELAY,
            error_backoff: ERROR_BACKOFF,
        }))
    }

    pub fn job_url(&self) -> String {
        self.get_job_url.replace("$ID", &self.worker_id)
    }

    pub fn output_url(&self, job_id: &str) -> String {
        self.post_output_url
            .replace("$ID", job_id)
            .replace("$RUNPOD_POD_ID", &self.worker_id)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key.as_deref() {
            Some(key) => req.header(reqwest::header::AUTHORIZATION, key),
            None => req,
        }
    }
}

/// Take jobs one at a time until `shutdown` resolves. A job already taken is
/// finished and reported before the loop exits.
pub async fn run_queue_worker(
    handler: &JobHandler,
    cfg: &QueueConfig,
    http: &reqwest::Client,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    tokio::pin!(shutdown);
    tracing::info!(worker_id=%cfg.worker_id, "queue worker started");

    loop {
        let next = tokio::select! {
            _ = &mut shutdown => break,
            r = fetch_job(http, cfg) => r,
        };

        let delay = match next {
            Ok(Some(job)) => {
                process_job(handler, http, cfg, job).await;
                continue;
            }
            Ok(None) => cfg.idle_delay,
            Err(e) => {
                tracing::warn!(error=%e, "failed to fetch job");
                cfg.error_backoff
            }
        };

        tokio::select! {
            _ = &mut shutdown => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    tracing::info!(worker_id=%cfg.worker_id, "queue worker stopped");
    Ok(())
}

async fn fetch_job(http: &reqwest::Client, cfg: &QueueConfig) -> anyhow::Result<Option<Value>> {
    let resp = cfg.authorize(http.get(cfg.job_url())).send().await?;
    let status = resp.status();
    if status == StatusCode::NO_CONTENT {
        return Ok(None);
    }
    if !status.is_success() {
        anyhow::bail!("job-take returned {status}");
    }

    let body = resp.text().await?;
    if body.trim().is_empty() {
        return Ok(None);
    }
    let job: Value = serde_json::from_str(&body).context("job-take returned invalid json")?;
    match job.get("id") {
        Some(Value::String(_)) => Ok(Some(job)),
        id => {
            let preview: String = body.chars().take(200).collect();
            tracing::warn!(?id, body=%preview, "dropping job without a string id");
            Ok(None)
        }
    }
}

/// Platform result body for one handler response.
pub fn job_result(resp: &elysium_common::HandlerResponse) -> Value {
    if resp.is_success() {
        json!({ "output": resp })
    } else {
        json!({ "error": resp.error.as_deref().unwrap_or("unknown error") })
    }
}

async fn process_job(handler: &JobHandler, http: &reqwest::Client, cfg: &QueueConfig, job: Value) {
    let job_id = job
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    tracing::info!(%job_id, "job received");

    let started = std::time::Instant::now();
    let resp = handler.handle(&job).await;
    tracing::info!(
        %job_id,
        ok=resp.is_success(),
        elapsed_ms=started.elapsed().as_millis() as u64,
        "job finished"
    );

    let result = cfg
        .authorize(http.post(cfg.output_url(&job_id)))
        .json(&job_result(&resp))
        .send()
        .await;
    match result {
        Ok(r) if r.status().is_success() => {}
        Ok(r) => tracing::warn!(%job_id, status=%r.status(), "job-done rejected"),
        Err(e) => tracing::warn!(%job_id, error=%e, "failed to post job result"),
    }
}

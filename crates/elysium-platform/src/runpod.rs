use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use elysium_common::Job;

use crate::types::{
    CreatedEndpoint, CreatedTemplate, EndpointRequest, EndpointSummary, Platform, TemplateRequest,
};

pub const DEFAULT_GRAPHQL_URL: &str = "https://api.runpod.io/graphql";
pub const DEFAULT_SERVERLESS_URL: &str = "https://api.runpod.ai/v2";

const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(1);

const LIST_ENDPOINTS: &str = "query Endpoints { myself { endpoints { id name templateId } } }";
const SAVE_TEMPLATE: &str =
    "mutation SaveTemplate($input: SaveTemplateInput!) { saveTemplate(input: $input) { id name } }";
const SAVE_ENDPOINT: &str =
    "mutation SaveEndpoint($input: EndpointInput!) { saveEndpoint(input: $input) { id name } }";

/// RunPod control plane (GraphQL) plus the serverless job API.
#[derive(Debug, Clone)]
pub struct RunpodPlatform {
    api_key: String,
    graphql_url: String,
    serverless_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct JobStatus {
    #[serde(default)]
    id: String,
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl RunpodPlatform {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_urls(api_key, DEFAULT_GRAPHQL_URL, DEFAULT_SERVERLESS_URL)
    }

    pub fn with_urls(
        api_key: impl Into<String>,
        graphql_url: impl Into<String>,
        serverless_url: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            api_key: api_key.into(),
            graphql_url: graphql_url.into(),
            serverless_url: serverless_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn graphql(&self, query: &str, variables: Value) -> Result<Value> {
        let resp = self
            .http
            .post(&self.graphql_url)
            .bearer_auth(&self.api_key)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("graphql request failed ({status}): {body}");
        }

        let body: GraphqlResponse = resp.json().await?;
        if !body.errors.is_empty() {
            let messages: Vec<String> = body.errors.into_iter().map(|e| e.message).collect();
            anyhow::bail!("graphql errors: {}", messages.join("; "));
        }
        body.data.context("graphql response has no data")
    }

    async fn job_status(&self, req: reqwest::RequestBuilder, timeout: Duration) -> Result<JobStatus> {
        let resp = req
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("job request failed ({status}): {body}");
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl Platform for RunpodPlatform {
    async fn list_endpoints(&self) -> Result<Vec<EndpointSummary>> {
        let data = self.graphql(LIST_ENDPOINTS, json!({})).await?;
        let endpoints = data
            .get("myself")
            .and_then(|m| m.get("endpoints"))
            .cloned()
            .unwrap_or(Value::Array(vec![]));
        if endpoints.is_null() {
            return Ok(vec![]);
        }
        Ok(serde_json::from_value(endpoints)?)
    }

    async fn create_template(&self, req: &TemplateRequest) -> Result<CreatedTemplate> {
        let env: Vec<Value> = req
            .env
            .iter()
            .map(|(k, v)| json!({ "key": k, "value": v }))
            .collect();
        let input = json!({
            "name": req.name,
            "imageName": req.image_name,
            "isServerless": req.is_serverless,
            "containerDiskInGb": req.container_disk_gb,
            "volumeInGb": 0,
            "dockerArgs": "",
            "env": env,
            "readme": "",
        });

        tracing::info!(template=%req.name, image=%req.image_name, "creating template");
        let data = self.graphql(SAVE_TEMPLATE, json!({ "input": input })).await?;
        let tmpl = data
            .get("saveTemplate")
            .cloned()
            .context("saveTemplate returned nothing")?;
        Ok(serde_json::from_value(tmpl)?)
    }

    async fn create_endpoint(&self, req: &EndpointRequest) -> Result<CreatedEndpoint> {
        let input = json!({
            "name": req.name,
            "templateId": req.template_id,
            "gpuIds": req.gpu_ids,
            "workersMin": req.workers_min,
            "workersMax": req.workers_max,
            "idleTimeout": req.idle_timeout,
            "scalerType": req.scaler_type,
            "scalerValue": req.scaler_value,
        });

        tracing::info!(endpoint=%req.name, template_id=%req.template_id, gpu=%req.gpu_ids, "creating endpoint");
        let data = self.graphql(SAVE_ENDPOINT, json!({ "input": input })).await?;
        let ep = data
            .get("saveEndpoint")
            .cloned()
            .context("saveEndpoint returned nothing")?;
        Ok(serde_json::from_value(ep)?)
    }

    async fn run_sync(&self, endpoint_id: &str, job: &Job, timeout: Duration) -> Result<Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        let base = format!("{}/{}", self.serverless_url, endpoint_id);

        let mut status = self
            .job_status(self.http.post(format!("{base}/runsync")).json(job), timeout)
            .await?;

        loop {
            match status.status.as_str() {
                "COMPLETED" => return Ok(status.output.unwrap_or(Value::Null)),
                "FAILED" | "CANCELLED" | "TIMED_OUT" => {
                    let detail = status
                        .error
                        .map(|e| match e {
                            Value::String(s) => s,
                            other => other.to_string(),
                        })
                        .unwrap_or_default();
                    anyhow::bail!("job {} {}: {}", status.id, status.status, detail);
                }
                _ => {}
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                anyhow::bail!(
                    "job {} still {} after {}s",
                    status.id,
                    status.status,
                    timeout.as_secs()
                );
            }
            tracing::debug!(job_id=%status.id, state=%status.status, "waiting for job");
            tokio::time::sleep(STATUS_POLL_INTERVAL.min(remaining)).await;

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                anyhow::bail!("job {} timed out after {}s", status.id, timeout.as_secs());
            }
            let url = format!("{base}/status/{}", status.id);
            status = self.job_status(self.http.get(url), remaining).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use axum::{extract::Path, extract::State, routing::get, routing::post, Json, Router};

    #[derive(Clone, Default)]
    struct Fake {
        graphql_bodies: Arc<Mutex<Vec<Value>>>,
        status_polls: Arc<AtomicU32>,
    }

    async fn graphql(State(fake): State<Fake>, Json(body): Json<Value>) -> Json<Value> {
        fake.graphql_bodies.lock().unwrap().push(body.clone());
        let query = body["query"].as_str().unwrap_or_default();
        if query.contains("saveTemplate") {
            Json(json!({"data": {"saveTemplate": {"id": "tpl-1", "name": body["variables"]["input"]["name"]}}}))
        } else if query.contains("saveEndpoint") {
            Json(json!({"errors": [{"message": "gpu class unavailable"}]}))
        } else {
            Json(json!({"data": {"myself": {"endpoints": [
                {"id": "ep-1", "name": "elysium-first-endpoint", "templateId": "tpl-0"}
            ]}}}))
        }
    }

    async fn runsync(Path(endpoint): Path<String>, Json(job): Json<Value>) -> Json<Value> {
        if endpoint == "broken" {
            return Json(json!({"id": "job-x", "status": "FAILED", "error": "CUDA out of memory"}));
        }
        assert_eq!(job["input"]["prompt"], "hi");
        Json(json!({"id": "job-1", "status": "IN_QUEUE"}))
    }

    async fn job_status(
        State(fake): State<Fake>,
        Path((_endpoint, job)): Path<(String, String)>,
    ) -> Json<Value> {
        assert_eq!(job, "job-1");
        if fake.status_polls.fetch_add(1, Ordering::SeqCst) == 0 {
            Json(json!({"id": "job-1", "status": "IN_PROGRESS"}))
        } else {
            Json(json!({"id": "job-1", "status": "COMPLETED", "output": {"output": "hello", "status": "success"}}))
        }
    }

    async fn spawn_fake() -> (RunpodPlatform, Fake) {
        let fake = Fake::default();
        let app = Router::new()
            .route("/graphql", post(graphql))
            .route("/v2/:endpoint/runsync", post(runsync))
            .route("/v2/:endpoint/status/:job", get(job_status))
            .with_state(fake.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let platform = RunpodPlatform::with_urls(
            "test-key",
            format!("http://{addr}/graphql"),
            format!("http://{addr}/v2"),
        )
        .unwrap();
        (platform, fake)
    }

    #[tokio::test]
    async fn test_list_endpoints() {
        let (platform, _fake) = spawn_fake().await;
        let endpoints = platform.list_endpoints().await.unwrap();
        assert_eq!(
            endpoints,
            vec![EndpointSummary {
                id: "ep-1".into(),
                name: "elysium-first-endpoint".into(),
                template_id: Some("tpl-0".into()),
            }]
        );
    }

    #[tokio::test]
    async fn test_create_template_sends_env_pairs() {
        let (platform, fake) = spawn_fake().await;
        let req = TemplateRequest {
            name: "elysium-first-endpoint-v1".into(),
            image_name: "docker.io/aminatorex/first-endpoint:latest".into(),
            is_serverless: true,
            container_disk_gb: 30,
            env: BTreeMap::from([("MODEL_NAME".to_string(), "Qwen/Qwen3-14B-Instruct".to_string())]),
        };
        let tmpl = platform.create_template(&req).await.unwrap();
        assert_eq!(tmpl.id, "tpl-1");

        let bodies = fake.graphql_bodies.lock().unwrap();
        let input = &bodies[0]["variables"]["input"];
        assert_eq!(input["containerDiskInGb"], 30);
        assert_eq!(input["isServerless"], true);
        assert_eq!(input["env"], json!([{"key": "MODEL_NAME", "value": "Qwen/Qwen3-14B-Instruct"}]));
    }

    #[tokio::test]
    async fn test_graphql_errors_surface() {
        let (platform, _fake) = spawn_fake().await;
        let req = EndpointRequest {
            name: "e".into(),
            template_id: "tpl-1".into(),
            gpu_ids: "AMPERE_48".into(),
            workers_min: 0,
            workers_max: 1,
            idle_timeout: 60,
            scaler_type: "QUEUE_DELAY".into(),
            scaler_value: 4,
        };
        let err = platform.create_endpoint(&req).await.unwrap_err();
        assert!(err.to_string().contains("gpu class unavailable"));
    }

    #[tokio::test]
    async fn test_run_sync_follows_status_until_completed() {
        let (platform, fake) = spawn_fake().await;
        let job = Job {
            id: None,
            input: elysium_common::JobInput::prompt("hi"),
        };
        let out = platform
            .run_sync("ep-1", &job, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(out, json!({"output": "hello", "status": "success"}));
        assert_eq!(fake.status_polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_sync_failed_job() {
        let (platform, _fake) = spawn_fake().await;
        let err = platform
            .run_sync("broken", &Job::default(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "job job-x FAILED: CUDA out of memory");
    }
}

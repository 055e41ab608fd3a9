use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Result;
use tokio::sync::RwLock;

use elysium_common::Job;

use crate::types::{
    CreatedEndpoint, CreatedTemplate, EndpointRequest, EndpointSummary, Platform, TemplateRequest,
};

/// In-process platform used by tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryPlatform {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    endpoints: Vec<EndpointSummary>,
    templates: Vec<(String, TemplateRequest)>,
    list_calls: u64,
    run_sync_calls: Vec<(String, Job)>,
    /// endpoint name -> error returned by run_sync
    failing_runs: HashMap<String, String>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(inner: &mut Inner, prefix: &str) -> String {
        inner.next_id = inner.next_id.saturating_add(1);
        format!("{prefix}-{}", inner.next_id)
    }

    /// Registers an endpoint as if created by an earlier run.
    pub async fn seed_endpoint(&self, name: &str) -> String {
        let mut inner = self.inner.write().await;
        let id = Self::next_id(&mut inner, "ep");
        inner.endpoints.push(EndpointSummary {
            id: id.clone(),
            name: name.to_string(),
            template_id: None,
        });
        id
    }

    /// Makes every `run_sync` against the endpoint called `name` fail with `error`.
    pub async fn fail_runs_for(&self, name: &str, error: &str) {
        let mut inner = self.inner.write().await;
        inner.failing_runs.insert(name.to_string(), error.to_string());
    }

    pub async fn endpoints(&self) -> Vec<EndpointSummary> {
        self.inner.read().await.endpoints.clone()
    }

    pub async fn templates(&self) -> Vec<TemplateRequest> {
        self.inner
            .read()
            .await
            .templates
            .iter()
            .map(|(_, t)| t.clone())
            .collect()
    }

    pub async fn list_calls(&self) -> u64 {
        self.inner.read().await.list_calls
    }

    pub async fn run_sync_calls(&self) -> Vec<(String, Job)> {
        self.inner.read().await.run_sync_calls.clone()
    }
}

#[async_trait::async_trait]
impl Platform for MemoryPlatform {
    async fn list_endpoints(&self) -> Result<Vec<EndpointSummary>> {
        let mut inner = self.inner.write().await;
        inner.list_calls += 1;
        Ok(inner.endpoints.clone())
    }

    async fn create_template(&self, req: &TemplateRequest) -> Result<CreatedTemplate> {
        let mut inner = self.inner.write().await;
        let id = Self::next_id(&mut inner, "tpl");
        inner.templates.push((id.clone(), req.clone()));
        Ok(CreatedTemplate {
            id,
            name: req.name.clone(),
        })
    }

    async fn create_endpoint(&self, req: &EndpointRequest) -> Result<CreatedEndpoint> {
        let mut inner = self.inner.write().await;
        if !inner.templates.iter().any(|(id, _)| *id == req.template_id) {
            anyhow::bail!("template {} does not exist", req.template_id);
        }
        let id = Self::next_id(&mut inner, "ep");
        inner.endpoints.push(EndpointSummary {
            id: id.clone(),
            name: req.name.clone(),
            template_id: Some(req.template_id.clone()),
        });
        Ok(CreatedEndpoint {
            id,
            name: req.name.clone(),
        })
    }

    async fn run_sync(
        &self,
        endpoint_id: &str,
        job: &Job,
        _timeout: Duration,
    ) -> Result<serde_json::Value> {
        let mut inner = self.inner.write().await;
        inner
            .run_sync_calls
            .push((endpoint_id.to_string(), job.clone()));

        let name = inner
            .endpoints
            .iter()
            .find(|ep| ep.id == endpoint_id)
            .map(|ep| ep.name.clone())
            .ok_or_else(|| anyhow::anyhow!("endpoint {endpoint_id} not found"))?;

        if let Some(err) = inner.failing_runs.get(&name) {
            anyhow::bail!("{err}");
        }
        Ok(serde_json::json!({
            "output": format!("echo: {}", job.input.prompt),
            "status": "success",
        }))
    }
}

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use elysium_common::{EndpointSpec, Job, SCALER_TYPE, SCALER_VALUE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSummary {
    pub id: String,
    pub name: String,
    #[serde(default, rename = "templateId")]
    pub template_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRequest {
    pub name: String,
    pub image_name: String,
    pub is_serverless: bool,
    pub container_disk_gb: u32,
    pub env: BTreeMap<String, String>,
}

impl TemplateRequest {
    pub fn for_spec(spec: &EndpointSpec) -> Self {
        Self {
            name: spec.template_name.clone(),
            image_name: spec.image.clone(),
            is_serverless: true,
            container_disk_gb: spec.container_disk_gb,
            env: spec.env.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedTemplate {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRequest {
    pub name: String,
    pub template_id: String,
    pub gpu_ids: String,
    pub workers_min: u32,
    pub workers_max: u32,
    pub idle_timeout: u32,
    pub scaler_type: String,
    pub scaler_value: u32,
}

impl EndpointRequest {
    pub fn for_spec(spec: &EndpointSpec, template_id: &str) -> Self {
        Self {
            name: spec.endpoint_name.clone(),
            template_id: template_id.to_string(),
            gpu_ids: spec.gpu_id.clone(),
            workers_min: spec.workers_min,
            workers_max: spec.workers_max,
            idle_timeout: spec.idle_timeout_secs,
            scaler_type: SCALER_TYPE.to_string(),
            scaler_value: SCALER_VALUE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedEndpoint {
    pub id: String,
    pub name: String,
}

/// The serverless GPU platform, as seen by the deployment driver.
#[async_trait]
pub trait Platform: Send + Sync {
    async fn list_endpoints(&self) -> Result<Vec<EndpointSummary>>;

    async fn create_template(&self, req: &TemplateRequest) -> Result<CreatedTemplate>;

    async fn create_endpoint(&self, req: &EndpointRequest) -> Result<CreatedEndpoint>;

    /// Submit a job and wait for its output, failing once `timeout` elapses.
    async fn run_sync(&self, endpoint_id: &str, job: &Job, timeout: Duration)
        -> Result<serde_json::Value>;

    async fn find_endpoint_by_name(&self, name: &str) -> Result<Option<EndpointSummary>> {
        let endpoints = self.list_endpoints().await?;
        Ok(endpoints.into_iter().find(|ep| ep.name == name))
    }
}

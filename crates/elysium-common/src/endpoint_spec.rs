use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::job::Job;

/// Autoscaler applied to every endpoint this repo provisions.
pub const SCALER_TYPE: &str = "QUEUE_DELAY";
pub const SCALER_VALUE: u32 = 4;

/// Declarative description of one serverless endpoint and the template behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSpec {
    /// Short name ("first", "second", ...), used in reports and env var names.
    pub key: String,

    /// Source repository of the worker image (e.g. "Aminatorex/First-Endpoint").
    pub repo: String,

    /// Fully qualified container image reference.
    pub image: String,

    pub template_name: String,

    /// Endpoint name; the idempotency key when looking up existing endpoints.
    pub endpoint_name: String,

    /// Platform GPU class id (e.g. "AMPERE_48").
    pub gpu_id: String,

    pub workers_min: u32,
    pub workers_max: u32,

    /// Seconds an idle worker is kept before scale-down.
    pub idle_timeout_secs: u32,

    pub container_disk_gb: u32,

    /// Environment passed to the worker container.
    pub env: BTreeMap<String, String>,

    /// Job sent once after deployment to check the endpoint answers.
    pub test_payload: Job,
}

impl EndpointSpec {
    /// Name of the variable the resolved endpoint id is exported under,
    /// e.g. `RUNPOD_FIRST_ENDPOINT_ID`.
    pub fn endpoint_id_env_var(&self) -> String {
        format!("RUNPOD_{}_ENDPOINT_ID", self.key.to_uppercase())
    }
}

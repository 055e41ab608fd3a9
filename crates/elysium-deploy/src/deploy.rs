use std::time::Duration;

use anyhow::Result;
use thiserror::Error;

use elysium_common::{CreatedEntry, DeploymentReport, EndpointSpec, ExistingEntry, TestEntry};
use elysium_platform::{EndpointRequest, Platform, RunpodPlatform, TemplateRequest};

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("RUNPOD_API_KEY is required")]
    MissingApiKey,
    #[error(transparent)]
    Client(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub skip_tests: bool,
    pub warmup: Duration,
    pub test_timeout: Duration,
    /// Export `RUNPOD_<KEY>_ENDPOINT_ID` into this process's environment.
    pub export_endpoint_ids: bool,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            skip_tests: false,
            warmup: Duration::from_secs(5),
            test_timeout: Duration::from_secs(240),
            export_endpoint_ids: true,
        }
    }
}

pub fn require_api_key(api_key: Option<&str>) -> Result<String, DeployError> {
    match api_key.map(str::trim) {
        Some(key) if !key.is_empty() => Ok(key.to_string()),
        _ => Err(DeployError::MissingApiKey),
    }
}

/// Checks the credential before any client exists, so a missing key never reaches the network.
pub fn connect(api_key: Option<&str>) -> Result<RunpodPlatform, DeployError> {
    let key = require_api_key(api_key)?;
    Ok(RunpodPlatform::new(key)?)
}

/// Ensure one endpoint per spec exists, then optionally smoke test each.
///
/// Specs are handled one after another. A failed smoke test is recorded and
/// the run continues; platform errors while looking up or creating an
/// endpoint abort the run.
pub async fn deploy_all(
    platform: &dyn Platform,
    specs: &[EndpointSpec],
    opts: &DeployOptions,
) -> Result<DeploymentReport> {
    let mut report = DeploymentReport::default();

    for spec in specs {
        let endpoint_id = ensure_endpoint(platform, spec, &mut report).await?;

        if opts.export_endpoint_ids {
            std::env::set_var(spec.endpoint_id_env_var(), &endpoint_id);
        }

        if opts.skip_tests {
            continue;
        }

        tokio::time::sleep(opts.warmup).await;
        tracing::info!(key=%spec.key, %endpoint_id, "running smoke test");
        let entry = match platform
            .run_sync(&endpoint_id, &spec.test_payload, opts.test_timeout)
            .await
        {
            Ok(result) => TestEntry::passed(&spec.key, &endpoint_id, &result),
            Err(e) => {
                tracing::warn!(key=%spec.key, %endpoint_id, error=%e, "smoke test failed");
                TestEntry::failed(&spec.key, &endpoint_id, format!("{e:#}"))
            }
        };
        report.tests.push(entry);
    }

    Ok(report)
}

async fn ensure_endpoint(
    platform: &dyn Platform,
    spec: &EndpointSpec,
    report: &mut DeploymentReport,
) -> Result<String> {
    if let Some(existing) = platform.find_endpoint_by_name(&spec.endpoint_name).await? {
        tracing::info!(key=%spec.key, endpoint_id=%existing.id, "endpoint already exists");
        report.existing.push(ExistingEntry {
            key: spec.key.clone(),
            endpoint_id: existing.id.clone(),
            name: spec.endpoint_name.clone(),
        });
        return Ok(existing.id);
    }

    let tmpl = platform
        .create_template(&TemplateRequest::for_spec(spec))
        .await?;
    let ep = platform
        .create_endpoint(&EndpointRequest::for_spec(spec, &tmpl.id))
        .await?;
    tracing::info!(key=%spec.key, endpoint_id=%ep.id, template_id=%tmpl.id, "endpoint created");

    report.created.push(CreatedEntry {
        key: spec.key.clone(),
        endpoint_id: ep.id.clone(),
        name: spec.endpoint_name.clone(),
        template_id: tmpl.id,
    });
    Ok(ep.id)
}

pub mod cache_dirs;
pub mod endpoint_spec;
pub mod job;
pub mod report;
pub mod smoke;

pub use cache_dirs::{configure_cache_dirs, volume_root, CacheDirs, CachePaths};
pub use endpoint_spec::{EndpointSpec, SCALER_TYPE, SCALER_VALUE};
pub use job::{HandlerResponse, Job, JobInput, ResponseStatus, SamplingDefaults, SamplingParams};
pub use report::{CreatedEntry, DeploymentReport, ExistingEntry, TestEntry};
pub use smoke::{SmokeRecord, SmokeStatus};

pub mod telemetry;

/// Reads a variable from the process environment, treating non-unicode values as unset.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

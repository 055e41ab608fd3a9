mod args;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use elysium_deploy::{connect, deploy_all, endpoint_specs, DeployOptions};

use crate::args::Args;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let otel_provider = elysium_common::telemetry::init_tracing(
        "elysium-deploy",
        args.otlp_endpoint.as_deref(),
        args.otlp_token.as_deref(),
        &args.log_format,
    );

    match dotenvy::from_path(&args.env_file) {
        Ok(()) => tracing::info!(path=%args.env_file.display(), "loaded env file"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(path=%args.env_file.display(), error=%e, "failed to load env file"),
    }

    // The env file may be the only place the credentials live.
    let api_key = args
        .api_key
        .clone()
        .or_else(|| std::env::var("RUNPOD_API_KEY").ok());
    let hf_token = if args.hf_token.is_empty() {
        std::env::var("HF_TOKEN").unwrap_or_default()
    } else {
        args.hf_token.clone()
    };

    let platform = connect(api_key.as_deref())?;
    let specs = endpoint_specs(&hf_token)?;
    let opts = DeployOptions {
        skip_tests: args.skip_tests,
        warmup: Duration::from_secs(args.warmup_secs),
        test_timeout: Duration::from_secs(args.test_timeout_secs),
        export_endpoint_ids: true,
    };

    let report = deploy_all(&platform, &specs, &opts).await?;

    let json = report.to_pretty_json()?;
    std::fs::write(&args.out, &json)
        .with_context(|| format!("failed to write report to {}", args.out.display()))?;
    println!("{json}");
    println!("Report saved to {}", args.out.display());

    elysium_common::telemetry::shutdown_tracing(otel_provider);
    Ok(())
}

mod args;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use elysium_common::{configure_cache_dirs, process_env};
use elysium_worker::{create_engine, queue, server, JobHandler, QueueConfig};

use crate::args::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let otel_provider = elysium_common::telemetry::init_tracing(
        "elysium-worker",
        args.otlp_endpoint.as_deref(),
        args.otlp_token.as_deref(),
        &args.log_format,
    );

    match configure_cache_dirs() {
        Ok(Some(dirs)) => tracing::info!(
            volume=%dirs.volume_root.display(),
            hub_cache=%dirs.hub_cache.display(),
            "using shared volume caches"
        ),
        Ok(None) => tracing::info!("no shared volume, using default caches"),
        Err(e) => tracing::warn!(error=%e, "failed to prepare cache dirs"),
    }

    let engine = create_engine(&args.engine, &args.vllm, &args.tgi, &args.runtime)?;
    let handler = Arc::new(JobHandler::new(engine));
    tracing::info!(engine_type=%handler.engine_type(), "elysium-worker starting");

    let result = run(&args, handler).await;

    elysium_common::telemetry::shutdown_tracing(otel_provider);
    result
}

async fn run(args: &Args, handler: Arc<JobHandler>) -> anyhow::Result<()> {
    if let Some(input) = args.test_input.as_deref() {
        let job: serde_json::Value =
            serde_json::from_str(input).context("--test-input is not valid JSON")?;
        let resp = handler.handle(&job).await;
        println!("{}", serde_json::to_string_pretty(&resp)?);
        return Ok(());
    }

    if handler.starts_eagerly() {
        // A failed start is cached; queued jobs report it as model_init_failed.
        if let Err(e) = handler.warm_up().await {
            tracing::error!(error=%e, "engine failed to start");
        }
    }

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown requested");
    };

    match QueueConfig::from_env(process_env)? {
        Some(cfg) => {
            let http = reqwest::Client::builder()
                .timeout(Duration::from_secs(90))
                .build()?;
            queue::run_queue_worker(&handler, &cfg, &http, shutdown).await
        }
        None => server::serve(handler, &args.listen_addr, shutdown).await,
    }
}

mod args;
mod pod;
mod prefetch;

use std::process::ExitCode;

use clap::Parser;

use elysium_common::smoke::{result_path, unix_now, write_atomic};
use elysium_common::{configure_cache_dirs, process_env, SmokeRecord};
use elysium_worker::engine::vllm::VllmEngine;
use elysium_worker::JobHandler;

use crate::args::Args;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let otel_provider =
        elysium_common::telemetry::init_tracing("elysium-smoke", None, None, &args.log_format);

    let model_name = args.vllm.model.clone();
    let caches = match configure_cache_dirs() {
        Ok(dirs) => dirs.map(|d| d.paths()).unwrap_or_default(),
        Err(e) => {
            tracing::warn!(error=%e, "failed to prepare cache dirs");
            Default::default()
        }
    };
    let path = result_path(&model_name, process_env, unix_now() as i64).unwrap_or_else(|e| {
        tracing::warn!(error=%e, "failed to prepare results dir");
        String::new()
    });

    let mut record = SmokeRecord::start(&model_name, caches, &path, unix_now());
    match VllmEngine::new(args.vllm.clone(), args.runtime.clone()) {
        Ok(engine) => {
            let handler = JobHandler::new(Box::new(engine));
            let prefetch = async {
                if args.skip_prefetch {
                    return Ok(());
                }
                prefetch::prefetch_weights(&args.hf_cli, &model_name).await
            };
            pod::run_smoke(&handler, &mut record, prefetch).await;
        }
        Err(e) => record.record_error(&e),
    }
    record.finish(unix_now());

    let written = write_atomic(&path, &record);
    match &written {
        Ok(()) if !path.is_empty() => tracing::info!(%path, "wrote result"),
        Ok(()) => {}
        Err(e) => tracing::error!(%path, error=%format!("{e:#}"), "failed to write result"),
    }
    if let Ok(json) = serde_json::to_string_pretty(&record) {
        println!("{json}");
    }

    elysium_common::telemetry::shutdown_tracing(otel_provider);
    ExitCode::from(pod::exit_code(&record, &written))
}

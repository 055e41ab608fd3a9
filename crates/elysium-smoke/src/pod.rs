use std::future::Future;

use anyhow::Context;
use serde_json::{json, Value};

use elysium_common::SmokeRecord;
use elysium_worker::JobHandler;

pub fn smoke_payload() -> Value {
    json!({
        "input": {
            "prompt": "In one sentence: what is 2+2?",
            "max_new_tokens": 16,
            "temperature": 0.1,
        }
    })
}

/// Prefetch, initialize, run the fixed prompt. Every outcome lands in `record`.
pub async fn run_smoke<P>(handler: &JobHandler, record: &mut SmokeRecord, prefetch: P)
where
    P: Future<Output = anyhow::Result<()>>,
{
    let outcome = async {
        prefetch.await.context("weight prefetch failed")?;

        tracing::info!(engine_type=%handler.engine_type(), "initializing model");
        let started = std::time::Instant::now();
        handler.warm_up().await?;
        tracing::info!(elapsed_s=started.elapsed().as_secs_f64(), "model initialized");

        tracing::info!("running inference");
        Ok::<_, anyhow::Error>(handler.handle(&smoke_payload()).await)
    }
    .await;

    match outcome {
        Ok(output) => {
            tracing::info!(ok=output.is_success(), output=?output, "handler returned");
            record.record_output(output);
        }
        Err(e) => {
            tracing::error!(error=%format!("{e:#}"), "smoke run failed");
            record.record_error(&e);
        }
    }
}

/// Process exit status: 0 only when the handler succeeded and the record was
/// written, 2 otherwise.
pub fn exit_code(record: &SmokeRecord, written: &anyhow::Result<()>) -> u8 {
    if record.is_success() && written.is_ok() {
        0
    } else {
        2
    }
}

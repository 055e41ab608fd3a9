use clap::Parser;

use elysium_worker::engine::{tgi::TgiConfig, vllm::VllmConfig, EngineRuntime};

#[derive(Debug, Parser)]
#[command(name = "elysium-worker")]
#[command(about = "Serverless inference worker for the Elysium endpoints", long_about = None)]
pub struct Args {
    /// Engine backing the handler: vllm or tgi.
    #[arg(long, env = "WORKER_ENGINE", default_value = "vllm")]
    pub engine: String,

    /// Run one job payload (JSON) locally, print the response and exit.
    #[arg(long)]
    pub test_input: Option<String>,

    /// Address of the local job API, used when no platform queue is configured.
    #[arg(long, env = "WORKER_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    #[command(flatten)]
    pub vllm: VllmConfig,

    #[command(flatten)]
    pub tgi: TgiConfig,

    #[command(flatten)]
    pub runtime: EngineRuntime,

    /// Log format: text or json
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// OTLP/HTTP endpoint for span export. If not set, spans are not exported.
    #[arg(long, env = "OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Bearer token for the OTLP endpoint.
    #[arg(long, env = "OTLP_TOKEN")]
    pub otlp_token: Option<String>,
}

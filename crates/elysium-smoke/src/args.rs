use clap::Parser;

use elysium_worker::engine::{vllm::VllmConfig, EngineRuntime};

#[derive(Debug, Parser)]
#[command(name = "elysium-smoke")]
#[command(about = "Load the configured model on this pod, run one prompt and record the result", long_about = None)]
pub struct Args {
    /// Skip downloading the weights before initializing the engine
    #[arg(long, env = "SMOKE_SKIP_PREFETCH", default_value_t = false)]
    pub skip_prefetch: bool,

    /// HuggingFace CLI used for the prefetch
    #[arg(long, env = "HF_CLI_BIN", default_value = "huggingface-cli")]
    pub hf_cli: String,

    #[command(flatten)]
    pub vllm: VllmConfig,

    #[command(flatten)]
    pub runtime: EngineRuntime,

    /// Log format: text or json
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,
}

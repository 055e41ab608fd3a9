use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "elysium-deploy")]
#[command(about = "Deploy the five Elysium RunPod endpoints and smoke test them", long_about = None)]
pub struct Args {
    /// Skip the runsync smoke tests
    #[arg(long, default_value_t = false)]
    pub skip_tests: bool,

    /// Output report path
    #[arg(long, default_value = "runpod_5_endpoints_report.json")]
    pub out: PathBuf,

    /// Optional dotenv file loaded before reading credentials
    #[arg(long, default_value = "../Elysium/.env")]
    pub env_file: PathBuf,

    /// RunPod API key
    #[arg(long, env = "RUNPOD_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// HuggingFace token forwarded to every worker template
    #[arg(long, env = "HF_TOKEN", default_value = "", hide_env_values = true)]
    pub hf_token: String,

    /// Warm-up pause before each smoke test
    #[arg(long, default_value_t = 5)]
    pub warmup_secs: u64,

    /// Per-endpoint smoke test timeout
    #[arg(long, default_value_t = 240)]
    pub test_timeout_secs: u64,

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

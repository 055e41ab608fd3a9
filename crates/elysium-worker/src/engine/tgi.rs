use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::process::Command;

use elysium_common::{SamplingDefaults, SamplingParams};

use super::{
    error_message, wait_child_ready, Engine, EngineHandle, EngineProcess, EngineRuntime,
    GenerateRequest,
};

/// text-generation-inference launcher settings.
#[derive(Debug, Clone, clap::Args)]
pub struct TgiConfig {
    #[arg(long, env = "MODEL_ID", default_value = "Qwen/Qwen3-32B-Instruct")]
    pub model_id: String,

    #[arg(long, env = "MAX_INPUT_LENGTH")]
    pub max_input_length: Option<u32>,

    #[arg(long, env = "MAX_TOTAL_TOKENS")]
    pub max_total_tokens: Option<u32>,

    #[arg(long, env = "QUANTIZE")]
    pub quantize: Option<String>,

    #[arg(long, env = "TGI_LAUNCHER_BIN", default_value = "text-generation-launcher")]
    pub launcher_bin: String,
}

impl TgiConfig {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            max_input_length: None,
            max_total_tokens: None,
            quantize: None,
            launcher_bin: "text-generation-launcher".into(),
        }
    }

    pub fn launcher_args(&self, port: u16) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--model-id".into(),
            self.model_id.clone(),
            "--hostname".into(),
            "127.0.0.1".into(),
            "--port".into(),
            port.to_string(),
        ];
        if let Some(v) = self.max_input_length {
            args.push("--max-input-length".into());
            args.push(v.to_string());
        }
        if let Some(v) = self.max_total_tokens {
            args.push("--max-total-tokens".into());
            args.push(v.to_string());
        }
        if let Some(q) = self
            .quantize
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty() && !q.eq_ignore_ascii_case("none"))
        {
            args.push("--quantize".into());
            args.push(q.to_lowercase());
        }
        args
    }
}

/// Body of `POST /generate`. TGI rejects `top_p >= 1.0` and
/// `temperature <= 0`, so those map to "unset" and greedy decoding.
fn generate_body(prompt: &str, sampling: &SamplingParams) -> Value {
    let mut params = Map::new();
    params.insert("max_new_tokens".into(), json!(sampling.max_tokens));
    if sampling.temperature > 0.0 {
        params.insert("temperature".into(), json!(sampling.temperature));
        params.insert("do_sample".into(), json!(true));
    } else {
        params.insert("do_sample".into(), json!(false));
    }
    if sampling.top_p > 0.0 && sampling.top_p < 1.0 {
        params.insert("top_p".into(), json!(sampling.top_p));
    }
    json!({"inputs": prompt, "parameters": params})
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    generated_text: String,
}

/// Serves jobs from a `text-generation-launcher` started before the worker
/// takes its first job.
pub struct TgiEngine {
    pub config: TgiConfig,
    runtime: EngineRuntime,
    http: reqwest::Client,
}

impl TgiEngine {
    pub fn new(config: TgiConfig, runtime: EngineRuntime) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(runtime.request_timeout())
            .build()?;
        Ok(Self {
            config,
            runtime,
            http,
        })
    }
}

#[async_trait]
impl Engine for TgiEngine {
    fn engine_type(&self) -> &str {
        "tgi"
    }

    fn sampling_defaults(&self) -> SamplingDefaults {
        SamplingDefaults {
            max_tokens: 512,
            ..SamplingDefaults::default()
        }
    }

    fn starts_eagerly(&self) -> bool {
        true
    }

    async fn start(&self) -> anyhow::Result<EngineHandle> {
        let base_url = self.runtime.base_url();
        tracing::info!(
            model=%self.config.model_id,
            port=self.runtime.engine_port,
            "starting text-generation-inference"
        );

        let mut child = Command::new(&self.config.launcher_bin)
            .args(self.config.launcher_args(self.runtime.engine_port))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        wait_child_ready(&mut child, "tgi", &base_url, self.runtime.ready_timeout()).await?;
        tracing::info!(pid=?child.id(), %base_url, "tgi ready");

        Ok(EngineHandle {
            base_url,
            engine_model: self.config.model_id.clone(),
            process: EngineProcess::Child(child),
        })
    }

    async fn generate(
        &self,
        handle: &EngineHandle,
        req: &GenerateRequest,
    ) -> anyhow::Result<String> {
        if req.image.is_some() {
            tracing::debug!("tgi ignores image input");
        }
        let url = format!("{}/generate", handle.base_url.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .json(&generate_body(&req.prompt, &req.sampling))
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            anyhow::bail!("tgi returned {status}: {}", error_message(&text));
        }
        let parsed: GenerateResponse = serde_json::from_str(&text)?;
        Ok(parsed.generated_text)
    }
}

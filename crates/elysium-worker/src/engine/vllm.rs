use std::process::Stdio;

use async_trait::async_trait;
use clap::builder::BoolishValueParser;
use clap::ArgAction;
use serde_json::{json, Value};
use tokio::process::Command;

use super::{
    error_message, wait_child_ready, Engine, EngineHandle, EngineProcess, EngineRuntime,
    GenerateRequest,
};

/// vLLM model settings, read from the worker's environment.
#[derive(Debug, Clone, clap::Args)]
pub struct VllmConfig {
    /// Model identifier passed to `vllm serve`.
    #[arg(long = "model-name", env = "MODEL_NAME", default_value = "Qwen/Qwen3-32B-AWQ")]
    pub model: String,

    #[arg(long, env = "MAX_MODEL_LEN", default_value_t = 8192)]
    pub max_model_len: u32,

    #[arg(long, env = "TENSOR_PARALLEL_SIZE", default_value_t = 1)]
    pub tensor_parallel_size: u32,

    #[arg(long, env = "GPU_MEMORY_UTILIZATION", default_value_t = 0.90)]
    pub gpu_memory_utilization: f32,

    /// Quantization method. Empty or "none" leaves it to vLLM.
    #[arg(long, env = "QUANTIZATION")]
    pub quantization: Option<String>,

    #[arg(
        long,
        env = "TRUST_REMOTE_CODE",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub trust_remote_code: bool,

    #[arg(long, env = "DTYPE")]
    pub dtype: Option<String>,

    #[arg(long, env = "VLLM_BIN", default_value = "vllm")]
    pub vllm_bin: String,
}

impl VllmConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_model_len: 8192,
            tensor_parallel_size: 1,
            gpu_memory_utilization: 0.90,
            quantization: None,
            trust_remote_code: true,
            dtype: None,
            vllm_bin: "vllm".into(),
        }
    }

    pub fn effective_quantization(&self) -> Option<String> {
        let q = self.quantization.as_deref()?.trim().to_lowercase();
        if q.is_empty() || q == "none" {
            None
        } else {
            Some(q)
        }
    }

    /// Arguments for `vllm serve`, without the binary itself.
    pub fn serve_args(&self, port: u16) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "serve".into(),
            self.model.clone(),
            "--host".into(),
            "127.0.0.1".into(),
            "--port".into(),
            port.to_string(),
            "--served-model-name".into(),
            self.model.clone(),
            "--max-model-len".into(),
            self.max_model_len.to_string(),
            "--tensor-parallel-size".into(),
            self.tensor_parallel_size.to_string(),
            "--gpu-memory-utilization".into(),
            self.gpu_memory_utilization.to_string(),
        ];
        if let Some(q) = self.effective_quantization() {
            args.push("--quantization".into());
            args.push(q);
        }
        if let Some(dtype) = self.dtype.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            args.push("--dtype".into());
            args.push(dtype.to_string());
        }
        if self.trust_remote_code {
            args.push("--trust-remote-code".into());
        }
        args
    }
}

/// Serves jobs from a `vllm serve` process owned by this worker. The process
/// is started on the first job.
pub struct VllmEngine {
    pub config: VllmConfig,
    runtime: EngineRuntime,
    http: reqwest::Client,
}

impl VllmEngine {
    pub fn new(config: VllmConfig, runtime: EngineRuntime) -> anyhow::Result<Self> {
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

/// Chat content parts for a vision request.
fn vision_messages(prompt: &str, image: &str) -> Value {
    let url = if image.starts_with("data:") {
        image.to_string()
    } else {
        format!("data:image/png;base64,{image}")
    };
    json!([{
        "role": "user",
        "content": [
            {"type": "text", "text": prompt},
            {"type": "image_url", "image_url": {"url": url}},
        ],
    }])
}

#[async_trait]
impl Engine for VllmEngine {
    fn engine_type(&self) -> &str {
        "vllm"
    }

    async fn start(&self) -> anyhow::Result<EngineHandle> {
        let base_url = self.runtime.base_url();
        let args = self.config.serve_args(self.runtime.engine_port);
        tracing::info!(
            model=%self.config.model,
            port=self.runtime.engine_port,
            quantization=?self.config.effective_quantization(),
            "starting vllm engine"
        );

        let mut child = Command::new(&self.config.vllm_bin)
            .args(&args)
            .env("HF_HUB_DISABLE_XET", "1")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        wait_child_ready(&mut child, "vllm", &base_url, self.runtime.ready_timeout()).await?;
        tracing::info!(pid=?child.id(), %base_url, "vllm engine ready");

        Ok(EngineHandle {
            base_url,
            engine_model: self.config.model.clone(),
            process: EngineProcess::Child(child),
        })
    }

    async fn generate(
        &self,
        handle: &EngineHandle,
        req: &GenerateRequest,
    ) -> anyhow::Result<String> {
        let base = handle.base_url.trim_end_matches('/');
        let (url, body) = match req.image.as_deref() {
            Some(image) => (
                format!("{base}/v1/chat/completions"),
                json!({
                    "model": handle.engine_model,
                    "messages": vision_messages(&req.prompt, image),
                    "max_tokens": req.sampling.max_tokens,
                    "temperature": req.sampling.temperature,
                    "top_p": req.sampling.top_p,
                }),
            ),
            None => (
                format!("{base}/v1/completions"),
                json!({
                    "model": handle.engine_model,
                    "prompt": req.prompt,
                    "max_tokens": req.sampling.max_tokens,
                    "temperature": req.sampling.temperature,
                    "top_p": req.sampling.top_p,
                }),
            ),
        };

        let resp = self.http.post(&url).json(&body).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            anyhow::bail!("vllm returned {status}: {}", error_message(&text));
        }

        let v: Value = serde_json::from_str(&text)?;
        let choice = v
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| anyhow::anyhow!("vllm response has no choices"))?;
        let output = choice
            .get("text")
            .or_else(|| choice.get("message").and_then(|m| m.get("content")))
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("vllm response has no generated text"))?;
        Ok(output.to_string())
    }
}

use async_trait::async_trait;

use super::{Engine, EngineHandle, EngineProcess, GenerateRequest};

/// Engine that needs no model server: returns the prompt it was given.
/// Used for local dry runs of the worker loop.
#[derive(Debug, Clone, Default)]
pub struct EchoEngine;

#[async_trait]
impl Engine for EchoEngine {
    fn engine_type(&self) -> &str {
        "echo"
    }

    async fn start(&self) -> anyhow::Result<EngineHandle> {
        Ok(EngineHandle {
            base_url: String::new(),
            engine_model: "echo".into(),
            process: EngineProcess::External,
        })
    }

    async fn generate(
        &self,
        _handle: &EngineHandle,
        req: &GenerateRequest,
    ) -> anyhow::Result<String> {
        Ok(format!("echo: {}", req.prompt))
    }
}

use serde::{Deserialize, Serialize};

/// One inference request as delivered by the platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Platform job id; absent for locally submitted jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub input: JobInput,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobInput {
    #[serde(default)]
    pub prompt: String,

    /// Base64-encoded image for vision-language models.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Takes precedence over `max_tokens` when both are present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_new_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,

    /// Fields this crate does not interpret, kept so payloads round-trip.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl JobInput {
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

/// Defaults a handler variant applies when a job leaves a control unset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingDefaults {
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
}

impl Default for SamplingDefaults {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            temperature: 0.5,
            top_p: 0.95,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
}

impl SamplingParams {
    pub fn from_input(input: &JobInput, defaults: &SamplingDefaults) -> Self {
        Self {
            max_tokens: input
                .max_new_tokens
                .or(input.max_tokens)
                .unwrap_or(defaults.max_tokens),
            temperature: input.temperature.unwrap_or(defaults.temperature),
            top_p: input.top_p.unwrap_or(defaults.top_p),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Uniform handler output: `{"output", "status": "success"}` or `{"error", "status": "error"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub status: ResponseStatus,
}

impl HandlerResponse {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: Some(output.into()),
            error: None,
            status: ResponseStatus::Success,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            output: None,
            error: Some(message.into()),
            status: ResponseStatus::Error,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(v: serde_json::Value) -> JobInput {
        serde_json::from_value::<Job>(v).unwrap().input
    }

    #[test]
    fn test_sampling_defaults_applied() {
        let params = SamplingParams::from_input(
            &input(json!({"input": {"prompt": "hi"}})),
            &SamplingDefaults::default(),
        );
        assert_eq!(params.max_tokens, 256);
        assert_eq!(params.temperature, 0.5);
        assert_eq!(params.top_p, 0.95);
    }

    #[test]
    fn test_max_tokens_used_when_max_new_tokens_absent() {
        let params = SamplingParams::from_input(
            &input(json!({"input": {"prompt": "hi", "max_tokens": 64}})),
            &SamplingDefaults::default(),
        );
        assert_eq!(params.max_tokens, 64);
    }

    #[test]
    fn test_max_new_tokens_wins() {
        let params = SamplingParams::from_input(
            &input(json!({"input": {"max_tokens": 64, "max_new_tokens": 16, "temperature": 0.1}})),
            &SamplingDefaults::default(),
        );
        assert_eq!(params.max_tokens, 16);
        assert_eq!(params.temperature, 0.1);
        assert_eq!(params.top_p, 0.95);
    }

    #[test]
    fn test_missing_input_is_empty_prompt() {
        let job: Job = serde_json::from_value(json!({})).unwrap();
        assert_eq!(job.input.prompt, "");
        assert!(job.input.image.is_none());
    }

    #[test]
    fn test_unknown_input_fields_kept() {
        let job: Job = serde_json::from_value(json!({
            "input": {"prompt": "p", "task_type": "dom_analysis", "seed": 7}
        }))
        .unwrap();
        assert_eq!(job.input.task_type.as_deref(), Some("dom_analysis"));
        assert_eq!(job.input.extra.get("seed"), Some(&json!(7)));
        let back = serde_json::to_value(&job).unwrap();
        assert_eq!(back["input"]["seed"], json!(7));
    }

    #[test]
    fn test_response_schema() {
        assert_eq!(
            serde_json::to_value(HandlerResponse::success("4")).unwrap(),
            json!({"output": "4", "status": "success"})
        );
        assert_eq!(
            serde_json::to_value(HandlerResponse::error("boom")).unwrap(),
            json!({"error": "boom", "status": "error"})
        );
    }
}

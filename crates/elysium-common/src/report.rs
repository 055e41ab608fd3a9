use serde::{Deserialize, Serialize};

/// Maximum characters of a smoke-test result kept in the report.
pub const RESULT_PREVIEW_CHARS: usize = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedEntry {
    pub key: String,
    pub endpoint_id: String,
    pub name: String,
    pub template_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingEntry {
    pub key: String,
    pub endpoint_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestEntry {
    pub key: String,
    pub endpoint_id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestEntry {
    pub fn passed(key: &str, endpoint_id: &str, result: &serde_json::Value) -> Self {
        Self {
            key: key.to_string(),
            endpoint_id: endpoint_id.to_string(),
            ok: true,
            result_preview: Some(preview(&result.to_string())),
            error: None,
        }
    }

    pub fn failed(key: &str, endpoint_id: &str, error: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            endpoint_id: endpoint_id.to_string(),
            ok: false,
            result_preview: None,
            error: Some(error.into()),
        }
    }
}

/// Outcome of one deployment run, accumulated spec by spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentReport {
    pub created: Vec<CreatedEntry>,
    pub existing: Vec<ExistingEntry>,
    pub tests: Vec<TestEntry>,
}

impl DeploymentReport {
    pub fn to_pretty_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn preview(s: &str) -> String {
    s.chars().take(RESULT_PREVIEW_CHARS).collect()
}

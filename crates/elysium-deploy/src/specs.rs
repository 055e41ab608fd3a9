use std::collections::BTreeMap;

use anyhow::Context;
use serde_json::json;

use elysium_common::{EndpointSpec, Job};

/// 1x1 transparent PNG used by the vision endpoints' smoke payloads.
const TINY_PNG_B64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mP8/x8AAukB9oN7LxkAAAAASUVORK5CYII=";

fn env(pairs: &[(&str, &str)], hf_token: &str) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    env.insert("HF_TOKEN".to_string(), hf_token.to_string());
    env
}

fn payload(v: serde_json::Value) -> anyhow::Result<Job> {
    serde_json::from_value(v).context("invalid smoke-test payload")
}

/// The five endpoints this repo provisions, in deployment order.
pub fn endpoint_specs(hf_token: &str) -> anyhow::Result<Vec<EndpointSpec>> {
    Ok(vec![
        EndpointSpec {
            key: "first".into(),
            repo: "Aminatorex/First-Endpoint".into(),
            image: "docker.io/aminatorex/first-endpoint:latest".into(),
            template_name: "elysium-first-endpoint-v1".into(),
            endpoint_name: "elysium-first-endpoint".into(),
            // A40 48GB
            gpu_id: "AMPERE_48".into(),
            workers_min: 0,
            workers_max: 2,
            idle_timeout_secs: 60,
            container_disk_gb: 30,
            env: env(
                &[
                    ("MODEL_NAME", "Qwen/Qwen3-14B-Instruct"),
                    ("MAX_MODEL_LEN", "8192"),
                    ("QUANTIZATION", "awq"),
                    ("TENSOR_PARALLEL_SIZE", "1"),
                    ("GPU_MEMORY_UTILIZATION", "0.95"),
                ],
                hf_token,
            ),
            test_payload: payload(json!({
                "input": {
                    "prompt": "Write a short friendly Instagram comment about a sunset photo.",
                    "max_tokens": 64,
                    "temperature": 0.7,
                }
            }))?,
        },
        EndpointSpec {
            key: "second".into(),
            repo: "Aminatorex/Second-Endpoint".into(),
            image: "docker.io/aminatorex/second-endpoint:latest".into(),
            template_name: "elysium-second-endpoint-v1".into(),
            endpoint_name: "elysium-second-endpoint".into(),
            gpu_id: "AMPERE_48".into(),
            workers_min: 0,
            workers_max: 2,
            idle_timeout_secs: 90,
            container_disk_gb: 30,
            env: env(
                &[
                    ("MODEL_NAME", "Qwen/Qwen3-VL-8B-Instruct"),
                    ("MAX_MODEL_LEN", "4096"),
                    ("TRUST_REMOTE_CODE", "True"),
                    ("GPU_MEMORY_UTILIZATION", "0.9"),
                ],
                hf_token,
            ),
            test_payload: payload(json!({
                "input": {
                    "prompt": "Describe what the image shows in one sentence.",
                    "image": TINY_PNG_B64,
                    "max_tokens": 32,
                }
            }))?,
        },
        EndpointSpec {
            key: "third".into(),
            repo: "Aminatorex/Third-Endpoint".into(),
            image: "docker.io/aminatorex/third-endpoint:latest".into(),
            template_name: "elysium-third-endpoint-v1".into(),
            endpoint_name: "elysium-third-endpoint".into(),
            gpu_id: "AMPERE_48".into(),
            workers_min: 0,
            workers_max: 1,
            idle_timeout_secs: 120,
            container_disk_gb: 30,
            env: env(
                &[
                    ("MODEL_ID", "Qwen/Qwen3-32B-Instruct"),
                    ("MAX_INPUT_LENGTH", "4096"),
                    ("MAX_TOTAL_TOKENS", "8192"),
                    ("QUANTIZE", "awq"),
                ],
                hf_token,
            ),
            test_payload: payload(json!({
                "input": {
                    "prompt": "Analyze briefly whether this posting pattern seems risky.",
                    "max_new_tokens": 64,
                    "temperature": 0.5,
                }
            }))?,
        },
        EndpointSpec {
            key: "fourth".into(),
            repo: "Aminatorex/Fourth-Endpoint".into(),
            image: "docker.io/aminatorex/fourth-endpoint:latest".into(),
            template_name: "elysium-fourth-endpoint-v1".into(),
            endpoint_name: "elysium-fourth-endpoint".into(),
            gpu_id: "AMPERE_48".into(),
            workers_min: 0,
            workers_max: 2,
            idle_timeout_secs: 60,
            container_disk_gb: 30,
            env: env(&[("MODEL_PATH", "modularai/Qwen3-4B-Instruct-GGUF")], hf_token),
            test_payload: payload(json!({
                "input": {
                    "prompt": "Write a very short fallback comment.",
                    "max_tokens": 32,
                    "temperature": 0.7,
                }
            }))?,
        },
        EndpointSpec {
            key: "fifth".into(),
            repo: "Aminatorex/Fifth-Endpoint".into(),
            image: "docker.io/aminatorex/fifth-endpoint:latest".into(),
            template_name: "elysium-fifth-endpoint-v1".into(),
            endpoint_name: "elysium-fifth-endpoint".into(),
            // A100 80GB
            gpu_id: "AMPERE_80".into(),
            workers_min: 0,
            workers_max: 1,
            idle_timeout_secs: 180,
            container_disk_gb: 50,
            env: env(
                &[
                    ("MODEL_NAME", "browser-use/bu-30b-a3b-preview"),
                    ("MAX_MODEL_LEN", "65536"),
                    ("GPU_MEMORY_UTILIZATION", "0.90"),
                    ("TRUST_REMOTE_CODE", "True"),
                    ("DTYPE", "float16"),
                ],
                hf_token,
            ),
            test_payload: payload(json!({
                "input": {
                    "prompt": "Find clickable controls on the page.",
                    "image": TINY_PNG_B64,
                    "task_type": "dom_analysis",
                    "max_tokens": 64,
                    "temperature": 0.6,
                }
            }))?,
        },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_five_distinct_endpoints() {
        let specs = endpoint_specs("hf_x").unwrap();
        assert_eq!(specs.len(), 5);
        let names: HashSet<_> = specs.iter().map(|s| s.endpoint_name.as_str()).collect();
        assert_eq!(names.len(), 5);
        let keys: Vec<_> = specs.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, ["first", "second", "third", "fourth", "fifth"]);
    }

    #[test]
    fn test_hf_token_injected_everywhere() {
        for spec in endpoint_specs("hf_secret").unwrap() {
            assert_eq!(spec.env.get("HF_TOKEN").map(String::as_str), Some("hf_secret"));
        }
    }

    #[test]
    fn test_payloads_parsed() {
        let specs = endpoint_specs("").unwrap();
        assert_eq!(specs[0].test_payload.input.max_tokens, Some(64));
        assert_eq!(specs[1].test_payload.input.image.as_deref(), Some(TINY_PNG_B64));
        assert_eq!(specs[2].test_payload.input.max_new_tokens, Some(64));
        assert_eq!(specs[4].test_payload.input.task_type.as_deref(), Some("dom_analysis"));
        assert_eq!(specs[4].container_disk_gb, 50);
        assert!(specs.iter().all(|s| !s.test_payload.input.prompt.is_empty()));
    }

    #[test]
    fn test_malformed_payload_rejected() {
        let err = payload(json!({"input": {"prompt": 5}})).unwrap_err();
        assert!(err.to_string().contains("invalid smoke-test payload"));
        assert!(payload(json!({"input": {"prompt": "ok", "max_tokens": -1}})).is_err());
    }
}

use std::process::Stdio;
use std::time::Instant;

use tokio::process::Command;

use elysium_common::process_env;

/// Prepend `$HOME/.local/bin` so a `pip install --user` CLI is found.
fn augmented_path() -> String {
    let current = process_env("PATH").unwrap_or_default();
    let home = process_env("HOME").unwrap_or_else(|| "/root".to_string());
    format!("{home}/.local/bin:{current}")
}

fn hf_token() -> Option<String> {
    process_env("HF_TOKEN")
        .or_else(|| process_env("HUGGING_FACE_HUB_TOKEN"))
        .filter(|t| !t.trim().is_empty())
}

/// Download `model` into the HF cache with `cli download`. A missing CLI is
/// skipped; a download that runs and fails is an error.
pub async fn prefetch_weights(cli: &str, model: &str) -> anyhow::Result<()> {
    let mut cmd = Command::new(cli);
    cmd.args(["download", model])
        .env("PATH", augmented_path())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    if let Some(token) = hf_token() {
        cmd.env("HF_TOKEN", token);
    }

    tracing::info!(%model, "prefetch start");
    let started = Instant::now();
    let output = match cmd.output().await {
        Ok(output) => output,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(%cli, "hf cli not available, skipping prefetch");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
        let tail: Vec<&str> = tail.into_iter().rev().collect();
        anyhow::bail!("{cli} download {model} failed ({}): {}", output.status, tail.join("\n"));
    }
    tracing::info!(%model, elapsed_s=started.elapsed().as_secs_f64(), "prefetch done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_cli_is_skipped() {
        prefetch_weights("definitely-not-a-real-hf-cli", "org/model")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failing_download_is_error() {
        let err = prefetch_weights("false", "org/model").await.unwrap_err();
        assert!(err.to_string().contains("org/model"));
    }

    #[tokio::test]
    async fn test_successful_download() {
        prefetch_weights("true", "org/model").await.unwrap();
    }
}

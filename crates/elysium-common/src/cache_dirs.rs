use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::process_env;

pub const VOLUME_PATH_ENV: &str = "RUNPOD_VOLUME_PATH";
pub const DEFAULT_VOLUME_PATH: &str = "/runpod-volume";

/// Shared-volume root: `RUNPOD_VOLUME_PATH`, else `/runpod-volume`.
pub fn volume_root(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    lookup(VOLUME_PATH_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_VOLUME_PATH))
}

/// Cache locations on the shared volume. Externally supplied variables
/// always win over the volume-derived defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheDirs {
    pub volume_root: PathBuf,
    pub hf_home: PathBuf,
    pub hub_cache: PathBuf,
    pub vllm_cache: PathBuf,
}

/// Summary written into smoke records. Empty when no volume is mounted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePaths {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub_cache: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vllm_cache: Option<String>,
}

impl CacheDirs {
    /// Returns `None` when `volume_root` is not a directory; local/default caches apply then.
    pub fn resolve(volume_root: &Path, lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        if !volume_root.is_dir() {
            return None;
        }

        let set = |key: &str| lookup(key).filter(|v| !v.is_empty()).map(PathBuf::from);

        let cache_root = volume_root.join("cache");
        let hf_home = set("HF_HOME").unwrap_or_else(|| cache_root.join("hf"));
        let hub_cache = set("HUGGINGFACE_HUB_CACHE").unwrap_or_else(|| hf_home.join("hub"));
        let vllm_cache = set("VLLM_CACHE_ROOT").unwrap_or_else(|| cache_root.join("vllm"));

        Some(Self {
            volume_root: volume_root.to_path_buf(),
            hf_home,
            hub_cache,
            vllm_cache,
        })
    }

    /// Every variable a model server reads for its caches, with the value
    /// this volume layout assigns to it.
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        let hub = self.hub_cache.to_string_lossy().to_string();
        vec![
            ("HF_HOME", self.hf_home.to_string_lossy().to_string()),
            ("HUGGINGFACE_HUB_CACHE", hub.clone()),
            ("TRANSFORMERS_CACHE", hub.clone()),
            ("HF_HUB_CACHE", hub),
            ("VLLM_CACHE_ROOT", self.vllm_cache.to_string_lossy().to_string()),
            ("HF_HUB_DISABLE_TELEMETRY", "1".to_string()),
        ]
    }

    /// The subset of [`CacheDirs::env_vars`] that is currently unset.
    pub fn env_defaults(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Vec<(&'static str, String)> {
        self.env_vars()
            .into_iter()
            .filter(|(key, _)| lookup(key).is_none())
            .collect()
    }

    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.hub_cache)?;
        std::fs::create_dir_all(&self.vllm_cache)?;
        Ok(())
    }

    pub fn paths(&self) -> CachePaths {
        CachePaths {
            volume_root: Some(self.volume_root.to_string_lossy().to_string()),
            hub_cache: Some(self.hub_cache.to_string_lossy().to_string()),
            vllm_cache: Some(self.vllm_cache.to_string_lossy().to_string()),
        }
    }
}

/// Point HF/vLLM caches at the mounted volume, if there is one.
///
/// Must run before any worker threads read the environment.
pub fn configure_cache_dirs() -> std::io::Result<Option<CacheDirs>> {
    let root = volume_root(process_env);
    let Some(dirs) = CacheDirs::resolve(&root, process_env) else {
        tracing::debug!(volume_root=%root.display(), "no shared volume mounted, using default caches");
        return Ok(None);
    };

    dirs.create_dirs()?;
    for (key, value) in dirs.env_defaults(process_env) {
        std::env::set_var(key, value);
    }

    tracing::info!(
        volume_root=%dirs.volume_root.display(),
        hub_cache=%dirs.hub_cache.display(),
        vllm_cache=%dirs.vllm_cache.display(),
        "cache directories configured"
    );
    Ok(Some(dirs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("elysium-cache-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn lookup_in<'a>(map: &'a HashMap<&'a str, String>) -> impl Fn(&str) -> Option<String> + 'a {
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_volume_root_default() {
        let env = HashMap::new();
        assert_eq!(volume_root(lookup_in(&env)), PathBuf::from("/runpod-volume"));

        let env = HashMap::from([(VOLUME_PATH_ENV, "/mnt/vol".to_string())]);
        assert_eq!(volume_root(lookup_in(&env)), PathBuf::from("/mnt/vol"));
    }

    #[test]
    fn test_resolve_without_volume() {
        let missing = std::env::temp_dir().join(format!("absent-{}", uuid::Uuid::new_v4()));
        assert!(CacheDirs::resolve(&missing, |_| None).is_none());
    }

    #[test]
    fn test_resolve_defaults_under_volume() {
        let root = scratch_dir();
        let dirs = CacheDirs::resolve(&root, |_| None).unwrap();
        assert_eq!(dirs.hf_home, root.join("cache/hf"));
        assert_eq!(dirs.hub_cache, root.join("cache/hf/hub"));
        assert_eq!(dirs.vllm_cache, root.join("cache/vllm"));

        dirs.create_dirs().unwrap();
        assert!(dirs.hub_cache.is_dir());
        assert!(dirs.vllm_cache.is_dir());
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_hub_cache_follows_preset_hf_home() {
        let root = scratch_dir();
        let env = HashMap::from([("HF_HOME", "/models/hf".to_string())]);
        let dirs = CacheDirs::resolve(&root, lookup_in(&env)).unwrap();
        assert_eq!(dirs.hf_home, PathBuf::from("/models/hf"));
        assert_eq!(dirs.hub_cache, PathBuf::from("/models/hf/hub"));
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_preset_hf_home_is_never_overridden() {
        let root = scratch_dir();
        let env = HashMap::from([("HF_HOME", "/already/set".to_string())]);
        let dirs = CacheDirs::resolve(&root, lookup_in(&env)).unwrap();

        let defaults = dirs.env_defaults(lookup_in(&env));
        assert!(defaults.iter().all(|(k, _)| *k != "HF_HOME"));
        let keys: Vec<&str> = defaults.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            keys,
            vec![
                "HUGGINGFACE_HUB_CACHE",
                "TRANSFORMERS_CACHE",
                "HF_HUB_CACHE",
                "VLLM_CACHE_ROOT",
                "HF_HUB_DISABLE_TELEMETRY",
            ]
        );
        std::fs::remove_dir_all(&root).unwrap();
    }

    // The only test in this crate that touches the process environment.
    #[test]
    fn test_configure_cache_dirs_keeps_preset_hf_home() {
        let root = scratch_dir();
        std::env::set_var(VOLUME_PATH_ENV, &root);
        let preset = root.join("preset-hf-home");
        std::env::set_var("HF_HOME", &preset);
        std::env::remove_var("HUGGINGFACE_HUB_CACHE");

        let dirs = configure_cache_dirs().unwrap().unwrap();

        assert_eq!(std::env::var("HF_HOME").unwrap(), preset.to_string_lossy());
        assert_eq!(dirs.hub_cache, preset.join("hub"));
        assert!(dirs.hub_cache.is_dir());
        assert_eq!(std::env::var("HF_HUB_DISABLE_TELEMETRY").ok().as_deref(), Some("1"));
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_paths_summary() {
        let root = scratch_dir();
        let dirs = CacheDirs::resolve(&root, |_| None).unwrap();
        let paths = dirs.paths();
        assert_eq!(paths.volume_root, Some(root.to_string_lossy().to_string()));
        assert!(paths.hub_cache.unwrap().ends_with("cache/hf/hub"));
        assert_eq!(serde_json::to_string(&CachePaths::default()).unwrap(), "{}");
        std::fs::remove_dir_all(&root).unwrap();
    }
}

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "deck-localizer.toml";
pub const CONFIG_ENV_VAR: &str = "DECK_LOCALIZER_CONFIG";

/// On-disk configuration. Every field is optional; unset values fall back to
/// the defaults in `pipeline::config`.
#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub provider: ProviderSection,
    #[serde(default)]
    pub translation: TranslationSection,
    #[serde(default)]
    pub batching: BatchingSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub polling: PollingSection,
    #[serde(default)]
    pub pacing: PacingSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub pricing: PricingSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ProviderSection {
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub assistant_id: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub beta_header: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct TranslationSection {
    #[serde(default)]
    pub source_language: Option<String>,
    #[serde(default)]
    pub target_language: Option<String>,
    /// Instruction template, relative to the config file.
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub supported_languages: Option<Vec<String>>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct BatchingSection {
    #[serde(default)]
    pub single_batch_threshold: Option<usize>,
    #[serde(default)]
    pub min_batch_size: Option<usize>,
    #[serde(default)]
    pub max_batch_size: Option<usize>,
    #[serde(default)]
    pub batch_ceiling: Option<usize>,
    #[serde(default)]
    pub token_budget: Option<usize>,
    #[serde(default)]
    pub safety_factor: Option<f64>,
    #[serde(default)]
    pub sample_size: Option<usize>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct RetrySection {
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub base_wait_secs: Option<f64>,
    #[serde(default)]
    pub max_wait_secs: Option<f64>,
    #[serde(default)]
    pub backoff: Option<f64>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PollingSection {
    #[serde(default)]
    pub interval_ms: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PacingSection {
    #[serde(default)]
    pub inter_batch_pause_secs: Option<f64>,
    #[serde(default)]
    pub long_run_pause_secs: Option<f64>,
    /// Batch count above which the longer pause applies.
    #[serde(default)]
    pub long_run_threshold: Option<usize>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct CacheSection {
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Cache directory, relative to the config file.
    #[serde(default)]
    pub dir: Option<String>,
}

/// Token rates in currency units per million tokens.
#[derive(Clone, Debug, Deserialize, Default)]
pub struct PricingSection {
    #[serde(default)]
    pub input_per_million: Option<f64>,
    #[serde(default)]
    pub cached_input_per_million: Option<f64>,
    #[serde(default)]
    pub output_per_million: Option<f64>,
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

/// Looks for `filename` above the current dir, then above `workdir`, then
/// above the executable.
pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, filename, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 10) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text)
        .with_context(|| format!("parse config toml: {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::{find_file_upwards, load_config};

    #[test]
    fn partial_files_parse_with_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("deck-localizer.toml");
        std::fs::write(
            &path,
            "[retry]\nmax_retries = 5\n\n[cache]\nenabled = false\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.retry.max_retries, Some(5));
        assert_eq!(cfg.retry.backoff, None);
        assert_eq!(cfg.cache.enabled, Some(false));
        assert!(cfg.provider.assistant_id.is_none());
    }

    #[test]
    fn unknown_types_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[polling]\ninterval_ms = \"fast\"\n").expect("write");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn upward_search_finds_parent_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("a/b/c");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::write(dir.path().join("marker.toml"), "").expect("write");
        let found = find_file_upwards(&nested, "marker.toml", 8).expect("found");
        assert_eq!(found, dir.path().join("marker.toml"));
        assert!(find_file_upwards(&nested, "marker.toml", 1).is_none());
    }
}

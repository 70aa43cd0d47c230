use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context};

use crate::config::{
    find_default_config, load_config, AppConfig, CONFIG_ENV_VAR, DEFAULT_CONFIG_FILE,
};
use crate::pipeline::batch::BatchPolicy;
use crate::pipeline::client::{PollPolicy, RetryPolicy};
use crate::pipeline::cost::PricingPolicy;
use crate::pipeline::prompts::{default_prompt_files, load_prompt, DEFAULT_PROMPTS_DIR};
use crate::pipeline::translator::PacingPolicy;
use crate::provider::openai::{OpenAiSettings, DEFAULT_API_BASE, DEFAULT_BETA_HEADER};
use crate::textutil::{is_valid_language_code, normalize_language_code};

pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const ASSISTANT_ID_ENV: &str = "OPENAI_ASSISTANT_ID";
pub const DEFAULT_SOURCE_LANGUAGE: &str = "es";
pub const DEFAULT_SUPPORTED_LANGUAGES: [&str; 6] = ["es", "en", "fr", "de", "it", "pt"];
pub const DEFAULT_CACHE_DIR: &str = "cache";

#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub api_base: String,
    pub assistant_id: Option<String>,
    pub api_key_env: String,
    pub beta_header: String,
    pub request_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            assistant_id: None,
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            beta_header: DEFAULT_BETA_HEADER.to_string(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

/// Values passed on the command line; each one wins over the file.
#[derive(Clone, Debug, Default)]
pub struct LocalizerOverrides {
    pub config_path: Option<PathBuf>,
    pub source_language: Option<String>,
    pub assistant_id: Option<String>,
    pub no_cache: bool,
    pub cache_dir: Option<PathBuf>,
}

/// Fully resolved settings for one localizer run.
#[derive(Clone, Debug)]
pub struct LocalizerConfig {
    pub config_path: Option<PathBuf>,
    pub source_language: String,
    pub default_target_language: Option<String>,
    pub supported_languages: Vec<String>,
    pub prompt_template: String,
    pub provider: ProviderConfig,
    pub batching: BatchPolicy,
    pub retry: RetryPolicy,
    pub polling: PollPolicy,
    pub pacing: PacingPolicy,
    pub pricing: PricingPolicy,
    pub cache: CacheConfig,
}

impl Default for LocalizerConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            source_language: DEFAULT_SOURCE_LANGUAGE.to_string(),
            default_target_language: None,
            supported_languages: DEFAULT_SUPPORTED_LANGUAGES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            prompt_template: crate::pipeline::prompts::DEFAULT_TRANSLATE_TEXT.to_string(),
            provider: ProviderConfig::default(),
            batching: BatchPolicy::default(),
            retry: RetryPolicy::default(),
            polling: PollPolicy::default(),
            pacing: PacingPolicy::default(),
            pricing: PricingPolicy::default(),
            cache: CacheConfig {
                enabled: false,
                dir: PathBuf::from(DEFAULT_CACHE_DIR),
            },
        }
    }
}

impl LocalizerConfig {
    /// Resolves the config file (explicit path, then `DECK_LOCALIZER_CONFIG`,
    /// then an upward search from the input's directory) and applies overrides.
    pub fn from_sources(input: &Path, overrides: LocalizerOverrides) -> anyhow::Result<Self> {
        let workdir = input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let workdir = workdir.canonicalize().unwrap_or(workdir);

        let cfg_file = overrides
            .config_path
            .clone()
            .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from))
            .or_else(|| find_default_config(&workdir, DEFAULT_CONFIG_FILE));

        let mut file_cfg = AppConfig::default();
        let mut config_path = None;
        if let Some(p) = cfg_file {
            if p.exists() {
                file_cfg = load_config(&p)?;
                config_path = Some(p);
            } else if overrides.config_path.is_some() {
                return Err(anyhow!("config file not found: {}", p.display()));
            }
        }
        let base_dir = config_path
            .as_ref()
            .and_then(|p| p.parent())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| workdir.clone());

        Self::from_app_config(&file_cfg, config_path, &base_dir, overrides)
    }

    pub fn from_app_config(
        file_cfg: &AppConfig,
        config_path: Option<PathBuf>,
        base_dir: &Path,
        overrides: LocalizerOverrides,
    ) -> anyhow::Result<Self> {
        let d = Self::default();

        let source_language = overrides
            .source_language
            .or_else(|| file_cfg.translation.source_language.clone())
            .map(|s| normalize_language_code(&s))
            .unwrap_or(d.source_language);
        if !is_valid_language_code(&source_language) {
            return Err(anyhow!("invalid source language code: {source_language}"));
        }
        let default_target_language = file_cfg
            .translation
            .target_language
            .as_deref()
            .map(normalize_language_code);
        let supported_languages = file_cfg
            .translation
            .supported_languages
            .as_ref()
            .map(|v| v.iter().map(|s| normalize_language_code(s)).collect())
            .unwrap_or(d.supported_languages);

        let prompt_template = load_prompt(base_dir, file_cfg.translation.prompt.as_deref())
            .context("load translation prompt")?;

        let p = &file_cfg.provider;
        let provider = ProviderConfig {
            api_base: p.api_base.clone().unwrap_or(d.provider.api_base),
            assistant_id: overrides
                .assistant_id
                .or_else(|| p.assistant_id.clone())
                .or_else(|| std::env::var(ASSISTANT_ID_ENV).ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            api_key_env: p.api_key_env.clone().unwrap_or(d.provider.api_key_env),
            beta_header: p.beta_header.clone().unwrap_or(d.provider.beta_header),
            request_timeout: p
                .request_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(d.provider.request_timeout),
        };

        let b = &file_cfg.batching;
        let db = d.batching;
        let batching = BatchPolicy {
            single_batch_threshold: b.single_batch_threshold.unwrap_or(db.single_batch_threshold),
            min_batch_size: b.min_batch_size.unwrap_or(db.min_batch_size).max(1),
            max_batch_size: b.max_batch_size.unwrap_or(db.max_batch_size).max(1),
            batch_ceiling: b.batch_ceiling.unwrap_or(db.batch_ceiling).max(1),
            token_budget: b.token_budget.unwrap_or(db.token_budget).max(1),
            safety_factor: b.safety_factor.unwrap_or(db.safety_factor),
            sample_size: b.sample_size.unwrap_or(db.sample_size).max(1),
        };
        if batching.min_batch_size > batching.max_batch_size {
            return Err(anyhow!(
                "batching.min_batch_size ({}) exceeds max_batch_size ({})",
                batching.min_batch_size,
                batching.max_batch_size
            ));
        }
        if !(batching.safety_factor > 0.0) {
            return Err(anyhow!("batching.safety_factor must be positive"));
        }

        let r = &file_cfg.retry;
        let dr = d.retry;
        let retry = RetryPolicy {
            max_retries: r.max_retries.unwrap_or(dr.max_retries),
            base_wait: secs_or(r.base_wait_secs, dr.base_wait),
            max_wait: secs_or(r.max_wait_secs, dr.max_wait),
            backoff: r.backoff.unwrap_or(dr.backoff).max(1.0),
        };

        let dp = d.polling;
        let polling = PollPolicy {
            interval: file_cfg
                .polling
                .interval_ms
                .map(Duration::from_millis)
                .unwrap_or(dp.interval),
            timeout: file_cfg
                .polling
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(dp.timeout),
        };

        let pc = &file_cfg.pacing;
        let dpc = d.pacing;
        let pacing = PacingPolicy {
            pause: secs_or(pc.inter_batch_pause_secs, dpc.pause),
            long_pause: secs_or(pc.long_run_pause_secs, dpc.long_pause),
            long_run_threshold: pc.long_run_threshold.unwrap_or(dpc.long_run_threshold),
        };

        let pr = &file_cfg.pricing;
        let dpr = d.pricing;
        let pricing = PricingPolicy {
            input_per_million: rate_or(pr.input_per_million, dpr.input_per_million),
            cached_input_per_million: rate_or(
                pr.cached_input_per_million,
                dpr.cached_input_per_million,
            ),
            output_per_million: rate_or(pr.output_per_million, dpr.output_per_million),
        };

        let cache_dir = overrides.cache_dir.unwrap_or_else(|| {
            let dir = file_cfg
                .cache
                .dir
                .clone()
                .unwrap_or_else(|| DEFAULT_CACHE_DIR.to_string());
            let dir = PathBuf::from(dir);
            if dir.is_relative() {
                base_dir.join(dir)
            } else {
                dir
            }
        });
        let cache = CacheConfig {
            enabled: !overrides.no_cache && file_cfg.cache.enabled.unwrap_or(true),
            dir: cache_dir,
        };

        Ok(Self {
            config_path,
            source_language,
            default_target_language,
            supported_languages,
            prompt_template,
            provider,
            batching,
            retry,
            polling,
            pacing,
            pricing,
            cache,
        })
    }

    /// Normalizes and checks a requested target language.
    pub fn validate_target_language(&self, target: &str) -> anyhow::Result<String> {
        let target = normalize_language_code(target);
        if !is_valid_language_code(&target) {
            return Err(anyhow!("invalid target language code: {target}"));
        }
        if !self.supported_languages.is_empty() && !self.supported_languages.contains(&target) {
            return Err(anyhow!(
                "unsupported target language: {target} (supported: {})",
                self.supported_languages.join(", ")
            ));
        }
        if target == self.source_language {
            return Err(anyhow!(
                "target language equals source language: {target}"
            ));
        }
        Ok(target)
    }

    /// Credentials for the HTTP provider, read from the environment.
    pub fn openai_settings(&self) -> anyhow::Result<OpenAiSettings> {
        let api_key = std::env::var(&self.provider.api_key_env)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "API key not found: set the {} environment variable",
                    self.provider.api_key_env
                )
            })?;
        let assistant_id = self.provider.assistant_id.clone().ok_or_else(|| {
            anyhow!(
                "assistant id not configured: set [provider].assistant_id, --assistant-id or {ASSISTANT_ID_ENV}"
            )
        })?;
        Ok(OpenAiSettings {
            api_base: self.provider.api_base.clone(),
            api_key,
            assistant_id,
            beta_header: self.provider.beta_header.clone(),
            request_timeout: self.provider.request_timeout,
        })
    }
}

fn secs_or(v: Option<f64>, default: Duration) -> Duration {
    v.filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(default)
}

fn rate_or(v: Option<f64>, default: f64) -> f64 {
    v.filter(|r| r.is_finite() && *r >= 0.0).unwrap_or(default)
}

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(DEFAULT_CONFIG_FILE);

    let prompts_dir = dir.join(DEFAULT_PROMPTS_DIR);
    std::fs::create_dir_all(&prompts_dir)
        .with_context(|| format!("create prompts dir: {}", prompts_dir.display()))?;
    for (fname, body) in default_prompt_files() {
        let p = prompts_dir.join(fname);
        if p.exists() && !force {
            continue;
        }
        std::fs::write(&p, body).with_context(|| format!("write prompt: {}", p.display()))?;
    }

    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

const DEFAULT_CONFIG_TOML: &str = r#"[provider]
api_base = "https://api.openai.com/v1"
# assistant_id = "asst_..."   # or OPENAI_ASSISTANT_ID
api_key_env = "OPENAI_API_KEY"
beta_header = "assistants=v2"
request_timeout_secs = 60

[translation]
source_language = "es"
# target_language = "en"
prompt = "prompts/translate.txt"
supported_languages = ["es", "en", "fr", "de", "it", "pt"]

[batching]
# Inputs up to this many sentences go out as one batch.
single_batch_threshold = 20
min_batch_size = 20
max_batch_size = 50
batch_ceiling = 30
token_budget = 2500
safety_factor = 0.7
sample_size = 20

[retry]
max_retries = 3
base_wait_secs = 2.0
max_wait_secs = 30.0
backoff = 2.0

[polling]
interval_ms = 1000
timeout_secs = 180

[pacing]
inter_batch_pause_secs = 2.0
long_run_pause_secs = 3.0
long_run_threshold = 5

[cache]
enabled = true
dir = "cache"

[pricing]
# Per million tokens; used for the cost estimate in the job summary.
input_per_million = 3.75
cached_input_per_million = 1.875
output_per_million = 15.0
"#;

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::{init_default_config, LocalizerConfig, LocalizerOverrides};
    use crate::config::{load_config, AppConfig};

    #[test]
    fn generated_config_round_trips_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = init_default_config(dir.path(), false).expect("init");
        assert!(dir.path().join("prompts/translate.txt").exists());

        let file_cfg = load_config(&path).expect("load");
        let cfg = LocalizerConfig::from_app_config(
            &file_cfg,
            Some(path.clone()),
            dir.path(),
            LocalizerOverrides::default(),
        )
        .expect("resolve");
        let d = LocalizerConfig::default();
        assert_eq!(cfg.batching, d.batching);
        assert_eq!(cfg.retry, d.retry);
        assert_eq!(cfg.polling, d.polling);
        assert_eq!(cfg.pacing, d.pacing);
        assert_eq!(cfg.pricing, d.pricing);
        assert_eq!(cfg.prompt_template, d.prompt_template);
        assert!(cfg.cache.enabled);
        assert_eq!(cfg.cache.dir, dir.path().join("cache"));
    }

    #[test]
    fn overrides_win_over_file_values() {
        let file_cfg: AppConfig =
            toml::from_str("[translation]\nsource_language = \"fr\"\n[retry]\nmax_wait_secs = 10.0\n")
                .expect("toml");
        let cfg = LocalizerConfig::from_app_config(
            &file_cfg,
            None,
            std::path::Path::new("."),
            LocalizerOverrides {
                source_language: Some("ES".to_string()),
                no_cache: true,
                cache_dir: Some(PathBuf::from("/tmp/c")),
                ..Default::default()
            },
        )
        .expect("resolve");
        assert_eq!(cfg.source_language, "es");
        assert_eq!(cfg.retry.max_wait, Duration::from_secs(10));
        assert!(!cfg.cache.enabled);
        assert_eq!(cfg.cache.dir, PathBuf::from("/tmp/c"));
    }

    #[test]
    fn target_language_checks() {
        let cfg = LocalizerConfig::default();
        assert_eq!(cfg.validate_target_language(" EN ").expect("en"), "en");
        assert!(cfg.validate_target_language("es").is_err());
        assert!(cfg.validate_target_language("ja").is_err());
        assert!(cfg.validate_target_language("??").is_err());
    }

    #[test]
    fn pricing_rates_come_from_the_file() {
        let file_cfg: AppConfig = toml::from_str(
            "[pricing]\ninput_per_million = 1.5\noutput_per_million = -2.0\n",
        )
        .expect("toml");
        let cfg = LocalizerConfig::from_app_config(
            &file_cfg,
            None,
            std::path::Path::new("."),
            LocalizerOverrides::default(),
        )
        .expect("resolve");
        assert_eq!(cfg.pricing.input_per_million, 1.5);
        assert_eq!(cfg.pricing.cached_input_per_million, 1.875);
        assert_eq!(cfg.pricing.output_per_million, 15.0);
    }

    #[test]
    fn inverted_batch_bounds_are_rejected() {
        let file_cfg: AppConfig =
            toml::from_str("[batching]\nmin_batch_size = 60\nmax_batch_size = 10\n").expect("toml");
        let err = LocalizerConfig::from_app_config(
            &file_cfg,
            None,
            std::path::Path::new("."),
            LocalizerOverrides::default(),
        );
        assert!(err.is_err());
    }
}

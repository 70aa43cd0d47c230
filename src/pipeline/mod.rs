pub mod batch;
pub mod cache;
pub mod client;
pub mod cost;
mod config;
mod engine;
pub mod prompts;
pub mod translator;

pub use config::{init_default_config, CacheConfig, LocalizerConfig, LocalizerOverrides, ProviderConfig};
pub use engine::{extract_document, roundtrip_document, DeckLocalizer, JobStats, LocalizeOutcome};

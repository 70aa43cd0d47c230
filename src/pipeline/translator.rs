use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info};

use crate::pipeline::batch::{plan_batches, BatchPolicy};
use crate::pipeline::cache::{CacheStats, TranslationCache};
use crate::pipeline::client::TranslationClient;
use crate::progress::ConsoleProgress;
use crate::provider::parse::ParseQuality;
use crate::textutil::{estimate_tokens, same_text};

/// Courtesy delay between consecutive batch submissions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PacingPolicy {
    pub pause: Duration,
    pub long_pause: Duration,
    /// Above this many batches the longer pause is used.
    pub long_run_threshold: usize,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            pause: Duration::from_secs(2),
            long_pause: Duration::from_secs(3),
            long_run_threshold: 5,
        }
    }
}

impl PacingPolicy {
    pub fn pause_for(&self, batch_count: usize) -> Duration {
        if batch_count > self.long_run_threshold {
            self.long_pause
        } else {
            self.pause
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct TranslatorStats {
    pub texts_requested: usize,
    pub texts_translated: usize,
    /// Replies that were empty or equal to the source.
    pub texts_untranslated: usize,
    pub cache_hits: usize,
    pub duplicates_avoided: usize,
    pub api_calls: usize,
    pub batches_planned: usize,
    pub failed_batches: usize,
    pub failed_texts: usize,
    pub rate_limit_retries: usize,
    pub successful_retries: usize,
    pub line_fallback_batches: usize,
    pub adjusted_batches: usize,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub cached_tokens: usize,
}

/// Resolves sentences to translations: cache first, then planned batches
/// through the client. A failed batch only loses its own sentences.
pub struct Translator {
    client: TranslationClient,
    cache: Option<TranslationCache>,
    instructions: String,
    batching: BatchPolicy,
    pacing: PacingPolicy,
    stats: TranslatorStats,
}

impl Translator {
    pub fn new(
        client: TranslationClient,
        cache: Option<TranslationCache>,
        instructions: String,
        batching: BatchPolicy,
        pacing: PacingPolicy,
    ) -> Self {
        Self {
            client,
            cache,
            instructions,
            batching,
            pacing,
            stats: TranslatorStats::default(),
        }
    }

    pub fn stats(&self) -> &TranslatorStats {
        &self.stats
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|c| c.stats())
    }

    pub fn save_cache(&mut self) -> anyhow::Result<()> {
        match self.cache.as_mut() {
            Some(c) => c.save(),
            None => Ok(()),
        }
    }

    /// Returns a map holding every sentence that received a usable
    /// translation. Blank inputs, failed batches and replies equal to the
    /// source are absent from the map.
    pub async fn translate(
        &mut self,
        texts: &[String],
        progress: &ConsoleProgress,
    ) -> HashMap<String, String> {
        let mut result: HashMap<String, String> = HashMap::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut pending: Vec<String> = Vec::new();

        for text in texts {
            if text.trim().is_empty() {
                continue;
            }
            if !seen.insert(text.as_str()) {
                self.stats.duplicates_avoided += 1;
                continue;
            }
            self.stats.texts_requested += 1;
            let cached = self.cache.as_mut().and_then(|c| c.get(text));
            match cached {
                Some(t) => {
                    self.stats.cache_hits += 1;
                    self.stats.cached_tokens += estimate_tokens(text);
                    result.insert(text.clone(), t);
                }
                None => pending.push(text.clone()),
            }
        }
        if self.stats.cache_hits > 0 {
            info!(cached = self.stats.cache_hits, "texts resolved from cache");
        }
        if pending.is_empty() {
            return result;
        }

        let plan = plan_batches(&pending, &self.batching);
        let total = plan.len();
        self.stats.batches_planned += total;
        info!(
            texts = pending.len(),
            batches = total,
            batch_size = plan.batch_size,
            "translating"
        );

        let mut done = 0usize;
        for (i, batch) in plan.batches.iter().enumerate() {
            match self.client.translate_batch(batch, &self.instructions).await {
                Ok(bt) => {
                    self.stats.api_calls += 1;
                    self.stats.rate_limit_retries += bt.rate_limit_retries as usize;
                    if bt.attempts > 1 {
                        self.stats.successful_retries += 1;
                    }
                    self.stats.input_tokens += bt.input_tokens;
                    self.stats.output_tokens += bt.output_tokens;
                    match bt.quality {
                        ParseQuality::Structured => {}
                        ParseQuality::LineFallback => self.stats.line_fallback_batches += 1,
                        ParseQuality::Adjusted { .. } => self.stats.adjusted_batches += 1,
                    }
                    for (src, tr) in bt.pairs() {
                        if tr.trim().is_empty() || same_text(tr, src) {
                            self.stats.texts_untranslated += 1;
                            continue;
                        }
                        if let Some(c) = self.cache.as_mut() {
                            c.insert(src, tr);
                        }
                        result.insert(src.to_string(), tr.to_string());
                        self.stats.texts_translated += 1;
                    }
                }
                Err(e) => {
                    self.stats.failed_batches += 1;
                    self.stats.failed_texts += batch.len();
                    self.stats.rate_limit_retries += e.rate_limit_retries as usize;
                    error!(batch = i + 1, of = total, error = %e, "batch failed, its texts stay untranslated");
                }
            }
            done += batch.len();
            progress.progress("Translated", done, pending.len());

            if i + 1 < total {
                tokio::time::sleep(self.pacing.pause_for(total)).await;
            }
        }
        result
    }
}

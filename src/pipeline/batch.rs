use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use crate::textutil::estimate_tokens;

/// Sizing rules for splitting cache misses into provider requests.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BatchPolicy {
    /// Inputs of at most this many sentences go out as a single batch.
    pub single_batch_threshold: usize,
    pub min_batch_size: usize,
    pub max_batch_size: usize,
    /// Hard cap applied after clamping; bounds the reply size.
    pub batch_ceiling: usize,
    pub token_budget: usize,
    pub safety_factor: f64,
    pub sample_size: usize,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            single_batch_threshold: 20,
            min_batch_size: 20,
            max_batch_size: 50,
            batch_ceiling: 30,
            token_budget: 2500,
            safety_factor: 0.7,
            sample_size: 20,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BatchPlan {
    pub batch_size: usize,
    pub batches: Vec<Vec<String>>,
}

impl BatchPlan {
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

pub fn plan_batches(texts: &[String], policy: &BatchPolicy) -> BatchPlan {
    plan_batches_with_rng(texts, policy, &mut rand::thread_rng())
}

/// Partitions `texts` into consecutive chunks. The chunk size comes from the
/// average token estimate of a random sample, scaled into the budget.
pub fn plan_batches_with_rng<R: Rng + ?Sized>(
    texts: &[String],
    policy: &BatchPolicy,
    rng: &mut R,
) -> BatchPlan {
    if texts.is_empty() {
        return BatchPlan {
            batch_size: 0,
            batches: Vec::new(),
        };
    }
    if texts.len() <= policy.single_batch_threshold {
        return BatchPlan {
            batch_size: texts.len(),
            batches: vec![texts.to_vec()],
        };
    }

    let batch_size = batch_size_for(texts, policy, rng);
    let batches: Vec<Vec<String>> = texts.chunks(batch_size).map(|c| c.to_vec()).collect();
    debug!(
        texts = texts.len(),
        batch_size,
        batches = batches.len(),
        "batches planned"
    );
    BatchPlan {
        batch_size,
        batches,
    }
}

fn batch_size_for<R: Rng + ?Sized>(texts: &[String], policy: &BatchPolicy, rng: &mut R) -> usize {
    let sample_size = policy.sample_size.clamp(1, texts.len());
    let sample: Vec<&String> = texts.choose_multiple(rng, sample_size).collect();
    let total: usize = sample.iter().map(|t| estimate_tokens(t)).sum();
    let avg_tokens = (total as f64 / sample.len() as f64).max(1.0);

    let raw = (policy.token_budget as f64 / avg_tokens * policy.safety_factor) as usize;
    let lo = policy.min_batch_size.min(policy.max_batch_size);
    raw.clamp(lo, policy.max_batch_size)
        .min(policy.batch_ceiling)
        .max(1)
}

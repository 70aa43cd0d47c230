use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::pipeline::prompts::build_user_payload;
use crate::provider::parse::{parse_numbered_response, restore_source_quotes, ParseQuality};
use crate::provider::{AssistantBackend, ProviderError, RunState, RunStatus};
use crate::textutil::estimate_tokens;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Rate-limit retries after the first attempt.
    pub max_retries: u32,
    pub base_wait: Duration,
    pub max_wait: Duration,
    pub backoff: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_wait: Duration::from_secs(2),
            max_wait: Duration::from_secs(30),
            backoff: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn next_wait(&self, current: Duration) -> Duration {
        current.mul_f64(self.backoff).min(self.max_wait)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(180),
        }
    }
}

/// Terminal failure of one batch after the retry policy gave up.
#[derive(Debug, Error)]
#[error("batch of {size} texts failed after {attempts} attempt(s): {source}")]
pub struct BatchError {
    pub size: usize,
    pub attempts: u32,
    pub rate_limit_retries: u32,
    #[source]
    pub source: ProviderError,
}

/// Result of one batch. `translations[i]` answers `sources[i]`; an empty
/// string means the reply had nothing for that slot.
#[derive(Clone, Debug)]
pub struct BatchTranslation {
    pub sources: Vec<String>,
    pub translations: Vec<String>,
    pub quality: ParseQuality,
    pub attempts: u32,
    pub rate_limit_retries: u32,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl BatchTranslation {
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.sources
            .iter()
            .map(String::as_str)
            .zip(self.translations.iter().map(String::as_str))
    }
}

/// Runs batches against the provider: one thread and run per attempt,
/// polled until terminal, with rate-limit backoff around the whole exchange.
pub struct TranslationClient {
    backend: Arc<dyn AssistantBackend>,
    retry: RetryPolicy,
    poll: PollPolicy,
}

impl TranslationClient {
    pub fn new(backend: Arc<dyn AssistantBackend>, retry: RetryPolicy, poll: PollPolicy) -> Self {
        Self {
            backend,
            retry,
            poll,
        }
    }

    pub async fn translate_batch(
        &self,
        texts: &[String],
        instructions: &str,
    ) -> Result<BatchTranslation, BatchError> {
        let message = format!("{}\n\n{}", instructions.trim_end(), build_user_payload(texts));

        let mut attempts: u32 = 0;
        let mut rate_limit_retries: u32 = 0;
        let mut other_retry_used = false;
        let mut wait = self.retry.base_wait;
        loop {
            attempts += 1;
            let err = match self.exchange(&message).await {
                Ok(reply) => {
                    if attempts > 1 {
                        info!(attempts, "batch succeeded after retry");
                    }
                    let parsed = parse_numbered_response(&reply, texts.len());
                    match &parsed.quality {
                        ParseQuality::Structured => {}
                        ParseQuality::LineFallback => {
                            info!(texts = texts.len(), "numbered markers incomplete, used line split")
                        }
                        ParseQuality::Adjusted { expected, parsed } => {
                            warn!(expected, parsed, "translation count mismatch, missing slots left empty")
                        }
                    }
                    let translations = parsed
                        .translations
                        .into_iter()
                        .zip(texts)
                        .map(|(tr, src)| restore_source_quotes(src, tr))
                        .collect();
                    return Ok(BatchTranslation {
                        sources: texts.to_vec(),
                        translations,
                        quality: parsed.quality,
                        attempts,
                        rate_limit_retries,
                        input_tokens: estimate_tokens(&message),
                        output_tokens: estimate_tokens(&reply),
                    });
                }
                Err(e) => e,
            };

            if err.is_rate_limit() && rate_limit_retries < self.retry.max_retries {
                rate_limit_retries += 1;
                wait = self.retry.next_wait(wait);
                warn!(
                    retry = rate_limit_retries,
                    max = self.retry.max_retries,
                    wait_secs = wait.as_secs_f64(),
                    "rate limited, backing off"
                );
                sleep(wait).await;
                continue;
            }
            let retry_once =
                !err.is_rate_limit() && !err.is_timeout() && !err.is_fatal() && !other_retry_used;
            if retry_once {
                other_retry_used = true;
                warn!(error = %err, wait_secs = self.retry.base_wait.as_secs_f64(), "batch attempt failed, retrying once");
                sleep(self.retry.base_wait).await;
                continue;
            }
            return Err(BatchError {
                size: texts.len(),
                attempts,
                rate_limit_retries,
                source: err,
            });
        }
    }

    /// One full attempt: new thread, request message, run, poll, reply.
    async fn exchange(&self, message: &str) -> Result<String, ProviderError> {
        let thread = self.backend.create_thread().await?;
        self.backend.post_message(&thread, message).await?;
        let run = self.backend.start_run(&thread).await?;
        debug!(thread = %thread, run = %run.id, "run submitted");

        let run = self.wait_for_run(&thread, run).await?;
        if run.status != RunStatus::Completed {
            return Err(ProviderError::RunFailed {
                status: run.status.as_str().to_string(),
                detail: run.last_error.unwrap_or_else(|| "no detail".to_string()),
            });
        }

        let reply = self.backend.assistant_reply(&thread).await?;
        if reply.trim().is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        debug!(chars = reply.len(), "reply received");
        Ok(reply)
    }

    async fn wait_for_run(&self, thread: &str, mut run: RunState) -> Result<RunState, ProviderError> {
        let deadline = Instant::now() + self.poll.timeout;
        while run.status.is_pending() {
            if Instant::now() >= deadline {
                return Err(ProviderError::Timeout {
                    secs: self.poll.timeout.as_secs(),
                });
            }
            sleep(self.poll.interval).await;
            run = self.backend.retrieve_run(thread, &run.id).await?;
            debug!(run = %run.id, status = run.status.as_str(), "run polled");
        }
        Ok(run)
    }
}

//! Boundary to the remote translation provider: a stateful "thread + run"
//! protocol where a job is submitted, polled until terminal and its reply
//! read back as plain text.

pub mod openai;
pub mod parse;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Provider-side execution state of one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    /// Still moving towards a terminal state.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Queued | Self::InProgress | Self::Cancelling)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::RequiresAction => "requires_action",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Completed => "completed",
            Self::Incomplete => "incomplete",
            Self::Expired => "expired",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Clone, Debug)]
pub struct RunState {
    pub id: String,
    pub status: RunStatus,
    pub last_error: Option<String>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("run ended with status {status}: {detail}")]
    RunFailed { status: String, detail: String },

    #[error("run did not finish within {secs}s")]
    Timeout { secs: u64 },

    #[error("provider reply contained no text")]
    EmptyResponse,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected provider payload: {0}")]
    Decode(String),

    #[error("provider configuration: {0}")]
    Config(String),
}

impl ProviderError {
    /// Whether the failure signals throttling. Besides the dedicated variant
    /// and HTTP 429, run failures and transport errors are classified by
    /// their message, since providers report quota exhaustion in free text.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            Self::RateLimited(_) => true,
            Self::Http { status: 429, .. } => true,
            Self::Config(_) | Self::Timeout { .. } | Self::EmptyResponse => false,
            other => mentions_rate_limit(&other.to_string()),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Configuration problems fail the same way on every attempt.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

pub fn mentions_rate_limit(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    ["rate limit", "rate_limit", "too_many_requests", "too many requests"]
        .iter()
        .any(|needle| m.contains(needle))
}

/// One provider conversation per batch: create a thread, post the request
/// message, start a run, poll it and read the assistant's reply.
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    async fn create_thread(&self) -> Result<String, ProviderError>;

    async fn post_message(&self, thread_id: &str, content: &str) -> Result<(), ProviderError>;

    async fn start_run(&self, thread_id: &str) -> Result<RunState, ProviderError>;

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<RunState, ProviderError>;

    /// Concatenated text of every assistant message in the thread.
    async fn assistant_reply(&self, thread_id: &str) -> Result<String, ProviderError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{AssistantBackend, ProviderError, RunState, RunStatus};

    type ReplyFn = Box<dyn Fn(&str) -> String + Send + Sync>;

    /// Scripted in-memory provider. Each `create_thread` call counts as one
    /// attempt; queued failures are returned first.
    pub struct MockBackend {
        pub attempts: AtomicUsize,
        pub polls: AtomicUsize,
        failures: Mutex<VecDeque<ProviderError>>,
        always_rate_limited: bool,
        pending_polls: usize,
        final_status: RunStatus,
        last_error: Option<String>,
        reply: ReplyFn,
        messages: Mutex<Vec<String>>,
    }

    impl MockBackend {
        pub fn new(reply: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
            Self {
                attempts: AtomicUsize::new(0),
                polls: AtomicUsize::new(0),
                failures: Mutex::new(VecDeque::new()),
                always_rate_limited: false,
                pending_polls: 0,
                final_status: RunStatus::Completed,
                last_error: None,
                reply: Box::new(reply),
                messages: Mutex::new(Vec::new()),
            }
        }

        /// Replies `[i] <prefix><source>` for every numbered source line.
        pub fn echo(prefix: &'static str) -> Self {
            Self::new(move |msg| echo_reply(msg, prefix))
        }

        pub fn always_rate_limited(mut self) -> Self {
            self.always_rate_limited = true;
            self
        }

        pub fn with_failures(self, failures: Vec<ProviderError>) -> Self {
            *self.failures.lock().expect("lock") = failures.into();
            self
        }

        pub fn with_pending_polls(mut self, n: usize) -> Self {
            self.pending_polls = n;
            self
        }

        pub fn with_final_status(mut self, status: RunStatus, last_error: Option<&str>) -> Self {
            self.final_status = status;
            self.last_error = last_error.map(str::to_string);
            self
        }

        pub fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }

        pub fn messages(&self) -> Vec<String> {
            self.messages.lock().expect("lock").clone()
        }
    }

    pub fn echo_reply(message: &str, prefix: &str) -> String {
        let mut out = Vec::new();
        for line in message.lines() {
            let line = line.trim();
            if !line.starts_with('[') {
                continue;
            }
            if let Some(end) = line.find(']') {
                let num = &line[1..end];
                if num.parse::<usize>().is_ok() {
                    out.push(format!("[{num}] {prefix}{}", line[end + 1..].trim()));
                }
            }
        }
        out.join("\n")
    }

    #[async_trait]
    impl AssistantBackend for MockBackend {
        async fn create_thread(&self) -> Result<String, ProviderError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if self.always_rate_limited {
                return Err(ProviderError::RateLimited("Rate limit reached".to_string()));
            }
            if let Some(err) = self.failures.lock().expect("lock").pop_front() {
                return Err(err);
            }
            Ok(format!("thread_{n}"))
        }

        async fn post_message(&self, _thread_id: &str, content: &str) -> Result<(), ProviderError> {
            self.messages.lock().expect("lock").push(content.to_string());
            Ok(())
        }

        async fn start_run(&self, thread_id: &str) -> Result<RunState, ProviderError> {
            Ok(RunState {
                id: format!("run_{thread_id}"),
                status: RunStatus::Queued,
                last_error: None,
            })
        }

        async fn retrieve_run(&self, _thread_id: &str, run_id: &str) -> Result<RunState, ProviderError> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            let status = if n <= self.pending_polls {
                RunStatus::InProgress
            } else {
                self.final_status
            };
            Ok(RunState {
                id: run_id.to_string(),
                status,
                last_error: self.last_error.clone(),
            })
        }

        async fn assistant_reply(&self, _thread_id: &str) -> Result<String, ProviderError> {
            let last = self.messages.lock().expect("lock").last().cloned().unwrap_or_default();
            Ok((self.reply)(&last))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ProviderError, RunStatus};

    #[test]
    fn rate_limit_classification() {
        assert!(ProviderError::RateLimited("x".into()).is_rate_limit());
        assert!(ProviderError::Http {
            status: 429,
            message: "slow down".into()
        }
        .is_rate_limit());
        assert!(ProviderError::RunFailed {
            status: "failed".into(),
            detail: "rate_limit_exceeded: Rate limit reached for requests".into()
        }
        .is_rate_limit());
        assert!(ProviderError::Transport("HTTP 503 Too Many Requests".into()).is_rate_limit());
        assert!(!ProviderError::Http {
            status: 500,
            message: "boom".into()
        }
        .is_rate_limit());
        assert!(!ProviderError::Timeout { secs: 180 }.is_rate_limit());
    }

    #[test]
    fn run_status_decodes_unknown_values() {
        let s: RunStatus = serde_json::from_str("\"in_progress\"").expect("decode");
        assert_eq!(s, RunStatus::InProgress);
        assert!(s.is_pending());
        let s: RunStatus = serde_json::from_str("\"something_new\"").expect("decode");
        assert_eq!(s, RunStatus::Unknown);
        assert!(!s.is_pending());
        assert_eq!(RunStatus::Expired.as_str(), "expired");
    }
}

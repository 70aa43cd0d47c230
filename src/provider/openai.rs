use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{AssistantBackend, ProviderError, RunState, RunStatus};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_BETA_HEADER: &str = "assistants=v2";

#[derive(Clone, Debug)]
pub struct OpenAiSettings {
    pub api_base: String,
    pub api_key: String,
    pub assistant_id: String,
    pub beta_header: String,
    pub request_timeout: Duration,
}

/// Assistants API client: threads, messages and runs over HTTPS.
pub struct OpenAiAssistants {
    http: reqwest::Client,
    settings: OpenAiSettings,
}

#[derive(Deserialize)]
struct IdObject {
    id: String,
}

#[derive(Deserialize)]
struct RunObject {
    id: String,
    status: RunStatus,
    #[serde(default)]
    last_error: Option<RunLastError>,
}

#[derive(Deserialize)]
struct RunLastError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct MessageList {
    data: Vec<MessageObject>,
}

#[derive(Deserialize)]
struct MessageObject {
    role: String,
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Deserialize)]
struct ContentPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<TextContent>,
}

#[derive(Deserialize)]
struct TextContent {
    value: String,
}

impl From<RunObject> for RunState {
    fn from(run: RunObject) -> Self {
        let last_error = run.last_error.and_then(|e| match (e.code, e.message) {
            (Some(code), Some(msg)) => Some(format!("{code}: {msg}")),
            (None, Some(msg)) => Some(msg),
            (Some(code), None) => Some(code),
            (None, None) => None,
        });
        RunState {
            id: run.id,
            status: run.status,
            last_error,
        }
    }
}

impl OpenAiAssistants {
    pub fn new(settings: OpenAiSettings) -> Result<Self, ProviderError> {
        if settings.api_key.trim().is_empty() {
            return Err(ProviderError::Config("API key is empty".to_string()));
        }
        if settings.assistant_id.trim().is_empty() {
            return Err(ProviderError::Config("assistant id is empty".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| ProviderError::Config(format!("build http client: {e}")))?;
        Ok(Self { http, settings })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.api_base.trim_end_matches('/'), path)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(&self.settings.api_key)
            .header("OpenAI-Beta", &self.settings.beta_header)
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        req: RequestBuilder,
    ) -> Result<T, ProviderError> {
        let resp = self
            .authed(req)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        let resp = check_status(resp).await?;
        resp.json::<T>()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

async fn check_status(resp: Response) -> Result<Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = error_message(&body);
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderError::RateLimited(message));
    }
    Err(ProviderError::Http {
        status: status.as_u16(),
        message,
    })
}

/// Pulls `error.message` out of an error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl AssistantBackend for OpenAiAssistants {
    async fn create_thread(&self) -> Result<String, ProviderError> {
        let req = self.http.post(self.url("/threads")).json(&json!({}));
        let thread: IdObject = self.send_json(req).await?;
        debug!(thread = %thread.id, "thread created");
        Ok(thread.id)
    }

    async fn post_message(&self, thread_id: &str, content: &str) -> Result<(), ProviderError> {
        let req = self
            .http
            .post(self.url(&format!("/threads/{thread_id}/messages")))
            .json(&json!({ "role": "user", "content": content }));
        let _: IdObject = self.send_json(req).await?;
        Ok(())
    }

    async fn start_run(&self, thread_id: &str) -> Result<RunState, ProviderError> {
        let req = self
            .http
            .post(self.url(&format!("/threads/{thread_id}/runs")))
            .json(&json!({ "assistant_id": self.settings.assistant_id }));
        let run: RunObject = self.send_json(req).await?;
        debug!(thread = %thread_id, run = %run.id, "run started");
        Ok(run.into())
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<RunState, ProviderError> {
        let req = self
            .http
            .get(self.url(&format!("/threads/{thread_id}/runs/{run_id}")));
        let run: RunObject = self.send_json(req).await?;
        Ok(run.into())
    }

    async fn assistant_reply(&self, thread_id: &str) -> Result<String, ProviderError> {
        let req = self
            .http
            .get(self.url(&format!("/threads/{thread_id}/messages")))
            .query(&[("order", "asc")]);
        let list: MessageList = self.send_json(req).await?;
        let mut out = String::new();
        for msg in list.data.iter().filter(|m| m.role == "assistant") {
            for part in &msg.content {
                if part.kind != "text" {
                    continue;
                }
                if let Some(t) = &part.text {
                    out.push_str(&t.value);
                }
            }
        }
        Ok(out)
    }
}

//! OpenAI-compatible chat transport with endpoint rotation and a
//! process-wide retry barrier.
//!
//! Real model output interleaves prose with JSON and sometimes elides
//! the code fence, so [`extract_json`] recovers in three stages: fenced
//! block, first-to-last bracket span, whole body. The stage order
//! matches observed model behavior and must not change.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{CaveError, Result};

/// How long every caller backs off after a failed request.
const RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// One chat-completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
    pub key: String,
    pub model: String,
}

/// Chat message content: plain text or multimodal parts.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// Multimodal content item.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn parts(role: &str, parts: Vec<ContentPart>) -> Self {
        Self {
            role: role.to_string(),
            content: MessageContent::Parts(parts),
        }
    }
}

/// Base64 data URL for an inline image payload.
pub fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", BASE64.encode(bytes))
}

/// MIME type for a stored media file name.
pub fn mime_for(file: &str) -> &'static str {
    match file.rsplit('.').next().map(str::to_ascii_lowercase).as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

/// Chat transport seam; the production implementation is [`OpenAiChat`],
/// tests script their own.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send one request and return the assistant message text.
    async fn chat(&self, messages: &[ChatMessage], system_prompt: Option<&str>) -> Result<String>;
}

/// Round-robin client over a list of OpenAI-compatible endpoints.
///
/// The endpoint cursor and retry barrier are process-wide: one failure
/// holds every caller back for [`RETRY_BACKOFF`], one success clears it.
pub struct OpenAiChat {
    endpoints: Vec<Endpoint>,
    cursor: AtomicUsize,
    /// Epoch millis before which no request may be issued; 0 when clear.
    retry_until_ms: AtomicI64,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn new(endpoints: Vec<Endpoint>, timeout_secs: u64) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(CaveError::NoEndpoints);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            endpoints,
            cursor: AtomicUsize::new(0),
            retry_until_ms: AtomicI64::new(0),
            client,
        })
    }

    fn next_endpoint(&self) -> &Endpoint {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.endpoints.len();
        &self.endpoints[index]
    }

    async fn wait_for_barrier(&self) {
        let until = self.retry_until_ms.load(Ordering::Acquire);
        if until <= 0 {
            return;
        }
        let now = Utc::now().timestamp_millis();
        if until > now {
            let wait = Duration::from_millis((until - now) as u64);
            warn!(wait_ms = wait.as_millis() as u64, "LLM retry barrier active, sleeping");
            tokio::time::sleep(wait).await;
        }
    }

    fn raise_barrier(&self) {
        let until = Utc::now().timestamp_millis() + RETRY_BACKOFF.as_millis() as i64;
        self.retry_until_ms.store(until, Ordering::Release);
    }

    fn barrier_raised(&self) -> bool {
        self.retry_until_ms.load(Ordering::Acquire) > 0
    }

    async fn request(&self, endpoint: &Endpoint, messages: &[Value]) -> Result<String> {
        let url = format!("{}/chat/completions", endpoint.url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": endpoint.model,
            "messages": messages,
        });
        let response = self
            .client
            .post(&url)
            .bearer_auth(&endpoint.key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let value: Value = response.json().await?;
        value["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CaveError::Llm(format!("no message content from {url}")))
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn chat(&self, messages: &[ChatMessage], system_prompt: Option<&str>) -> Result<String> {
        self.wait_for_barrier().await;
        let endpoint = self.next_endpoint();

        let mut payload = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = system_prompt {
            payload.push(serde_json::to_value(ChatMessage::text("system", system))?);
        }
        for message in messages {
            payload.push(serde_json::to_value(message)?);
        }

        debug!(url = %endpoint.url, model = %endpoint.model, "issuing chat request");
        match self.request(endpoint, &payload).await {
            Ok(content) => {
                self.retry_until_ms.store(0, Ordering::Release);
                Ok(content)
            }
            Err(err) => {
                self.raise_barrier();
                Err(err)
            }
        }
    }
}

/// Recover a JSON value from raw model output.
///
/// Tries, in order: the content of a fenced ```json block, the span from
/// the first opening bracket to the last matching closing bracket
/// (object if `{` comes first, array otherwise), then the whole trimmed
/// body. The first successful parse wins.
pub fn extract_json(raw: &str) -> Option<Value> {
    if let Some(block) = fenced_block(raw) {
        if let Ok(value) = serde_json::from_str(block) {
            return Some(value);
        }
    }
    if let Some(span) = bracket_span(raw) {
        if let Ok(value) = serde_json::from_str(span) {
            return Some(value);
        }
    }
    serde_json::from_str(raw.trim()).ok()
}

fn fenced_block(raw: &str) -> Option<&str> {
    let start = raw.find("```json")? + "```json".len();
    let rest = &raw[start..];
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

fn bracket_span(raw: &str) -> Option<&str> {
    let first_object = raw.find('{');
    let first_array = raw.find('[');
    let (open, close) = match (first_object, first_array) {
        (Some(o), Some(a)) if o < a => ('{', '}'),
        (Some(_), None) => ('{', '}'),
        (_, Some(_)) => ('[', ']'),
        (None, None) => return None,
    };
    let start = raw.find(open)?;
    let end = raw.rfind(close)?;
    (end > start).then(|| &raw[start..=end])
}

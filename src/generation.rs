//! Generative model client: streaming completions plus the separate
//! non-streaming summarization mode.

use crate::error::GenerationError;
use crate::prompt::{Prompt, PromptMessage};
use crate::types::Role;
use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Incremental text deltas; the stream ends on clean completion.
pub type DeltaStream = BoxStream<'static, Result<String, GenerationError>>;

/// External generative model service.
///
/// `stream` is the zero-temperature mode used for context-bound answers.
/// `summarize` condenses text via a separate non-streaming call; its
/// output is not guaranteed deterministic across calls, so tests mock it
/// rather than asserting exact text.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn stream(&self, prompt: &Prompt) -> Result<DeltaStream, GenerationError>;
    async fn summarize(&self, text: &str) -> Result<String, GenerationError>;
}

// ---------------
// SSE parsing helpers (exported for tests)
// ---------------

#[derive(Deserialize)]
pub struct SseDelta {
    pub content: Option<String>,
}

#[derive(Deserialize)]
pub struct SseMessage {
    pub content: String,
}

#[derive(Deserialize)]
pub struct SseChoice {
    pub message: Option<SseMessage>,
    #[serde(default)]
    pub delta: Option<SseDelta>,
}

#[derive(Deserialize)]
pub struct SseOpenAiShape {
    pub choices: Vec<SseChoice>,
}

#[derive(Deserialize)]
pub struct SseContentOnly {
    pub content: String,
}

/// Parse one SSE `data:` payload into `(delta, done)`.
pub fn parse_sse_data(data: &str) -> Option<(String, bool)> {
    let trimmed = data.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed == "[DONE]" {
        return Some((String::new(), true));
    }

    if let Ok(parsed) = serde_json::from_str::<SseOpenAiShape>(trimmed) {
        if let Some(first) = parsed.choices.into_iter().next() {
            if let Some(delta) = first.delta
                && let Some(piece) = delta.content
            {
                return Some((piece, false));
            }
            if let Some(msg) = first.message {
                return Some((msg.content, false));
            }
        }
        return Some((String::new(), false));
    }
    if let Ok(parsed) = serde_json::from_str::<SseContentOnly>(trimmed) {
        return Some((parsed.content, false));
    }
    None
}

// ---------------
// HTTP client (OpenAI-shape chat completions)
// ---------------

pub struct HttpCompletionService {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    summarization_model: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

impl HttpCompletionService {
    pub fn new(
        endpoint: String,
        model: String,
        summarization_model: String,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            model,
            summarization_model,
            api_key,
        }
    }

    fn wire_messages<'a>(prompt: &'a Prompt) -> Vec<WireMessage<'a>> {
        let mut messages = vec![WireMessage {
            role: Role::System,
            content: &prompt.system,
        }];
        messages.extend(prompt.messages.iter().map(|m: &'a PromptMessage| WireMessage {
            role: m.role,
            content: &m.content,
        }));
        messages
    }
}

#[async_trait]
impl CompletionService for HttpCompletionService {
    async fn stream(&self, prompt: &Prompt) -> Result<DeltaStream, GenerationError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("accept", "text/event-stream")
            .json(&CompletionRequest {
                model: &self.model,
                messages: Self::wire_messages(prompt),
                stream: true,
                // Deterministic mode for context-bound answers.
                temperature: 0.0,
                max_tokens: None,
            });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Upstream(format!(
                "model endpoint error {status}: {body}"
            )));
        }

        let (tx, rx) = mpsc::unbounded();
        tokio::spawn(pump_sse(Box::pin(response.bytes_stream()), tx));

        Ok(rx.boxed())
    }

    async fn summarize(&self, text: &str) -> Result<String, GenerationError> {
        let prompt_text = format!("Summarize the following text:\n\n{text}");
        let mut request = self.client.post(&self.endpoint).json(&CompletionRequest {
            model: &self.summarization_model,
            messages: vec![WireMessage {
                role: Role::User,
                content: &prompt_text,
            }],
            stream: false,
            temperature: 0.3,
            max_tokens: Some(500),
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(GenerationError::Upstream(format!(
                "summarization error {status}: {body}"
            )));
        }

        if let Ok(parsed) = serde_json::from_str::<SseOpenAiShape>(&body)
            && let Some(first) = parsed.choices.into_iter().next()
            && let Some(msg) = first.message
        {
            return Ok(msg.content.trim().to_string());
        }
        if let Ok(parsed) = serde_json::from_str::<SseContentOnly>(&body) {
            return Ok(parsed.content.trim().to_string());
        }
        Err(GenerationError::MalformedStream(
            "unrecognized summarization response shape".to_string(),
        ))
    }
}

/// Parse SSE by lines: collect `data:` lines until a blank line, then
/// process the accumulated payload. EOF before the completion marker is
/// a truncated answer and surfaces as an error, never a clean finish.
async fn pump_sse<S, B, E>(mut upstream: S, tx: mpsc::UnboundedSender<Result<String, GenerationError>>)
where
    S: futures::Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut buffer = String::new();
    let mut data_acc: Option<String> = None;
    while let Some(item) = upstream.next().await {
        let bytes = match item {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tx.unbounded_send(Err(GenerationError::Upstream(e.to_string())));
                return;
            }
        };
        buffer.push_str(&String::from_utf8_lossy(bytes.as_ref()));
        while let Some(pos) = buffer.find('\n') {
            let mut line = buffer[..pos].to_string();
            if line.ends_with('\r') {
                line.pop();
            }
            buffer = buffer[pos + 1..].to_string();

            if line.is_empty() {
                // End of event
                if let Some(data) = data_acc.take()
                    && let Some((piece, done)) = parse_sse_data(&data)
                {
                    if !piece.is_empty() && tx.unbounded_send(Ok(piece)).is_err() {
                        return;
                    }
                    if done {
                        return;
                    }
                }
                continue;
            }

            if let Some(rest) = line.strip_prefix("data:") {
                let s = rest.trim_start();
                match &mut data_acc {
                    Some(acc) => acc.push_str(s),
                    None => data_acc = Some(s.to_string()),
                }
            }
        }
    }

    let _ = tx.unbounded_send(Err(GenerationError::MalformedStream(
        "stream ended before completion marker".to_string(),
    )));
}

//! Ollama client, speaking the newline-delimited JSON streaming API.

use crate::config::ClientConfig;
use crate::core::chat::{Fragment, Message, ModelDescriptor, Role};
use crate::core::error::ChatError;
use crate::infrastructure::traits::{FragmentStream, InferenceClient};
use async_stream::stream;
use async_trait::async_trait;
use di::{Ref, inject, injectable};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const STREAM_TRUNCATED: &str = "stream ended before done";

pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
}

#[injectable(InferenceClient)]
impl OllamaClient {
    #[inject]
    pub fn create(config: Ref<ClientConfig>) -> OllamaClient {
        OllamaClient::new(&config.ollama_host)
    }
}

impl OllamaClient {
    pub fn new(base_url: &str) -> OllamaClient {
        // only connecting is bounded, a slow model may take as long as it likes
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();

        OllamaClient {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn open(&self, path: &str, body: &impl Serialize) -> Result<reqwest::Response, ChatError> {
        let response = self
            .client
            .post(self.endpoint(path))
            .json(body)
            .send()
            .await
            .map_err(unreachable)?;

        ensure_success(response).await
    }
}

fn unreachable(e: reqwest::Error) -> ChatError {
    ChatError::ServiceUnreachable(e.to_string())
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ChatError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.error)
        .unwrap_or(body);
    warn!("inference request rejected with {status}: {detail}");
    Err(ChatError::ServiceUnreachable(format!("{status}: {detail}")))
}

#[async_trait]
impl InferenceClient for OllamaClient {
    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, ChatError> {
        let response = self
            .client
            .get(self.endpoint("/api/tags"))
            .send()
            .await
            .map_err(unreachable)?;

        let tags: TagsResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(unreachable)?;

        Ok(tags
            .models
            .into_iter()
            .map(|m| ModelDescriptor {
                name: m.name,
                details: m.details,
            })
            .collect())
    }

    async fn stream_chat(
        &self,
        model: &str,
        messages: &[Message],
        cancel: CancellationToken,
    ) -> Result<FragmentStream, ChatError> {
        debug!("opening chat stream on {model} with {} messages", messages.len());
        let response = self
            .open(
                "/api/chat",
                &ChatRequest {
                    model,
                    messages,
                    stream: true,
                },
            )
            .await?;

        Ok(fragments::<ChatChunk>(ndjson(response), cancel))
    }

    async fn stream_generate(
        &self,
        model: &str,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<FragmentStream, ChatError> {
        debug!("opening generate stream on {model}");
        let response = self
            .open(
                "/api/generate",
                &GenerateRequest {
                    model,
                    prompt,
                    stream: true,
                },
            )
            .await?;

        Ok(fragments::<GenerateChunk>(ndjson(response), cancel))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    name: String,
    #[serde(flatten)]
    details: serde_json::Map<String, serde_json::Value>,
}

/// One decoded line of a response stream.
trait StreamChunk: DeserializeOwned + Send + 'static {
    fn is_done(&self) -> bool;

    /// The fragment carried by this line, if any.
    fn into_fragment(self) -> Result<Option<Fragment>, ChatError>;
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ChunkMessage {
    role: Role,
    #[serde(default)]
    content: String,
}

impl StreamChunk for ChatChunk {
    fn is_done(&self) -> bool {
        self.done
    }

    fn into_fragment(self) -> Result<Option<Fragment>, ChatError> {
        if let Some(error) = self.error {
            return Err(ChatError::StreamInterrupted(error));
        }
        Ok(self
            .message
            .filter(|m| !m.content.is_empty())
            .map(|m| Fragment {
                role: m.role,
                text: m.content,
            }))
    }
}

#[derive(Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

impl StreamChunk for GenerateChunk {
    fn is_done(&self) -> bool {
        self.done
    }

    fn into_fragment(self) -> Result<Option<Fragment>, ChatError> {
        if let Some(error) = self.error {
            return Err(ChatError::StreamInterrupted(error));
        }
        Ok((!self.response.is_empty()).then(|| Fragment::assistant(self.response)))
    }
}

/// Turns decoded lines into fragments. Stops after the `done` line, the first error, or once
/// `cancel` fires. A body that ends without a `done` line is an interruption.
fn fragments<T: StreamChunk>(
    mut chunks: BoxStream<'static, Result<T, ChatError>>,
    cancel: CancellationToken,
) -> FragmentStream {
    stream! {
        while let Some(chunk) = chunks.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let done = chunk.is_done();
            match chunk.into_fragment() {
                Ok(Some(fragment)) => yield Ok(fragment),
                Ok(None) => {}
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }

            if done {
                return;
            }
        }

        warn!("response stream ended before the done line");
        yield Err(ChatError::StreamInterrupted(STREAM_TRUNCATED.to_owned()));
    }
    .take_until(cancel.cancelled_owned())
    .boxed()
}

/// Decodes a newline-delimited JSON response body.
fn ndjson<T: DeserializeOwned + Send + 'static>(
    response: reqwest::Response,
) -> BoxStream<'static, Result<T, ChatError>> {
    let mut body = response.bytes_stream();

    stream! {
        let mut lines = LineBuffer::default();

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(chunk) => {
                    for line in lines.push(&chunk) {
                        yield decode_line(&line);
                    }
                }
                Err(e) => {
                    yield Err(ChatError::StreamInterrupted(e.to_string()));
                    return;
                }
            }
        }

        if let Some(line) = lines.finish() {
            yield decode_line(&line);
        }
    }
    .boxed()
}

fn decode_line<T: DeserializeOwned>(line: &[u8]) -> Result<T, ChatError> {
    serde_json::from_slice(line)
        .map_err(|e| ChatError::StreamInterrupted(format!("malformed stream line: {e}")))
}

/// Reassembles lines split across network chunks.
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Buffers `chunk` and returns every line it completed, skipping blank ones.
    fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = trim_line(&line[..line.len() - 1]);
            if !line.is_empty() {
                lines.push(line.to_vec());
            }
        }
        lines
    }

    /// Returns the unterminated tail, if it holds anything.
    fn finish(&mut self) -> Option<Vec<u8>> {
        let rest = std::mem::take(&mut self.pending);
        let rest = trim_line(&rest);
        (!rest.is_empty()).then(|| rest.to_vec())
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    line.trim_ascii()
}

//! Streaming API calls
//!
//! Thin client for OpenAI-compatible `POST {base_url}/chat/completions`.
//! When streaming, SSE deltas are forwarded through a bounded channel in
//! arrival order; when the sink stops consuming, the reader task blocks
//! rather than dropping chunks.

use std::time::Instant;

use anyhow::Result;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::ai::sse::{self, SseEvent, SseScanner};
use crate::ai::types::{ChatMessage, Usage};
use crate::config::AgentProfile;
use crate::constants::stream::{BUFFER_CHUNKS, READ_IDLE_TIMEOUT, REQUEST_TIMEOUT};

/// Connection settings for one upstream model.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ClientConfig {
    pub fn from_profile(profile: &AgentProfile) -> Self {
        Self {
            base_url: profile.base_url.clone(),
            model: profile.model_id.clone(),
            api_key: profile.api_key.clone(),
            temperature: profile.temperature,
            max_tokens: profile.max_tokens,
        }
    }

    fn api_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// One item on the streaming channel. The channel closing cleanly marks
/// the end of the stream; `Error` is a terminal in-band failure signal so
/// the receiver never waits on a silently-dead stream.
#[derive(Debug, Clone)]
pub enum StreamPart {
    TextDelta { delta: String },
    Usage { usage: Usage },
    Error { error: String },
}

/// HTTP client for a single provider endpoint.
pub struct AiClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl AiClient {
    pub fn new(config: ClientConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { http, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn build_body(&self, messages: &[ChatMessage], stream: bool) -> Value {
        serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "stream": stream,
        })
    }

    fn build_request(&self, body: &Value) -> reqwest::RequestBuilder {
        let mut request = self.http.post(self.config.api_url()).json(body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        request
    }

    /// Call the API with a streaming response.
    ///
    /// Returns a receiver of [`StreamPart`]s. The HTTP status is checked
    /// before the receiver is handed back, so 4xx/5xx (with the response
    /// body) surface as an `Err` here rather than in-band.
    pub async fn call_streaming(
        &self,
        messages: &[ChatMessage],
    ) -> Result<mpsc::Receiver<StreamPart>> {
        let call_start = Instant::now();
        info!(
            model = %self.config.model,
            messages = messages.len(),
            "starting streaming completion"
        );

        let body = self.build_body(messages, true);
        let response = self.build_request(&body).send().await?;
        let response = ensure_success(response, call_start).await?;

        let (tx, rx) = mpsc::channel(BUFFER_CHUNKS);
        tokio::spawn(async move {
            run_stream(response, tx).await;
        });

        Ok(rx)
    }

    /// Non-streaming call: the assembled assistant content plus usage when
    /// the provider reports it.
    pub async fn call(&self, messages: &[ChatMessage]) -> Result<(String, Option<Usage>)> {
        let call_start = Instant::now();
        let body = self.build_body(messages, false);
        let response = self.build_request(&body).send().await?;
        let response = ensure_success(response, call_start).await?;

        let json: Value = response.json().await?;
        let content = json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| anyhow::anyhow!("response has no message content: {json}"))?
            .to_string();
        let usage = json.get("usage").and_then(sse::parse_usage);

        debug!(
            chars = content.len(),
            elapsed = ?call_start.elapsed(),
            "completion finished"
        );
        Ok((content, usage))
    }
}

async fn ensure_success(
    response: reqwest::Response,
    call_start: Instant,
) -> Result<reqwest::Response> {
    let status = response.status();
    info!("API response: {} in {:?}", status, call_start.elapsed());

    if status.is_success() {
        return Ok(response);
    }

    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    error!("API error: {} - {}", status, error_text);
    Err(anyhow::anyhow!("API error: {} - {}", status, error_text))
}

/// Read the byte stream, scan SSE events, forward deltas. A read that goes
/// idle past the timeout aborts the stream with an in-band error.
async fn run_stream(response: reqwest::Response, tx: mpsc::Sender<StreamPart>) {
    let mut stream = response.bytes_stream();
    let mut scanner = SseScanner::new();
    let mut chunk_count: u64 = 0;

    loop {
        let chunk = match tokio::time::timeout(READ_IDLE_TIMEOUT, stream.next()).await {
            Ok(Some(Ok(bytes))) => bytes,
            Ok(Some(Err(e))) => {
                error!("stream read error at chunk #{chunk_count}: {e}");
                let _ = tx.send(StreamPart::Error { error: format!("stream read error: {e}") }).await;
                return;
            }
            Ok(None) => break,
            Err(_) => {
                warn!("stream idle past {:?}, aborting", READ_IDLE_TIMEOUT);
                let _ = tx
                    .send(StreamPart::Error {
                        error: format!("stream idle for {}s", READ_IDLE_TIMEOUT.as_secs()),
                    })
                    .await;
                return;
            }
        };

        chunk_count += 1;
        let events = match scanner.push(&chunk) {
            Ok(events) => events,
            Err(e) => {
                warn!("chunk #{chunk_count} parse error: {e}");
                let _ = tx.send(StreamPart::Error { error: e.to_string() }).await;
                return;
            }
        };

        for event in events {
            let part = match event {
                SseEvent::TextDelta(delta) => StreamPart::TextDelta { delta },
                SseEvent::Usage(usage) => StreamPart::Usage { usage },
                SseEvent::Done => {
                    info!("stream ended after {chunk_count} chunks");
                    return;
                }
                SseEvent::Skip => continue,
            };
            // send() blocks when the sink is BUFFER_CHUNKS behind.
            if tx.send(part).await.is_err() {
                debug!("stream receiver dropped, stopping reader");
                return;
            }
        }
    }

    info!("stream closed after {chunk_count} chunks");
}

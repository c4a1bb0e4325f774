//! Ollama `/api/generate` streaming backend.

use super::{GenerationBackend, GenerationRequest, TokenStream};
use crate::error::{DocentError, Result};
use crate::ollama::{describe_failure, OllamaClient};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use tracing::{debug, instrument};

/// Generation backend for a local Ollama server.
pub struct OllamaBackend {
    client: OllamaClient,
    model: String,
    temperature: f32,
    name: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

/// One line of the NDJSON response.
#[derive(Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

impl OllamaBackend {
    pub fn new(base_url: &str, model: &str, temperature: f32) -> Result<Self> {
        Ok(Self {
            client: OllamaClient::new(base_url)?,
            model: model.to_string(),
            temperature,
            name: format!("ollama/{}", model),
        })
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn stream(&self, request: &GenerationRequest) -> Result<TokenStream> {
        let url = self.client.endpoint("api/generate")?;
        let response = self
            .client
            .http()
            .post(url)
            .json(&GenerateRequest {
                model: &self.model,
                prompt: &request.prompt,
                system: &request.system,
                stream: true,
                options: GenerateOptions {
                    temperature: self.temperature,
                },
            })
            .send()
            .await
            .map_err(|e| DocentError::GenerationBackend(format!("Ollama unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(DocentError::GenerationBackend(describe_failure(response).await));
        }

        debug!("Ollama accepted generation request");
        let body = response.bytes_stream().map(|chunk| chunk.map(|bytes| bytes.to_vec()));
        Ok(decode_ndjson(body))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct DecodeState {
    body: BoxStream<'static, std::result::Result<Vec<u8>, String>>,
    buffer: Vec<u8>,
    body_done: bool,
    finished: bool,
}

/// Turn a byte stream of newline-delimited JSON objects into tokens.
///
/// A body that ends before a `"done": true` line yields a final error, so a
/// truncated answer is never mistaken for a complete one.
fn decode_ndjson<S, E>(body: S) -> TokenStream
where
    S: Stream<Item = std::result::Result<Vec<u8>, E>> + Send + 'static,
    E: Display,
{
    let state = DecodeState {
        body: body.map(|chunk| chunk.map_err(|e| e.to_string())).boxed(),
        buffer: Vec::new(),
        body_done: false,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }

            if let Some(newline) = state.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = state.buffer.drain(..=newline).collect();
                match parse_line(&line) {
                    Ok(None) => continue,
                    Ok(Some(chunk)) => {
                        state.finished = chunk.done;
                        if chunk.response.is_empty() {
                            continue;
                        }
                        return Some((Ok(chunk.response), state));
                    }
                    Err(e) => {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                }
            }

            if state.body_done {
                if state.buffer.iter().any(|b| !b.is_ascii_whitespace()) {
                    state.buffer.push(b'\n');
                    continue;
                }
                state.finished = true;
                return Some((
                    Err(DocentError::GenerationBackend(
                        "response ended before generation completed".to_string(),
                    )),
                    state,
                ));
            }

            match state.body.next().await {
                Some(Ok(bytes)) => state.buffer.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(DocentError::GenerationBackend(e)), state));
                }
                None => state.body_done = true,
            }
        }
    })
    .boxed()
}

fn parse_line(line: &[u8]) -> Result<Option<GenerateChunk>> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let chunk: GenerateChunk = serde_json::from_str(text)
        .map_err(|e| DocentError::GenerationBackend(format!("Malformed Ollama response: {}", e)))?;
    if let Some(error) = chunk.error {
        return Err(DocentError::GenerationBackend(error));
    }
    Ok(Some(chunk))
}

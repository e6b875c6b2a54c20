//! Response generation
//!
//! `ResponseGenerator` is the seam between the voice loop and the language
//! model. `OpenAiChat` talks to any OpenAI-compatible `/chat/completions`
//! endpoint with the blocking client, since it is driven from the voice worker
//! thread rather than an async runtime.

use std::io::{BufRead, BufReader};

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::history::ChatMessage;
use crate::persona::PersonaConfig;
use crate::{Error, Result};

/// Lazy sequence of text fragments whose concatenation is the full answer
pub type TextStream = Box<dyn Iterator<Item = Result<String>>>;

/// Sampling limits for one completion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl From<&PersonaConfig> for GenerationParams {
    fn from(persona: &PersonaConfig) -> Self {
        Self {
            max_tokens: persona.max_tokens,
            temperature: persona.temperature,
        }
    }
}

/// Turns an ordered conversation into an answer
pub trait ResponseGenerator {
    /// Produce the whole answer in one call
    ///
    /// # Errors
    ///
    /// Returns error if the model call fails
    fn complete(&self, messages: &[ChatMessage], params: &GenerationParams) -> Result<String>;

    /// Produce the answer as text deltas
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be started; failures while reading
    /// the stream surface as `Err` items
    fn complete_stream(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<TextStream>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChunkResponse {
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions client
pub struct OpenAiChat {
    client: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiChat {
    /// Create a new chat client
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing or the client cannot be built
    pub fn new(api_key: String, base_url: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for responses".to_string(),
            ));
        }

        // No overall timeout: streamed answers can legitimately take a while
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(None::<std::time::Duration>)
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    /// Build from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the OpenAI key is not configured
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.api_keys.openai.clone().ok_or_else(|| {
            Error::Config("OPENAI_API_KEY is not set".to_string())
        })?;
        Self::new(api_key, config.llm.base_url.clone(), config.llm.model.clone())
    }

    fn send(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        stream: bool,
    ) -> Result<reqwest::blocking::Response> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            stream,
        };

        tracing::debug!(
            model = %self.model,
            messages = messages.len(),
            stream,
            "sending chat completion"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat completion error");
            return Err(Error::Llm(format!("chat completion error {status}: {body}")));
        }

        Ok(response)
    }
}

impl ResponseGenerator for OpenAiChat {
    fn complete(&self, messages: &[ChatMessage], params: &GenerationParams) -> Result<String> {
        let response: ChatResponse = self.send(messages, params, false)?.json()?;

        let answer = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        tracing::debug!(chars = answer.len(), "chat completion received");
        Ok(answer)
    }

    fn complete_stream(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<TextStream> {
        let response = self.send(messages, params, true)?;
        Ok(Box::new(SseDeltas::new(BufReader::new(response))))
    }
}

/// Outcome of one server-sent event line
#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Delta(String),
    Skip,
    Done,
}

/// Interpret one line of an OpenAI streaming body
fn parse_sse_line(line: &str) -> Result<SseLine> {
    let Some(data) = line.strip_prefix("data:") else {
        // Blank separators, comments and other fields carry no text
        return Ok(SseLine::Skip);
    };

    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    if data.is_empty() {
        return Ok(SseLine::Skip);
    }

    let chunk: ChunkResponse = serde_json::from_str(data)?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|s| !s.is_empty())
        .map_or(SseLine::Skip, SseLine::Delta))
}

/// Text deltas pulled lazily from an SSE body
pub struct SseDeltas<R> {
    lines: std::io::Lines<R>,
    finished: bool,
}

impl<R: BufRead> SseDeltas<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            finished: false,
        }
    }
}

impl<R: BufRead> Iterator for SseDeltas<R> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(Error::Llm(format!("stream read failed: {e}"))));
                }
            };

            match parse_sse_line(&line) {
                Ok(SseLine::Delta(text)) => return Some(Ok(text)),
                Ok(SseLine::Skip) => {}
                Ok(SseLine::Done) => self.finished = true,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_stream_yields_deltas_until_done() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n",
            "\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Boil \"}}]}\n",
            "\n",
            ": keep-alive\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"for ten minutes.\"}}]}\n",
            "\n",
            "data: [DONE]\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n",
        );

        let deltas: Vec<String> = SseDeltas::new(body.as_bytes())
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(deltas, vec!["Boil ", "for ten minutes."]);
    }

    #[test]
    fn malformed_chunk_ends_stream_with_error() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\ndata: {broken\n";
        let items: Vec<_> = SseDeltas::new(body.as_bytes()).collect();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().unwrap(), "ok");
        assert!(items[1].is_err());
    }

    #[test]
    fn stream_without_done_ends_at_eof() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n";
        assert_eq!(SseDeltas::new(body.as_bytes()).count(), 1);
    }

    #[test]
    fn request_serializes_messages_with_roles() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];
        let request = ChatRequest {
            model: "gpt-4o",
            messages: &messages,
            max_tokens: 150,
            temperature: 0.2,
            stream: true,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn missing_api_key_rejected() {
        let result = OpenAiChat::new(String::new(), "http://localhost".into(), "m".into());
        assert!(matches!(result, Err(Error::Config(_))));
    }
}

pub mod echo;
pub mod gemini;
pub mod ollama;
pub mod scripted;

use async_trait::async_trait;
use futures::{ Stream, StreamExt };
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use super::{ LlmConfig, LlmType };
use self::echo::EchoChatClient;
use self::gemini::GeminiChatClient;
use self::ollama::OllamaClient;
use crate::models::chat::Turn;

/// Lazy, finite sequence of text fragments for one model turn.
///
/// A failure is always the last item.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("invalid chat client configuration: {0}")]
    Config(String),
    #[error("upstream request failed: {0}")]
    Request(String),
    #[error("upstream returned HTTP {status}: {body}")]
    Status {
        status: u16,
        body: String,
    },
    #[error("malformed upstream response: {0}")]
    Malformed(String),
    #[error("upstream error: {0}")]
    Upstream(String),
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Request(err.to_string())
    }
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Starts exactly one upstream call for `prompt` with `history` as context.
    ///
    /// An `Err` here means the call could not be started at all; failures after
    /// that arrive as the final item of the returned stream.
    async fn stream_turn(
        &self,
        prompt: &str,
        history: &[Turn],
    ) -> Result<FragmentStream, ChatError>;

    fn get_model(&self) -> String;
    fn get_llm_type(&self) -> LlmType;
}

pub fn new_client(
    config: &LlmConfig
) -> Result<Arc<dyn ChatClient>, ChatError> {
    let client: Arc<dyn ChatClient> = match config.llm_type {
        LlmType::Gemini => {
            let specific_client = GeminiChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
        LlmType::Ollama => {
            let specific_client = OllamaClient::from_config(config)?;
            Arc::new(specific_client)
        }
        LlmType::Echo => {
            let specific_client = EchoChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
    };
    Ok(client)
}

/// What a provider makes of one complete line of its streaming body.
#[derive(Debug, PartialEq, Eq)]
pub enum ParsedLine {
    Skip,
    Fragment(String),
    Done,
    Failed(ChatError),
}

/// Sends an already-built streaming request and exposes the body as fragments.
///
/// Non-2xx statuses are reported before any fragment. The body is split on
/// newlines with a carry-over buffer, so a line cut across network chunks is
/// parsed once it is whole. Dropping the stream drops the response and frees
/// the connection.
pub async fn http_stream_generate(
    request: reqwest::RequestBuilder,
    line_parser: fn(&str) -> ParsedLine,
) -> Result<FragmentStream, ChatError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ChatError::Status { status: status.as_u16(), body });
    }

    let body = response
        .bytes_stream()
        .map(|chunk| chunk.map(|bytes| bytes.to_vec()));
    let state = LineStream {
        body: Box::pin(body),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
        line_parser,
    };

    let stream = futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                if item.is_err() {
                    state.pending.clear();
                    state.finished = true;
                }
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(&chunk);
                    state.drain_lines();
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(ChatError::from(e)), state));
                }
                None => {
                    state.buffer.push(b'\n');
                    state.drain_lines();
                    state.finished = true;
                }
            }
        }
    });

    Ok(Box::pin(stream))
}

struct LineStream {
    body: Pin<Box<dyn Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>>,
    buffer: Vec<u8>,
    pending: VecDeque<Result<String, ChatError>>,
    finished: bool,
    line_parser: fn(&str) -> ParsedLine,
}

impl LineStream {
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            match (self.line_parser)(line.trim_end_matches(['\r', '\n'])) {
                ParsedLine::Skip => {}
                ParsedLine::Fragment(text) => self.pending.push_back(Ok(text)),
                ParsedLine::Done => {
                    self.finished = true;
                    self.buffer.clear();
                    return;
                }
                ParsedLine::Failed(e) => {
                    self.pending.push_back(Err(e));
                    self.finished = true;
                    self.buffer.clear();
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upper(line: &str) -> ParsedLine {
        match line {
            "" => ParsedLine::Skip,
            "DONE" => ParsedLine::Done,
            "FAIL" => ParsedLine::Failed(ChatError::Upstream("fail".into())),
            other => ParsedLine::Fragment(other.to_uppercase()),
        }
    }

    fn line_stream(chunks: Vec<&str>) -> LineStream {
        let owned: Vec<Result<Vec<u8>, reqwest::Error>> =
            chunks.into_iter().map(|c| Ok(c.as_bytes().to_vec())).collect();
        LineStream {
            body: Box::pin(futures::stream::iter(owned)),
            buffer: Vec::new(),
            pending: VecDeque::new(),
            finished: false,
            line_parser: upper,
        }
    }

    #[test]
    fn lines_split_across_chunks_are_reassembled() {
        let mut state = line_stream(vec![]);
        state.buffer.extend_from_slice(b"ab");
        state.drain_lines();
        assert!(state.pending.is_empty());
        state.buffer.extend_from_slice(b"c\r\n\nde\n");
        state.drain_lines();
        let got: Vec<_> = state.pending.drain(..).collect();
        assert_eq!(got, vec![Ok("ABC".to_string()), Ok("DE".to_string())]);
    }

    #[test]
    fn nothing_is_parsed_after_failure() {
        let mut state = line_stream(vec![]);
        state.buffer.extend_from_slice(b"one\nFAIL\ntwo\n");
        state.drain_lines();
        assert!(state.finished);
        assert_eq!(state.pending.len(), 2);
        assert!(state.pending.back().map(|r| r.is_err()).unwrap_or(false));
    }

    #[test]
    fn done_marker_stops_parsing() {
        let mut state = line_stream(vec![]);
        state.buffer.extend_from_slice(b"x\nDONE\ny\n");
        state.drain_lines();
        assert!(state.finished);
        assert_eq!(state.pending.len(), 1);
    }

    #[tokio::test]
    async fn echo_backend_is_built_from_config() {
        let config = LlmConfig { llm_type: LlmType::Echo, ..LlmConfig::default() };
        let client = new_client(&config).expect("echo needs no credentials");
        assert_eq!(client.get_llm_type(), LlmType::Echo);
    }

    #[test]
    fn gemini_without_key_fails_to_build() {
        let config = LlmConfig::default();
        assert!(matches!(new_client(&config), Err(ChatError::Config(_))));
    }
}

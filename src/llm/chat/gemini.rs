use async_trait::async_trait;
use serde::{ Deserialize, Serialize };
use log::info;

use super::{ ChatClient, ChatError, FragmentStream, ParsedLine, http_stream_generate };
use crate::llm::{ LlmConfig, LlmType };
use crate::models::chat::{ Role, Turn };

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";

#[derive(Serialize)]
struct GeminiStreamRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: Role,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleChunk {
    #[serde(default)]
    candidates: Vec<GoogleCandidate>,
    prompt_feedback: Option<GooglePromptFeedback>,
    error: Option<GoogleError>,
}

#[derive(Deserialize)]
struct GoogleCandidate {
    content: Option<GoogleContent>,
}

#[derive(Deserialize)]
struct GoogleContent {
    #[serde(default)]
    parts: Vec<GooglePart>,
}

#[derive(Deserialize)]
struct GooglePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GooglePromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct GoogleError {
    message: String,
}

/// Parses one line of the `alt=sse` body. Only `data:` fields carry chunks.
fn parse_gemini_line(line: &str) -> ParsedLine {
    let payload = match line.strip_prefix("data:") {
        Some(rest) => rest.trim(),
        None => return ParsedLine::Skip,
    };
    if payload.is_empty() {
        return ParsedLine::Skip;
    }

    let chunk = match serde_json::from_str::<GoogleChunk>(payload) {
        Ok(chunk) => chunk,
        Err(e) => return ParsedLine::Failed(ChatError::Malformed(e.to_string())),
    };
    if let Some(err) = chunk.error {
        return ParsedLine::Failed(ChatError::Upstream(err.message));
    }
    if let Some(reason) = chunk.prompt_feedback.and_then(|f| f.block_reason) {
        return ParsedLine::Failed(ChatError::Upstream(format!("prompt blocked: {}", reason)));
    }

    let text: String = chunk.candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .map(|content| {
            content.parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect()
        })
        .unwrap_or_default();
    ParsedLine::Fragment(text)
}

pub struct GeminiChatClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiChatClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, ChatError> {
        let api_key = config.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ChatError::Config("Google API key is required for GeminiChatClient".to_string()))?;

        Ok(Self::new(api_key, config.completion_model.clone(), config.base_url.clone()))
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

fn build_contents(prompt: &str, history: &[Turn]) -> Vec<GeminiContent> {
    let prompt_turn = Turn::user(prompt);
    history
        .iter()
        .chain(std::iter::once(&prompt_turn))
        .map(|turn| GeminiContent {
            role: turn.role,
            parts: vec![GeminiPart { text: turn.text.clone() }],
        })
        .collect()
}

#[async_trait]
impl ChatClient for GeminiChatClient {
    async fn stream_turn(
        &self,
        prompt: &str,
        history: &[Turn],
    ) -> Result<FragmentStream, ChatError> {
        info!(
            "GeminiChatClient::stream_turn() → model={} history_turns={}",
            self.model,
            history.len()
        );

        let payload = GeminiStreamRequest {
            contents: build_contents(prompt, history),
        };
        let request = self.http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&payload);

        http_stream_generate(request, parse_gemini_line).await
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }

    fn get_llm_type(&self) -> LlmType {
        LlmType::Gemini
    }
}

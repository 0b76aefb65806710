use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{ Deserialize, Serialize };
use log::info;

use super::{ ChatClient, ChatError, FragmentStream, ParsedLine, http_stream_generate };
use crate::llm::{ LlmConfig, LlmType };
use crate::models::chat::{ Role, Turn };

#[derive(Debug)]
pub struct OllamaClient {
    http: HttpClient,
    base_url: String,
    completion_model: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct StreamResponse {
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

fn ollama_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Model => "assistant",
    }
}

fn parse_ollama_line(line: &str) -> ParsedLine {
    let line = line.trim();
    if line.is_empty() {
        return ParsedLine::Skip;
    }
    match serde_json::from_str::<StreamResponse>(line) {
        Ok(StreamResponse { error: Some(message), .. }) => {
            ParsedLine::Failed(ChatError::Upstream(message))
        }
        Ok(StreamResponse { done: true, message, .. }) => {
            // The closing object normally carries an empty message.
            match message.map(|m| m.content).filter(|c| !c.is_empty()) {
                Some(content) => ParsedLine::Fragment(content),
                None => ParsedLine::Done,
            }
        }
        Ok(resp) => ParsedLine::Fragment(resp.message.map(|m| m.content).unwrap_or_default()),
        Err(e) => ParsedLine::Failed(ChatError::Malformed(e.to_string())),
    }
}

impl OllamaClient {
    pub fn new(base_url: Option<String>, completion_model: Option<String>) -> Self {
        let model = completion_model.unwrap_or_else(|| "llama3.2".to_string());
        let url = base_url.unwrap_or_else(|| "http://localhost:11434".into());

        Self {
            http: HttpClient::new(),
            base_url: url,
            completion_model: model,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, ChatError> {
        if config.llm_type != LlmType::Ollama {
            return Err(ChatError::Config("Invalid config type for OllamaClient".into()));
        }

        Ok(Self::new(config.base_url.clone(), config.completion_model.clone()))
    }
}

#[async_trait]
impl ChatClient for OllamaClient {
    async fn stream_turn(
        &self,
        prompt: &str,
        history: &[Turn],
    ) -> Result<FragmentStream, ChatError> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        info!("OllamaClient::stream_turn() → {} model={}", url, self.completion_model);

        let mut messages: Vec<OllamaMessage> = history
            .iter()
            .map(|turn| OllamaMessage {
                role: ollama_role(turn.role).to_string(),
                content: turn.text.clone(),
            })
            .collect();
        messages.push(OllamaMessage { role: "user".to_string(), content: prompt.to_string() });

        let req = ChatRequest {
            model: self.completion_model.clone(),
            messages,
            stream: true,
        };

        http_stream_generate(self.http.post(&url).json(&req), parse_ollama_line).await
    }

    fn get_model(&self) -> String {
        self.completion_model.clone()
    }

    fn get_llm_type(&self) -> LlmType {
        LlmType::Ollama
    }
}

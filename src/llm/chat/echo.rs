use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;

use super::{ ChatClient, ChatError, FragmentStream };
use crate::llm::{ LlmConfig, LlmType };
use crate::models::chat::Turn;

const FRAGMENT_DELAY: Duration = Duration::from_millis(25);

/// Offline backend that replays the prompt back a word at a time.
#[derive(Debug, Default)]
pub struct EchoChatClient {
    delay: Duration,
}

impl EchoChatClient {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn from_config(_config: &LlmConfig) -> Result<Self, ChatError> {
        Ok(Self::new(FRAGMENT_DELAY))
    }
}

#[async_trait]
impl ChatClient for EchoChatClient {
    async fn stream_turn(
        &self,
        prompt: &str,
        history: &[Turn],
    ) -> Result<FragmentStream, ChatError> {
        let reply = format!("You said ({} earlier turns): {}", history.len(), prompt);
        let words: Vec<String> = reply.split_inclusive(' ').map(str::to_string).collect();
        let delay = self.delay;

        let stream = futures::stream::iter(words).then(move |word| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok::<_, ChatError>(word)
        });
        Ok(Box::pin(stream))
    }

    fn get_model(&self) -> String {
        "echo".to_string()
    }

    fn get_llm_type(&self) -> LlmType {
        LlmType::Echo
    }
}

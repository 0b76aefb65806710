use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;

use futures::{ Stream, StreamExt };
use log::{ debug, error, info };
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::framer::{ EventFramer, FrameSink };
use crate::config::prompt::PromptPolicy;
use crate::history;
use crate::llm::LlmConfig;
use crate::llm::chat::{ ChatClient, ChatError, new_client };
use crate::models::frame::Frame;

pub const DEFAULT_PROMPT: &str = "Say hello!";
const SINK_CAPACITY: usize = 32;

/// Raw body of one session response, already in wire format.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<String, Infallible>> + Send>>;

type ClientFactory = dyn Fn() -> Result<Arc<dyn ChatClient>, ChatError> + Send + Sync;

/// Query parameters of one streaming request, exactly as received.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionRequest {
    pub prompt: Option<String>,
    pub history: Option<String>,
}

impl SessionRequest {
    /// Lossy parse of a raw query string. Never fails.
    pub fn from_query(query: Option<&str>) -> Self {
        let mut request = Self::default();
        if let Some(query) = query {
            for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
                match key.as_ref() {
                    "prompt" => request.prompt = Some(value.into_owned()),
                    "history" => request.history = Some(value.into_owned()),
                    _ => {}
                }
            }
        }
        request
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub default_prompt: String,
    pub prompt_policy: PromptPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_prompt: DEFAULT_PROMPT.to_string(),
            prompt_policy: PromptPolicy::default(),
        }
    }
}

/// Serves one upstream turn per request. Holds no per-conversation state.
#[derive(Clone)]
pub struct SessionHandler {
    factory: Arc<ClientFactory>,
    settings: SessionSettings,
}

impl SessionHandler {
    /// Builds a fresh upstream client from `config` for every session.
    pub fn new(config: LlmConfig, settings: SessionSettings) -> Self {
        Self {
            factory: Arc::new(move || new_client(&config)),
            settings,
        }
    }

    /// Shares one already-built client across sessions.
    pub fn with_client(client: Arc<dyn ChatClient>, settings: SessionSettings) -> Self {
        Self {
            factory: Arc::new(move || Ok(client.clone())),
            settings,
        }
    }

    pub fn open(&self, request: SessionRequest) -> EventStream {
        self.open_with_cancel(request, CancellationToken::new())
    }

    /// Starts a session and returns its body.
    ///
    /// The session stops writing once `cancel` fires or the returned stream is
    /// dropped; dropping the stream does not cancel the caller's token.
    pub fn open_with_cancel(&self, request: SessionRequest, cancel: CancellationToken) -> EventStream {
        let session_id = Uuid::new_v4().to_string();
        let prompt = request.prompt
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| self.settings.default_prompt.clone());
        let history = history::decode(request.history.as_deref());
        info!(
            "Session {} opened: prompt_len={} history_turns={}",
            session_id,
            prompt.len(),
            history.len()
        );

        let client = match (self.factory)() {
            Ok(client) => {
                debug!("Session {} using {} model {}", session_id, client.get_llm_type(), client.get_model());
                client
            }
            Err(e) => {
                error!("Session {} could not start upstream: {}", session_id, e);
                let frame = Frame::error(e.to_string()).to_wire();
                return Box::pin(futures::stream::once(async move { Ok::<_, Infallible>(frame) }));
            }
        };

        let upstream_prompt = self.settings.prompt_policy.apply(&prompt);
        let session_cancel = cancel.child_token();
        let (tx, rx) = mpsc::channel(SINK_CAPACITY);
        let framer = EventFramer::new(FrameSink::new(tx, session_cancel.clone()));
        let drop_guard = session_cancel.clone().drop_guard();

        tokio::spawn(async move {
            let upstream = tokio::select! {
                biased;
                _ = session_cancel.cancelled() => {
                    info!("Session {} cancelled before upstream responded", session_id);
                    return;
                }
                upstream = client.stream_turn(&upstream_prompt, &history) => upstream,
            };
            framer.run(&session_id, &prompt, &history, upstream).await;
        });

        // Dropping the body (client disconnect) cancels the session.
        let body = ReceiverStream::new(rx).map(move |chunk| {
            let _held = &drop_guard;
            Ok::<_, Infallible>(chunk)
        });
        Box::pin(body)
    }
}

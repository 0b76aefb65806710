use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{ AtomicUsize, Ordering };
use std::sync::{ Arc, Mutex };

use super::{ ChatClient, ChatError, FragmentStream };
use crate::llm::LlmType;
use crate::models::chat::Turn;

/// Replays a fixed fragment script on every call.
///
/// Used to drive sessions deterministically. Items after the first `Err` in the
/// script are never yielded.
#[derive(Debug, Default)]
pub struct ScriptedChatClient {
    script: Vec<Result<String, ChatError>>,
    start_error: Option<ChatError>,
    hold_open: bool,
    calls: AtomicUsize,
    open_streams: Arc<AtomicUsize>,
    last_request: Mutex<Option<(String, Vec<Turn>)>>,
}

/// Counts a returned stream as open until the stream is dropped.
#[derive(Debug)]
struct StreamLease(Arc<AtomicUsize>);

impl StreamLease {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedChatClient {
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: fragments.into_iter().map(|f| Ok(f.into())).collect(),
            ..Self::default()
        }
    }

    /// Appends a terminal failure after the scripted fragments.
    pub fn then_fail(mut self, error: ChatError) -> Self {
        self.script.push(Err(error));
        self
    }

    /// Makes `stream_turn` itself fail before any fragment exists.
    pub fn failing_to_start(error: ChatError) -> Self {
        Self { start_error: Some(error), ..Self::default() }
    }

    /// Keeps the stream pending after the script instead of ending it.
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Streams handed out and not yet dropped.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<(String, Vec<Turn>)> {
        self.last_request.lock().ok().and_then(|guard| guard.clone())
    }
}

#[async_trait]
impl ChatClient for ScriptedChatClient {
    async fn stream_turn(
        &self,
        prompt: &str,
        history: &[Turn],
    ) -> Result<FragmentStream, ChatError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut guard) = self.last_request.lock() {
            *guard = Some((prompt.to_string(), history.to_vec()));
        }
        if let Some(e) = &self.start_error {
            return Err(e.clone());
        }

        let mut items = Vec::new();
        for item in &self.script {
            let failed = item.is_err();
            items.push(item.clone());
            if failed {
                break;
            }
        }
        let ends_in_failure = items.last().map(|i| i.is_err()).unwrap_or(false);

        let lease = StreamLease::new(&self.open_streams);
        let stream = futures::stream::iter(items).map(move |item| {
            let _lease = &lease;
            item
        });
        if self.hold_open && !ends_in_failure {
            Ok(Box::pin(stream.chain(futures::stream::pending())))
        } else {
            Ok(Box::pin(stream))
        }
    }

    fn get_model(&self) -> String {
        "scripted".to_string()
    }

    fn get_llm_type(&self) -> LlmType {
        LlmType::Echo
    }
}

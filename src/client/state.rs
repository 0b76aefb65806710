use chrono::Local;

use crate::history;
use crate::models::chat::{ History, Message, Sender };

pub const GREETING: &str = "Hello! I'm your AI assistant. How can I help you today?";
pub const TYPING_PLACEHOLDER: &str = "...";

/// Receives a notification after every change to the conversation.
pub trait StateObserver {
    fn state_changed(&mut self, state: &ConversationState);
}

impl<F> StateObserver for F where F: FnMut(&ConversationState) {
    fn state_changed(&mut self, state: &ConversationState) {
        self(state)
    }
}

/// What the client puts on the wire for one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingRequest {
    pub prompt: String,
    pub history: String,
}

/// Client-held conversation: the history baseline sent with the next request
/// and the rendered message list.
#[derive(Debug, Clone)]
pub struct ConversationState {
    messages: Vec<Message>,
    history: History,
    streaming: bool,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationState {
    pub fn new() -> Self {
        Self {
            messages: vec![Message {
                sender: Sender::Ai,
                content: GREETING.to_string(),
                timestamp: timestamp_now(),
            }],
            history: History::new(),
            streaming: false,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// The message currently being streamed into, if any.
    pub fn in_flight(&self) -> Option<&Message> {
        if !self.streaming {
            return None;
        }
        self.messages.last().filter(|m| !m.is_finalized())
    }

    /// Starts a turn: appends the user message and a typing placeholder.
    ///
    /// Returns `None` without touching the state when `input` is blank or a
    /// reply is still streaming.
    pub fn begin_send(&mut self, input: &str) -> Option<OutgoingRequest> {
        let prompt = input.trim();
        if prompt.is_empty() || self.streaming {
            return None;
        }

        self.messages.push(Message {
            sender: Sender::User,
            content: prompt.to_string(),
            timestamp: timestamp_now(),
        });
        self.messages.push(Message {
            sender: Sender::Ai,
            content: TYPING_PLACEHOLDER.to_string(),
            timestamp: String::new(),
        });
        self.streaming = true;

        Some(OutgoingRequest {
            prompt: prompt.to_string(),
            history: history::encode(&self.history),
        })
    }

    pub(crate) fn update_in_flight(&mut self, content: String) {
        if let Some(last) = self.in_flight_mut() {
            last.content = content;
        }
    }

    pub(crate) fn finalize_in_flight(&mut self, content: String) {
        if let Some(last) = self.in_flight_mut() {
            *last = Message {
                sender: Sender::Ai,
                content,
                timestamp: timestamp_now(),
            };
        }
        self.streaming = false;
    }

    pub(crate) fn adopt_history(&mut self, history: History) {
        self.history = history;
    }

    fn in_flight_mut(&mut self) -> Option<&mut Message> {
        if !self.streaming {
            return None;
        }
        self.messages.last_mut().filter(|m| !m.is_finalized())
    }
}

fn timestamp_now() -> String {
    Local::now().format("%H:%M").to_string()
}

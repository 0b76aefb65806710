//! Client side of one streaming connection.
//!
//! The reader owns the text accumulated for the in-flight reply and applies
//! frames, in arrival order, to a [`ConversationState`].

use log::{ debug, warn };

use super::sse::SseEvent;
use super::state::{ ConversationState, StateObserver };
use crate::history;
use crate::models::frame::{ ErrorPayload, Frame };

pub const ERROR_PLACEHOLDER: &str = "[Error occurred]";
pub const EMPTY_REPLY_PLACEHOLDER: &str = "[No response]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderPhase {
    Idle,
    Started,
    Accumulating,
    Completed,
    Finished,
    Failed,
}

/// Text gathered so far for the in-flight reply.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Accumulated {
    Fragments(Vec<String>),
    /// Authoritative text from the `complete` frame.
    Complete(String),
}

impl Accumulated {
    fn text(&self) -> String {
        match self {
            Accumulated::Fragments(lines) => lines.concat(),
            Accumulated::Complete(text) => text.clone(),
        }
    }
}

/// Whether the connection should stay open after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderStep {
    Continue,
    Closed,
}

#[derive(Debug)]
pub struct StreamReader {
    phase: ReaderPhase,
    accumulated: Accumulated,
}

impl Default for StreamReader {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamReader {
    pub fn new() -> Self {
        Self {
            phase: ReaderPhase::Idle,
            accumulated: Accumulated::Fragments(Vec::new()),
        }
    }

    pub fn phase(&self) -> ReaderPhase {
        self.phase
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.phase, ReaderPhase::Finished | ReaderPhase::Failed)
    }

    /// Maps a wire event to a frame. Unknown event names yield `None`.
    pub fn frame_from_event(event: SseEvent) -> Option<Frame> {
        match event.event.as_deref() {
            None | Some("message") | Some("data") => Some(Frame::Data(event.data)),
            Some("start") => Some(Frame::Start),
            Some("complete") => Some(Frame::Complete(event.data)),
            Some("end") => Some(Frame::End(event.data)),
            Some("error") => {
                let payload = serde_json::from_str::<ErrorPayload>(&event.data)
                    .unwrap_or(ErrorPayload { message: event.data });
                Some(Frame::Error(payload))
            }
            Some(other) => {
                debug!("Ignoring unknown event '{}'", other);
                None
            }
        }
    }

    pub fn apply_event(
        &mut self,
        event: SseEvent,
        state: &mut ConversationState,
        observer: &mut dyn StateObserver,
    ) -> ReaderStep {
        match Self::frame_from_event(event) {
            Some(frame) => self.apply(frame, state, observer),
            None if self.is_closed() => ReaderStep::Closed,
            None => ReaderStep::Continue,
        }
    }

    /// Applies one frame and notifies `observer` once.
    pub fn apply(
        &mut self,
        frame: Frame,
        state: &mut ConversationState,
        observer: &mut dyn StateObserver,
    ) -> ReaderStep {
        if self.is_closed() {
            return ReaderStep::Closed;
        }

        let step = match frame {
            Frame::Start => {
                self.phase = ReaderPhase::Started;
                ReaderStep::Continue
            }
            Frame::Data(line) => {
                if line.trim().is_empty() {
                    return ReaderStep::Continue;
                }
                if let Accumulated::Fragments(lines) = &mut self.accumulated {
                    lines.push(line);
                    self.phase = ReaderPhase::Accumulating;
                    state.update_in_flight(self.accumulated.text());
                }
                ReaderStep::Continue
            }
            Frame::Complete(text) => {
                self.accumulated = Accumulated::Complete(text.clone());
                self.phase = ReaderPhase::Completed;
                state.update_in_flight(text);
                ReaderStep::Continue
            }
            Frame::End(raw) => {
                match history::try_decode(&raw) {
                    Ok(history) => state.adopt_history(history),
                    Err(e) => warn!("Keeping previous history, end payload unreadable: {}", e),
                }
                let text = self.accumulated.text();
                let text = if text.trim().is_empty() { EMPTY_REPLY_PLACEHOLDER.to_string() } else { text };
                state.finalize_in_flight(text);
                self.phase = ReaderPhase::Finished;
                ReaderStep::Closed
            }
            Frame::Error(payload) => {
                warn!("Server reported stream error: {}", payload.message);
                self.finalize_failed(state);
                ReaderStep::Closed
            }
        };
        observer.state_changed(state);
        step
    }

    /// Transport failure or the stream ending without `end`.
    pub fn fail(&mut self, state: &mut ConversationState, observer: &mut dyn StateObserver) {
        if self.is_closed() {
            return;
        }
        self.finalize_failed(state);
        observer.state_changed(state);
    }

    fn finalize_failed(&mut self, state: &mut ConversationState) {
        let text = self.accumulated.text();
        let text = if text.trim().is_empty() { ERROR_PLACEHOLDER.to_string() } else { text };
        state.finalize_in_flight(text);
        self.phase = ReaderPhase::Failed;
    }
}

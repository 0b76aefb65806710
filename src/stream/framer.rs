//! Turns one upstream fragment sequence into protocol frames.
//!
//! Frame order is fixed: `start`, any number of `data`, then either
//! `complete` + `end` or a single `error`. Every exit path closes the sink
//! exactly once.

use futures::StreamExt;
use log::{ debug, error, info };
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::history;
use crate::llm::chat::{ ChatError, FragmentStream };
use crate::models::chat::Turn;
use crate::models::frame::{ normalize_newlines, Frame };

/// Blank line written after every fragment. It terminates the pending
/// default event on the client side.
pub const FRAGMENT_BOUNDARY: &str = "\n";

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    #[error("sink already closed")]
    Closed,
    #[error("session cancelled")]
    Cancelled,
}

/// Outgoing byte stream of one session.
pub struct FrameSink {
    tx: Option<mpsc::Sender<String>>,
    cancel: CancellationToken,
}

impl FrameSink {
    pub fn new(tx: mpsc::Sender<String>, cancel: CancellationToken) -> Self {
        Self { tx: Some(tx), cancel }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn write(&mut self, text: String) -> Result<(), SinkError> {
        if self.cancel.is_cancelled() {
            return Err(SinkError::Cancelled);
        }
        let tx = self.tx.as_ref().ok_or(SinkError::Closed)?;
        if tx.send(text).await.is_err() {
            // Receiver gone means the client went away.
            self.cancel.cancel();
            return Err(SinkError::Cancelled);
        }
        Ok(())
    }

    pub async fn send_frame(&mut self, frame: &Frame) -> Result<(), SinkError> {
        if frame.is_terminal() {
            debug!("Writing terminal {} frame", frame.name());
        }
        self.write(frame.to_wire()).await
    }

    /// Returns false if the sink had already been closed.
    pub fn close(&mut self) -> bool {
        self.tx.take().is_some()
    }
}

fn empty_response() -> ChatError {
    ChatError::Upstream("empty response".to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed {
        history: Vec<Turn>,
        text: String,
    },
    Failed(String),
    Cancelled,
}

impl From<SinkError> for SessionOutcome {
    fn from(_: SinkError) -> Self {
        SessionOutcome::Cancelled
    }
}

pub struct EventFramer {
    sink: FrameSink,
    accumulated: String,
    fragments: usize,
    data_frames: usize,
    trailing_cr: bool,
}

impl EventFramer {
    pub fn new(sink: FrameSink) -> Self {
        Self {
            sink,
            accumulated: String::new(),
            fragments: 0,
            data_frames: 0,
            trailing_cr: false,
        }
    }

    /// Drives the whole session and closes the sink.
    ///
    /// `upstream` is the result of starting the model call; an `Err` yields an
    /// error-only stream.
    pub async fn run(
        mut self,
        session_id: &str,
        prompt: &str,
        history: &[Turn],
        upstream: Result<FragmentStream, ChatError>,
    ) -> SessionOutcome {
        let outcome = match self.drive(prompt, history, upstream).await {
            Ok(outcome) => outcome,
            Err(e) => SessionOutcome::from(e),
        };
        self.sink.close();

        match &outcome {
            SessionOutcome::Completed { text, .. } => info!(
                "Session {} completed: {} fragments, {} data frames, {} chars",
                session_id,
                self.fragments,
                self.data_frames,
                text.len()
            ),
            SessionOutcome::Failed(message) => {
                error!("Session {} failed after {} fragments: {}", session_id, self.fragments, message)
            }
            SessionOutcome::Cancelled => {
                info!("Session {} abandoned by client after {} fragments", session_id, self.fragments)
            }
        }
        outcome
    }

    async fn drive(
        &mut self,
        prompt: &str,
        history: &[Turn],
        upstream: Result<FragmentStream, ChatError>,
    ) -> Result<SessionOutcome, SinkError> {
        let mut fragments = match upstream {
            Ok(stream) => stream,
            Err(e) => return self.fail(&e).await,
        };

        let cancel = self.sink.cancellation().clone();
        // `start` waits for the first item so a failure before any fragment
        // stays an error-only stream.
        let mut next = Self::next_fragment(&cancel, &mut fragments).await?;
        match &next {
            Some(Err(e)) => return self.fail(e).await,
            None => return self.fail(&empty_response()).await,
            Some(Ok(_)) => self.sink.send_frame(&Frame::Start).await?,
        }

        loop {
            match next {
                Some(Ok(fragment)) => self.forward(&fragment).await?,
                Some(Err(e)) => return self.fail(&e).await,
                None => break,
            }
            next = Self::next_fragment(&cancel, &mut fragments).await?;
        }
        // Releases the upstream connection before the closing frames.
        drop(fragments);

        if self.accumulated.trim().is_empty() {
            return self.fail(&empty_response()).await;
        }

        let text = std::mem::take(&mut self.accumulated);
        let updated = history::append_exchange(history, prompt, &text);
        self.sink.send_frame(&Frame::Complete(text.clone())).await?;
        self.sink.send_frame(&Frame::End(history::encode(&updated))).await?;

        Ok(SessionOutcome::Completed { history: updated, text })
    }

    async fn next_fragment(
        cancel: &CancellationToken,
        fragments: &mut FragmentStream,
    ) -> Result<Option<Result<String, ChatError>>, SinkError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SinkError::Cancelled),
            item = fragments.next() => Ok(item),
        }
    }

    async fn forward(&mut self, fragment: &str) -> Result<(), SinkError> {
        self.fragments += 1;
        // A CRLF may straddle two fragments.
        let fragment = match fragment.strip_prefix('\n') {
            Some(rest) if self.trailing_cr => rest,
            _ => fragment,
        };
        self.trailing_cr = fragment.ends_with('\r');
        let fragment = normalize_newlines(fragment);
        self.accumulated.push_str(&fragment);

        for line in fragment.split('\n') {
            if line.trim().is_empty() {
                continue;
            }
            self.data_frames += 1;
            self.sink.send_frame(&Frame::Data(line.to_string())).await?;
        }
        self.sink.write(FRAGMENT_BOUNDARY.to_string()).await
    }

    async fn fail(&mut self, err: &ChatError) -> Result<SessionOutcome, SinkError> {
        debug!("Upstream failure: {:?}", err);
        let message = err.to_string();
        self.sink.send_frame(&Frame::error(message.clone())).await?;
        Ok(SessionOutcome::Failed(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::chat::ChatClient;
    use crate::llm::chat::scripted::ScriptedChatClient;
    use std::time::Duration;
    use tokio_stream::wrappers::ReceiverStream;

    async fn run_script(
        client: ScriptedChatClient,
        history: &[Turn],
    ) -> (String, SessionOutcome) {
        let (tx, rx) = mpsc::channel(64);
        let framer = EventFramer::new(FrameSink::new(tx, CancellationToken::new()));
        let upstream = client.stream_turn("Hi", history).await;
        let outcome = framer.run("test", "Hi", history, upstream).await;
        let wire: Vec<String> = ReceiverStream::new(rx).collect().await;
        (wire.concat(), outcome)
    }

    #[tokio::test]
    async fn splits_fragments_into_data_lines() {
        let (wire, outcome) = run_script(ScriptedChatClient::new(["Hel", "lo\n", "World"]), &[]).await;
        let end = history::encode(&[Turn::user("Hi"), Turn::model("Hello\nWorld")]);
        let expected = format!(
            "event: start\ndata: Stream started\n\n\
             data: Hel\n\n\
             data: lo\n\n\
             data: World\n\n\
             event: complete\ndata: Hello\ndata: World\n\n\
             event: end\ndata: {}\n\n",
            end
        );
        assert_eq!(wire, expected);
        assert!(matches!(outcome, SessionOutcome::Completed { ref text, .. } if text == "Hello\nWorld"));
    }

    #[tokio::test]
    async fn blank_fragments_only_write_boundaries() {
        let (wire, _) = run_script(ScriptedChatClient::new(["", "  \n", "x"]), &[]).await;
        assert!(wire.starts_with("event: start\ndata: Stream started\n\n\n\ndata: x\n\n"));
    }

    #[tokio::test]
    async fn multi_line_fragment_yields_one_frame_per_line() {
        let (wire, _) = run_script(ScriptedChatClient::new(["a\nb\n\nc"]), &[]).await;
        assert!(wire.contains("data: a\ndata: b\ndata: c\n\n"));
    }

    #[tokio::test]
    async fn history_grows_by_one_exchange() {
        let before = vec![Turn::user("q"), Turn::model("a")];
        let (_, outcome) = run_script(ScriptedChatClient::new(["ok"]), &before).await;
        match outcome {
            SessionOutcome::Completed { history, .. } => {
                assert_eq!(history.len(), before.len() + 2);
                assert_eq!(history[2], Turn::user("Hi"));
                assert_eq!(history[3], Turn::model("ok"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn failure_before_first_fragment_is_error_only() {
        let client = ScriptedChatClient::failing_to_start(ChatError::Upstream("denied".into()));
        let (wire, outcome) = run_script(client, &[]).await;
        assert_eq!(wire, "event: error\ndata: {\"message\":\"upstream error: denied\"}\n\n");
        assert_eq!(outcome, SessionOutcome::Failed("upstream error: denied".into()));
    }

    #[tokio::test]
    async fn failure_mid_stream_keeps_sent_frames() {
        let client = ScriptedChatClient::new(["one"]).then_fail(ChatError::Request("reset".into()));
        let (wire, outcome) = run_script(client, &[]).await;
        assert!(wire.starts_with("event: start\n"));
        assert!(wire.contains("data: one\n\n"));
        assert!(wire.ends_with("event: error\ndata: {\"message\":\"upstream request failed: reset\"}\n\n"));
        assert!(!wire.contains("event: complete"));
        assert!(matches!(outcome, SessionOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn failure_as_first_item_is_error_only() {
        let client = ScriptedChatClient::new(Vec::<String>::new())
            .then_fail(ChatError::Upstream("quota".into()));
        let (wire, outcome) = run_script(client, &[]).await;
        assert_eq!(wire, "event: error\ndata: {\"message\":\"upstream error: quota\"}\n\n");
        assert_eq!(outcome, SessionOutcome::Failed("upstream error: quota".into()));
    }

    #[tokio::test]
    async fn stream_without_fragments_is_empty_response_error() {
        let (wire, outcome) = run_script(ScriptedChatClient::new(Vec::<String>::new()), &[]).await;
        assert_eq!(wire, "event: error\ndata: {\"message\":\"upstream error: empty response\"}\n\n");
        assert!(matches!(outcome, SessionOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn blank_reply_fails_instead_of_completing() {
        let (wire, outcome) = run_script(ScriptedChatClient::new(["", " \n "]), &[]).await;
        assert!(wire.starts_with("event: start\n"));
        assert!(wire.ends_with("event: error\ndata: {\"message\":\"upstream error: empty response\"}\n\n"));
        assert!(!wire.contains("event: complete"));
        assert!(!wire.contains("event: end"));
        assert_eq!(outcome, SessionOutcome::Failed("upstream error: empty response".into()));
    }

    #[tokio::test]
    async fn carriage_returns_are_normalized_everywhere() {
        let (wire, outcome) = run_script(ScriptedChatClient::new(["a\r\nb", "x\ry", "1\r", "\n2"]), &[]).await;
        assert!(!wire.contains('\r'));
        assert!(wire.contains("data: a\ndata: b\n\ndata: x\ndata: y\n\ndata: 1\n\ndata: 2\n\n"));
        assert!(wire.contains("event: complete\ndata: a\ndata: bx\ndata: y1\ndata: 2\n\n"));
        match outcome {
            SessionOutcome::Completed { history, text } => {
                assert_eq!(text, "a\nbx\ny1\n2");
                assert_eq!(history[1], Turn::model("a\nbx\ny1\n2"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn closed_sink_rejects_writes() {
        let (tx, _rx) = mpsc::channel(4);
        let mut sink = FrameSink::new(tx, CancellationToken::new());
        assert!(sink.close());
        assert!(!sink.close());
        assert_eq!(sink.send_frame(&Frame::Start).await, Err(SinkError::Closed));
    }

    #[tokio::test]
    async fn cancellation_abandons_pending_upstream() {
        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let framer = EventFramer::new(FrameSink::new(tx, cancel.clone()));
        let client = ScriptedChatClient::new(["partial"]).hold_open();
        let upstream = client.stream_turn("Hi", &[]).await;

        let task = tokio::spawn(async move {
            let history: Vec<Turn> = Vec::new();
            framer.run("test", "Hi", &history, upstream).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("framer stops once cancelled")
            .expect("task does not panic");
        assert_eq!(outcome, SessionOutcome::Cancelled);

        let wire: Vec<String> = ReceiverStream::new(rx).collect().await;
        let wire = wire.concat();
        assert!(wire.contains("data: partial\n"));
        assert!(!wire.contains("event: complete"));
        assert!(!wire.contains("event: error"));
    }

    #[tokio::test]
    async fn dropped_receiver_counts_as_cancellation() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let cancel = CancellationToken::new();
        let framer = EventFramer::new(FrameSink::new(tx, cancel.clone()));
        let client = ScriptedChatClient::new(["a", "b"]);
        let upstream = client.stream_turn("Hi", &[]).await;
        let outcome = framer.run("test", "Hi", &[], upstream).await;
        assert_eq!(outcome, SessionOutcome::Cancelled);
        assert!(cancel.is_cancelled());
    }
}

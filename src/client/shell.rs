//! Line-oriented terminal front end for a session server.

use std::io::Write;

use log::debug;
use tokio::io::{ AsyncBufReadExt, BufReader };

use super::ClientError;
use super::http::{ SendOutcome, StreamClient };
use super::state::{ ConversationState, StateObserver };
use crate::models::chat::Sender;

/// Prints the in-flight reply as it grows.
#[derive(Default)]
struct TerminalRenderer {
    printed: String,
}

impl TerminalRenderer {
    /// Text to append to the terminal for `content`, redrawing when the new
    /// content does not extend what is already on screen.
    fn delta(&mut self, content: &str) -> String {
        let out = match content.strip_prefix(self.printed.as_str()) {
            Some(rest) => rest.to_string(),
            None => format!("\n{}", content),
        };
        self.printed = content.to_string();
        out
    }
}

impl StateObserver for TerminalRenderer {
    fn state_changed(&mut self, state: &ConversationState) {
        let last = match state.messages().last() {
            Some(last) if last.sender == Sender::Ai => last,
            _ => return,
        };
        if last.content == super::state::TYPING_PLACEHOLDER && !last.is_finalized() {
            return;
        }

        let mut stdout = std::io::stdout();
        let _ = write!(stdout, "{}", self.delta(&last.content));
        if last.is_finalized() {
            let _ = writeln!(stdout, "\n[{}]", last.timestamp);
            self.printed.clear();
        }
        let _ = stdout.flush();
    }
}

pub async fn run_chat(server_url: &str) -> Result<(), ClientError> {
    let client = StreamClient::new(server_url)?;
    let mut state = ConversationState::new();
    let mut renderer = TerminalRenderer::default();

    if let Some(greeting) = state.messages().first() {
        println!("ai> {}", greeting.content);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you> ");
        std::io::stdout().flush()?;
        let line = match lines.next_line().await? {
            Some(line) => line,
            None => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        print!("ai> ");
        std::io::stdout().flush()?;
        match client.send(&mut state, &line, &mut renderer).await {
            SendOutcome::Completed => debug!("History now has {} turns", state.history().len()),
            SendOutcome::Failed(reason) => debug!("Turn failed: {}", reason),
            SendOutcome::Rejected => {}
        }
    }
    Ok(())
}

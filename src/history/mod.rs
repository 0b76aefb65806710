//! Conversation history codec.
//!
//! History travels by value: the client sends it as the `history` query
//! parameter and receives the updated list in the `end` frame. The encoding is
//! the upstream chat format, a JSON array of `{ "role", "parts": [{ "text" }] }`.

use crate::models::chat::{ History, Role, Turn };
use log::debug;
use serde::{ Deserialize, Serialize };
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct WireTurn {
    role: Role,
    parts: Vec<WirePart>,
}

#[derive(Serialize, Deserialize)]
struct WirePart {
    text: String,
}

pub fn encode(history: &[Turn]) -> String {
    let wire: Vec<WireTurn> = history
        .iter()
        .map(|turn| WireTurn {
            role: turn.role,
            parts: vec![WirePart { text: turn.text.clone() }],
        })
        .collect();
    // Serializing plain strings and enums cannot fail.
    serde_json::to_string(&wire).unwrap_or_else(|_| "[]".to_string())
}

/// Strict decode. Unknown roles or any structural defect reject the whole input.
pub fn try_decode(raw: &str) -> Result<History, HistoryError> {
    let wire: Vec<WireTurn> = serde_json::from_str(raw)?;
    Ok(wire
        .into_iter()
        .map(|turn| Turn {
            role: turn.role,
            text: turn.parts.into_iter().map(|p| p.text).collect(),
        })
        .collect())
}

/// Lenient decode used by the server. Missing or malformed input is an empty history.
pub fn decode(raw: Option<&str>) -> History {
    let raw = match raw {
        Some(r) if !r.trim().is_empty() => r,
        _ => return History::new(),
    };
    match try_decode(raw) {
        Ok(history) => history,
        Err(e) => {
            debug!("Discarding malformed history ({} bytes): {}", raw.len(), e);
            History::new()
        }
    }
}

/// Appends the user turn and then the model turn.
pub fn append_exchange(history: &[Turn], prompt: &str, response: &str) -> History {
    let mut updated = history.to_vec();
    updated.push(Turn::user(prompt));
    updated.push(Turn::model(response));
    updated
}

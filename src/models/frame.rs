use serde::{ Serialize, Deserialize };

pub const START_PAYLOAD: &str = "Stream started";

/// Payload of the `error` frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// One typed unit of the server-to-client event stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Start,
    Data(String),
    Complete(String),
    /// Encoded updated history.
    End(String),
    Error(ErrorPayload),
}

impl Frame {
    pub fn error(message: impl Into<String>) -> Self {
        Frame::Error(ErrorPayload { message: message.into() })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Frame::Start => "start",
            Frame::Data(_) => "data",
            Frame::Complete(_) => "complete",
            Frame::End(_) => "end",
            Frame::Error(_) => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Frame::End(_) | Frame::Error(_))
    }

    /// Wire text of the frame.
    ///
    /// `data` frames are the unnamed default event and carry no trailing blank
    /// line; the framer writes the per-fragment boundary that terminates them.
    /// Every other frame is a complete event. Multi-line payloads become one
    /// `data:` field per line.
    pub fn to_wire(&self) -> String {
        match self {
            Frame::Data(line) => data_fields(line),
            Frame::Start => named_event("start", START_PAYLOAD),
            Frame::Complete(text) => named_event("complete", text),
            Frame::End(history) => named_event("end", history),
            Frame::Error(payload) => {
                let json = serde_json::to_string(payload)
                    .unwrap_or_else(|_| r#"{"message":"unknown error"}"#.to_string());
                named_event("error", &json)
            }
        }
    }
}

fn named_event(name: &str, payload: &str) -> String {
    format!("event: {}\n{}\n", name, data_fields(payload))
}

/// Rewrites `\r\n` and lone `\r` as `\n`. SSE readers treat all three as
/// line terminators, so a raw CR can never travel inside a `data:` field.
pub fn normalize_newlines(text: &str) -> String {
    if !text.contains('\r') {
        return text.to_string();
    }
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn data_fields(payload: &str) -> String {
    let mut out = String::new();
    for line in normalize_newlines(payload).split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out
}

pub mod http;
pub mod reader;
pub mod shell;
pub mod sse;
pub mod state;

pub use http::{ SendOutcome, StreamClient };
pub use reader::{ ReaderStep, StreamReader };
pub use state::{ ConversationState, OutgoingRequest, StateObserver };

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid server url: {0}")]
    Url(#[from] url::ParseError),
    #[error("terminal IO error: {0}")]
    Io(#[from] std::io::Error),
}

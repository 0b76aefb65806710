use futures::StreamExt;
use log::{ info, warn };
use url::Url;

use super::ClientError;
use super::reader::{ ReaderPhase, ReaderStep, StreamReader };
use super::sse::SseStreamParser;
use super::state::{ ConversationState, OutgoingRequest, StateObserver };

pub const GENERATE_ROUTE: &str = "/api/generate";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank input or a reply already streaming; nothing was sent.
    Rejected,
    Completed,
    Failed(String),
}

/// Issues one streaming request per user turn against a session server.
#[derive(Clone)]
pub struct StreamClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl StreamClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let endpoint = Url::parse(base_url)?.join(GENERATE_ROUTE)?;
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint,
        })
    }

    pub fn request_url(&self, request: &OutgoingRequest) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .clear()
            .append_pair("prompt", &request.prompt)
            .append_pair("history", &request.history);
        url
    }

    /// Sends `input` as the next turn and applies the reply to `state`.
    ///
    /// Every transport problem is folded into the conversation; the in-flight
    /// message always ends finalized.
    pub async fn send(
        &self,
        state: &mut ConversationState,
        input: &str,
        observer: &mut dyn StateObserver,
    ) -> SendOutcome {
        let request = match state.begin_send(input) {
            Some(request) => request,
            None => return SendOutcome::Rejected,
        };
        observer.state_changed(state);

        let mut reader = StreamReader::new();
        let url = self.request_url(&request);
        info!("Opening stream to {}", self.endpoint);

        let response = match self.http.get(url).send().await.and_then(|r| r.error_for_status()) {
            Ok(response) => response,
            Err(e) => {
                warn!("Stream request failed: {}", e);
                reader.fail(state, observer);
                return SendOutcome::Failed(e.to_string());
            }
        };

        let mut parser = SseStreamParser::default();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Stream interrupted: {}", e);
                    reader.fail(state, observer);
                    return SendOutcome::Failed(e.to_string());
                }
            };
            for event in parser.feed(&bytes) {
                if reader.apply_event(event, state, observer) == ReaderStep::Closed {
                    // Dropping the body closes the connection.
                    return outcome_of(&reader);
                }
            }
        }

        warn!("Stream closed before the end event");
        reader.fail(state, observer);
        SendOutcome::Failed("stream closed before completion".to_string())
    }
}

fn outcome_of(reader: &StreamReader) -> SendOutcome {
    match reader.phase() {
        ReaderPhase::Finished => SendOutcome::Completed,
        _ => SendOutcome::Failed("server reported an error".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_url_encodes_prompt_and_history() {
        let client = StreamClient::new("http://127.0.0.1:4000").expect("valid url");
        let url = client.request_url(&OutgoingRequest {
            prompt: "a & b".into(),
            history: "[]".into(),
        });
        assert_eq!(url.path(), GENERATE_ROUTE);
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs, vec![
            ("prompt".to_string(), "a & b".to_string()),
            ("history".to_string(), "[]".to_string()),
        ]);
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(matches!(StreamClient::new("not a url"), Err(ClientError::Url(_))));
    }

    #[tokio::test]
    async fn send_while_streaming_issues_no_request() {
        // Port 9 is discard; no request must be attempted anyway.
        let client = StreamClient::new("http://127.0.0.1:9").expect("valid url");
        let mut state = ConversationState::new();
        state.begin_send("first").expect("accepted");
        let before = state.messages().to_vec();
        let mut notified = 0;
        let outcome = client.send(&mut state, "second", &mut |_: &ConversationState| notified += 1).await;
        assert_eq!(outcome, SendOutcome::Rejected);
        assert_eq!(notified, 0);
        assert_eq!(state.messages(), &before[..]);
    }
}

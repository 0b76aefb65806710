use std::sync::Arc;

use axum::body::{ to_bytes, Body };
use axum::http::{ header, Request, StatusCode };
use stream_chat::client::sse::SseStreamParser;
use stream_chat::history;
use stream_chat::llm::LlmConfig;
use stream_chat::llm::chat::ChatError;
use stream_chat::llm::chat::scripted::ScriptedChatClient;
use stream_chat::models::chat::Turn;
use stream_chat::server::api::router;
use stream_chat::stream::{ SessionHandler, SessionSettings };
use tower::ServiceExt;

async fn get(handler: SessionHandler, uri: &str) -> (StatusCode, axum::http::HeaderMap, String) {
    let response = router(handler)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
        .await
        .expect("router is infallible");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    (status, headers, String::from_utf8(bytes.to_vec()).expect("utf-8 body"))
}

fn scripted(fragments: &[&str]) -> (Arc<ScriptedChatClient>, SessionHandler) {
    let client = Arc::new(ScriptedChatClient::new(fragments.iter().copied()));
    let handler = SessionHandler::with_client(client.clone(), SessionSettings::default());
    (client, handler)
}

#[tokio::test]
async fn streams_event_frames_with_stream_headers() {
    let (_, handler) = scripted(&["Hel", "lo\n", "World"]);
    let (status, headers, body) = get(handler, "/api/generate?prompt=Hi").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache");

    let events = SseStreamParser::parse_frames(&body);
    let names: Vec<Option<&str>> = events.iter().map(|e| e.event.as_deref()).collect();
    assert_eq!(names, vec![Some("start"), None, None, None, Some("complete"), Some("end")]);
    let data: Vec<&str> = events[1..4].iter().map(|e| e.data.as_str()).collect();
    assert_eq!(data, vec!["Hel", "lo", "World"]);
    assert_eq!(events[4].data, "Hello\nWorld");
    assert_eq!(
        history::decode(Some(events[5].data.as_str())),
        vec![Turn::user("Hi"), Turn::model("Hello\nWorld")]
    );
}

#[tokio::test]
async fn threads_supplied_history_through_the_turn() {
    let (client, handler) = scripted(&["fine"]);
    let before = vec![Turn::user("hello"), Turn::model("hi there")];
    let uri = format!(
        "/api/generate?prompt=how%20are%20you&history={}",
        url::form_urlencoded::byte_serialize(history::encode(&before).as_bytes()).collect::<String>()
    );
    let (_, _, body) = get(handler, &uri).await;

    let (_, sent_history) = client.last_request().expect("upstream called");
    assert_eq!(sent_history, before);

    let end = SseStreamParser::parse_frames(&body)
        .into_iter()
        .find(|e| e.event.as_deref() == Some("end"))
        .expect("end event");
    let after = history::decode(Some(end.data.as_str()));
    assert_eq!(after.len(), before.len() + 2);
    assert_eq!(&after[..2], &before[..]);
    assert_eq!(after[2], Turn::user("how are you"));
    assert_eq!(after[3], Turn::model("fine"));
}

#[tokio::test]
async fn garbage_history_and_missing_prompt_still_stream() {
    let (client, handler) = scripted(&["ok"]);
    let (status, _, body) = get(handler, "/api/generate?history=%7Bbroken").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("event: end"));
    let (prompt, history) = client.last_request().expect("upstream called");
    assert_eq!(prompt, "Say hello!");
    assert!(history.is_empty());
}

#[tokio::test]
async fn upstream_rejection_is_a_single_error_event() {
    let client = Arc::new(ScriptedChatClient::failing_to_start(ChatError::Status {
        status: 403,
        body: "forbidden".into(),
    }));
    let handler = SessionHandler::with_client(client, SessionSettings::default());
    let (status, _, body) = get(handler, "/api/generate?prompt=x").await;

    assert_eq!(status, StatusCode::OK);
    let events = SseStreamParser::parse_frames(&body);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event.as_deref(), Some("error"));
    let payload: serde_json::Value = serde_json::from_str(&events[0].data).expect("json payload");
    assert!(payload["message"].as_str().unwrap_or_default().contains("403"));
}

#[tokio::test]
async fn unbuildable_backend_never_faults_the_endpoint() {
    // Gemini without an API key cannot be constructed.
    let handler = SessionHandler::new(LlmConfig::default(), SessionSettings::default());
    let (status, headers, body) = get(handler, "/api/generate").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
    let events = SseStreamParser::parse_frames(&body);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event.as_deref(), Some("error"));
}

#[tokio::test]
async fn health_probe_answers() {
    let (_, handler) = scripted(&[]);
    let (status, _, body) = get(handler, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

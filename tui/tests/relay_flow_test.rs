//! Integration Tests for the Terminal Surface against a Relay
//!
//! A wiremock server stands in for the relay daemon and answers
//! `POST /api/chat` with a framed body. The tests drive [`App`] the way the
//! event loop does (submit, then process events) and check the transcript
//! and the files written for videos.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vidchat_core::{encode_base64, ChatRequest, Message};
use vidchat_tui::{
    App, AppConfig, ArtifactPhase, ClientError, RelayClient, RequestPhase, StreamEvent,
};

// ============================================================================
// Helpers
// ============================================================================

fn relay_body(frames: &[String]) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("x-vercel-ai-data-stream", "v1")
        .set_body_raw(frames.concat(), "text/plain; charset=utf-8")
}

fn text(t: &str) -> String {
    format!("0:{}\n", serde_json::to_string(t).unwrap())
}

fn video(bytes: &[u8]) -> String {
    format!("2:[{{\"video\":\"{}\"}}]\n", encode_base64(bytes))
}

fn finish(reason: &str) -> String {
    format!("d:{{\"finishReason\":\"{reason}\"}}\n")
}

fn app_for(server: &MockServer, artifact_dir: &std::path::Path) -> App {
    let config = AppConfig {
        model: "llama3".to_string(),
        user_name: "jane".to_string(),
        artifact_dir: artifact_dir.to_path_buf(),
    };
    App::new(config, RelayClient::new(server.uri()).unwrap())
}

/// Process events until no reply is streaming and no video is being written
async fn settle(app: &mut App) {
    while app.transcript().is_streaming() || app.transcript().is_fetching() {
        timeout(Duration::from_secs(5), app.process_next())
            .await
            .expect("relay events stalled");
    }
}

// ============================================================================
// Replies
// ============================================================================

#[tokio::test]
async fn test_hello_becomes_single_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(serde_json::json!({
            "selectedModel": "llama3",
            "messages": [{"role": "user", "content": "Hi"}]
        })))
        .respond_with(relay_body(&[text("Hel"), text("lo!"), finish("stop")]))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut app = app_for(&server, dir.path());
    app.submit("Hi");
    settle(&mut app).await;

    let transcript = app.transcript();
    assert_eq!(transcript.phase(), RequestPhase::Finished);
    assert_eq!(transcript.artifact_phase(), ArtifactPhase::None);
    assert_eq!(
        transcript.history(),
        vec![Message::user("Hi"), Message::assistant("Hello!")]
    );
}

#[tokio::test]
async fn test_video_is_written_and_attached() {
    let clip: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(relay_body(&[text("Here you go"), video(&clip), finish("stop")]))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut app = app_for(&server, dir.path());
    app.submit("Show me");
    settle(&mut app).await;

    let transcript = app.transcript();
    assert_eq!(transcript.artifact_phase(), ArtifactPhase::Ready);

    let reply = &transcript.entries()[1];
    assert_eq!(reply.content, "Here you go");
    assert_eq!(reply.attachments.len(), 1);
    assert!(app.artifact_dir().starts_with(dir.path()));
    assert_eq!(reply.attachments[0].path, app.artifact_dir().join("video-1-0.webm"));
    assert_eq!(std::fs::read(&reply.attachments[0].path).unwrap(), clip);
}

#[tokio::test]
async fn test_reply_without_video_has_no_attachment() {
    // What the relay sends when its video backend failed
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(relay_body(&[text("Just text"), finish("stop")]))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut app = app_for(&server, dir.path());
    app.submit("Hi");
    settle(&mut app).await;

    let reply = &app.transcript().entries()[1];
    assert_eq!(reply.content, "Just text");
    assert!(reply.attachments.is_empty());
    assert_eq!(app.transcript().artifact_phase(), ArtifactPhase::None);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_mid_stream_error_keeps_partial_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(relay_body(&[
            text("Partial"),
            "3:\"model crashed\"\n".to_string(),
            finish("error"),
        ]))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut app = app_for(&server, dir.path());
    app.submit("Hi");
    settle(&mut app).await;

    let reply = &app.transcript().entries()[1];
    assert_eq!(app.transcript().phase(), RequestPhase::Errored);
    assert_eq!(reply.content, "Partial");
    assert_eq!(reply.error.as_deref(), Some("model crashed"));
}

#[tokio::test]
async fn test_new_submit_retires_slow_stream() {
    let server = MockServer::start().await;
    // The follow-up also carries "slow" first, so it must win over the slow mock
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(serde_json::json!({
            "messages": [{"role": "user", "content": "slow"}, {"role": "user", "content": "fast"}]
        })))
        .respond_with(relay_body(&[text("quick"), finish("stop")]))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(serde_json::json!({
            "messages": [{"role": "user", "content": "slow"}]
        })))
        .respond_with(
            relay_body(&[text("late"), finish("stop")]).set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut app = app_for(&server, dir.path());
    app.submit("slow");
    app.submit("fast");
    settle(&mut app).await;

    let entries = app.transcript().entries();
    assert_eq!(entries.len(), 4);
    assert!(entries[1].stopped);
    assert_eq!(entries[1].content, "");
    assert_eq!(entries[3].content, "quick");
    assert_eq!(app.transcript().phase(), RequestPhase::Finished);
}

// ============================================================================
// Relay errors
// ============================================================================

#[tokio::test]
async fn test_rejected_request_shows_relay_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(502)
                .set_body_json(serde_json::json!({"error": "model backend unreachable"})),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut app = app_for(&server, dir.path());
    app.submit("Hi");
    settle(&mut app).await;

    let error = app.transcript().entries()[1].error.clone().unwrap();
    assert!(error.contains("502"), "{error}");
    assert!(error.contains("model backend unreachable"), "{error}");
}

#[tokio::test]
async fn test_chat_status_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(serde_json::json!({"error": "no messages"})),
        )
        .mount(&server)
        .await;

    let client = RelayClient::new(server.uri()).unwrap();
    let (tx, _rx) = mpsc::channel(8);
    let request = ChatRequest::new("llama3", vec![]);

    let err = client
        .chat(app_request_id(), &request, tx)
        .await
        .unwrap_err();
    match err {
        ClientError::Status { status, message } => {
            assert_eq!(status, 400);
            assert_eq!(message, "no messages");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_chat_streams_events() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(relay_body(&[text("a"), text("b"), finish("stop")]))
        .mount(&server)
        .await;

    let client = RelayClient::new(server.uri()).unwrap();
    let (tx, mut rx) = mpsc::channel(8);
    let request = ChatRequest::new("llama3", vec![Message::user("Hi")]);
    let _handle = client.chat(app_request_id(), &request, tx).await.unwrap();

    let mut events = Vec::new();
    while let Some(event) = timeout(Duration::from_secs(5), rx.recv()).await.unwrap() {
        events.push(event.event);
    }
    assert_eq!(
        events,
        vec![
            StreamEvent::Text("a".to_string()),
            StreamEvent::Text("b".to_string()),
            StreamEvent::Closed,
        ]
    );
}

#[tokio::test]
async fn test_models_listing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [{"name": "llama3", "parameters": "8B"}, {"name": "phi3"}]
        })))
        .mount(&server)
        .await;

    let client = RelayClient::new(server.uri()).unwrap();
    let models = client.models().await.unwrap();

    let names: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["llama3", "phi3"]);
    assert_eq!(models[0].parameters.as_deref(), Some("8B"));
}

/// A request id obtained the way the app obtains one
fn app_request_id() -> vidchat_tui::RequestId {
    vidchat_tui::Transcript::new().submit("x")
}

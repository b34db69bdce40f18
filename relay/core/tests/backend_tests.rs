//! HTTP backend integration tests
//!
//! Runs the Ollama and video backends against wiremock servers, then wires
//! both into a relay for an end-to-end pass.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use pretty_assertions::assert_eq;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vidchat_core::{
    BackendError, ChatBackend, ChatRequest, FrameDecoder, HttpVideoBackend, Message,
    OllamaBackend, Relay, RelayConfig, SideChannelPayload, StreamPart, StreamingToken,
    VideoBackend, VideoError,
};

const HELLO_NDJSON: &str = concat!(
    "{\"model\":\"llama3.2\",\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n",
    "{\"model\":\"llama3.2\",\"message\":{\"role\":\"assistant\",\"content\":\"lo!\"},\"done\":false}\n",
    "{\"model\":\"llama3.2\",\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
);

async fn ollama_server(body: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;
    server
}

async fn drain(mut rx: tokio::sync::mpsc::Receiver<StreamingToken>) -> Vec<StreamingToken> {
    let mut tokens = Vec::new();
    while let Some(token) = rx.recv().await {
        tokens.push(token);
    }
    tokens
}

// ============================================================================
// Ollama
// ============================================================================

#[tokio::test]
async fn test_ollama_streams_tokens() {
    let server = ollama_server(HELLO_NDJSON).await;
    let backend = OllamaBackend::new(server.uri()).unwrap();

    let request = ChatRequest::new("llama3.2", vec![Message::user("Hi")]);
    let rx = backend.send_streaming(&request).await.unwrap();

    assert_eq!(
        drain(rx).await,
        vec![
            StreamingToken::Token("Hel".to_string()),
            StreamingToken::Token("lo!".to_string()),
            StreamingToken::Complete {
                message: "Hello!".to_string()
            },
        ]
    );
}

#[tokio::test]
async fn test_ollama_request_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_json(serde_json::json!({
            "model": "llama3.2",
            "messages": [
                { "role": "user", "content": "Hi" },
                { "role": "assistant", "content": "Hello!" },
                { "role": "user", "content": "Again" },
            ],
            "stream": true,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string(HELLO_NDJSON))
        .expect(1)
        .mount(&server)
        .await;

    let backend = OllamaBackend::new(server.uri()).unwrap();
    let request = ChatRequest::new(
        "llama3.2",
        vec![
            Message::user("Hi"),
            Message::assistant("Hello!"),
            Message::user("Again"),
        ],
    );

    let rx = backend.send_streaming(&request).await.unwrap();
    assert_eq!(drain(rx).await.len(), 3);
}

#[tokio::test]
async fn test_ollama_status_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(404).set_body_string("{\"error\":\"model 'x' not found\"}"),
        )
        .mount(&server)
        .await;

    let backend = OllamaBackend::new(server.uri()).unwrap();
    let request = ChatRequest::new("x", vec![Message::user("Hi")]);

    let err = backend.send_streaming(&request).await.unwrap_err();
    assert!(matches!(err, BackendError::Status { status: 404, ref body } if body.contains("not found")));
}

#[tokio::test]
async fn test_ollama_unreachable() {
    // Bind then drop a server so the port is closed
    let uri = {
        let server = MockServer::start().await;
        server.uri()
    };
    let backend = OllamaBackend::new(uri).unwrap();
    let request = ChatRequest::new("llama3.2", vec![Message::user("Hi")]);

    let err = backend.send_streaming(&request).await.unwrap_err();
    assert!(matches!(err, BackendError::Transport(_)));
    assert!(!backend.health_check().await);
}

#[tokio::test]
async fn test_ollama_list_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [
                {
                    "name": "llama3.2:latest",
                    "size": 2_019_393_189_u64,
                    "details": { "parameter_size": "3.2B" }
                },
                { "name": "mistral:7b" },
                { "size": 1 }
            ]
        })))
        .mount(&server)
        .await;

    let backend = OllamaBackend::new(server.uri()).unwrap();
    let models = backend.list_models().await.unwrap();

    assert_eq!(models.len(), 2);
    assert_eq!(models[0].name, "llama3.2:latest");
    assert_eq!(models[0].size, Some(2_019_393_189));
    assert_eq!(models[0].parameters.as_deref(), Some("3.2B"));
    assert_eq!(models[1].name, "mistral:7b");
    assert!(backend.has_model("mistral:7b").await.unwrap());
    assert!(backend.health_check().await);
}

// ============================================================================
// Video
// ============================================================================

#[tokio::test]
async fn test_video_backend_returns_bytes() {
    let server = MockServer::start().await;
    let clip: Vec<u8> = vec![0x1a, 0x45, 0xdf, 0xa3, 0x00, 0xff, 0x80];
    Mock::given(method("POST"))
        .and(header("accept", "application/json"))
        .and(body_json(serde_json::json!({ "text": "Hi" })))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(clip.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let backend = HttpVideoBackend::new(server.uri(), Duration::from_secs(5)).unwrap();
    let bytes = backend.generate("Hi").await.unwrap();

    assert_eq!(bytes.as_ref(), clip.as_slice());
}

#[tokio::test]
async fn test_video_backend_status_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let backend = HttpVideoBackend::new(server.uri(), Duration::from_secs(5)).unwrap();
    let err = backend.generate("Hi").await.unwrap_err();

    assert!(matches!(err, VideoError::Status { status: 500, .. }));
}

#[tokio::test]
async fn test_video_backend_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let backend = HttpVideoBackend::new(server.uri(), Duration::from_millis(100)).unwrap();
    let err = backend.generate("Hi").await.unwrap_err();

    assert!(matches!(err, VideoError::Timeout(_)));
}

// ============================================================================
// End to end
// ============================================================================

async fn relay_frames(relay: &Relay) -> Vec<StreamPart> {
    let request = ChatRequest::new("llama3.2", vec![Message::user("Hi")]);
    let mut stream = relay.open(request).await.unwrap();

    let mut decoder = FrameDecoder::new();
    let mut frames = Vec::new();
    while let Some(chunk) = stream.next().await {
        decoder.push(&chunk.unwrap());
        while let Some(frame) = decoder.decode().unwrap() {
            frames.push(frame);
        }
    }
    frames
}

#[tokio::test]
async fn test_end_to_end_with_video() {
    let ollama = ollama_server(HELLO_NDJSON).await;
    let video = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"clip-bytes".to_vec()))
        .mount(&video)
        .await;

    let relay = Relay::new(
        Arc::new(OllamaBackend::new(ollama.uri()).unwrap()),
        Some(Arc::new(
            HttpVideoBackend::new(video.uri(), Duration::from_secs(5)).unwrap(),
        )),
        RelayConfig::default(),
    );

    let frames = relay_frames(&relay).await;

    assert_eq!(frames.len(), 4);
    assert_eq!(frames[0], StreamPart::Text("Hel".to_string()));
    assert_eq!(frames[1], StreamPart::Text("lo!".to_string()));
    let StreamPart::Data(values) = &frames[2] else {
        panic!("expected data frame, got {:?}", frames[2]);
    };
    let payloads = SideChannelPayload::from_values(values);
    assert_eq!(payloads[0].decode_video().unwrap(), b"clip-bytes");
    assert_eq!(frames[3].code(), 'd');
}

#[tokio::test]
async fn test_end_to_end_video_500_leaves_text_intact() {
    let ollama = ollama_server(HELLO_NDJSON).await;
    let video = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&video)
        .await;

    let relay = Relay::new(
        Arc::new(OllamaBackend::new(ollama.uri()).unwrap()),
        Some(Arc::new(
            HttpVideoBackend::new(video.uri(), Duration::from_secs(5)).unwrap(),
        )),
        RelayConfig::default(),
    );

    let frames = relay_frames(&relay).await;
    let codes: Vec<char> = frames.iter().map(StreamPart::code).collect();

    assert_eq!(codes, vec!['0', '0', 'd']);
}

//! Ollama client tests
//!
//! Runs the client against a mock Ollama server on a local port

use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{StreamExt, stream};
use serde_json::{Value, json};
use tokio_local_llm_chat::core::chat::{Fragment, Message};
use tokio_local_llm_chat::core::error::ChatError;
use tokio_local_llm_chat::infrastructure::ollama::OllamaClient;
use tokio_local_llm_chat::infrastructure::traits::InferenceClient;
use tokio_util::sync::CancellationToken;

/// Serves `router` on an ephemeral port and returns its base URL
async fn spawn_mock(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    format!("http://{addr}")
}

fn ndjson(lines: &[Value]) -> Response {
    let body: String = lines.iter().map(|line| format!("{line}\n")).collect();
    ([(header::CONTENT_TYPE, "application/x-ndjson")], body).into_response()
}

async fn tags() -> Json<Value> {
    Json(json!({
        "models": [
            { "name": "llama3.2:latest", "size": 2019393189u64, "details": { "family": "llama" } },
            { "name": "mistral:7b" }
        ]
    }))
}

/// Answers with the model name followed by the last user message
async fn chat(Json(request): Json<Value>) -> Response {
    let last = request["messages"]
        .as_array()
        .and_then(|messages| messages.last())
        .and_then(|message| message["content"].as_str())
        .unwrap_or_default()
        .to_owned();
    let model = request["model"].as_str().unwrap_or_default().to_owned();

    ndjson(&[
        json!({ "model": model, "message": { "role": "assistant", "content": format!("{model}: ") }, "done": false }),
        json!({ "model": model, "message": { "role": "assistant", "content": last }, "done": false }),
        json!({ "model": model, "message": { "role": "assistant", "content": "" }, "done": true, "done_reason": "stop" }),
    ])
}

/// Splits lines across body chunks the way a slow server would
async fn generate() -> Response {
    let pieces = vec![
        Ok::<_, std::io::Error>("{\"response\":\"Once\",\"do"),
        Ok("ne\":false}\n{\"response\":\" upon\","),
        Ok("\"done\":false}\n\n{\"response\":\"\",\"done\":true}\n"),
    ];
    Body::from_stream(stream::iter(pieces)).into_response()
}

async fn crashing_chat() -> Response {
    ndjson(&[
        json!({ "message": { "role": "assistant", "content": "Part" }, "done": false }),
        json!({ "error": "model runner crashed" }),
        json!({ "message": { "role": "assistant", "content": "never seen" }, "done": false }),
    ])
}

/// Closes the body before sending the done line
async fn truncated_chat() -> Response {
    ndjson(&[json!({ "message": { "role": "assistant", "content": "Hal" }, "done": false })])
}

async fn missing_model() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "model \"ghost\" not found, try pulling it first" })),
    )
        .into_response()
}

fn healthy_server() -> Router {
    Router::new()
        .route("/api/tags", get(tags))
        .route("/api/chat", post(chat))
        .route("/api/generate", post(generate))
}

#[tokio::test]
async fn test_list_models() {
    let client = OllamaClient::new(&spawn_mock(healthy_server()).await);

    let models = client.list_models().await.unwrap();

    assert_eq!(models.len(), 2);
    assert_eq!(models[0].name, "llama3.2:latest");
    assert_eq!(models[0].details["details"]["family"], "llama");
    assert_eq!(models[1].name, "mistral:7b");
    assert!(models[1].details.is_empty());
}

#[tokio::test]
async fn test_stream_chat_yields_fragments_until_done() {
    // trailing slash on the host is tolerated
    let client = OllamaClient::new(&format!("{}/", spawn_mock(healthy_server()).await));

    let fragments: Vec<_> = client
        .stream_chat(
            "llama3.2",
            &[Message::user("Hello"), Message::assistant("Hi"), Message::user("How are you?")],
            CancellationToken::new(),
        )
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(
        fragments,
        vec![
            Ok(Fragment::assistant("llama3.2: ")),
            Ok(Fragment::assistant("How are you?")),
        ]
    );
}

#[tokio::test]
async fn test_stream_generate_reassembles_split_lines() {
    let client = OllamaClient::new(&spawn_mock(healthy_server()).await);

    let fragments: Vec<_> = client
        .stream_generate("llama3.2", "Tell me a story", CancellationToken::new())
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(
        fragments,
        vec![Ok(Fragment::assistant("Once")), Ok(Fragment::assistant(" upon"))]
    );
}

#[tokio::test]
async fn test_error_line_ends_the_stream() {
    let base_url = spawn_mock(Router::new().route("/api/chat", post(crashing_chat))).await;
    let client = OllamaClient::new(&base_url);

    let fragments: Vec<_> = client
        .stream_chat("llama3.2", &[Message::user("Hi")], CancellationToken::new())
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(
        fragments,
        vec![
            Ok(Fragment::assistant("Part")),
            Err(ChatError::StreamInterrupted("model runner crashed".into())),
        ]
    );
}

#[tokio::test]
async fn test_body_ending_before_done_is_interrupted() {
    let base_url = spawn_mock(Router::new().route("/api/chat", post(truncated_chat))).await;
    let client = OllamaClient::new(&base_url);

    let fragments: Vec<_> = client
        .stream_chat("llama3.2", &[Message::user("Hi")], CancellationToken::new())
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(
        fragments,
        vec![
            Ok(Fragment::assistant("Hal")),
            Err(ChatError::StreamInterrupted("stream ended before done".into())),
        ]
    );
}

#[tokio::test]
async fn test_rejected_request_carries_server_error() {
    let base_url = spawn_mock(Router::new().route("/api/chat", post(missing_model))).await;
    let client = OllamaClient::new(&base_url);

    let error = client
        .stream_chat("ghost", &[Message::user("Hi")], CancellationToken::new())
        .await
        .err()
        .unwrap();

    match error {
        ChatError::ServiceUnreachable(detail) => {
            assert!(detail.contains("404"));
            assert!(detail.contains("not found"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_cancelled_stream_yields_nothing() {
    let client = OllamaClient::new(&spawn_mock(healthy_server()).await);
    let cancel = CancellationToken::new();

    let stream = client
        .stream_chat("llama3.2", &[Message::user("Hi")], cancel.clone())
        .await
        .unwrap();
    cancel.cancel();

    assert!(stream.collect::<Vec<_>>().await.is_empty());
}

#[tokio::test]
async fn test_unreachable_service() {
    // nothing listens on the discard port
    let client = OllamaClient::new("http://127.0.0.1:9");

    let error = client.list_models().await.unwrap_err();

    assert!(matches!(error, ChatError::ServiceUnreachable(_)));
}

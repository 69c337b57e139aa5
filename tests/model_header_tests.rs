//! Unit tests for the model selection extractor

use axum::extract::FromRequestParts;
use axum::http::{HeaderValue, Request, StatusCode};
use tokio_local_llm_chat::api::SelectedModel;

#[tokio::test]
async fn test_selected_model_from_header() {
    let req = Request::builder()
        .header("X-Model", "mistral:7b")
        .body(())
        .unwrap();

    let (mut parts, _) = req.into_parts();
    let result = SelectedModel::from_request_parts(&mut parts, &()).await;

    assert_eq!(result.unwrap().0.as_deref(), Some("mistral:7b"));
}

#[tokio::test]
async fn test_missing_header_selects_default() {
    let req = Request::builder().body(()).unwrap();

    let (mut parts, _) = req.into_parts();
    let result = SelectedModel::from_request_parts(&mut parts, &()).await;

    assert_eq!(result.unwrap().0, None);
}

#[tokio::test]
async fn test_blank_header_is_rejected() {
    let req = Request::builder().header("X-Model", "   ").body(()).unwrap();

    let (mut parts, _) = req.into_parts();
    let result = SelectedModel::from_request_parts(&mut parts, &()).await;

    let (status, message) = result.unwrap_err();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(message.contains("empty"));
}

#[tokio::test]
async fn test_invalid_header_bytes() {
    let mut req = Request::builder().body(()).unwrap();
    req.headers_mut()
        .insert("X-Model", HeaderValue::from_bytes(&[0xFF, 0xFE]).unwrap());

    let (mut parts, _) = req.into_parts();
    let result = SelectedModel::from_request_parts(&mut parts, &()).await;

    let (status, message) = result.unwrap_err();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(message.contains("invalid"));
}

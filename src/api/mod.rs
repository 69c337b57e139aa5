use crate::core::error::ChatError;
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;

pub mod chats;
pub mod generate;
pub mod status;

const X_MODEL: &str = "X-Model";

/// Model chosen by the client with the `X-Model` header. `None` selects the configured default.
#[derive(Debug)]
pub struct SelectedModel(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for SelectedModel
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, (StatusCode, &'static str)> {
        if let Some(model) = parts.headers.get(X_MODEL) {
            let model = model
                .to_str()
                .map_err(|_| (StatusCode::BAD_REQUEST, "invalid model name"))?
                .trim();
            if model.is_empty() {
                return Err((StatusCode::BAD_REQUEST, "`X-Model` header is empty"));
            }
            Ok(SelectedModel(Some(model.to_owned())))
        } else {
            Ok(SelectedModel(None))
        }
    }
}

pub fn router() -> Router {
    Router::new()
        .nest("/chats", chats::router())
        .nest("/status", status::router())
        .route("/generate", post(generate::generate))
}

#[derive(Serialize, Debug)]
pub struct ErrorBody {
    pub error: String,
}

impl From<&ChatError> for ErrorBody {
    fn from(e: &ChatError) -> Self {
        ErrorBody {
            error: e.to_string(),
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = match &self {
            e if e.is_service_failure() => StatusCode::BAD_GATEWAY,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::InvalidOperation(_) => StatusCode::BAD_REQUEST,
            ChatError::Busy => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(ErrorBody::from(&self))).into_response()
    }
}

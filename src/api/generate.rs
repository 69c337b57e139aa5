use crate::api::SelectedModel;
use crate::core::completion::{CompletionEvent, CompletionService};
use axum::Json;
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use di_axum::Inject;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Deserialize, Debug)]
pub struct GeneratePrompt {
    pub prompt: String,
}

#[derive(Serialize)]
struct CompletionText<'a> {
    text: &'a str,
}

/// Streams a completion of the prompt.
///
/// There is no cancel route. A client stops a completion by closing the connection: the response
/// stream is dropped, and the request to the inference service goes with it.
pub async fn generate(
    Inject(completions): Inject<CompletionService>,
    SelectedModel(model): SelectedModel,
    Json(body): Json<GeneratePrompt>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let events = completions
        .generate(model, body.prompt, CancellationToken::new())
        .map(|event| {
            let (name, text) = match &event {
                CompletionEvent::Partial(text) => ("partial", text),
                CompletionEvent::Done(text) => ("done", text),
                CompletionEvent::Failed(text) => ("failed", text),
            };
            Event::default()
                .event(name)
                .json_data(CompletionText { text })
        });

    Sse::new(events).keep_alive(KeepAlive::default())
}

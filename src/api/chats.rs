//! Chat endpoints

use crate::api::chats::schemas::{
    ChatList, ChatSummary, ChatView, CreateChat, CreateMessage, EditMessage, MessageDone,
    RenameChat,
};
use crate::api::{ErrorBody, SelectedModel};
use crate::core::chat::DEFAULT_CHAT_NAME;
use crate::core::controller::{ConversationController, Turn};
use crate::core::error::ChatError;
use crate::core::traits::SessionStore;
use async_stream::stream;
use axum::body::Bytes;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use di_axum::Inject;
use futures_util::Stream;
use log::warn;
use uuid::Uuid;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_chats).post(create_chat))
        .route("/:id", get(get_chat).patch(rename_chat).delete(delete_chat))
        .route("/:id/messages", post(send_message))
        .route(
            "/:id/messages/:index",
            put(edit_message).delete(delete_messages_from),
        )
        .route("/:id/regenerate", post(regenerate))
        .route("/:id/cancel", post(cancel))
}

async fn list_chats(
    Inject(store): Inject<dyn SessionStore>,
) -> Result<Json<ChatList>, ChatError> {
    let mut chats = Vec::new();

    for id in store.list().await? {
        match store.load(id).await {
            Ok(transcript) => chats.push(ChatSummary {
                id,
                name: transcript.name().to_owned(),
            }),
            // deleted since listing
            Err(ChatError::NotFound(_)) => {}
            Err(e @ ChatError::Storage(_)) => warn!("leaving chat {id} out of the list: {e}"),
            Err(e) => return Err(e),
        }
    }

    Ok(Json(ChatList { chats }))
}

async fn create_chat(
    Inject(store): Inject<dyn SessionStore>,
    body: Bytes,
) -> Result<(StatusCode, Json<ChatView>), ChatError> {
    // no body means the default name, but a body that is there must parse
    let request = if body.trim_ascii().is_empty() {
        CreateChat::default()
    } else {
        serde_json::from_slice::<CreateChat>(&body)
            .map_err(|e| ChatError::InvalidOperation(format!("malformed chat body: {e}")))?
    };
    let name = request
        .name
        .unwrap_or_else(|| DEFAULT_CHAT_NAME.to_owned());

    let id = store.create(&name).await?;
    let transcript = store.load(id).await?;

    Ok((
        StatusCode::CREATED,
        Json(ChatView {
            transcript,
            in_flight: None,
        }),
    ))
}

async fn get_chat(
    Inject(store): Inject<dyn SessionStore>,
    Inject(controller): Inject<ConversationController>,
    Path(id): Path<Uuid>,
) -> Result<Json<ChatView>, ChatError> {
    let transcript = store.load(id).await?;

    Ok(Json(ChatView {
        transcript,
        in_flight: controller.in_flight(id),
    }))
}

async fn rename_chat(
    Inject(controller): Inject<ConversationController>,
    Path(id): Path<Uuid>,
    Json(body): Json<RenameChat>,
) -> Result<Json<ChatView>, ChatError> {
    let transcript = controller.rename_chat(id, &body.name).await?;

    Ok(Json(ChatView {
        transcript,
        in_flight: None,
    }))
}

async fn delete_chat(
    Inject(controller): Inject<ConversationController>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ChatError> {
    controller.delete_chat(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn send_message(
    Inject(controller): Inject<ConversationController>,
    Path(id): Path<Uuid>,
    SelectedModel(model): SelectedModel,
    Json(body): Json<CreateMessage>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ChatError> {
    let turn = controller.send(id, body.text, model).await?;
    Ok(turn_events(turn))
}

async fn regenerate(
    Inject(controller): Inject<ConversationController>,
    Path(id): Path<Uuid>,
    SelectedModel(model): SelectedModel,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ChatError> {
    let turn = controller.regenerate(id, model).await?;
    Ok(turn_events(turn))
}

async fn edit_message(
    Inject(controller): Inject<ConversationController>,
    Path((id, index)): Path<(Uuid, usize)>,
    Json(body): Json<EditMessage>,
) -> Result<Json<ChatView>, ChatError> {
    let transcript = controller.edit_message(id, index, body.content).await?;

    Ok(Json(ChatView {
        transcript,
        in_flight: None,
    }))
}

async fn delete_messages_from(
    Inject(controller): Inject<ConversationController>,
    Path((id, index)): Path<(Uuid, usize)>,
) -> Result<Json<ChatView>, ChatError> {
    let transcript = controller.delete_messages_from(id, index).await?;

    Ok(Json(ChatView {
        transcript,
        in_flight: None,
    }))
}

async fn cancel(
    Inject(controller): Inject<ConversationController>,
    Path(id): Path<Uuid>,
) -> StatusCode {
    if controller.cancel(id) {
        StatusCode::ACCEPTED
    } else {
        StatusCode::NOT_FOUND
    }
}

/// Streams a turn to the client. The turn keeps running, and is persisted, even if the client
/// goes away.
fn turn_events(turn: Turn) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let stream = stream! {
        if let Some(prompt) = turn.prompt() {
            yield Event::default().event("new_message").json_data(prompt);
        }

        let mut updates = turn.updates();
        loop {
            let snapshot = updates.borrow_and_update().clone();
            if snapshot.phase.is_terminal() {
                break;
            }

            yield Event::default().event("message_part").json_data(&snapshot);

            if updates.changed().await.is_err() {
                break;
            }
        }

        match turn.finish().await {
            Ok(outcome) => {
                yield Event::default().event("message_done").json_data(MessageDone {
                    phase: outcome.phase,
                    message: outcome.reply().cloned(),
                });
            }
            Err(e) => {
                yield Event::default().event("error").json_data(ErrorBody::from(&e));
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub mod schemas {
    use crate::core::chat::{Message, Transcript};
    use crate::core::controller::{InFlight, TurnPhase};
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Deserialize, Debug, Default)]
    pub struct CreateChat {
        #[serde(default)]
        pub name: Option<String>,
    }

    #[derive(Deserialize, Debug)]
    pub struct RenameChat {
        pub name: String,
    }

    #[derive(Serialize, Debug)]
    pub struct ChatSummary {
        pub id: Uuid,
        pub name: String,
    }

    #[derive(Serialize, Debug)]
    pub struct ChatList {
        pub chats: Vec<ChatSummary>,
    }

    #[derive(Serialize, Debug)]
    pub struct ChatView {
        #[serde(flatten)]
        pub transcript: Transcript,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub in_flight: Option<InFlight>,
    }

    #[derive(Deserialize, Debug)]
    pub struct CreateMessage {
        pub text: String,
    }

    #[derive(Deserialize, Debug)]
    pub struct EditMessage {
        pub content: String,
    }

    #[derive(Serialize, Debug)]
    pub struct MessageDone {
        pub phase: TurnPhase,
        pub message: Option<Message>,
    }
}

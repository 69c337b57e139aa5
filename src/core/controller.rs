//! Streaming conversation controller.
//!
//! A turn starts when the user sends (or regenerates) a message and ends when the reply is
//! finalized, cancelled or has failed. The reply being assembled is never part of the
//! transcript: it lives in an [`InFlight`] snapshot that is republished to observers after every
//! fragment, and it is only appended to the transcript (and persisted) once the turn ends.

use crate::config::ClientConfig;
use crate::core::chat::{Fragment, Message, Role, Transcript};
use crate::core::error::ChatError;
use crate::core::prober::AvailabilityProber;
use crate::core::traits::SessionStore;
use crate::infrastructure::traits::InferenceClient;
use di::{Ref, inject, injectable};
use futures_util::StreamExt;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Content shown until the first fragment arrives. Never persisted.
pub const PLACEHOLDER: &str = "Requesting...";
/// Appended to a reply whose request failed.
pub const FAILURE_NOTICE: &str = "Request Failed!";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    AwaitingFirstToken,
    Streaming,
    Finalized,
    Cancelled,
    Failed,
}

impl TurnPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TurnPhase::Finalized | TurnPhase::Cancelled | TurnPhase::Failed
        )
    }
}

/// The reply currently being streamed into a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InFlight {
    pub chat_id: Uuid,
    pub phase: TurnPhase,
    pub role: Role,
    pub content: String,
}

impl InFlight {
    fn new(chat_id: Uuid) -> Self {
        Self {
            chat_id,
            phase: TurnPhase::AwaitingFirstToken,
            role: Role::Assistant,
            content: PLACEHOLDER.to_owned(),
        }
    }

    fn apply(&mut self, fragment: Fragment) {
        if self.phase == TurnPhase::AwaitingFirstToken {
            self.content.clear();
            self.phase = TurnPhase::Streaming;
        }
        self.role = fragment.role;
        self.content.push_str(&fragment.text);
    }

    /// Text received so far; empty while still waiting for the first fragment.
    fn accumulated(&self) -> &str {
        match self.phase {
            TurnPhase::AwaitingFirstToken => "",
            _ => &self.content,
        }
    }

    fn settle(self, phase: TurnPhase, reply: &Message) -> Self {
        Self {
            chat_id: self.chat_id,
            phase,
            role: reply.role,
            content: reply.content.clone(),
        }
    }
}

fn failure_content(partial: &str) -> String {
    if partial.is_empty() {
        FAILURE_NOTICE.to_owned()
    } else {
        format!("{partial}\n\n{FAILURE_NOTICE}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub phase: TurnPhase,
    /// The transcript as persisted, ending with the reply.
    pub transcript: Transcript,
}

impl TurnOutcome {
    pub fn reply(&self) -> Option<&Message> {
        self.transcript.last()
    }
}

/// Handle to a running turn.
pub struct Turn {
    chat_id: Uuid,
    prompt: Option<Message>,
    updates: watch::Receiver<InFlight>,
    cancel: CancellationToken,
    completion: JoinHandle<Result<TurnOutcome, ChatError>>,
}

impl Turn {
    pub fn chat_id(&self) -> Uuid {
        self.chat_id
    }

    /// The user message this turn answers. `None` when regenerating.
    pub fn prompt(&self) -> Option<&Message> {
        self.prompt.as_ref()
    }

    pub fn updates(&self) -> watch::Receiver<InFlight> {
        self.updates.clone()
    }

    /// Asks the turn to stop at the next fragment boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the turn to be finalized and persisted.
    pub async fn finish(self) -> Result<TurnOutcome, ChatError> {
        match self.completion.await {
            Ok(outcome) => outcome,
            Err(e) => Err(ChatError::StreamInterrupted(format!("turn task failed: {e}"))),
        }
    }
}

struct ActiveTurn {
    chat_id: Uuid,
    cancel: CancellationToken,
    updates: watch::Receiver<InFlight>,
}

/// What the controller is doing right now. Turns and edits are claimed under the same lock, so
/// a chat is never edited while a turn holds it.
#[derive(Default)]
struct Activity {
    turn: Option<ActiveTurn>,
    /// Chats between the load and the save of an edit.
    editing: HashSet<Uuid>,
}

impl Activity {
    fn is_streaming_into(&self, chat_id: Uuid) -> bool {
        self.turn.as_ref().is_some_and(|t| t.chat_id == chat_id)
    }
}

type ActiveSlot = Arc<Mutex<Activity>>;

fn lock(slot: &ActiveSlot) -> MutexGuard<'_, Activity> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Claim on the active-turn slot. Dropping it frees the slot.
struct Reservation {
    chat_id: Uuid,
    cancel: CancellationToken,
    updates: watch::Sender<InFlight>,
    slot: ActiveSlot,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let mut active = lock(&self.slot);
        if active.is_streaming_into(self.chat_id) {
            active.turn = None;
        }
    }
}

/// Claim on a chat for a load-modify-save. Dropping it releases the chat.
struct EditClaim {
    chat_id: Uuid,
    slot: ActiveSlot,
}

impl Drop for EditClaim {
    fn drop(&mut self) {
        lock(&self.slot).editing.remove(&self.chat_id);
    }
}

pub struct ConversationController {
    store: Ref<dyn SessionStore>,
    client: Ref<dyn InferenceClient>,
    prober: Ref<AvailabilityProber>,
    config: Ref<ClientConfig>,
    active: ActiveSlot,
}

#[injectable]
impl ConversationController {
    #[inject]
    pub fn new(
        store: Ref<dyn SessionStore>,
        client: Ref<dyn InferenceClient>,
        prober: Ref<AvailabilityProber>,
        config: Ref<ClientConfig>,
    ) -> ConversationController {
        ConversationController {
            store,
            client,
            prober,
            config,
            active: Arc::new(Mutex::new(Activity::default())),
        }
    }
}

impl ConversationController {
    /// Appends a user message to the chat and starts streaming the reply.
    ///
    /// The user message is persisted before the request is sent.
    pub async fn send(
        &self,
        chat_id: Uuid,
        text: impl Into<String>,
        model: Option<String>,
    ) -> Result<Turn, ChatError> {
        let reservation = self.reserve(chat_id)?;
        let prompt = Message::user(text);
        let transcript = self
            .store
            .load(chat_id)
            .await?
            .with_message(prompt.clone());

        self.start(reservation, transcript, Some(prompt), model)
            .await
    }

    /// Drops the trailing assistant message and streams a new one.
    ///
    /// Returns `InvalidOperation` unless the chat ends with an assistant message.
    pub async fn regenerate(&self, chat_id: Uuid, model: Option<String>) -> Result<Turn, ChatError> {
        let reservation = self.reserve(chat_id)?;
        let transcript = self
            .store
            .load(chat_id)
            .await?
            .without_trailing_reply()?;

        self.start(reservation, transcript, None, model).await
    }

    /// Signals the running turn of `chat_id`. Returns `false` if that chat isn't streaming.
    pub fn cancel(&self, chat_id: Uuid) -> bool {
        match lock(&self.active).turn.as_ref() {
            Some(active) if active.chat_id == chat_id => {
                debug!("chat {chat_id}: cancellation requested");
                active.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Snapshot of the reply being streamed into `chat_id`, if any.
    pub fn in_flight(&self, chat_id: Uuid) -> Option<InFlight> {
        lock(&self.active)
            .turn
            .as_ref()
            .filter(|active| active.chat_id == chat_id)
            .map(|active| active.updates.borrow().clone())
    }

    pub fn is_streaming(&self) -> bool {
        lock(&self.active).turn.is_some()
    }

    /// Rewrites one message in place and persists the chat. Later messages are kept as they
    /// are.
    pub async fn edit_message(
        &self,
        chat_id: Uuid,
        index: usize,
        content: impl Into<String>,
    ) -> Result<Transcript, ChatError> {
        let _claim = self.claim(chat_id)?;
        let transcript = self.store.load(chat_id).await?.with_edited(index, content)?;
        self.store.save(&transcript).await?;
        Ok(transcript)
    }

    /// Keeps the first `index` messages of the chat and persists it.
    pub async fn delete_messages_from(
        &self,
        chat_id: Uuid,
        index: usize,
    ) -> Result<Transcript, ChatError> {
        let _claim = self.claim(chat_id)?;
        let transcript = self.store.load(chat_id).await?.truncated(index);
        self.store.save(&transcript).await?;
        Ok(transcript)
    }

    /// Renames the chat and persists it.
    pub async fn rename_chat(&self, chat_id: Uuid, name: &str) -> Result<Transcript, ChatError> {
        let _claim = self.claim(chat_id)?;
        self.store.rename(chat_id, name).await
    }

    /// Deletes the chat. Deleting a missing chat is not an error.
    pub async fn delete_chat(&self, chat_id: Uuid) -> Result<(), ChatError> {
        let _claim = self.claim(chat_id)?;
        self.store.delete(chat_id).await
    }

    /// Claims `chat_id` for an edit, or returns `Busy` if a turn or another edit holds it.
    fn claim(&self, chat_id: Uuid) -> Result<EditClaim, ChatError> {
        let mut active = lock(&self.active);
        if active.is_streaming_into(chat_id) || !active.editing.insert(chat_id) {
            return Err(ChatError::Busy);
        }

        Ok(EditClaim {
            chat_id,
            slot: self.active.clone(),
        })
    }

    fn reserve(&self, chat_id: Uuid) -> Result<Reservation, ChatError> {
        let mut active = lock(&self.active);
        if active.turn.is_some() || active.editing.contains(&chat_id) {
            return Err(ChatError::Busy);
        }

        let cancel = CancellationToken::new();
        let (updates, receiver) = watch::channel(InFlight::new(chat_id));
        active.turn = Some(ActiveTurn {
            chat_id,
            cancel: cancel.clone(),
            updates: receiver,
        });

        Ok(Reservation {
            chat_id,
            cancel,
            updates,
            slot: self.active.clone(),
        })
    }

    async fn start(
        &self,
        reservation: Reservation,
        transcript: Transcript,
        prompt: Option<Message>,
        model: Option<String>,
    ) -> Result<Turn, ChatError> {
        self.store.save(&transcript).await?;

        let chat_id = transcript.id();
        let model = self.config.model_or_default(model);
        info!("chat {chat_id}: requesting a reply from {model}");

        let updates = reservation.updates.subscribe();
        let cancel = reservation.cancel.clone();

        let task = TurnTask {
            store: self.store.clone(),
            client: self.client.clone(),
            prober: self.prober.clone(),
            model,
            transcript,
            reservation,
        };

        Ok(Turn {
            chat_id,
            prompt,
            updates,
            cancel,
            completion: tokio::spawn(task.run()),
        })
    }
}

struct TurnTask {
    store: Ref<dyn SessionStore>,
    client: Ref<dyn InferenceClient>,
    prober: Ref<AvailabilityProber>,
    model: String,
    transcript: Transcript,
    reservation: Reservation,
}

impl TurnTask {
    async fn run(self) -> Result<TurnOutcome, ChatError> {
        let TurnTask {
            store,
            client,
            prober,
            model,
            transcript,
            reservation,
        } = self;

        let chat_id = transcript.id();
        let mut in_flight = InFlight::new(chat_id);

        let streamed = stream_reply(&*client, &model, &transcript, &reservation, &mut in_flight).await;
        let (phase, reply) = match streamed {
            Ok(phase) => (phase, Message::new(in_flight.role, in_flight.accumulated())),
            Err(e) => {
                warn!("chat {chat_id}: {e}");
                (
                    TurnPhase::Failed,
                    Message::assistant(failure_content(in_flight.accumulated())),
                )
            }
        };

        let transcript = transcript.with_message(reply.clone());
        let saved = store.save(&transcript).await;

        reservation
            .updates
            .send_replace(in_flight.settle(phase, &reply));
        drop(reservation);
        debug!("chat {chat_id}: turn ended as {phase:?}");

        if phase == TurnPhase::Failed {
            prober.probe().await;
        }

        saved.map(|()| TurnOutcome { phase, transcript })
    }
}

/// Consumes the reply stream into `in_flight`, returning the phase the turn ended in.
///
/// Cancellation is checked before the stream is opened and before every fragment, so a
/// fragment is either applied whole or not at all.
async fn stream_reply(
    client: &dyn InferenceClient,
    model: &str,
    transcript: &Transcript,
    reservation: &Reservation,
    in_flight: &mut InFlight,
) -> Result<TurnPhase, ChatError> {
    let cancel = &reservation.cancel;

    let mut fragments = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(TurnPhase::Cancelled),
        opened = client.stream_chat(model, transcript.messages(), cancel.clone()) => opened?,
    };

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(TurnPhase::Cancelled),
            next = fragments.next() => match next {
                Some(Ok(fragment)) => {
                    in_flight.apply(fragment);
                    reservation.updates.send_replace(in_flight.clone());
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(TurnPhase::Finalized),
            },
        }
    }
}

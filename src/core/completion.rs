//! Single-prompt completions, without a transcript.

use crate::config::ClientConfig;
use crate::core::prober::AvailabilityProber;
use crate::infrastructure::traits::InferenceClient;
use async_stream::stream;
use di::{Ref, inject, injectable};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use log::{info, warn};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Shown in place of the completion when the request fails.
pub const COMPLETION_FAILURE: &str = "Prompt failed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "text", rename_all = "snake_case")]
pub enum CompletionEvent {
    /// Everything generated so far.
    Partial(String),
    Done(String),
    Failed(String),
}

pub struct CompletionService {
    client: Ref<dyn InferenceClient>,
    prober: Ref<AvailabilityProber>,
    config: Ref<ClientConfig>,
}

#[injectable]
impl CompletionService {
    #[inject]
    pub fn new(
        client: Ref<dyn InferenceClient>,
        prober: Ref<AvailabilityProber>,
        config: Ref<ClientConfig>,
    ) -> CompletionService {
        CompletionService {
            client,
            prober,
            config,
        }
    }
}

impl CompletionService {
    /// Streams a completion of `prompt`. The stream always ends with a `Done` or `Failed` event;
    /// cancelling ends it with `Done` carrying the partial text.
    pub fn generate(
        &self,
        model: Option<String>,
        prompt: String,
        cancel: CancellationToken,
    ) -> BoxStream<'static, CompletionEvent> {
        let client = self.client.clone();
        let prober = self.prober.clone();
        let model = self.config.model_or_default(model);

        stream! {
            info!("generating a completion with {model}");

            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                opened = client.stream_generate(&model, &prompt, cancel.clone()) => Some(opened),
            };

            let mut fragments = match opened {
                None => {
                    yield CompletionEvent::Done(String::new());
                    return;
                }
                Some(Ok(fragments)) => fragments,
                Some(Err(e)) => {
                    warn!("completion failed: {e}");
                    prober.probe().await;
                    yield CompletionEvent::Failed(COMPLETION_FAILURE.to_owned());
                    return;
                }
            };

            let mut text = String::new();
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    next = fragments.next() => Some(next),
                };

                match next {
                    // cancelled
                    None | Some(None) => break,
                    Some(Some(Ok(fragment))) => {
                        text.push_str(&fragment.text);
                        yield CompletionEvent::Partial(text.clone());
                    }
                    Some(Some(Err(e))) => {
                        warn!("completion interrupted: {e}");
                        prober.probe().await;
                        yield CompletionEvent::Failed(COMPLETION_FAILURE.to_owned());
                        return;
                    }
                }
            }

            yield CompletionEvent::Done(text);
        }
        .boxed()
    }
}

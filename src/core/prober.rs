//! Availability prober for the inference service.

use crate::core::chat::ModelDescriptor;
use crate::infrastructure::traits::InferenceClient;
use chrono::{DateTime, Utc};
use di::{Ref, inject, injectable};
use log::{debug, info, warn};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Shortest interval between periodic probes.
pub const MIN_PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Snapshot of the inference service as seen by the last probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub online: bool,
    pub models: Vec<ModelDescriptor>,
    /// `None` until the first probe completes.
    pub checked_at: Option<DateTime<Utc>>,
}

pub struct AvailabilityProber {
    client: Ref<dyn InferenceClient>,
    status: watch::Sender<ServiceStatus>,
}

#[injectable]
impl AvailabilityProber {
    #[inject]
    pub fn new(client: Ref<dyn InferenceClient>) -> AvailabilityProber {
        AvailabilityProber {
            client,
            status: watch::Sender::new(ServiceStatus::default()),
        }
    }
}

impl AvailabilityProber {
    pub fn status(&self) -> ServiceStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServiceStatus> {
        self.status.subscribe()
    }

    /// Queries the model list once and publishes the result.
    pub async fn probe(&self) -> ServiceStatus {
        let status = match self.client.list_models().await {
            Ok(models) => {
                debug!("inference service online with {} models", models.len());
                ServiceStatus {
                    online: true,
                    models,
                    checked_at: Some(Utc::now()),
                }
            }
            Err(e) => {
                debug!("inference service offline: {e}");
                ServiceStatus {
                    online: false,
                    models: Vec::new(),
                    checked_at: Some(Utc::now()),
                }
            }
        };

        let previous = self.status.send_replace(status.clone());
        if previous.online != status.online {
            if status.online {
                info!("inference service is online");
            } else {
                warn!("inference service is offline");
            }
        }

        status
    }

    /// Probes immediately and then on every tick of `interval`, until `shutdown` fires.
    /// Intervals shorter than [`MIN_PROBE_INTERVAL`] are raised to it.
    pub async fn run(&self, interval: Duration, shutdown: CancellationToken) {
        if interval < MIN_PROBE_INTERVAL {
            warn!("probe interval {interval:?} is too short, using {MIN_PROBE_INTERVAL:?}");
        }
        let mut ticker = tokio::time::interval(interval.max(MIN_PROBE_INTERVAL));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.probe().await;
                }
            }
        }

        debug!("availability prober stopped");
    }
}

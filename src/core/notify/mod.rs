//! Error notification sink
//!
//! Transient upstream failures are reported fire-and-forget to an operator
//! webhook. A single worker drains a bounded queue; when the queue is full
//! the event is dropped rather than applying backpressure to the serving
//! path.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::NotifierConfig;

/// One transient-failure event
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    /// Provider that failed
    pub provider: String,
    /// Model the request asked for
    pub model_id: String,
    /// Request the failure belongs to
    pub request_id: Uuid,
    /// Failure message
    pub message: String,
    /// When the failure happened
    pub occurred_at: DateTime<Utc>,
}

impl Notification {
    /// Build an event stamped with the current time
    pub fn new(provider: &str, model_id: &str, request_id: Uuid, message: &str) -> Self {
        Self {
            provider: provider.to_string(),
            model_id: model_id.to_string(),
            request_id,
            message: message.to_string(),
            occurred_at: Utc::now(),
        }
    }
}

/// Sink for transient-failure events
///
/// The orchestrator only sees this seam; the production implementation
/// delivers to an operator webhook, tests record the events.
pub trait Notifier: Send + Sync {
    /// Report one event; must never block the serving path
    fn notify(&self, event: Notification);
}

/// Bounded fire-and-forget notifier
pub struct ErrorNotifier {
    tx: Option<mpsc::Sender<Notification>>,
}

impl ErrorNotifier {
    /// Start the delivery worker; without a webhook URL events are only
    /// logged
    pub fn new(config: &NotifierConfig) -> Self {
        let Some(url) = config.webhook_url.clone() else {
            return Self { tx: None };
        };

        let (tx, mut rx) = mpsc::channel::<Notification>(config.queue_capacity.max(1));
        let timeout = Duration::from_secs(config.send_timeout_secs);
        let client = reqwest::Client::new();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let send = client.post(&url).json(&event).timeout(timeout).send();
                match send.await {
                    Ok(resp) if resp.status().is_success() => {
                        debug!("Delivered failure notification for {}", event.provider);
                    }
                    Ok(resp) => {
                        warn!(
                            "Notification webhook answered {} for {}",
                            resp.status(),
                            event.provider
                        );
                    }
                    Err(e) => warn!("Notification delivery failed: {}", e),
                }
            }
        });

        Self { tx: Some(tx) }
    }

}

impl Notifier for ErrorNotifier {
    /// Enqueue an event; drops it when the queue is full
    fn notify(&self, event: Notification) {
        warn!(
            "Transient upstream failure on {} for {}: {}",
            event.provider, event.model_id, event.message
        );
        if let Some(tx) = &self.tx {
            if let Err(e) = tx.try_send(event) {
                warn!("Notification queue full, dropping event: {}", e);
            }
        }
    }
}

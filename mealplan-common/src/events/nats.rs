//! NATS publisher for data-change events
//!
//! `publish` only enqueues. A forwarding task owns the connection and sends
//! each message as JSON to the configured topic, used as the NATS subject.
//! Once every publisher handle is dropped the task drains its queue, flushes
//! and exits.

use std::time::Duration;

use async_nats::{Client, ConnectOptions};
use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{ChangePublisher, DataChangeMessage};
use crate::{Error, Result};

/// Keep-alive ping interval
const PING_INTERVAL: Duration = Duration::from_secs(120);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const CLIENT_NAME: &str = "mealplan-lifecycle";

/// Change publisher backed by a NATS server
pub struct NatsPublisher {
    tx: mpsc::Sender<DataChangeMessage>,
    subject: String,
}

impl NatsPublisher {
    /// Connect to `url` and start the forwarding task
    ///
    /// Fails fast when the server is unreachable; after a successful
    /// connect the client reconnects on its own. `capacity` bounds the
    /// outbound queue.
    pub async fn connect(url: &str, subject: &str, capacity: usize) -> Result<(Self, JoinHandle<()>)> {
        info!(url = %url, subject = %subject, "Connecting to NATS");

        let client = ConnectOptions::new()
            .name(CLIENT_NAME)
            .ping_interval(PING_INTERVAL)
            .connection_timeout(CONNECT_TIMEOUT)
            .connect(url)
            .await
            .map_err(|e| Error::Publish(format!("Failed to connect to NATS at {}: {}", url, e)))?;

        info!(url = %url, "Connected to NATS");

        let (publisher, rx) = Self::channel(subject, capacity);
        let forwarder = tokio::spawn(forward(client, rx, subject.to_string()));
        Ok((publisher, forwarder))
    }

    fn channel(subject: &str, capacity: usize) -> (Self, mpsc::Receiver<DataChangeMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                subject: subject.to_string(),
            },
            rx,
        )
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }
}

impl ChangePublisher for NatsPublisher {
    /// Fails when the outbound queue is full or the forwarder has stopped
    fn publish(&self, message: DataChangeMessage) -> Result<()> {
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => {
                Error::Publish(format!("outbound queue for subject '{}' is full", self.subject))
            }
            TrySendError::Closed(_) => {
                Error::Publish(format!("NATS forwarder for subject '{}' has stopped", self.subject))
            }
        })
    }
}

async fn forward(client: Client, mut rx: mpsc::Receiver<DataChangeMessage>, subject: String) {
    let mut sent = 0u64;
    let mut failed = 0u64;

    while let Some(message) = rx.recv().await {
        let event_type = message.event_type();
        let payload = match message.to_json() {
            Ok(json) => Bytes::from(json),
            Err(e) => {
                failed += 1;
                warn!(event_type = event_type.as_str(), error = %e, "Failed to encode data change event");
                continue;
            }
        };

        match client.publish(subject.clone(), payload).await {
            Ok(()) => {
                sent += 1;
                debug!(
                    subject = %subject,
                    event_type = event_type.as_str(),
                    meal_plan_id = %message.meal_plan_id,
                    "Forwarded data change event"
                );
            }
            Err(e) => {
                failed += 1;
                warn!(
                    subject = %subject,
                    event_type = event_type.as_str(),
                    meal_plan_id = %message.meal_plan_id,
                    error = %e,
                    "Failed to forward data change event; needs reconciliation"
                );
            }
        }
    }

    if let Err(e) = client.flush().await {
        warn!(subject = %subject, error = %e, "Failed to flush NATS connection");
    }
    info!(subject = %subject, sent, failed, "NATS forwarder stopped");
}

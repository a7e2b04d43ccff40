//! The consumer runtime: one long-running process bound to one queue.
//!
//! The runtime owns the lifecycle from §"bind" to §"disposition": it
//! declares the topology, receives one delivery at a time (prefetch 1),
//! dispatches to the stage's `process()`, and settles the delivery from
//! the outcome. A crash mid-handler leaves the delivery unacknowledged and
//! the broker redelivers it after the channel closes; stage handlers are
//! therefore written to be idempotent.

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions, BasicRejectOptions};
use tracing::{error, info, warn};

use jacobine_core::domain::envelope::EnvelopeError;
use jacobine_core::infrastructure::database::DatabaseError;
use jacobine_core::infrastructure::http::FetchError;
use jacobine_core::infrastructure::process::ProcessError;

use crate::client::{MessageQueue, QueueSpec, TransportError};

/// How a failed delivery is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Poison or unrecoverable per-message failure: dead-letter it.
    Reject,
    /// Transient failure: return to the queue for a later retry.
    Requeue,
}

/// Everything a stage handler can fail with.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("work record {id} missing from `{table}`")]
    NotFound { table: &'static str, id: u64 },

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The record exists but is not in a state this stage can work with
    /// (missing URL, missing checksum, unusable checkout).
    #[error("unusable work record: {reason}")]
    Invalid { reason: String },

    #[error("filesystem operation on {path} failed: {source}")]
    Filesystem {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("publishing follow-on message failed: {0}")]
    Publish(#[source] TransportError),
}

impl StageError {
    /// Application errors never requeue automatically; the dead-letter
    /// queue is the forensic log. The one exception is a failed follow-on
    /// publish: the stage work itself succeeded, so a later retry against
    /// a healthy channel can complete the message.
    pub fn disposition(&self) -> Disposition {
        match self {
            StageError::Publish(_) => Disposition::Requeue,
            _ => Disposition::Reject,
        }
    }

    /// Message references vanished state, or the database is refusing us:
    /// logged at the highest severity.
    pub fn is_critical(&self) -> bool {
        matches!(self, StageError::NotFound { .. } | StageError::Database(_))
    }
}

/// One pipeline stage: a queue binding and a message handler.
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// Queue name, routing key, and dead-letter opt-in.
    fn spec(&self) -> QueueSpec;

    /// Handle one delivery. `Ok(())` acknowledges the message; errors are
    /// settled per [`StageError::disposition`].
    async fn process(&self, payload: &[u8]) -> Result<(), StageError>;
}

/// Drives a [`StageHandler`] against its queue until shutdown. The broker
/// connection is shared with the handler, which publishes follow-on
/// messages over the same channel.
pub struct ConsumerRuntime {
    queue: std::sync::Arc<MessageQueue>,
    exchange: String,
}

impl ConsumerRuntime {
    pub fn new(queue: std::sync::Arc<MessageQueue>, exchange: impl Into<String>) -> Self {
        Self {
            queue,
            exchange: exchange.into(),
        }
    }

    /// Bind, then consume until a shutdown signal arrives. The signal
    /// interrupts at a delivery boundary: the in-flight handler finishes
    /// and its delivery is settled before the loop exits.
    pub async fn run(&self, handler: &dyn StageHandler) -> Result<(), TransportError> {
        let spec = handler.spec();
        self.queue.declare_topology(&self.exchange, &spec).await?;

        let consumer_tag = format!("jacobine.{}", spec.queue);
        let mut consumer = self.queue.consume(&spec.queue, &consumer_tag).await?;

        info!(queue = %spec.queue, exchange = %self.exchange, "Consumer bound, waiting for deliveries");

        loop {
            let next = tokio::select! {
                next = consumer.next() => next,
                _ = shutdown_signal() => {
                    info!(queue = %spec.queue, "Shutdown signal received, closing consumer");
                    return Ok(());
                }
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => return Err(TransportError::Amqp(e)),
                None => return Err(TransportError::ConnectionLost),
            };

            self.settle(handler, delivery).await?;
        }
    }

    async fn settle(
        &self,
        handler: &dyn StageHandler,
        delivery: Delivery,
    ) -> Result<(), TransportError> {
        match handler.process(&delivery.data).await {
            Ok(()) => {
                delivery.ack(BasicAckOptions::default()).await?;
            }
            Err(e) => match e.disposition() {
                Disposition::Reject => {
                    if e.is_critical() {
                        error!(critical = true, error = %e, "Rejecting delivery without requeue");
                    } else {
                        error!(error = %e, "Rejecting delivery without requeue");
                    }
                    delivery
                        .reject(BasicRejectOptions { requeue: false })
                        .await?;
                }
                Disposition::Requeue => {
                    warn!(error = %e, "Returning delivery to the queue");
                    delivery
                        .nack(BasicNackOptions {
                            requeue: true,
                            ..BasicNackOptions::default()
                        })
                        .await?;
                }
            },
        }
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope_error() -> StageError {
        StageError::Envelope(EnvelopeError {
            reason: "missing field".to_string(),
            preview: "{}".to_string(),
        })
    }

    #[test]
    fn application_errors_reject_without_requeue() {
        assert_eq!(envelope_error().disposition(), Disposition::Reject);
        assert_eq!(
            StageError::NotFound {
                table: "versions",
                id: 7
            }
            .disposition(),
            Disposition::Reject
        );
        assert_eq!(
            StageError::Database(DatabaseError::Driver {
                code: Some("1146".to_string()),
                message: "table missing".to_string()
            })
            .disposition(),
            Disposition::Reject
        );
        assert_eq!(
            StageError::Process(ProcessError::Spawn {
                command_line: "tar".to_string(),
                source: std::io::Error::other("no such file"),
            })
            .disposition(),
            Disposition::Reject
        );
    }

    #[test]
    fn failed_follow_on_publish_requeues() {
        let e = StageError::Publish(TransportError::ConnectionLost);
        assert_eq!(e.disposition(), Disposition::Requeue);
    }

    #[test]
    fn missing_records_and_database_failures_are_critical() {
        assert!(
            StageError::NotFound {
                table: "gitweb",
                id: 1
            }
            .is_critical()
        );
        assert!(!envelope_error().is_critical());
    }
}

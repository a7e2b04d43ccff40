//! Jacobine Queue - AMQP client and consumer runtime
//!
//! This crate owns the broker side of the pipeline: topology declaration
//! (per-project topic exchanges, durable stage queues, dead-letter
//! siblings), persistent publishing, and the prefetch-1 consumer loop that
//! drives a [`consumer::StageHandler`] and settles every delivery with
//! exactly one of ack, reject-without-requeue, or nack-requeue.
//!
//! Delivery is at-least-once. Messages rejected without requeue flow to the
//! stage's dead-letter queue, which acts as the forensic log; retries are
//! operator-driven. Broker connection loss is fatal to the process — an
//! external supervisor restarts it.

pub mod client;
pub mod consumer;

pub use client::{MessageQueue, QueueSpec, TransportError};
pub use consumer::{ConsumerRuntime, Disposition, StageError, StageHandler};

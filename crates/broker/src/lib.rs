//! Broker plumbing shared by the chat nodes and the persistence worker.
//!
//! One publisher connection set and one consumer connection set per process,
//! both lazily established and re-established on loss. All exchanges are
//! direct and durable, all queues durable, all publishes persistent.

mod consumer;
mod error;
mod publisher;

pub use {
    consumer::{QueueSpec, consume_with_reconnect, next_backoff},
    error::{Error, Result},
    publisher::{AmqpPublisher, Publisher},
};

//! Consume side: declare, bind and consume a durable queue, reconnecting on
//! link loss with bounded exponential backoff.

use std::time::Duration;

use {
    amqprs::{
        channel::{BasicConsumeArguments, QueueBindArguments, QueueDeclareArguments},
        consumer::AsyncConsumer,
    },
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use parley_config::BrokerSettings;

use crate::{
    Error, Result,
    publisher::{declare_direct_exchange, open_channel, open_connection},
};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// A durable queue bound to a direct exchange by one routing key.
#[derive(Debug, Clone)]
pub struct QueueSpec {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
}

/// Next reconnect delay: doubling from 1s, capped at 30s.
#[must_use]
pub fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

/// Run a consumer until cancelled.
///
/// The topology is declared lazily on every (re)connect; manual acks only.
/// Unacked deliveries are requeued by the broker when the link drops, so a
/// crash mid-handling retries rather than loses. Retries are indefinite.
pub async fn consume_with_reconnect<C, F>(
    settings: BrokerSettings,
    spec: QueueSpec,
    consumer_tag: &str,
    mut make_consumer: F,
    cancel: CancellationToken,
) -> Result<()>
where
    C: AsyncConsumer + Send + 'static,
    F: FnMut() -> C,
{
    let mut delay = INITIAL_BACKOFF;
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }
        match consume_once(&settings, &spec, consumer_tag, make_consumer(), &cancel).await {
            Ok(()) => {
                info!(queue = %spec.queue, "broker: consumer cancelled, closing");
                return Ok(());
            },
            Err(e) => {
                warn!(
                    queue = %spec.queue,
                    error = %e,
                    retry_in_secs = delay.as_secs(),
                    "broker: consume loop lost"
                );
                tokio::select! {
                    () = cancel.cancelled() => return Ok(()),
                    () = tokio::time::sleep(delay) => {},
                }
                delay = next_backoff(delay);
            },
        }
    }
}

async fn consume_once<C>(
    settings: &BrokerSettings,
    spec: &QueueSpec,
    consumer_tag: &str,
    consumer: C,
    cancel: &CancellationToken,
) -> Result<()>
where
    C: AsyncConsumer + Send + 'static,
{
    let connection = open_connection(settings).await?;
    let channel = open_channel(&connection).await?;
    declare_direct_exchange(&channel, &spec.exchange).await?;
    channel
        .queue_declare(QueueDeclareArguments::durable_client_named(&spec.queue))
        .await?;
    channel
        .queue_bind(QueueBindArguments::new(
            &spec.queue,
            &spec.exchange,
            &spec.routing_key,
        ))
        .await?;

    channel
        .basic_consume(
            consumer,
            BasicConsumeArguments::new(&spec.queue, consumer_tag)
                .manual_ack(true)
                .finish(),
        )
        .await?;
    info!(
        queue = %spec.queue,
        routing_key = %spec.routing_key,
        "broker: consuming"
    );

    let cancelled = tokio::select! {
        () = cancel.cancelled() => true,
        _ = connection.listen_network_io_failure() => false,
    };
    if cancelled {
        let _ = channel.close().await;
        let _ = connection.close().await;
        Ok(())
    } else {
        Err(Error::ConnectionLost)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_to_the_cap() {
        let mut delay = INITIAL_BACKOFF;
        let mut observed = Vec::new();
        for _ in 0..7 {
            observed.push(delay.as_secs());
            delay = next_backoff(delay);
        }
        assert_eq!(observed, vec![1, 2, 4, 8, 16, 30, 30]);
    }
}

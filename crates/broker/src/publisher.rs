//! Publish side: one persistent connection/channel/exchange set, reused for
//! every publish and rebuilt when the broker drops it.

use {
    amqprs::{
        BasicProperties,
        callbacks::{DefaultChannelCallback, DefaultConnectionCallback},
        channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
        connection::{Connection, OpenConnectionArguments},
    },
    async_trait::async_trait,
    tokio::sync::Mutex,
    tracing::info,
};

use parley_config::BrokerSettings;

use crate::{Error, Result};

/// Something that can publish a message body under a routing key. The broker
/// implementation is [`AmqpPublisher`]; tests substitute a recorder.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, routing_key: &str, body: Vec<u8>) -> Result<()>;
}

struct Live {
    connection: Connection,
    channel: Channel,
}

/// Publisher bound to one direct, durable exchange.
///
/// The connection, channel and exchange declaration are established on first
/// use and re-established whenever either side of the link is found closed,
/// serialized behind a mutex so reconnects cannot race.
pub struct AmqpPublisher {
    settings: BrokerSettings,
    exchange: String,
    live: Mutex<Option<Live>>,
}

impl AmqpPublisher {
    #[must_use]
    pub fn new(settings: BrokerSettings, exchange: impl Into<String>) -> Self {
        Self {
            settings,
            exchange: exchange.into(),
            live: Mutex::new(None),
        }
    }

    async fn ensure(&self, live: &mut Option<Live>) -> Result<()> {
        if live
            .as_ref()
            .is_some_and(|l| l.connection.is_open() && l.channel.is_open())
        {
            return Ok(());
        }
        *live = None;

        info!(
            host = %self.settings.host,
            port = self.settings.port,
            exchange = %self.exchange,
            "broker: establishing publisher connection"
        );
        let connection = open_connection(&self.settings).await?;
        let channel = open_channel(&connection).await?;
        declare_direct_exchange(&channel, &self.exchange).await?;
        *live = Some(Live { connection, channel });
        Ok(())
    }
}

#[async_trait]
impl Publisher for AmqpPublisher {
    async fn publish(&self, routing_key: &str, body: Vec<u8>) -> Result<()> {
        let mut live = self.live.lock().await;
        self.ensure(&mut live).await?;
        let channel = live
            .as_ref()
            .map(|l| &l.channel)
            .ok_or(Error::ConnectionLost)?;

        let properties = BasicProperties::default().with_persistence(true).finish();
        channel
            .basic_publish(
                properties,
                body,
                BasicPublishArguments::new(&self.exchange, routing_key),
            )
            .await?;
        Ok(())
    }
}

pub(crate) async fn open_connection(settings: &BrokerSettings) -> Result<Connection> {
    let connection = Connection::open(&OpenConnectionArguments::new(
        &settings.host,
        settings.port,
        &settings.username,
        &settings.password,
    ))
    .await?;
    connection.register_callback(DefaultConnectionCallback).await?;
    Ok(connection)
}

pub(crate) async fn open_channel(connection: &Connection) -> Result<Channel> {
    let channel = connection.open_channel(None).await?;
    channel.register_callback(DefaultChannelCallback).await?;
    Ok(channel)
}

pub(crate) async fn declare_direct_exchange(channel: &Channel, exchange: &str) -> Result<()> {
    channel
        .exchange_declare(
            ExchangeDeclareArguments::new(exchange, "direct")
                .durable(true)
                .finish(),
        )
        .await?;
    Ok(())
}

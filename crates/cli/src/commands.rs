//! Service wiring: build each service's dependency graph from the
//! environment and run it until cancelled.

use std::{sync::Arc, time::Duration};

use {
    anyhow::Context,
    sqlx::postgres::PgPoolOptions,
    tokio_util::sync::CancellationToken,
    tracing::info,
};

use {
    parley_broker::AmqpPublisher,
    parley_cache::RedisHotWindow,
    parley_config::{
        BrokerSettings, HistorySettings, NodeSettings, PersistenceSettings, PresenceSettings,
    },
    parley_history::HistoryReader,
    parley_node::{
        Distributor, HttpPushSink, LogPushSink, NodeContext, PushSink, StoreMembership,
    },
    parley_presence::{HttpPresence, Presence, RedisPresence},
    parley_protocol::PERSISTENCE_EXCHANGE,
    parley_storage::{PgConversationStore, PgMessageStore, init_schema},
};

async fn pg_pool(url: &str) -> anyhow::Result<sqlx::PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(url)
        .await
        .context("connecting to the ordered store")?;
    init_schema(&pool).await.context("initializing store schema")?;
    Ok(pool)
}

pub async fn node(cancel: CancellationToken) -> anyhow::Result<()> {
    let broker = BrokerSettings::from_env()?;
    let settings = NodeSettings::from_env()?;
    let database = parley_config::DatabaseSettings::from_env()?;
    info!(node_id = %settings.node_id, "starting chat node");

    let pool = pg_pool(&database.url).await?;
    let conversations = Arc::new(PgConversationStore::new(pool));
    let presence: Arc<dyn Presence> = Arc::new(HttpPresence::new(&settings.presence_url)?);
    let push: Arc<dyn PushSink> = match &settings.push_url {
        Some(url) => Arc::new(HttpPushSink::new(url)?),
        None => Arc::new(LogPushSink),
    };

    let distributor = Distributor::new(
        Arc::new(AmqpPublisher::new(broker.clone(), broker.exchange.clone())),
        Arc::new(AmqpPublisher::new(broker.clone(), PERSISTENCE_EXCHANGE)),
        Arc::clone(&presence),
        Arc::new(StoreMembership::new(conversations)),
        push,
    );
    let context = Arc::new(NodeContext::new(
        settings.node_id.clone(),
        presence,
        distributor,
    ));

    parley_node::server::run(context, broker, settings.bind, cancel).await?;
    Ok(())
}

pub async fn presence(cancel: CancellationToken) -> anyhow::Result<()> {
    let settings = PresenceSettings::from_env()?;
    info!("starting presence registry");

    let registry = Arc::new(RedisPresence::connect(&settings.redis.url())?);
    let stale_after = (settings.stale_after_secs > 0)
        .then(|| Duration::from_secs(settings.stale_after_secs));

    parley_presence::server::run(registry, settings.bind, stale_after, cancel).await?;
    Ok(())
}

pub async fn persistence(cancel: CancellationToken) -> anyhow::Result<()> {
    let settings = PersistenceSettings::from_env()?;
    info!("starting persistence worker");

    let pool = pg_pool(&settings.database.url).await?;
    let hot = Arc::new(RedisHotWindow::connect(&settings.redis.url())?);
    let store = Arc::new(PgMessageStore::new(pool));

    parley_persistence::run(settings.broker, hot, store, cancel).await?;
    Ok(())
}

pub async fn history(cancel: CancellationToken) -> anyhow::Result<()> {
    let settings = HistorySettings::from_env()?;
    info!("starting sync/history service");

    let pool = pg_pool(&settings.database.url).await?;
    let reader = Arc::new(HistoryReader::new(
        Arc::new(PgMessageStore::new(pool.clone())),
        Arc::new(PgConversationStore::new(pool)),
        Arc::new(RedisHotWindow::connect(&settings.redis.url())?),
    ));

    parley_history::server::run(reader, settings.bind, cancel).await?;
    Ok(())
}

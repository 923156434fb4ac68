//! Node HTTP server: the health probe and the WebSocket route, plus the
//! background consumer for this node's delivery queue.

use std::{net::SocketAddr, sync::Arc};

use {
    axum::{Router, extract::State, routing::get},
    tokio_util::sync::CancellationToken,
    tracing::info,
};

use {
    parley_broker::{QueueSpec, consume_with_reconnect},
    parley_config::BrokerSettings,
    parley_protocol::node_queue,
};

use crate::{NodeConsumer, NodeContext, Result, socket::ws_route};

/// Build the node's router.
pub fn router(context: Arc<NodeContext>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/ws/{user_id}/{device_id}", get(ws_route))
        .with_state(context)
}

async fn health(State(context): State<Arc<NodeContext>>) -> String {
    format!(
        "parley-node {} ok ({} devices attached)",
        context.node_id,
        context.table.device_count().await
    )
}

/// Run the node until cancelled: the delivery-queue consumer in the
/// background, the HTTP/WS server in the foreground.
pub async fn run(
    context: Arc<NodeContext>,
    broker: BrokerSettings,
    bind: SocketAddr,
    cancel: CancellationToken,
) -> Result<()> {
    let spec = QueueSpec {
        exchange: broker.exchange.clone(),
        queue: node_queue(&context.node_id),
        routing_key: context.node_id.clone(),
    };
    let consumer_tag = format!("{}-consumer", context.node_id);
    let consumer_context = Arc::clone(&context);
    let consumer_cancel = cancel.clone();
    let consumer = tokio::spawn(async move {
        consume_with_reconnect(
            broker,
            spec,
            &consumer_tag,
            || NodeConsumer::new(Arc::clone(&consumer_context)),
            consumer_cancel,
        )
        .await
    });

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(node_id = %context.node_id, %bind, "node: listening");
    axum::serve(listener, router(context))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;

    consumer.abort();
    Ok(())
}

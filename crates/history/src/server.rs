//! History HTTP server.

use std::{net::SocketAddr, sync::Arc};

use {
    tokio_util::sync::CancellationToken,
    tracing::info,
};

use crate::{HistoryReader, Result, routes::router};

/// Serve the history API until cancelled.
pub async fn run(
    reader: Arc<HistoryReader>,
    bind: SocketAddr,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, "history: listening");
    axum::serve(listener, router(reader))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    Ok(())
}

//! Presence registry HTTP server, with the optional staleness sweep.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::{RedisPresence, routes::router};

/// Serve the registry until cancelled. When `stale_after` is set, a
/// background task periodically flips `online` records whose `last_online`
/// has fallen behind, the recovery path for sockets that died without a
/// clean offline transition.
pub async fn run(
    registry: Arc<RedisPresence>,
    bind: SocketAddr,
    stale_after: Option<Duration>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    if let Some(stale_after) = stale_after {
        let sweeper = Arc::clone(&registry);
        let sweep_cancel = cancel.clone();
        let interval = (stale_after / 2).max(Duration::from_secs(10));
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = sweep_cancel.cancelled() => break,
                    () = tokio::time::sleep(interval) => {},
                }
                match sweeper.sweep_stale(stale_after).await {
                    Ok(0) => {},
                    Ok(swept) => info!(swept, "presence: stale online records swept offline"),
                    Err(e) => warn!(error = %e, "presence: staleness sweep failed"),
                }
            }
        });
    }

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, "presence: listening");
    axum::serve(listener, router(registry))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
}

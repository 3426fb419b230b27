//! Process-level helpers: shutdown signalling and status logging.

use schema_bridge_kafka::StatusReporter;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Token cancelled on Ctrl+C.
pub fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down");
                trigger.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl+C: {e}"),
        }
    });
    token
}

/// Log the status text whenever it changes.
pub fn spawn_status_logger(status: &StatusReporter) -> JoinHandle<()> {
    let mut changes = status.subscribe();
    tokio::spawn(async move {
        let mut last = String::new();
        while changes.changed().await.is_ok() {
            let text = changes.borrow_and_update().text();
            if text != last {
                debug!("Status: {text}");
                last = text;
            }
        }
    })
}

//! Consumer and producer pipelines.
//!
//! Both pipelines follow the same lifecycle: resolve the subject's schema,
//! connect to the brokers from a separate task, then serve records until
//! shutdown. Per-record failures become error artifacts and never stop the
//! pipeline; broker failures in steady state move it to `Failed`.

pub mod consumer;
pub mod producer;

use kafka_types::StartPosition;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

use crate::broker::BrokerClient;
use crate::error::{Error, Result};

pub use consumer::{ConsumerPipeline, Disposition};
pub use producer::{InputPayload, ProducerInput, ProducerPipeline};

/// Connect (and optionally subscribe) from a dedicated task that reports
/// the outcome back over a oneshot channel.
pub(crate) async fn connect_broker<B>(
    broker: Arc<B>,
    subscription: Option<(String, StartPosition)>,
) -> Result<()>
where
    B: BrokerClient + ?Sized + 'static,
{
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let outcome = async {
            broker.connect().await?;
            if let Some((topic, start)) = subscription {
                broker.subscribe(&topic, start).await?;
            }
            Ok::<(), Error>(())
        }
        .await;
        if tx.send(outcome).is_err() {
            debug!("Connection outcome dropped; pipeline no longer waiting");
        }
    });

    rx.await.map_err(|_| {
        Error::Transport("Connection task ended without reporting an outcome".to_string())
    })?
}

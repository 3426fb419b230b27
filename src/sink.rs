//! JSON-lines output for emitted artifacts.

use anyhow::Context;
use schema_bridge_kafka::{Emission, EmissionReceiver, OutputPort};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Counts of lines written per output.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SinkStats {
    pub primary: u64,
    pub secondary: u64,
}

/// Writes each artifact as one JSON line to the writer for its output.
pub struct JsonLinesSink<P, S> {
    primary: P,
    secondary: S,
    stats: SinkStats,
}

impl<P, S> JsonLinesSink<P, S>
where
    P: AsyncWrite + Unpin,
    S: AsyncWrite + Unpin,
{
    pub fn new(primary: P, secondary: S) -> Self {
        Self {
            primary,
            secondary,
            stats: SinkStats::default(),
        }
    }

    pub async fn write(&mut self, emission: &Emission) -> anyhow::Result<()> {
        let mut line =
            serde_json::to_vec(&emission.artifact).context("Failed to serialize artifact")?;
        line.push(b'\n');

        match emission.port {
            OutputPort::Primary => {
                self.primary
                    .write_all(&line)
                    .await
                    .context("Failed to write to primary output")?;
                self.primary.flush().await?;
                self.stats.primary += 1;
            }
            OutputPort::Secondary => {
                self.secondary
                    .write_all(&line)
                    .await
                    .context("Failed to write to secondary output")?;
                self.secondary.flush().await?;
                self.stats.secondary += 1;
            }
        }
        Ok(())
    }

    /// Write emissions until every sender is gone.
    pub async fn drain(mut self, mut rx: EmissionReceiver) -> anyhow::Result<SinkStats> {
        while let Some(emission) = rx.recv().await {
            self.write(&emission).await?;
        }
        Ok(self.stats)
    }

    pub fn into_inner(self) -> (P, S) {
        (self.primary, self.secondary)
    }
}

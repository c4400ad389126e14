//! NATS reply publisher

use anyhow::{Context, Result};
use async_nats::{Client, Subject};
use tracing::debug;

/// Publishes serialized replies back to requesters
#[derive(Clone)]
pub struct ResponsePublisher {
    client: Client,
}

impl ResponsePublisher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Send `body` to the reply subject of a request
    pub async fn reply(&self, reply_to: Subject, body: Vec<u8>) -> Result<()> {
        let bytes = body.len();
        self.client
            .publish(reply_to.clone(), body.into())
            .await
            .with_context(|| format!("Failed to publish reply to {}", reply_to))?;

        debug!(reply_to = %reply_to, bytes = bytes, "Published reply");
        Ok(())
    }

    /// Flush pending replies, e.g. before shutdown
    pub async fn flush(&self) -> Result<()> {
        self.client.flush().await.context("Failed to flush NATS client")
    }
}

#[cfg(test)]
mod tests {
    // Integration tests would require a running NATS server
}

use alloy_eips::BlockNumberOrTag;
use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::indexer::client::RetryingClient;
use crate::indexer::reconciler::{ChainEvent, Reconciler};
use crate::metrics::Metrics;
use crate::models::errors::ReorgError;

/// Single polling loop feeding newly observed blocks through the reconciler
/// and handing the resulting events to the processor queue.
pub struct Scheduler {
    client: Arc<RetryingClient>,
    reconciler: Reconciler,
    events: Sender<ChainEvent>,
    cancel: CancellationToken,
    poll_interval: Duration,
    /// Heads further ahead than this are walked one block number at a time.
    catch_up_threshold: u64,
}

impl Scheduler {
    pub fn new(
        client: Arc<RetryingClient>,
        reconciler: Reconciler,
        events: Sender<ChainEvent>,
        cancel: CancellationToken,
        poll_interval: Duration,
        catch_up_threshold: u64,
    ) -> Self {
        Self {
            client,
            reconciler,
            events,
            cancel,
            poll_interval,
            catch_up_threshold: catch_up_threshold.max(1),
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Poll until cancelled. Only a deep reorg ends the loop with an error.
    pub async fn run(mut self) -> Result<()> {
        if let Some(latest) = self.reconciler.latest() {
            info!("Polling for blocks after {} ({})", latest.number, latest.hash);
        }

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.poll_once().await {
                // Drain the backlog before waiting again
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) if self.cancel.is_cancelled() => {
                    debug!("Poll interrupted by shutdown: {:#}", e);
                    break;
                }
                Err(e) => {
                    if let Some(ReorgError::DeepReorg { .. }) = e.downcast_ref::<ReorgError>() {
                        error!("Stopping: {:#}", e);
                        return Err(e);
                    }
                    error!("Polling cycle failed: {:#}", e);
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("Scheduler stopped");
        Ok(())
    }

    /// One comparison of the local and remote heads. Returns `true` when a
    /// block was fetched and produced events.
    pub async fn poll_once(&mut self) -> Result<bool> {
        let local = self
            .reconciler
            .latest()
            .map(|header| header.number)
            .ok_or_else(|| anyhow!("reconciler has not been seeded"))?;

        let remote = self.client.get_block_number().await?;
        if let Some(metrics) = Metrics::global() {
            metrics.chain_tip_block.record(remote, &[]);
        }

        if local >= remote {
            debug!("Up to date at block {} (node at {})", local, remote);
            return Ok(false);
        }

        let target = if remote - local > self.catch_up_threshold {
            debug!("{} blocks behind, catching up by number", remote - local);
            BlockNumberOrTag::Number(local + 1)
        } else {
            BlockNumberOrTag::Latest
        };

        let block = self
            .client
            .get_block_by_number(target)
            .await?
            .ok_or_else(|| anyhow!("node returned no block for {}", target))?;

        let events = self
            .reconciler
            .reconcile(block, self.client.as_ref())
            .await?;
        let produced = !events.is_empty();

        for event in events {
            self.events
                .send(event)
                .await
                .map_err(|_| anyhow!("block processor is no longer receiving events"))?;
        }

        if let Some(metrics) = Metrics::global() {
            metrics
                .event_queue_capacity
                .record(self.events.capacity() as u64, &[]);
        }

        Ok(produced)
    }
}

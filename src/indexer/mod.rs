pub mod block_processor;
pub mod client;
pub mod reconciler;
pub mod rpc;
pub mod scheduler;
pub mod transformations;

use alloy_eips::BlockNumberOrTag;
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::indexer::block_processor::BlockProcessor;
use crate::indexer::client::RetryingClient;
use crate::indexer::reconciler::{BlockHeader, Reconciler};
use crate::indexer::scheduler::Scheduler;
use crate::models::common::{Config, StartBlock};
use crate::models::rpc::RawBlock;
use crate::storage::MetricStore;

pub const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Pick the block to resume from: the last block in the store, then the
/// configured start block, then the node's head.
pub async fn resolve_start_block(
    client: &RetryingClient,
    store: &dyn MetricStore,
    config: &Config,
) -> Result<RawBlock> {
    if let Some(hash) = store
        .last_block_hash()
        .await
        .context("failed to read last stored block")?
    {
        match client.get_block_by_hash(&hash).await? {
            Some(block) => {
                info!("Resuming from last stored block {} ({})", block.number, block.hash);
                return Ok(block);
            }
            None => warn!(
                "Last stored block {} is unknown to the node, falling back",
                hash
            ),
        }
    }

    if let Some(start) = config.start_block()? {
        let block = match start {
            StartBlock::Hash(hash) => client.get_block_by_hash(&hash).await?,
            StartBlock::Number(number) => {
                client
                    .get_block_by_number(BlockNumberOrTag::Number(number))
                    .await?
            }
        };
        match block {
            Some(block) => {
                info!("Starting from configured block {}", start);
                return Ok(block);
            }
            None => warn!("Configured start block {} is unknown to the node, falling back", start),
        }
    }

    let block = client
        .get_block_by_number(BlockNumberOrTag::Latest)
        .await?
        .ok_or_else(|| anyhow!("node returned no latest block"))?;
    info!("Starting from the chain head {} ({})", block.number, block.hash);
    Ok(block)
}

/// Build the reconciler's initial segment from `start` and up to `seed_depth`
/// of its ancestors, so a reorg of the starting block itself can be replayed.
pub async fn seed_reconciler(
    client: &RetryingClient,
    start: &RawBlock,
    history_size: usize,
    seed_depth: usize,
) -> Result<Reconciler> {
    let mut headers = vec![BlockHeader::from_raw(start)?];

    while headers.len() <= seed_depth {
        let Some(oldest) = headers.last().copied() else {
            break;
        };
        if oldest.number == 0 {
            break;
        }
        match client.get_block_header_by_hash(&oldest.parent_hash).await? {
            Some(parent) => headers.push(BlockHeader::from_raw(&parent)?),
            None => {
                warn!("Ancestor {} of the start block is unavailable", oldest.parent_hash);
                break;
            }
        }
    }

    headers.reverse();
    let mut reconciler = Reconciler::new(history_size);
    reconciler.seed(headers);
    Ok(reconciler)
}

/// Run the pipeline until `cancel` fires or the chain diverges beyond the
/// retained history. Events still queued when the scheduler stops are drained
/// before returning.
pub async fn run_pipeline(
    config: &Config,
    client: Arc<RetryingClient>,
    store: Arc<dyn MetricStore>,
    cancel: CancellationToken,
) -> Result<()> {
    let start = resolve_start_block(&client, store.as_ref(), config).await?;
    let reconciler =
        seed_reconciler(&client, &start, config.history_size, config.seed_depth).await?;

    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let worker = BlockProcessor::new(client.clone(), store, config.receipt_concurrency)
        .spawn(events_rx);

    let scheduler = Scheduler::new(
        client,
        reconciler,
        events_tx,
        cancel,
        Duration::from_millis(config.poll_interval_ms),
        config.history_size as u64,
    );
    let result = scheduler.run().await;

    worker.await.context("block processor task failed")?;
    result
}

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::indexer::client::RetryingClient;
use crate::indexer::reconciler::{BlockHeader, ChainEvent};
use crate::indexer::rpc::{parse_block, parse_receipt, parse_timestamp};
use crate::indexer::transformations::{transform_transactions, BlockTransformer};
use crate::metrics::Metrics;
use crate::models::common::BlockMetrics;
use crate::models::datasets::blocks::Block;
use crate::models::datasets::transactions::Receipt;
use crate::models::rpc::RawBlock;
use crate::storage::MetricStore;
use crate::utils::hex::HexString;
use crate::utils::retry::{retry, RetryConfig};

/// Lifecycle of a single block event. Adds go `Pending -> Parsed -> Enriched ->
/// Committed`, removals go `Pending -> Purged`; any step may end in `Failed`.
/// Adds abandoned on shutdown stay `Pending` and are fetched again on resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Pending,
    Parsed,
    Enriched,
    Committed,
    Purged,
    Failed,
}

pub struct BlockProcessor {
    client: Arc<RetryingClient>,
    store: Arc<dyn MetricStore>,
    receipt_concurrency: usize,
    store_retry: RetryConfig,
}

impl BlockProcessor {
    pub fn new(
        client: Arc<RetryingClient>,
        store: Arc<dyn MetricStore>,
        receipt_concurrency: usize,
    ) -> Self {
        Self {
            client,
            store,
            receipt_concurrency: receipt_concurrency.max(1),
            store_retry: RetryConfig::default(),
        }
    }

    pub fn with_store_retry(mut self, store_retry: RetryConfig) -> Self {
        self.store_retry = store_retry;
        self
    }

    pub fn spawn(self, events: Receiver<ChainEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(events))
    }

    /// Handle events strictly one after another until every sender is gone.
    pub async fn run(self, mut events: Receiver<ChainEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        info!("Event queue closed, block processor stopped");
    }

    pub async fn handle(&self, event: ChainEvent) -> BlockState {
        let started = Instant::now();
        let description = event.describe();
        let adding = matches!(event, ChainEvent::Added(_));
        debug!("{}: {:?}", description, BlockState::Pending);

        let outcome = match event {
            ChainEvent::Added(_) if self.client.is_cancelled() => {
                debug!("{}: abandoned on shutdown", description);
                return BlockState::Pending;
            }
            ChainEvent::Added(raw) => self.add_block(&raw).await,
            ChainEvent::Removed(header) => self.remove_block(&header).await,
        };

        match outcome {
            Err(e) if adding && self.client.is_cancelled() => {
                debug!("{}: interrupted by shutdown: {:#}", description, e);
                BlockState::Pending
            }
            Ok(state) => {
                debug!("{}: {:?}", description, state);
                if let Some(metrics) = Metrics::global() {
                    metrics
                        .latest_block_processing_time
                        .record(started.elapsed().as_secs_f64(), &[]);
                }
                state
            }
            Err(e) => {
                error!("Failed to process {}: {:#}", description, e);
                if let Some(metrics) = Metrics::global() {
                    metrics.blocks_failed.add(1, &[]);
                }
                BlockState::Failed
            }
        }
    }

    async fn add_block(&self, raw: &RawBlock) -> Result<BlockState> {
        let block = parse_block(raw)?;
        debug!("Block {} ({}): {:?}", block.number, raw.hash, BlockState::Parsed);

        let (parent_timestamp, receipts) =
            tokio::try_join!(self.fetch_parent_timestamp(&block), self.fetch_receipts(&block))?;
        debug!(
            "Block {} ({}): {:?} with {} receipts",
            block.number,
            raw.hash,
            BlockState::Enriched,
            receipts.len()
        );

        let metrics = BlockMetrics {
            block: block.transform_block(parent_timestamp),
            transactions: transform_transactions(
                &block.transactions,
                &receipts,
                block.timestamp,
            )?,
        };

        retry(
            || self.store.write_block(&metrics),
            &self.store_retry,
            "write_block",
        )
        .await?;

        info!(
            "Committed block {} ({}) with {} transactions",
            block.number,
            raw.hash,
            metrics.transactions.len()
        );
        if let Some(m) = Metrics::global() {
            m.blocks_committed.add(1, &[]);
            m.latest_processed_block.record(block.number, &[]);
        }
        Ok(BlockState::Committed)
    }

    async fn remove_block(&self, header: &BlockHeader) -> Result<BlockState> {
        info!(
            "Purging block {} ({})",
            header.number,
            header.hash.to_0x_string()
        );
        retry(
            || self.store.purge_block(header.timestamp),
            &self.store_retry,
            "purge_block",
        )
        .await?;

        if let Some(metrics) = Metrics::global() {
            metrics.blocks_purged.add(1, &[]);
        }
        Ok(BlockState::Purged)
    }

    async fn fetch_parent_timestamp(&self, block: &Block) -> Result<Option<DateTime<Utc>>> {
        if block.number == 0 {
            return Ok(None);
        }

        let parent = self
            .client
            .get_block_header_by_hash(&block.parent_hash)
            .await
            .context("failed to fetch parent block")?
            .ok_or_else(|| {
                anyhow!(
                    "node has no parent {} for block {}",
                    block.parent_hash.to_0x_string(),
                    block.number
                )
            })?;

        Ok(Some(parse_timestamp(&parent.timestamp)?))
    }

    /// Receipts in transaction order, at most `receipt_concurrency` in flight.
    async fn fetch_receipts(&self, block: &Block) -> Result<Vec<Receipt>> {
        let hashes: Vec<_> = block.transactions.iter().map(|t| t.hash).collect();
        let client = self.client.clone();

        stream::iter(hashes)
            .map(move |hash| {
                let client = client.clone();
                async move {
                    let raw = client
                        .get_transaction_receipt(&hash)
                        .await
                        .context("failed to fetch receipt")?
                        .ok_or_else(|| {
                            anyhow!(
                                "node has no receipt for transaction {}",
                                hash.to_0x_string()
                            )
                        })?;
                    Ok::<_, anyhow::Error>(parse_receipt(&raw)?)
                }
            })
            .buffered(self.receipt_concurrency)
            .try_collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::client::RetrySettings;
    use crate::test_utils::{
        chain_block, hash, raw_receipt, raw_transaction, MemoryStore, MockNode,
    };
    use tokio_util::sync::CancellationToken;

    fn node_with_transactions() -> (Arc<MockNode>, RawBlock) {
        let mut block = chain_block(5, 0);
        block.transactions = vec![
            raw_transaction(hash(500), 5, 0),
            raw_transaction(hash(501), 5, 1),
        ];
        let node = MockNode::with_chain((0..5).map(|n| chain_block(n, 0)));
        node.push(block.clone());
        (Arc::new(node), block)
    }

    fn processor(node: &Arc<MockNode>, store: &Arc<MemoryStore>) -> BlockProcessor {
        let client = RetryingClient::new(
            node.clone(),
            RetrySettings::default(),
            CancellationToken::new(),
        );
        BlockProcessor::new(Arc::new(client), store.clone(), 4).with_store_retry(RetryConfig {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 100,
            exponential: 2.0,
        })
    }

    fn header(number: u64) -> BlockHeader {
        BlockHeader::from_raw(&chain_block(number, 0)).unwrap()
    }

    #[tokio::test]
    async fn test_added_block_is_committed() {
        let (node, block) = node_with_transactions();
        let store = Arc::new(MemoryStore::new());
        let processor = processor(&node, &store);

        let state = processor.handle(ChainEvent::Added(Box::new(block))).await;

        assert_eq!(state, BlockState::Committed);
        let blocks = store.blocks();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].block.number, 5);
        assert_eq!(blocks[0].block.since_previous_block_seconds, 12);
        assert_eq!(blocks[0].transactions.len(), 2);
        assert_eq!(blocks[0].transactions[1].index, 1);
        assert_eq!(node.calls("eth_getTransactionReceipt"), 2);
        assert_eq!(node.calls("eth_getBlockByHash"), 1);
    }

    #[tokio::test]
    async fn test_reverted_transaction_is_flagged() {
        let (node, block) = node_with_transactions();
        let mut reverted = raw_receipt(hash(501), hash(5), 5, 1);
        reverted.status = Some("0x0".to_string());
        node.set_receipt(reverted);
        let store = Arc::new(MemoryStore::new());
        let processor = processor(&node, &store);

        let state = processor.handle(ChainEvent::Added(Box::new(block))).await;

        assert_eq!(state, BlockState::Committed);
        let transactions = &store.blocks()[0].transactions;
        assert!(!transactions[0].failed);
        assert!(transactions[1].failed);
    }

    #[tokio::test]
    async fn test_genesis_skips_parent_lookup() {
        let node = Arc::new(MockNode::with_chain([chain_block(0, 0)]));
        let store = Arc::new(MemoryStore::new());
        let processor = processor(&node, &store);

        let state = processor
            .handle(ChainEvent::Added(Box::new(chain_block(0, 0))))
            .await;

        assert_eq!(state, BlockState::Committed);
        assert_eq!(store.blocks()[0].block.since_previous_block_seconds, 0);
        assert_eq!(node.calls("eth_getBlockByHash"), 0);
    }

    #[tokio::test]
    async fn test_removed_block_is_purged() {
        let node = Arc::new(MockNode::with_chain((0..=3).map(|n| chain_block(n, 0))));
        let store = Arc::new(MemoryStore::new());
        let processor = processor(&node, &store);

        for n in 1..=3 {
            let state = processor
                .handle(ChainEvent::Added(Box::new(chain_block(n, 0))))
                .await;
            assert_eq!(state, BlockState::Committed);
        }

        let state = processor.handle(ChainEvent::Removed(header(3))).await;

        assert_eq!(state, BlockState::Purged);
        assert_eq!(store.numbers(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_malformed_block_fails_without_writing() {
        let node = Arc::new(MockNode::with_chain((0..=1).map(|n| chain_block(n, 0))));
        let store = Arc::new(MemoryStore::new());
        let processor = processor(&node, &store);

        let mut raw = chain_block(1, 0);
        raw.miner = "0xnot-an-address".to_string();
        let state = processor.handle(ChainEvent::Added(Box::new(raw))).await;

        assert_eq!(state, BlockState::Failed);
        assert!(store.blocks().is_empty());
    }

    #[tokio::test]
    async fn test_missing_receipt_fails_block() {
        let node = Arc::new(MockNode::with_chain((0..=5).map(|n| chain_block(n, 0))));
        let store = Arc::new(MemoryStore::new());
        let processor = processor(&node, &store);

        // Block served with a transaction the node has no receipt for
        let mut raw = chain_block(5, 0);
        raw.transactions = vec![raw_transaction(hash(999), 5, 0)];
        let state = processor.handle(ChainEvent::Added(Box::new(raw))).await;

        assert_eq!(state, BlockState::Failed);
        assert!(store.blocks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_store_failure_is_retried() {
        let node = Arc::new(MockNode::with_chain((0..=1).map(|n| chain_block(n, 0))));
        let store = Arc::new(MemoryStore::failing(2));
        let processor = processor(&node, &store);

        let state = processor
            .handle(ChainEvent::Added(Box::new(chain_block(1, 0))))
            .await;

        assert_eq!(state, BlockState::Committed);
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_store_failure_fails_block() {
        let node = Arc::new(MockNode::with_chain((0..=1).map(|n| chain_block(n, 0))));
        let store = Arc::new(MemoryStore::failing(10));
        let processor = processor(&node, &store);

        let state = processor
            .handle(ChainEvent::Added(Box::new(chain_block(1, 0))))
            .await;

        assert_eq!(state, BlockState::Failed);
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn test_worker_processes_in_order() {
        let node = Arc::new(MockNode::with_chain((0..=3).map(|n| chain_block(n, 0))));
        let store = Arc::new(MemoryStore::new());
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let worker = processor(&node, &store).spawn(rx);

        for n in 1..=3 {
            tx.send(ChainEvent::Added(Box::new(chain_block(n, 0))))
                .await
                .unwrap();
        }
        tx.send(ChainEvent::Removed(header(3))).await.unwrap();
        drop(tx);
        worker.await.unwrap();

        assert_eq!(store.numbers(), vec![1, 2]);
        assert_eq!(store.purges(), 1);
    }

    #[tokio::test]
    async fn test_additions_are_abandoned_after_shutdown() {
        let node = Arc::new(MockNode::with_chain((0..=3).map(|n| chain_block(n, 0))));
        let store = Arc::new(MemoryStore::new());
        let cancel = CancellationToken::new();
        let client = RetryingClient::new(node.clone(), RetrySettings::default(), cancel.clone());
        let processor = BlockProcessor::new(Arc::new(client), store.clone(), 4);

        assert_eq!(
            processor
                .handle(ChainEvent::Added(Box::new(chain_block(3, 0))))
                .await,
            BlockState::Committed
        );
        cancel.cancel();

        let state = processor
            .handle(ChainEvent::Added(Box::new(chain_block(2, 0))))
            .await;
        assert_eq!(state, BlockState::Pending);
        assert_eq!(node.calls("eth_getBlockByHash"), 1);

        // Removals only touch the store and still complete
        let state = processor.handle(ChainEvent::Removed(header(3))).await;
        assert_eq!(state, BlockState::Purged);
        assert!(store.blocks().is_empty());
    }

    #[test]
    fn test_worker_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}

        let node = Arc::new(MockNode::with_chain([chain_block(0, 0)]));
        let store = Arc::new(MemoryStore::new());
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        let worker = processor(&node, &store).run(rx);
        assert_send(&worker);
    }
}

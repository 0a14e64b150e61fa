//! Chain reconciliation.
//!
//! Keeps a bounded window of the most recently accepted headers and turns each
//! newly observed block into an ordered list of [`ChainEvent`]s. Applying the
//! events in order to any consumer reproduces the canonical chain: removals come
//! newest first, additions oldest first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::{info, warn};

use crate::indexer::client::RetryingClient;
use crate::indexer::rpc::{decode, parse_timestamp};
use crate::metrics::Metrics;
use crate::models::errors::{ReorgError, RpcError};
use crate::models::rpc::RawBlock;
use crate::utils::hex::{parse_hash, parse_quantity_u64, Hash, HexString};

/// Where the reconciler looks up ancestors while walking back a fork.
#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn block_by_hash(&self, hash: &Hash) -> Result<Option<RawBlock>, RpcError>;
}

#[async_trait]
impl BlockSource for RetryingClient {
    async fn block_by_hash(&self, hash: &Hash) -> Result<Option<RawBlock>, RpcError> {
        self.get_block_by_hash(hash).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    pub hash: Hash,
    pub parent_hash: Hash,
    pub timestamp: DateTime<Utc>,
}

impl BlockHeader {
    pub fn from_raw<T>(raw: &RawBlock<T>) -> Result<Self, ReorgError> {
        Ok(Self {
            number: decode("number", &raw.number, parse_quantity_u64)?,
            hash: decode("hash", &raw.hash, parse_hash)?,
            parent_hash: decode("parentHash", &raw.parent_hash, parse_hash)?,
            timestamp: parse_timestamp(&raw.timestamp)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChainEvent {
    Added(Box<RawBlock>),
    Removed(BlockHeader),
}

impl ChainEvent {
    pub fn describe(&self) -> String {
        match self {
            Self::Added(block) => format!("added block {} ({})", block.hash, block.number),
            Self::Removed(header) => format!(
                "removed block {} ({})",
                header.hash.to_0x_string(),
                header.number
            ),
        }
    }
}

pub struct Reconciler {
    /// Oldest header at the front, latest reconciled header at the back.
    headers: VecDeque<BlockHeader>,
    history_size: usize,
}

impl Reconciler {
    pub fn new(history_size: usize) -> Self {
        let history_size = history_size.max(1);
        Self {
            headers: VecDeque::with_capacity(history_size),
            history_size,
        }
    }

    pub fn latest(&self) -> Option<&BlockHeader> {
        self.headers.back()
    }

    pub fn headers(&self) -> impl Iterator<Item = &BlockHeader> {
        self.headers.iter()
    }

    /// Install the starting segment without emitting events. `headers` must be
    /// ordered oldest to newest; an unlinked prefix is discarded.
    pub fn seed(&mut self, headers: impl IntoIterator<Item = BlockHeader>) {
        self.headers.clear();
        for header in headers {
            if let Some(latest) = self.headers.back() {
                if latest.hash != header.parent_hash {
                    warn!(
                        "Seed block {} does not extend block {}, restarting segment",
                        header.number, latest.number
                    );
                    self.headers.clear();
                }
            }
            self.push(header);
        }
    }

    fn push(&mut self, header: BlockHeader) {
        self.headers.push_back(header);
        while self.headers.len() > self.history_size {
            self.headers.pop_front();
        }
    }

    fn position(&self, hash: &Hash) -> Option<usize> {
        self.headers.iter().rposition(|header| header.hash == *hash)
    }

    pub async fn reconcile<S>(
        &mut self,
        block: RawBlock,
        source: &S,
    ) -> Result<Vec<ChainEvent>, ReorgError>
    where
        S: BlockSource + ?Sized,
    {
        let header = BlockHeader::from_raw(&block)?;

        let Some(latest) = self.headers.back().copied() else {
            self.push(header);
            return Ok(vec![ChainEvent::Added(Box::new(block))]);
        };

        if self.position(&header.hash).is_some() {
            return Ok(Vec::new());
        }

        if header.parent_hash == latest.hash {
            self.push(header);
            return Ok(vec![ChainEvent::Added(Box::new(block))]);
        }

        // Walk back from the new block until its parent is in the accepted segment
        let oldest = self.headers.front().map(|h| h.number).unwrap_or_default();
        let mut cursor = header;
        let mut discovered = vec![(header, block)];
        let ancestor_index = loop {
            if let Some(index) = self.position(&cursor.parent_hash) {
                break index;
            }
            if cursor.number <= oldest || cursor.number == 0 {
                return Err(ReorgError::DeepReorg {
                    number: header.number,
                    hash: header.hash.to_0x_string(),
                    retained: self.headers.len(),
                });
            }

            let parent_hash = cursor.parent_hash;
            let parent = source
                .block_by_hash(&parent_hash)
                .await?
                .ok_or_else(|| ReorgError::MissingAncestor {
                    hash: parent_hash.to_0x_string(),
                })?;
            cursor = BlockHeader::from_raw(&parent)?;
            discovered.push((cursor, parent));
        };

        let removed: Vec<BlockHeader> = self
            .headers
            .drain(ancestor_index + 1..)
            .rev()
            .collect();

        if !removed.is_empty() {
            info!(
                "Reorg detected at block {}: removing {} block(s), adding {}",
                header.number,
                removed.len(),
                discovered.len()
            );
            if let Some(metrics) = Metrics::global() {
                metrics.record_reorg(removed.len());
            }
        }

        let mut events: Vec<ChainEvent> = removed.into_iter().map(ChainEvent::Removed).collect();
        for (header, raw) in discovered.into_iter().rev() {
            self.push(header);
            events.push(ChainEvent::Added(Box::new(raw)));
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{hash, raw_block};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MapSource {
        blocks: HashMap<Hash, RawBlock>,
        lookups: Mutex<Vec<Hash>>,
    }

    impl MapSource {
        fn with(blocks: &[&RawBlock]) -> Self {
            Self {
                blocks: blocks
                    .iter()
                    .map(|b| (parse_hash(&b.hash).unwrap(), (*b).clone()))
                    .collect(),
                lookups: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BlockSource for MapSource {
        async fn block_by_hash(&self, hash: &Hash) -> Result<Option<RawBlock>, RpcError> {
            self.lookups.lock().unwrap().push(*hash);
            Ok(self.blocks.get(hash).cloned())
        }
    }

    // Canonical blocks use hash(n); forks use hash(1000 + n)
    fn block(number: u64, hash_id: u64, parent_id: u64) -> RawBlock {
        raw_block(number, hash(hash_id), hash(parent_id), 1_700_000_000 + number * 12)
    }

    fn seeded(history_size: usize, blocks: &[RawBlock]) -> Reconciler {
        let mut reconciler = Reconciler::new(history_size);
        reconciler.seed(blocks.iter().map(|b| BlockHeader::from_raw(b).unwrap()));
        reconciler
    }

    fn summary(events: &[ChainEvent]) -> Vec<(char, Hash)> {
        events
            .iter()
            .map(|event| match event {
                ChainEvent::Added(raw) => ('+', parse_hash(&raw.hash).unwrap()),
                ChainEvent::Removed(header) => ('-', header.hash),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_linear_chain_emits_only_additions() {
        let source = MapSource::default();
        let mut reconciler = seeded(100, &[block(0, 0, 99)]);

        let mut events = Vec::new();
        for n in 1..=2 {
            events.extend(reconciler.reconcile(block(n, n, n - 1), &source).await.unwrap());
        }

        assert_eq!(summary(&events), vec![('+', hash(1)), ('+', hash(2))]);
        assert!(source.lookups.lock().unwrap().is_empty());
        assert_eq!(reconciler.latest().unwrap().hash, hash(2));
    }

    #[tokio::test]
    async fn test_sibling_replaces_head() {
        let source = MapSource::default();
        let mut reconciler = seeded(100, &[block(0, 0, 99), block(1, 1, 0), block(2, 2, 1)]);

        let events = reconciler
            .reconcile(block(2, 1002, 1), &source)
            .await
            .unwrap();

        assert_eq!(summary(&events), vec![('-', hash(2)), ('+', hash(1002))]);
        assert_eq!(reconciler.latest().unwrap().hash, hash(1002));
    }

    #[tokio::test]
    async fn test_two_block_reorg_order() {
        let b2_fork = block(2, 1002, 1);
        let source = MapSource::with(&[&b2_fork]);
        let mut reconciler = seeded(100, &[block(1, 1, 0), block(2, 2, 1), block(3, 3, 2)]);

        let events = reconciler
            .reconcile(block(3, 1003, 1002), &source)
            .await
            .unwrap();

        assert_eq!(
            summary(&events),
            vec![
                ('-', hash(3)),
                ('-', hash(2)),
                ('+', hash(1002)),
                ('+', hash(1003)),
            ]
        );

        let linked: Vec<_> = reconciler.headers().map(|h| h.hash).collect();
        assert_eq!(linked, vec![hash(1), hash(1002), hash(1003)]);
    }

    #[tokio::test]
    async fn test_gap_is_filled_from_source() {
        let source = MapSource::with(&[&block(2, 2, 1), &block(3, 3, 2)]);
        let mut reconciler = seeded(100, &[block(1, 1, 0)]);

        let events = reconciler.reconcile(block(4, 4, 3), &source).await.unwrap();

        assert_eq!(
            summary(&events),
            vec![('+', hash(2)), ('+', hash(3)), ('+', hash(4))]
        );
    }

    #[tokio::test]
    async fn test_known_block_is_ignored() {
        let source = MapSource::default();
        let mut reconciler = seeded(100, &[block(1, 1, 0), block(2, 2, 1)]);

        let events = reconciler.reconcile(block(1, 1, 0), &source).await.unwrap();
        assert!(events.is_empty());
        assert_eq!(reconciler.latest().unwrap().hash, hash(2));
    }

    #[tokio::test]
    async fn test_deep_reorg_beyond_window() {
        let source = MapSource::with(&[&block(2, 1002, 1001), &block(1, 1001, 1000)]);
        let mut reconciler = seeded(2, &[block(1, 1, 0), block(2, 2, 1), block(3, 3, 2)]);

        let err = reconciler
            .reconcile(block(3, 1003, 1002), &source)
            .await
            .unwrap_err();

        assert!(matches!(err, ReorgError::DeepReorg { number: 3, .. }));
        let retained: Vec<_> = reconciler.headers().map(|h| h.hash).collect();
        assert_eq!(retained, vec![hash(2), hash(3)]);
    }

    #[tokio::test]
    async fn test_missing_ancestor_leaves_segment_untouched() {
        let source = MapSource::default();
        let mut reconciler = seeded(100, &[block(1, 1, 0), block(2, 2, 1)]);

        let err = reconciler
            .reconcile(block(3, 1003, 1002), &source)
            .await
            .unwrap_err();

        assert!(matches!(err, ReorgError::MissingAncestor { .. }));
        assert_eq!(reconciler.latest().unwrap().hash, hash(2));
    }

    #[tokio::test]
    async fn test_window_is_bounded() {
        let source = MapSource::default();
        let mut reconciler = seeded(3, &[block(0, 0, 99)]);

        for n in 1..=10 {
            reconciler.reconcile(block(n, n, n - 1), &source).await.unwrap();
        }

        let retained: Vec<_> = reconciler.headers().map(|h| h.number).collect();
        assert_eq!(retained, vec![8, 9, 10]);
    }

    #[test]
    fn test_seed_discards_unlinked_prefix() {
        let reconciler = seeded(10, &[block(1, 1, 0), block(3, 3, 2), block(4, 4, 3)]);

        let retained: Vec<_> = reconciler.headers().map(|h| h.number).collect();
        assert_eq!(retained, vec![3, 4]);
    }
}

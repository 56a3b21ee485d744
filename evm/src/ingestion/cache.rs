use std::time::Duration;

use moka::future::Cache;

use crate::models::Block;

#[derive(Debug, Clone)]
pub struct DedupCacheOptions {
    /// How long a block number is remembered after it was persisted.
    pub time_to_live: Duration,
    /// Upper bound on the number of remembered blocks.
    pub max_capacity: u64,
}

/// Remembers recently persisted block numbers.
///
/// The cache is an optimization only: a miss means the block is saved again,
/// which the store treats as a no-op.
#[derive(Clone)]
pub struct DedupCache {
    cache: Cache<u64, String>,
}

impl DedupCache {
    pub fn new(options: DedupCacheOptions) -> Self {
        let cache = Cache::<u64, String>::builder()
            .max_capacity(options.max_capacity)
            .time_to_live(options.time_to_live)
            .build();

        Self { cache }
    }

    /// Returns the blocks whose number is not in the cache, in their original order.
    pub async fn filter_unseen(&self, blocks: Vec<Block>) -> Vec<Block> {
        let mut unseen = Vec::with_capacity(blocks.len());
        for block in blocks {
            if self.cache.get(&block.number).await.is_none() {
                unseen.push(block);
            }
        }
        unseen
    }

    /// Mark the blocks as persisted.
    pub async fn mark(&self, blocks: &[Block]) {
        for block in blocks {
            self.cache.insert(block.number, block.hash.clone()).await;
        }
    }

    pub async fn contains(&self, number: u64) -> bool {
        self.cache.get(&number).await.is_some()
    }

    /// Approximate number of remembered blocks.
    pub async fn len(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for DedupCacheOptions {
    fn default() -> Self {
        Self {
            time_to_live: Duration::from_secs(5 * 60),
            max_capacity: 100_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use alloy_primitives::U256;

    use super::{DedupCache, DedupCacheOptions};
    use crate::models::Block;

    fn new_block(number: u64) -> Block {
        Block {
            hash: format!("0xb{number}"),
            number,
            timestamp: 1_700_000_000 + number,
            parent_hash: format!("0xb{}", number.saturating_sub(1)),
            nonce: "0x0".to_string(),
            difficulty: U256::from(1),
            gas_limit: U256::from(15_000_000),
            gas_used: U256::ZERO,
            miner: "0x0".to_string(),
            extra_data: "0x".to_string(),
            base_fee_per_gas: None,
        }
    }

    #[tokio::test]
    async fn test_filter_unseen_keeps_order() {
        let cache = DedupCache::new(DedupCacheOptions::default());
        cache.mark(&[new_block(2)]).await;

        let unseen = cache
            .filter_unseen(vec![new_block(3), new_block(2), new_block(1)])
            .await;
        let numbers = unseen.iter().map(|b| b.number).collect::<Vec<_>>();
        assert_eq!(numbers, vec![3, 1]);
    }

    #[tokio::test]
    async fn test_mark_is_idempotent() {
        let cache = DedupCache::new(DedupCacheOptions::default());
        cache.mark(&[new_block(1), new_block(2)]).await;
        cache.mark(&[new_block(1)]).await;

        assert!(cache.contains(1).await);
        assert!(cache.contains(2).await);
        assert!(!cache.contains(3).await);
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = DedupCache::new(DedupCacheOptions {
            time_to_live: Duration::from_millis(50),
            ..DedupCacheOptions::default()
        });
        cache.mark(&[new_block(1)]).await;
        assert!(cache.contains(1).await);

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!cache.contains(1).await);
        let unseen = cache.filter_unseen(vec![new_block(1)]).await;
        assert_eq!(unseen.len(), 1);
    }
}

use std::collections::{BTreeMap, BTreeSet, HashSet};

use async_trait::async_trait;
use error_stack::Result;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::models::{Block, SortOrder, StoredTransaction, Transaction};

use super::{filled_transactions, BlockStore, StoreError};

/// A store that keeps everything in memory.
///
/// Used for development and tests. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    log_writes: bool,
}

#[derive(Default)]
struct State {
    blocks: BTreeMap<String, Block>,
    transactions: Vec<StoredTransaction>,
    transaction_keys: HashSet<(String, u64)>,
    next_id: i64,
}

impl MemoryStore {
    pub fn new(log_writes: bool) -> Self {
        Self {
            state: Mutex::default(),
            log_writes,
        }
    }

    pub async fn block_count(&self) -> usize {
        self.state.lock().await.blocks.len()
    }

    pub async fn transaction_count_total(&self) -> usize {
        self.state.lock().await.transactions.len()
    }

    pub async fn contains_block(&self, hash: &str) -> bool {
        self.state.lock().await.blocks.contains_key(hash)
    }

    fn log_write(&self, table: &str, received: usize, inserted: usize) {
        if self.log_writes {
            info!(table, received, inserted, "saved batch");
        } else {
            debug!(table, received, inserted, "saved batch");
        }
    }
}

#[async_trait]
impl BlockStore for MemoryStore {
    async fn save_blocks(&self, blocks: &[Block]) -> Result<usize, StoreError> {
        if blocks.is_empty() {
            return Ok(0);
        }

        let mut state = self.state.lock().await;
        let mut inserted = 0;
        for block in blocks {
            if state.blocks.contains_key(&block.hash) {
                continue;
            }
            state.blocks.insert(block.hash.clone(), block.clone());
            inserted += 1;
        }

        if inserted < blocks.len() {
            info!(
                duplicates = blocks.len() - inserted,
                "skipped blocks already stored"
            );
        }

        self.log_write("block_entity", blocks.len(), inserted);
        Ok(inserted)
    }

    async fn save_transactions(&self, transactions: &[Transaction]) -> Result<usize, StoreError> {
        let transactions = filled_transactions(transactions);
        if transactions.is_empty() {
            return Ok(0);
        }

        let mut state = self.state.lock().await;
        let mut inserted = 0;
        for transaction in transactions.iter() {
            let key = (transaction.block_hash.clone(), transaction.index);
            if !state.transaction_keys.insert(key) {
                continue;
            }

            state.next_id += 1;
            let id = state.next_id;
            state.transactions.push(StoredTransaction {
                id,
                transaction: (*transaction).clone(),
            });
            inserted += 1;
        }

        if inserted < transactions.len() {
            info!(
                duplicates = transactions.len() - inserted,
                "skipped transactions already stored"
            );
        }

        self.log_write("transaction_entity", transactions.len(), inserted);
        Ok(inserted)
    }

    async fn transactions_by_address(
        &self,
        address: &str,
    ) -> Result<Vec<StoredTransaction>, StoreError> {
        if address.is_empty() {
            return Ok(Vec::new());
        }

        let state = self.state.lock().await;
        let mut transactions = state
            .transactions
            .iter()
            .filter(|stored| {
                let tx = &stored.transaction;
                tx.from == address || tx.to.as_deref() == Some(address)
            })
            .cloned()
            .collect::<Vec<_>>();

        transactions.sort_by_key(|stored| (stored.transaction.block_number, stored.transaction.index));
        Ok(transactions)
    }

    async fn transactions_sorted_by_value(
        &self,
        order: SortOrder,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<StoredTransaction>, StoreError> {
        let state = self.state.lock().await;
        let mut transactions = state.transactions.clone();

        transactions.sort_by(|a, b| {
            let by_value = match order {
                SortOrder::Asc => a.transaction.value.cmp(&b.transaction.value),
                SortOrder::Desc => b.transaction.value.cmp(&a.transaction.value),
            };
            by_value.then(a.id.cmp(&b.id))
        });

        Ok(transactions
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect())
    }

    async fn unique_addresses(&self) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock().await;
        let mut addresses = BTreeSet::new();
        for stored in state.transactions.iter() {
            addresses.insert(stored.transaction.from.clone());
            if let Some(to) = &stored.transaction.to {
                addresses.insert(to.clone());
            }
        }
        Ok(addresses.into_iter().collect())
    }
}

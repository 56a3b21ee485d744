use alloy_primitives::U256;
use async_trait::async_trait;
use error_stack::Result;
use futures_util::future::{join_all, try_join_all};
use tracing::{debug, warn};

use crate::{
    models::{Block, Transaction},
    provider::{models, JsonRpcProvider, JsonRpcProviderError},
};

/// Read access to the upstream chain.
#[async_trait]
pub trait ChainReader: Send + Sync + 'static {
    /// Returns the number of the latest block.
    async fn current_height(&self) -> Result<u64, JsonRpcProviderError>;

    /// Fetch all blocks in `start..=end`, in order.
    ///
    /// Fails if any block cannot be fetched.
    async fn fetch_range(&self, start: u64, end: u64) -> Result<Vec<Block>, JsonRpcProviderError>;

    /// Fetch the transactions of all the given blocks.
    ///
    /// Transactions that cannot be fetched or decoded are skipped.
    async fn fetch_transactions(
        &self,
        block_hashes: &[String],
    ) -> Result<Vec<Transaction>, JsonRpcProviderError>;

    /// Returns the latest balance of the address.
    async fn balance_of(&self, address: &str) -> Result<U256, JsonRpcProviderError>;
}

pub struct RpcChainReader {
    provider: JsonRpcProvider,
}

impl RpcChainReader {
    pub fn new(provider: JsonRpcProvider) -> Self {
        Self { provider }
    }

    async fn fetch_block_transactions(
        &self,
        block_hash: &str,
    ) -> Result<Vec<Transaction>, JsonRpcProviderError> {
        let block = self.provider.get_block_by_hash(block_hash).await?;
        let hashes = models::transaction_hashes(&block);
        let block = Block::from(block);

        let transactions = join_all(
            hashes
                .iter()
                .map(|hash| self.provider.get_transaction_by_hash(hash)),
        )
        .await;

        let mut result = Vec::with_capacity(transactions.len());
        for (position, transaction) in transactions.into_iter().enumerate() {
            match transaction {
                Ok(transaction) => {
                    result.push(models::into_transaction(
                        transaction,
                        block.number,
                        &block.hash,
                        position as u64,
                    ));
                }
                Err(err)
                    if *err.current_context() == JsonRpcProviderError::DeserializeResponse =>
                {
                    warn!(
                        block_hash,
                        position,
                        error = ?err,
                        "skipping transaction that could not be decoded"
                    );
                }
                Err(err) => {
                    debug!(
                        block_hash,
                        position,
                        error = ?err,
                        "skipping transaction that could not be fetched"
                    );
                }
            }
        }

        Ok(result)
    }
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn current_height(&self) -> Result<u64, JsonRpcProviderError> {
        self.provider.block_number().await
    }

    async fn fetch_range(&self, start: u64, end: u64) -> Result<Vec<Block>, JsonRpcProviderError> {
        if start > end {
            return Ok(Vec::new());
        }

        let blocks = try_join_all(
            (start..=end).map(|number| self.provider.get_block_by_number(number)),
        )
        .await?;

        Ok(blocks.into_iter().map(Block::from).collect())
    }

    async fn fetch_transactions(
        &self,
        block_hashes: &[String],
    ) -> Result<Vec<Transaction>, JsonRpcProviderError> {
        let per_block = try_join_all(
            block_hashes
                .iter()
                .map(|hash| self.fetch_block_transactions(hash)),
        )
        .await?;

        Ok(per_block.into_iter().flatten().collect())
    }

    async fn balance_of(&self, address: &str) -> Result<U256, JsonRpcProviderError> {
        self.provider.get_balance(address).await
    }
}

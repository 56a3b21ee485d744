//! Durable storage for blocks and transactions, and the reads served from it.
mod memory;
mod postgres;

use std::fmt;

use async_trait::async_trait;
use error_stack::Result;

use crate::models::{Block, SortOrder, StoredTransaction, Transaction, TransactionCount};

pub use self::memory::MemoryStore;
pub use self::postgres::{PostgresStore, PostgresStoreOptions, TlsConfiguration};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Connection,
    Query,
    Write,
    Migration,
}

#[async_trait]
pub trait BlockStore: Send + Sync + 'static {
    /// Persist the blocks in a single database transaction.
    ///
    /// Blocks already stored (by hash) are skipped. Returns the number of
    /// blocks inserted.
    async fn save_blocks(&self, blocks: &[Block]) -> Result<usize, StoreError>;

    /// Persist the filled transactions in a single database transaction.
    ///
    /// Transactions already stored (by block hash and index) are skipped.
    /// Returns the number of transactions inserted.
    async fn save_transactions(&self, transactions: &[Transaction]) -> Result<usize, StoreError>;

    /// Transactions sent from or to the address, by block number and index.
    ///
    /// Addresses are compared as stored.
    async fn transactions_by_address(
        &self,
        address: &str,
    ) -> Result<Vec<StoredTransaction>, StoreError>;

    async fn transactions_sorted_by_value(
        &self,
        order: SortOrder,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<StoredTransaction>, StoreError>;

    /// All addresses that sent or received a transaction, sorted.
    async fn unique_addresses(&self) -> Result<Vec<String>, StoreError>;

    async fn transaction_count(&self, address: &str) -> Result<TransactionCount, StoreError> {
        let transactions = self.transactions_by_address(address).await?;
        Ok(TransactionCount::from_transactions(address, &transactions))
    }
}

/// Drop transactions that are missing their identity.
fn filled_transactions(transactions: &[Transaction]) -> Vec<&Transaction> {
    transactions.iter().filter(|tx| tx.is_filled()).collect()
}

impl error_stack::Context for StoreError {}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Connection => write!(f, "failed to connect to the database"),
            StoreError::Query => write!(f, "failed to query the database"),
            StoreError::Write => write!(f, "failed to write to the database"),
            StoreError::Migration => write!(f, "failed to migrate the database schema"),
        }
    }
}

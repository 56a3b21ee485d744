//! Read side: address lookups, value-ordered pages and balance rankings.
use std::{fmt, sync::Arc};

use error_stack::{Result, ResultExt};
use futures_util::future::try_join_all;

use crate::{
    ingestion::ChainReader,
    models::{AddressBalance, SortOrder, StoredTransaction, TransactionCount},
    store::BlockStore,
};

/// Maximum number of addresses returned by the balance ranking.
pub const TOP_ADDRESSES_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    Store,
    Upstream,
}

/// A 1-based page of results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u64,
    pub limit: u64,
}

pub struct QueryService<R: ChainReader, S: BlockStore> {
    reader: Arc<R>,
    store: Arc<S>,
}

impl Page {
    pub const DEFAULT_PAGE: u64 = 1;
    pub const DEFAULT_LIMIT: u64 = 10;

    /// Page `0` is treated as the first page.
    pub fn new(page: Option<u64>, limit: Option<u64>) -> Self {
        Self {
            page: page.unwrap_or(Self::DEFAULT_PAGE).max(1),
            limit: limit.unwrap_or(Self::DEFAULT_LIMIT),
        }
    }

    pub fn offset(&self) -> u64 {
        self.limit.saturating_mul(self.page.saturating_sub(1))
    }
}

impl<R, S> QueryService<R, S>
where
    R: ChainReader,
    S: BlockStore,
{
    pub fn new(reader: Arc<R>, store: Arc<S>) -> Self {
        Self { reader, store }
    }

    pub async fn transactions_by_address(
        &self,
        address: &str,
    ) -> Result<Vec<StoredTransaction>, QueryError> {
        self.store
            .transactions_by_address(address)
            .await
            .change_context(QueryError::Store)
            .attach_printable_lazy(|| format!("address: {address}"))
    }

    pub async fn transaction_count(&self, address: &str) -> Result<TransactionCount, QueryError> {
        self.store
            .transaction_count(address)
            .await
            .change_context(QueryError::Store)
            .attach_printable_lazy(|| format!("address: {address}"))
    }

    pub async fn transactions_sorted_by_value(
        &self,
        order: Option<&str>,
        page: Page,
    ) -> Result<Vec<StoredTransaction>, QueryError> {
        let order = SortOrder::from_query(order);
        self.store
            .transactions_sorted_by_value(order, page.limit, page.offset())
            .await
            .change_context(QueryError::Store)
            .attach_printable_lazy(|| format!("order: {order}, page: {page:?}"))
    }

    pub async fn unique_addresses(&self) -> Result<Vec<String>, QueryError> {
        self.store
            .unique_addresses()
            .await
            .change_context(QueryError::Store)
    }

    /// Rank the addresses by their latest balance, highest first.
    ///
    /// Fails if any balance cannot be fetched.
    pub async fn top_addresses_by_balance(
        &self,
        addresses: &[String],
    ) -> Result<Vec<AddressBalance>, QueryError> {
        let balances = try_join_all(addresses.iter().map(|address| async move {
            self.reader
                .balance_of(address)
                .await
                .map(|balance| AddressBalance {
                    address: address.clone(),
                    balance,
                })
                .change_context(QueryError::Upstream)
                .attach_printable_lazy(|| format!("address: {address}"))
        }))
        .await?;

        Ok(rank_by_balance(balances))
    }

    /// Rank every address seen in the store by balance.
    pub async fn top_addresses(&self) -> Result<Vec<AddressBalance>, QueryError> {
        let addresses = self.unique_addresses().await?;
        self.top_addresses_by_balance(&addresses).await
    }
}

fn rank_by_balance(mut balances: Vec<AddressBalance>) -> Vec<AddressBalance> {
    balances.sort_by(|a, b| b.balance.cmp(&a.balance));
    balances.truncate(TOP_ADDRESSES_LIMIT);
    balances
}

impl error_stack::Context for QueryError {}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::Store => write!(f, "query error: store"),
            QueryError::Upstream => write!(f, "query error: upstream"),
        }
    }
}

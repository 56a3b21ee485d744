use std::{fmt, sync::Arc};

use error_stack::{Result, ResultExt};
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{models::Block, store::BlockStore};

use super::{cache::DedupCache, reader::ChainReader};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestionError {
    Upstream,
    Store,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    /// How many blocks below the current height the startup sweep covers.
    pub sweep_window: u64,
}

/// Outcome of processing one batch of blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    pub received: usize,
    pub unseen: usize,
    pub blocks_inserted: usize,
    pub transactions_inserted: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamLoopStats {
    pub processed: usize,
    pub failed: usize,
}

/// Drives blocks from the producers into the store.
pub struct IngestionCoordinator<R: ChainReader, S: BlockStore> {
    reader: Arc<R>,
    store: Arc<S>,
    cache: DedupCache,
    options: IngestionOptions,
}

impl<R, S> IngestionCoordinator<R, S>
where
    R: ChainReader,
    S: BlockStore,
{
    pub fn new(reader: Arc<R>, store: Arc<S>, cache: DedupCache, options: IngestionOptions) -> Self {
        Self {
            reader,
            store,
            cache,
            options,
        }
    }

    pub fn cache(&self) -> &DedupCache {
        &self.cache
    }

    /// Filter, persist and cache the blocks, then persist their transactions.
    ///
    /// Blocks are cached only after they are persisted. Transactions are
    /// fetched for every unseen block, including the ones the store already
    /// had. Transaction writes skip rows already stored for the same
    /// `(block_hash, tx_index)`, so this only fills transactions that a crash
    /// between the two writes left missing.
    pub async fn process_blocks(&self, blocks: Vec<Block>) -> Result<ProcessSummary, IngestionError> {
        let received = blocks.len();
        let blocks = self.cache.filter_unseen(blocks).await;

        let mut summary = ProcessSummary {
            received,
            unseen: blocks.len(),
            ..ProcessSummary::default()
        };

        if blocks.is_empty() {
            return Ok(summary);
        }

        summary.blocks_inserted = self
            .store
            .save_blocks(&blocks)
            .await
            .change_context(IngestionError::Store)
            .attach_printable("failed to save blocks")?;

        self.cache.mark(&blocks).await;

        let block_hashes = blocks.iter().map(|b| b.hash.clone()).collect::<Vec<_>>();
        let transactions = self
            .reader
            .fetch_transactions(&block_hashes)
            .await
            .change_context(IngestionError::Upstream)
            .attach_printable("failed to fetch transactions")?;

        summary.transactions_inserted = self
            .store
            .save_transactions(&transactions)
            .await
            .change_context(IngestionError::Store)
            .attach_printable("failed to save transactions")?;

        Ok(summary)
    }

    /// Fetch and process the blocks in the window below the current height.
    pub async fn try_catch_up_sweep(&self) -> Result<ProcessSummary, IngestionError> {
        let height = self
            .reader
            .current_height()
            .await
            .change_context(IngestionError::Upstream)
            .attach_printable("failed to fetch current height")?;

        let start = height.saturating_sub(self.options.sweep_window);
        info!(start, end = height, "starting catch-up sweep");

        let blocks = self
            .reader
            .fetch_range(start, height)
            .await
            .change_context(IngestionError::Upstream)
            .attach_printable_lazy(|| format!("failed to fetch blocks {start}..={height}"))?;

        self.process_blocks(blocks).await
    }

    /// Run the catch-up sweep once. Failures are logged, never returned.
    pub async fn catch_up_sweep(&self, ct: CancellationToken) {
        tokio::select! {
            _ = ct.cancelled() => {
                info!("catch-up sweep cancelled");
            }
            result = self.try_catch_up_sweep() => match result {
                Ok(summary) => {
                    info!(
                        received = summary.received,
                        unseen = summary.unseen,
                        blocks = summary.blocks_inserted,
                        transactions = summary.transactions_inserted,
                        "catch-up sweep finished"
                    );
                }
                Err(err) => {
                    error!(error = ?err, "catch-up sweep failed");
                }
            }
        }
    }

    /// Process block events one at a time until the stream ends or the token
    /// is cancelled.
    ///
    /// A failing block is logged and skipped.
    pub async fn stream_loop<E>(&self, mut events: E, ct: CancellationToken) -> StreamLoopStats
    where
        E: Stream<Item = Block> + Unpin,
    {
        let mut stats = StreamLoopStats::default();

        loop {
            let block = tokio::select! {
                _ = ct.cancelled() => break,
                block = events.next() => match block {
                    None => break,
                    Some(block) => block,
                },
            };

            let number = block.number;
            match self.process_blocks(vec![block]).await {
                Ok(summary) => {
                    stats.processed += 1;
                    info!(
                        block = number,
                        blocks = summary.blocks_inserted,
                        transactions = summary.transactions_inserted,
                        "processed new head"
                    );
                }
                Err(err) => {
                    stats.failed += 1;
                    warn!(block = number, error = ?err, "failed to process new head");
                }
            }
        }

        info!(
            processed = stats.processed,
            failed = stats.failed,
            "stream loop stopped"
        );

        stats
    }

    /// Run the catch-up sweep and the stream loop concurrently.
    pub async fn run<E>(&self, events: E, ct: CancellationToken) -> StreamLoopStats
    where
        E: Stream<Item = Block> + Unpin,
    {
        let (_, stats) = tokio::join!(
            self.catch_up_sweep(ct.clone()),
            self.stream_loop(events, ct.clone())
        );
        stats
    }
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self { sweep_window: 10 }
    }
}

impl error_stack::Context for IngestionError {}

impl fmt::Display for IngestionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestionError::Upstream => write!(f, "ingestion error: upstream"),
            IngestionError::Store => write!(f, "ingestion error: store"),
        }
    }
}

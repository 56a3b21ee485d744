use std::sync::Arc;

use clap::Args;
use error_stack::{Result, ResultExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    error::BlockDbError,
    ingestion::{ChainStream, DedupCache, IngestionCoordinator, IngestionOptions, RpcChainReader},
    store::{BlockStore, MemoryStore},
};

use super::{
    common::{DatabaseArgs, IngestionArgs, StreamArgs},
    rpc::RpcArgs,
};

#[derive(Args, Debug)]
pub struct StartCommand {
    #[clap(flatten)]
    rpc: RpcArgs,
    #[clap(flatten)]
    stream: StreamArgs,
    #[clap(flatten)]
    db: DatabaseArgs,
    #[clap(flatten)]
    ingestion: IngestionArgs,
}

impl StartCommand {
    pub async fn run(self, ct: CancellationToken) -> Result<(), BlockDbError> {
        info!("starting blockdb ingestion");

        let provider = self.rpc.to_json_rpc_provider()?;
        let reader = Arc::new(RpcChainReader::new(provider));
        let chain_stream = self.stream.to_chain_stream()?;
        let cache = DedupCache::new(self.ingestion.to_dedup_cache_options());
        let options = self.ingestion.to_ingestion_options();

        if self.db.db_connection_string.is_some() {
            let store = Arc::new(self.db.to_postgres_store().await?);
            run_ingestion(reader, store, cache, options, chain_stream, ct).await
        } else {
            warn!("no database configured, blocks are kept in memory only");
            let store = Arc::new(MemoryStore::new(self.db.db_log_writes));
            run_ingestion(reader, store, cache, options, chain_stream, ct).await
        }
    }
}

async fn run_ingestion<S: BlockStore>(
    reader: Arc<RpcChainReader>,
    store: Arc<S>,
    cache: DedupCache,
    options: IngestionOptions,
    chain_stream: ChainStream,
    ct: CancellationToken,
) -> Result<(), BlockDbError> {
    let coordinator = IngestionCoordinator::new(reader, store, cache, options);
    let (events, connection) = chain_stream.start(ct.clone());

    let (connection_result, stats) = tokio::join!(connection, coordinator.run(events, ct.clone()));

    info!(
        processed = stats.processed,
        failed = stats.failed,
        "ingestion stopped"
    );

    if ct.is_cancelled() {
        return Ok(());
    }

    connection_result
        .change_context(BlockDbError::StreamEnded)
        .attach_printable("push feed connection failed")?;

    Err(BlockDbError::StreamEnded).attach_printable("push feed closed by the server")
}

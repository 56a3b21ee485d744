use std::sync::Arc;

use clap::{Args, Subcommand};
use error_stack::{Result, ResultExt};
use serde::Serialize;

use crate::{
    error::BlockDbError,
    ingestion::RpcChainReader,
    query::{Page, QueryService},
    store::PostgresStore,
};

use super::{common::DatabaseArgs, rpc::RpcArgs};

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    #[clap(flatten)]
    rpc: RpcArgs,
    #[clap(flatten)]
    db: DatabaseArgs,
}

#[derive(Subcommand, Debug)]
pub enum QueryCommand {
    /// Transactions sent from or to an address.
    Transactions {
        /// The address, compared as stored.
        #[arg(long)]
        address: String,
        #[clap(flatten)]
        args: QueryArgs,
    },
    /// Number of transactions sent and received by an address.
    Count {
        #[arg(long)]
        address: String,
        #[clap(flatten)]
        args: QueryArgs,
    },
    /// Transactions ordered by value.
    Sorted {
        /// `asc` or `desc`. Defaults to `desc`.
        #[arg(long)]
        order: Option<String>,
        /// Page number, starting at 1.
        #[arg(long)]
        page: Option<u64>,
        /// Page size.
        #[arg(long)]
        limit: Option<u64>,
        #[clap(flatten)]
        args: QueryArgs,
    },
    /// Every address that sent or received a transaction.
    Addresses {
        #[clap(flatten)]
        args: QueryArgs,
    },
    /// Addresses with the highest balance.
    TopAddresses {
        #[clap(flatten)]
        args: QueryArgs,
    },
}

impl QueryArgs {
    async fn to_query_service(
        &self,
    ) -> Result<QueryService<RpcChainReader, PostgresStore>, BlockDbError> {
        let provider = self.rpc.to_json_rpc_provider()?;
        let reader = Arc::new(RpcChainReader::new(provider));
        let store = Arc::new(self.db.to_postgres_store().await?);
        Ok(QueryService::new(reader, store))
    }
}

impl QueryCommand {
    pub async fn run(self) -> Result<(), BlockDbError> {
        match self {
            QueryCommand::Transactions { address, args } => {
                let service = args.to_query_service().await?;
                let transactions = service
                    .transactions_by_address(&address)
                    .await
                    .change_context(BlockDbError::Fatal)?;
                print_json(&transactions)
            }
            QueryCommand::Count { address, args } => {
                let service = args.to_query_service().await?;
                let count = service
                    .transaction_count(&address)
                    .await
                    .change_context(BlockDbError::Fatal)?;
                print_json(&count)
            }
            QueryCommand::Sorted {
                order,
                page,
                limit,
                args,
            } => {
                let service = args.to_query_service().await?;
                let transactions = service
                    .transactions_sorted_by_value(order.as_deref(), Page::new(page, limit))
                    .await
                    .change_context(BlockDbError::Fatal)?;
                print_json(&transactions)
            }
            QueryCommand::Addresses { args } => {
                let service = args.to_query_service().await?;
                let addresses = service
                    .unique_addresses()
                    .await
                    .change_context(BlockDbError::Fatal)?;
                print_json(&addresses)
            }
            QueryCommand::TopAddresses { args } => {
                let service = args.to_query_service().await?;
                let balances = service
                    .top_addresses()
                    .await
                    .change_context(BlockDbError::Fatal)?;
                print_json(&balances)
            }
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), BlockDbError> {
    let json = serde_json::to_string_pretty(value)
        .change_context(BlockDbError::Fatal)
        .attach_printable("failed to serialize result")?;
    println!("{json}");
    Ok(())
}

mod common;
mod query;
mod rpc;
mod start;

use clap::{Parser, Subcommand};
use error_stack::Result;
use tokio_util::sync::CancellationToken;

use crate::error::BlockDbError;

use self::{query::QueryCommand, start::StartCommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest new blocks and their transactions.
    Start(StartCommand),
    /// Query the stored transactions.
    Query {
        #[clap(subcommand)]
        command: QueryCommand,
    },
}

impl Cli {
    pub async fn run(self, ct: CancellationToken) -> Result<(), BlockDbError> {
        match self.command {
            Command::Start(command) => command.run(ct).await,
            Command::Query { command } => command.run().await,
        }
    }
}

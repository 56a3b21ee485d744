use blockdb_evm::{
    cli::Cli,
    error::{BlockDbError, ReportExt},
};
use blockdb_observability::init_tracing;
use clap::Parser;
use error_stack::{Result, ResultExt};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[cfg(not(windows))]
#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let _ = dotenvy::dotenv();
    let args = Cli::parse();
    run_with_args(args).await.to_exit_code()
}

async fn run_with_args(args: Cli) -> Result<(), BlockDbError> {
    init_tracing()
        .change_context(BlockDbError::Fatal)
        .attach_printable("failed to initialize tracing")?;

    let ct = CancellationToken::new();

    ctrlc::set_handler({
        let ct = ct.clone();
        move || {
            info!("SIGINT received");
            ct.cancel();
        }
    })
    .change_context(BlockDbError::Fatal)
    .attach_printable("failed to set SIGINT handler")?;

    args.run(ct).await
}

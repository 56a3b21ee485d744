use std::{path::PathBuf, time::Duration};

use clap::{builder::BoolishValueParser, ArgAction, Args};
use error_stack::{Result, ResultExt};
use url::Url;

use crate::{
    error::BlockDbError,
    ingestion::{ChainStream, ChainStreamOptions, DedupCacheOptions, IngestionOptions},
    store::{PostgresStore, PostgresStoreOptions, TlsConfiguration},
};

#[derive(Args, Debug, Clone)]
pub struct StreamArgs {
    /// Websocket URL of the new heads feed.
    #[arg(
        long = "stream.url",
        env = "BLOCKDB_STREAM_URL",
        default_value = "wss://api.avax.network/ext/bc/C/ws"
    )]
    pub stream_url: String,

    /// How many undelivered blocks to buffer.
    #[arg(
        long = "stream.channel-size",
        env = "BLOCKDB_STREAM_CHANNEL_SIZE",
        default_value = "1024"
    )]
    pub stream_channel_size: usize,
}

#[derive(Args, Debug, Clone)]
pub struct DatabaseArgs {
    /// PostgreSQL connection string.
    #[arg(long = "db.connection-string", env = "BLOCKDB_DB_CONNECTION_STRING")]
    pub db_connection_string: Option<String>,

    /// Connect without TLS.
    #[arg(long = "db.no-tls", env = "BLOCKDB_DB_NO_TLS", default_value = "false")]
    pub db_no_tls: bool,

    /// Additional root certificate for the TLS connection, PEM encoded.
    #[arg(long = "db.tls-certificate", env = "BLOCKDB_DB_TLS_CERTIFICATE")]
    pub db_tls_certificate: Option<PathBuf>,

    /// Accept invalid TLS certificates.
    #[arg(
        long = "db.tls-accept-invalid-certificates",
        env = "BLOCKDB_DB_TLS_ACCEPT_INVALID_CERTIFICATES"
    )]
    pub db_tls_accept_invalid_certificates: Option<bool>,

    /// Log every saved batch at info level.
    ///
    /// Accepts boolish values such as `1`, `0`, `yes` and `off`.
    #[arg(
        long = "db.log-writes",
        env = "DB_LOGS_ON",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        default_value_t = true,
        default_missing_value = "true"
    )]
    pub db_log_writes: bool,
}

#[derive(Args, Debug, Clone)]
pub struct IngestionArgs {
    /// How many blocks below the current height the startup sweep covers.
    #[arg(
        long = "ingestion.sweep-window",
        env = "BLOCKDB_INGESTION_SWEEP_WINDOW",
        default_value = "10"
    )]
    pub sweep_window: u64,

    /// How long processed block numbers are remembered.
    #[arg(
        long = "ingestion.cache-ttl-sec",
        env = "BLOCKDB_INGESTION_CACHE_TTL_SEC",
        default_value = "300"
    )]
    pub cache_ttl_sec: u64,
}

impl StreamArgs {
    pub fn to_chain_stream(&self) -> Result<ChainStream, BlockDbError> {
        let url = self
            .stream_url
            .parse::<Url>()
            .change_context(BlockDbError::Configuration)
            .attach_printable("failed to parse stream URL")
            .attach_printable_lazy(|| format!("url: {}", self.stream_url))?;

        Ok(ChainStream::new(url, self.to_chain_stream_options()))
    }

    pub fn to_chain_stream_options(&self) -> ChainStreamOptions {
        ChainStreamOptions {
            channel_size: self.stream_channel_size,
        }
    }
}

impl DatabaseArgs {
    /// Returns `None` if no database is configured.
    pub fn to_postgres_store_options(&self) -> Option<PostgresStoreOptions> {
        let connection_string = self.db_connection_string.clone()?;

        let tls = if self.db_no_tls {
            TlsConfiguration::NoTls
        } else {
            TlsConfiguration::Tls {
                certificate: self.db_tls_certificate.clone(),
                accept_invalid_certificates: self.db_tls_accept_invalid_certificates,
            }
        };

        Some(PostgresStoreOptions {
            connection_string,
            tls,
            log_writes: self.db_log_writes,
        })
    }

    /// Connect to the database and bring its schema up to date.
    pub async fn to_postgres_store(&self) -> Result<PostgresStore, BlockDbError> {
        let Some(options) = self.to_postgres_store_options() else {
            return Err(BlockDbError::Configuration)
                .attach_printable("no database configured")
                .attach_printable("hint: set --db.connection-string or BLOCKDB_DB_CONNECTION_STRING");
        };

        let store = PostgresStore::connect(options)
            .await
            .change_context(BlockDbError::Fatal)
            .attach_printable("failed to connect to the database")?;

        store
            .migrate()
            .await
            .change_context(BlockDbError::Fatal)
            .attach_printable("failed to migrate the database")?;

        Ok(store)
    }
}

impl IngestionArgs {
    pub fn to_ingestion_options(&self) -> IngestionOptions {
        IngestionOptions {
            sweep_window: self.sweep_window,
        }
    }

    pub fn to_dedup_cache_options(&self) -> DedupCacheOptions {
        DedupCacheOptions {
            time_to_live: Duration::from_secs(self.cache_ttl_sec),
            ..DedupCacheOptions::default()
        }
    }
}

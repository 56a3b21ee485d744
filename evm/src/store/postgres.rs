use std::{collections::BTreeSet, fmt::Debug, path::PathBuf, str::FromStr};

use alloy_primitives::U256;
use async_trait::async_trait;
use error_stack::{Report, Result, ResultExt};
use native_tls::{Certificate, TlsConnector};
use postgres_native_tls::MakeTlsConnector;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_postgres::{error::SqlState, types::Json, Client, Config, NoTls, Row};
use tracing::{debug, error, info, warn};

use crate::models::{Block, SortOrder, StoredTransaction, Transaction};

use super::{filled_transactions, BlockStore, StoreError};

const BLOCK_TABLE: &str = "block_entity";
const TRANSACTION_TABLE: &str = "transaction_entity";

const MIGRATION: &str = r#"
CREATE TABLE IF NOT EXISTS block_entity (
    hash TEXT PRIMARY KEY,
    number BIGINT NOT NULL,
    "timestamp" BIGINT NOT NULL,
    parent_hash TEXT NOT NULL,
    nonce TEXT NOT NULL,
    difficulty NUMERIC(78, 0) NOT NULL,
    gas_limit NUMERIC(78, 0) NOT NULL,
    gas_used NUMERIC(78, 0) NOT NULL,
    miner TEXT NOT NULL,
    extra_data TEXT NOT NULL,
    base_fee_per_gas NUMERIC(78, 0)
);

CREATE INDEX IF NOT EXISTS block_entity_number_idx ON block_entity (number);

CREATE TABLE IF NOT EXISTS transaction_entity (
    id BIGSERIAL PRIMARY KEY,
    block_number BIGINT NOT NULL,
    block_hash TEXT NOT NULL,
    tx_index BIGINT NOT NULL,
    hash TEXT NOT NULL,
    tx_type SMALLINT NOT NULL,
    to_address TEXT,
    from_address TEXT NOT NULL,
    nonce NUMERIC(78, 0) NOT NULL,
    gas_limit NUMERIC(78, 0) NOT NULL,
    gas_price NUMERIC(78, 0),
    data TEXT NOT NULL,
    value NUMERIC(78, 0) NOT NULL,
    chain_id NUMERIC(78, 0),
    UNIQUE (block_hash, tx_index)
);

CREATE INDEX IF NOT EXISTS transaction_entity_value_idx ON transaction_entity (value);
CREATE INDEX IF NOT EXISTS transaction_entity_from_address_idx ON transaction_entity (from_address);
CREATE INDEX IF NOT EXISTS transaction_entity_to_address_idx ON transaction_entity (to_address);
CREATE INDEX IF NOT EXISTS transaction_entity_position_idx ON transaction_entity (block_number, tx_index);
"#;

const INSERT_BLOCKS: &str = r#"
INSERT INTO block_entity (hash, number, "timestamp", parent_hash, nonce, difficulty, gas_limit, gas_used, miner, extra_data, base_fee_per_gas)
SELECT hash, number, "timestamp", parent_hash, nonce, difficulty, gas_limit, gas_used, miner, extra_data, base_fee_per_gas
FROM json_populate_recordset(NULL::block_entity, $1::json)
ON CONFLICT (hash) DO NOTHING
"#;

const INSERT_TRANSACTIONS: &str = r#"
INSERT INTO transaction_entity (block_number, block_hash, tx_index, hash, tx_type, to_address, from_address, nonce, gas_limit, gas_price, data, value, chain_id)
SELECT block_number, block_hash, tx_index, hash, tx_type, to_address, from_address, nonce, gas_limit, gas_price, data, value, chain_id
FROM json_populate_recordset(NULL::transaction_entity, $1::json)
ON CONFLICT (block_hash, tx_index) DO NOTHING
"#;

const SELECT_TRANSACTION_COLUMNS: &str = "id, block_number, block_hash, tx_index, hash, tx_type, \
    to_address, from_address, nonce::text AS nonce, gas_limit::text AS gas_limit, \
    gas_price::text AS gas_price, data, value::text AS value, chain_id::text AS chain_id";

#[derive(Debug, Clone, Default)]
pub enum TlsConfiguration {
    #[default]
    NoTls,
    Tls {
        /// Additional root certificate, PEM encoded.
        certificate: Option<PathBuf>,
        accept_invalid_certificates: Option<bool>,
    },
}

#[derive(Debug, Clone)]
pub struct PostgresStoreOptions {
    pub connection_string: String,
    pub tls: TlsConfiguration,
    /// Log successful writes at info level instead of debug.
    pub log_writes: bool,
}

/// A store backed by PostgreSQL.
///
/// The client is shared behind a lock, so batches from the same process are
/// written one at a time.
pub struct PostgresStore {
    client: Mutex<Client>,
    log_writes: bool,
}

impl PostgresStore {
    pub async fn connect(options: PostgresStoreOptions) -> Result<Self, StoreError> {
        info!("connecting to database");
        let config = Config::from_str(&options.connection_string)
            .change_context(StoreError::Connection)
            .attach_printable("invalid connection string")?;

        // Each connector has its own connection type, so connect and spawn the
        // connection inside each branch.
        let client = match options.tls {
            TlsConfiguration::NoTls => {
                info!("using insecure connection");
                let (client, connection) = config
                    .connect(NoTls)
                    .await
                    .change_context(StoreError::Connection)
                    .attach_printable("failed to connect to postgres (no tls)")?;
                tokio::spawn(async move {
                    if let Err(err) = connection.await {
                        error!(error = %err, "postgres connection error");
                    }
                });
                client
            }
            TlsConfiguration::Tls {
                certificate,
                accept_invalid_certificates,
            } => {
                info!("configure tls connection");
                let mut builder = TlsConnector::builder();

                if let Some(ref certificate) = certificate {
                    let certificate = tokio::fs::read(certificate)
                        .await
                        .change_context(StoreError::Connection)
                        .attach_printable_lazy(|| {
                            format!("failed to read tls certificate at {certificate:?}")
                        })?;
                    let certificate = Certificate::from_pem(&certificate)
                        .change_context(StoreError::Connection)
                        .attach_printable("failed to build certificate from PEM file")?;
                    builder.add_root_certificate(certificate);
                }

                if let Some(accept_invalid_certificates) = accept_invalid_certificates {
                    builder.danger_accept_invalid_certs(accept_invalid_certificates);
                }

                let connector = builder
                    .build()
                    .change_context(StoreError::Connection)
                    .attach_printable("failed to build tls connector")?;
                let connector = MakeTlsConnector::new(connector);
                let (client, connection) = config
                    .connect(connector)
                    .await
                    .change_context(StoreError::Connection)
                    .attach_printable("failed to connect to postgres (tls)")?;
                tokio::spawn(async move {
                    if let Err(err) = connection.await {
                        error!(error = %err, "postgres connection error");
                    }
                });
                client
            }
        };

        info!("client connected successfully");

        Ok(Self {
            client: Mutex::new(client),
            log_writes: options.log_writes,
        })
    }

    /// Create the tables and indexes if they don't exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let client = self.client.lock().await;
        client
            .batch_execute(MIGRATION)
            .await
            .change_context(StoreError::Migration)
            .attach_printable("failed to create tables")
            .inspect_err(|err| error!(error = ?err, "failed to migrate database"))?;
        debug!("database schema is up to date");
        Ok(())
    }

    async fn write_batch<T>(
        &self,
        table: &'static str,
        statement: &str,
        rows: &[T],
    ) -> Result<usize, StoreError>
    where
        T: Serialize + Debug + Sync,
    {
        let mut client = self.client.lock().await;
        let tx = client
            .transaction()
            .await
            .change_context(StoreError::Write)
            .attach_printable("failed to begin transaction")
            .attach_printable_lazy(|| format!("table: {table}"))
            .inspect_err(|err| error!(table, error = ?err, "failed to begin transaction"))?;

        // Dropping the transaction without committing rolls it back.
        let inserted = match tx.execute(statement, &[&Json(rows)]).await {
            Ok(inserted) => inserted as usize,
            Err(err) if err.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
                warn!(table, error = %err, "batch violates a unique constraint, skipping");
                return Ok(0);
            }
            Err(err) => {
                error!(table, rows = rows.len(), error = %err, "failed to save batch");
                return Err(err)
                    .change_context(StoreError::Write)
                    .attach_printable("failed to run insert query")
                    .attach_printable_lazy(|| format!("table: {table}"));
            }
        };

        tx.commit()
            .await
            .change_context(StoreError::Write)
            .attach_printable("failed to commit transaction")
            .attach_printable_lazy(|| format!("table: {table}"))
            .inspect_err(|err| error!(table, error = ?err, "failed to commit transaction"))?;

        if inserted < rows.len() {
            info!(
                table,
                duplicates = rows.len() - inserted,
                "skipped rows already stored"
            );
        }

        if self.log_writes {
            info!(table, received = rows.len(), inserted, "saved batch");
        } else {
            debug!(table, received = rows.len(), inserted, "saved batch");
        }

        Ok(inserted)
    }

    async fn query_transactions(
        &self,
        query: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> Result<Vec<StoredTransaction>, StoreError> {
        let client = self.client.lock().await;
        let rows = client
            .query(query, params)
            .await
            .change_context(StoreError::Query)
            .attach_printable_lazy(|| format!("query: {query}"))
            .inspect_err(|err| error!(error = ?err, "failed to query transactions"))?;

        rows.iter().map(stored_transaction_from_row).collect()
    }
}

#[async_trait]
impl BlockStore for PostgresStore {
    async fn save_blocks(&self, blocks: &[Block]) -> Result<usize, StoreError> {
        if blocks.is_empty() {
            return Ok(0);
        }

        let rows = blocks.iter().map(BlockRow::from).collect::<Vec<_>>();
        self.write_batch(BLOCK_TABLE, INSERT_BLOCKS, &rows).await
    }

    async fn save_transactions(&self, transactions: &[Transaction]) -> Result<usize, StoreError> {
        let rows = filled_transactions(transactions)
            .into_iter()
            .map(TransactionRow::from)
            .collect::<Vec<_>>();

        if rows.is_empty() {
            return Ok(0);
        }

        self.write_batch(TRANSACTION_TABLE, INSERT_TRANSACTIONS, &rows)
            .await
    }

    async fn transactions_by_address(
        &self,
        address: &str,
    ) -> Result<Vec<StoredTransaction>, StoreError> {
        if address.is_empty() {
            return Ok(Vec::new());
        }

        let query = format!(
            "SELECT {SELECT_TRANSACTION_COLUMNS} FROM transaction_entity \
             WHERE from_address = $1 OR to_address = $1 \
             ORDER BY block_number ASC, tx_index ASC"
        );
        self.query_transactions(&query, &[&address]).await
    }

    async fn transactions_sorted_by_value(
        &self,
        order: SortOrder,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<StoredTransaction>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);

        // The selected `value` is cast to text, so sort on the numeric column.
        let query = format!(
            "SELECT {SELECT_TRANSACTION_COLUMNS} FROM transaction_entity \
             ORDER BY transaction_entity.value {}, transaction_entity.id ASC \
             LIMIT $1 OFFSET $2",
            order.as_sql()
        );
        self.query_transactions(&query, &[&limit, &offset]).await
    }

    async fn unique_addresses(&self) -> Result<Vec<String>, StoreError> {
        let client = self.client.lock().await;

        let senders = client
            .query("SELECT DISTINCT from_address FROM transaction_entity", &[])
            .await
            .change_context(StoreError::Query)
            .attach_printable("failed to query senders")
            .inspect_err(|err| error!(error = ?err, "failed to query senders"))?;
        let receivers = client
            .query(
                "SELECT DISTINCT to_address FROM transaction_entity WHERE to_address IS NOT NULL",
                &[],
            )
            .await
            .change_context(StoreError::Query)
            .attach_printable("failed to query receivers")
            .inspect_err(|err| error!(error = ?err, "failed to query receivers"))?;

        let mut addresses = BTreeSet::new();
        for row in senders.iter().chain(receivers.iter()) {
            let address: String = row
                .try_get(0)
                .change_context(StoreError::Query)
                .attach_printable("invalid address column")?;
            addresses.insert(address);
        }

        Ok(addresses.into_iter().collect())
    }
}

#[derive(Debug, Serialize)]
struct BlockRow<'a> {
    hash: &'a str,
    number: u64,
    timestamp: u64,
    parent_hash: &'a str,
    nonce: &'a str,
    difficulty: String,
    gas_limit: String,
    gas_used: String,
    miner: &'a str,
    extra_data: &'a str,
    base_fee_per_gas: Option<String>,
}

#[derive(Debug, Serialize)]
struct TransactionRow<'a> {
    block_number: u64,
    block_hash: &'a str,
    tx_index: u64,
    hash: &'a str,
    tx_type: u8,
    to_address: Option<&'a str>,
    from_address: &'a str,
    nonce: String,
    gas_limit: String,
    gas_price: Option<String>,
    data: &'a str,
    value: String,
    chain_id: Option<String>,
}

impl<'a> From<&'a Block> for BlockRow<'a> {
    fn from(block: &'a Block) -> Self {
        Self {
            hash: &block.hash,
            number: block.number,
            timestamp: block.timestamp,
            parent_hash: &block.parent_hash,
            nonce: &block.nonce,
            difficulty: block.difficulty.to_string(),
            gas_limit: block.gas_limit.to_string(),
            gas_used: block.gas_used.to_string(),
            miner: &block.miner,
            extra_data: &block.extra_data,
            base_fee_per_gas: block.base_fee_per_gas.map(|v| v.to_string()),
        }
    }
}

impl<'a> From<&'a Transaction> for TransactionRow<'a> {
    fn from(tx: &'a Transaction) -> Self {
        Self {
            block_number: tx.block_number,
            block_hash: &tx.block_hash,
            tx_index: tx.index,
            hash: &tx.hash,
            tx_type: tx.tx_type,
            to_address: tx.to.as_deref(),
            from_address: &tx.from,
            nonce: tx.nonce.to_string(),
            gas_limit: tx.gas_limit.to_string(),
            gas_price: tx.gas_price.map(|v| v.to_string()),
            data: &tx.data,
            value: tx.value.to_string(),
            chain_id: tx.chain_id.map(|v| v.to_string()),
        }
    }
}

fn stored_transaction_from_row(row: &Row) -> Result<StoredTransaction, StoreError> {
    let column = |name: &'static str| -> Result<String, StoreError> {
        row.try_get::<_, String>(name)
            .change_context(StoreError::Query)
            .attach_printable_lazy(|| format!("column: {name}"))
    };
    let optional_column = |name: &'static str| -> Result<Option<String>, StoreError> {
        row.try_get::<_, Option<String>>(name)
            .change_context(StoreError::Query)
            .attach_printable_lazy(|| format!("column: {name}"))
    };
    let integer_column = |name: &'static str| -> Result<i64, StoreError> {
        row.try_get::<_, i64>(name)
            .change_context(StoreError::Query)
            .attach_printable_lazy(|| format!("column: {name}"))
    };

    let tx_type: i16 = row
        .try_get("tx_type")
        .change_context(StoreError::Query)
        .attach_printable("column: tx_type")?;

    let transaction = Transaction {
        hash: column("hash")?,
        block_number: to_u64(integer_column("block_number")?, "block_number")?,
        block_hash: column("block_hash")?,
        index: to_u64(integer_column("tx_index")?, "tx_index")?,
        tx_type: u8::try_from(tx_type)
            .change_context(StoreError::Query)
            .attach_printable("column: tx_type")?,
        to: optional_column("to_address")?,
        from: column("from_address")?,
        nonce: column("nonce")?
            .parse::<u64>()
            .change_context(StoreError::Query)
            .attach_printable("column: nonce")?,
        gas_limit: parse_numeric(&column("gas_limit")?, "gas_limit")?,
        gas_price: optional_column("gas_price")?
            .map(|v| parse_numeric(&v, "gas_price"))
            .transpose()?,
        data: column("data")?,
        value: parse_numeric(&column("value")?, "value")?,
        chain_id: optional_column("chain_id")?
            .map(|v| parse_numeric(&v, "chain_id"))
            .transpose()?,
    };

    Ok(StoredTransaction {
        id: integer_column("id")?,
        transaction,
    })
}

fn to_u64(value: i64, column: &'static str) -> Result<u64, StoreError> {
    u64::try_from(value)
        .change_context(StoreError::Query)
        .attach_printable_lazy(|| format!("column: {column}"))
}

fn parse_numeric(value: &str, column: &'static str) -> Result<U256, StoreError> {
    U256::from_str(value).map_err(|err| {
        Report::new(StoreError::Query)
            .attach_printable(format!("invalid numeric value: {err}"))
            .attach_printable(format!("column: {column}"))
    })
}

//! Domain types shared by the ingestion pipeline and the query engine.
use std::fmt;

use alloy_primitives::U256;
use serde::Serialize;

/// A block header, as produced by both the poll and the push producers.
///
/// Blocks are immutable once persisted. The hash is the primary identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub hash: String,
    pub number: u64,
    pub timestamp: u64,
    pub parent_hash: String,
    pub nonce: String,
    #[serde(with = "decimal")]
    pub difficulty: U256,
    #[serde(with = "decimal")]
    pub gas_limit: U256,
    #[serde(with = "decimal")]
    pub gas_used: U256,
    pub miner: String,
    pub extra_data: String,
    #[serde(with = "decimal::option")]
    pub base_fee_per_gas: Option<U256>,
}

/// A transaction fetched from upstream, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: String,
    pub block_number: u64,
    pub block_hash: String,
    /// Position in the block's transaction list.
    pub index: u64,
    #[serde(rename = "type")]
    pub tx_type: u8,
    /// `None` for contract creation.
    pub to: Option<String>,
    pub from: String,
    pub nonce: u64,
    #[serde(with = "decimal")]
    pub gas_limit: U256,
    #[serde(with = "decimal::option")]
    pub gas_price: Option<U256>,
    pub data: String,
    #[serde(with = "decimal")]
    pub value: U256,
    #[serde(with = "decimal::option")]
    pub chain_id: Option<U256>,
}

/// A transaction as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredTransaction {
    /// Surrogate key assigned by the store.
    pub id: i64,
    #[serde(flatten)]
    pub transaction: Transaction,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransactionCount {
    pub sent: usize,
    pub received: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressBalance {
    pub address: String,
    #[serde(with = "decimal")]
    pub balance: U256,
}

/// Sort direction for value-ordered pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl Transaction {
    /// Returns true if the transaction carries its identity.
    ///
    /// Unfilled transactions are skipped by the store.
    pub fn is_filled(&self) -> bool {
        !self.hash.is_empty() && !self.block_hash.is_empty()
    }
}

impl TransactionCount {
    /// Count sent and received transactions, comparing addresses without case.
    pub fn from_transactions<'a>(
        address: &str,
        transactions: impl IntoIterator<Item = &'a StoredTransaction>,
    ) -> Self {
        let address = address.to_lowercase();
        let mut count = TransactionCount::default();

        for stored in transactions {
            let tx = &stored.transaction;
            if tx.from.to_lowercase() == address {
                count.sent += 1;
            }
            if tx
                .to
                .as_ref()
                .map(|to| to.to_lowercase() == address)
                .unwrap_or(false)
            {
                count.received += 1;
            }
        }

        count
    }
}

impl SortOrder {
    /// Parse the order from a query parameter.
    ///
    /// Anything other than `asc` or `desc` (including no value) is `Desc`.
    pub fn from_query(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "asc" => SortOrder::Asc,
            _ => SortOrder::Desc,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Asc => f.write_str("asc"),
            SortOrder::Desc => f.write_str("desc"),
        }
    }
}

/// Serialize big integers as decimal strings.
mod decimal {
    use alloy_primitives::U256;
    use serde::Serializer;

    pub fn serialize<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    pub mod option {
        use alloy_primitives::U256;
        use serde::Serializer;

        pub fn serialize<S>(value: &Option<U256>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                Some(value) => serializer.collect_str(value),
                None => serializer.serialize_none(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::U256;

    use super::{SortOrder, StoredTransaction, Transaction, TransactionCount};

    fn new_transaction(id: i64, from: &str, to: Option<&str>) -> StoredTransaction {
        StoredTransaction {
            id,
            transaction: Transaction {
                hash: format!("0xtx{id}"),
                block_number: 1,
                block_hash: "0xblock1".to_string(),
                index: id as u64,
                tx_type: 2,
                to: to.map(str::to_string),
                from: from.to_string(),
                nonce: 0,
                gas_limit: U256::from(21_000),
                gas_price: None,
                data: "0x".to_string(),
                value: U256::from(1),
                chain_id: Some(U256::from(43_114)),
            },
        }
    }

    #[test]
    fn test_sort_order_from_query() {
        assert_eq!(SortOrder::from_query(Some("asc")), SortOrder::Asc);
        assert_eq!(SortOrder::from_query(Some("ASC")), SortOrder::Asc);
        assert_eq!(SortOrder::from_query(Some("desc")), SortOrder::Desc);
        assert_eq!(SortOrder::from_query(Some("sideways")), SortOrder::Desc);
        assert_eq!(SortOrder::from_query(None), SortOrder::Desc);
    }

    #[test]
    fn test_transaction_count_ignores_case() {
        let transactions = vec![
            new_transaction(0, "0xAbC", Some("0xdef")),
            new_transaction(1, "0xabc", Some("0xdef")),
            new_transaction(2, "0xdef", Some("0xABC")),
            new_transaction(3, "0xdef", None),
        ];

        let count = TransactionCount::from_transactions("0xABC", &transactions);
        assert_eq!(count.sent, 2);
        assert_eq!(count.received, 1);
    }

    #[test]
    fn test_self_transfer_counts_both_ways() {
        let transactions = vec![new_transaction(0, "0xabc", Some("0xabc"))];
        let count = TransactionCount::from_transactions("0xabc", &transactions);
        assert_eq!(count.sent, 1);
        assert_eq!(count.received, 1);
    }

    #[test]
    fn test_serialize_big_integers_as_decimal() {
        let tx = new_transaction(7, "0xabc", None);
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["value"], "1");
        assert_eq!(json["gasLimit"], "21000");
        assert_eq!(json["gasPrice"], serde_json::Value::Null);
        assert_eq!(json["chainId"], "43114");
        assert_eq!(json["type"], 2);
    }
}

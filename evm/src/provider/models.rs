//! JSON-RPC wire types.
//!
//! Blocks, headers and transactions are decoded with the alloy RPC types and
//! converted here so the rest of the crate only deals with [`Block`] and
//! [`Transaction`].
use alloy_consensus::Transaction as _;
use alloy_eips::Typed2718 as _;
use alloy_primitives::U256;

use crate::models::{Block, Transaction};

pub use alloy_rpc_types_eth::{
    Block as RpcBlock, BlockNumberOrTag, Header as RpcHeader, Transaction as RpcTransaction,
};

impl From<RpcHeader> for Block {
    fn from(header: RpcHeader) -> Self {
        let hash = header.hash;
        let header = header.inner;

        Block {
            hash: format!("{hash:#x}"),
            number: header.number,
            timestamp: header.timestamp,
            parent_hash: format!("{:#x}", header.parent_hash),
            nonce: format!("{:#x}", header.nonce),
            difficulty: header.difficulty,
            gas_limit: U256::from(header.gas_limit),
            gas_used: U256::from(header.gas_used),
            miner: format!("{:#x}", header.beneficiary),
            extra_data: header.extra_data.to_string(),
            base_fee_per_gas: header.base_fee_per_gas.map(U256::from),
        }
    }
}

impl From<RpcBlock> for Block {
    fn from(block: RpcBlock) -> Self {
        block.header.into()
    }
}

/// Returns the hashes of the block's transactions, in block order.
pub fn transaction_hashes(block: &RpcBlock) -> Vec<String> {
    block
        .transactions
        .hashes()
        .map(|hash| format!("{hash:#x}"))
        .collect()
}

/// Convert into a [`Transaction`] belonging to the given block.
///
/// The index is the position in the block's transaction list, not the
/// `transactionIndex` reported by the node.
pub fn into_transaction(
    tx: RpcTransaction,
    block_number: u64,
    block_hash: &str,
    index: u64,
) -> Transaction {
    Transaction {
        hash: format!("{:#x}", tx.inner.tx_hash()),
        block_number,
        block_hash: block_hash.to_string(),
        index,
        tx_type: tx.ty(),
        to: tx.to().map(|to| format!("{to:#x}")),
        from: format!("{:#x}", tx.inner.signer()),
        nonce: tx.nonce(),
        gas_limit: U256::from(tx.gas_limit()),
        gas_price: tx.gas_price().or(tx.effective_gas_price).map(U256::from),
        data: tx.input().to_string(),
        value: tx.value(),
        chain_id: tx.chain_id().map(U256::from),
    }
}

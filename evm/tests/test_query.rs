use std::sync::Arc;

use alloy_primitives::U256;
use blockdb_evm::{
    query::{Page, QueryError, QueryService},
    store::{BlockStore, MemoryStore},
};

mod common;
use crate::common::*;

async fn new_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::default());
    store
        .save_transactions(&[
            new_transaction(1, 0, "0xa", Some("0xb"), U256::from(10)),
            new_transaction(1, 1, "0xb", Some("0xc"), U256::from(50)),
            new_transaction(2, 0, "0xc", Some("0xa"), U256::from(5)),
            new_transaction(2, 1, "0xA", None, U256::from(100)),
        ])
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn test_transactions_by_address() {
    let chain = FakeChain::new(0);
    let service = QueryService::new(Arc::new(chain), new_store().await);

    let transactions = service.transactions_by_address("0xa").await.unwrap();
    let hashes = transactions
        .iter()
        .map(|s| s.transaction.hash.as_str())
        .collect::<Vec<_>>();
    assert_eq!(hashes, vec!["0xt1_0", "0xt2_0"]);

    assert!(service.transactions_by_address("").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_transaction_count() {
    let chain = FakeChain::new(0);
    let service = QueryService::new(Arc::new(chain), new_store().await);

    let count = service.transaction_count("0xb").await.unwrap();
    assert_eq!(count.sent, 1);
    assert_eq!(count.received, 1);
}

#[tokio::test]
async fn test_transactions_sorted_by_value() {
    let chain = FakeChain::new(0);
    let service = QueryService::new(Arc::new(chain), new_store().await);

    let values = |transactions: Vec<blockdb_evm::models::StoredTransaction>| {
        transactions
            .into_iter()
            .map(|s| s.transaction.value)
            .collect::<Vec<_>>()
    };

    let first_page = service
        .transactions_sorted_by_value(None, Page::new(None, Some(2)))
        .await
        .unwrap();
    assert_eq!(values(first_page), vec![U256::from(100), U256::from(50)]);

    let second_page = service
        .transactions_sorted_by_value(Some("bogus"), Page::new(Some(2), Some(2)))
        .await
        .unwrap();
    assert_eq!(values(second_page), vec![U256::from(10), U256::from(5)]);

    let ascending = service
        .transactions_sorted_by_value(Some("asc"), Page::new(None, None))
        .await
        .unwrap();
    assert_eq!(
        values(ascending),
        vec![
            U256::from(5),
            U256::from(10),
            U256::from(50),
            U256::from(100)
        ]
    );
}

#[tokio::test]
async fn test_unique_addresses() {
    let chain = FakeChain::new(0);
    let service = QueryService::new(Arc::new(chain), new_store().await);

    let addresses = service.unique_addresses().await.unwrap();
    assert_eq!(addresses, vec!["0xA", "0xa", "0xb", "0xc"]);
}

#[tokio::test]
async fn test_top_addresses() {
    let chain = FakeChain::new(0)
        .with_balance("0xa", 10)
        .with_balance("0xA", 1)
        .with_balance("0xb", 50)
        .with_balance("0xc", 100);
    let service = QueryService::new(Arc::new(chain), new_store().await);

    let top = service.top_addresses().await.unwrap();
    let ranked = top
        .iter()
        .map(|b| (b.address.as_str(), b.balance))
        .collect::<Vec<_>>();
    assert_eq!(
        ranked,
        vec![
            ("0xc", U256::from(100)),
            ("0xb", U256::from(50)),
            ("0xa", U256::from(10)),
            ("0xA", U256::from(1)),
        ]
    );
}

#[tokio::test]
async fn test_top_addresses_fails_on_balance_error() {
    // No balance for 0xc.
    let chain = FakeChain::new(0)
        .with_balance("0xa", 10)
        .with_balance("0xb", 50);
    let service = QueryService::new(Arc::new(chain), Arc::new(MemoryStore::default()));

    let err = service
        .top_addresses_by_balance(&["0xa".to_string(), "0xc".to_string()])
        .await
        .unwrap_err();
    assert_eq!(err.current_context(), &QueryError::Upstream);

    let empty = service.top_addresses_by_balance(&[]).await.unwrap();
    assert!(empty.is_empty());
}

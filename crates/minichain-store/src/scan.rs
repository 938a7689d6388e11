//! Read-only wallet scan over persisted blocks.

use crate::FileStore;
use anyhow::Result;
use minichain_core::Transaction;

/// A transaction mentioning the queried name, with the block it was mined in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxMatch {
    pub block_index: u64,
    pub transaction: Transaction,
}

/// Walk every persisted block in index order and collect the transactions
/// where `name` is the sender or the recipient. Exact match, case sensitive.
pub fn transactions_involving(store: &FileStore, name: &str) -> Result<Vec<TxMatch>> {
    let mut matches = Vec::new();
    for block in store.load_chain()? {
        for tx in &block.transactions {
            if tx.involves(name) {
                matches.push(TxMatch {
                    block_index: block.index,
                    transaction: tx.clone(),
                });
            }
        }
    }
    Ok(matches)
}

//! Pending-transaction pool.
//!
//! Transactions wait here between admission and inclusion in a mined block.
//! Identity is structural equality, so resubmitting an identical transaction
//! is a silent no-op.

use crate::blockchain::Block;
use crate::transaction::Transaction;
use std::cmp::Ordering;
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct Mempool {
    transactions: Vec<Transaction>,
    index: HashSet<Transaction>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `tx` unless an identical transaction is already pooled.
    /// Returns whether the pool changed.
    pub fn admit(&mut self, tx: Transaction) -> bool {
        if self.index.contains(&tx) {
            return false;
        }
        self.index.insert(tx.clone());
        self.transactions.push(tx);
        true
    }

    pub fn contains(&self, tx: &Transaction) -> bool {
        self.index.contains(tx)
    }

    /// Up to `max_count` transactions, highest fee first, earlier timestamp
    /// breaking ties. The pool is not modified.
    pub fn select_batch(&self, max_count: usize) -> Vec<Transaction> {
        let mut ordered: Vec<&Transaction> = self.transactions.iter().collect();
        ordered.sort_by(|a, b| priority(a, b));
        ordered.into_iter().take(max_count).cloned().collect()
    }

    /// Evicts exactly the given transactions.
    pub fn remove(&mut self, txs: &[Transaction]) -> usize {
        let evict: HashSet<&Transaction> = txs.iter().filter(|tx| self.index.contains(*tx)).collect();
        if evict.is_empty() {
            return 0;
        }
        self.transactions.retain(|tx| !evict.contains(tx));
        for tx in &evict {
            self.index.remove(*tx);
        }
        evict.len()
    }

    /// Drops every pooled transaction that `block` carries.
    pub fn prune_confirmed(&mut self, block: &Block) -> usize {
        self.remove(block.transactions())
    }

    /// Replaces the pool contents wholesale. Last writer wins.
    pub fn sync(&mut self, transactions: Vec<Transaction>) {
        self.transactions.clear();
        self.index.clear();
        for tx in transactions {
            self.admit(tx);
        }
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

fn priority(a: &Transaction, b: &Transaction) -> Ordering {
    b.fee.cmp(&a.fee).then_with(|| a.timestamp.cmp(&b.timestamp))
}

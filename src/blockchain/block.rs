use crate::crypto::sha256_hex;
use crate::transaction::{now_millis, Transaction};
use serde::{Deserialize, Serialize};

pub const GENESIS_PAYLOAD: &str = "Genesis Block";
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Block contents: a list of transactions, or the sentinel string carried by genesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockData {
    Transactions(Vec<Transaction>),
    Sentinel(String),
}

impl BlockData {
    pub fn transactions(&self) -> &[Transaction] {
        match self {
            BlockData::Transactions(txs) => txs,
            BlockData::Sentinel(_) => &[],
        }
    }

    /// Compact JSON rendering used inside the canonical block content.
    pub fn canonical_json(&self) -> String {
        // Serializing plain structs, strings and fixed-point strings cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl From<Vec<Transaction>> for BlockData {
    fn from(txs: Vec<Transaction>) -> Self {
        BlockData::Transactions(txs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: u64,
    pub transactions: BlockData,
    pub previous_hash: String,
    pub nonce: u64,
    pub hash: String,
}

impl Block {
    /// Creates an unmined block stamped with the current time. `hash` is
    /// consistent with nonce 0.
    pub fn new(index: u64, transactions: impl Into<BlockData>, previous_hash: String) -> Self {
        let mut block = Block {
            index,
            timestamp: now_millis(),
            transactions: transactions.into(),
            previous_hash,
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.compute_hash();
        block
    }

    /// The fixed first block shared by every node.
    pub fn genesis() -> Self {
        let mut block = Block {
            index: 0,
            timestamp: 0,
            transactions: BlockData::Sentinel(GENESIS_PAYLOAD.to_string()),
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.compute_hash();
        block
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    pub fn transactions(&self) -> &[Transaction] {
        self.transactions.transactions()
    }

    /// Everything in the canonical content except the trailing nonce.
    pub fn canonical_prefix(&self) -> String {
        format!(
            "{}{}{}{}",
            self.index,
            self.timestamp,
            self.transactions.canonical_json(),
            self.previous_hash
        )
    }

    /// SHA-256 over index, timestamp, transactions, previous_hash and nonce.
    pub fn compute_hash(&self) -> String {
        hash_with_nonce(&self.canonical_prefix(), self.nonce)
    }

    pub fn has_consistent_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }

    pub fn meets_difficulty(&self, difficulty: usize) -> bool {
        meets_difficulty(&self.hash, difficulty)
    }
}

pub fn hash_with_nonce(prefix: &str, nonce: u64) -> String {
    let mut content = String::with_capacity(prefix.len() + 20);
    content.push_str(prefix);
    content.push_str(&nonce.to_string());
    sha256_hex(content.as_bytes())
}

/// True when the first `difficulty` hex characters of `hash` are all `'0'`.
pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub mod chain;

pub use chain::{Chain, MineOutcome};

/// Hex length of a SHA-256 digest.
pub const HASH_HEX_SIZE: usize = 64;

/// The `previous_hash` of the genesis block, which has no predecessor.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    // Field declaration order is the sorted-key order of the canonical
    // JSON encoding, which the block hash is computed over.
    pub amount: u64,
    pub from: String,
    pub to: String,
}

impl Transaction {
    pub fn new(from: String, to: String, amount: u64) -> Self {
        Self { amount, from, to }
    }

    /// True when `name` is the sender or the recipient.
    pub fn involves(&self, name: &str) -> bool {
        self.from == name || self.to == name
    }
}

/// One ledger entry. Immutable once mined, except that `hash` is assigned at
/// the moment a block is accepted onto the chain.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
    // Same sorted-key declaration order as `Transaction`. `hash` is absent
    // from the encoding until it has been assigned, and is never part of the
    // block's own hash computation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    pub index: u64,
    pub nonce: u64,
    pub previous_hash: String,
    pub timestamp: f64,
    pub transactions: Vec<Transaction>,
}

/// Borrowed view of every block field except `hash`, in sorted-key order.
/// Serializing this is the canonical hashing preimage.
#[derive(Serialize)]
struct HashFields<'a> {
    index: u64,
    nonce: u64,
    previous_hash: &'a str,
    timestamp: f64,
    transactions: &'a [Transaction],
}

impl Block {
    pub fn new(index: u64, transactions: Vec<Transaction>, timestamp: f64, previous_hash: String) -> Self {
        Self {
            hash: None,
            index,
            nonce: 0,
            previous_hash,
            timestamp,
            transactions,
        }
    }

    /// SHA-256 over the canonical JSON encoding of the block's current
    /// fields, as a lowercase hex string. Deterministic: identical field
    /// values give identical digests, and any field change (including the
    /// nonce alone) changes the digest.
    pub fn compute_hash(&self) -> String {
        let fields = HashFields {
            index: self.index,
            nonce: self.nonce,
            previous_hash: &self.previous_hash,
            timestamp: self.timestamp,
            transactions: &self.transactions,
        };
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(&fields).expect("block fields serialize to JSON"));
        hex::encode(hasher.finalize())
    }
}

/// Why a chain operation was rejected or aborted. None of these are fatal;
/// the chain stays usable after any of them.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("block previous_hash does not match the chain tip")]
    LinkageMismatch,
    #[error("claimed hash fails the difficulty target or does not match block contents")]
    InvalidProof,
    #[error("nonce space exhausted without meeting the difficulty target")]
    ExhaustedSearchSpace,
    #[error("proof-of-work search cancelled")]
    Cancelled,
    #[error("block persistence failed: {0}")]
    Sink(anyhow::Error),
}

impl From<anyhow::Error> for ChainError {
    fn from(err: anyhow::Error) -> Self {
        ChainError::Sink(err)
    }
}

/// Injected time source, so chains are testable without the real clock.
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch, floating precision.
    fn now(&self) -> f64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time went backwards")
            .as_secs_f64()
    }
}

/// A clock pinned to one instant, for tests and reproducible chains.
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub f64);

impl Clock for FixedClock {
    fn now(&self) -> f64 {
        self.0
    }
}

/// Where the chain writes each block's serialized state: once when the block
/// is constructed and again when it is accepted with its hash assigned.
/// This trait lives in `minichain-core` so storage backends can implement it
/// without a circular dependency.
pub trait BlockSink: Send + Sync {
    fn persist(&self, block: &Block) -> anyhow::Result<()>;
}

/// Sink that drops every write, for chains that do not persist.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl BlockSink for NullSink {
    fn persist(&self, _block: &Block) -> anyhow::Result<()> {
        Ok(())
    }
}

/// In-memory sink keyed by block index. Re-persisting an index overwrites it,
/// matching the on-disk stores.
#[derive(Debug, Default)]
pub struct MemorySink {
    blocks: Mutex<BTreeMap<u64, Block>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self, index: u64) -> Option<Block> {
        self.blocks.lock().expect("sink lock poisoned").get(&index).cloned()
    }

    pub fn len(&self) -> usize {
        self.blocks.lock().expect("sink lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlockSink for MemorySink {
    fn persist(&self, block: &Block) -> anyhow::Result<()> {
        self.blocks
            .lock()
            .expect("sink lock poisoned")
            .insert(block.index, block.clone());
        Ok(())
    }
}

pub mod pow {
    use crate::{Block, ChainError};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Cooperative cancellation flag, checked once per nonce attempt. Lets a
    /// caller abandon a search when competing work has already won the tip.
    #[derive(Clone, Debug, Default)]
    pub struct CancelToken(Arc<AtomicBool>);

    impl CancelToken {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn cancel(&self) {
            self.0.store(true, Ordering::Relaxed);
        }

        pub fn is_cancelled(&self) -> bool {
            self.0.load(Ordering::Relaxed)
        }
    }

    /// True when `hash` starts with `difficulty` zero characters.
    pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
        let want = difficulty as usize;
        hash.len() >= want && hash.as_bytes()[..want].iter().all(|b| *b == b'0')
    }

    /// Brute-force nonce search. Resets the nonce to zero unconditionally,
    /// then increments it until the block's content hash carries the
    /// difficulty prefix; expected ~16^difficulty attempts. Pure function of
    /// the candidate block, so concurrent miners may run it outside any
    /// chain lock and validate-and-append afterwards.
    pub fn search(
        block: &mut Block,
        difficulty: u32,
        cancel: Option<&CancelToken>,
    ) -> Result<String, ChainError> {
        block.nonce = 0;
        loop {
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    return Err(ChainError::Cancelled);
                }
            }
            let hash = block.compute_hash();
            if meets_difficulty(&hash, difficulty) {
                return Ok(hash);
            }
            block.nonce = block
                .nonce
                .checked_add(1)
                .ok_or(ChainError::ExhaustedSearchSpace)?;
        }
    }
}

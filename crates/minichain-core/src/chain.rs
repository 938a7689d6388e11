use crate::{
    pow, Block, BlockSink, ChainError, Clock, NullSink, SystemClock, Transaction,
    GENESIS_PREVIOUS_HASH,
};
use std::sync::Arc;
use tracing::info;

/// Result of a `mine` call. An empty pool is an expected condition, not an
/// error, so it gets its own variant rather than a `ChainError`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MineOutcome {
    /// Nothing pending; no block was created and no state changed.
    EmptyPool,
    /// A block was mined and appended at `index`.
    Mined { index: u64 },
}

/// An append-only chain of proof-of-work blocks plus the pool of pending
/// transactions feeding it.
///
/// Single-writer by construction: every mutating operation takes `&mut self`,
/// so the pool and the tip cannot be touched between reading the tip and
/// appending. A concurrent extension may run `pow::search` outside the lock;
/// `add_block` re-checks linkage against the current tip, so stale work loses
/// with `LinkageMismatch` instead of forking the chain.
pub struct Chain {
    difficulty: u32,
    pending: Vec<Transaction>,
    blocks: Vec<Block>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn BlockSink>,
}

impl Chain {
    /// Ephemeral chain on the system clock with no persistence.
    pub fn new(difficulty: u32) -> Result<Self, ChainError> {
        Self::with_collaborators(difficulty, Arc::new(SystemClock), Arc::new(NullSink))
    }

    /// Build a chain with an injected time source and persistence sink, then
    /// synthesize the genesis block: index 0, no transactions,
    /// `previous_hash = "0"`, hash assigned straight from `compute_hash`.
    /// Genesis is exempt from the difficulty target.
    pub fn with_collaborators(
        difficulty: u32,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn BlockSink>,
    ) -> Result<Self, ChainError> {
        let mut genesis = Block::new(0, Vec::new(), clock.now(), GENESIS_PREVIOUS_HASH.to_string());
        genesis.hash = Some(genesis.compute_hash());
        sink.persist(&genesis)?;
        Ok(Self {
            difficulty,
            pending: Vec::new(),
            blocks: vec![genesis],
            clock,
            sink,
        })
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        // Genesis always exists.
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn pending(&self) -> &[Transaction] {
        &self.pending
    }

    /// The chain's tip. Genesis guarantees at least one block.
    pub fn last_block(&self) -> &Block {
        self.blocks.last().expect("chain always holds the genesis block")
    }

    fn tip_hash(&self) -> &str {
        self.last_block()
            .hash
            .as_deref()
            .expect("appended blocks always carry a hash")
    }

    /// Append a transaction to the pending pool. No validation of sender,
    /// recipient or amount; the chain itself is untouched.
    pub fn add_new_transaction(&mut self, tx: Transaction) {
        self.pending.push(tx);
    }

    /// Run the brute-force nonce search against this chain's difficulty.
    pub fn proof_of_work(&self, block: &mut Block) -> Result<String, ChainError> {
        pow::search(block, self.difficulty, None)
    }

    /// True iff `claimed_hash` carries the difficulty prefix AND equals the
    /// hash recomputed fresh from the block's current fields. The second
    /// check stops a stale or forged value that happens to satisfy the
    /// prefix from being accepted.
    pub fn is_valid_proof(&self, block: &Block, claimed_hash: &str) -> bool {
        pow::meets_difficulty(claimed_hash, self.difficulty) && claimed_hash == block.compute_hash()
    }

    /// Validate then append. Atomic from the caller's perspective: on
    /// rejection the chain is unchanged; on acceptance the block gets its
    /// hash, is re-persisted, and the chain grows by exactly one.
    pub fn add_block(&mut self, mut block: Block, claimed_hash: String) -> Result<(), ChainError> {
        if block.previous_hash != self.tip_hash() {
            return Err(ChainError::LinkageMismatch);
        }
        if !self.is_valid_proof(&block, &claimed_hash) {
            return Err(ChainError::InvalidProof);
        }
        block.hash = Some(claimed_hash);
        self.sink.persist(&block)?;
        self.blocks.push(block);
        Ok(())
    }

    /// Mine the entire pending pool into one new block.
    ///
    /// The pool is moved into the candidate up front, which both snapshots it
    /// (the mined block's transactions are independent of later submissions)
    /// and drains it unconditionally, even if a later step fails.
    pub fn mine(&mut self) -> Result<MineOutcome, ChainError> {
        self.mine_inner(None)
    }

    /// `mine` with a cooperative cancellation token, for callers that want to
    /// abandon a search once competing work has advanced the tip.
    pub fn mine_with_cancel(&mut self, cancel: &pow::CancelToken) -> Result<MineOutcome, ChainError> {
        self.mine_inner(Some(cancel))
    }

    fn mine_inner(&mut self, cancel: Option<&pow::CancelToken>) -> Result<MineOutcome, ChainError> {
        if self.pending.is_empty() {
            return Ok(MineOutcome::EmptyPool);
        }
        let txs = std::mem::take(&mut self.pending);
        let tip = self.last_block();
        let mut candidate = Block::new(
            tip.index + 1,
            txs,
            self.clock.now(),
            self.tip_hash().to_string(),
        );
        // Persist the pre-mining state; acceptance overwrites it with the
        // final nonce and hash.
        self.sink.persist(&candidate)?;

        let proof = pow::search(&mut candidate, self.difficulty, cancel)?;
        let index = candidate.index;
        // Freshly computed proof against the tip we just read, so this only
        // fails if another writer advanced the chain in between.
        self.add_block(candidate, proof)?;
        info!(index, difficulty = self.difficulty, "mined block");
        Ok(MineOutcome::Mined { index })
    }

    /// Whole-chain audit: genesis shape, then linkage and proof-of-work for
    /// every subsequent block.
    pub fn validate(&self) -> Result<(), ChainError> {
        let genesis = &self.blocks[0];
        if genesis.index != 0 || genesis.previous_hash != GENESIS_PREVIOUS_HASH {
            return Err(ChainError::LinkageMismatch);
        }
        let expected = genesis.compute_hash();
        if genesis.hash.as_deref() != Some(expected.as_str()) {
            return Err(ChainError::InvalidProof);
        }
        for pair in self.blocks.windows(2) {
            let (prev, block) = (&pair[0], &pair[1]);
            if Some(block.previous_hash.as_str()) != prev.hash.as_deref() {
                return Err(ChainError::LinkageMismatch);
            }
            let claimed = block.hash.as_deref().ok_or(ChainError::InvalidProof)?;
            if !self.is_valid_proof(block, claimed) {
                return Err(ChainError::InvalidProof);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FixedClock, MemorySink};

    const T0: f64 = 1_600_000_000.0;

    fn test_chain(difficulty: u32) -> (Chain, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let chain =
            Chain::with_collaborators(difficulty, Arc::new(FixedClock(T0)), sink.clone()).unwrap();
        (chain, sink)
    }

    fn sample_txs() -> Vec<Transaction> {
        vec![
            Transaction::new("Alice".to_string(), "Bob".to_string(), 5),
            Transaction::new("Bob".to_string(), "Carol".to_string(), 3),
        ]
    }

    #[test]
    fn construction_synthesizes_and_persists_genesis() {
        let (chain, sink) = test_chain(4);
        assert_eq!(chain.len(), 1);
        assert!(!chain.is_empty());

        let genesis = chain.last_block();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash, GENESIS_PREVIOUS_HASH);
        assert!(genesis.transactions.is_empty());
        assert_eq!(genesis.timestamp, T0);
        // No proof-of-work for genesis; the hash is assigned directly.
        assert_eq!(genesis.hash.as_deref(), Some(genesis.compute_hash().as_str()));

        assert_eq!(sink.len(), 1);
        assert_eq!(sink.block(0).unwrap().hash, genesis.hash);
    }

    #[test]
    fn ephemeral_chain_on_the_system_clock() {
        let mut chain = Chain::new(1).unwrap();
        chain.add_new_transaction(Transaction::new("Alice".to_string(), "Bob".to_string(), 5));
        assert_eq!(chain.mine().unwrap(), MineOutcome::Mined { index: 1 });
        chain.validate().unwrap();
    }

    #[test]
    fn add_new_transaction_only_grows_the_pool() {
        let (mut chain, _sink) = test_chain(2);
        for tx in sample_txs() {
            chain.add_new_transaction(tx);
        }
        assert_eq!(chain.pending().len(), 2);
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn mine_on_empty_pool_is_a_noop() {
        let (mut chain, sink) = test_chain(2);
        let outcome = chain.mine().unwrap();
        assert_eq!(outcome, MineOutcome::EmptyPool);
        assert_eq!(chain.len(), 1);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn mine_difficulty_two_end_to_end() {
        let (mut chain, sink) = test_chain(2);
        for tx in sample_txs() {
            chain.add_new_transaction(tx);
        }

        let outcome = chain.mine().unwrap();
        assert_eq!(outcome, MineOutcome::Mined { index: 1 });
        assert_eq!(chain.len(), 2);
        assert!(chain.pending().is_empty());

        let tip = chain.last_block();
        assert_eq!(tip.index, 1);
        assert_eq!(tip.transactions, sample_txs());
        assert_eq!(
            Some(tip.previous_hash.as_str()),
            chain.blocks()[0].hash.as_deref()
        );
        let hash = tip.hash.as_deref().unwrap();
        assert!(hash.starts_with("00"));
        assert_eq!(hash, tip.compute_hash());

        // The accepted state overwrote the pre-mining write in the sink.
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.block(1).unwrap().hash.as_deref(), Some(hash));

        chain.validate().unwrap();
    }

    #[test]
    fn mining_is_deterministic_with_a_fixed_clock() {
        let (mut a, _) = test_chain(1);
        let (mut b, _) = test_chain(1);
        for tx in sample_txs() {
            a.add_new_transaction(tx);
        }
        for tx in sample_txs() {
            b.add_new_transaction(tx);
        }
        a.mine().unwrap();
        b.mine().unwrap();
        assert_eq!(a.last_block().hash, b.last_block().hash);
        assert_eq!(a.last_block().nonce, b.last_block().nonce);
    }

    #[test]
    fn add_block_rejects_bad_linkage_despite_valid_pow() {
        let (mut chain, _) = test_chain(1);
        let mut block = Block::new(1, sample_txs(), T0, "not the tip".to_string());
        let proof = chain.proof_of_work(&mut block).unwrap();
        assert!(pow::meets_difficulty(&proof, 1));

        let tip_before = chain.last_block().hash.clone();
        let err = chain.add_block(block, proof).unwrap_err();
        assert!(matches!(err, ChainError::LinkageMismatch));
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.last_block().hash, tip_before);
    }

    #[test]
    fn add_block_rejects_corrupted_proof() {
        let (mut chain, _) = test_chain(1);
        let tip_hash = chain.last_block().hash.clone().unwrap();
        let mut block = Block::new(1, sample_txs(), T0, tip_hash);
        let proof = chain.proof_of_work(&mut block).unwrap();

        // Flip one hex character; the prefix may still satisfy the
        // difficulty, but the content check must fail.
        let mut corrupted = proof.clone();
        let last = corrupted.pop().unwrap();
        corrupted.push(if last == 'a' { 'b' } else { 'a' });
        assert!(!chain.is_valid_proof(&block, &corrupted));

        let err = chain.add_block(block.clone(), corrupted).unwrap_err();
        assert!(matches!(err, ChainError::InvalidProof));
        assert_eq!(chain.len(), 1);

        // The untouched proof still goes through.
        chain.add_block(block, proof).unwrap();
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn is_valid_proof_requires_difficulty_prefix() {
        let (chain, _) = test_chain(4);
        let block = Block::new(1, sample_txs(), T0, "0".to_string());
        // Correct content hash, but without four leading zeros.
        let hash = block.compute_hash();
        assert!(!pow::meets_difficulty(&hash, 4));
        assert!(!chain.is_valid_proof(&block, &hash));
    }

    #[test]
    fn cancelled_mine_reports_cancelled_and_drains_the_pool() {
        let (mut chain, _) = test_chain(4);
        for tx in sample_txs() {
            chain.add_new_transaction(tx);
        }
        let token = pow::CancelToken::new();
        token.cancel();
        let err = chain.mine_with_cancel(&token).unwrap_err();
        assert!(matches!(err, ChainError::Cancelled));
        // The pool is drained when mining starts, whatever happens next.
        assert!(chain.pending().is_empty());
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn pool_snapshot_is_independent_of_later_submissions() {
        let (mut chain, _) = test_chain(1);
        chain.add_new_transaction(Transaction::new("Alice".to_string(), "Bob".to_string(), 5));
        chain.mine().unwrap();
        chain.add_new_transaction(Transaction::new("Carol".to_string(), "Dave".to_string(), 7));
        assert_eq!(chain.blocks()[1].transactions.len(), 1);
        assert_eq!(chain.pending().len(), 1);
    }

    #[test]
    fn consecutive_blocks_link_up() {
        let (mut chain, _) = test_chain(1);
        for round in 0..3u64 {
            chain.add_new_transaction(Transaction::new(
                format!("sender-{round}"),
                format!("recipient-{round}"),
                round + 1,
            ));
            let outcome = chain.mine().unwrap();
            assert_eq!(outcome, MineOutcome::Mined { index: round + 1 });
        }
        assert_eq!(chain.len(), 4);
        for pair in chain.blocks().windows(2) {
            assert_eq!(
                Some(pair[1].previous_hash.as_str()),
                pair[0].hash.as_deref()
            );
        }
        chain.validate().unwrap();
    }

    #[test]
    fn validate_catches_tampered_transactions() {
        let (mut chain, _) = test_chain(1);
        chain.add_new_transaction(Transaction::new("Alice".to_string(), "Bob".to_string(), 5));
        chain.mine().unwrap();
        chain.validate().unwrap();

        chain.blocks[1].transactions[0].amount = 500;
        assert!(matches!(chain.validate(), Err(ChainError::InvalidProof)));
    }

    #[test]
    fn sink_failure_leaves_the_chain_unchanged() {
        struct FailingSink;
        impl BlockSink for FailingSink {
            fn persist(&self, block: &Block) -> anyhow::Result<()> {
                if block.index == 0 {
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("disk full"))
                }
            }
        }

        let mut chain =
            Chain::with_collaborators(1, Arc::new(FixedClock(T0)), Arc::new(FailingSink)).unwrap();
        chain.add_new_transaction(Transaction::new("Alice".to_string(), "Bob".to_string(), 5));
        let err = chain.mine().unwrap_err();
        assert!(matches!(err, ChainError::Sink(_)));
        assert_eq!(chain.len(), 1);
    }
}

use crate::crypto::Address;
use crate::error::ChainError;
use crate::transaction::{Amount, Transaction};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::Range;
use tracing::{info, warn};

use super::block::{Block, BlockData};
use super::state::BalanceState;
use super::validation::{validate_chain, validate_successor};

pub const DEFAULT_DIFFICULTY: usize = 4;

/// Outcome of pushing a block through the confirmation buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ConfirmationStatus {
    Confirmed {
        confirmed_blocks: Vec<Block>,
        pending_blocks: usize,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        dropped_blocks: Vec<Block>,
    },
    Pending {
        remaining_confirmations: usize,
        pending_blocks: usize,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        dropped_blocks: Vec<Block>,
    },
}

impl ConfirmationStatus {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, ConfirmationStatus::Confirmed { .. })
    }

    /// Pending blocks discarded on the way because they no longer extended the chain.
    pub fn dropped_blocks(&self) -> &[Block] {
        match self {
            ConfirmationStatus::Confirmed { dropped_blocks, .. } => dropped_blocks,
            ConfirmationStatus::Pending { dropped_blocks, .. } => dropped_blocks,
        }
    }
}

/// A peer chain that passed genesis and block-by-block validation.
#[derive(Debug, Clone)]
pub struct CandidateChain(Vec<Block>);

impl CandidateChain {
    pub fn validate(blocks: Vec<Block>, genesis: &Block, difficulty: usize) -> Result<Self, ChainError> {
        match blocks.first() {
            None => return Err(ChainError::ChainInvalid("Chain is empty".to_string())),
            Some(first) if first != genesis => {
                return Err(ChainError::ChainInvalid(format!(
                    "Genesis mismatch: expected {}, got {}",
                    genesis.hash, first.hash
                )))
            }
            Some(_) => {}
        }
        validate_chain(&blocks, difficulty)?;
        Ok(CandidateChain(blocks))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.0
    }

    pub fn into_blocks(self) -> Vec<Block> {
        self.0
    }
}

/// The confirmed chain, the balances derived from it, and the buffer of
/// mined-but-unconfirmed blocks. Guarded as one unit by the node's lock.
#[derive(Debug, Clone)]
pub struct Ledger {
    chain: Vec<Block>,
    state: BalanceState,
    pending_blocks: VecDeque<Block>,
    /// User transactions carried by the confirmed chain.
    confirmed_txs: HashSet<Transaction>,
    difficulty: usize,
    confirmation_requirement: usize,
    genesis_allocations: HashMap<Address, Amount>,
    rebuild_balances_on_replace: bool,
    epoch: u64,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(DEFAULT_DIFFICULTY, 0)
    }
}

fn extends(parent: &Block, block: &Block) -> bool {
    block.index == parent.index + 1 && block.previous_hash == parent.hash
}

fn user_transactions<'a>(blocks: impl IntoIterator<Item = &'a Block>) -> impl Iterator<Item = &'a Transaction> {
    blocks
        .into_iter()
        .flat_map(|block| block.transactions())
        .filter(|tx| !tx.is_system())
}

impl Ledger {
    pub fn new(difficulty: usize, confirmation_requirement: usize) -> Self {
        Ledger {
            chain: vec![Block::genesis()],
            state: BalanceState::new(),
            pending_blocks: VecDeque::new(),
            confirmed_txs: HashSet::new(),
            difficulty,
            confirmation_requirement,
            genesis_allocations: HashMap::new(),
            rebuild_balances_on_replace: true,
            epoch: 0,
        }
    }

    /// Seeds balances that exist before any block is confirmed.
    pub fn with_allocations(mut self, allocations: HashMap<Address, Amount>) -> Self {
        self.state = BalanceState::from_allocations(&allocations);
        self.genesis_allocations = allocations;
        self
    }

    /// When false, chain replacement keeps the old balances untouched.
    pub fn with_balance_rebuild(mut self, enabled: bool) -> Self {
        self.rebuild_balances_on_replace = enabled;
        self
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    pub fn genesis(&self) -> &Block {
        &self.chain[0]
    }

    /// Last confirmed block. The chain always holds at least genesis.
    pub fn latest_block(&self) -> &Block {
        &self.chain[self.chain.len() - 1]
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn confirmation_requirement(&self) -> usize {
        self.confirmation_requirement
    }

    /// Number of wholesale chain replacements so far.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn pending_blocks(&self) -> impl Iterator<Item = &Block> {
        self.pending_blocks.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.pending_blocks.len()
    }

    pub fn balances(&self) -> &BalanceState {
        &self.state
    }

    pub fn balance_of(&self, address: &str) -> Amount {
        self.state.get_balance(address)
    }

    /// Whether `tx` is already in the confirmed chain or a pending block.
    pub fn contains_transaction(&self, tx: &Transaction) -> bool {
        self.confirmed_txs.contains(tx)
            || self.pending_blocks.iter().any(|block| block.transactions().contains(tx))
    }

    /// The run of pending blocks that extends the confirmed tip. Stale blocks
    /// left over from a chain replacement may sit in front of it.
    fn anchored_run(&self) -> Range<usize> {
        let tip = self.latest_block();
        let Some(start) = self.pending_blocks.iter().position(|block| extends(tip, block)) else {
            return 0..0;
        };
        let mut end = start + 1;
        while end < self.pending_blocks.len() && extends(&self.pending_blocks[end - 1], &self.pending_blocks[end]) {
            end += 1;
        }
        start..end
    }

    /// The block new work builds on: the newest anchored pending block, or
    /// the confirmed tip when nothing anchored is buffered.
    pub fn working_tip(&self) -> &Block {
        let run = self.anchored_run();
        if run.is_empty() {
            self.latest_block()
        } else {
            &self.pending_blocks[run.end - 1]
        }
    }

    /// An unmined block extending the working tip.
    pub fn next_block(&self, transactions: impl Into<BlockData>) -> Block {
        let tip = self.working_tip();
        Block::new(tip.index + 1, transactions, tip.hash.clone())
    }

    /// Rejects a block that repeats a transaction already in `ahead` or the
    /// chain, or whose balances overflow once `ahead` and then it are applied.
    fn check_contents<'a>(
        &self,
        block: &Block,
        ahead: impl Iterator<Item = &'a Block> + Clone,
    ) -> Result<(), ChainError> {
        let mut seen = HashSet::new();
        for tx in user_transactions([block]) {
            let known = self.confirmed_txs.contains(tx)
                || ahead.clone().any(|b| b.transactions().contains(tx));
            if known || !seen.insert(tx) {
                return Err(ChainError::InvalidBlock(format!(
                    "Block {} repeats transaction {} -> {} of {}",
                    block.index, tx.sender, tx.receiver, tx.amount
                )));
            }
        }
        let transactions = ahead.flat_map(|b| b.transactions()).chain(block.transactions());
        self.state.check_transactions(transactions)
    }

    /// Admits a fully mined block: it must extend the working tip, carry a
    /// recomputation-consistent hash and meet the difficulty target, and its
    /// transactions must apply cleanly after the blocks ahead of it.
    pub fn add_block(&mut self, block: Block) -> Result<ConfirmationStatus, ChainError> {
        validate_successor(self.working_tip(), &block, self.difficulty)?;
        self.check_contents(&block, self.pending_blocks.range(self.anchored_run()))?;
        Ok(self.confirm(block))
    }

    /// Commits a locally mined block, distinguishing a moved tip from a bad block.
    pub fn commit_mined(&mut self, block: Block) -> Result<ConfirmationStatus, ChainError> {
        let tip = self.working_tip();
        if !extends(tip, &block) {
            return Err(ChainError::StaleTip(format!(
                "block {} was mined on {}, tip is now {} ({})",
                block.index, block.previous_hash, tip.index, tip.hash
            )));
        }
        self.add_block(block)
    }

    /// Pushes `block` into the pending buffer and moves every block beyond the
    /// confirmation depth into the chain, applying its balances. Blocks that
    /// no longer extend the chain are dropped and reported.
    pub fn confirm(&mut self, block: Block) -> ConfirmationStatus {
        self.pending_blocks.push_back(block);

        let mut confirmed = Vec::new();
        let mut dropped = Vec::new();
        while self.pending_blocks.len() > self.confirmation_requirement {
            let Some(block) = self.pending_blocks.pop_front() else {
                break;
            };
            let applied = validate_successor(self.latest_block(), &block, self.difficulty)
                .and_then(|()| self.check_contents(&block, std::iter::empty::<&Block>()))
                .and_then(|()| self.state.apply_block(&block));
            if let Err(e) = applied {
                warn!(index = block.index, hash = %block.hash, error = %e, "Dropping orphaned pending block");
                dropped.push(block);
                continue;
            }
            self.confirmed_txs.extend(user_transactions([&block]).cloned());
            info!(index = block.index, hash = %block.hash, "Block confirmed and added to the chain");
            self.chain.push(block.clone());
            confirmed.push(block);
        }

        let pending_blocks = self.pending_blocks.len();
        if confirmed.is_empty() {
            ConfirmationStatus::Pending {
                remaining_confirmations: (self.confirmation_requirement + 1).saturating_sub(pending_blocks),
                pending_blocks,
                dropped_blocks: dropped,
            }
        } else {
            ConfirmationStatus::Confirmed {
                confirmed_blocks: confirmed,
                pending_blocks,
                dropped_blocks: dropped,
            }
        }
    }

    /// Full validity check of the confirmed chain.
    pub fn validate(&self) -> Result<(), ChainError> {
        validate_chain(&self.chain, self.difficulty)
    }

    pub fn is_valid(&self) -> bool {
        match self.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Local chain failed validation");
                false
            }
        }
    }

    /// Recomputes balances from the genesis allocations and the confirmed chain.
    pub fn rebuild_balances(&mut self) -> Result<(), ChainError> {
        self.state = BalanceState::rebuild(&self.genesis_allocations, &self.chain)?;
        Ok(())
    }

    /// Discards the confirmed chain and adopts `candidate` wholesale. Pending
    /// blocks are left in place; any that no longer extend the new tip are
    /// dropped when they reach the front of the buffer. A candidate whose
    /// balances overflow is refused and the ledger is left unchanged.
    pub fn replace_chain(&mut self, candidate: CandidateChain) -> Result<(), ChainError> {
        let blocks = candidate.into_blocks();
        let state = if self.rebuild_balances_on_replace {
            let state = BalanceState::rebuild(&self.genesis_allocations, &blocks)
                .map_err(|e| ChainError::ChainInvalid(format!("Balances of the candidate chain do not apply: {}", e)))?;
            Some(state)
        } else {
            warn!("Chain replaced without rebuilding balances; balances may not match the adopted chain");
            None
        };

        let old_len = self.chain.len();
        self.confirmed_txs = user_transactions(&blocks).cloned().collect();
        self.chain = blocks;
        if let Some(state) = state {
            self.state = state;
        }
        self.epoch += 1;
        info!(old_len, new_len = self.chain.len(), epoch = self.epoch, "Local chain replaced");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::miner::mine;
    use crate::transaction::Transaction;

    fn mine_next(ledger: &Ledger, txs: Vec<Transaction>) -> Block {
        mine(ledger.next_block(txs), ledger.difficulty())
    }

    #[test]
    fn test_new_ledger_holds_only_genesis() {
        let ledger = Ledger::new(2, 0);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.latest_block(), &Block::genesis());
        assert!(ledger.is_valid());
        assert!(ledger.balances().is_empty());
    }

    #[test]
    fn test_transfer_scenario_updates_balances_on_confirmation() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let mut allocations = HashMap::new();
        allocations.insert(alice.address(), Amount::from_num(100));
        let mut ledger = Ledger::new(2, 0).with_allocations(allocations);

        let tx = Transaction::with_fee(alice.address(), bob.address(), Amount::from_num(30), Amount::from_num(0.3))
            .signed(&alice);
        crate::transaction::TransactionValidator::validate(&tx, ledger.balances()).unwrap();

        let block = mine_next(&ledger, vec![tx]);
        assert!(block.hash.starts_with("00"));
        let status = ledger.add_block(block).unwrap();

        assert!(status.is_confirmed());
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.balance_of(&alice.address()), Amount::from_num(70));
        assert_eq!(ledger.balance_of(&bob.address()), Amount::from_num(30));
        assert!(ledger.is_valid());
    }

    #[test]
    fn test_system_reward_only_credits() {
        let mut ledger = Ledger::new(1, 0);
        let reward = Transaction::system_reward("miner".into(), Amount::from_num(50));
        ledger.add_block(mine_next(&ledger, vec![reward])).unwrap();

        assert_eq!(ledger.balance_of("miner"), Amount::from_num(50));
        assert_eq!(ledger.balances().len(), 1);
    }

    #[test]
    fn test_confirmation_buffer_holds_blocks_until_depth_reached() {
        let mut ledger = Ledger::new(1, 2);

        let first = mine_next(&ledger, vec![]);
        let status = ledger.add_block(first.clone()).unwrap();
        assert_eq!(
            status,
            ConfirmationStatus::Pending { remaining_confirmations: 2, pending_blocks: 1, dropped_blocks: vec![] }
        );
        assert_eq!(ledger.working_tip(), &first);

        let second = mine_next(&ledger, vec![]);
        assert_eq!(second.previous_hash, first.hash);
        let status = ledger.add_block(second).unwrap();
        assert_eq!(
            status,
            ConfirmationStatus::Pending { remaining_confirmations: 1, pending_blocks: 2, dropped_blocks: vec![] }
        );
        assert_eq!(ledger.len(), 1);

        let third = mine_next(&ledger, vec![]);
        match ledger.add_block(third).unwrap() {
            ConfirmationStatus::Confirmed { confirmed_blocks, pending_blocks, .. } => {
                assert_eq!(confirmed_blocks, vec![first]);
                assert_eq!(pending_blocks, 2);
            }
            other => panic!("Expected confirmation, got {:?}", other),
        }
        assert_eq!(ledger.len(), 2);
        assert!(ledger.is_valid());
    }

    #[test]
    fn test_balances_apply_only_at_confirmation() {
        let mut ledger = Ledger::new(1, 1);
        let reward = Transaction::system_reward("miner".into(), Amount::from_num(5));
        ledger.add_block(mine_next(&ledger, vec![reward])).unwrap();
        assert_eq!(ledger.balance_of("miner"), Amount::ZERO);

        ledger.add_block(mine_next(&ledger, vec![])).unwrap();
        assert_eq!(ledger.balance_of("miner"), Amount::from_num(5));
    }

    #[test]
    fn test_add_block_rejects_bad_linkage() {
        let mut ledger = Ledger::new(1, 0);
        let mut block = Block::new(1, Vec::<Transaction>::new(), "deadbeef".into());
        block = mine(block, 1);
        assert!(matches!(ledger.add_block(block), Err(ChainError::InvalidBlock(_))));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_add_block_rejects_missing_proof_of_work() {
        let mut ledger = Ledger::new(3, 0);
        let mut block = ledger.next_block(Vec::<Transaction>::new());
        while block.meets_difficulty(3) {
            block.nonce += 1;
            block.hash = block.compute_hash();
        }
        assert!(matches!(ledger.add_block(block), Err(ChainError::InvalidBlock(_))));
    }

    #[test]
    fn test_add_block_rejects_inconsistent_hash() {
        let mut ledger = Ledger::new(1, 0);
        let mut block = mine_next(&ledger, vec![]);
        block.nonce += 1;
        assert!(ledger.add_block(block).is_err());
    }

    #[test]
    fn test_commit_mined_reports_stale_tip() {
        let mut ledger = Ledger::new(1, 0);
        let racer = mine_next(&ledger, vec![]);
        let loser = mine_next(&ledger, vec![Transaction::system_reward("x".into(), Amount::from_num(1))]);

        ledger.commit_mined(racer).unwrap();
        assert!(matches!(ledger.commit_mined(loser), Err(ChainError::StaleTip(_))));
    }

    #[test]
    fn test_tampered_chain_is_invalid() {
        let mut ledger = Ledger::new(1, 0);
        for _ in 0..3 {
            ledger.add_block(mine_next(&ledger, vec![])).unwrap();
        }
        assert!(ledger.is_valid());

        ledger.chain[2].transactions =
            BlockData::Transactions(vec![Transaction::system_reward("evil".into(), Amount::from_num(1))]);
        assert!(!ledger.is_valid());
        assert!(matches!(ledger.validate(), Err(ChainError::ChainInvalid(_))));
    }

    fn longer_chain(difficulty: usize, blocks: usize, reward_to: &str) -> Vec<Block> {
        let mut other = Ledger::new(difficulty, 0);
        for _ in 0..blocks {
            let reward = Transaction::system_reward(reward_to.to_string(), Amount::from_num(10));
            other.add_block(mine_next(&other, vec![reward])).unwrap();
        }
        other.chain().to_vec()
    }

    #[test]
    fn test_replace_chain_rebuilds_balances() {
        let mut ledger = Ledger::new(1, 0);
        ledger
            .add_block(mine_next(&ledger, vec![Transaction::system_reward("local".into(), Amount::from_num(7))]))
            .unwrap();

        let remote = longer_chain(1, 3, "remote");
        let candidate = CandidateChain::validate(remote, ledger.genesis(), 1).unwrap();
        ledger.replace_chain(candidate).unwrap();

        assert_eq!(ledger.len(), 4);
        assert_eq!(ledger.epoch(), 1);
        assert_eq!(ledger.balance_of("local"), Amount::ZERO);
        assert_eq!(ledger.balance_of("remote"), Amount::from_num(30));
    }

    #[test]
    fn test_replace_chain_without_rebuild_keeps_stale_balances() {
        // Mirrors the behaviour of nodes that skip the rebuild pass.
        let mut ledger = Ledger::new(1, 0).with_balance_rebuild(false);
        ledger
            .add_block(mine_next(&ledger, vec![Transaction::system_reward("local".into(), Amount::from_num(7))]))
            .unwrap();

        let candidate = CandidateChain::validate(longer_chain(1, 3, "remote"), ledger.genesis(), 1).unwrap();
        ledger.replace_chain(candidate).unwrap();

        assert_eq!(ledger.balance_of("local"), Amount::from_num(7));
        assert_eq!(ledger.balance_of("remote"), Amount::ZERO);

        ledger.rebuild_balances().unwrap();
        assert_eq!(ledger.balance_of("local"), Amount::ZERO);
        assert_eq!(ledger.balance_of("remote"), Amount::from_num(30));
    }

    #[test]
    fn test_replace_chain_refuses_overflowing_candidate() {
        let mut other = Ledger::new(1, 0);
        let big = |to: &str| Transaction::system_reward(to.to_string(), Amount::from_num(2_000_000_000));
        other.add_block(mine_next(&other, vec![big("x")])).unwrap();
        // Bypass the content check to build a chain whose balances overflow.
        let second = mine_next(&other, vec![big("x")]);
        other.chain.push(second);
        assert!(other.is_valid());

        let mut ledger = Ledger::new(1, 0);
        let candidate = CandidateChain::validate(other.chain().to_vec(), ledger.genesis(), 1).unwrap();
        assert!(matches!(ledger.replace_chain(candidate), Err(ChainError::ChainInvalid(_))));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.epoch(), 0);
    }

    #[test]
    fn test_orphaned_pending_block_dropped_after_replacement() {
        let mut ledger = Ledger::new(1, 1);
        let orphan = mine_next(&ledger, vec![]);
        ledger.add_block(orphan.clone()).unwrap();
        assert_eq!(ledger.pending_len(), 1);

        let candidate = CandidateChain::validate(longer_chain(1, 2, "remote"), ledger.genesis(), 1).unwrap();
        ledger.replace_chain(candidate).unwrap();
        assert_eq!(ledger.pending_len(), 1);
        assert_eq!(ledger.working_tip(), ledger.latest_block());

        let fresh = mine_next(&ledger, vec![]);
        assert_eq!(fresh.index, 3);
        let status = ledger.add_block(fresh).unwrap();

        assert!(!status.is_confirmed());
        assert_eq!(status.dropped_blocks(), &[orphan][..]);
        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.pending_len(), 1);
        assert!(ledger.is_valid());
    }

    #[test]
    fn test_working_tip_skips_stale_blocks_after_replacement() {
        let mut ledger = Ledger::new(1, 2);
        let stale = mine_next(&ledger, vec![]);
        ledger.add_block(stale.clone()).unwrap();

        let candidate = CandidateChain::validate(longer_chain(1, 3, "remote"), ledger.genesis(), 1).unwrap();
        ledger.replace_chain(candidate).unwrap();

        let first = mine_next(&ledger, vec![Transaction::system_reward("first".into(), Amount::from_num(1))]);
        assert_eq!(first.previous_hash, ledger.latest_block().hash);
        ledger.commit_mined(first.clone()).unwrap();
        assert_eq!(ledger.working_tip(), &first);

        let second = mine_next(&ledger, vec![Transaction::system_reward("second".into(), Amount::from_num(2))]);
        assert_eq!(second.previous_hash, first.hash);
        let status = ledger.commit_mined(second.clone()).unwrap();
        assert_eq!(status.dropped_blocks(), &[stale][..]);
        assert_eq!(ledger.pending_len(), 2);

        for _ in 0..2 {
            ledger.add_block(mine_next(&ledger, vec![])).unwrap();
        }
        assert_eq!(ledger.len(), 6);
        assert_eq!(ledger.chain()[4], first);
        assert_eq!(ledger.chain()[5], second);
        assert_eq!(ledger.balance_of("second"), Amount::from_num(2));
        assert!(ledger.is_valid());
    }

    #[test]
    fn test_overflowing_block_rejected_before_confirmation() {
        let mut ledger = Ledger::new(1, 0);
        let big = Transaction::system_reward("x".into(), Amount::from_num(2_000_000_000));
        let block = mine_next(&ledger, vec![big.clone(), big]);

        assert!(matches!(ledger.add_block(block), Err(ChainError::InvalidBlock(_))));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.pending_len(), 0);
        assert_eq!(ledger.balance_of("x"), Amount::ZERO);
    }

    #[test]
    fn test_overflow_counts_blocks_still_pending() {
        let mut ledger = Ledger::new(1, 1);
        let big = |to: &str| Transaction::system_reward(to.to_string(), Amount::from_num(2_000_000_000));
        ledger.add_block(mine_next(&ledger, vec![big("x")])).unwrap();
        assert_eq!(ledger.balance_of("x"), Amount::ZERO);

        let overflowing = mine_next(&ledger, vec![big("x")]);
        assert!(matches!(ledger.add_block(overflowing), Err(ChainError::InvalidBlock(_))));
        assert_eq!(ledger.pending_len(), 1);

        ledger.add_block(mine_next(&ledger, vec![big("y")])).unwrap();
        assert_eq!(ledger.balance_of("x"), Amount::from_num(2_000_000_000));
    }

    #[test]
    fn test_confirmed_transaction_cannot_be_included_again() {
        let alice = KeyPair::generate();
        let mut allocations = HashMap::new();
        allocations.insert(alice.address(), Amount::from_num(100));
        let mut ledger = Ledger::new(1, 1).with_allocations(allocations);

        let tx = Transaction::new(alice.address(), "bob".into(), Amount::from_num(30)).signed(&alice);
        assert!(!ledger.contains_transaction(&tx));
        ledger.add_block(mine_next(&ledger, vec![tx.clone()])).unwrap();
        assert!(ledger.contains_transaction(&tx));

        // Still pending, then confirmed: both are replays.
        let replay = mine_next(&ledger, vec![tx.clone()]);
        assert!(matches!(ledger.add_block(replay), Err(ChainError::InvalidBlock(_))));
        ledger.add_block(mine_next(&ledger, vec![])).unwrap();
        assert!(ledger.contains_transaction(&tx));
        let replay = mine_next(&ledger, vec![tx.clone()]);
        assert!(matches!(ledger.add_block(replay), Err(ChainError::InvalidBlock(_))));

        let once = Transaction::new(alice.address(), "carol".into(), Amount::from_num(1)).signed(&alice);
        let doubled = mine_next(&ledger, vec![once.clone(), once]);
        assert!(matches!(ledger.add_block(doubled), Err(ChainError::InvalidBlock(_))));

        ledger.add_block(mine_next(&ledger, vec![])).unwrap();
        assert_eq!(ledger.balance_of(&alice.address()), Amount::from_num(70));
        assert_eq!(ledger.balance_of("bob"), Amount::from_num(30));
    }

    #[test]
    fn test_candidate_with_foreign_genesis_rejected() {
        let mut foreign = longer_chain(1, 2, "x");
        foreign[0].timestamp = 1;
        foreign[0].hash = foreign[0].compute_hash();
        let result = CandidateChain::validate(foreign, &Block::genesis(), 1);
        assert!(matches!(result, Err(ChainError::ChainInvalid(_))));
    }
}

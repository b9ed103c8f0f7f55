//! Proof-of-work search.
//!
//! A block is mined once the first `difficulty` hex characters of its hash are
//! all `'0'`. The search is unbounded, so node code runs it on a blocking
//! thread and hands it a cancel flag; [`mine`] is the plain sequential form.

use crate::blockchain::{hash_with_nonce, meets_difficulty, Block};
use crate::error::ChainError;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::debug;

/// How many nonces are tried between two looks at the cancel flag.
const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// Nonces handed to each worker per parallel round.
const PARALLEL_ROUND_PER_THREAD: u64 = 16_384;

/// Sequential search from nonce 0. Returns only once the target is met.
pub fn mine(mut block: Block, difficulty: usize) -> Block {
    block.nonce = 0;
    block.hash = block.compute_hash();
    while !block.meets_difficulty(difficulty) {
        block.nonce += 1;
        block.hash = block.compute_hash();
    }
    block
}

/// Sequential search that gives up with [`ChainError::MiningCancelled`] once
/// `cancel` is set.
pub fn mine_cancellable(mut block: Block, difficulty: usize, cancel: &AtomicBool) -> Result<Block, ChainError> {
    let started = Instant::now();
    let prefix = block.canonical_prefix();
    let mut nonce: u64 = 0;
    loop {
        let hash = hash_with_nonce(&prefix, nonce);
        if meets_difficulty(&hash, difficulty) {
            debug!(index = block.index, nonce, elapsed_ms = started.elapsed().as_millis() as u64, "Proof of work completed");
            block.nonce = nonce;
            block.hash = hash;
            return Ok(block);
        }
        nonce = nonce.wrapping_add(1);
        if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
            debug!(index = block.index, tried = nonce, "Mining cancelled");
            return Err(ChainError::MiningCancelled);
        }
    }
}

/// Builds the worker pool parallel searches run on. Built once per node
/// and reused by every attempt.
pub fn build_pool(threads: usize) -> Result<ThreadPool, ChainError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("pow-worker-{}", i))
        .build()
        .map_err(|e| ChainError::ConfigError(format!("Failed to build mining pool: {}", e)))
}

/// Splits the nonce space into rounds of disjoint ranges searched on `pool`.
/// Within a round the lowest satisfying nonce wins.
pub fn mine_parallel(
    mut block: Block,
    difficulty: usize,
    pool: &ThreadPool,
    cancel: &AtomicBool,
) -> Result<Block, ChainError> {
    let threads = pool.current_num_threads();
    let started = Instant::now();
    let prefix = block.canonical_prefix();
    let round = PARALLEL_ROUND_PER_THREAD * threads as u64;

    let found = pool.install(|| {
        let mut start: u64 = 0;
        loop {
            if cancel.load(Ordering::Relaxed) {
                return None;
            }
            let end = start.saturating_add(round);
            let hit = (start..end)
                .into_par_iter()
                .map(|nonce| (nonce, hash_with_nonce(&prefix, nonce)))
                .find_first(|(_, hash)| meets_difficulty(hash, difficulty));
            if hit.is_some() || end == u64::MAX {
                return hit;
            }
            start = end;
        }
    });

    match found {
        Some((nonce, hash)) => {
            debug!(index = block.index, nonce, threads, elapsed_ms = started.elapsed().as_millis() as u64, "Parallel proof of work completed");
            block.nonce = nonce;
            block.hash = hash;
            Ok(block)
        }
        None => Err(ChainError::MiningCancelled),
    }
}

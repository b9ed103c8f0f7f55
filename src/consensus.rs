//! Longest-valid-chain fork choice.
//!
//! Peers are asked for their full chain; a candidate replaces the local chain
//! only when it is strictly longer, starts from the same genesis, and passes
//! block-by-block validation. Replacement is wholesale: there is no search for
//! a common ancestor.

use crate::blockchain::{Block, CandidateChain, Ledger};
use crate::error::ChainError;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Body of a peer's `GET /chain`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerChain {
    pub length: usize,
    pub chain: Vec<Block>,
}

/// Source of peer chains. Implemented over HTTP by `network::HttpPeerClient`.
pub trait PeerTransport: Send + Sync {
    fn fetch_chain(&self, peer: &str) -> impl Future<Output = Result<PeerChain, ChainError>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Replaced { peer: String, length: usize },
    Authoritative,
}

impl Resolution {
    pub fn replaced(&self) -> bool {
        matches!(self, Resolution::Replaced { .. })
    }
}

/// Picks the longest valid response. Ties keep the first one seen.
pub fn select_candidate(
    genesis: &Block,
    local_len: usize,
    difficulty: usize,
    responses: Vec<(String, PeerChain)>,
) -> Option<(String, CandidateChain)> {
    let mut best = None;
    let mut max_length = local_len;

    for (peer, response) in responses {
        if response.length != response.chain.len() {
            warn!(peer = %peer, reported = response.length, actual = response.chain.len(), "Peer misreported chain length");
            continue;
        }
        if response.length <= max_length {
            debug!(peer = %peer, length = response.length, best = max_length, "Peer chain not longer");
            continue;
        }
        match CandidateChain::validate(response.chain, genesis, difficulty) {
            Ok(candidate) => {
                max_length = candidate.len();
                best = Some((peer, candidate));
            }
            Err(e) => warn!(peer = %peer, error = %e, "Rejected peer chain"),
        }
    }

    best
}

pub struct ConsensusResolver<T> {
    transport: T,
    timeout: Duration,
}

impl<T: PeerTransport> ConsensusResolver<T> {
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Queries every peer concurrently. Unreachable or slow peers are skipped;
    /// results keep peer-list order.
    pub async fn fetch_all(&self, peers: &[String]) -> Vec<(String, PeerChain)> {
        let fetches = peers.iter().map(|peer| async move {
            match tokio::time::timeout(self.timeout, self.transport.fetch_chain(peer)).await {
                Ok(Ok(chain)) => Some((peer.clone(), chain)),
                Ok(Err(e)) => {
                    warn!(peer = %peer, error = %e, "Could not fetch peer chain");
                    None
                }
                Err(_) => {
                    let e = ChainError::PeerUnreachable(format!("{} timed out after {:?}", peer, self.timeout));
                    warn!(peer = %peer, error = %e, "Could not fetch peer chain");
                    None
                }
            }
        });
        join_all(fetches).await.into_iter().flatten().collect()
    }

    /// Runs fork choice against `peers` and adopts the winner, if any.
    ///
    /// Fetching and validation happen without holding the ledger lock; the
    /// write lock is taken only to re-check the length and swap the chain.
    pub async fn resolve(&self, ledger: &RwLock<Ledger>, peers: &[String]) -> Resolution {
        let (genesis, local_len, difficulty) = {
            let ledger = ledger.read().await;
            (ledger.genesis().clone(), ledger.len(), ledger.difficulty())
        };

        let responses = self.fetch_all(peers).await;
        let Some((peer, candidate)) = select_candidate(&genesis, local_len, difficulty, responses) else {
            debug!(local_len, "Chain is authoritative");
            return Resolution::Authoritative;
        };

        let mut ledger = ledger.write().await;
        if candidate.len() <= ledger.len() {
            info!(peer = %peer, candidate = candidate.len(), local = ledger.len(), "Local chain caught up while resolving");
            return Resolution::Authoritative;
        }
        let length = candidate.len();
        if let Err(e) = ledger.replace_chain(candidate) {
            warn!(peer = %peer, error = %e, "Refused peer chain");
            return Resolution::Authoritative;
        }
        info!(peer = %peer, length, "Adopted longer peer chain");
        Resolution::Replaced { peer, length }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::mine;
    use crate::transaction::{Amount, Transaction};
    use std::collections::HashMap;

    fn build_chain(difficulty: usize, extra_blocks: usize, tag: &str) -> Vec<Block> {
        let mut ledger = Ledger::new(difficulty, 0);
        for _ in 0..extra_blocks {
            let reward = Transaction::system_reward(tag.to_string(), Amount::from_num(1));
            let block = mine(ledger.next_block(vec![reward]), difficulty);
            ledger.add_block(block).unwrap();
        }
        ledger.chain().to_vec()
    }

    fn response(chain: Vec<Block>) -> PeerChain {
        PeerChain { length: chain.len(), chain }
    }

    fn local_ledger(difficulty: usize, extra_blocks: usize) -> Ledger {
        let mut ledger = Ledger::new(difficulty, 0);
        let candidate = CandidateChain::validate(build_chain(difficulty, extra_blocks, "local"), &Block::genesis(), difficulty).unwrap();
        ledger.replace_chain(candidate).unwrap();
        ledger
    }

    #[test]
    fn test_never_adopts_equal_or_shorter_chain() {
        let genesis = Block::genesis();
        let responses = vec![
            ("a".to_string(), response(build_chain(1, 2, "a"))),
            ("b".to_string(), response(build_chain(1, 1, "b"))),
        ];
        assert!(select_candidate(&genesis, 3, 1, responses).is_none());
    }

    #[test]
    fn test_longest_valid_chain_wins() {
        let genesis = Block::genesis();
        let responses = vec![
            ("short".to_string(), response(build_chain(1, 3, "s"))),
            ("long".to_string(), response(build_chain(1, 5, "l"))),
            ("mid".to_string(), response(build_chain(1, 4, "m"))),
        ];
        let (peer, candidate) = select_candidate(&genesis, 2, 1, responses).unwrap();
        assert_eq!(peer, "long");
        assert_eq!(candidate.len(), 6);
    }

    #[test]
    fn test_tie_keeps_first_discovered() {
        let genesis = Block::genesis();
        let responses = vec![
            ("first".to_string(), response(build_chain(1, 3, "f"))),
            ("second".to_string(), response(build_chain(1, 3, "s"))),
        ];
        let (peer, _) = select_candidate(&genesis, 1, 1, responses).unwrap();
        assert_eq!(peer, "first");
    }

    #[test]
    fn test_foreign_genesis_rejected() {
        let mut foreign = build_chain(1, 4, "f");
        foreign[0].transactions = crate::blockchain::BlockData::Sentinel("Other Genesis".into());
        foreign[0].hash = foreign[0].compute_hash();
        // Relink so only the genesis differs.
        for i in 1..foreign.len() {
            foreign[i].previous_hash = foreign[i - 1].hash.clone();
            let relinked = mine(foreign[i].clone(), 1);
            foreign[i] = relinked;
        }

        let responses = vec![("foreign".to_string(), response(foreign))];
        assert!(select_candidate(&Block::genesis(), 1, 1, responses).is_none());
    }

    #[test]
    fn test_misreported_length_rejected() {
        let chain = build_chain(1, 3, "liar");
        let responses = vec![("liar".to_string(), PeerChain { length: 10, chain })];
        assert!(select_candidate(&Block::genesis(), 1, 1, responses).is_none());
    }

    #[test]
    fn test_chain_with_forged_hash_rejected() {
        let mut chain = build_chain(1, 3, "forger");
        chain[2].transactions = crate::blockchain::BlockData::Transactions(vec![]);
        let responses = vec![("forger".to_string(), response(chain))];
        assert!(select_candidate(&Block::genesis(), 1, 1, responses).is_none());
    }

    /// In-memory peers keyed by name. Missing peers are unreachable; peers
    /// listed in `slow` never answer within a test timeout.
    #[derive(Default)]
    struct MockTransport {
        chains: HashMap<String, PeerChain>,
        slow: Vec<String>,
    }

    impl PeerTransport for MockTransport {
        async fn fetch_chain(&self, peer: &str) -> Result<PeerChain, ChainError> {
            if self.slow.iter().any(|p| p == peer) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            self.chains
                .get(peer)
                .cloned()
                .ok_or_else(|| ChainError::PeerUnreachable(peer.to_string()))
        }
    }

    #[tokio::test]
    async fn test_peer_with_bad_proof_of_work_does_not_replace_chain() {
        tokio::time::timeout(Duration::from_secs(10), async {
            let ledger = RwLock::new(local_ledger(2, 2));
            let before = ledger.read().await.chain().to_vec();
            assert_eq!(before.len(), 3);

            let mut remote = build_chain(2, 3, "remote");
            let mut bad = Block::new(4, Vec::<Transaction>::new(), remote[3].hash.clone());
            while bad.meets_difficulty(2) {
                bad.nonce += 1;
                bad.hash = bad.compute_hash();
            }
            remote.push(bad);
            assert_eq!(remote.len(), 5);

            let mut transport = MockTransport::default();
            transport.chains.insert("peer".into(), response(remote));
            let resolver = ConsensusResolver::new(transport, Duration::from_secs(1));

            let outcome = resolver.resolve(&ledger, &["peer".to_string()]).await;
            assert_eq!(outcome, Resolution::Authoritative);
            assert_eq!(ledger.read().await.chain(), &before[..]);
        })
        .await
        .expect("test timed out");
    }

    #[tokio::test]
    async fn test_resolve_adopts_longer_chain_despite_unreachable_peers() {
        tokio::time::timeout(Duration::from_secs(10), async {
            let ledger = RwLock::new(local_ledger(1, 1));

            let mut transport = MockTransport::default();
            transport.chains.insert("good".into(), response(build_chain(1, 4, "good")));
            transport.chains.insert("slow".into(), response(build_chain(1, 9, "slow")));
            transport.slow.push("slow".into());
            let resolver = ConsensusResolver::new(transport, Duration::from_millis(100));

            let peers = vec!["down".to_string(), "slow".to_string(), "good".to_string()];
            let outcome = resolver.resolve(&ledger, &peers).await;

            assert_eq!(outcome, Resolution::Replaced { peer: "good".into(), length: 5 });
            let ledger = ledger.read().await;
            assert_eq!(ledger.len(), 5);
            assert!(ledger.is_valid());
            assert_eq!(ledger.balance_of("good"), Amount::from_num(4));
        })
        .await
        .expect("test timed out");
    }

    #[tokio::test]
    async fn test_resolve_with_no_peers_is_authoritative() {
        let ledger = RwLock::new(Ledger::new(1, 0));
        let resolver = ConsensusResolver::new(MockTransport::default(), Duration::from_millis(50));
        assert_eq!(resolver.resolve(&ledger, &[]).await, Resolution::Authoritative);
        assert_eq!(ledger.read().await.len(), 1);
    }
}

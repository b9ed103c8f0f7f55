//! The running node: shared ledger and mempool, peers, and background tasks.

use crate::blockchain::{Block, ConfirmationStatus, Ledger};
use crate::config::{MinerMode, NodeConfig};
use crate::consensus::{ConsensusResolver, Resolution};
use crate::crypto::Address;
use crate::error::ChainError;
use crate::mempool::Mempool;
use crate::miner;
use crate::network::HttpPeerClient;
use crate::transaction::{Amount, Transaction, TransactionValidator};
use parking_lot::Mutex;
use rayon::ThreadPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Attempts `/mine` makes before giving up on a moving tip.
pub const MAX_MINE_ATTEMPTS: usize = 3;

/// A block this node mined and committed.
#[derive(Debug, Clone)]
pub struct MinedBlock {
    pub block: Block,
    pub status: ConfirmationStatus,
}

/// What happened to a transaction submitted through `POST /transaction`.
#[derive(Debug, Clone)]
pub enum Submission {
    Mined(MinedBlock),
    Queued { admitted: bool },
}

/// Cancel flags of every in-flight mining attempt.
#[derive(Debug, Default)]
struct MiningRegistry {
    flags: Mutex<Vec<Arc<AtomicBool>>>,
}

impl MiningRegistry {
    fn register(&self) -> MiningTicket<'_> {
        let flag = Arc::new(AtomicBool::new(false));
        self.flags.lock().push(flag.clone());
        MiningTicket { registry: self, flag }
    }

    fn cancel_all(&self) -> usize {
        let flags = self.flags.lock();
        for flag in flags.iter() {
            flag.store(true, Ordering::Relaxed);
        }
        flags.len()
    }

    fn in_flight(&self) -> usize {
        self.flags.lock().len()
    }
}

/// Deregisters its flag when dropped.
struct MiningTicket<'a> {
    registry: &'a MiningRegistry,
    flag: Arc<AtomicBool>,
}

impl Drop for MiningTicket<'_> {
    fn drop(&mut self) {
        self.registry.flags.lock().retain(|f| !Arc::ptr_eq(f, &self.flag));
    }
}

pub struct Node {
    config: NodeConfig,
    ledger: Arc<RwLock<Ledger>>,
    mempool: Arc<RwLock<Mempool>>,
    peers: Vec<String>,
    client: HttpPeerClient,
    resolver: ConsensusResolver<HttpPeerClient>,
    mining: MiningRegistry,
    mining_pool: Option<Arc<ThreadPool>>,
    peer_wallets: RwLock<HashMap<Address, Amount>>,
    blocks_mined: AtomicU64,
}

impl Node {
    pub fn new(config: NodeConfig, peers: Vec<String>) -> Result<Self, ChainError> {
        config.validate()?;
        let ledger = Ledger::new(config.chain.difficulty, config.chain.confirmation_requirement)
            .with_allocations(config.chain.genesis_allocations.clone())
            .with_balance_rebuild(config.chain.rebuild_balances_on_replace);
        let client = HttpPeerClient::new(config.peer_timeout())?;
        let resolver = ConsensusResolver::new(client.clone(), config.peer_timeout());
        let mining_pool = match config.miner.threads {
            0 | 1 => None,
            threads => Some(Arc::new(miner::build_pool(threads)?)),
        };

        Ok(Self {
            config,
            ledger: Arc::new(RwLock::new(ledger)),
            mempool: Arc::new(RwLock::new(Mempool::new())),
            peers,
            client,
            resolver,
            mining: MiningRegistry::default(),
            mining_pool,
            peer_wallets: RwLock::new(HashMap::new()),
            blocks_mined: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<RwLock<Ledger>> {
        &self.ledger
    }

    pub fn mempool(&self) -> &Arc<RwLock<Mempool>> {
        &self.mempool
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    pub fn blocks_mined(&self) -> u64 {
        self.blocks_mined.load(Ordering::Relaxed)
    }

    pub fn mining_in_flight(&self) -> usize {
        self.mining.in_flight()
    }

    /// Signals every in-flight mining attempt to stop.
    pub fn cancel_mining(&self) -> usize {
        let cancelled = self.mining.cancel_all();
        if cancelled > 0 {
            info!(cancelled, "Cancelled in-flight mining");
        }
        cancelled
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    async fn validate_transaction(&self, tx: &Transaction) -> Result<(), ChainError> {
        let ledger = self.ledger.read().await;
        if ledger.contains_transaction(tx) {
            return Err(ChainError::InvalidTransaction(
                "Transaction is already included in the chain".to_string(),
            ));
        }
        TransactionValidator::validate(tx, ledger.balances())
    }

    /// Validates `tx` and, depending on the miner mode, mines it right away or
    /// queues it and forwards it to peers.
    pub async fn submit_transaction(&self, tx: Transaction) -> Result<Submission, ChainError> {
        self.validate_transaction(&tx).await?;

        match self.config.miner.mode {
            MinerMode::Immediate => {
                let mined = self.mine_transactions(vec![tx]).await?;
                Ok(Submission::Mined(mined))
            }
            MinerMode::Pooled => {
                let admitted = self.mempool.write().await.admit(tx.clone());
                if admitted {
                    debug!(sender = %tx.sender, receiver = %tx.receiver, amount = %tx.amount, "Transaction queued");
                    self.client.broadcast_transaction(&self.peers, &tx);
                }
                Ok(Submission::Queued { admitted })
            }
        }
    }

    /// Validates and pools a transaction forwarded by a peer. Never re-broadcasts.
    pub async fn admit_from_peer(&self, tx: Transaction) -> Result<bool, ChainError> {
        self.validate_transaction(&tx).await?;
        Ok(self.mempool.write().await.admit(tx))
    }

    /// Evicts pooled transactions the ledger already carries.
    async fn evict_known(&self) -> usize {
        let pooled = self.mempool.read().await.transactions().to_vec();
        let known: Vec<Transaction> = {
            let ledger = self.ledger.read().await;
            pooled.into_iter().filter(|tx| ledger.contains_transaction(tx)).collect()
        };
        if known.is_empty() {
            return 0;
        }
        let evicted = self.mempool.write().await.remove(&known);
        warn!(evicted, "Evicted already included transactions from the mempool");
        evicted
    }

    /// Returns the user transactions of dropped pending blocks to the mempool.
    async fn readmit_dropped(&self, status: &ConfirmationStatus) -> usize {
        let dropped = status.dropped_blocks();
        if dropped.is_empty() {
            return 0;
        }
        let ledger = self.ledger.read().await;
        let mut mempool = self.mempool.write().await;
        let mut restored = 0;
        for tx in dropped.iter().flat_map(|block| block.transactions()) {
            if !tx.is_system() && !ledger.contains_transaction(tx) && mempool.admit(tx.clone()) {
                restored += 1;
            }
        }
        info!(blocks = dropped.len(), restored, "Returned transactions of dropped blocks to the mempool");
        restored
    }

    /// Overwrites the local mempool with a peer's view.
    pub async fn sync_mempool(&self, transactions: Vec<Transaction>) -> usize {
        let mut mempool = self.mempool.write().await;
        mempool.sync(transactions);
        mempool.len()
    }

    // ------------------------------------------------------------------
    // Mining
    // ------------------------------------------------------------------

    /// One optimistic attempt: build a template under the read lock, search
    /// off-lock, commit under the write lock.
    async fn mine_once(&self, transactions: Vec<Transaction>) -> Result<MinedBlock, ChainError> {
        let (template, difficulty) = {
            let ledger = self.ledger.read().await;
            (ledger.next_block(transactions), ledger.difficulty())
        };
        let pool = self.mining_pool.clone();

        let ticket = self.mining.register();
        let flag = ticket.flag.clone();
        let index = template.index;
        debug!(index, difficulty, parallel = pool.is_some(), "Mining block");
        let mined = tokio::task::spawn_blocking(move || match pool {
            Some(pool) => miner::mine_parallel(template, difficulty, &pool, &flag),
            None => miner::mine_cancellable(template, difficulty, &flag),
        })
        .await
        .map_err(|e| {
            error!(index, error = %e, "Mining task failed");
            ChainError::MiningCancelled
        })??;
        drop(ticket);

        let status = self.ledger.write().await.commit_mined(mined.clone())?;
        self.blocks_mined.fetch_add(1, Ordering::Relaxed);
        let evicted = self.mempool.write().await.remove(mined.transactions());
        info!(index = mined.index, hash = %mined.hash, nonce = mined.nonce, evicted, "Mined block");
        self.readmit_dropped(&status).await;

        self.client.broadcast_block(&self.peers, &mined);
        Ok(MinedBlock { block: mined, status })
    }

    /// Mines `transactions` as given, retrying when the tip moves underneath.
    pub async fn mine_transactions(&self, transactions: Vec<Transaction>) -> Result<MinedBlock, ChainError> {
        let mut last_error = ChainError::MiningCancelled;
        for attempt in 1..=MAX_MINE_ATTEMPTS {
            match self.mine_once(transactions.clone()).await {
                Ok(mined) => return Ok(mined),
                Err(e @ (ChainError::StaleTip(_) | ChainError::MiningCancelled)) => {
                    warn!(attempt, error = %e, "Mining attempt lost the race, retrying");
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error)
    }

    /// One tick of the periodic miner: mines a fee-ordered batch from the
    /// mempool once it holds at least `min_batch_size` transactions.
    pub async fn mine_pending(&self) -> Result<Option<MinedBlock>, ChainError> {
        self.evict_known().await;
        let batch = {
            let mempool = self.mempool.read().await;
            if mempool.is_empty() || mempool.len() < self.config.miner.min_batch_size {
                return Ok(None);
            }
            mempool.select_batch(self.config.miner.max_batch_size)
        };

        let mut transactions = Vec::with_capacity(batch.len() + 1);
        if let Some((address, amount)) = self.config.block_reward() {
            transactions.push(Transaction::system_reward(address, amount));
        }
        transactions.extend(batch);

        match self.mine_once(transactions).await {
            Ok(mined) => {
                let remaining = self.mempool.read().await.transactions().to_vec();
                self.client.push_mempool(&self.peers, &remaining);
                Ok(Some(mined))
            }
            Err(e @ (ChainError::StaleTip(_) | ChainError::MiningCancelled)) => {
                info!(error = %e, "Periodic mining attempt abandoned, retrying next tick");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    // ------------------------------------------------------------------
    // Blocks & consensus
    // ------------------------------------------------------------------

    /// Admits a block announced by a peer. On rejection a background
    /// resolution is started when configured.
    pub async fn receive_block(self: &Arc<Self>, block: Block) -> Result<ConfirmationStatus, ChainError> {
        let result = self.ledger.write().await.add_block(block.clone());
        match result {
            Ok(status) => {
                self.cancel_mining();
                self.mempool.write().await.prune_confirmed(&block);
                self.readmit_dropped(&status).await;
                Ok(status)
            }
            Err(e) => {
                warn!(index = block.index, hash = %block.hash, error = %e, "Rejected peer block");
                if self.config.chain.resolve_on_invalid_block && !self.peers.is_empty() {
                    let node = self.clone();
                    tokio::spawn(async move {
                        node.resolve().await;
                    });
                }
                Err(e)
            }
        }
    }

    /// Runs fork choice against every peer and adopts the longest valid chain.
    pub async fn resolve(&self) -> Resolution {
        let resolution = self.resolver.resolve(&self.ledger, &self.peers).await;
        if resolution.replaced() {
            self.on_chain_replaced().await;
        }
        resolution
    }

    /// Stops work built on the old tip and drops pooled transactions the
    /// adopted chain already carries.
    async fn on_chain_replaced(&self) {
        self.cancel_mining();
        let chain = self.ledger.read().await.chain().to_vec();
        let mut mempool = self.mempool.write().await;
        let pruned: usize = chain.iter().map(|block| mempool.prune_confirmed(block)).sum();
        debug!(pruned, "Pruned mempool against adopted chain");
    }

    // ------------------------------------------------------------------
    // Wallets
    // ------------------------------------------------------------------

    pub async fn balances(&self) -> HashMap<Address, Amount> {
        self.ledger.read().await.balances().address_balances.clone()
    }

    pub async fn balance_of(&self, address: &str) -> Amount {
        self.ledger.read().await.balance_of(address)
    }

    /// Records balances a peer advertised. Informational only.
    pub async fn update_peer_wallets(&self, wallets: HashMap<Address, Amount>) -> usize {
        let count = wallets.len();
        self.peer_wallets.write().await.extend(wallets);
        count
    }

    pub async fn peer_wallets(&self) -> HashMap<Address, Amount> {
        self.peer_wallets.read().await.clone()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Starts the periodic miner (when enabled) and the wallet broadcaster.
    pub fn spawn_background_tasks(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();

        if self.config.miner.enabled {
            let node = self.clone();
            let period = Duration::from_secs(self.config.miner.interval_secs.max(1));
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if let Err(e) = node.mine_pending().await {
                        error!(error = %e, "Periodic mining failed");
                    }
                }
            }));
        }

        if !self.peers.is_empty() {
            let node = self.clone();
            let period = Duration::from_secs(self.config.broadcast.wallet_interval_secs.max(1));
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    ticker.tick().await;
                    let wallets = node.balances().await;
                    node.client.push_wallets(&node.peers, &wallets);
                }
            }));
        }

        tasks
    }

    #[cfg(feature = "api")]
    pub async fn run(self: Arc<Self>) -> Result<(), ChainError> {
        info!(
            port = self.config.network.api_port,
            difficulty = self.config.chain.difficulty,
            peers = self.peers.len(),
            mode = ?self.config.miner.mode,
            "Starting HashLedger node"
        );
        let _tasks = self.spawn_background_tasks();
        let port = self.config.network.api_port;
        crate::api::run_api_server(self, port).await
    }

    #[cfg(not(feature = "api"))]
    pub async fn run(self: Arc<Self>) -> Result<(), ChainError> {
        Err(ChainError::ConfigError("API feature not enabled in this build".to_string()))
    }
}

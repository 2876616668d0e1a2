//! Top-level assembly of the chain engine.
//!
//! [`ChainEngine`] owns the locks and wires the components together with
//! explicit construction; nothing in this crate lives in a global.
//!
//! Lock order is fixed and must never be reversed: the chain lock first,
//! the mempool lock second, the nonce tracker's internal lock last. The
//! chain lock serializes block append, the whole reorganization path, and
//! any read that needs a consistent view across several state managers.
//! WAL writes and state persistence are synchronous I/O performed inline
//! while the chain lock is held; durability ordering must not be reordered
//! by an asynchronous flush, so a long reorg deliberately blocks block
//! acceptance and mempool admission for its duration.

mod config;

pub use config::EngineConfig;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::chain::fork::{Fork, ForkDetectionResult, ForkDetector};
use crate::chain::reorg::ReorgCoordinator;
use crate::chain::wal::WriteAheadLog;
use crate::chain::work::WorkCalculator;
use crate::error::{ChainError, Result, StorageError};
use crate::mempool::Mempool;
use crate::mining::MiningCoordinator;
use crate::query::{AddressTxIndexEntry, TransactionQueryManager};
use crate::state::{NonceTracker, StateManagerSet};
use crate::storage::BlockStore;
use crate::types::{
    compute_merkle_root, Address, Block, BlockHash, BlockHeader, ChainState,
    MerkleRoot, ReorgOutcome, Transaction, TxId, TxPayload, TxOutput,
};
use crate::validation::{validate_block, validate_genesis};

/// Result of feeding one block to the engine.
#[derive(Debug)]
pub enum BlockIntake {
    /// The block extended the canonical tip.
    Connected,
    /// The block belongs to a competing branch; a reorganization was
    /// attempted.
    Reorganized(ReorgOutcome),
    /// The block was filed under a competing branch that does not (yet)
    /// beat the canonical chain.
    StoredFork,
    /// The block is already known.
    Duplicate,
    /// The block connects to nothing we know.
    Orphaned,
    /// The block violates consensus rules.
    Rejected(String),
}

/// Everything guarded by the chain lock.
struct ChainInner<S> {
    store: S,
    state: ChainState,
    managers: StateManagerSet,
    coordinator: ReorgCoordinator,
    forks: ForkDetector,
    work: WorkCalculator,
    query: TransactionQueryManager,
    /// Bodies of competing-branch blocks, by hash, until they win or their
    /// branch is dropped.
    fork_blocks: HashMap<BlockHash, Block>,
}

/// The chain engine: canonical-chain maintenance for one node.
pub struct ChainEngine<S> {
    config: EngineConfig,
    chain: Arc<Mutex<ChainInner<S>>>,
    mempool: Arc<Mutex<Mempool>>,
    mining: Arc<MiningCoordinator>,
}

impl<S: BlockStore> ChainEngine<S> {
    /// Open the engine: run WAL startup recovery, then rebuild the
    /// in-memory state managers and indexes by replaying the persisted
    /// canonical chain from genesis.
    ///
    /// If the store holds a torn chain (a crash mid-reorg can leave a
    /// seam where a stale block no longer links), the replay truncates at
    /// the seam so the surviving prefix is always a well-formed chain.
    pub async fn open(
        config: EngineConfig,
        mut store: S,
        nonces: NonceTracker,
        genesis: Block,
    ) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;
        validate_genesis(&genesis)?;

        let coordinator = ReorgCoordinator::new(
            WriteAheadLog::new(config.wal_path()),
            config.max_reorg_depth,
        );
        let disposition = coordinator.startup_wal_disposition()?;
        tracing::info!("Startup WAL disposition: {:?}", disposition);

        match store.tip_height().await {
            None => {
                store.save_block(&genesis).await?;
            }
            Some(_) => {
                let stored = store.block_by_height(0).await?.ok_or_else(|| {
                    StorageError::Corruption("stored chain has no genesis".to_string())
                })?;
                if stored.block_hash() != genesis.block_hash() {
                    return Err(ChainError::Config(
                        "stored genesis does not match configured genesis".to_string(),
                    ));
                }
            }
        }

        let mut managers = StateManagerSet::new(nonces);
        let mut state = ChainState::new();
        let mut query = TransactionQueryManager::new();
        Self::replay(&mut store, &mut managers, &mut state, &mut query).await?;

        let forks =
            ForkDetector::new(config.max_tracked_forks).map_err(|e| {
                ChainError::Config(e.to_string())
            })?;
        let work = WorkCalculator::new(config.work_cache_size);
        let mempool = Mempool::new(config.max_mempool_transactions);
        let mining = Arc::new(MiningCoordinator::new(config.mining_cooldown));

        tracing::info!(
            "Chain engine open at height {:?}",
            state.tip_height()
        );

        Ok(Self {
            config,
            chain: Arc::new(Mutex::new(ChainInner {
                store,
                state,
                managers,
                coordinator,
                forks,
                work,
                query,
                fork_blocks: HashMap::new(),
            })),
            mempool: Arc::new(Mutex::new(mempool)),
            mining,
        })
    }

    /// Replay the persisted chain into fresh managers, truncating any
    /// suffix that fails linkage or application.
    async fn replay(
        store: &mut S,
        managers: &mut StateManagerSet,
        state: &mut ChainState,
        query: &mut TransactionQueryManager,
    ) -> Result<()> {
        loop {
            managers.reset_all()?;
            *state = ChainState::new();
            query.clear();

            let tip = store.tip_height().await.ok_or_else(|| {
                StorageError::Corruption("block store is empty".to_string())
            })?;

            let mut failed_at: Option<u64> = None;
            for height in 0..=tip {
                let Some(block) = store.block_by_height(height).await? else {
                    failed_at = Some(height);
                    break;
                };

                let linked = match state.tip_header() {
                    None => validate_genesis(&block).is_ok(),
                    Some(prev) => validate_block(&block, prev).is_ok(),
                };
                if !linked {
                    failed_at = Some(height);
                    break;
                }

                match managers.apply_block(&block) {
                    Ok(()) => {}
                    Err(ChainError::Validation(_)) => {
                        failed_at = Some(height);
                        break;
                    }
                    Err(other) => return Err(other),
                }
                state.add_header(block.header);
                query.connect_block(&block);
            }

            match failed_at {
                None => return Ok(()),
                Some(0) => {
                    return Err(StorageError::Corruption(
                        "persisted genesis block is unusable".to_string(),
                    )
                    .into())
                }
                Some(height) => {
                    tracing::warn!(
                        "Persisted chain is torn at height {}; truncating",
                        height
                    );
                    store.prune_above(height - 1).await?;
                }
            }
        }
    }

    /// Feed a peer-originated block: restarts the mining cooldown and
    /// aborts in-flight attempts before processing.
    pub async fn handle_peer_block(&self, block: Block) -> Result<BlockIntake> {
        self.mining.record_peer_block_received();
        self.process_block(block).await
    }

    /// Feed a locally mined block.
    pub async fn submit_mined_block(&self, block: Block) -> Result<BlockIntake> {
        self.process_block(block).await
    }

    async fn process_block(&self, block: Block) -> Result<BlockIntake> {
        let mut chain = self.chain.lock().await;
        let inner = &mut *chain;
        let hash = block.block_hash();

        if inner.state.contains(&hash) || inner.fork_blocks.contains_key(&hash) {
            return Ok(BlockIntake::Duplicate);
        }

        match inner.forks.check_header(&block.header, &inner.state, &mut inner.work)? {
            ForkDetectionResult::ExtendsMainChain => {
                let Some(tip) = inner.state.tip_header().copied() else {
                    return Err(StorageError::InconsistentState(
                        "chain has no tip".to_string(),
                    )
                    .into());
                };
                if let Err(e) = validate_block(&block, &tip) {
                    return Ok(BlockIntake::Rejected(e.to_string()));
                }

                // Snapshot-protected apply: a validation failure inside any
                // manager leaves nothing half-applied.
                let snapshots = inner.managers.snapshot_all()?;
                if let Err(e) = inner.managers.apply_block(&block) {
                    inner.managers.restore_all(snapshots)?;
                    return match e {
                        ChainError::Validation(_) => {
                            Ok(BlockIntake::Rejected(e.to_string()))
                        }
                        other => Err(other),
                    };
                }

                inner.store.save_block(&block).await?;
                inner.state.add_header(block.header);
                inner.query.connect_block(&block);

                let mut pool = self.mempool.lock().await;
                pool.remove_confirmed(&block);

                tracing::info!(
                    "Connected block {} at height {}",
                    hash,
                    block.header.height
                );
                Ok(BlockIntake::Connected)
            }
            ForkDetectionResult::CreatesNewFork(fork)
            | ForkDetectionResult::ExtendsFork(fork) => {
                inner.fork_blocks.insert(hash, block);
                self.maybe_reorganize(inner, fork).await
            }
            ForkDetectionResult::Orphan => {
                tracing::debug!("Orphan block {}", hash);
                Ok(BlockIntake::Orphaned)
            }
        }
    }

    /// Run fork choice against a tracked branch and reorganize when it
    /// strictly exceeds the canonical chain's work.
    async fn maybe_reorganize(
        &self,
        inner: &mut ChainInner<S>,
        fork: Fork,
    ) -> Result<BlockIntake> {
        let mut new_blocks = Vec::with_capacity(fork.headers.len());
        for header in &fork.headers {
            match inner.fork_blocks.get(&header.block_hash()) {
                Some(block) => new_blocks.push(block.clone()),
                // Branch is missing bodies; wait for more.
                None => return Ok(BlockIntake::StoredFork),
            }
        }

        let old_work =
            inner.work.chain_work(inner.state.headers_above(fork.fork_height))?;
        if fork.chain_work <= old_work {
            return Ok(BlockIntake::StoredFork);
        }

        let outcome = inner
            .coordinator
            .execute(
                &mut inner.store,
                &mut inner.state,
                &mut inner.managers,
                &mut inner.work,
                &fork,
                &new_blocks,
            )
            .await?;

        if let ReorgOutcome::Completed {
            event,
        } = &outcome
        {
            for header in &event.disconnected {
                inner.query.disconnect_height(header.height);
            }
            for block in &new_blocks {
                inner.query.connect_block(block);
                inner.fork_blocks.remove(&block.block_hash());
            }
            inner.forks.remove_fork(&fork.tip_hash);
            inner.forks.prune_below(event.common_height);

            let mut pool = self.mempool.lock().await;
            for block in &new_blocks {
                pool.remove_confirmed(block);
            }
            pool.readmit(
                event.affected_transactions.clone(),
                &inner.managers.nonces,
            );
        }

        // Drop bodies that no longer belong to any tracked branch.
        let live: HashSet<BlockHash> = inner
            .forks
            .get_forks()
            .iter()
            .flat_map(|f| f.headers.iter().map(|h| h.block_hash()))
            .collect();
        inner.fork_blocks.retain(|hash, _| live.contains(hash));

        Ok(BlockIntake::Reorganized(outcome))
    }

    /// Admit a transaction to the mempool. Nonce and ordering violations
    /// are rejected here, synchronously, and never reach the reorg path.
    pub async fn submit_transaction(&self, tx: Transaction) -> Result<TxId> {
        let chain = self.chain.lock().await;
        let mut pool = self.mempool.lock().await;
        pool.submit(tx, &chain.managers.nonces).map_err(ChainError::from)
    }

    /// Next valid nonce for an address.
    pub async fn next_nonce(&self, address: &Address) -> u64 {
        let chain = self.chain.lock().await;
        chain.managers.nonces.next_nonce(address)
    }

    /// Spendable balance of an address.
    pub async fn balance(&self, address: &Address) -> u64 {
        let chain = self.chain.lock().await;
        chain.managers.utxo.balance(address)
    }

    /// Current tip height and hash.
    pub async fn tip(&self) -> Option<(u64, BlockHash)> {
        let chain = self.chain.lock().await;
        let height = chain.state.tip_height()?;
        let hash = chain.state.tip_hash()?;
        Some((height, hash))
    }

    /// Paginated, integrity-checked transaction history for an address.
    pub async fn history_window(
        &self,
        address: &Address,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<AddressTxIndexEntry>, usize)> {
        let chain = self.chain.lock().await;
        chain.query.history_window(address, limit, offset, &chain.store).await
    }

    /// Assemble a candidate block paying `reward_to`, with mempool
    /// transactions in canonical order after the reward entry.
    pub async fn build_block_template(
        &self,
        reward_to: &Address,
        reward_amount: u64,
        max_transactions: usize,
    ) -> Result<Block> {
        let chain = self.chain.lock().await;
        let pool = self.mempool.lock().await;

        let Some(tip) = chain.state.tip_header().copied() else {
            return Err(StorageError::InconsistentState(
                "cannot build a template on an empty chain".to_string(),
            )
            .into());
        };
        let height = tip.height + 1;

        let mut transactions = vec![Transaction {
            sender: Address::system(),
            nonce: None,
            fee: 0,
            inputs: vec![],
            outputs: vec![TxOutput {
                value: reward_amount,
                owner: reward_to.clone(),
            }],
            payload: TxPayload::Coinbase {
                height,
            },
        }];
        transactions.extend(pool.select_canonical(max_transactions));

        let mut header = BlockHeader {
            height,
            previous_hash: tip.block_hash(),
            merkle_root: MerkleRoot::all_zeros(),
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            difficulty: tip.difficulty,
            nonce: 0,
            version: 1,
        };
        header.merkle_root = compute_merkle_root(&transactions);

        Ok(Block {
            header,
            transactions,
        })
    }

    /// Verify the stored chain is well linked from genesis to tip.
    pub async fn verify_store_integrity(&self) -> Result<bool> {
        let chain = self.chain.lock().await;
        Ok(chain.store.verify_integrity().await?)
    }

    /// The mining coordinator.
    pub fn mining(&self) -> &MiningCoordinator {
        &self.mining
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

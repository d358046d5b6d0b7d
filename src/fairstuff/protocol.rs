/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The core state machine: block delivery, proposal voting, quorum certificate formation, locking,
//! and the three-chain commit rule.
//!
//! ## State
//!
//! A [FairStuff] instance holds four protocol state variables, each monotonically non-decreasing in
//! height across every event:
//! - `hqc`: the highest block known to have a quorum certificate, paired with that certificate.
//! - `b_lock`: the locked block. The replica only votes for proposals that extend `b_lock`, or that
//!   carry QC evidence from a strictly higher branch.
//! - `b_exec`: the last executed (committed) block.
//! - `vheight`: the height of the block last voted for. Vote monotonicity prevents equivocation.
//!
//! ## Commit rule
//!
//! A block `b` commits when the chain carries `b ← b' ← b''` over direct primary-parent edges and a
//! quorum certificate over `b''` is seen (the "three-chain"). The update procedure walks `qc_ref`
//! edges from each newly arrived block to detect this, then commits `b` and all of its
//! uncommitted ancestors, oldest first. Committing a block runs
//! [fair finalization](FairStuff::fair_finalize) over its merged orders to fix the per-block command
//! sequence; an unresolvable merged order halts the commit pass before the block, to be retried by a
//! later pass.
//!
//! ## Preconditions
//!
//! The entry points trust their callers with two invariants, and fail fatally when they are broken:
//! blocks named by received proposals and votes must already be delivered, and a block can only be
//! delivered after its parents and the target of its justify have been fetched into the store.

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Display, Formatter};
use std::sync::mpsc::Sender;
use std::time::SystemTime;

use ed25519_dalek::{SigningKey, VerifyingKey};
use log::{debug, info, warn};
use tokio::sync::oneshot;

use crate::app::{App, Network};
use crate::config::{ReplicaConfig, ReplicaInfo};
use crate::events::*;
use crate::fairstuff::ProtocolError;
use crate::logging::short_hash;
use crate::messages::{Finality, Proposal, Vote, DECISION_COMMIT};
use crate::state::block_store::{BlockPtr, BlockStore, StoredBlock};
use crate::state::order_cache::OrderCache;
use crate::types::basic::{BlockHeight, CryptoHash, PeerAddress, ReplicaID};
use crate::types::block::{Block, MergedOrders};
use crate::types::certificates::{PartialCertificate, QuorumCertificate};

/// The consensus state machine of a single replica.
///
/// Constructed with [new](FairStuff::new), populated with [add_replica](FairStuff::add_replica), and
/// started with [on_init](FairStuff::on_init). From then on, the pacemaker and the networking
/// provider drive it exclusively through the `on_*` entry points, all of which execute synchronously
/// on the caller's thread.
pub struct FairStuff<A: App, N: Network> {
    pub(crate) id: ReplicaID,
    signing_key: SigningKey,
    pub(crate) config: ReplicaConfig,
    pub(crate) app: A,
    pub(crate) network: N,

    pub(crate) store: BlockStore,
    pub(crate) orders: OrderCache,

    b0: BlockPtr,
    hqc: (BlockPtr, QuorumCertificate),
    b_lock: BlockPtr,
    b_exec: BlockPtr,
    vheight: BlockHeight,
    tails: HashSet<BlockPtr>,

    vote_disabled: bool,
    initialized: bool,

    qc_waiting: HashMap<CryptoHash, Vec<oneshot::Sender<()>>>,
    propose_waiting: Option<oneshot::Sender<Proposal>>,
    receive_proposal_waiting: Option<oneshot::Sender<Proposal>>,
    hqc_update_waiting: Option<oneshot::Sender<CryptoHash>>,

    pub(crate) event_publisher: Option<Sender<Event>>,
}

impl<A: App, N: Network> FairStuff<A, N> {
    /// Create a core for the replica identified by `id`, holding `signing_key`. The genesis block is
    /// created and stored; the replica set is empty until [add_replica](FairStuff::add_replica).
    pub fn new(
        id: ReplicaID,
        signing_key: SigningKey,
        app: A,
        network: N,
        event_publisher: Option<Sender<Event>>,
    ) -> FairStuff<A, N> {
        let mut store = BlockStore::new();
        let b0 = store.insert_stored(StoredBlock::genesis());
        let mut tails = HashSet::new();
        tails.insert(b0.clone());

        // Placeholder until on_init installs the computed genesis QC.
        let genesis_qc = QuorumCertificate::incomplete(b0.hash(), 0);

        Self {
            id,
            signing_key,
            config: ReplicaConfig::new(),
            app,
            network,
            store,
            orders: OrderCache::new(),
            hqc: (b0.clone(), genesis_qc),
            b_lock: b0.clone(),
            b_exec: b0.clone(),
            b0,
            vheight: BlockHeight::new(0),
            tails,
            vote_disabled: false,
            initialized: false,
            qc_waiting: HashMap::new(),
            propose_waiting: None,
            receive_proposal_waiting: None,
            hqc_update_waiting: None,
            event_publisher,
        }
    }

    /// Add a replica to the configuration. Only permitted before [on_init](FairStuff::on_init).
    pub fn add_replica(
        &mut self,
        id: ReplicaID,
        verifying_key: VerifyingKey,
        peer: PeerAddress,
    ) -> Result<(), ProtocolError> {
        if self.initialized {
            return Err(ProtocolError::ConfigurationFrozen);
        }
        self.config.insert(ReplicaInfo::new(id, verifying_key, peer));
        self.b0.insert_voter(id);
        Ok(())
    }

    /// Initialize the protocol. Freezes the replica set, fixes `nmajority = n - faulty` and the
    /// fairness parameter, and installs the self-signed genesis QC. Must be called once, before all
    /// other entry points.
    pub fn on_init(&mut self, faulty: usize, fairness_parameter: f64) {
        self.config.initialize(faulty, fairness_parameter);
        self.initialized = true;

        let mut genesis_qc = QuorumCertificate::incomplete(self.b0.hash(), self.config.len());
        genesis_qc.compute();
        self.b0.set_justify(Some(genesis_qc.clone()));
        self.b0.set_self_qc(genesis_qc.clone());
        self.b0.set_qc_ref(Some(self.b0.clone()));
        self.hqc = (self.b0.clone(), genesis_qc);

        info!(
            "on_init: replica {}, nmajority = {}, fairness parameter = {}",
            self.id,
            self.config.nmajority(),
            self.config.fairness_parameter()
        );
    }

    /* ↓↓↓ Accessors ↓↓↓ */

    pub fn id(&self) -> ReplicaID {
        self.id
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    pub fn genesis(&self) -> &BlockPtr {
        &self.b0
    }

    /// The highest block for which this replica has seen a quorum certificate.
    pub fn highest_qc_block(&self) -> &BlockPtr {
        &self.hqc.0
    }

    pub fn locked_block(&self) -> &BlockPtr {
        &self.b_lock
    }

    pub fn executed_block(&self) -> &BlockPtr {
        &self.b_exec
    }

    pub fn voted_height(&self) -> BlockHeight {
        self.vheight
    }

    /// The delivered blocks no delivered block builds on yet. Proposal parents are picked from here.
    pub fn tails(&self) -> &HashSet<BlockPtr> {
        &self.tails
    }

    pub fn app(&self) -> &A {
        &self.app
    }

    pub fn app_mut(&mut self) -> &mut A {
        &mut self.app
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut N {
        &mut self.network
    }

    /// When set, the replica computes its voting opinion but never emits votes. Useful for some
    /// pacemakers.
    pub fn set_vote_disabled(&mut self, vote_disabled: bool) {
        self.vote_disabled = vote_disabled;
    }

    /* ↓↓↓ Block store access ↓↓↓ */

    /// Insert a block into the store, deduplicating by hash, and record its orders payload's
    /// commands as proposed.
    pub fn add_block(&mut self, block: Block) -> BlockPtr {
        let block = self.store.insert(block);
        let orders = block.orders();
        for (_, commands) in orders.iter() {
            self.orders.mark_proposed(commands.iter());
        }
        Event::InsertBlock(InsertBlockEvent {
            timestamp: SystemTime::now(),
            block: block.hash(),
        })
        .publish(&self.event_publisher);
        block
    }

    pub fn find_block(&self, hash: &CryptoHash) -> Option<BlockPtr> {
        self.store.get(hash)
    }

    /// Drop a block from the store if no handles to it remain outside the store.
    pub fn try_release_block(&mut self, block: &BlockPtr) -> bool {
        self.store.try_release(block)
    }

    fn sanity_check_delivered(&self, block: &BlockPtr) -> Result<(), ProtocolError> {
        if !block.is_delivered() {
            return Err(ProtocolError::BlockNotDelivered {
                block: block.hash(),
            });
        }
        Ok(())
    }

    /* ↓↓↓ Entry points ↓↓↓ */

    /// Inform the state machine that a block is ready to be handled. A block may only be delivered
    /// once itself is fetched, the block referenced by its justify is fetched, and all of its
    /// parents are delivered; the caller must ensure this ordering.
    ///
    /// Returns false (with a warning) on an attempt to deliver a block twice.
    pub fn on_deliver_block(&mut self, block: &BlockPtr) -> Result<bool, ProtocolError> {
        if block.is_delivered() {
            warn!("attempt to deliver a block twice: {}", short_hash(&block.hash()));
            return Ok(false);
        }

        let mut parents = Vec::new();
        for parent_hash in block.parent_hashes() {
            parents.push(self.store.get_delivered(&parent_hash)?);
        }
        if parents.is_empty() {
            return Err(ProtocolError::EmptyParents);
        }
        block.set_height(parents[0].height() + 1);

        if let Some(justify) = block.justify() {
            let qc_target =
                self.store
                    .get(&justify.obj_hash)
                    .ok_or(ProtocolError::QcTargetNotFetched {
                        block: justify.obj_hash,
                    })?;
            block.set_qc_ref(Some(qc_target));
        }

        for parent in &parents {
            self.tails.remove(parent);
        }
        self.tails.insert(block.clone());

        block.set_parents(parents);
        block.set_delivered();
        debug!(
            "delivered {} at height {}",
            short_hash(&block.hash()),
            block.height()
        );
        Event::DeliverBlock(DeliverBlockEvent {
            timestamp: SystemTime::now(),
            block: block.hash(),
            height: block.height(),
        })
        .publish(&self.event_publisher);
        Ok(true)
    }

    /// Submit the merged local orders to be proposed in a new block. `parents` must contain at least
    /// one block; `parents[0]` becomes the primary parent, further entries are uncles.
    ///
    /// The new block extends the highest QC this replica knows. It is self-delivered, self-received
    /// (which emits this replica's own vote), and broadcast to the other replicas.
    pub fn on_propose(
        &mut self,
        orders: MergedOrders,
        parents: &[BlockPtr],
        extra: Vec<u8>,
    ) -> Result<BlockPtr, ProtocolError> {
        if parents.is_empty() {
            return Err(ProtocolError::EmptyParents);
        }
        for parent in parents {
            self.tails.remove(parent);
        }

        let parent_hashes = parents.iter().map(|parent| parent.hash()).collect();
        let block = Block::new(parent_hashes, Some(self.hqc.1.clone()), orders, extra);
        let bnew = self.add_block(block);
        bnew.set_self_qc(QuorumCertificate::incomplete(bnew.hash(), self.config.len()));

        self.on_deliver_block(&bnew)?;
        self.update(&bnew)?;

        if bnew.height() <= self.vheight {
            return Err(ProtocolError::ProposalNotHigherThanVotedHeight {
                height: bnew.height(),
                vheight: self.vheight,
            });
        }

        let proposal = Proposal::new(self.id, bnew.to_block());
        info!("propose {}", proposal);
        self.resolve_propose_waiting(&proposal);

        // Self-receive the proposal; no need to send it through the network.
        self.on_receive_proposal(&proposal)?;

        Event::Propose(ProposeEvent {
            timestamp: SystemTime::now(),
            proposal: proposal.clone(),
        })
        .publish(&self.event_publisher);
        self.network.broadcast_proposal(proposal);
        Ok(bnew)
    }

    /// Process a proposal message. The block mentioned in the message must already be delivered.
    ///
    /// The replica votes for the block iff it is higher than `vheight` and either its justify's
    /// target sits above the locked block (liveness condition) or the block extends the locked
    /// branch (safety condition).
    pub fn on_receive_proposal(&mut self, proposal: &Proposal) -> Result<(), ProtocolError> {
        debug!("got {}", proposal);
        let self_proposed = proposal.proposer == self.id;
        let bnew = self
            .store
            .get(&proposal.block.hash)
            .ok_or(ProtocolError::BlockNotDelivered {
                block: proposal.block.hash,
            })?;

        if !self_proposed {
            self.sanity_check_delivered(&bnew)?;
            self.update(&bnew)?;
        }

        let mut opinion = false;
        if bnew.height() > self.vheight {
            let liveness = match bnew.qc_ref() {
                Some(qc_ref) => qc_ref.height() > self.b_lock.height(),
                None => false,
            };
            if liveness {
                opinion = true;
                self.vheight = bnew.height();
            } else {
                // Safety condition: extend the locked branch.
                let mut b = bnew.clone();
                while b.height() > self.b_lock.height() {
                    match b.primary_parent() {
                        Some(parent) => b = parent,
                        None => break,
                    }
                }
                if b == self.b_lock {
                    opinion = true;
                    self.vheight = bnew.height();
                }
            }
        }
        debug!("now state: {}", self);

        // The justify inside a received proposal is evidence that its target reached a QC.
        if !self_proposed {
            if let Some(qc_ref) = bnew.qc_ref() {
                self.on_qc_finish(&qc_ref);
            }
        }

        Event::ReceiveProposal(ReceiveProposalEvent {
            timestamp: SystemTime::now(),
            origin: proposal.proposer,
            block: bnew.hash(),
            height: bnew.height(),
        })
        .publish(&self.event_publisher);
        self.resolve_receive_proposal_waiting(proposal);

        if opinion && !self.vote_disabled {
            let cert = PartialCertificate::new(&self.signing_key, self.id, bnew.hash());
            let vote = Vote::new(self.id, bnew.hash(), cert);
            Event::Vote(VoteEvent {
                timestamp: SystemTime::now(),
                recipient: proposal.proposer,
                vote: vote.clone(),
            })
            .publish(&self.event_publisher);
            self.network.send_vote(proposal.proposer, vote);
        }
        Ok(())
    }

    /// Process a vote message. The block mentioned in the message must already be delivered, and the
    /// vote must have been verified by the caller ([Vote::is_correct]); the core trusts it.
    ///
    /// The `nmajority`-th distinct vote seals the block's self-QC, advances `hqc`, and resolves
    /// [async_qc_finish](FairStuff::async_qc_finish) waiters. Duplicate votes and votes beyond the
    /// quorum count are absorbed.
    pub fn on_receive_vote(&mut self, vote: &Vote) -> Result<(), ProtocolError> {
        debug!("got {}", vote);
        let block = self.store.get_delivered(&vote.blk_hash)?;

        let qsize = block.voted_count();
        if qsize >= self.config.nmajority() {
            // The QC was already formed; extra votes change nothing.
            return Ok(());
        }
        if !block.insert_voter(vote.voter) {
            warn!(
                "duplicate vote for {} from {}",
                short_hash(&vote.blk_hash),
                vote.voter
            );
            return Ok(());
        }

        if !block.has_self_qc() {
            warn!("vote for block not proposed by this replica");
            block.set_self_qc(QuorumCertificate::incomplete(
                block.hash(),
                self.config.len(),
            ));
        }
        block.add_self_qc_part(&vote.cert);

        Event::ReceiveVote(ReceiveVoteEvent {
            timestamp: SystemTime::now(),
            origin: vote.voter,
            block: block.hash(),
        })
        .publish(&self.event_publisher);

        if qsize + 1 == self.config.nmajority() {
            block.compute_self_qc();
            Event::CollectQC(CollectQCEvent {
                timestamp: SystemTime::now(),
                block: block.hash(),
            })
            .publish(&self.event_publisher);
            if let Some(self_qc) = block.self_qc() {
                self.update_hqc(&block, &self_qc);
            }
            self.on_qc_finish(&block);
        }
        Ok(())
    }

    /* ↓↓↓ State update ↓↓↓ */

    fn update_hqc(&mut self, block: &BlockPtr, qc: &QuorumCertificate) {
        if block.height() > self.hqc.0.height() {
            self.hqc = (block.clone(), qc.clone());
            Event::UpdateHighestQC(UpdateHighestQCEvent {
                timestamp: SystemTime::now(),
                block: block.hash(),
                height: block.height(),
            })
            .publish(&self.event_publisher);
            self.on_hqc_update();
        }
    }

    /// The three-chain commit rule, run against each newly arrived block.
    fn update(&mut self, nblk: &BlockPtr) -> Result<(), ProtocolError> {
        // The commands of the new proposal are no longer "seen but unproposed".
        if let Some((_, commands)) = nblk.orders().first() {
            for command in commands {
                self.orders.remove_seen_propose(command);
            }
        }

        /* nblk = b*, blk2 = b'', blk1 = b', blk = b */
        let blk2 = match nblk.qc_ref() {
            Some(blk2) => blk2,
            None => return Ok(()),
        };
        // A decided block could be incomplete due to pruning.
        if blk2.is_committed() {
            return Ok(());
        }
        if let Some(justify) = nblk.justify() {
            self.update_hqc(&blk2, &justify);
        }

        let blk1 = match blk2.qc_ref() {
            Some(blk1) => blk1,
            None => return Ok(()),
        };
        if blk1.is_committed() {
            return Ok(());
        }
        if blk1.height() > self.b_lock.height() {
            self.b_lock = blk1.clone();
        }

        let blk = match blk1.qc_ref() {
            Some(blk) => blk,
            None => return Ok(()),
        };
        if blk.is_committed() {
            return Ok(());
        }

        // Commit requires direct primary-parent linkage: blk2 -> blk1 -> blk.
        if blk2.primary_parent().as_ref() != Some(&blk1)
            || blk1.primary_parent().as_ref() != Some(&blk)
        {
            return Ok(());
        }

        /* b0 - - - - -> blk -> blk1 -> blk2 */
        let mut commit_queue = Vec::new();
        let mut b = blk.clone();
        while b.height() > self.b_exec.height() {
            commit_queue.push(b.clone());
            b = match b.primary_parent() {
                Some(parent) => parent,
                None => {
                    return Err(ProtocolError::SafetyBreached {
                        block: blk.hash(),
                        b_exec: self.b_exec.hash(),
                    })
                }
            };
        }
        if b != self.b_exec {
            return Err(ProtocolError::SafetyBreached {
                block: blk.hash(),
                b_exec: self.b_exec.hash(),
            });
        }

        for b in commit_queue.iter().rev() {
            let order = self.fair_finalize(b);
            if order.is_empty() && !b.orders().is_empty() {
                // The merged orderings of this block cannot be resolved to a unique sequence yet;
                // a later commit pass redoes this walk once more orderings are known.
                debug!(
                    "halting commit pass at {}: merged order not resolvable",
                    short_hash(&b.hash())
                );
                break;
            }

            b.set_committed();
            self.app.commit_block(b);
            info!("commit {}", short_hash(&b.hash()));
            Event::CommitBlock(CommitBlockEvent {
                timestamp: SystemTime::now(),
                block: b.hash(),
                height: b.height(),
            })
            .publish(&self.event_publisher);

            for (idx, command) in order.iter().enumerate() {
                let finality = Finality::new(
                    self.id,
                    DECISION_COMMIT,
                    idx as u32,
                    b.height(),
                    *command,
                    b.hash(),
                );
                self.app.decide(finality.clone());
                Event::Decide(DecideEvent {
                    timestamp: SystemTime::now(),
                    finality,
                })
                .publish(&self.event_publisher);
                self.orders.remove_seen_execute(command);
                self.orders.remove_proposed(command);
            }
            self.b_exec = b.clone();
        }
        Ok(())
    }

    /* ↓↓↓ Pruning ↓↓↓ */

    /// Try to release blocks lower than the last committed height minus `staleness`. Walks `b_exec`
    /// backward `staleness` steps along primary parents, then dismantles the ancestor graph of that
    /// anchor: `qc_ref` links are dropped and blocks with no remaining parents are released. Blocks
    /// still referenced elsewhere (including the anchor itself, held by its children) survive.
    pub fn prune(&mut self, staleness: u32) {
        let mut start = self.b_exec.clone();
        for _ in 0..staleness {
            match start.primary_parent() {
                Some(parent) => start = parent,
                None => return,
            }
        }

        let mut stack = vec![start];
        while let Some(top) = stack.last().cloned() {
            match top.pop_last_parent() {
                Some(parent) => {
                    top.clear_qc_ref();
                    stack.push(parent);
                }
                None => {
                    let hash = top.hash();
                    stack.pop();
                    if self.store.try_release(&top) {
                        debug!("pruned {}", short_hash(&hash));
                        Event::PruneBlock(PruneBlockEvent {
                            timestamp: SystemTime::now(),
                            block: hash,
                        })
                        .publish(&self.event_publisher);
                    }
                }
            }
        }
    }

    /* ↓↓↓ Async wait-points ↓↓↓ */
    //
    // Each wait-point hands out a one-shot receiver resolved by the state machine. They are
    // single-shot: once resolved, the next event requires obtaining a fresh receiver. For the three
    // "next event" wait-points, obtaining a new receiver replaces a still-pending one, which then
    // resolves as closed. Waiters for blocks that never reach a QC persist until the pacemaker
    // drops them on view change.

    /// A future resolved when `block` gets a quorum certificate. Resolves immediately if it already
    /// has one.
    pub fn async_qc_finish(&mut self, block: &BlockPtr) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        if block.voted_count() >= self.config.nmajority() {
            let _ = tx.send(());
        } else {
            self.qc_waiting.entry(block.hash()).or_default().push(tx);
        }
        rx
    }

    /// A future resolved when this replica emits its next proposal.
    pub fn async_wait_proposal(&mut self) -> oneshot::Receiver<Proposal> {
        let (tx, rx) = oneshot::channel();
        self.propose_waiting = Some(tx);
        rx
    }

    /// A future resolved when this replica next processes a received proposal.
    pub fn async_wait_receive_proposal(&mut self) -> oneshot::Receiver<Proposal> {
        let (tx, rx) = oneshot::channel();
        self.receive_proposal_waiting = Some(tx);
        rx
    }

    /// A future resolved with the new highest-QC block hash when `hqc` next advances.
    pub fn async_hqc_update(&mut self) -> oneshot::Receiver<CryptoHash> {
        let (tx, rx) = oneshot::channel();
        self.hqc_update_waiting = Some(tx);
        rx
    }

    fn on_qc_finish(&mut self, block: &BlockPtr) {
        if let Some(waiters) = self.qc_waiting.remove(&block.hash()) {
            for waiter in waiters {
                let _ = waiter.send(());
            }
        }
    }

    fn resolve_propose_waiting(&mut self, proposal: &Proposal) {
        if let Some(waiter) = self.propose_waiting.take() {
            let _ = waiter.send(proposal.clone());
        }
    }

    fn resolve_receive_proposal_waiting(&mut self, proposal: &Proposal) {
        if let Some(waiter) = self.receive_proposal_waiting.take() {
            let _ = waiter.send(proposal.clone());
        }
    }

    fn on_hqc_update(&mut self) {
        if let Some(waiter) = self.hqc_update_waiting.take() {
            let _ = waiter.send(self.hqc.0.hash());
        }
    }
}

impl<A: App, N: Network> Display for FairStuff<A, N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<fairstuff hqc={} hqc.height={} b_lock={} b_exec={} vheight={} tails={}>",
            short_hash(&self.hqc.0.hash()),
            self.hqc.0.height(),
            short_hash(&self.b_lock.hash()),
            short_hash(&self.b_exec.hash()),
            self.vheight,
            self.tails.len()
        )
    }
}

impl<A: App, N: Network> Drop for FairStuff<A, N> {
    fn drop(&mut self) {
        // The genesis qc_ref points at the genesis block itself; break the cycle so the arena can
        // free it.
        self.b0.clear_qc_ref();
    }
}

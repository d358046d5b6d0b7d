/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The content-addressed store that owns every live block, and the shared [BlockPtr] handle through
//! which the rest of the library touches them.
//!
//! A [stored block](StoredBlock) wraps the [wire data](Block) with the consensus-runtime state the
//! core maintains: the assigned height, the resolved parent handles, the `qc_ref` handle, the
//! self-QC under accumulation, the voter set, and the delivery/decision flags.
//!
//! Blocks form a DAG with two kinds of edges — parent links and `qc_ref` links — and the genesis
//! block's `qc_ref` points at itself. To keep this representable without owning back-pointers, the
//! store is the arena: it holds one strong handle per block, every other component holds cheap
//! [BlockPtr] clones, and relations between blocks are handles resolved lazily at
//! [delivery](crate::fairstuff::protocol::FairStuff::on_deliver_block). A block leaves the arena
//! only through [try_release](BlockStore::try_release), which drops it exclusively when the store
//! holds the last handle; [pruning](crate::fairstuff::protocol::FairStuff::prune) breaks `qc_ref`
//! links first so release can make progress.
//!
//! All access happens on the single consensus thread; the interior mutability of a block behind its
//! handle is never observed concurrently.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::fairstuff::ProtocolError;
use crate::types::basic::{BlockHeight, CryptoHash, ReplicaID};
use crate::types::block::{Block, MergedOrders};
use crate::types::certificates::{PartialCertificate, QuorumCertificate};

/// Decision state of a stored block.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Decision {
    #[default]
    Undecided,
    Committed,
}

/// A block as owned by the [BlockStore]: its wire data plus the consensus-runtime state attached to
/// it on this replica.
pub struct StoredBlock {
    pub(crate) block: Block,
    pub(crate) height: BlockHeight,
    pub(crate) parents: Vec<BlockPtr>,
    pub(crate) qc_ref: Option<BlockPtr>,
    pub(crate) self_qc: Option<QuorumCertificate>,
    pub(crate) voted: HashSet<ReplicaID>,
    pub(crate) decision: Decision,
    pub(crate) delivered: bool,
}

impl StoredBlock {
    fn new(block: Block) -> StoredBlock {
        StoredBlock {
            block,
            height: BlockHeight::new(0),
            parents: Vec::new(),
            qc_ref: None,
            self_qc: None,
            voted: HashSet::new(),
            decision: Decision::Undecided,
            delivered: false,
        }
    }

    /// The genesis entity: pre-delivered at height 0 and pre-committed as the anchor of the chain.
    /// Its justify, self-QC, and `qc_ref` self-cycle are installed by `on_init`.
    pub(crate) fn genesis() -> StoredBlock {
        let mut stored = StoredBlock::new(Block::genesis());
        stored.delivered = true;
        stored.decision = Decision::Committed;
        stored
    }
}

/// Shared handle to a block owned by the [BlockStore]. Clones are cheap; equality and hashing are by
/// identity, which coincides with equality of block hashes because the store deduplicates on insert.
#[derive(Clone)]
pub struct BlockPtr(Rc<RefCell<StoredBlock>>);

impl PartialEq for BlockPtr {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for BlockPtr {}

impl Hash for BlockPtr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Rc::as_ptr(&self.0) as usize).hash(state)
    }
}

impl BlockPtr {
    pub(crate) fn new(stored: StoredBlock) -> BlockPtr {
        BlockPtr(Rc::new(RefCell::new(stored)))
    }

    pub fn hash(&self) -> CryptoHash {
        self.0.borrow().block.hash
    }

    pub fn height(&self) -> BlockHeight {
        self.0.borrow().height
    }

    pub fn is_delivered(&self) -> bool {
        self.0.borrow().delivered
    }

    pub fn is_committed(&self) -> bool {
        self.0.borrow().decision == Decision::Committed
    }

    pub fn justify(&self) -> Option<QuorumCertificate> {
        self.0.borrow().block.justify.clone()
    }

    pub fn orders(&self) -> MergedOrders {
        self.0.borrow().block.orders.clone()
    }

    pub fn parent_hashes(&self) -> Vec<CryptoHash> {
        self.0.borrow().block.parent_hashes.clone()
    }

    /// A fresh copy of the block's wire data. What gets put inside a
    /// [Proposal](crate::messages::Proposal).
    pub fn to_block(&self) -> Block {
        self.0.borrow().block.clone()
    }

    /// The resolved primary parent. None before delivery and for the genesis block.
    pub fn primary_parent(&self) -> Option<BlockPtr> {
        self.0.borrow().parents.first().cloned()
    }

    pub fn qc_ref(&self) -> Option<BlockPtr> {
        self.0.borrow().qc_ref.clone()
    }

    pub fn voted_count(&self) -> usize {
        self.0.borrow().voted.len()
    }

    pub fn self_qc(&self) -> Option<QuorumCertificate> {
        self.0.borrow().self_qc.clone()
    }

    pub(crate) fn set_height(&self, height: BlockHeight) {
        self.0.borrow_mut().height = height
    }

    pub(crate) fn set_parents(&self, parents: Vec<BlockPtr>) {
        self.0.borrow_mut().parents = parents
    }

    /// Detach and return the last parent link. Used by pruning to walk the ancestor graph while
    /// dismantling it.
    pub(crate) fn pop_last_parent(&self) -> Option<BlockPtr> {
        self.0.borrow_mut().parents.pop()
    }

    pub(crate) fn set_qc_ref(&self, qc_ref: Option<BlockPtr>) {
        self.0.borrow_mut().qc_ref = qc_ref
    }

    pub(crate) fn clear_qc_ref(&self) {
        self.0.borrow_mut().qc_ref = None
    }

    pub(crate) fn set_justify(&self, justify: Option<QuorumCertificate>) {
        self.0.borrow_mut().block.justify = justify
    }

    pub(crate) fn set_delivered(&self) {
        self.0.borrow_mut().delivered = true
    }

    pub(crate) fn set_committed(&self) {
        self.0.borrow_mut().decision = Decision::Committed
    }

    /// Record that `voter` contributed to this block's self-QC. Returns false if it already had.
    pub(crate) fn insert_voter(&self, voter: ReplicaID) -> bool {
        self.0.borrow_mut().voted.insert(voter)
    }

    pub(crate) fn has_self_qc(&self) -> bool {
        self.0.borrow().self_qc.is_some()
    }

    pub(crate) fn set_self_qc(&self, self_qc: QuorumCertificate) {
        self.0.borrow_mut().self_qc = Some(self_qc)
    }

    /// Install a vote's partial certificate into the self-QC under accumulation. No-op if the
    /// self-QC does not exist.
    pub(crate) fn add_self_qc_part(&self, cert: &PartialCertificate) {
        if let Some(self_qc) = self.0.borrow_mut().self_qc.as_mut() {
            self_qc.add_part(cert)
        }
    }

    /// Seal the self-QC under accumulation. No-op if the self-QC does not exist.
    pub(crate) fn compute_self_qc(&self) {
        if let Some(self_qc) = self.0.borrow_mut().self_qc.as_mut() {
            self_qc.compute()
        }
    }

    pub(crate) fn strong_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }
}

/// Content-addressed cache of all live blocks, keyed by block hash. Deduplicates on insert: a block
/// hash appears in the store at most once, and every component holding a [BlockPtr] for it holds the
/// same underlying block.
pub struct BlockStore {
    blocks: HashMap<CryptoHash, BlockPtr>,
}

impl Default for BlockStore {
    fn default() -> Self {
        BlockStore::new()
    }
}

impl BlockStore {
    pub fn new() -> BlockStore {
        Self {
            blocks: HashMap::new(),
        }
    }

    /// Insert a block, returning the canonical handle for its hash. If a block with the same hash is
    /// already stored, the existing handle is returned and `block` is dropped.
    pub fn insert(&mut self, block: Block) -> BlockPtr {
        let hash = block.hash;
        self.blocks
            .entry(hash)
            .or_insert_with(|| BlockPtr::new(StoredBlock::new(block)))
            .clone()
    }

    pub(crate) fn insert_stored(&mut self, stored: StoredBlock) -> BlockPtr {
        let hash = stored.block.hash;
        self.blocks
            .entry(hash)
            .or_insert_with(|| BlockPtr::new(stored))
            .clone()
    }

    pub fn get(&self, hash: &CryptoHash) -> Option<BlockPtr> {
        self.blocks.get(hash).cloned()
    }

    /// Resolve a hash to a delivered block.
    pub fn get_delivered(&self, hash: &CryptoHash) -> Result<BlockPtr, ProtocolError> {
        match self.blocks.get(hash) {
            Some(block) if block.is_delivered() => Ok(block.clone()),
            _ => Err(ProtocolError::BlockNotDelivered { block: *hash }),
        }
    }

    pub fn contains(&self, hash: &CryptoHash) -> bool {
        self.blocks.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Drop a block from the store if no handles to it remain outside the store and the caller.
    /// Returns whether the block was released.
    pub fn try_release(&mut self, block: &BlockPtr) -> bool {
        // One handle is held by the store's map, one by the caller's argument.
        if block.strong_count() <= 2 {
            self.blocks.remove(&block.hash()).is_some()
        } else {
            false
        }
    }
}

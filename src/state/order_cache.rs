/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Leader-side cache of the local orderings received from each replica, plus the bookkeeping sets
//! that keep commands from being proposed or re-decided twice.
//!
//! Three pieces of state live here:
//! 1. **Per-replica queues** of submitted local orderings. The front of each queue is what the next
//!    [fair proposal](crate::fairstuff::protocol::FairStuff::fair_propose) merges; consumed fronts
//!    are popped, and partially-proposed fronts are filtered and re-queued.
//! 2. **The proposed-commands set**. A command enters it when it appears in the orders payload of any
//!    block in the store, and leaves it when a block carrying it commits. Queue filtering uses it to
//!    discard commands a prior proposal already covered.
//! 3. **Seen sets** (one per level: propose, execute) tracking commands this replica has observed in
//!    its own pending local order. The propose-level set is what a
//!    [reorder](crate::fairstuff::protocol::FairStuff::reorder) flushes; both shrink as proposals
//!    and commits consume their commands.
//!
//! Seen sets are ordered (`BTreeSet`) because the reorder flush feeds an order-producing
//! computation and must enumerate deterministically.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use crate::types::basic::{CryptoHash, ReplicaID};

pub struct OrderCache {
    queues: BTreeMap<ReplicaID, VecDeque<Vec<CryptoHash>>>,
    proposed: HashSet<CryptoHash>,
    seen_propose: BTreeSet<CryptoHash>,
    seen_execute: BTreeSet<CryptoHash>,
}

impl Default for OrderCache {
    fn default() -> Self {
        OrderCache::new()
    }
}

impl OrderCache {
    pub fn new() -> OrderCache {
        Self {
            queues: BTreeMap::new(),
            proposed: HashSet::new(),
            seen_propose: BTreeSet::new(),
            seen_execute: BTreeSet::new(),
        }
    }

    /* ↓↓↓ Per-replica local-order queues ↓↓↓ */

    /// Append a submitted ordering to `contributor`'s queue.
    pub fn add_local_order(&mut self, contributor: ReplicaID, order: Vec<CryptoHash>) {
        self.queues.entry(contributor).or_default().push_back(order)
    }

    /// The replicas with a non-empty queue, in ascending id order.
    pub fn contributors(&self) -> Vec<ReplicaID> {
        self.queues
            .iter()
            .filter(|(_, queue)| queue.front().is_some())
            .map(|(replica, _)| *replica)
            .collect()
    }

    /// Number of distinct replicas with a non-empty queue.
    pub fn contributor_count(&self) -> usize {
        self.queues
            .values()
            .filter(|queue| queue.front().is_some())
            .count()
    }

    /// The ordering at the front of `contributor`'s queue.
    pub fn front(&self, contributor: &ReplicaID) -> Option<&Vec<CryptoHash>> {
        self.queues.get(contributor).and_then(|queue| queue.front())
    }

    /// Consume the ordering at the front of `contributor`'s queue.
    pub fn clear_front(&mut self, contributor: &ReplicaID) {
        if let Some(queue) = self.queues.get_mut(contributor) {
            queue.pop_front();
        }
    }

    /// Re-queue an ordering at the front of `contributor`'s queue. Used after filtering out
    /// already-proposed commands from a consumed front.
    pub fn push_front(&mut self, contributor: ReplicaID, order: Vec<CryptoHash>) {
        self.queues.entry(contributor).or_default().push_front(order)
    }

    /* ↓↓↓ Proposed-commands set ↓↓↓ */

    pub fn mark_proposed<'a>(&mut self, commands: impl Iterator<Item = &'a CryptoHash>) {
        self.proposed.extend(commands.copied())
    }

    pub fn is_proposed(&self, command: &CryptoHash) -> bool {
        self.proposed.contains(command)
    }

    pub fn remove_proposed(&mut self, command: &CryptoHash) {
        self.proposed.remove(command);
    }

    /* ↓↓↓ Seen sets ↓↓↓ */

    /// Record commands observed in this replica's own pending local order, at both levels.
    pub fn note_seen(&mut self, commands: &[CryptoHash]) {
        self.seen_propose.extend(commands.iter().copied());
        self.seen_execute.extend(commands.iter().copied());
    }

    pub fn remove_seen_propose(&mut self, command: &CryptoHash) {
        self.seen_propose.remove(command);
    }

    pub fn remove_seen_execute(&mut self, command: &CryptoHash) {
        self.seen_execute.remove(command);
    }

    /// The seen-but-unproposed commands, in byte-lexicographic order. What a reorder retry submits.
    pub fn seen_unproposed(&self) -> Vec<CryptoHash> {
        self.seen_propose
            .iter()
            .filter(|command| !self.proposed.contains(command))
            .copied()
            .collect()
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The order-fairness layer: submitting local orders to the leader, merging them into a proposal
//! payload, and deterministically finalizing a committed block's command sequence.
//!
//! ## Protocol
//!
//! Every replica watches commands arrive and periodically submits the observed order to the current
//! leader ([on_local_order](super::protocol::FairStuff::on_local_order)). The leader queues each
//! replica's submissions ([on_receive_local_order](super::protocol::FairStuff::on_receive_local_order))
//! and, once a quorum of replicas have queued orderings, merges the queue fronts into one ordering
//! per contributor over a uniform command set
//! ([fair_propose](super::protocol::FairStuff::fair_propose)). The merged orderings ride inside the
//! proposed block, and when the block commits,
//! [fair_finalize](super::protocol::FairStuff::fair_finalize) turns them into the committed command
//! sequence.
//!
//! ## Determinism
//!
//! Every replica must finalize the same sequence from the same block. Contributors are always walked
//! in ascending replica id order, weight ties break on byte-lexicographic command hashes, and the
//! dominance refinement is a stable re-sort, so the result depends only on the block's payload and
//! the fairness parameter γ.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::time::SystemTime;

use log::debug;

use crate::app::{App, Network};
use crate::events::*;
use crate::messages::LocalOrder;
use crate::state::block_store::BlockPtr;
use crate::types::basic::{CryptoHash, ReplicaID};
use crate::types::block::MergedOrders;

use super::protocol::FairStuff;

impl<A: App, N: Network> FairStuff<A, N> {
    /// Submit this replica's observed command order to `leader`. With `is_reorder` (a
    /// pacemaker-driven retry), the seen-but-unproposed commands are flushed into the submission.
    /// An empty submission is suppressed.
    pub fn on_local_order(&mut self, leader: ReplicaID, order: Vec<CryptoHash>, is_reorder: bool) {
        let mut commands = order;
        if is_reorder {
            for command in self.orders.seen_unproposed() {
                if !commands.contains(&command) {
                    commands.push(command);
                }
            }
        }

        self.orders.note_seen(&commands);

        if commands.is_empty() {
            debug!("nothing to order towards leader {}", leader);
            return;
        }

        let local_order = LocalOrder::new(self.id, commands);
        Event::SendLocalOrder(SendLocalOrderEvent {
            timestamp: SystemTime::now(),
            leader,
            local_order: local_order.clone(),
        })
        .publish(&self.event_publisher);
        self.network.send_local_order(leader, local_order);
    }

    /// Pacemaker-triggered retry: flush the seen-but-unproposed commands to `leader`. Best-effort; a
    /// no-op when no local commands are pending.
    pub fn reorder(&mut self, leader: ReplicaID) {
        debug!("reorder towards leader {}", leader);
        self.on_local_order(leader, Vec::new(), true);
    }

    /// Process a local-order submission (leader side). Queues the ordering, then filters the front
    /// of every contributor's queue down to its unproposed prefix, discarding commands a prior
    /// proposal already covered.
    ///
    /// Returns true iff a quorum of distinct replicas have non-empty queues afterwards, i.e., a fair
    /// proposal is ready; the pacemaker then calls
    /// [on_propose](FairStuff::on_propose) with [fair_propose](FairStuff::fair_propose)'s output.
    pub fn on_receive_local_order(&mut self, local_order: &LocalOrder) -> bool {
        debug!("got {}", local_order);
        self.orders
            .add_local_order(local_order.initiator, local_order.ordered_hashes.clone());
        Event::ReceiveLocalOrder(ReceiveLocalOrderEvent {
            timestamp: SystemTime::now(),
            origin: local_order.initiator,
            count: local_order.ordered_hashes.len(),
        })
        .publish(&self.event_publisher);

        for replica in self.orders.contributors() {
            let front = match self.orders.front(&replica) {
                Some(front) => front.clone(),
                None => continue,
            };
            let unproposed: Vec<CryptoHash> = front
                .iter()
                .filter(|command| !self.orders.is_proposed(command))
                .copied()
                .collect();
            if unproposed.len() < front.len() {
                self.orders.clear_front(&replica);
                if !unproposed.is_empty() {
                    self.orders.push_front(replica, unproposed);
                }
            }
        }

        let ready = self.orders.contributor_count() >= self.config.nmajority();
        if !ready {
            debug!("no quorum of local orders yet");
        }
        ready
    }

    /// Merge the queued orderings into the payload of the next proposal (leader side): one ordering
    /// per contributor, all over the same command set.
    ///
    /// Commands unseen by the first contributor are appended to its ordering in the order of first
    /// appearance across the remaining contributors (ascending replica id); a second pass appends to
    /// every other ordering the commands it is missing, in the order of the augmented first
    /// ordering. Each contributor thus keeps its own first-observed relative order for the commands
    /// it saw. The merged queue fronts are consumed.
    pub fn fair_propose(&mut self) -> MergedOrders {
        let contributors = self.orders.contributors();
        let mut orders = MergedOrders::new();
        if contributors.is_empty() {
            return orders;
        }

        let first = contributors[0];
        let mut first_order: Vec<CryptoHash> =
            self.orders.front(&first).cloned().unwrap_or_default();

        let mut rest: Vec<(ReplicaID, Vec<CryptoHash>)> = Vec::new();
        for replica in contributors.iter().skip(1) {
            let order = self.orders.front(replica).cloned().unwrap_or_default();
            for command in &order {
                if !first_order.contains(command) {
                    first_order.push(*command);
                }
            }
            rest.push((*replica, order));
        }

        for (_, order) in rest.iter_mut() {
            for command in &first_order {
                if !order.contains(command) {
                    order.push(*command);
                }
            }
        }

        orders.insert(first, first_order);
        for (replica, order) in rest {
            orders.insert(replica, order);
        }

        for replica in &contributors {
            self.orders.clear_front(replica);
        }

        debug!("fair_propose merged {} orderings", orders.len());
        orders
    }

    /// Resolve a block's merged orderings into the committed command sequence. Deterministic given
    /// the block's payload and γ, and independent of any container iteration order.
    ///
    /// Commands are first sorted ascending by positional weight `Σ_k (1 - γ^rank_k(c))` — commands
    /// consistently observed early across contributors accumulate less weight — and then re-sorted
    /// by pairwise dominance: `a` precedes `b` when more contributors observed `a` before `b`, with
    /// exact ties broken by byte-lexicographic hash order.
    ///
    /// Returns an empty sequence for a block without orderings. An empty result for a block *with*
    /// orderings signals the commit walk to halt before the block and retry on a later pass.
    pub fn fair_finalize(&self, block: &BlockPtr) -> Vec<CryptoHash> {
        let orders = block.orders();
        if orders.is_empty() {
            return Vec::new();
        }
        let gamma = self.config.fairness_parameter();

        let mut weights: BTreeMap<CryptoHash, f64> = BTreeMap::new();
        for (_, order) in orders.iter() {
            for (position, command) in order.iter().enumerate() {
                *weights.entry(*command).or_insert(0.0) += 1.0 - gamma.powi(position as i32 + 1);
            }
        }

        let mut weighted: Vec<(CryptoHash, f64)> = weights.into_iter().collect();
        weighted.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let mut precedence: HashMap<(CryptoHash, CryptoHash), u32> = HashMap::new();
        for (_, order) in orders.iter() {
            for from in 0..order.len() {
                for to in (from + 1)..order.len() {
                    *precedence.entry((order[from], order[to])).or_insert(0) += 1;
                }
            }
        }

        let mut order: Vec<CryptoHash> = weighted.into_iter().map(|(command, _)| command).collect();
        order.sort_by(|a, b| {
            let a_first = precedence.get(&(*a, *b)).copied().unwrap_or(0);
            let b_first = precedence.get(&(*b, *a)).copied().unwrap_or(0);
            b_first.cmp(&a_first).then_with(|| a.cmp(b))
        });
        order
    }
}

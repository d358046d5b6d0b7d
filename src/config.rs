/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the [ReplicaConfig] type: the identity map of the cluster and the derived quorum
//! parameters.
//!
//! The replica configuration is mutable only during setup: replicas are registered one by one with
//! [add_replica](crate::fairstuff::protocol::FairStuff::add_replica), and the configuration freezes
//! when [on_init](crate::fairstuff::protocol::FairStuff::on_init) fixes the quorum size
//! `nmajority = n - f` and the fairness parameter γ. The protocol never changes the replica set of an
//! active cluster.

use std::collections::BTreeMap;

use ed25519_dalek::VerifyingKey;

use crate::types::basic::{PeerAddress, ReplicaID};

/// Identity of a single replica: its id, the public key its votes verify under, and the opaque peer
/// handle the networking provider uses to reach it.
#[derive(Clone)]
pub struct ReplicaInfo {
    pub id: ReplicaID,
    pub verifying_key: VerifyingKey,
    pub peer: PeerAddress,
}

impl ReplicaInfo {
    pub fn new(id: ReplicaID, verifying_key: VerifyingKey, peer: PeerAddress) -> ReplicaInfo {
        ReplicaInfo {
            id,
            verifying_key,
            peer,
        }
    }
}

/// The replica set and the parameters derived from it.
///
/// Replicas are kept in ascending order of their ids. Every iteration over the replica set that feeds
/// an order-producing computation must use this order; [ReplicaConfig::replicas] walks it.
#[derive(Clone)]
pub struct ReplicaConfig {
    replicas: BTreeMap<ReplicaID, ReplicaInfo>,
    nmajority: usize,
    fairness_parameter: f64,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        ReplicaConfig::new()
    }
}

impl ReplicaConfig {
    pub fn new() -> ReplicaConfig {
        Self {
            replicas: BTreeMap::new(),
            nmajority: 0,
            fairness_parameter: 0.0,
        }
    }

    pub(crate) fn insert(&mut self, info: ReplicaInfo) {
        self.replicas.insert(info.id, info);
    }

    /// Fix the quorum size to `n - f` and install the fairness parameter. Called exactly once, by
    /// `on_init`.
    pub(crate) fn initialize(&mut self, faulty: usize, fairness_parameter: f64) {
        self.nmajority = self.replicas.len().saturating_sub(faulty);
        self.fairness_parameter = fairness_parameter;
    }

    /// Number of replicas in the cluster.
    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    /// Number of votes required to form a quorum certificate (`n - f`). 0 until `on_init`.
    pub fn nmajority(&self) -> usize {
        self.nmajority
    }

    /// The fairness parameter γ ∈ (0, 1) shaping the positional weighting of
    /// [fair finalization](crate::fairstuff::protocol::FairStuff::fair_finalize).
    pub fn fairness_parameter(&self) -> f64 {
        self.fairness_parameter
    }

    pub fn contains(&self, replica: &ReplicaID) -> bool {
        self.replicas.contains_key(replica)
    }

    pub fn verifying_key(&self, replica: &ReplicaID) -> Option<&VerifyingKey> {
        self.replicas.get(replica).map(|info| &info.verifying_key)
    }

    pub fn peer(&self, replica: &ReplicaID) -> Option<&PeerAddress> {
        self.replicas.get(replica).map(|info| &info.peer)
    }

    /// Get an iterator through the replica set which walks through it in ascending order of ids.
    pub fn replicas(&self) -> impl Iterator<Item = &ReplicaInfo> {
        self.replicas.values()
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the 'block' type and its methods.
//!
//! A [Block] is pure wire data: parent hashes, the justify QC, the merged command orderings, and the
//! opaque extra bytes, together with the [hash](Block::hash) over their canonical serialization.
//! This is what travels inside [proposals](crate::messages::Proposal). The consensus-runtime state
//! of a block — resolved parent handles, the self-QC under accumulation, the voter set, and the
//! delivery/decision flags — lives in the [block store](crate::state::block_store), attached to the
//! stored entity rather than to the wire data.

use std::collections::BTreeMap;
use std::io;

use borsh::{BorshDeserialize, BorshSerialize};
pub use sha2::Sha256 as CryptoHasher;
use sha2::Digest;

use crate::types::basic::*;
use crate::types::certificates::QuorumCertificate;

/// The merged-orders payload of a block: one command ordering per contributing replica, keyed by
/// replica id. Stored in a `BTreeMap` so that iteration and serialization always walk contributors in
/// ascending id order.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, Default)]
pub struct MergedOrders(BTreeMap<ReplicaID, Vec<CryptoHash>>);

impl MergedOrders {
    pub fn new() -> MergedOrders {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, contributor: ReplicaID, order: Vec<CryptoHash>) {
        self.0.insert(contributor, order);
    }

    pub fn get(&self, contributor: &ReplicaID) -> Option<&Vec<CryptoHash>> {
        self.0.get(contributor)
    }

    /// The contributor with the lowest replica id and its ordering.
    pub fn first(&self) -> Option<(&ReplicaID, &Vec<CryptoHash>)> {
        self.0.iter().next()
    }

    /// Get an iterator through the orderings which walks through contributors in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (&ReplicaID, &Vec<CryptoHash>)> {
        self.0.iter()
    }

    pub fn contributors(&self) -> impl Iterator<Item = &ReplicaID> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A node in the consensus DAG, in its wire form.
///
/// `parent_hashes[0]` identifies the primary parent; further entries are uncles. `justify` is the
/// quorum certificate the block extends, absent only for the genesis block.
#[derive(Clone, Debug)]
pub struct Block {
    pub parent_hashes: Vec<CryptoHash>,
    pub justify: Option<QuorumCertificate>,
    pub orders: MergedOrders,
    pub extra: Vec<u8>,
    pub hash: CryptoHash,
}

impl Block {
    pub fn new(
        parent_hashes: Vec<CryptoHash>,
        justify: Option<QuorumCertificate>,
        orders: MergedOrders,
        extra: Vec<u8>,
    ) -> Block {
        Block {
            hash: Block::hash(&parent_hashes, &justify, &orders, &extra),
            parent_hashes,
            justify,
            orders,
            extra,
        }
    }

    /// The genesis block: no parents, no justify, empty payload. Its hash is the same on every
    /// replica.
    pub fn genesis() -> Block {
        Block::new(Vec::new(), None, MergedOrders::new(), Vec::new())
    }

    /// Hash over the canonical (wire) serialization of a block.
    pub fn hash(
        parent_hashes: &Vec<CryptoHash>,
        justify: &Option<QuorumCertificate>,
        orders: &MergedOrders,
        extra: &Vec<u8>,
    ) -> CryptoHash {
        let mut hasher = CryptoHasher::new();
        hasher.update(&parent_hashes.try_to_vec().unwrap());
        hasher.update(&justify.try_to_vec().unwrap());
        hasher.update(&orders.try_to_vec().unwrap());
        hasher.update(&extra.try_to_vec().unwrap());
        CryptoHash::new(hasher.finalize().into())
    }

    /// Checks if the block's hash matches its contents.
    pub fn is_correct(&self) -> bool {
        self.hash == Block::hash(&self.parent_hashes, &self.justify, &self.orders, &self.extra)
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Block {}

// The hash is derived, not transmitted, so the borsh impls are written by hand: serialization
// covers the wire fields, deserialization recomputes the hash.
impl BorshSerialize for Block {
    fn serialize<W: io::Write>(&self, writer: &mut W) -> io::Result<()> {
        self.parent_hashes.serialize(writer)?;
        self.justify.serialize(writer)?;
        self.orders.serialize(writer)?;
        self.extra.serialize(writer)
    }
}

impl BorshDeserialize for Block {
    fn deserialize_reader<R: io::Read>(reader: &mut R) -> io::Result<Self> {
        let parent_hashes = Vec::<CryptoHash>::deserialize_reader(reader)?;
        let justify = Option::<QuorumCertificate>::deserialize_reader(reader)?;
        let orders = MergedOrders::deserialize_reader(reader)?;
        let extra = Vec::<u8>::deserialize_reader(reader)?;
        Ok(Block::new(parent_hashes, justify, orders, extra))
    }
}

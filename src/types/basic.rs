/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! "Inert" types that are sent around and inspected, but have no active behavior. These types follow
//! the newtype pattern and the API for using them is defined in this module.
//!
//! Types specific to a single subprotocol live in the respective modules; everything here is shared
//! across the block store, the consensus state machine, and the wire messages.

use borsh::{BorshDeserialize, BorshSerialize};
use std::{
    fmt::{self, Debug, Display, Formatter},
    ops::{Add, AddAssign},
};

/// Identity of a replica in the cluster. Replica ids are small integers assigned by the operator and
/// double as positions into [signature sets](SignatureSet).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct ReplicaID(u8);

impl ReplicaID {
    pub const fn new(int: u8) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u8 {
        self.0
    }

    /// Position of this replica in vectors indexed by replica id.
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl Display for ReplicaID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// Height of a block in the block DAG. The genesis block has height 0, and every other block sits one
/// above its primary parent.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, BorshDeserialize, BorshSerialize, Default,
)]
pub struct BlockHeight(u32);

impl BlockHeight {
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u32 {
        self.0
    }
}

impl Display for BlockHeight {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl AddAssign<u32> for BlockHeight {
    fn add_assign(&mut self, rhs: u32) {
        self.0.add_assign(rhs)
    }
}

impl Add<u32> for BlockHeight {
    type Output = BlockHeight;
    fn add(self, rhs: u32) -> Self::Output {
        BlockHeight::new(self.0.add(rhs))
    }
}

/// The SHA256 hash of a block or of a command. Block hashes are computed over the block's canonical
/// serialization [like this][crate::types::block::Block::hash]; command hashes are opaque to this
/// library.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize, Default,
)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Signature represented in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    pub(crate) fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

/// Set of signatures, represented as a vector with the size of the replica set. The value at a
/// particular position is either:
/// 1. None: if a valid signature from the replica with that id has not been obtained, or
/// 2. Some(signature_bytes): if signature_bytes has been obtained from the replica with that id.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SignatureSet(Vec<Option<SignatureBytes>>);

impl SignatureSet {
    pub const fn init() -> Self {
        Self(Vec::new())
    }

    pub(crate) fn new(len: usize) -> Self {
        Self(vec![None; len])
    }

    pub const fn vec(&self) -> &Vec<Option<SignatureBytes>> {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Option<SignatureBytes>> {
        self.0.iter()
    }

    pub fn get(&self, pos: usize) -> &Option<SignatureBytes> {
        &self.0[pos]
    }

    pub(crate) fn set(&mut self, pos: usize, value: Option<SignatureBytes>) {
        let signature_vec: &mut Vec<Option<SignatureBytes>> = self.0.as_mut();
        signature_vec[pos] = value
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of positions in the set holding a signature.
    pub fn count(&self) -> usize {
        self.0.iter().filter(|signature| signature.is_some()).count()
    }
}

/// Opaque handle used by the networking provider to reach a peer. The consensus core never interprets
/// it; it only stores one per replica and hands it back through [`crate::config::ReplicaConfig`].
#[derive(Clone, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(address: String) -> Self {
        Self(address)
    }

    pub fn str(&self) -> &str {
        &self.0
    }
}

impl Display for PeerAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

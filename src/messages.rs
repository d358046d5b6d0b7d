/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Structured messages that are exchanged between replicas, and the [Finality] record handed to the
//! user per committed command.
//!
//! ## Messages
//!
//! The protocol involves three message types:
//! 1. [`Proposal`]: broadcasted by the leader of a view, who proposes to extend the chain with the
//!    contained block.
//! 2. [`Vote`]: sent by a replica to a proposer to vote for a block, carrying the replica's partial
//!    certificate over the block hash.
//! 3. [`LocalOrder`]: sent by a replica to the current leader, submitting the ordering in which the
//!    replica observed commands arrive.
//!
//! The library does not move these messages itself: the networking provider serializes them (borsh),
//! ships them, verifies signatures where applicable ([`Vote::is_correct`]), and hands them to the
//! matching `on_receive_*` entry point of the core.

use std::fmt::{self, Display, Formatter};
use std::io;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::config::ReplicaConfig;
use crate::logging::short_hash;
use crate::types::basic::{BlockHeight, CryptoHash, ReplicaID};
use crate::types::block::Block;
use crate::types::certificates::PartialCertificate;

/// Broadcasted by the leader of a view, who proposes to extend the chain with the contained block.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct Proposal {
    pub proposer: ReplicaID,
    pub block: Block,
}

impl Proposal {
    pub fn new(proposer: ReplicaID, block: Block) -> Proposal {
        Proposal { proposer, block }
    }
}

impl Display for Proposal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<proposal rid={} blk={}>",
            self.proposer,
            short_hash(&self.block.hash)
        )
    }
}

/// Sent by a replica to a proposer to vote for a block. The contained partial certificate is the
/// proof of validity of the vote.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct Vote {
    pub voter: ReplicaID,
    pub blk_hash: CryptoHash,
    pub cert: PartialCertificate,
}

impl Vote {
    pub fn new(voter: ReplicaID, blk_hash: CryptoHash, cert: PartialCertificate) -> Vote {
        Vote {
            voter,
            blk_hash,
            cert,
        }
    }

    /// Returns whether the vote's certificate verifies under the voter's public key and attests to
    /// the block hash the vote names. The networking provider must run this before handing the vote
    /// to the core; the core trusts pre-verified votes.
    pub fn is_correct(&self, config: &ReplicaConfig) -> bool {
        let verifying_key = match config.verifying_key(&self.voter) {
            Some(verifying_key) => verifying_key,
            None => return false,
        };
        self.cert.verify(verifying_key) && self.cert.obj_hash == self.blk_hash
    }
}

impl Display for Vote {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<vote rid={} blk={}>",
            self.voter,
            short_hash(&self.blk_hash)
        )
    }
}

/// Sent by a replica to the current leader: the ordering in which the replica observed the listed
/// commands arrive. Immutable once constructed.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct LocalOrder {
    pub initiator: ReplicaID,
    pub ordered_hashes: Vec<CryptoHash>,
}

impl LocalOrder {
    pub fn new(initiator: ReplicaID, ordered_hashes: Vec<CryptoHash>) -> LocalOrder {
        LocalOrder {
            initiator,
            ordered_hashes,
        }
    }
}

impl Display for LocalOrder {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<local_order rid={} len={}>",
            self.initiator,
            self.ordered_hashes.len()
        )
    }
}

/// Decision tag carried by a [Finality] record. Commands only ever finalize by committing.
pub const DECISION_COMMIT: i8 = 1;

/// Handed to [`App::decide`](crate::app::App::decide) once per committed command, strictly in commit
/// order: ascending block height, ascending index within a block. Once emitted, the
/// `(cmd_height, cmd_idx, cmd_hash)` triple is final.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Finality {
    pub rid: ReplicaID,
    pub decision: i8,
    pub cmd_idx: u32,
    pub cmd_height: BlockHeight,
    pub cmd_hash: CryptoHash,
    pub blk_hash: CryptoHash,
}

impl Finality {
    pub fn new(
        rid: ReplicaID,
        decision: i8,
        cmd_idx: u32,
        cmd_height: BlockHeight,
        cmd_hash: CryptoHash,
        blk_hash: CryptoHash,
    ) -> Finality {
        Finality {
            rid,
            decision,
            cmd_idx,
            cmd_height,
            cmd_hash,
            blk_hash,
        }
    }
}

impl Display for Finality {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<fin decision={} cmd_idx={} cmd_height={} cmd={} blk={}>",
            self.decision,
            self.cmd_idx,
            self.cmd_height,
            short_hash(&self.cmd_hash),
            short_hash(&self.blk_hash)
        )
    }
}

// The block hash only travels for commit decisions, so the layout is conditional and the borsh
// impls are written by hand.
impl BorshSerialize for Finality {
    fn serialize<W: io::Write>(&self, writer: &mut W) -> io::Result<()> {
        self.rid.serialize(writer)?;
        self.decision.serialize(writer)?;
        self.cmd_idx.serialize(writer)?;
        self.cmd_height.serialize(writer)?;
        self.cmd_hash.serialize(writer)?;
        if self.decision == DECISION_COMMIT {
            self.blk_hash.serialize(writer)?;
        }
        Ok(())
    }
}

impl BorshDeserialize for Finality {
    fn deserialize_reader<R: io::Read>(reader: &mut R) -> io::Result<Self> {
        let rid = ReplicaID::deserialize_reader(reader)?;
        let decision = i8::deserialize_reader(reader)?;
        let cmd_idx = u32::deserialize_reader(reader)?;
        let cmd_height = BlockHeight::deserialize_reader(reader)?;
        let cmd_hash = CryptoHash::deserialize_reader(reader)?;
        let blk_hash = if decision == DECISION_COMMIT {
            CryptoHash::deserialize_reader(reader)?
        } else {
            CryptoHash::default()
        };
        Ok(Finality {
            rid,
            decision,
            cmd_idx,
            cmd_height,
            cmd_hash,
            blk_hash,
        })
    }
}

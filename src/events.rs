/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Notifications that are emitted when significant things happen in the local replica.
//!
//! ## Event enum
//!
//! Significant occurrences include inserting or delivering a block, broadcasting or receiving a
//! proposal, collecting a quorum certificate, committing a block, and deciding a command.
//!
//! Each occurrence corresponds to a variant of the [event enum](Event), and each variant tuple
//! contains an inner struct type storing information that summarizes the event — always including a
//! timestamp corresponding to when the event occurred.
//!
//! ## Consuming events
//!
//! A core constructed with an event publisher channel sends one `Event` per occurrence. Feed the
//! receiving end to [`start_event_bus`](crate::event_bus::start_event_bus) to have the default
//! [logging handlers](crate::logging) (and any user-defined handlers) run, or consume the channel
//! directly.
//!
//! Events are emitted **after** the corresponding occurrence completed inside the core.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::messages::{Finality, LocalOrder, Proposal, Vote};
use crate::types::basic::{BlockHeight, CryptoHash, ReplicaID};

/// Enumerates all events defined for this library.
pub enum Event {
    // Events that change the block store.
    InsertBlock(InsertBlockEvent),
    DeliverBlock(DeliverBlockEvent),
    CommitBlock(CommitBlockEvent),
    Decide(DecideEvent),
    PruneBlock(PruneBlockEvent),
    UpdateHighestQC(UpdateHighestQCEvent),
    CollectQC(CollectQCEvent),

    // Events that involve sending a message.
    Propose(ProposeEvent),
    Vote(VoteEvent),
    SendLocalOrder(SendLocalOrderEvent),

    // Events that involve receiving a message.
    ReceiveProposal(ReceiveProposalEvent),
    ReceiveVote(ReceiveVoteEvent),
    ReceiveLocalOrder(ReceiveLocalOrderEvent),
}

impl Event {
    /// Publishes a given instance of the [Event] enum on the event publisher channel (if the channel
    /// is defined).
    pub fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            let _ = event_publisher.send(self);
        }
    }
}

/// A new block was inserted into the [block store](crate::state::block_store::BlockStore).
pub struct InsertBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
}

/// A block became delivered: its parents resolved, its height assigned, and its justify's target
/// resolved.
pub struct DeliverBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub height: BlockHeight,
}

/// A block, identifiable by its hash, was committed.
pub struct CommitBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub height: BlockHeight,
}

/// A command reached its final position in the committed sequence. Includes the full [Finality]
/// record handed to the app.
pub struct DecideEvent {
    pub timestamp: SystemTime,
    pub finality: Finality,
}

/// A block was released from the block store by pruning.
pub struct PruneBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
}

/// The highest quorum certificate known to this replica advanced.
pub struct UpdateHighestQCEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub height: BlockHeight,
}

/// A block's self-QC reached the quorum count and was sealed.
pub struct CollectQCEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
}

/// This replica broadcasted a proposal.
pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub proposal: Proposal,
}

/// This replica sent a vote.
pub struct VoteEvent {
    pub timestamp: SystemTime,
    pub recipient: ReplicaID,
    pub vote: Vote,
}

/// This replica submitted its local ordering to the current leader.
pub struct SendLocalOrderEvent {
    pub timestamp: SystemTime,
    pub leader: ReplicaID,
    pub local_order: LocalOrder,
}

/// This replica processed a received proposal.
pub struct ReceiveProposalEvent {
    pub timestamp: SystemTime,
    pub origin: ReplicaID,
    pub block: CryptoHash,
    pub height: BlockHeight,
}

/// This replica processed a received vote.
pub struct ReceiveVoteEvent {
    pub timestamp: SystemTime,
    pub origin: ReplicaID,
    pub block: CryptoHash,
}

/// This replica (as leader) processed a received local ordering.
pub struct ReceiveLocalOrderEvent {
    pub timestamp: SystemTime,
    pub origin: ReplicaID,
    pub count: usize,
}

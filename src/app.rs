/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The plug-points through which a [consensus core](crate::fairstuff::protocol::FairStuff) drives
//! the world outside it.
//!
//! The core never executes commands and never touches a socket. Instead, the user supplies:
//! 1. An [`App`]: the execution environment. It learns about committed blocks and committed
//!    commands, in commit order, and does with them whatever "execution" means for the application.
//! 2. A [`Network`]: the messaging provider. It ships proposals, votes, and local orders to the
//!    replicas the core names. Delivery may be lossy and slow (partial synchrony); the core's safety
//!    never depends on it.
//!
//! Both traits are called synchronously from inside the core's entry points, on the core's thread.
//! Implementations must not call back into the core; they should record or forward and return.

use crate::messages::{Finality, LocalOrder, Proposal, Vote};
use crate::state::block_store::BlockPtr;
use crate::types::basic::ReplicaID;

/// The execution environment of a replica.
pub trait App {
    /// Called exactly once per committed block, before any of the block's
    /// [`decide`](App::decide) calls.
    fn commit_block(&mut self, block: &BlockPtr);

    /// Called once per committed command. Invocations are strictly ordered: ascending block height,
    /// ascending command index within a block. The `(cmd_height, cmd_idx, cmd_hash)` triple of a
    /// delivered [`Finality`] never changes afterwards.
    fn decide(&mut self, finality: Finality);
}

/// The messaging provider of a replica.
pub trait Network {
    /// Send `proposal` to every replica except this one.
    fn broadcast_proposal(&mut self, proposal: Proposal);

    /// Send `vote` to `recipient`. Sending to a good proposer helps liveness; safety holds
    /// regardless of where votes end up.
    fn send_vote(&mut self, recipient: ReplicaID, vote: Vote);

    /// Send `local_order` to `leader`, the current leader as designated by the pacemaker.
    fn send_local_order(&mut self, leader: ReplicaID, local_order: LocalOrder);
}
